// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bit granular access to packet buffers.
//!
//! Little endian packets fill octets from the least significant bit,
//! big endian packets from the most significant bit. With either
//! order, a field spanning whole octets reads as a plain integer in
//! the packet endianness.

use crate::{DecodeError, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// Mask covering the `width` low bits. `width` is at most 64.
fn mask(width: usize) -> u128 {
    (1u128 << width) - 1
}

/// Octet range covering the bits `offset..offset + width`.
fn octets(offset: usize, width: usize) -> std::ops::Range<usize> {
    offset / 8..(offset + width + 7) / 8
}

/// Load the octets into an integer, first octet most significant for
/// big endian, least significant for little endian.
/// A 64 bit field at an unaligned offset covers 9 octets.
fn load(bytes: &[u8], endianness: Endianness) -> u128 {
    match endianness {
        Endianness::Little => bytes.iter().rev().fold(0, |acc, b| (acc << 8) | *b as u128),
        Endianness::Big => bytes.iter().fold(0, |acc, b| (acc << 8) | *b as u128),
    }
}

/// Bit shift of the field inside the loaded octets.
fn shift(offset: usize, width: usize, len: usize, endianness: Endianness) -> usize {
    match endianness {
        Endianness::Little => offset % 8,
        Endianness::Big => len * 8 - offset % 8 - width,
    }
}

/// Read the unsigned integer of `width` bits located at bit `offset`.
pub fn read_bits(
    buf: &[u8],
    offset: usize,
    width: usize,
    endianness: Endianness,
) -> Result<u64, DecodeError> {
    if width > 64 {
        return Err(DecodeError::InvalidWidth { width });
    }
    if width == 0 {
        return Ok(0);
    }
    let bytes = buf
        .get(octets(offset, width))
        .ok_or(DecodeError::InvalidLength { offset, width, len: buf.len() })?;
    let value = load(bytes, endianness) >> shift(offset, width, bytes.len(), endianness);
    Ok((value & mask(width)) as u64)
}

/// Write the unsigned integer `value` in the `width` bits located at
/// bit `offset`. Neighbouring bits are preserved.
pub fn write_bits(
    buf: &mut [u8],
    offset: usize,
    width: usize,
    value: u64,
    endianness: Endianness,
) -> Result<(), EncodeError> {
    if width > 64 || (value as u128) > mask(width) {
        return Err(EncodeError::ValueOverflow { value, width });
    }
    if width == 0 {
        return Ok(());
    }
    let len = buf.len();
    let bytes = buf
        .get_mut(octets(offset, width))
        .ok_or(EncodeError::BufferTooSmall { offset, width, len })?;
    let shift = shift(offset, width, bytes.len(), endianness);
    let acc = (load(bytes, endianness) & !(mask(width) << shift)) | ((value as u128) << shift);
    let count = bytes.len();
    for (index, byte) in bytes.iter_mut().enumerate() {
        *byte = match endianness {
            Endianness::Little => (acc >> (8 * index)) as u8,
            Endianness::Big => (acc >> (8 * (count - index - 1))) as u8,
        };
    }
    Ok(())
}
