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

//! Helper definitions shared by packet views and builders, whether
//! they are generated Rust code or interpreted from a compiled schema.

use bytes::{BufMut, Bytes, BytesMut};

mod bits;
mod checksum;
mod validity;

pub use bits::{read_bits, write_bits, Endianness};
pub use checksum::{fold, ByteSum, Checksum, Crc8};
pub use validity::{Validity, ValidityCache};

/// Type of view access errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet validation failed")]
    InvalidPacket,
    #[error("reading {width} bits at offset {offset} exceeds the buffer length of {len} bytes")]
    InvalidLength { offset: usize, width: usize, len: usize },
    #[error("invalid bit width {width}, fields are at most 64 bits wide")]
    InvalidWidth { width: usize },
    #[error("when reading field {packet}::{field}, {value} is not a valid {type_} value")]
    InvalidEnumValue { packet: &'static str, field: &'static str, value: u64, type_: &'static str },
    #[error("when reading field {packet}::{field}, the custom value could not be decoded")]
    InvalidCustomValue { packet: &'static str, field: &'static str },
}

/// Type of serialization errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("the size of {packet}::{field} ({size}) is outside the range of valid values 0..{maximum_size}")]
    SizeOverflow { packet: &'static str, field: &'static str, size: usize, maximum_size: usize },
    #[error(
        "the value of {packet}::{field} ({value}) is outside the range of valid values 0..{maximum_value}"
    )]
    InvalidScalarValue { packet: &'static str, field: &'static str, value: u64, maximum_value: u64 },
    #[error("the size of {packet}::{field} is {size} bytes, but {expected_size} was expected")]
    InvalidCustomSize { packet: &'static str, field: &'static str, size: usize, expected_size: usize },
    #[error("the value of {packet}::{field} was rejected by its validator")]
    InvalidCustomValue { packet: &'static str, field: &'static str },
    #[error("the value {value} does not fit in {width} bits")]
    ValueOverflow { value: u64, width: usize },
    #[error("writing {width} bits at offset {offset} exceeds the buffer length of {len} bytes")]
    BufferTooSmall { offset: usize, width: usize, len: usize },
}

/// Trait implemented by the value types of custom fields.
pub trait CustomField: Sized {
    /// Return the octet size of the encoded value found at the start of
    /// `buf`, or `None` when it cannot be determined.
    /// Fixed width types ignore the buffer contents.
    fn size(buf: &[u8]) -> Option<usize>;

    /// Decode a value from exactly the bytes returned by `size`.
    fn decode(buf: &[u8]) -> Option<Self>;

    /// Return the encoded value.
    fn encode(&self) -> Vec<u8>;

    /// Semantic check run by packet views and builders.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Trait implemented by packet builders.
pub trait Builder: Sized {
    /// Return the length of the encoded packet.
    fn encoded_len(&self) -> usize;

    /// Write the packet to an output buffer.
    fn encode(&self, buf: &mut impl BufMut) -> Result<(), EncodeError>;

    /// Encode the packet to a byte vector.
    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Consume the builder and return the encoded packet.
    fn build(self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Return the largest value representable with `width` bits.
pub fn max_value(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}
