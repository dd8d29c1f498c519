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

/// Byte accumulator computing the value stored in a checksum field.
///
/// The stored value is compared with the accumulator output truncated
/// to the checksum field width.
pub trait Checksum {
    /// Reset the accumulator.
    fn initialize(&mut self);
    fn add_byte(&mut self, byte: u8);
    fn get_checksum(&self) -> u64;
}

/// Run the accumulator over `bytes` from a fresh state.
pub fn fold(checksum: &mut dyn Checksum, bytes: &[u8]) -> u64 {
    checksum.initialize();
    for byte in bytes {
        checksum.add_byte(*byte);
    }
    checksum.get_checksum()
}

/// Wrapping sum of all bytes.
#[derive(Debug, Default, Clone)]
pub struct ByteSum {
    sum: u64,
}

impl Checksum for ByteSum {
    fn initialize(&mut self) {
        self.sum = 0;
    }

    fn add_byte(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(byte as u64);
    }

    fn get_checksum(&self) -> u64 {
        self.sum
    }
}

/// CRC-8 with polynomial x^8 + x^2 + x + 1, zero initial value.
#[derive(Debug, Default, Clone)]
pub struct Crc8 {
    crc: u8,
}

impl Checksum for Crc8 {
    fn initialize(&mut self) {
        self.crc = 0;
    }

    fn add_byte(&mut self, byte: u8) {
        self.crc ^= byte;
        for _ in 0..8 {
            self.crc = if self.crc & 0x80 != 0 { (self.crc << 1) ^ 0x07 } else { self.crc << 1 };
        }
    }

    fn get_checksum(&self) -> u64 {
        self.crc as u64
    }
}
