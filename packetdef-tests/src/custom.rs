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

//! Custom field types of the generated frames.

use packetdef_runtime::CustomField;

/// Fixed six octet token. The all-zero token is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(pub [u8; 6]);

impl CustomField for Token {
    fn size(_buf: &[u8]) -> Option<usize> {
        Some(6)
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        Some(Token(buf.try_into().ok()?))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn is_valid(&self) -> bool {
        self.0 != [0; 6]
    }
}

/// UTF-8 name with a one octet length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name(pub String);

impl CustomField for Name {
    fn size(buf: &[u8]) -> Option<usize> {
        Some(*buf.first()? as usize + 1)
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let (len, text) = buf.split_first()?;
        if text.len() != *len as usize {
            return None;
        }
        String::from_utf8(text.to_vec()).ok().map(Name)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.0.len() as u8];
        buf.extend_from_slice(self.0.as_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_size_includes_the_prefix() {
        assert_eq!(Name::size(&[3, b'a', b'b', b'c', 0xff]), Some(4));
        assert_eq!(Name::size(&[]), None);
        assert_eq!(Name::decode(&[2, b'o', b'k']), Some(Name("ok".to_owned())));
        assert_eq!(Name::decode(&[3, b'o', b'k']), None);
    }
}
