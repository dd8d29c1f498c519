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

use quote::quote;
use std::path::Path;

use crate::ast::EndiannessValue;

/// Generate the file preamble.
pub fn generate(path: &Path, endianness: EndiannessValue) -> proc_macro2::TokenStream {
    let filename = path.file_name().and_then(|name| name.to_str()).unwrap_or("<stdin>");
    let module_doc_string = format!(" @generated rust packets from {filename}.");
    let endianness = match endianness {
        EndiannessValue::LittleEndian => quote!(Endianness::Little),
        EndiannessValue::BigEndian => quote!(Endianness::Big),
    };
    quote! {
        #[doc = #module_doc_string]

        use bytes::{BufMut, Bytes};
        use packetdef_runtime::{
            read_bits, write_bits, Builder, CustomField, DecodeError, EncodeError, Endianness,
            ValidityCache,
        };
        use std::convert::TryFrom;

        type Result<T> = std::result::Result<T, DecodeError>;

        const ENDIANNESS: Endianness = #endianness;

        /// Return the bit offset located `bits` before the end of `buf`.
        fn from_end(buf: &[u8], bits: usize) -> Result<usize> {
            (buf.len() * 8).checked_sub(bits).ok_or(DecodeError::InvalidLength {
                offset: 0,
                width: bits,
                len: buf.len(),
            })
        }

        /// Return the octets `start..end` of `buf`.
        fn slice(buf: &Bytes, start: usize, end: usize) -> Result<Bytes> {
            if start <= end && end <= buf.len() {
                Ok(buf.slice(start..end))
            } else {
                Err(DecodeError::InvalidLength {
                    offset: start * 8,
                    width: end.saturating_sub(start) * 8,
                    len: buf.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_contains, format_rust};

    #[test]
    fn test_generate_preamble() {
        let code = format_rust(
            &generate(Path::new("some/path/foo.json"), EndiannessValue::BigEndian).to_string(),
        );
        assert_contains(&code, "@generated rust packets from foo.json.");
        assert_contains(&code, "const ENDIANNESS: Endianness = Endianness::Big;");
        assert_contains(&code, "fn from_end(buf: &[u8], bits: usize) -> Result<usize>");
    }
}
