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

//! Rust types of generated fields.

use quote::{format_ident, quote};

use super::ToIdent;
use crate::builder::ParameterKind;
use crate::view::AccessorKind;

/// Smallest unsigned integer holding a field of `width` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Integer {
    pub width: usize,
}

impl Integer {
    pub fn new(width: usize) -> Integer {
        let width = [8, 16, 32, 64].into_iter().find(|&bits| bits >= width).unwrap_or(64);
        Integer { width }
    }
}

impl quote::ToTokens for Integer {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let ident = format_ident!("u{}", self.width);
        tokens.extend(quote!(#ident));
    }
}

/// Type of a builder parameter.
pub fn parameter_type(kind: &ParameterKind) -> proc_macro2::TokenStream {
    match kind {
        ParameterKind::Scalar { width } => {
            let ty = Integer::new(*width);
            quote!(#ty)
        }
        ParameterKind::Enum { enum_id, .. } => {
            let ty = enum_id.to_ident();
            quote!(#ty)
        }
        ParameterKind::Custom { type_id, .. } => {
            let ty = type_id.to_ident();
            quote!(#ty)
        }
    }
}

/// Type returned by a view accessor.
pub fn accessor_type(kind: &AccessorKind) -> proc_macro2::TokenStream {
    match kind {
        AccessorKind::Scalar { width, .. } | AccessorKind::Checksum { width, .. } => {
            let ty = Integer::new(*width);
            quote!(#ty)
        }
        AccessorKind::Enum { enum_id, .. } => {
            let ty = enum_id.to_ident();
            quote!(#ty)
        }
        AccessorKind::Custom { type_id, .. } => {
            let ty = type_id.to_ident();
            quote!(#ty)
        }
        AccessorKind::Payload { .. } => quote!(Bytes),
    }
}
