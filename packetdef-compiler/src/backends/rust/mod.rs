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

//! Rust compiler backend.
//!
//! Generates for each enum a Rust enum, and for each packet a view and
//! a builder type on top of `packetdef-runtime`.

use heck::ToUpperCamelCase;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use std::path::Path;

use crate::builder::ConstraintValue;
use crate::schema::{EnumSchema, Schema};

mod builder;
mod preamble;
mod types;
mod view;

pub trait ToIdent {
    /// Generate a sanitized rust identifier.
    /// Rust specific keywords are renamed for validity.
    fn to_ident(self) -> proc_macro2::Ident;
}

impl ToIdent for &'_ str {
    fn to_ident(self) -> proc_macro2::Ident {
        match self {
            "as" | "break" | "const" | "continue" | "crate" | "else" | "enum" | "extern"
            | "false" | "fn" | "for" | "if" | "impl" | "in" | "let" | "loop" | "match" | "mod"
            | "move" | "mut" | "pub" | "ref" | "return" | "static" | "struct" | "trait"
            | "true" | "type" | "unsafe" | "use" | "where" | "while" | "async" | "await"
            | "dyn" | "abstract" | "become" | "box" | "do" | "final" | "macro" | "override"
            | "priv" | "typeof" | "unsized" | "virtual" | "yield" | "try" => {
                format_ident!("r#{}", self)
            }
            // Cannot be raw identifiers.
            "self" | "Self" | "super" => format_ident!("{}_", self),
            _ => format_ident!("{}", self),
        }
    }
}

impl ToIdent for &'_ String {
    fn to_ident(self) -> proc_macro2::Ident {
        self.as_str().to_ident()
    }
}

/// Generate a bit-mask which masks out `n` least significant bits.
///
/// Literal integers in Rust default to the `i32` type. For this
/// reason, if `n` is larger than 31, a suffix is added to the
/// `LitInt` returned. This should either be `u64` or `usize`
/// depending on where the result is used.
pub fn mask_bits(n: usize, suffix: &str) -> syn::LitInt {
    let suffix = if n > 31 { format!("_{suffix}") } else { String::new() };
    // Format the hex digits as 0x1111_2222_3333_usize.
    let hex = format!("{:x}", packetdef_runtime::max_value(n));
    let digits: Vec<String> = hex
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(4)
        .rev()
        .map(|chunk| chunk.iter().rev().collect())
        .collect();
    syn::LitInt::new(&format!("0x{}{suffix}", digits.join("_")), proc_macro2::Span::call_site())
}

fn view_ident(id: &str) -> proc_macro2::Ident {
    format_ident!("{}View", id)
}

fn builder_ident(id: &str) -> proc_macro2::Ident {
    format_ident!("{}Builder", id)
}

/// Name of the view accessor of a field.
fn accessor_ident(field_id: &str) -> proc_macro2::Ident {
    format_ident!("get_{}", field_id)
}

fn tag_ident(tag_id: &str) -> proc_macro2::Ident {
    format_ident!("{}", tag_id.to_upper_camel_case())
}

/// Literal value of a constraint.
fn constraint_value(value: &ConstraintValue) -> TokenStream {
    match value {
        ConstraintValue::Scalar { value } => {
            let value = proc_macro2::Literal::u64_unsuffixed(*value);
            quote!(#value)
        }
        ConstraintValue::Tag { enum_id, tag_id, .. } => {
            let enum_id = enum_id.to_ident();
            let tag_id = tag_ident(tag_id);
            quote!(#enum_id::#tag_id)
        }
    }
}

/// Generate the declaration of an enum with its conversions to and
/// from the backing integer.
fn generate_enum_decl(id: &str, schema: &EnumSchema) -> TokenStream {
    let name = id.to_ident();
    let tag_ids: Vec<_> = schema.tags.iter().map(|tag| tag_ident(&tag.id)).collect();
    let tag_values: Vec<_> = schema
        .tags
        .iter()
        .map(|tag| syn::LitInt::new(&format!("{:#x}", tag.value), proc_macro2::Span::call_site()))
        .collect();
    let doc = format!(" Tags of the {}-bit enum `{}`.", schema.width, id);
    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
        pub enum #name {
            #(#tag_ids,)*
        }

        impl TryFrom<u64> for #name {
            type Error = u64;
            fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
                match value {
                    #(#tag_values => Ok(#name::#tag_ids),)*
                    _ => Err(value),
                }
            }
        }

        impl From<#name> for u64 {
            fn from(value: #name) -> Self {
                match value {
                    #(#name::#tag_ids => #tag_values,)*
                }
            }
        }
    }
}

/// Generate Rust code from a compiled schema.
///
/// `custom_fields` lists the paths imported for custom field and
/// checksum types.
pub fn generate_tokens(
    schema: &Schema,
    path: &Path,
    custom_fields: &[String],
) -> Result<TokenStream, String> {
    let preamble = preamble::generate(path, schema.endianness);
    let custom_fields = custom_fields
        .iter()
        .map(|custom_field| {
            syn::parse_str::<syn::Path>(custom_field)
                .map_err(|err| format!("invalid path '{custom_field}': {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let enums = schema.enums.iter().map(|(id, decl)| generate_enum_decl(id, decl));
    let packets = schema.packets.iter().map(|packet| {
        let view = view::generate(schema, packet);
        let builder = builder::generate(packet);
        quote! {
            #view
            #builder
        }
    });
    Ok(quote! {
        #preamble
        #(use #custom_fields;)*

        #(#enums)*
        #(#packets)*
    })
}

/// Generate formatted Rust code from a compiled schema.
pub fn generate(schema: &Schema, path: &Path, custom_fields: &[String]) -> Result<String, String> {
    let tokens = generate_tokens(schema, path, custom_fields)?;
    let syntax_tree = syn::parse2(tokens).map_err(|err| format!("could not parse code: {err}"))?;
    Ok(prettyplease::unparse(&syntax_tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::parser::parse_inline;
    use crate::schema;
    use crate::test_utils::assert_contains;
    use paste::paste;

    fn generate_code(text: &str) -> String {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(&mut db, "stdin", text.to_owned()).expect("parsing failure");
        let schema = schema::compile(&file).expect("compilation failure");
        generate(&schema, Path::new("test.json"), &["crate::custom::Tlv".to_owned()]).unwrap()
    }

    /// Create a unit test for the given declarations, with the
    /// selected endianness. The generated code must parse, and contain
    /// each listed item.
    macro_rules! make_rust_test {
        ($name:ident, $declarations:expr, [$($item:expr),* $(,)?], $endianness:ident) => {
            paste! {
                #[test]
                fn [< test_ $name _ $endianness >]() {
                    let text = format!(
                        r#"{{ "endianness": "{}", "declarations": [{}] }}"#,
                        stringify!($endianness),
                        $declarations
                    );
                    let code = generate_code(&text);
                    $(assert_contains(&code, $item);)*
                }
            }
        };
    }

    macro_rules! test_rust {
        ($name:ident, $declarations:expr, [$($item:expr),* $(,)?]) => {
            make_rust_test!($name, $declarations, [$($item),*], little_endian);
            make_rust_test!($name, $declarations, [$($item),*], big_endian);
        };
    }

    #[test]
    fn test_mask_bits() {
        assert_eq!(format!("{}", mask_bits(1, "u64")), "0x1");
        assert_eq!(format!("{}", mask_bits(12, "u64")), "0xfff");
        assert_eq!(format!("{}", mask_bits(17, "u64")), "0x1_ffff");
        assert_eq!(format!("{}", mask_bits(32, "usize")), "0xffff_ffff_usize");
        assert_eq!(format!("{}", mask_bits(64, "u64")), "0xffff_ffff_ffff_ffff_u64");
    }

    #[test]
    fn test_to_ident() {
        assert_eq!("type".to_ident().to_string(), "r#type");
        assert_eq!("self".to_ident().to_string(), "self_");
        assert_eq!("length".to_ident().to_string(), "length");
    }

    #[test]
    fn test_invalid_custom_field_path() {
        let schema = Schema {
            endianness: ast::EndiannessValue::LittleEndian,
            enums: Default::default(),
            custom_fields: Default::default(),
            checksums: Default::default(),
            packets: vec![],
        };
        assert!(generate(&schema, Path::new("a.json"), &["not a path".to_owned()]).is_err());
    }

    test_rust!(
        enum_declaration,
        r#"{ "kind": "enum_declaration", "id": "Opcode", "width": 8, "tags": [
            { "id": "READ_REQUEST", "value": 1 }, { "id": "write", "value": 16 }
        ]}"#,
        [
            "pub enum Opcode {",
            "ReadRequest,",
            "0x10 => Ok(Opcode::Write),",
            "impl From<Opcode> for u64",
        ]
    );

    test_rust!(
        scalar_fields,
        r#"{ "kind": "packet_declaration", "id": "Header", "fields": [
            { "kind": "scalar_field", "id": "version", "width": 4 },
            { "kind": "fixed_scalar_field", "width": 4, "value": 7 },
            { "kind": "scalar_field", "id": "length", "width": 16 },
            { "kind": "reserved_field", "width": 8 }
        ]}"#,
        [
            "pub struct HeaderView {",
            "pub fn get_version(&self) -> Result<u8> {",
            "pub fn get_length(&self) -> Result<u16> {",
            "let mut cursor: usize = 32;",
            "if read_bits(buf, 4, 4, ENDIANNESS)? != 7 {",
            "pub struct HeaderBuilder {",
            "pub fn new(version: u8, length: u16)",
            "if u64::from(version) > 15 {",
            "impl Builder for HeaderBuilder {",
            "4 + body_len",
        ]
    );

    test_rust!(
        derived_packets,
        r#"{ "kind": "enum_declaration", "id": "Op", "width": 8, "tags": [
            { "id": "READ", "value": 1 }, { "id": "WRITE", "value": 2 }
          ]},
          { "kind": "packet_declaration", "id": "Command", "fields": [
            { "kind": "enum_field", "id": "op", "enum_id": "Op" },
            { "kind": "size_field", "field_id": "_body_", "width": 8 },
            { "kind": "body_field" }
          ]},
          { "kind": "packet_declaration", "id": "Write", "parent_id": "Command",
            "constraints": [{ "id": "op", "tag_id": "WRITE" }], "fields": [
            { "kind": "scalar_field", "id": "offset", "width": 16 },
            { "kind": "payload_field" }
          ]}"#,
        [
            "pub fn from_parent(parent: CommandView) -> Self {",
            "pub fn parent(&self) -> &CommandView {",
            "if self.get_op()? != Op::Write {",
            "self.parent.get_op()",
            "let parent = CommandBuilder::new(Op::Write)?;",
            "payload: impl Into<Bytes>",
            "impl Builder for WriteBuilder {",
            "self.parent.encode_with_body(&level, buf)",
            "pub fn payload(&self) -> Result<Bytes> {",
        ]
    );

    test_rust!(
        checksums_and_custom_fields,
        r#"{ "kind": "checksum_declaration", "id": "Crc8", "width": 8 },
          { "kind": "custom_field_declaration", "id": "Address", "width": 48 },
          { "kind": "custom_field_declaration", "id": "Tlv" },
          { "kind": "packet_declaration", "id": "Frame", "fields": [
            { "kind": "checksum_start_field", "field_id": "crc" },
            { "kind": "custom_field", "id": "source", "type_id": "Address" },
            { "kind": "custom_field", "id": "option", "type_id": "Tlv" },
            { "kind": "checksum_field", "id": "crc", "checksum_id": "Crc8" }
          ]}"#,
        [
            "use crate::custom::Tlv;",
            "packetdef_runtime::fold(&mut Crc8::default(), bytes)",
            "pub fn get_source(&self) -> Result<Address> {",
            "pub fn get_option(&self) -> Result<Tlv> {",
            "expected_size: 6,",
            "let checksum_start_crc = offset / 8;",
            "+ self.option.encode().len()",
        ]
    );
}
