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

//! Generation of packet views.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::{accessor_ident, constraint_value, mask_bits, types, view_ident, ToIdent};
use crate::layout::{Position, RuntimeSize, SizeExpr};
use crate::schema::{PacketSchema, Schema};
use crate::validity::{FieldCheck, Step};
use crate::view::{Accessor, AccessorKind, CustomSize, Span};

/// Bit offset of a position in `buf`.
fn position(position: &Position) -> TokenStream {
    match position {
        Position::FromStart(offset) => {
            let offset = proc_macro2::Literal::usize_unsuffixed(*offset);
            quote!(#offset)
        }
        Position::FromEnd(offset) => {
            let offset = proc_macro2::Literal::usize_unsuffixed(*offset);
            quote!(from_end(buf, #offset)?)
        }
    }
}

/// Octet size of a dynamic field, read from `buf`.
fn size_expr(size: &SizeExpr) -> TokenStream {
    match size {
        SizeExpr::SizeField { position: field_position, width, modifier } => {
            let field_position = position(field_position);
            let width = proc_macro2::Literal::usize_unsuffixed(*width);
            let modifier = proc_macro2::Literal::usize_unsuffixed(*modifier);
            quote! {
                (read_bits(buf, #field_position, #width, ENDIANNESS)? as usize)
                    .checked_sub(#modifier)
                    .ok_or(DecodeError::InvalidPacket)?
            }
        }
        SizeExpr::Custom { type_id, offset } => {
            let ty = type_id.to_ident();
            let offset = proc_macro2::Literal::usize_unsuffixed(*offset);
            quote! {
                #ty::size(buf.get(#offset..).ok_or(DecodeError::InvalidPacket)?)
                    .ok_or(DecodeError::InvalidPacket)?
            }
        }
    }
}

/// Bits used by the inherited fields and the fixed size fields.
fn initial_cursor(parent_size: &RuntimeSize, static_size: usize) -> TokenStream {
    let constant = proc_macro2::Literal::usize_unsuffixed(parent_size.constant + static_size);
    let sizes = parent_size.variable.iter().map(size_expr);
    quote! {
        let mut cursor: usize = #constant;
        #(
            cursor = #sizes
                .checked_mul(8)
                .and_then(|size| cursor.checked_add(size))
                .ok_or(DecodeError::InvalidPacket)?;
        )*
    }
}

fn step(step: &Step) -> TokenStream {
    match step {
        Step::Size { size, .. } => {
            let size = size_expr(size);
            quote! {
                cursor = #size
                    .checked_mul(8)
                    .and_then(|size| cursor.checked_add(size))
                    .ok_or(DecodeError::InvalidPacket)?;
                if cursor > bits {
                    return Ok(false);
                }
            }
        }
        Step::Checksum { checksum_id, start, end, width, .. } => {
            let ty = checksum_id.to_ident();
            let start = position(start);
            let end = position(end);
            let width_lit = proc_macro2::Literal::usize_unsuffixed(*width);
            let mask = mask_bits(*width, "u64");
            quote! {
                {
                    let start: usize = #start / 8;
                    let end: usize = #end;
                    let bytes = buf.get(start..end / 8).ok_or(DecodeError::InvalidPacket)?;
                    let computed = packetdef_runtime::fold(&mut #ty::default(), bytes) & #mask;
                    if read_bits(buf, end, #width_lit, ENDIANNESS)? != computed {
                        return Ok(false);
                    }
                }
            }
        }
    }
}

fn field_check(check: &FieldCheck) -> TokenStream {
    match check {
        FieldCheck::Enum { field_id, .. } => {
            let accessor = accessor_ident(field_id);
            quote! {
                if self.#accessor().is_err() {
                    return Ok(false);
                }
            }
        }
        FieldCheck::Fixed { position: field_position, width, value } => {
            let field_position = position(field_position);
            let width = proc_macro2::Literal::usize_unsuffixed(*width);
            let value = proc_macro2::Literal::u64_unsuffixed(*value);
            quote! {
                if read_bits(buf, #field_position, #width, ENDIANNESS)? != #value {
                    return Ok(false);
                }
            }
        }
        FieldCheck::Custom { field_id, .. } => {
            let accessor = accessor_ident(field_id);
            quote! {
                match self.#accessor() {
                    Ok(value) if value.is_valid() => (),
                    _ => return Ok(false),
                }
            }
        }
    }
}

/// Body of an accessor on a view known valid.
fn read_accessor(packet: &PacketSchema, accessor: &Accessor) -> TokenStream {
    let packet_id = &packet.id;
    let field_id = &accessor.field_id;
    match &accessor.kind {
        AccessorKind::Scalar { position: field_position, width }
        | AccessorKind::Checksum { position: field_position, width, .. } => {
            let field_position = position(field_position);
            let ty = types::Integer::new(*width);
            let width = proc_macro2::Literal::usize_unsuffixed(*width);
            quote!(Ok(read_bits(buf, #field_position, #width, ENDIANNESS)? as #ty))
        }
        AccessorKind::Enum { position: field_position, width, enum_id } => {
            let field_position = position(field_position);
            let ty = enum_id.to_ident();
            let width = proc_macro2::Literal::usize_unsuffixed(*width);
            quote! {
                let value = read_bits(buf, #field_position, #width, ENDIANNESS)?;
                #ty::try_from(value).map_err(|value| DecodeError::InvalidEnumValue {
                    packet: #packet_id,
                    field: #field_id,
                    value,
                    type_: #enum_id,
                })
            }
        }
        AccessorKind::Custom { position: field_position, type_id, size } => {
            let field_position = position(field_position);
            let ty = type_id.to_ident();
            let size = match size {
                CustomSize::Static { size } => {
                    let size = proc_macro2::Literal::usize_unsuffixed(*size);
                    quote!(#size)
                }
                CustomSize::Dynamic { .. } => quote! {
                    #ty::size(buf.get(start..).ok_or(DecodeError::InvalidPacket)?)
                        .ok_or(DecodeError::InvalidPacket)?
                },
            };
            quote! {
                let start: usize = #field_position / 8;
                let end = start.checked_add(#size).ok_or(DecodeError::InvalidPacket)?;
                let bytes = buf.get(start..end).ok_or(DecodeError::InvalidPacket)?;
                #ty::decode(bytes).ok_or(DecodeError::InvalidCustomValue {
                    packet: #packet_id,
                    field: #field_id,
                })
            }
        }
        AccessorKind::Payload { span } => {
            let bounds = match span {
                Span::Sized { start, size } => {
                    let start = proc_macro2::Literal::usize_unsuffixed(*start);
                    let size = size_expr(size);
                    quote! {
                        let start: usize = #start;
                        let end = start.checked_add(#size).ok_or(DecodeError::InvalidPacket)?;
                    }
                }
                Span::Bounded { start, end } => {
                    let start = proc_macro2::Literal::usize_unsuffixed(*start);
                    let end = proc_macro2::Literal::usize_unsuffixed(*end);
                    quote! {
                        let start: usize = #start;
                        let end = buf.len().checked_sub(#end).ok_or(DecodeError::InvalidPacket)?;
                    }
                }
                Span::Trailing { end, size } => {
                    let end = proc_macro2::Literal::usize_unsuffixed(*end);
                    let size = size_expr(size);
                    quote! {
                        let end = buf.len().checked_sub(#end).ok_or(DecodeError::InvalidPacket)?;
                        let start = end.checked_sub(#size).ok_or(DecodeError::InvalidPacket)?;
                    }
                }
            };
            quote! {
                #bounds
                slice(&self.buf, start, end)
            }
        }
    }
}

/// Generate the view of a packet.
pub fn generate(schema: &Schema, packet: &PacketSchema) -> TokenStream {
    let name = view_ident(&packet.id);
    let plan = &packet.view;
    let procedure = &plan.validity;
    let parent_name = packet.parent_id.as_deref().map(view_ident);

    let (parent_field, constructors, parent_check) = match &parent_name {
        None => (
            quote!(),
            quote! {
                pub fn new(buf: impl Into<Bytes>) -> Self {
                    #name { buf: buf.into(), validity: ValidityCache::new() }
                }
            },
            quote!(),
        ),
        Some(parent_name) => (
            quote!(parent: #parent_name,),
            quote! {
                pub fn new(buf: impl Into<Bytes>) -> Self {
                    Self::from_parent(#parent_name::new(buf))
                }

                /// Return a view of the derived packet over the buffer of
                /// the parent view.
                pub fn from_parent(parent: #parent_name) -> Self {
                    #name { buf: parent.bytes().clone(), validity: ValidityCache::new(), parent }
                }

                pub fn parent(&self) -> &#parent_name {
                    &self.parent
                }
            },
            quote! {
                if !self.parent.is_valid() {
                    return Ok(false);
                }
            },
        ),
    };

    let cursor = initial_cursor(&procedure.parent_size, procedure.static_size);
    let steps = procedure.steps.iter().map(step);
    let constraints = procedure.constraints.iter().map(|constraint| {
        let accessor = accessor_ident(&constraint.field_id);
        let value = constraint_value(&constraint.value);
        quote! {
            if self.#accessor()? != #value {
                return Ok(false);
            }
        }
    });
    let field_checks = procedure.field_checks.iter().map(field_check);

    let accessors = plan.accessors.iter().map(|accessor| {
        let ident = match accessor.kind {
            AccessorKind::Payload { .. } => format_ident!("payload"),
            _ => accessor_ident(&accessor.field_id),
        };
        let ty = types::accessor_type(&accessor.kind);
        let body = read_accessor(packet, accessor);
        quote! {
            pub fn #ident(&self) -> Result<#ty> {
                if !self.is_valid() {
                    return Err(DecodeError::InvalidPacket);
                }
                let buf = &self.buf[..];
                #body
            }
        }
    });

    // Fields of the parent packets are read through the parent view.
    let inherited = schema
        .iter_parents_and_self(&packet.id)
        .skip(1)
        .flat_map(|parent| &parent.view.accessors)
        .filter(|accessor| !matches!(accessor.kind, AccessorKind::Payload { .. }))
        .filter(|accessor| plan.accessor(&accessor.field_id).is_none())
        .map(|accessor| {
            let ident = accessor_ident(&accessor.field_id);
            let ty = types::accessor_type(&accessor.kind);
            quote! {
                pub fn #ident(&self) -> Result<#ty> {
                    if !self.is_valid() {
                        return Err(DecodeError::InvalidPacket);
                    }
                    self.parent.#ident()
                }
            }
        });

    let doc = format!(" View of a `{}` packet.", packet.id);
    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone)]
        pub struct #name {
            buf: Bytes,
            validity: ValidityCache,
            #parent_field
        }

        impl #name {
            #constructors

            pub fn bytes(&self) -> &Bytes {
                &self.buf
            }

            /// Check the packet. A valid result is remembered, an
            /// invalid one is computed again on the next call.
            pub fn is_valid(&self) -> bool {
                self.validity.check(|| self.check().unwrap_or(false))
            }

            #[allow(unused_variables, unused_mut)]
            fn check(&self) -> Result<bool> {
                #parent_check
                let buf = &self.buf[..];
                let bits = buf.len() * 8;
                #cursor
                if cursor > bits {
                    return Ok(false);
                }
                #(#steps)*
                #(#constraints)*
                #(#field_checks)*
                Ok(true)
            }

            #(#accessors)*

            #(#inherited)*
        }
    }
}
