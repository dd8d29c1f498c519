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

//! Generation of packet builders.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::{builder_ident, constraint_value, mask_bits, types, ToIdent};
use crate::builder::{Argument, BuilderPlan, Encoding, ParameterCheck};
use crate::schema::PacketSchema;

/// Check of a constructor parameter, returning an `EncodeError` on
/// failure.
fn parameter_check(plan: &BuilderPlan, check: &ParameterCheck) -> TokenStream {
    let packet_id = &plan.id;
    let field_id = check.id();
    let id = field_id.to_ident();
    match check {
        ParameterCheck::Range { maximum, .. } => {
            let maximum = proc_macro2::Literal::u64_unsuffixed(*maximum);
            quote! {
                if u64::from(#id) > #maximum {
                    return Err(EncodeError::InvalidScalarValue {
                        packet: #packet_id,
                        field: #field_id,
                        value: u64::from(#id),
                        maximum_value: #maximum,
                    });
                }
            }
        }
        // Enum parameters are typed, their values are always declared tags.
        ParameterCheck::Tag { .. } => quote!(),
        ParameterCheck::Custom { type_id, size, .. } => {
            let ty = type_id.to_ident();
            let size_check = match size {
                Some(size) => {
                    let size = proc_macro2::Literal::usize_unsuffixed(*size);
                    quote! {
                        if bytes.len() != #size {
                            return Err(EncodeError::InvalidCustomSize {
                                packet: #packet_id,
                                field: #field_id,
                                size: bytes.len(),
                                expected_size: #size,
                            });
                        }
                    }
                }
                None => quote! {
                    if #ty::size(&bytes) != Some(bytes.len()) {
                        return Err(EncodeError::InvalidCustomSize {
                            packet: #packet_id,
                            field: #field_id,
                            size: bytes.len(),
                            expected_size: #ty::size(&bytes).unwrap_or_default(),
                        });
                    }
                },
            };
            quote! {
                {
                    let bytes = #id.encode();
                    #size_check
                    if !#id.is_valid() {
                        return Err(EncodeError::InvalidCustomValue {
                            packet: #packet_id,
                            field: #field_id,
                        });
                    }
                }
            }
        }
    }
}

/// Serialization of the fields of the level into `buf`.
fn encode_fields(plan: &BuilderPlan) -> TokenStream {
    let packet_id = &plan.id;
    let mut fields = Vec::new();
    let mut checksums = Vec::new();
    for encoding in &plan.fields {
        fields.push(match encoding {
            Encoding::Value { id, width } => {
                let id = id.to_ident();
                let width = proc_macro2::Literal::usize_unsuffixed(*width);
                quote! {
                    write_bits(&mut buf, offset, #width, u64::from(self.#id), ENDIANNESS)?;
                    offset += #width;
                }
            }
            Encoding::Custom { id, .. } => {
                let id = id.to_ident();
                quote! {
                    let bytes = self.#id.encode();
                    let start = offset / 8;
                    let len = buf.len();
                    buf.get_mut(start..start + bytes.len())
                        .ok_or(EncodeError::BufferTooSmall { offset, width: bytes.len() * 8, len })?
                        .copy_from_slice(&bytes);
                    offset += bytes.len() * 8;
                }
            }
            Encoding::Constant { width, value } => {
                let width = proc_macro2::Literal::usize_unsuffixed(*width);
                let value = proc_macro2::Literal::u64_unsuffixed(*value);
                quote! {
                    write_bits(&mut buf, offset, #width, #value, ENDIANNESS)?;
                    offset += #width;
                }
            }
            Encoding::Reserved { width } => {
                let width = proc_macro2::Literal::usize_unsuffixed(*width);
                quote!(offset += #width;)
            }
            Encoding::Size { field_id, width, modifier } => {
                let maximum_size = mask_bits(*width, "usize");
                let width = proc_macro2::Literal::usize_unsuffixed(*width);
                let modifier = proc_macro2::Literal::usize_unsuffixed(*modifier);
                quote! {
                    let size = body.len() + #modifier;
                    if size > #maximum_size {
                        return Err(EncodeError::SizeOverflow {
                            packet: #packet_id,
                            field: #field_id,
                            size,
                            maximum_size: #maximum_size,
                        });
                    }
                    write_bits(&mut buf, offset, #width, size as u64, ENDIANNESS)?;
                    offset += #width;
                }
            }
            Encoding::Payload => quote! {
                let start = offset / 8;
                let len = buf.len();
                buf.get_mut(start..start + body.len())
                    .ok_or(EncodeError::BufferTooSmall { offset, width: body.len() * 8, len })?
                    .copy_from_slice(body);
                offset += body.len() * 8;
            },
            Encoding::ChecksumStart { field_id } => {
                let start = format_ident!("checksum_start_{}", field_id);
                quote!(let #start = offset / 8;)
            }
            Encoding::Checksum { id, checksum_id, width } => {
                checksums.push((id, checksum_id, *width));
                let checksum_offset = format_ident!("checksum_offset_{}", id);
                let width = proc_macro2::Literal::usize_unsuffixed(*width);
                quote! {
                    let #checksum_offset = offset;
                    offset += #width;
                }
            }
        });
    }

    // Checksums cover the bytes written above.
    let checksums = checksums.into_iter().map(|(id, checksum_id, width)| {
        let has_start = plan.fields.iter().any(|encoding| {
            matches!(encoding, Encoding::ChecksumStart { field_id } if field_id == id)
        });
        let start = if has_start {
            let start = format_ident!("checksum_start_{}", id);
            quote!(#start)
        } else {
            quote!(0)
        };
        let checksum_offset = format_ident!("checksum_offset_{}", id);
        let ty = checksum_id.to_ident();
        let mask = mask_bits(width, "u64");
        let width = proc_macro2::Literal::usize_unsuffixed(width);
        quote! {
            let bytes = buf.get(#start..#checksum_offset / 8).unwrap_or_default();
            let value = packetdef_runtime::fold(&mut #ty::default(), bytes) & #mask;
            write_bits(&mut buf, #checksum_offset, #width, value, ENDIANNESS)?;
        }
    });

    quote! {
        #(#fields)*
        #(#checksums)*
    }
}

/// Generate the builder of a packet.
pub fn generate(packet: &PacketSchema) -> TokenStream {
    let plan = &packet.builder;
    let constructor = &plan.constructor;
    let name = builder_ident(&plan.id);
    let parent_name = plan.parent_id.as_deref().map(builder_ident);

    let parameter_ids: Vec<_> =
        constructor.parameters.iter().map(|parameter| parameter.id.to_ident()).collect();
    let parameter_types: Vec<_> = constructor
        .parameters
        .iter()
        .map(|parameter| types::parameter_type(&parameter.kind))
        .collect();
    let member_ids: Vec<_> =
        constructor.members.iter().map(|parameter| parameter.id.to_ident()).collect();
    let member_types: Vec<_> = constructor
        .members
        .iter()
        .map(|parameter| types::parameter_type(&parameter.kind))
        .collect();
    let checks = constructor.checks.iter().map(|check| parameter_check(plan, check));

    let (parent_field, parent_init, delegation) = match (&parent_name, &constructor.delegation) {
        (Some(parent_name), Some(delegation)) => {
            let arguments = delegation.arguments.iter().map(|argument| match argument {
                Argument::Forward { id } => {
                    let id = id.to_ident();
                    quote!(#id)
                }
                Argument::Constant { value, .. } => constraint_value(value),
            });
            (
                quote!(parent: #parent_name,),
                quote!(parent,),
                quote!(let parent = #parent_name::new(#(#arguments),*)?;),
            )
        }
        _ => (quote!(), quote!(), quote!()),
    };
    let (payload_field, payload_init) = if plan.has_payload {
        (quote!(payload: Bytes,), quote!(payload: Bytes::new(),))
    } else {
        (quote!(), quote!())
    };

    let static_octets = proc_macro2::Literal::usize_unsuffixed(plan.static_width() / 8);
    let dynamic_lengths = plan.fields.iter().filter_map(|encoding| match encoding {
        Encoding::Custom { id, width: None, .. } => {
            let id = id.to_ident();
            Some(quote!(+ self.#id.encode().len()))
        }
        _ => None,
    });
    let encoded_len_with_body = match &parent_name {
        Some(_) => quote!(self.parent.encoded_len_with_body(self.level_len(body_len))),
        None => quote!(self.level_len(body_len)),
    };
    let encode_with_body = match &parent_name {
        Some(_) => quote!(self.parent.encode_with_body(&level, buf)),
        None => quote! {
            buf.put_slice(&level);
            Ok(())
        },
    };
    let encode_fields = encode_fields(plan);

    let factory = plan.factory.as_ref().map(|_| {
        let doc = format!(" Create a `{}` builder.", plan.id);
        let (payload_parameter, payload_assign, payload_len, payload) = if plan.has_payload {
            (
                quote!(payload: impl Into<Bytes>),
                quote!(builder.payload = payload.into();),
                quote!(self.payload.len()),
                quote!(&self.payload),
            )
        } else {
            (quote!(), quote!(), quote!(0), quote!(&[]))
        };
        quote! {
            impl #name {
                #[doc = #doc]
                #[allow(unused_mut)]
                pub fn create(
                    #(#parameter_ids: #parameter_types,)*
                    #payload_parameter
                ) -> std::result::Result<Self, EncodeError> {
                    let mut builder = Self::new(#(#parameter_ids),*)?;
                    #payload_assign
                    Ok(builder)
                }
            }

            impl Builder for #name {
                fn encoded_len(&self) -> usize {
                    self.encoded_len_with_body(#payload_len)
                }

                fn encode(&self, buf: &mut impl BufMut) -> std::result::Result<(), EncodeError> {
                    self.encode_with_body(#payload, buf)
                }
            }
        }
    });

    let doc = format!(" Builder of a `{}` packet.", plan.id);
    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone)]
        pub struct #name {
            #(#member_ids: #member_types,)*
            #parent_field
            #payload_field
        }

        impl #name {
            /// Create a builder from the full list of parameters, parent
            /// parameters first.
            pub fn new(
                #(#parameter_ids: #parameter_types),*
            ) -> std::result::Result<Self, EncodeError> {
                #(#checks)*
                #delegation
                Ok(#name {
                    #(#member_ids,)*
                    #parent_init
                    #payload_init
                })
            }

            fn level_len(&self, body_len: usize) -> usize {
                #static_octets + body_len #(#dynamic_lengths)*
            }

            fn encoded_len_with_body(&self, body_len: usize) -> usize {
                #encoded_len_with_body
            }

            #[allow(unused_mut, unused_assignments, unused_variables)]
            fn encode_level(&self, body: &[u8]) -> std::result::Result<Vec<u8>, EncodeError> {
                let mut buf = vec![0; self.level_len(body.len())];
                let mut offset: usize = 0;
                #encode_fields
                Ok(buf)
            }

            fn encode_with_body(
                &self,
                body: &[u8],
                buf: &mut impl BufMut,
            ) -> std::result::Result<(), EncodeError> {
                let level = self.encode_level(body)?;
                #encode_with_body
            }
        }

        #factory
    }
}
