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

//! Field offset resolution.
//!
//! The offset of a field is known from the start of the packet when
//! all preceding fields have a static size, and from the end of the
//! packet when all following fields have a static size. Fields of
//! derived packets are located inside the parent payload, so the
//! offset of the parent payload is added recursively.

use codespan_reporting::diagnostic::Diagnostic;
use serde::Serialize;

use crate::analyzer::{ErrorCode, Scope, Size};
use crate::ast::{Decl, Field, FileId};

/// Bit offset of a field, resolved at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Offset {
    /// Number of bits preceding the field.
    FromStart(usize),
    /// Number of bits following the field.
    FromEnd(usize),
    Unresolvable,
}

/// Runtime location of the first bit of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Bit offset from the start of the buffer.
    FromStart(usize),
    /// Number of bits from the field start to the end of the buffer.
    FromEnd(usize),
}

impl Position {
    /// Return the bit offset in a buffer of `len` octets, if the buffer
    /// is large enough.
    pub fn bit_offset(&self, len: usize) -> Option<usize> {
        match self {
            Position::FromStart(offset) => Some(*offset),
            Position::FromEnd(offset) => (len * 8).checked_sub(*offset),
        }
    }
}

/// Size of a dynamic field evaluated against the packet buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeExpr {
    /// Octet count stored in a size field, minus a modifier.
    SizeField { position: Position, width: usize, modifier: usize },
    /// Octet count computed by the custom field type `type_id` from
    /// the bytes starting at the octet `offset`.
    Custom { type_id: String, offset: usize },
}

/// Size of a packet segment composed of static and dynamic fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeSize {
    /// Static size in bits.
    pub constant: usize,
    /// Dynamic sizes, in octets.
    pub variable: Vec<SizeExpr>,
}

impl std::ops::AddAssign<&RuntimeSize> for RuntimeSize {
    fn add_assign(&mut self, other: &RuntimeSize) {
        self.constant += other.constant;
        self.variable.extend_from_slice(&other.variable)
    }
}

pub fn ambiguous_offset(decl: &Decl, field: &Field) -> Diagnostic<FileId> {
    Diagnostic::error()
        .with_code(ErrorCode::AmbiguousFieldOffset)
        .with_labels(vec![decl.loc().primary()])
        .with_message(format!(
            "the offset of {} field `{}` in `{}` cannot be resolved",
            field.kind(),
            field.label(),
            decl.id()
        ))
        .with_notes(vec![
            "hint: a field with dynamic size precedes and follows the field".to_owned()
        ])
}

/// Offset resolver.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a, 'd> {
    scope: &'a Scope<'d>,
}

impl<'a, 'd> Layout<'a, 'd> {
    pub fn new(scope: &'a Scope<'d>) -> Self {
        Layout { scope }
    }

    pub fn scope(&self) -> &'a Scope<'d> {
        self.scope
    }

    /// Sum of the static sizes of the selected fields.
    fn static_sum<'f>(
        &self,
        decl: &Decl,
        fields: impl Iterator<Item = &'f Field>,
    ) -> Option<usize> {
        fields.map(|field| self.scope.field_size(decl, field).static_()).sum()
    }

    /// Bits preceding the field at `index` in `decl`, if all preceding
    /// fields of the packet and its parents have a static size.
    pub fn offset_from_start(&self, decl: &Decl, index: usize) -> Option<usize> {
        let base = match self.scope.get_parent(decl) {
            None => 0,
            Some(parent) => self.offset_from_start(parent, parent.payload_index()?)?,
        };
        let offset = base + self.static_sum(decl, decl.fields().take(index))?;
        log::trace!("{}[{index}] offset from start: {offset}", decl.id());
        Some(offset)
    }

    /// Bits following the field at `index` in `decl`, if all following
    /// fields of the packet and its parents have a static size.
    pub fn offset_from_end(&self, decl: &Decl, index: usize) -> Option<usize> {
        let base = match self.scope.get_parent(decl) {
            None => 0,
            Some(parent) => self.offset_from_end(parent, parent.payload_index()?)?,
        };
        let offset = base + self.static_sum(decl, decl.fields().skip(index + 1))?;
        log::trace!("{}[{index}] offset from end: {offset}", decl.id());
        Some(offset)
    }

    /// Resolve the offset of a field, preferring the offset from the
    /// start of the packet.
    pub fn resolve(&self, decl: &Decl, index: usize) -> Offset {
        if let Some(offset) = self.offset_from_start(decl, index) {
            Offset::FromStart(offset)
        } else if let Some(offset) = self.offset_from_end(decl, index) {
            Offset::FromEnd(offset)
        } else {
            Offset::Unresolvable
        }
    }

    /// Return the runtime position of a field with a static size.
    pub fn position(&self, decl: &Decl, index: usize) -> Result<Position, Diagnostic<FileId>> {
        let field = &decl_fields(decl)[index];
        match (self.resolve(decl, index), self.scope.field_size(decl, field)) {
            (Offset::FromStart(offset), _) => Ok(Position::FromStart(offset)),
            (Offset::FromEnd(offset), Size::Static(width)) => Ok(Position::FromEnd(offset + width)),
            _ => Err(ambiguous_offset(decl, field)),
        }
    }

    /// Return the octet offset of a dynamic custom field.
    /// Dynamic custom fields are sized by inspecting the buffer from
    /// their first octet, which must then be known from the start.
    pub fn custom_offset(&self, decl: &Decl, index: usize) -> Result<usize, Diagnostic<FileId>> {
        let field = &decl_fields(decl)[index];
        match self.offset_from_start(decl, index) {
            None => Err(ambiguous_offset(decl, field)),
            Some(offset) if offset % 8 != 0 => Err(Diagnostic::error()
                .with_code(ErrorCode::MisalignedCustomField)
                .with_labels(vec![decl.loc().primary()])
                .with_message(format!(
                    "custom field `{}` in `{}` is not aligned to an octet boundary",
                    field.label(),
                    decl.id()
                ))
                .with_notes(vec![format!("the field starts at bit offset {offset}")])),
            Some(offset) => Ok(offset / 8),
        }
    }

    /// Return the runtime size expression of a dynamic field, or `None`
    /// if the field size is static or unknown.
    pub fn size_expr(
        &self,
        decl: &Decl,
        index: usize,
    ) -> Result<Option<SizeExpr>, Diagnostic<FileId>> {
        let field = &decl_fields(decl)[index];
        match field {
            Field::Payload { .. } | Field::Body => {
                let Some(size_index) = decl.fields().position(|f| {
                    matches!(
                        f,
                        Field::Size { field_id, .. } if Some(field_id.as_str()) == field.id()
                    )
                }) else {
                    return Ok(None);
                };
                let Field::Size { width, .. } = &decl_fields(decl)[size_index] else {
                    return Ok(None);
                };
                let modifier = match field {
                    Field::Payload { size_modifier } => size_modifier.unwrap_or(0),
                    _ => 0,
                };
                Ok(Some(SizeExpr::SizeField {
                    position: self.position(decl, size_index)?,
                    width: *width,
                    modifier,
                }))
            }
            Field::Custom { type_id, .. }
                if self.scope.field_size(decl, field) == Size::Dynamic =>
            {
                Ok(Some(SizeExpr::Custom {
                    type_id: type_id.clone(),
                    offset: self.custom_offset(decl, index)?,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Return the size of the fields of `decl`, excluding the payload
    /// or body.
    pub fn decl_size(&self, decl: &Decl) -> Result<RuntimeSize, Diagnostic<FileId>> {
        let mut size = RuntimeSize::default();
        for (index, field) in decl.fields().enumerate() {
            match self.scope.field_size(decl, field) {
                Size::Static(width) => size.constant += width,
                _ if matches!(field, Field::Payload { .. } | Field::Body) => (),
                _ => size.variable.extend(self.size_expr(decl, index)?),
            }
        }
        Ok(size)
    }

    /// Return the size of the fields inherited by `decl`, excluding
    /// the parent payloads.
    pub fn parent_size(&self, decl: &Decl) -> Result<RuntimeSize, Diagnostic<FileId>> {
        let mut size = RuntimeSize::default();
        for parent in self.scope.iter_parents(decl) {
            size += &self.decl_size(parent)?;
        }
        Ok(size)
    }
}

fn decl_fields(decl: &Decl) -> &[Field] {
    match decl {
        Decl::Packet { fields, .. } => fields,
        _ => &[],
    }
}
