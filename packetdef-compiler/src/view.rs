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

//! View compiler.
//!
//! Views read fields directly from the packet buffer. Each named field
//! of a packet gets an accessor with a position resolved from the
//! start or the end of the buffer.

use codespan_reporting::diagnostic::Diagnostic;
use serde::Serialize;

use crate::analyzer::{Diagnostics, Size};
use crate::ast::{Decl, Field, FileId};
use crate::layout::{ambiguous_offset, Layout, Position, SizeExpr};
use crate::validity::{self, Procedure};

/// Octet range of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Span {
    /// `start` octets from the start of the buffer, with a runtime size.
    Sized { start: usize, size: SizeExpr },
    /// Between `start` octets from the start and `end` octets from the
    /// end of the buffer.
    Bounded { start: usize, end: usize },
    /// Ending `end` octets before the end of the buffer, with a runtime
    /// size.
    Trailing { end: usize, size: SizeExpr },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomSize {
    /// Fixed size in octets.
    Static { size: usize },
    /// Size computed by the custom type from the buffer.
    Dynamic { type_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessorKind {
    Scalar { position: Position, width: usize },
    Enum { position: Position, width: usize, enum_id: String },
    Checksum { position: Position, width: usize, checksum_id: String },
    Custom { position: Position, type_id: String, size: CustomSize },
    Payload { span: Span },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accessor {
    pub field_id: String,
    #[serde(flatten)]
    pub kind: AccessorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewPlan {
    pub id: String,
    pub parent_id: Option<String>,
    pub accessors: Vec<Accessor>,
    pub validity: Procedure,
}

impl ViewPlan {
    /// Return the accessor of an own field.
    pub fn accessor(&self, field_id: &str) -> Option<&Accessor> {
        self.accessors.iter().find(|accessor| accessor.field_id == field_id)
    }
}

fn payload_span(layout: &Layout, decl: &Decl, index: usize) -> Result<Span, Diagnostic<FileId>> {
    let start = layout.offset_from_start(decl, index).map(|offset| offset / 8);
    let end = layout.offset_from_end(decl, index).map(|offset| offset / 8);
    let size = layout.size_expr(decl, index)?;
    match (start, end, size) {
        (Some(start), _, Some(size)) => Ok(Span::Sized { start, size }),
        (Some(start), Some(end), None) => Ok(Span::Bounded { start, end }),
        (None, Some(end), Some(size)) => Ok(Span::Trailing { end, size }),
        _ => Err(ambiguous_offset(decl, &decl.fields().as_slice()[index])),
    }
}

fn accessor(
    layout: &Layout,
    decl: &Decl,
    index: usize,
    field: &Field,
) -> Result<Option<AccessorKind>, Diagnostic<FileId>> {
    let scope = layout.scope();
    let width = scope.field_width(decl, field).unwrap_or(0);
    Ok(Some(match field {
        Field::Scalar { .. } => {
            AccessorKind::Scalar { position: layout.position(decl, index)?, width }
        }
        Field::Enum { enum_id, .. } => AccessorKind::Enum {
            position: layout.position(decl, index)?,
            width,
            enum_id: enum_id.clone(),
        },
        Field::Checksum { checksum_id, .. } => AccessorKind::Checksum {
            position: layout.position(decl, index)?,
            width,
            checksum_id: checksum_id.clone(),
        },
        Field::Custom { type_id, .. } => match scope.field_size(decl, field) {
            Size::Static(width) => AccessorKind::Custom {
                position: layout.position(decl, index)?,
                type_id: type_id.clone(),
                size: CustomSize::Static { size: width / 8 },
            },
            _ => AccessorKind::Custom {
                position: Position::FromStart(layout.custom_offset(decl, index)? * 8),
                type_id: type_id.clone(),
                size: CustomSize::Dynamic { type_id: type_id.clone() },
            },
        },
        Field::Payload { .. } | Field::Body => {
            AccessorKind::Payload { span: payload_span(layout, decl, index)? }
        }
        _ => return Ok(None),
    }))
}

/// Compile the view of a packet declaration.
pub fn compile(layout: &Layout, decl: &Decl) -> Result<ViewPlan, Diagnostics> {
    let mut diagnostics = Diagnostics::default();
    let mut accessors = Vec::new();
    for (index, field) in decl.fields().enumerate() {
        match accessor(layout, decl, index, field) {
            Ok(Some(kind)) => accessors.push(Accessor {
                field_id: field.id().unwrap_or_default().to_owned(),
                kind,
            }),
            Ok(None) => (),
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
    }

    // Dynamic custom fields are located by both the accessor and the
    // validity procedure, report their errors once.
    match validity::compile(layout, decl) {
        Ok(validity) => diagnostics.err_or(ViewPlan {
            id: decl.id().to_owned(),
            parent_id: decl.parent_id().map(str::to_owned),
            accessors,
            validity,
        }),
        Err(errors) => {
            for diagnostic in errors.diagnostics {
                if !diagnostics.diagnostics.contains(&diagnostic) {
                    diagnostics.push(diagnostic)
                }
            }
            Err(diagnostics)
        }
    }
}
