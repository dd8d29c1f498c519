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

//! Validity compiler.
//!
//! The validity procedure of a packet view is run once the parent
//! view is known valid. The cursor starts after the inherited fields,
//! advances over the fields of the packet, and must stay inside the
//! buffer. Checksums, constraints, and field values are then verified.

use codespan_reporting::diagnostic::Diagnostic;
use serde::Serialize;

use crate::analyzer::{Diagnostics, ErrorCode, Size};
use crate::ast::{Decl, Field, FileId};
use crate::builder::{self, ConstraintValue};
use crate::layout::{Layout, Position, RuntimeSize, SizeExpr};

/// Runtime step of the validity procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Fold the octets from `start` up to `end` through the accumulator
    /// `checksum_id`, and compare with the value of `field_id`.
    Checksum {
        field_id: String,
        checksum_id: String,
        start: Position,
        end: Position,
        width: usize,
    },
    /// Advance the cursor over a dynamic field.
    Size { field_id: String, size: SizeExpr },
}

/// Value imposed on an inherited field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintCheck {
    pub field_id: String,
    pub value: ConstraintValue,
}

/// Semantic check of a field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldCheck {
    /// The value must match a declared tag.
    Enum { field_id: String, enum_id: String },
    /// Fixed fields must hold their fixed value.
    Fixed { position: Position, width: usize, value: u64 },
    /// The registered validator must accept the field bytes.
    Custom { field_id: String, type_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Procedure {
    /// Size of the inherited fields, payloads excluded.
    pub parent_size: RuntimeSize,
    /// Bits of the fixed size fields of the packet.
    pub static_size: usize,
    pub steps: Vec<Step>,
    pub constraints: Vec<ConstraintCheck>,
    pub field_checks: Vec<FieldCheck>,
}

fn checksum_step(
    layout: &Layout,
    decl: &Decl,
    marker: usize,
    field_id: &str,
) -> Result<Step, Diagnostic<FileId>> {
    let Some(index) = decl.field_index(field_id) else {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::UndeclaredChecksumField)
            .with_labels(vec![decl.loc().primary()])
            .with_message(format!(
                "undeclared checksum field `{}` in `{}`",
                field_id,
                decl.id()
            ))
            .with_notes(vec![
                "hint: the checksum field is declared after its start marker".to_owned()
            ]));
    };
    let field = decl.fields().nth(index);
    let Some(Field::Checksum { id, checksum_id }) = field else {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::InvalidChecksumField)
            .with_labels(vec![decl.loc().primary()])
            .with_message(format!(
                "invalid checksum field `{}` in `{}`",
                field_id,
                decl.id()
            ))
            .with_notes(vec![format!(
                "`{}` is declared as {} field, expected checksum",
                field_id,
                field.map(Field::kind).unwrap_or("unknown")
            )]));
    };
    if index < marker {
        return Err(Diagnostic::error()
            .with_code(ErrorCode::InvalidChecksumField)
            .with_labels(vec![decl.loc().primary()])
            .with_message(format!(
                "checksum field `{}` in `{}` is declared before its start marker",
                id,
                decl.id()
            )));
    }
    let unresolvable = |bound: &str| {
        Diagnostic::error()
            .with_code(ErrorCode::UnresolvableChecksumOffset)
            .with_labels(vec![decl.loc().primary()])
            .with_message(format!(
                "the {} of the range covered by checksum `{}` in `{}` cannot be resolved",
                bound,
                id,
                decl.id()
            ))
    };
    let scope = layout.scope();
    let Some(Size::Static(width)) = field.map(|field| scope.field_size(decl, field)) else {
        return Err(unresolvable("end"));
    };
    let start = layout.position(decl, marker).map_err(|_| unresolvable("start"))?;
    let end = layout.position(decl, index).map_err(|_| unresolvable("end"))?;
    Ok(Step::Checksum {
        field_id: id.clone(),
        checksum_id: checksum_id.clone(),
        start,
        end,
        width,
    })
}

fn field_check(
    layout: &Layout,
    decl: &Decl,
    index: usize,
    field: &Field,
) -> Result<Option<FieldCheck>, Diagnostic<FileId>> {
    let scope = layout.scope();
    Ok(match field {
        Field::Enum { id, enum_id } => {
            Some(FieldCheck::Enum { field_id: id.clone(), enum_id: enum_id.clone() })
        }
        Field::Custom { id, type_id } => {
            Some(FieldCheck::Custom { field_id: id.clone(), type_id: type_id.clone() })
        }
        Field::FixedScalar { width, value } => Some(FieldCheck::Fixed {
            position: layout.position(decl, index)?,
            width: *width,
            value: *value,
        }),
        Field::FixedEnum { enum_id, tag_id } => Some(FieldCheck::Fixed {
            position: layout.position(decl, index)?,
            width: scope.field_width(decl, field).unwrap_or(0),
            value: scope.tag_value(enum_id, tag_id).unwrap_or_default(),
        }),
        _ => None,
    })
}

/// Compile the validity procedure of a packet declaration.
pub fn compile(layout: &Layout, decl: &Decl) -> Result<Procedure, Diagnostics> {
    let scope = layout.scope();
    let mut diagnostics = Diagnostics::default();

    let parent_size = layout.parent_size(decl)?;
    let static_size =
        decl.fields().filter_map(|field| scope.field_size(decl, field).static_()).sum();

    let mut steps = Vec::new();
    let mut field_checks = Vec::new();
    for (index, field) in decl.fields().enumerate() {
        let step = match field {
            Field::ChecksumStart { field_id } => {
                checksum_step(layout, decl, index, field_id).map(Some)
            }
            _ => layout.size_expr(decl, index).map(|size| {
                size.map(|size| Step::Size { field_id: field.label().into_owned(), size })
            }),
        };
        match step {
            Ok(step) => steps.extend(step),
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
        match field_check(layout, decl, index, field) {
            Ok(check) => field_checks.extend(check),
            Err(diagnostic) => diagnostics.push(diagnostic),
        }
    }

    let mut constraints = Vec::new();
    if scope.get_parent(decl).is_none() {
        if let Some(constraint) = decl.constraints().next() {
            diagnostics.push(
                Diagnostic::error()
                    .with_code(ErrorCode::ConstraintWithoutParent)
                    .with_labels(vec![decl.loc().primary()])
                    .with_message(format!(
                        "constraint on `{}` declared by `{}`, which has no parent",
                        constraint.id,
                        decl.id()
                    )),
            );
        }
    } else {
        for constraint in decl.constraints() {
            match builder::resolve_constraint(scope, decl, constraint) {
                Ok(value) => {
                    constraints.push(ConstraintCheck { field_id: constraint.id.clone(), value })
                }
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }
    }

    diagnostics.err_or(Procedure { parent_size, static_size, steps, constraints, field_checks })
}
