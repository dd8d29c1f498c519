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

//! Builder compiler.
//!
//! A packet builder is constructed from the full list of inherited
//! parameters. Each level stores its own fields and delegates the
//! inherited ones to the parent level, replacing the fields bound by
//! constraints with their literal value. Serialization runs from the
//! root level: the encoding of a derived level is the payload of its
//! parent level.

use codespan_reporting::diagnostic::Diagnostic;
use serde::Serialize;
use std::collections::HashSet;

use crate::analyzer::{Diagnostics, ErrorCode, Scope};
use crate::ast::{Constraint, Decl, Field, FileId};
use crate::layout::Layout;

/// Value bound to an inherited field by a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintValue {
    Scalar { value: u64 },
    Tag { enum_id: String, tag_id: String, value: u64 },
}

impl ConstraintValue {
    /// Integer stored in the packet.
    pub fn value(&self) -> u64 {
        match self {
            ConstraintValue::Scalar { value } | ConstraintValue::Tag { value, .. } => *value,
        }
    }
}

/// Parameter of a builder constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub id: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    Scalar { width: usize },
    Enum { enum_id: String, width: usize },
    /// Encoded bytes of a custom field. `width` is set for fixed width
    /// custom types.
    Custom { type_id: String, width: Option<usize> },
}

/// Argument passed to the parent constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Argument {
    /// Parent parameter supplied by the caller.
    Forward { id: String },
    /// Parent parameter bound by a constraint of this packet.
    Constant { id: String, value: ConstraintValue },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delegation {
    pub parent_id: String,
    pub arguments: Vec<Argument>,
}

/// Validation run on constructor parameters before the builder is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterCheck {
    /// Scalar narrower than its backing integer.
    Range { id: String, maximum: u64 },
    /// The value must be a declared tag.
    Tag { id: String, enum_id: String },
    /// Fixed width custom values must have the declared size in octets,
    /// and pass the registered validator, if any.
    Custom { id: String, type_id: String, size: Option<usize> },
}

impl ParameterCheck {
    pub fn id(&self) -> &str {
        match self {
            ParameterCheck::Range { id, .. }
            | ParameterCheck::Tag { id, .. }
            | ParameterCheck::Custom { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constructor {
    /// Full parameter list, parents first.
    pub parameters: Vec<Parameter>,
    pub delegation: Option<Delegation>,
    /// Own parameter fields, stored by this level.
    pub members: Vec<Parameter>,
    pub checks: Vec<ParameterCheck>,
}

/// Serialization of a single field of the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Scalar or enum member.
    Value { id: String, width: usize },
    /// Custom member bytes.
    Custom { id: String, type_id: String, width: Option<usize> },
    Constant { width: usize, value: u64 },
    Reserved { width: usize },
    /// Octet size of the payload, plus a modifier.
    Size { field_id: String, width: usize, modifier: usize },
    /// Payload bytes, or the encoding of the derived level.
    Payload,
    ChecksumStart { field_id: String },
    Checksum { id: String, checksum_id: String, width: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderPlan {
    pub id: String,
    pub parent_id: Option<String>,
    /// Factory parameters. Packets ending with a body have no factory:
    /// only their derived packets can be built.
    pub factory: Option<Vec<Parameter>>,
    pub constructor: Constructor,
    /// Whether the packet declares a payload filled by the caller.
    pub has_payload: bool,
    pub fields: Vec<Encoding>,
}

impl BuilderPlan {
    /// Sum of the widths of the fixed size encodings, in bits.
    pub fn static_width(&self) -> usize {
        self.fields
            .iter()
            .map(|encoding| match encoding {
                Encoding::Value { width, .. }
                | Encoding::Constant { width, .. }
                | Encoding::Reserved { width }
                | Encoding::Size { width, .. }
                | Encoding::Checksum { width, .. } => *width,
                Encoding::Custom { width, .. } => width.unwrap_or(0),
                Encoding::Payload | Encoding::ChecksumStart { .. } => 0,
            })
            .sum()
    }
}

/// Resolve the value of a constraint of `decl` on an inherited field.
pub fn resolve_constraint(
    scope: &Scope,
    decl: &Decl,
    constraint: &Constraint,
) -> Result<ConstraintValue, Diagnostic<FileId>> {
    let error = |code: ErrorCode, message: String| {
        Diagnostic::error()
            .with_code(code)
            .with_labels(vec![decl.loc().primary()])
            .with_message(message)
    };
    let field =
        scope.iter_parent_fields(decl).find(|field| field.id() == Some(constraint.id.as_str()));
    match field {
        None => Err(error(
            ErrorCode::UndeclaredConstraintIdentifier,
            format!("undeclared constraint identifier `{}` in `{}`", constraint.id, decl.id()),
        )
        .with_notes(vec!["hint: constraints apply to fields of the parent packets".to_owned()])),
        Some(Field::Scalar { width, .. }) => match constraint.value {
            None => Err(error(
                ErrorCode::InvalidConstraintValue,
                format!(
                    "invalid constraint value for `{}` in `{}`, expected an integer",
                    constraint.id,
                    decl.id()
                ),
            )),
            Some(value) if value > packetdef_runtime::max_value(*width) => Err(error(
                ErrorCode::ConstraintValueOutOfRange,
                format!(
                    "constraint value `{}` is larger than the maximum value of `{}` in `{}`",
                    value,
                    constraint.id,
                    decl.id()
                ),
            )
            .with_notes(vec![format!("`{}` has width {}", constraint.id, width)])),
            Some(value) => Ok(ConstraintValue::Scalar { value }),
        },
        Some(Field::Enum { enum_id, .. }) => {
            let Some(tag_id) = &constraint.tag_id else {
                return Err(error(
                    ErrorCode::InvalidConstraintValue,
                    format!(
                        "invalid constraint value for `{}` in `{}`, expected a tag of `{}`",
                        constraint.id,
                        decl.id(),
                        enum_id
                    ),
                ));
            };
            match scope.tag_value(enum_id, tag_id) {
                Some(value) => Ok(ConstraintValue::Tag {
                    enum_id: enum_id.clone(),
                    tag_id: tag_id.clone(),
                    value,
                }),
                None => Err(error(
                    ErrorCode::UndeclaredTagIdentifier,
                    format!("undeclared tag identifier `{tag_id}` of enum `{enum_id}`"),
                )),
            }
        }
        Some(field) => Err(error(
            ErrorCode::InvalidConstraintIdentifier,
            format!(
                "invalid constraint identifier `{}` in `{}`, expected a scalar or enum field",
                constraint.id,
                decl.id()
            ),
        )
        .with_notes(vec![format!("`{}` is declared as {} field", constraint.id, field.kind())])),
    }
}

/// Return the constructor parameter of a field, if it is one.
fn parameter(scope: &Scope, decl: &Decl, field: &Field) -> Option<Parameter> {
    if !field.is_parameter() {
        return None;
    }
    let kind = match field {
        Field::Scalar { width, .. } => ParameterKind::Scalar { width: *width },
        Field::Enum { enum_id, .. } => ParameterKind::Enum {
            enum_id: enum_id.clone(),
            width: scope.field_width(decl, field)?,
        },
        Field::Custom { type_id, .. } => ParameterKind::Custom {
            type_id: type_id.clone(),
            width: scope.field_size(decl, field).static_(),
        },
        _ => return None,
    };
    Some(Parameter { id: field.id()?.to_owned(), kind })
}

/// Full parameter list of the constructor of `decl`, root packet
/// first. Fields bound by a constraint anywhere in the chain are
/// omitted.
fn constructor_parameters(scope: &Scope, decl: &Decl) -> Vec<Parameter> {
    let constrained: HashSet<_> =
        scope.iter_constraints(decl).map(|constraint| constraint.id.as_str()).collect();
    let mut levels: Vec<_> = scope.iter_parents_and_self(decl).collect();
    levels.reverse();
    levels
        .into_iter()
        .flat_map(|level| level.fields().filter_map(move |field| parameter(scope, level, field)))
        .filter(|parameter| !constrained.contains(parameter.id.as_str()))
        .collect()
}

fn check(parameter: &Parameter) -> Option<ParameterCheck> {
    let id = parameter.id.clone();
    match &parameter.kind {
        ParameterKind::Scalar { width } if ![8, 16, 32, 64].contains(width) => {
            Some(ParameterCheck::Range { id, maximum: packetdef_runtime::max_value(*width) })
        }
        ParameterKind::Scalar { .. } => None,
        ParameterKind::Enum { enum_id, .. } => {
            Some(ParameterCheck::Tag { id, enum_id: enum_id.clone() })
        }
        ParameterKind::Custom { type_id, width } => Some(ParameterCheck::Custom {
            id,
            type_id: type_id.clone(),
            size: width.map(|width| width / 8),
        }),
    }
}

fn encoding(scope: &Scope, decl: &Decl, field: &Field) -> Encoding {
    let width = scope.field_width(decl, field).unwrap_or(0);
    match field {
        Field::Scalar { id, .. } | Field::Enum { id, .. } => {
            Encoding::Value { id: id.clone(), width }
        }
        Field::Custom { id, type_id } => Encoding::Custom {
            id: id.clone(),
            type_id: type_id.clone(),
            width: scope.field_size(decl, field).static_(),
        },
        Field::FixedScalar { value, .. } => Encoding::Constant { width, value: *value },
        Field::FixedEnum { enum_id, tag_id } => Encoding::Constant {
            width,
            value: scope.tag_value(enum_id, tag_id).unwrap_or_default(),
        },
        Field::Reserved { width } => Encoding::Reserved { width: *width },
        Field::Size { field_id, width } => Encoding::Size {
            field_id: field_id.clone(),
            width: *width,
            modifier: match decl.payload() {
                Some(Field::Payload { size_modifier }) => size_modifier.unwrap_or(0),
                _ => 0,
            },
        },
        Field::Payload { .. } | Field::Body => Encoding::Payload,
        Field::ChecksumStart { field_id } => {
            Encoding::ChecksumStart { field_id: field_id.clone() }
        }
        Field::Checksum { id, checksum_id } => {
            Encoding::Checksum { id: id.clone(), checksum_id: checksum_id.clone(), width }
        }
    }
}

/// Compile the builder of a packet declaration.
/// Raises the constraint diagnostics of the declaration.
pub fn compile(layout: &Layout, decl: &Decl) -> Result<BuilderPlan, Diagnostics> {
    let scope = layout.scope();
    let mut diagnostics = Diagnostics::default();

    let delegation = match scope.get_parent(decl) {
        None => None,
        Some(parent) => {
            let inherited: HashSet<_> = scope
                .iter_parents(decl)
                .flat_map(Decl::constraints)
                .map(|constraint| constraint.id.as_str())
                .collect();
            let mut constants = Vec::new();
            for constraint in decl.constraints() {
                if inherited.contains(constraint.id.as_str())
                    || constants.iter().any(|(id, _)| *id == constraint.id.as_str())
                {
                    diagnostics.push(
                        Diagnostic::error()
                            .with_code(ErrorCode::DuplicateConstraintIdentifier)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!(
                                "duplicate constraint identifier `{}` in `{}`",
                                constraint.id,
                                decl.id()
                            ))
                            .with_notes(vec![format!(
                                "`{}` is already constrained",
                                constraint.id
                            )]),
                    );
                    continue;
                }
                match resolve_constraint(scope, decl, constraint) {
                    Ok(value) => constants.push((constraint.id.as_str(), value)),
                    Err(diagnostic) => diagnostics.push(diagnostic),
                }
            }
            let arguments = constructor_parameters(scope, parent)
                .into_iter()
                .map(|parameter| {
                    match constants.iter().find(|(id, _)| *id == parameter.id) {
                        Some((_, value)) => {
                            Argument::Constant { id: parameter.id, value: value.clone() }
                        }
                        None => Argument::Forward { id: parameter.id },
                    }
                })
                .collect();
            Some(Delegation { parent_id: parent.id().to_owned(), arguments })
        }
    };

    let members: Vec<_> = decl.fields().filter_map(|field| parameter(scope, decl, field)).collect();
    let checks = members.iter().filter_map(check).collect();
    let parameters = constructor_parameters(scope, decl);
    let plan = BuilderPlan {
        id: decl.id().to_owned(),
        parent_id: decl.parent_id().map(str::to_owned),
        factory: (!decl.has_body()).then(|| parameters.clone()),
        constructor: Constructor { parameters, delegation, members, checks },
        has_payload: matches!(decl.payload(), Some(Field::Payload { .. })),
        fields: decl.fields().map(|field| encoding(scope, decl, field)).collect(),
    };
    diagnostics.err_or(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::ast;
    use crate::parser::parse_inline;
    use googletest::prelude::*;

    fn parse(text: &str) -> ast::File {
        let mut db = ast::SourceDatabase::new();
        parse_inline(&mut db, "stdin", text.to_owned()).expect("parsing failure")
    }

    macro_rules! raises {
        ($code:ident, $decl:literal, $text:literal) => {{
            let file = parse($text);
            let scope = analyzer::analyze(&file).expect("analyzer failure");
            let layout = Layout::new(&scope);
            let diagnostics = compile(&layout, scope.typedef[$decl]).unwrap_err();
            assert_eq!(diagnostics.codes(), vec![String::from(ErrorCode::$code)]);
        }};
    }

    const HIERARCHY: &str = r#"{ "endianness": "little_endian", "declarations": [
      { "kind": "enum_declaration", "id": "Op", "width": 8, "tags": [
        { "id": "READ", "value": 1 }, { "id": "WRITE", "value": 2 }
      ]},
      { "kind": "packet_declaration", "id": "Command", "fields": [
        { "kind": "enum_field", "id": "op", "enum_id": "Op" },
        { "kind": "scalar_field", "id": "handle", "width": 12 },
        { "kind": "reserved_field", "width": 4 },
        { "kind": "size_field", "field_id": "_body_", "width": 8 },
        { "kind": "body_field" }
      ]},
      { "kind": "packet_declaration", "id": "Write", "parent_id": "Command",
        "constraints": [{ "id": "op", "tag_id": "WRITE" }], "fields": [
        { "kind": "scalar_field", "id": "offset", "width": 16 },
        { "kind": "payload_field" }
      ]}
    ]}"#;

    #[test]
    fn constructor_delegation() {
        let file = parse(HIERARCHY);
        let scope = analyzer::analyze(&file).unwrap();
        let layout = Layout::new(&scope);

        let command = compile(&layout, scope.typedef["Command"]).unwrap();
        assert_eq!(command.factory, None);
        assert_eq!(command.constructor.delegation, None);
        assert_that!(
            command.constructor.checks,
            elements_are![
                eq(ParameterCheck::Tag { id: "op".to_owned(), enum_id: "Op".to_owned() }),
                eq(ParameterCheck::Range { id: "handle".to_owned(), maximum: 0xfff })
            ]
        );

        let write = compile(&layout, scope.typedef["Write"]).unwrap();
        let ids: Vec<_> =
            write.constructor.parameters.iter().map(|parameter| parameter.id.as_str()).collect();
        assert_eq!(ids, vec!["handle", "offset"]);
        assert!(write.factory.is_some());
        assert!(write.has_payload);
        assert_that!(
            write.constructor.delegation,
            some(eq(Delegation {
                parent_id: "Command".to_owned(),
                arguments: vec![
                    Argument::Constant {
                        id: "op".to_owned(),
                        value: ConstraintValue::Tag {
                            enum_id: "Op".to_owned(),
                            tag_id: "WRITE".to_owned(),
                            value: 2
                        }
                    },
                    Argument::Forward { id: "handle".to_owned() },
                ]
            }))
        );
        assert!(write.constructor.checks.is_empty());
    }

    #[test]
    fn level_encodings() {
        let file = parse(HIERARCHY);
        let scope = analyzer::analyze(&file).unwrap();
        let layout = Layout::new(&scope);
        let command = compile(&layout, scope.typedef["Command"]).unwrap();
        assert_eq!(
            command.fields,
            vec![
                Encoding::Value { id: "op".to_owned(), width: 8 },
                Encoding::Value { id: "handle".to_owned(), width: 12 },
                Encoding::Reserved { width: 4 },
                Encoding::Size { field_id: "_body_".to_owned(), width: 8, modifier: 0 },
                Encoding::Payload,
            ]
        );
        assert_eq!(command.static_width(), 32);
    }

    #[test]
    fn constraint_errors() {
        raises!(
            UndeclaredConstraintIdentifier,
            "B",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [{ "kind": "payload_field" }] },
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "value": 1 }], "fields": [] }
            ]}"#
        );
        raises!(
            InvalidConstraintIdentifier,
            "B",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "custom_field_declaration", "id": "Addr", "width": 16 },
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "custom_field", "id": "x", "type_id": "Addr" },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "value": 1 }], "fields": [] }
            ]}"#
        );
        raises!(
            InvalidConstraintValue,
            "B",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "tag_id": "X" }], "fields": [] }
            ]}"#
        );
        raises!(
            ConstraintValueOutOfRange,
            "B",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 4 },
                { "kind": "reserved_field", "width": 4 },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "value": 16 }], "fields": [] }
            ]}"#
        );
        raises!(
            UndeclaredTagIdentifier,
            "B",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 8, "tags": [{ "id": "X", "value": 1 }] },
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "enum_field", "id": "e", "enum_id": "E" },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "e", "tag_id": "Y" }], "fields": [] }
            ]}"#
        );
        raises!(
            DuplicateConstraintIdentifier,
            "C",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "value": 1 }], "fields": [{ "kind": "payload_field" }] },
              { "kind": "packet_declaration", "id": "C", "parent_id": "B",
                "constraints": [{ "id": "x", "value": 2 }], "fields": [] }
            ]}"#
        );
    }
}
