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

use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::files;
use codespan_reporting::term;
use codespan_reporting::term::termcolor;
use std::collections::HashMap;
use std::fmt;

use crate::ast::*;

/// Field and declaration size information.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Size {
    /// Constant size in bits.
    Static(usize),
    /// Size indicated at runtime by a size field, or computed by
    /// a custom field type.
    Dynamic,
    /// The size cannot be determined statically or at runtime.
    /// The field extends to the trailer of the packet.
    #[default]
    Unknown,
}

impl std::ops::Add for Size {
    type Output = Size;
    fn add(self, rhs: Size) -> Self::Output {
        match (self, rhs) {
            (Size::Unknown, _) | (_, Size::Unknown) => Size::Unknown,
            (Size::Dynamic, _) | (_, Size::Dynamic) => Size::Dynamic,
            (Size::Static(lhs), Size::Static(rhs)) => Size::Static(lhs + rhs),
        }
    }
}

impl std::iter::Sum for Size {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Size {
        iter.fold(Size::Static(0), |acc, size| acc + size)
    }
}

impl Size {
    // Returns the width if the size is static.
    pub fn static_(&self) -> Option<usize> {
        match self {
            Size::Static(size) => Some(*size),
            Size::Dynamic | Size::Unknown => None,
        }
    }
}

/// List of unique errors reported as analyzer or compiler diagnostics.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DuplicateDeclIdentifier = 1,
    RecursiveDecl = 2,
    UndeclaredTypeIdentifier = 3,
    InvalidTypeIdentifier = 4,
    UndeclaredParentIdentifier = 5,
    InvalidParentIdentifier = 6,
    DuplicateFieldIdentifier = 7,
    DuplicateTagIdentifier = 8,
    DuplicateTagValue = 9,
    InvalidTagValue = 10,
    UndeclaredConstraintIdentifier = 11,
    InvalidConstraintIdentifier = 12,
    InvalidConstraintValue = 13,
    ConstraintValueOutOfRange = 14,
    UndeclaredTagIdentifier = 15,
    DuplicateConstraintIdentifier = 16,
    ConstraintWithoutParent = 17,
    DuplicateSizeField = 18,
    UndeclaredSizeIdentifier = 19,
    InvalidSizeIdentifier = 20,
    FixedValueOutOfRange = 21,
    DuplicatePayloadField = 22,
    MissingPayloadField = 23,
    UndeclaredChecksumField = 24,
    InvalidChecksumField = 25,
    UnresolvableChecksumOffset = 26,
    AmbiguousFieldOffset = 27,
    MisalignedCustomField = 28,
    InvalidFieldWidth = 29,
    InvalidFieldOffset = 30,
    InvalidFieldSize = 31,
    InvalidPacketSize = 32,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "E{}", *self as u16)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        format!("{}", code)
    }
}

/// Aggregate analyzer diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic<FileId>>,
}

/// Gather information about the full definition tree.
#[derive(Debug)]
pub struct Scope<'d> {
    /// Reference to the source file.
    pub file: &'d File,
    /// Collection of Packet, Enum, Checksum, and CustomField declarations.
    pub typedef: HashMap<String, &'d Decl>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn push(&mut self, diagnostic: Diagnostic<FileId>) {
        self.diagnostics.push(diagnostic)
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics)
    }

    pub fn err_or<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Keep only the first reported diagnostic.
    pub fn first(mut self) -> Diagnostics {
        self.diagnostics.truncate(1);
        self
    }

    /// Return the codes of the reported diagnostics.
    pub fn codes(&self) -> Vec<String> {
        self.diagnostics.iter().filter_map(|d| d.code.clone()).collect()
    }

    pub fn emit(
        &self,
        sources: &SourceDatabase,
        writer: &mut dyn termcolor::WriteColor,
    ) -> Result<(), files::Error> {
        let config = term::Config::default();
        for d in self.diagnostics.iter() {
            term::emit(writer, &config, sources, d)?;
        }
        Ok(())
    }
}

impl From<Diagnostic<FileId>> for Diagnostics {
    fn from(diagnostic: Diagnostic<FileId>) -> Self {
        Diagnostics { diagnostics: vec![diagnostic] }
    }
}

impl<'d> Scope<'d> {
    pub fn new(file: &'d File) -> Result<Scope<'d>, Diagnostics> {
        // Gather top-level declarations.
        let mut scope: Scope = Scope { file, typedef: Default::default() };
        let mut diagnostics: Diagnostics = Default::default();
        for decl in &file.declarations {
            let id = decl.id();
            if let Some(prev) = scope.typedef.insert(id.to_owned(), decl) {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::DuplicateDeclIdentifier)
                        .with_labels(vec![decl.loc().primary(), prev.loc().secondary()])
                        .with_message(format!(
                            "redeclaration of {} identifier `{}`",
                            decl.kind(),
                            id
                        ))
                        .with_notes(vec![format!("`{id}` is first declared as {}", prev.kind())]),
                )
            }
        }

        diagnostics.err_or(scope)
    }

    /// Return the parent declaration of the selected declaration,
    /// if it has one.
    pub fn get_parent(&self, decl: &Decl) -> Option<&'d Decl> {
        decl.parent_id().and_then(|parent_id| self.typedef.get(parent_id).cloned())
    }

    /// Iterate over the parent declarations of the selected declaration.
    pub fn iter_parents<'s>(&'s self, decl: &'d Decl) -> impl Iterator<Item = &'d Decl> + 's {
        std::iter::successors(self.get_parent(decl), |decl| self.get_parent(decl))
    }

    /// Iterate over the parent declarations of the selected declaration,
    /// including the current declaration.
    pub fn iter_parents_and_self<'s>(
        &'s self,
        decl: &'d Decl,
    ) -> impl Iterator<Item = &'d Decl> + 's {
        std::iter::successors(Some(decl), |decl| self.get_parent(decl))
    }

    /// Iterate over the declaration parent's fields.
    pub fn iter_parent_fields<'s>(
        &'s self,
        decl: &'d Decl,
    ) -> impl Iterator<Item = &'d Field> + 's {
        self.iter_parents(decl).flat_map(Decl::fields)
    }

    /// Iterate over the declaration and its parent's constraints.
    pub fn iter_constraints<'s>(
        &'s self,
        decl: &'d Decl,
    ) -> impl Iterator<Item = &'d Constraint> + 's {
        self.iter_parents_and_self(decl).flat_map(Decl::constraints)
    }

    /// Return the type declaration for the selected field, if applicable.
    pub fn get_type_declaration(&self, field: &Field) -> Option<&'d Decl> {
        match field {
            Field::Enum { enum_id: type_id, .. }
            | Field::FixedEnum { enum_id: type_id, .. }
            | Field::Custom { type_id, .. }
            | Field::Checksum { checksum_id: type_id, .. } => self.typedef.get(type_id).cloned(),
            Field::Scalar { .. }
            | Field::FixedScalar { .. }
            | Field::Reserved { .. }
            | Field::Size { .. }
            | Field::Payload { .. }
            | Field::Body
            | Field::ChecksumStart { .. } => None,
        }
    }

    /// Return the size of a field of the selected declaration.
    /// Payload and body fields have a dynamic size when a size field
    /// is declared for them.
    pub fn field_size(&self, decl: &Decl, field: &Field) -> Size {
        match field {
            Field::Scalar { width, .. }
            | Field::FixedScalar { width, .. }
            | Field::Reserved { width }
            | Field::Size { width, .. } => Size::Static(*width),
            Field::ChecksumStart { .. } => Size::Static(0),
            Field::Payload { .. } | Field::Body if decl.payload_size().is_some() => Size::Dynamic,
            Field::Payload { .. } | Field::Body => Size::Unknown,
            Field::Enum { .. }
            | Field::FixedEnum { .. }
            | Field::Custom { .. }
            | Field::Checksum { .. } => match self.get_type_declaration(field) {
                Some(Decl::Enum { width, .. }) | Some(Decl::Checksum { width, .. }) => {
                    Size::Static(*width)
                }
                Some(Decl::CustomField { width: Some(width), .. }) => Size::Static(*width),
                Some(Decl::CustomField { width: None, .. }) => Size::Dynamic,
                Some(Decl::Packet { .. }) | None => Size::Unknown,
            },
        }
    }

    /// Return the bit width of the integer stored by a field, if it is
    /// a bit field.
    pub fn field_width(&self, decl: &Decl, field: &Field) -> Option<usize> {
        match field {
            Field::Custom { .. } | Field::Payload { .. } | Field::Body => None,
            _ => self.field_size(decl, field).static_(),
        }
    }

    /// Return the value of a declared enum tag.
    pub fn tag_value(&self, enum_id: &str, tag_id: &str) -> Option<u64> {
        match self.typedef.get(enum_id) {
            Some(Decl::Enum { tags, .. }) => {
                tags.iter().find(|tag| tag.id == tag_id).map(|tag| tag.value)
            }
            _ => None,
        }
    }
}

/// Return the bit-width of a scalar value.
fn bit_width(value: u64) -> usize {
    u64::BITS as usize - value.leading_zeros() as usize
}

/// Check declaration identifiers.
/// Raises error diagnostics for the following cases:
///      - undeclared parent identifier
///      - invalid parent identifier
///      - undeclared type identifier
///      - invalid type identifier
///      - recursive declaration
fn check_decl_identifiers(file: &File, scope: &Scope) -> Result<(), Diagnostics> {
    enum Mark {
        Temporary,
        Permanent,
    }
    #[derive(Default)]
    struct Context<'d> {
        visited: HashMap<&'d str, Mark>,
    }

    fn bfs<'d>(
        decl: &'d Decl,
        context: &mut Context<'d>,
        scope: &Scope<'d>,
        diagnostics: &mut Diagnostics,
    ) {
        let decl_id = decl.id();
        match context.visited.get(decl_id) {
            Some(Mark::Permanent) => return,
            Some(Mark::Temporary) => {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::RecursiveDecl)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "recursive declaration of {} `{}`",
                            decl.kind(),
                            decl_id
                        )),
                );
                return;
            }
            _ => (),
        }

        // Start visiting current declaration.
        context.visited.insert(decl_id, Mark::Temporary);

        // Iterate over parent declaration.
        if let Some(parent_id) = decl.parent_id() {
            match scope.typedef.get(parent_id) {
                None => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::UndeclaredParentIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("undeclared parent identifier `{parent_id}`"))
                        .with_notes(vec![format!(
                            "hint: `{decl_id}` expects a packet identifier as parent"
                        )]),
                ),
                Some(parent_decl @ Decl::Packet { .. }) => {
                    bfs(parent_decl, context, scope, diagnostics)
                }
                Some(parent_decl) => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidParentIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("invalid parent identifier `{parent_id}`"))
                        .with_notes(vec![format!(
                            "`{parent_id}` is declared as {}, expected packet",
                            parent_decl.kind()
                        )]),
                ),
            }
        }

        // Done visiting current declaration.
        context.visited.insert(decl_id, Mark::Permanent);
    }

    // Start bfs.
    let mut diagnostics = Default::default();
    let mut context = Default::default();
    for decl in file.packets() {
        bfs(decl, &mut context, scope, &mut diagnostics);

        // Validate that typed fields have valid type identifiers.
        for field in decl.fields() {
            let (type_id, expected) = match field {
                Field::Enum { enum_id, .. } | Field::FixedEnum { enum_id, .. } => {
                    (enum_id, "enum")
                }
                Field::Custom { type_id, .. } => (type_id, "custom field"),
                Field::Checksum { checksum_id, .. } => (checksum_id, "checksum"),
                _ => continue,
            };
            match scope.typedef.get(type_id) {
                None => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::UndeclaredTypeIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "undeclared {} identifier `{}`",
                            field.kind(),
                            type_id
                        ))
                        .with_notes(vec![format!("hint: expected {expected} identifier")]),
                ),
                Some(type_decl) if type_decl.kind() != expected => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidTypeIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "invalid {} identifier `{}`",
                            field.kind(),
                            type_id
                        ))
                        .with_notes(vec![
                            format!("`{type_id}` is declared as {}", type_decl.kind()),
                            format!("hint: expected {expected} identifier"),
                        ]),
                ),
                Some(_) => (),
            }
        }
    }

    diagnostics.err_or(())
}

/// Check field identifiers.
/// Raises error diagnostics for the following cases:
///      - duplicate field identifier
///      - field identifier shadowing an inherited field
fn check_field_identifiers(file: &File, scope: &Scope) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        let mut local_scope = HashMap::new();
        for field in decl.fields() {
            // Payload and body fields are checked separately.
            if matches!(field, Field::Payload { .. } | Field::Body) {
                continue;
            }
            if let Some(id) = field.id() {
                if local_scope.insert(id.to_string(), field).is_some() {
                    diagnostics.push(
                        Diagnostic::error()
                            .with_code(ErrorCode::DuplicateFieldIdentifier)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!(
                                "redeclaration of {} field identifier `{}`",
                                field.kind(),
                                id
                            )),
                    )
                } else if let Some(parent) = scope
                    .iter_parents(decl)
                    .find(|parent| parent.fields().any(|f| f.id() == Some(id)))
                {
                    diagnostics.push(
                        Diagnostic::error()
                            .with_code(ErrorCode::DuplicateFieldIdentifier)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!(
                                "redeclaration of {} field identifier `{}`",
                                field.kind(),
                                id
                            ))
                            .with_notes(vec![format!(
                                "`{id}` is inherited from `{}`",
                                parent.id()
                            )]),
                    )
                }
            }
        }
    }

    diagnostics.err_or(())
}

/// Check field and declaration widths.
/// Raises error diagnostics for the following cases:
///      - bit field width is zero or larger than 64 bits
///      - reserved field width is zero
///      - custom field width is not an integral number of octets
fn check_field_widths(file: &File) -> Result<(), Diagnostics> {
    fn invalid_width(decl: &Decl, what: String, width: usize) -> Diagnostic<FileId> {
        Diagnostic::error()
            .with_code(ErrorCode::InvalidFieldWidth)
            .with_labels(vec![decl.loc().primary()])
            .with_message(format!("invalid width {width} for {what}"))
            .with_notes(vec!["hint: expected a width between 1 and 64 bits".to_owned()])
    }

    let mut diagnostics: Diagnostics = Default::default();
    for decl in &file.declarations {
        match decl {
            Decl::Enum { id, width, .. } | Decl::Checksum { id, width, .. }
                if !(1..=64).contains(width) =>
            {
                diagnostics.push(invalid_width(decl, format!("{} `{id}`", decl.kind()), *width))
            }
            Decl::CustomField { id, width: Some(width), .. } if *width == 0 || width % 8 != 0 => {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidFieldSize)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "custom field `{id}` size is not an integral number of octets"
                        )),
                )
            }
            Decl::Packet { id, fields, .. } => {
                for field in fields {
                    match field {
                        Field::Scalar { width, .. }
                        | Field::FixedScalar { width, .. }
                        | Field::Size { width, .. }
                            if !(1..=64).contains(width) =>
                        {
                            diagnostics.push(invalid_width(
                                decl,
                                format!("{} field `{}` in `{id}`", field.kind(), field.label()),
                                *width,
                            ))
                        }
                        Field::Reserved { width: 0 } => diagnostics.push(invalid_width(
                            decl,
                            format!("reserved field in `{id}`"),
                            0,
                        )),
                        _ => (),
                    }
                }
            }
            _ => (),
        }
    }

    diagnostics.err_or(())
}

/// Check enum declarations.
/// Raises error diagnostics for the following cases:
///      - duplicate tag identifier
///      - duplicate tag value
///      - tag value larger than the enum width
fn check_enum_declarations(file: &File) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in &file.declarations {
        let Decl::Enum { id, tags, width, .. } = decl else { continue };
        let mut tags_by_id = HashMap::new();
        let mut tags_by_value = HashMap::new();
        for tag in tags {
            if tags_by_id.insert(tag.id.as_str(), tag).is_some() {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::DuplicateTagIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("duplicate tag identifier `{}`", tag.id))
                        .with_notes(vec![format!("in enum `{id}`")]),
                )
            }
            if let Some(prev) = tags_by_value.insert(tag.value, tag) {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::DuplicateTagValue)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("duplicate tag value `{}`", tag.value))
                        .with_notes(vec![format!("`{}` has the same value", prev.id)]),
                )
            }
            if bit_width(tag.value) > *width {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidTagValue)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "tag value `{}` is larger than the maximum value of `{id}`",
                            tag.value
                        ))
                        .with_notes(vec![format!("`{id}` is {width} bits wide")]),
                )
            }
        }
    }

    diagnostics.err_or(())
}

/// Check size fields.
/// Raises error diagnostics for the following cases:
///      - duplicate size field
///      - undeclared size identifier
///      - invalid size identifier
fn check_size_fields(file: &File) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        let mut size_for_id = HashMap::new();
        for field in decl.fields() {
            let Field::Size { field_id, .. } = field else { continue };
            if size_for_id.insert(field_id, field).is_some() {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::DuplicateSizeField)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("duplicate size field for `{field_id}`"))
                        .with_notes(vec![format!("in packet `{}`", decl.id())]),
                )
            }
            match decl.fields().find(|field| field.id() == Some(field_id)) {
                None => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::UndeclaredSizeIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("undeclared size identifier `{field_id}`"))
                        .with_notes(vec!["hint: expected payload or body identifier".to_owned()]),
                ),
                Some(Field::Payload { .. }) | Some(Field::Body) => (),
                Some(target) => diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidSizeIdentifier)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!("invalid size identifier `{field_id}`"))
                        .with_notes(vec![
                            format!("`{field_id}` is declared as {} field", target.kind()),
                            "hint: expected payload or body identifier".to_owned(),
                        ]),
                ),
            }
        }
    }

    diagnostics.err_or(())
}

/// Check fixed fields.
/// Raises error diagnostics for the following cases:
///      - invalid scalar value
///      - undeclared tag identifier
fn check_fixed_fields(file: &File, scope: &Scope) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        for field in decl.fields() {
            match field {
                Field::FixedScalar { value, width } if bit_width(*value) > *width => diagnostics
                    .push(
                        Diagnostic::error()
                            .with_code(ErrorCode::FixedValueOutOfRange)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!(
                                "fixed value `{value}` is larger than maximum value"
                            ))
                            .with_notes(vec![format!("the field is {width} bits wide")]),
                    ),
                Field::FixedEnum { enum_id, tag_id }
                    if scope.tag_value(enum_id, tag_id).is_none() =>
                {
                    diagnostics.push(
                        Diagnostic::error()
                            .with_code(ErrorCode::UndeclaredTagIdentifier)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!("undeclared tag identifier `{tag_id}`"))
                            .with_notes(vec![format!("hint: expected a tag of enum `{enum_id}`")]),
                    )
                }
                _ => (),
            }
        }
    }

    diagnostics.err_or(())
}

/// Check payload fields.
/// Raises error diagnostics for the following cases:
///      - duplicate payload or body field
///      - missing payload field
fn check_payload_fields(file: &File) -> Result<(), Diagnostics> {
    // Check whether the declaration requires a payload field.
    // The payload is required if any child packets declares fields.
    fn requires_payload(file: &File, decl: &Decl) -> bool {
        file.iter_children(decl).any(|child| child.fields().next().is_some())
    }

    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        let mut payload: Option<&Field> = None;
        for field in decl.fields() {
            if matches!(field, Field::Payload { .. } | Field::Body) {
                if let Some(prev) = payload {
                    diagnostics.push(
                        Diagnostic::error()
                            .with_code(ErrorCode::DuplicatePayloadField)
                            .with_labels(vec![decl.loc().primary()])
                            .with_message(format!("duplicate {} field", field.kind()))
                            .with_notes(vec![format!(
                                "{} is first declared in `{}`",
                                prev.kind(),
                                decl.id()
                            )]),
                    )
                } else {
                    payload = Some(field);
                }
            }
        }

        if payload.is_none() && requires_payload(file, decl) {
            diagnostics.push(
                Diagnostic::error()
                    .with_code(ErrorCode::MissingPayloadField)
                    .with_labels(vec![decl.loc().primary()])
                    .with_message(format!("missing payload field in `{}`", decl.id()))
                    .with_notes(vec![format!(
                        "hint: one child packet is extending `{}`",
                        decl.id()
                    )]),
            )
        }
    }

    diagnostics.err_or(())
}

/// Check field offsets.
/// Raises error diagnostics for the following cases:
///      - non bit-field field not aligned to an octet boundary
fn check_field_offsets(file: &File, scope: &Scope) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        let mut offset = 0;

        for field in decl.fields() {
            let size = scope.field_size(decl, field);
            let aligned = match field {
                // Dynamic custom fields are checked by the validity compiler.
                Field::Custom { .. } if size == Size::Dynamic => true,
                Field::Payload { .. }
                | Field::Body
                | Field::Custom { .. }
                | Field::Checksum { .. } => {
                    offset % 8 == 0
                }
                _ => true,
            };
            if !aligned {
                diagnostics.push(
                    Diagnostic::error()
                        .with_code(ErrorCode::InvalidFieldOffset)
                        .with_labels(vec![decl.loc().primary()])
                        .with_message(format!(
                            "{} field `{}` is not aligned to an octet boundary",
                            field.kind(),
                            field.label()
                        ))
                        .with_notes(vec![format!("in packet `{}`", decl.id())]),
                )
            }
            offset = match size {
                Size::Static(size) => offset + size,
                Size::Dynamic | Size::Unknown => 0,
            };
        }
    }
    diagnostics.err_or(())
}

/// Check declaration sizes.
/// Raises error diagnostics for the following cases:
///      - packet size is not an integral number of octets
fn check_decl_sizes(file: &File, scope: &Scope) -> Result<(), Diagnostics> {
    let mut diagnostics: Diagnostics = Default::default();
    for decl in file.packets() {
        let static_size: usize = decl
            .fields()
            .filter_map(|field| scope.field_size(decl, field).static_())
            .sum();

        if static_size % 8 != 0 {
            diagnostics.push(
                Diagnostic::error()
                    .with_code(ErrorCode::InvalidPacketSize)
                    .with_labels(vec![decl.loc().primary()])
                    .with_message(format!(
                        "packet `{}` size is not an integral number of octets",
                        decl.id()
                    ))
                    .with_notes(vec![format!("the fixed size fields total {static_size} bits")]),
            )
        }
    }
    diagnostics.err_or(())
}

/// Analyzer entry point, runs the general well-formedness checks on
/// the definition tree. Layout dependent checks are performed when
/// the packets are compiled.
pub fn analyze(file: &File) -> Result<Scope<'_>, Diagnostics> {
    let scope = Scope::new(file)?;
    check_decl_identifiers(file, &scope)?;
    check_field_identifiers(file, &scope)?;
    check_field_widths(file)?;
    check_enum_declarations(file)?;
    check_size_fields(file)?;
    check_fixed_fields(file, &scope)?;
    check_payload_fields(file)?;
    check_field_offsets(file, &scope)?;
    check_decl_sizes(file, &scope)?;
    Ok(scope)
}

#[cfg(test)]
mod test {
    use crate::analyzer;
    use crate::ast;
    use crate::parser::parse_inline;
    use codespan_reporting::diagnostic::LabelStyle;
    use codespan_reporting::term::termcolor;

    use googletest::prelude::{assert_that, eq};

    macro_rules! raises {
        ($code:ident, $text:literal) => {{
            let mut db = ast::SourceDatabase::new();
            let file = parse_inline(&mut db, "stdin", $text.to_owned()).expect("parsing failure");
            let result = analyzer::analyze(&file);
            assert!(matches!(result, Err(_)));
            let diagnostics = result.err().unwrap();
            let mut buffer = termcolor::Buffer::no_color();
            let _ = diagnostics.emit(&db, &mut buffer);
            println!("{}", std::str::from_utf8(buffer.as_slice()).unwrap());
            assert_eq!(diagnostics.diagnostics.len(), 1);
            assert_eq!(diagnostics.diagnostics[0].code, Some(analyzer::ErrorCode::$code.into()));
            assert!(diagnostics.diagnostics[0]
                .labels
                .iter()
                .any(|label| label.style == LabelStyle::Primary));
        }};
    }

    macro_rules! valid {
        ($text:literal) => {{
            let mut db = ast::SourceDatabase::new();
            let file = parse_inline(&mut db, "stdin", $text.to_owned()).expect("parsing failure");
            assert!(analyzer::analyze(&file).is_ok());
        }};
    }

    #[test]
    fn test_labels_cover_declarations() {
        let source = r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [] },
              { "kind": "enum_declaration", "id": "A", "width": 8, "tags": [] }
            ]}"#;
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(&mut db, "stdin", source.to_owned()).expect("parsing failure");
        let diagnostics = analyzer::analyze(&file).err().unwrap();
        let labels = &diagnostics.diagnostics[0].labels;
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].style, LabelStyle::Primary);
        assert_eq!(labels[0].file_id, file.declarations[1].loc().file);
        assert!(source[labels[0].range.clone()].starts_with(r#"{ "kind": "enum_declaration""#));
        assert_eq!(labels[1].style, LabelStyle::Secondary);
        assert!(source[labels[1].range.clone()].contains(r#""kind": "packet_declaration""#));
    }

    #[test]
    fn test_duplicate_decl_identifier() {
        raises!(
            DuplicateDeclIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [] },
              { "kind": "enum_declaration", "id": "A", "width": 8, "tags": [] }
            ]}"#
        );
    }

    #[test]
    fn test_recursive_decl() {
        raises!(
            RecursiveDecl,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "parent_id": "A", "fields": [] }
            ]}"#
        );

        raises!(
            RecursiveDecl,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "parent_id": "B", "fields": [] },
              { "kind": "packet_declaration", "id": "B", "parent_id": "A", "fields": [] }
            ]}"#
        );
    }

    #[test]
    fn test_parent_identifier() {
        raises!(
            UndeclaredParentIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "parent_id": "B", "fields": [] }
            ]}"#
        );

        raises!(
            InvalidParentIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "B", "width": 8, "tags": [] },
              { "kind": "packet_declaration", "id": "A", "parent_id": "B", "fields": [] }
            ]}"#
        );
    }

    #[test]
    fn test_type_identifier() {
        raises!(
            UndeclaredTypeIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "enum_field", "id": "x", "enum_id": "E" }
              ]}
            ]}"#
        );

        raises!(
            InvalidTypeIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "checksum_declaration", "id": "C", "width": 8 },
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "custom_field", "id": "x", "type_id": "C" }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_duplicate_field_identifier() {
        raises!(
            DuplicateFieldIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 },
                { "kind": "scalar_field", "id": "x", "width": 8 }
              ]}
            ]}"#
        );

        raises!(
            DuplicateFieldIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 },
                { "kind": "payload_field" }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_invalid_field_width() {
        raises!(
            InvalidFieldWidth,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 72 },
                { "kind": "reserved_field", "width": 8 }
              ]}
            ]}"#
        );

        raises!(
            InvalidFieldSize,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "custom_field_declaration", "id": "T", "width": 12 }
            ]}"#
        );
    }

    #[test]
    fn test_enum_declarations() {
        raises!(
            DuplicateTagIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 8, "tags": [
                { "id": "X", "value": 0 }, { "id": "X", "value": 1 }
              ]}
            ]}"#
        );

        raises!(
            DuplicateTagValue,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 8, "tags": [
                { "id": "X", "value": 1 }, { "id": "Y", "value": 1 }
              ]}
            ]}"#
        );

        raises!(
            InvalidTagValue,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 2, "tags": [
                { "id": "X", "value": 4 }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_size_fields() {
        raises!(
            UndeclaredSizeIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "size_field", "field_id": "_payload_", "width": 8 }
              ]}
            ]}"#
        );

        raises!(
            InvalidSizeIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "size_field", "field_id": "x", "width": 8 },
                { "kind": "scalar_field", "id": "x", "width": 8 }
              ]}
            ]}"#
        );

        raises!(
            DuplicateSizeField,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "size_field", "field_id": "_payload_", "width": 8 },
                { "kind": "size_field", "field_id": "_payload_", "width": 8 },
                { "kind": "payload_field" }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_fixed_fields() {
        raises!(
            FixedValueOutOfRange,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "fixed_scalar_field", "width": 8, "value": 256 }
              ]}
            ]}"#
        );

        raises!(
            UndeclaredTagIdentifier,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 8, "tags": [
                { "id": "X", "value": 0 }
              ]},
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "fixed_enum_field", "enum_id": "E", "tag_id": "Y" }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_payload_fields() {
        raises!(
            DuplicatePayloadField,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "payload_field" },
                { "kind": "body_field" }
              ]}
            ]}"#
        );

        raises!(
            MissingPayloadField,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A", "fields": [
                { "kind": "scalar_field", "id": "y", "width": 8 }
              ]}
            ]}"#
        );

        valid!(
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 8 }
              ]},
              { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                "constraints": [{ "id": "x", "value": 1 }], "fields": [] }
            ]}"#
        );
    }

    #[test]
    fn test_field_offsets() {
        raises!(
            InvalidFieldOffset,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 4 },
                { "kind": "payload_field" },
                { "kind": "scalar_field", "id": "y", "width": 4 }
              ]}
            ]}"#
        );

        raises!(
            InvalidPacketSize,
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "x", "width": 4 }
              ]}
            ]}"#
        );
    }

    #[test]
    fn test_scope_field_size() {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(
            &mut db,
            "stdin",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "enum_declaration", "id": "E", "width": 12, "tags": [] },
              { "kind": "custom_field_declaration", "id": "T" },
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "enum_field", "id": "e", "enum_id": "E" },
                { "kind": "reserved_field", "width": 4 },
                { "kind": "custom_field", "id": "t", "type_id": "T" },
                { "kind": "payload_field" }
              ]}
            ]}"#
            .to_owned(),
        )
        .unwrap();
        let scope = analyzer::analyze(&file).unwrap();
        let decl = scope.typedef["A"];
        let sizes: Vec<_> = decl.fields().map(|field| scope.field_size(decl, field)).collect();
        assert_that!(
            sizes,
            eq(vec![
                analyzer::Size::Static(12),
                analyzer::Size::Static(4),
                analyzer::Size::Dynamic,
                analyzer::Size::Unknown
            ])
        );
    }
}
