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

//! Packet definition tree.

use codespan_reporting::diagnostic;
use codespan_reporting::files;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// File identifier.
/// References a source file in the source database.
pub type FileId = usize;

/// Source database.
/// Stores the source file contents for reference.
pub type SourceDatabase = files::SimpleFiles<String, String>;

/// Identifier of the payload pseudo-field, used by size fields.
pub const PAYLOAD_ID: &str = "_payload_";
/// Identifier of the body pseudo-field, used by size fields.
pub const BODY_ID: &str = "_body_";

/// Byte range of a declaration in its source file.
/// Not part of the serialized tree; filled in by the parser.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub file: FileId,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndiannessValue {
    LittleEndian,
    BigEndian,
}

impl From<EndiannessValue> for packetdef_runtime::Endianness {
    fn from(value: EndiannessValue) -> Self {
        match value {
            EndiannessValue::LittleEndian => packetdef_runtime::Endianness::Little,
            EndiannessValue::BigEndian => packetdef_runtime::Endianness::Big,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub value: u64,
}

/// Value imposed on an inherited field by a derived packet.
/// Scalar fields are constrained with `value`, enum fields with `tag_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Field {
    #[serde(rename = "scalar_field")]
    Scalar { id: String, width: usize },
    #[serde(rename = "enum_field")]
    Enum { id: String, enum_id: String },
    #[serde(rename = "custom_field")]
    Custom { id: String, type_id: String },
    #[serde(rename = "fixed_scalar_field")]
    FixedScalar { width: usize, value: u64 },
    #[serde(rename = "fixed_enum_field")]
    FixedEnum { enum_id: String, tag_id: String },
    #[serde(rename = "reserved_field")]
    Reserved { width: usize },
    /// Octet size of the payload or body field `field_id`.
    #[serde(rename = "size_field")]
    Size { field_id: String, width: usize },
    /// Opaque bytes, refined by derived packets.
    /// The size field, if any, stores the payload size plus the modifier.
    #[serde(rename = "payload_field")]
    Payload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_modifier: Option<usize>,
    },
    /// Like the payload, but only derived packets can be built.
    #[serde(rename = "body_field")]
    Body,
    /// Zero width marker opening the byte range covered by the
    /// checksum field `field_id`.
    #[serde(rename = "checksum_start_field")]
    ChecksumStart { field_id: String },
    #[serde(rename = "checksum_field")]
    Checksum { id: String, checksum_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Decl {
    #[serde(rename = "checksum_declaration")]
    Checksum {
        #[serde(skip)]
        loc: SourceRange,
        id: String,
        width: usize,
    },
    /// Custom field types have a fixed `width` in bits, or a size
    /// computed at runtime from the buffer contents.
    #[serde(rename = "custom_field_declaration")]
    CustomField {
        #[serde(skip)]
        loc: SourceRange,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<usize>,
    },
    #[serde(rename = "enum_declaration")]
    Enum {
        #[serde(skip)]
        loc: SourceRange,
        id: String,
        tags: Vec<Tag>,
        width: usize,
    },
    #[serde(rename = "packet_declaration")]
    Packet {
        #[serde(skip)]
        loc: SourceRange,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        constraints: Vec<Constraint>,
        fields: Vec<Field>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub endianness: EndiannessValue,
    pub declarations: Vec<Decl>,
}

impl SourceRange {
    pub fn primary(&self) -> diagnostic::Label<FileId> {
        diagnostic::Label::primary(self.file, self.start..self.end)
    }
    pub fn secondary(&self) -> diagnostic::Label<FileId> {
        diagnostic::Label::secondary(self.file, self.start..self.end)
    }
}

impl Decl {
    pub fn loc(&self) -> &SourceRange {
        match self {
            Decl::Checksum { loc, .. }
            | Decl::CustomField { loc, .. }
            | Decl::Enum { loc, .. }
            | Decl::Packet { loc, .. } => loc,
        }
    }

    pub fn loc_mut(&mut self) -> &mut SourceRange {
        match self {
            Decl::Checksum { loc, .. }
            | Decl::CustomField { loc, .. }
            | Decl::Enum { loc, .. }
            | Decl::Packet { loc, .. } => loc,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Decl::Checksum { id, .. }
            | Decl::CustomField { id, .. }
            | Decl::Enum { id, .. }
            | Decl::Packet { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decl::Checksum { .. } => "checksum",
            Decl::CustomField { .. } => "custom field",
            Decl::Enum { .. } => "enum",
            Decl::Packet { .. } => "packet",
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Decl::Packet { parent_id, .. } => parent_id.as_deref(),
            _ => None,
        }
    }

    pub fn constraints(&self) -> std::slice::Iter<'_, Constraint> {
        match self {
            Decl::Packet { constraints, .. } => constraints.iter(),
            _ => [].iter(),
        }
    }

    pub fn fields(&self) -> std::slice::Iter<'_, Field> {
        match self {
            Decl::Packet { fields, .. } => fields.iter(),
            _ => [].iter(),
        }
    }

    /// Return the payload or body field, if any.
    pub fn payload(&self) -> Option<&Field> {
        self.fields().find(|field| matches!(field, Field::Payload { .. } | Field::Body))
    }

    /// Position of the payload or body field in the field list.
    pub fn payload_index(&self) -> Option<usize> {
        self.fields().position(|field| matches!(field, Field::Payload { .. } | Field::Body))
    }

    /// Return the size field targeting the payload or body, if any.
    pub fn payload_size(&self) -> Option<&Field> {
        self.fields().find(|field| {
            matches!(
                field,
                Field::Size { field_id, .. } if field_id == PAYLOAD_ID || field_id == BODY_ID
            )
        })
    }

    /// Whether the packet ends with an opaque body which only derived
    /// packets can fill.
    pub fn has_body(&self) -> bool {
        self.fields().any(|field| matches!(field, Field::Body))
    }

    /// Position of the field with the selected identifier.
    pub fn field_index(&self, id: &str) -> Option<usize> {
        self.fields().position(|field| field.id() == Some(id))
    }
}

impl Field {
    /// Identifier of named fields. Payload and body fields are named
    /// after their pseudo identifiers.
    pub fn id(&self) -> Option<&str> {
        match self {
            Field::Scalar { id, .. }
            | Field::Enum { id, .. }
            | Field::Custom { id, .. }
            | Field::Checksum { id, .. } => Some(id),
            Field::Payload { .. } => Some(PAYLOAD_ID),
            Field::Body => Some(BODY_ID),
            Field::FixedScalar { .. }
            | Field::FixedEnum { .. }
            | Field::Reserved { .. }
            | Field::Size { .. }
            | Field::ChecksumStart { .. } => None,
        }
    }

    /// Name used to report the field in diagnostics.
    pub fn label(&self) -> Cow<'_, str> {
        match self {
            Field::FixedScalar { value, .. } => Cow::Owned(format!("_fixed_ = {value}")),
            Field::FixedEnum { enum_id, tag_id } => {
                Cow::Owned(format!("_fixed_ = {tag_id} : {enum_id}"))
            }
            Field::Reserved { width } => Cow::Owned(format!("_reserved_ : {width}")),
            Field::Size { field_id, .. } => Cow::Owned(format!("_size_({field_id})")),
            Field::ChecksumStart { field_id } => {
                Cow::Owned(format!("_checksum_start_({field_id})"))
            }
            _ => Cow::Borrowed(self.id().unwrap_or_default()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Field::Scalar { .. } => "scalar",
            Field::Enum { .. } => "enum",
            Field::Custom { .. } => "custom",
            Field::FixedScalar { .. } | Field::FixedEnum { .. } => "fixed",
            Field::Reserved { .. } => "reserved",
            Field::Size { .. } => "size",
            Field::Payload { .. } => "payload",
            Field::Body => "body",
            Field::ChecksumStart { .. } => "checksum start",
            Field::Checksum { .. } => "checksum",
        }
    }

    /// Whether the field value is supplied to the packet builder.
    pub fn is_parameter(&self) -> bool {
        matches!(self, Field::Scalar { .. } | Field::Enum { .. } | Field::Custom { .. })
    }
}

impl File {
    /// Iterate over the packet declarations.
    pub fn packets(&self) -> impl Iterator<Item = &Decl> {
        self.declarations.iter().filter(|decl| matches!(decl, Decl::Packet { .. }))
    }

    /// Iterate over the children of the selected declaration.
    pub fn iter_children<'d>(&'d self, decl: &'d Decl) -> impl Iterator<Item = &'d Decl> + 'd {
        let id = decl.id();
        self.declarations.iter().filter(move |decl| decl.parent_id() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn field_kinds_are_tagged() {
        let field: Field =
            serde_json::from_str(r#"{ "kind": "size_field", "field_id": "_payload_", "width": 8 }"#)
                .unwrap();
        assert_eq!(field, Field::Size { field_id: PAYLOAD_ID.to_owned(), width: 8 });
        let field: Field = serde_json::from_str(r#"{ "kind": "body_field" }"#).unwrap();
        assert_eq!(field, Field::Body);
        let field: Field = serde_json::from_str(r#"{ "kind": "payload_field" }"#).unwrap();
        assert_eq!(field, Field::Payload { size_modifier: None });
    }

    #[test]
    fn unnamed_fields_have_labels() {
        let field = Field::ChecksumStart { field_id: "crc".to_owned() };
        assert_eq!(field.id(), None);
        assert_eq!(field.label(), "_checksum_start_(crc)");
        assert_eq!(Field::Body.label(), "_body_");
    }

    #[test]
    fn payload_lookup() {
        let decl = Decl::Packet {
            loc: Default::default(),
            id: "A".to_owned(),
            parent_id: None,
            constraints: vec![],
            fields: vec![
                Field::Size { field_id: BODY_ID.to_owned(), width: 8 },
                Field::Scalar { id: "x".to_owned(), width: 8 },
                Field::Body,
            ],
        };
        assert_that!(decl.payload_index(), some(eq(2)));
        assert_that!(decl.field_index("x"), some(eq(1)));
        assert!(decl.has_body());
        assert!(decl.payload_size().is_some());
    }
}
