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

//! Compiled packet schema.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analyzer::{self, Diagnostics};
use crate::ast::{self, Decl, EndiannessValue};
use crate::builder::{self, BuilderPlan};
use crate::layout::Layout;
use crate::view::{self, ViewPlan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumSchema {
    pub width: usize,
    pub tags: Vec<ast::Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketSchema {
    pub id: String,
    pub parent_id: Option<String>,
    pub view: ViewPlan,
    pub builder: BuilderPlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub endianness: EndiannessValue,
    pub enums: BTreeMap<String, EnumSchema>,
    /// Custom field types, with their width in bits when fixed.
    pub custom_fields: BTreeMap<String, Option<usize>>,
    /// Checksum types, with their width in bits.
    pub checksums: BTreeMap<String, usize>,
    /// Packets, in declaration order.
    pub packets: Vec<PacketSchema>,
}

impl Schema {
    pub fn packet(&self, id: &str) -> Option<&PacketSchema> {
        self.packets.iter().find(|packet| packet.id == id)
    }

    /// Iterate over the packet and its parents, starting with the
    /// packet itself.
    pub fn iter_parents_and_self<'s>(
        &'s self,
        id: &str,
    ) -> impl Iterator<Item = &'s PacketSchema> + 's {
        std::iter::successors(self.packet(id), |packet| {
            packet.parent_id.as_deref().and_then(|parent_id| self.packet(parent_id))
        })
    }

    /// Iterate over the packets directly derived from `id`.
    pub fn iter_children<'s>(&'s self, id: &'s str) -> impl Iterator<Item = &'s PacketSchema> + 's {
        self.packets.iter().filter(move |packet| packet.parent_id.as_deref() == Some(id))
    }

    /// Return the tag of an enum with the selected value.
    pub fn tag_id(&self, enum_id: &str, value: u64) -> Option<&str> {
        let tags = &self.enums.get(enum_id)?.tags;
        tags.iter().find(|tag| tag.value == value).map(|tag| tag.id.as_str())
    }

    /// Return the value of an enum tag.
    pub fn tag_value(&self, enum_id: &str, tag_id: &str) -> Option<u64> {
        let tags = &self.enums.get(enum_id)?.tags;
        tags.iter().find(|tag| tag.id == tag_id).map(|tag| tag.value)
    }
}

fn compile_packet(layout: &Layout, decl: &Decl) -> Result<PacketSchema, Diagnostics> {
    let builder = builder::compile(layout, decl)?;
    let view = view::compile(layout, decl)?;
    log::debug!(
        "compiled `{}`: {} accessors, {} builder parameters",
        decl.id(),
        view.accessors.len(),
        builder.constructor.parameters.len()
    );
    Ok(PacketSchema {
        id: decl.id().to_owned(),
        parent_id: decl.parent_id().map(str::to_owned),
        view,
        builder,
    })
}

/// Analyze the definition file and compile the views and builders of
/// all packets.
///
/// Packets are compiled after their parents, and are skipped when a
/// parent fails to compile. All diagnostics are returned.
pub fn compile(file: &ast::File) -> Result<Schema, Diagnostics> {
    let scope = analyzer::analyze(file)?;
    let layout = Layout::new(&scope);

    let mut packets: Vec<&Decl> = file.packets().collect();
    packets.sort_by_key(|decl| scope.iter_parents(decl).count());

    let mut diagnostics = Diagnostics::default();
    let mut failed = HashSet::new();
    let mut compiled = HashMap::new();
    for decl in packets {
        if scope.iter_parents(decl).any(|parent| failed.contains(parent.id())) {
            log::debug!("skipping `{}`, a parent failed to compile", decl.id());
            failed.insert(decl.id());
            continue;
        }
        match compile_packet(&layout, decl) {
            Ok(packet) => {
                compiled.insert(decl.id(), packet);
            }
            Err(errors) => {
                failed.insert(decl.id());
                diagnostics.extend(errors);
            }
        }
    }
    diagnostics.err_or(())?;

    let mut enums = BTreeMap::new();
    let mut custom_fields = BTreeMap::new();
    let mut checksums = BTreeMap::new();
    for decl in &file.declarations {
        match decl {
            Decl::Enum { id, tags, width, .. } => {
                enums.insert(id.clone(), EnumSchema { width: *width, tags: tags.clone() });
            }
            Decl::CustomField { id, width, .. } => {
                custom_fields.insert(id.clone(), *width);
            }
            Decl::Checksum { id, width, .. } => {
                checksums.insert(id.clone(), *width);
            }
            Decl::Packet { .. } => (),
        }
    }

    Ok(Schema {
        endianness: file.endianness,
        enums,
        custom_fields,
        checksums,
        packets: file.packets().filter_map(|decl| compiled.remove(decl.id())).collect(),
    })
}

/// Remove the selected declarations, and the packets derived from
/// them, from the definition file.
pub fn exclude_declarations(file: &ast::File, excluded: &[String]) -> ast::File {
    let mut removed: HashSet<&str> = excluded.iter().map(String::as_str).collect();
    // Parents can be declared after their children.
    loop {
        let count = removed.len();
        for decl in &file.declarations {
            if decl.parent_id().is_some_and(|parent_id| removed.contains(parent_id)) {
                removed.insert(decl.id());
            }
        }
        if removed.len() == count {
            break;
        }
    }
    ast::File {
        endianness: file.endianness,
        declarations: file
            .declarations
            .iter()
            .filter(|decl| !removed.contains(decl.id()))
            .cloned()
            .collect(),
    }
}
