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

//! Packet interpreter.
//!
//! Executes the compiled views and builders of a [`Schema`] against
//! byte buffers, without generating code. Custom field types and
//! checksum algorithms are supplied through a [`Registry`].

use bytes::{BufMut, Bytes};
use packetdef_runtime::{self as runtime, Checksum, Endianness, ValidityCache};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builder::{
    Argument, BuilderPlan, ConstraintValue, Encoding, ParameterCheck, ParameterKind,
};
use crate::layout::{Position, RuntimeSize, SizeExpr};
use crate::schema::{PacketSchema, Schema};
use crate::validity::{FieldCheck, Step};
use crate::view::{Accessor, AccessorKind, CustomSize, Span};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown packet `{0}`")]
    UnknownPacket(String),
    #[error("packet `{packet}` has no field `{field}`")]
    UnknownField { packet: String, field: String },
    #[error("no {capability} is registered for `{type_id}`")]
    MissingCapability { capability: &'static str, type_id: String },
    #[error("`{packet}` expects {expected} arguments, {actual} were provided")]
    ArgumentCount { packet: String, expected: usize, actual: usize },
    #[error("invalid value for {packet}::{field}: {reason}")]
    InvalidArgument { packet: String, field: String, reason: String },
    #[error("`{0}` ends with a body, only its derived packets can be built")]
    AbstractPacket(String),
    #[error("packet validation failed")]
    InvalidPacket,
    #[error(
        "the size of {packet}::{field} ({size}) is outside the range of valid values 0..{maximum_size}"
    )]
    SizeOverflow { packet: String, field: String, size: usize, maximum_size: u64 },
    #[error(transparent)]
    Encode(#[from] runtime::EncodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Field value read from a view, or passed to a builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(u64),
    /// Enum value, by tag identifier.
    Tag(String),
    /// Custom field or payload bytes.
    Bytes(Bytes),
}

impl Value {
    pub fn as_scalar(&self) -> Option<u64> {
        match self {
            Value::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<&str> {
        match self {
            Value::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Scalar(value)
    }
}

impl From<&str> for Value {
    fn from(tag: &str) -> Self {
        Value::Tag(tag.to_owned())
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes.into())
    }
}

impl From<&ConstraintValue> for Value {
    fn from(value: &ConstraintValue) -> Self {
        match value {
            ConstraintValue::Scalar { value } => Value::Scalar(*value),
            ConstraintValue::Tag { tag_id, .. } => Value::Tag(tag_id.clone()),
        }
    }
}

type SizeFn = dyn Fn(&[u8]) -> Option<usize> + Send + Sync;
type ValidatorFn = dyn Fn(&[u8]) -> bool + Send + Sync;
type ChecksumFactory = dyn Fn() -> Box<dyn Checksum> + Send + Sync;

/// Capabilities of the custom field and checksum types.
#[derive(Clone, Default)]
pub struct Registry {
    sizes: HashMap<String, Arc<SizeFn>>,
    validators: HashMap<String, Arc<ValidatorFn>>,
    checksums: HashMap<String, Arc<ChecksumFactory>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sizes", &self.sizes.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("checksums", &self.checksums.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the size function of a custom field type. The function
    /// receives the buffer from the first octet of the field and
    /// returns the field size in octets.
    pub fn with_custom_size(
        mut self,
        type_id: &str,
        size: impl Fn(&[u8]) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        self.sizes.insert(type_id.to_owned(), Arc::new(size));
        self
    }

    /// Register the validator of a custom field type, run on the field
    /// bytes by views and builders.
    pub fn with_custom_validator(
        mut self,
        type_id: &str,
        validator: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validators.insert(type_id.to_owned(), Arc::new(validator));
        self
    }

    /// Register the accumulator of a checksum type.
    pub fn with_checksum<C: Checksum + Default + 'static>(mut self, checksum_id: &str) -> Self {
        self.checksums
            .insert(checksum_id.to_owned(), Arc::new(|| Box::<C>::default() as Box<dyn Checksum>));
        self
    }
}

/// Compiled schema bound to the capabilities it requires.
#[derive(Debug)]
pub struct Context<'s> {
    schema: &'s Schema,
    registry: Registry,
    endianness: Endianness,
}

impl<'s> Context<'s> {
    /// Fails if a dynamic custom field or a checksum used by the
    /// schema has no registered capability.
    pub fn new(schema: &'s Schema, registry: Registry) -> Result<Self> {
        for packet in &schema.packets {
            for encoding in &packet.builder.fields {
                match encoding {
                    Encoding::Custom { type_id, width: None, .. }
                        if !registry.sizes.contains_key(type_id) =>
                    {
                        return Err(Error::MissingCapability {
                            capability: "size function",
                            type_id: type_id.clone(),
                        })
                    }
                    Encoding::Checksum { checksum_id, .. }
                        if !registry.checksums.contains_key(checksum_id) =>
                    {
                        return Err(Error::MissingCapability {
                            capability: "checksum",
                            type_id: checksum_id.clone(),
                        })
                    }
                    _ => (),
                }
            }
        }
        Ok(Context { schema, registry, endianness: schema.endianness.into() })
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    fn packet(&self, id: &str) -> Result<&'s PacketSchema> {
        self.schema.packet(id).ok_or_else(|| Error::UnknownPacket(id.to_owned()))
    }

    /// Create a view of the packet `id` over `bytes`.
    pub fn view(&self, id: &str, bytes: impl Into<Bytes>) -> Result<View<'_>> {
        View::new(self, id, bytes.into())
    }
}

/// Read-only view of a packet buffer.
///
/// Fields can be read only once the view is known valid. A valid
/// result is remembered by the view, an invalid one is recomputed on
/// the next access. The parent views share the same buffer.
#[derive(Debug, Clone)]
pub struct View<'c> {
    ctx: &'c Context<'c>,
    packet: &'c PacketSchema,
    buf: Bytes,
    validity: ValidityCache,
    parent: Option<Box<View<'c>>>,
}

impl<'c> View<'c> {
    fn new(ctx: &'c Context<'c>, id: &str, buf: Bytes) -> Result<Self> {
        let packet = ctx.packet(id)?;
        let parent = match &packet.parent_id {
            Some(parent_id) => Some(Box::new(View::new(ctx, parent_id, buf.clone())?)),
            None => None,
        };
        Ok(View { ctx, packet, buf, validity: ValidityCache::new(), parent })
    }

    pub fn id(&self) -> &str {
        &self.packet.id
    }

    pub fn bytes(&self) -> &Bytes {
        &self.buf
    }

    /// View of the parent packet.
    pub fn parent(&self) -> Option<&View<'c>> {
        self.parent.as_deref()
    }

    /// Return a view of the derived packet `id` over the same buffer.
    /// The validity of this view is kept.
    pub fn specialize(&self, id: &str) -> Result<View<'c>> {
        let packet = self.ctx.packet(id)?;
        if packet.parent_id.as_deref() != Some(self.id()) {
            return Err(Error::UnknownPacket(id.to_owned()));
        }
        Ok(View {
            ctx: self.ctx,
            packet,
            buf: self.buf.clone(),
            validity: ValidityCache::new(),
            parent: Some(Box::new(self.clone())),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.validity.check(|| self.check())
    }

    /// Read a field of the packet or its parents.
    pub fn get(&self, field_id: &str) -> Result<Value> {
        if !self.is_valid() {
            return Err(Error::InvalidPacket);
        }
        let (view, accessor) = self.find_accessor(field_id).ok_or_else(|| Error::UnknownField {
            packet: self.id().to_owned(),
            field: field_id.to_owned(),
        })?;
        view.read_accessor(accessor).ok_or(Error::InvalidPacket)
    }

    /// Return the payload or body bytes of the packet.
    pub fn payload(&self) -> Result<Bytes> {
        let accessor = self
            .packet
            .view
            .accessors
            .iter()
            .find(|accessor| matches!(accessor.kind, AccessorKind::Payload { .. }))
            .ok_or_else(|| Error::UnknownField {
                packet: self.id().to_owned(),
                field: crate::ast::PAYLOAD_ID.to_owned(),
            })?;
        match self.get(&accessor.field_id)? {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Error::InvalidPacket),
        }
    }

    fn find_accessor(&self, field_id: &str) -> Option<(&View<'c>, &'c Accessor)> {
        match self.packet.view.accessor(field_id) {
            Some(accessor) => Some((self, accessor)),
            None => self.parent.as_deref()?.find_accessor(field_id),
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn read(&self, position: &Position, width: usize) -> Option<u64> {
        let offset = position.bit_offset(self.len())?;
        runtime::read_bits(&self.buf, offset, width, self.ctx.endianness).ok()
    }

    fn slice(&self, start: usize, end: usize) -> Option<Bytes> {
        (start <= end && end <= self.len()).then(|| self.buf.slice(start..end))
    }

    fn custom_size(&self, type_id: &str, offset: usize) -> Option<usize> {
        let size = self.ctx.registry.sizes.get(type_id)?;
        size(self.buf.get(offset..)?)
    }

    /// Evaluate a dynamic size, in octets.
    fn eval_size(&self, size: &SizeExpr) -> Option<usize> {
        match size {
            SizeExpr::SizeField { position, width, modifier } => {
                usize::try_from(self.read(position, *width)?).ok()?.checked_sub(*modifier)
            }
            SizeExpr::Custom { type_id, offset } => self.custom_size(type_id, *offset),
        }
    }

    /// Evaluate a segment size, in bits.
    fn eval_runtime_size(&self, size: &RuntimeSize) -> Option<usize> {
        size.variable.iter().try_fold(size.constant, |bits, size| {
            bits.checked_add(self.eval_size(size)?.checked_mul(8)?)
        })
    }

    fn read_accessor(&self, accessor: &Accessor) -> Option<Value> {
        match &accessor.kind {
            AccessorKind::Scalar { position, width }
            | AccessorKind::Checksum { position, width, .. } => {
                self.read(position, *width).map(Value::Scalar)
            }
            AccessorKind::Enum { position, width, enum_id } => {
                let value = self.read(position, *width)?;
                self.ctx.schema.tag_id(enum_id, value).map(|tag| Value::Tag(tag.to_owned()))
            }
            AccessorKind::Custom { position, size, .. } => {
                let start = position.bit_offset(self.len())? / 8;
                let size = match size {
                    CustomSize::Static { size } => *size,
                    CustomSize::Dynamic { type_id } => self.custom_size(type_id, start)?,
                };
                self.slice(start, start.checked_add(size)?).map(Value::Bytes)
            }
            AccessorKind::Payload { span } => {
                let (start, end) = match span {
                    Span::Sized { start, size } => {
                        (*start, start.checked_add(self.eval_size(size)?)?)
                    }
                    Span::Bounded { start, end } => (*start, self.len().checked_sub(*end)?),
                    Span::Trailing { end, size } => {
                        let end = self.len().checked_sub(*end)?;
                        (end.checked_sub(self.eval_size(size)?)?, end)
                    }
                };
                self.slice(start, end).map(Value::Bytes)
            }
        }
    }

    fn check_checksum(
        &self,
        checksum_id: &str,
        start: &Position,
        end: &Position,
        width: usize,
    ) -> Option<bool> {
        let start = start.bit_offset(self.len())? / 8;
        let end_octet = end.bit_offset(self.len())? / 8;
        let bytes = self.buf.get(start..end_octet)?;
        let mut checksum = self.ctx.registry.checksums.get(checksum_id)?();
        let computed = runtime::fold(checksum.as_mut(), bytes) & runtime::max_value(width);
        Some(self.read(end, width)? == computed)
    }

    fn check_field(&self, check: &FieldCheck) -> bool {
        match check {
            FieldCheck::Enum { field_id, .. } => self.get(field_id).is_ok(),
            FieldCheck::Fixed { position, width, value } => {
                self.read(position, *width) == Some(*value)
            }
            FieldCheck::Custom { field_id, type_id } => {
                match (self.get(field_id), self.ctx.registry.validators.get(type_id)) {
                    (Ok(Value::Bytes(bytes)), Some(validator)) => validator(&bytes[..]),
                    (Ok(_), None) => true,
                    _ => false,
                }
            }
        }
    }

    fn check(&self) -> bool {
        if let Some(parent) = &self.parent {
            if !parent.is_valid() {
                log::trace!("{}: parent view is invalid", self.id());
                return false;
            }
        }

        let procedure = &self.packet.view.validity;
        let bits = self.len() * 8;
        let cursor = self
            .eval_runtime_size(&procedure.parent_size)
            .and_then(|parent_size| parent_size.checked_add(procedure.static_size));
        let mut cursor = match cursor {
            Some(cursor) if cursor <= bits => cursor,
            _ => {
                log::trace!("{}: {:?} bits required, {} available", self.id(), cursor, bits);
                return false;
            }
        };

        for step in &procedure.steps {
            match step {
                Step::Checksum { field_id, checksum_id, start, end, width } => {
                    if self.check_checksum(checksum_id, start, end, *width) != Some(true) {
                        log::trace!("{}: checksum `{}` mismatch", self.id(), field_id);
                        return false;
                    }
                }
                Step::Size { field_id, size } => {
                    let end = self
                        .eval_size(size)
                        .and_then(|size| size.checked_mul(8))
                        .and_then(|size| cursor.checked_add(size));
                    match end {
                        Some(end) if end <= bits => cursor = end,
                        _ => {
                            log::trace!("{}: invalid size for `{}`", self.id(), field_id);
                            return false;
                        }
                    }
                }
            }
        }

        for constraint in &procedure.constraints {
            if self.get(&constraint.field_id) != Ok(Value::from(&constraint.value)) {
                log::trace!("{}: constraint on `{}` not met", self.id(), constraint.field_id);
                return false;
            }
        }

        procedure.field_checks.iter().all(|check| self.check_field(check))
    }
}

/// Fields of a builder level.
#[derive(Debug, Clone)]
struct Level<'c> {
    plan: &'c BuilderPlan,
    members: HashMap<String, Value>,
}

/// Packet builder.
///
/// The arguments are validated when the builder is created; a builder
/// only fails to encode when a size field overflows.
#[derive(Debug, Clone)]
pub struct Builder<'c> {
    ctx: &'c Context<'c>,
    /// Levels from the root packet to the built packet.
    levels: Vec<Level<'c>>,
    payload: Bytes,
}

impl<'c> Builder<'c> {
    /// Create a builder from the full list of parameters of the packet
    /// `id`, parent parameters first.
    pub fn create(
        ctx: &'c Context<'c>,
        id: &str,
        arguments: Vec<Value>,
        payload: Option<Bytes>,
    ) -> Result<Self> {
        let packet = ctx.packet(id)?;
        let factory =
            packet.builder.factory.as_ref().ok_or_else(|| Error::AbstractPacket(id.to_owned()))?;
        if arguments.len() != factory.len() {
            return Err(Error::ArgumentCount {
                packet: id.to_owned(),
                expected: factory.len(),
                actual: arguments.len(),
            });
        }
        let arguments =
            factory.iter().map(|parameter| parameter.id.clone()).zip(arguments).collect();
        Self::construct(ctx, packet, arguments, payload)
    }

    /// Create a builder from parameters passed by name.
    pub fn create_named<'a>(
        ctx: &'c Context<'c>,
        id: &str,
        arguments: impl IntoIterator<Item = (&'a str, Value)>,
        payload: Option<Bytes>,
    ) -> Result<Self> {
        let packet = ctx.packet(id)?;
        let factory =
            packet.builder.factory.as_ref().ok_or_else(|| Error::AbstractPacket(id.to_owned()))?;
        let arguments: HashMap<String, Value> =
            arguments.into_iter().map(|(name, value)| (name.to_owned(), value)).collect();
        if let Some(name) =
            arguments.keys().find(|name| !factory.iter().any(|parameter| &parameter.id == *name))
        {
            return Err(Error::UnknownField { packet: id.to_owned(), field: name.clone() });
        }
        if arguments.len() != factory.len() {
            return Err(Error::ArgumentCount {
                packet: id.to_owned(),
                expected: factory.len(),
                actual: arguments.len(),
            });
        }
        Self::construct(ctx, packet, arguments, payload)
    }

    fn construct(
        ctx: &'c Context<'c>,
        packet: &'c PacketSchema,
        mut arguments: HashMap<String, Value>,
        payload: Option<Bytes>,
    ) -> Result<Self> {
        if payload.is_some() && !packet.builder.has_payload {
            return Err(Error::InvalidArgument {
                packet: packet.id.clone(),
                field: crate::ast::PAYLOAD_ID.to_owned(),
                reason: "the packet has no payload".to_owned(),
            });
        }

        let mut levels = Vec::new();
        let mut plan = &packet.builder;
        loop {
            let mut members = HashMap::new();
            for parameter in &plan.constructor.members {
                let value = take(&mut arguments, plan, &parameter.id)?;
                let value = convert(plan, &parameter.kind, &parameter.id, value)?;
                members.insert(parameter.id.clone(), value);
            }
            check_parameters(ctx, plan, &members)?;

            let delegation = plan.constructor.delegation.as_ref();
            let mut parent_arguments = HashMap::new();
            for argument in delegation.iter().flat_map(|delegation| &delegation.arguments) {
                let (id, value) = match argument {
                    Argument::Forward { id } => {
                        (id.clone(), take(&mut arguments, plan, id)?)
                    }
                    Argument::Constant { id, value } => {
                        (id.clone(), Value::from(value))
                    }
                };
                parent_arguments.insert(id, value);
            }

            levels.push(Level { plan, members });
            match delegation {
                Some(delegation) => {
                    plan = &ctx.packet(&delegation.parent_id)?.builder;
                    arguments = parent_arguments;
                }
                None => break,
            }
        }
        levels.reverse();
        Ok(Builder { ctx, levels, payload: payload.unwrap_or_default() })
    }

    fn level_len(&self, level: &Level, body_len: usize) -> usize {
        let custom_len: usize = level
            .plan
            .fields
            .iter()
            .filter_map(|encoding| match encoding {
                Encoding::Custom { id, width: None, .. } => {
                    level.members.get(id).and_then(Value::as_bytes).map(Bytes::len)
                }
                _ => None,
            })
            .sum();
        level.plan.static_width() / 8 + custom_len + body_len
    }

    /// Return the length of the encoded packet.
    pub fn encoded_len(&self) -> usize {
        self.levels.iter().rev().fold(self.payload.len(), |len, level| self.level_len(level, len))
    }

    /// Return the integer stored for a scalar or enum member.
    fn member_value(&self, level: &Level, id: &str) -> Result<u64> {
        let invalid = |reason: &str| Error::InvalidArgument {
            packet: level.plan.id.clone(),
            field: id.to_owned(),
            reason: reason.to_owned(),
        };
        match level.members.get(id) {
            Some(Value::Scalar(value)) => Ok(*value),
            Some(Value::Tag(tag)) => level
                .plan
                .constructor
                .members
                .iter()
                .find_map(|parameter| match &parameter.kind {
                    ParameterKind::Enum { enum_id, .. } if parameter.id == id => {
                        self.ctx.schema.tag_value(enum_id, tag)
                    }
                    _ => None,
                })
                .ok_or_else(|| invalid("undeclared tag")),
            _ => Err(invalid("missing value")),
        }
    }

    fn encode_level(&self, level: &Level, body: &[u8]) -> Result<Vec<u8>> {
        let endianness = self.ctx.endianness;
        let mut buf = vec![0; self.level_len(level, body.len())];
        let mut offset = 0;
        let mut markers = HashMap::new();
        let mut checksums = Vec::new();

        for encoding in &level.plan.fields {
            match encoding {
                Encoding::Value { id, width } => {
                    let value = self.member_value(level, id)?;
                    runtime::write_bits(&mut buf, offset, *width, value, endianness)?;
                    offset += width;
                }
                Encoding::Custom { id, .. } => {
                    let bytes = level.members.get(id).and_then(Value::as_bytes).ok_or_else(|| {
                        Error::InvalidArgument {
                            packet: level.plan.id.clone(),
                            field: id.clone(),
                            reason: "missing value".to_owned(),
                        }
                    })?;
                    let start = offset / 8;
                    buf[start..start + bytes.len()].copy_from_slice(bytes);
                    offset += bytes.len() * 8;
                }
                Encoding::Constant { width, value } => {
                    runtime::write_bits(&mut buf, offset, *width, *value, endianness)?;
                    offset += width;
                }
                Encoding::Reserved { width } => offset += width,
                Encoding::Size { field_id, width, modifier } => {
                    let size = body.len() + modifier;
                    let maximum_size = runtime::max_value(*width);
                    if size as u64 > maximum_size {
                        return Err(Error::SizeOverflow {
                            packet: level.plan.id.clone(),
                            field: field_id.clone(),
                            size,
                            maximum_size,
                        });
                    }
                    runtime::write_bits(&mut buf, offset, *width, size as u64, endianness)?;
                    offset += width;
                }
                Encoding::Payload => {
                    let start = offset / 8;
                    buf[start..start + body.len()].copy_from_slice(body);
                    offset += body.len() * 8;
                }
                Encoding::ChecksumStart { field_id } => {
                    markers.insert(field_id.as_str(), offset / 8);
                }
                Encoding::Checksum { id, checksum_id, width } => {
                    checksums.push((id.as_str(), checksum_id.as_str(), offset, *width));
                    offset += width;
                }
            }
        }

        // Checksums cover the bytes written above.
        for (id, checksum_id, offset, width) in checksums {
            let start = markers.get(id).copied().unwrap_or(0);
            let factory = self.ctx.registry.checksums.get(checksum_id).ok_or_else(|| {
                Error::MissingCapability { capability: "checksum", type_id: checksum_id.to_owned() }
            })?;
            let mut checksum = factory();
            let value = runtime::fold(checksum.as_mut(), &buf[start..offset / 8]);
            let value = value & runtime::max_value(width);
            runtime::write_bits(&mut buf, offset, width, value, endianness)?;
        }
        Ok(buf)
    }

    /// Write the packet to an output buffer.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        let mut body = self.payload.to_vec();
        for level in self.levels.iter().rev() {
            body = self.encode_level(level, &body)?;
        }
        buf.put_slice(&body);
        Ok(())
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Consume the builder and return the encoded packet.
    pub fn build(self) -> Result<Bytes> {
        self.encode_to_vec().map(Bytes::from)
    }
}

fn take(arguments: &mut HashMap<String, Value>, plan: &BuilderPlan, id: &str) -> Result<Value> {
    arguments.remove(id).ok_or_else(|| Error::InvalidArgument {
        packet: plan.id.clone(),
        field: id.to_owned(),
        reason: "missing argument".to_owned(),
    })
}

/// Check the argument type against the parameter type. Scalars must
/// fit the backing integer of the field.
fn convert(plan: &BuilderPlan, kind: &ParameterKind, id: &str, value: Value) -> Result<Value> {
    let invalid = |reason: String| Error::InvalidArgument {
        packet: plan.id.clone(),
        field: id.to_owned(),
        reason,
    };
    match (kind, value) {
        (ParameterKind::Scalar { width }, Value::Scalar(value)) => {
            let backing = std::cmp::max(8, width.next_power_of_two());
            if value > runtime::max_value(backing) {
                return Err(invalid(format!("{value} does not fit a {backing} bit integer")));
            }
            Ok(Value::Scalar(value))
        }
        (ParameterKind::Enum { .. }, value @ (Value::Tag(_) | Value::Scalar(_))) => Ok(value),
        (ParameterKind::Custom { .. }, value @ Value::Bytes(_)) => Ok(value),
        (kind, value) => Err(invalid(format!("expected a {kind:?} value, got {value:?}"))),
    }
}

/// Run the parameter checks of a builder level.
fn check_parameters(
    ctx: &Context,
    plan: &BuilderPlan,
    members: &HashMap<String, Value>,
) -> Result<()> {
    for check in &plan.constructor.checks {
        let invalid = |reason: String| Error::InvalidArgument {
            packet: plan.id.clone(),
            field: check.id().to_owned(),
            reason,
        };
        let value = members.get(check.id()).ok_or_else(|| invalid("missing value".to_owned()))?;
        match (check, value) {
            (ParameterCheck::Range { maximum, .. }, Value::Scalar(value)) if value > maximum => {
                return Err(invalid(format!("{value} exceeds the maximum value {maximum}")))
            }
            (ParameterCheck::Range { .. }, _) => (),
            (ParameterCheck::Tag { enum_id, .. }, Value::Tag(tag))
                if ctx.schema.tag_value(enum_id, tag).is_none() =>
            {
                return Err(invalid(format!("`{tag}` is not a tag of `{enum_id}`")))
            }
            (ParameterCheck::Tag { enum_id, .. }, Value::Scalar(value))
                if ctx.schema.tag_id(enum_id, *value).is_none() =>
            {
                return Err(invalid(format!("{value} is not a value of `{enum_id}`")))
            }
            (ParameterCheck::Tag { .. }, _) => (),
            (ParameterCheck::Custom { type_id, size, .. }, Value::Bytes(bytes)) => {
                let expected_size = match size {
                    Some(size) => Some(*size),
                    None => ctx.registry.sizes.get(type_id).and_then(|size| size(&bytes[..])),
                };
                if expected_size != Some(bytes.len()) {
                    return Err(invalid(format!(
                        "{} bytes do not encode a `{}` value",
                        bytes.len(),
                        type_id
                    )));
                }
                if let Some(validator) = ctx.registry.validators.get(type_id) {
                    if !validator(&bytes[..]) {
                        return Err(invalid(format!("rejected by the `{type_id}` validator")));
                    }
                }
            }
            (ParameterCheck::Custom { .. }, _) => (),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::parser::parse_inline;
    use crate::schema;
    use googletest::prelude::*;
    use packetdef_runtime::ByteSum;

    fn compile(text: &str) -> Schema {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(&mut db, "stdin", text.to_owned()).expect("parsing failure");
        schema::compile(&file).expect("compilation failure")
    }

    const CHECKSUM: &str = r#"{ "endianness": "little_endian", "declarations": [
      { "kind": "checksum_declaration", "id": "Sum", "width": 16 },
      { "kind": "packet_declaration", "id": "P", "fields": [
        { "kind": "checksum_start_field", "field_id": "c" },
        { "kind": "scalar_field", "id": "a", "width": 8 },
        { "kind": "checksum_field", "id": "c", "checksum_id": "Sum" }
      ]}
    ]}"#;

    #[test]
    fn missing_capability() {
        let schema = compile(CHECKSUM);
        assert_that!(
            Context::new(&schema, Registry::new()).map(|_| ()),
            err(eq(Error::MissingCapability { capability: "checksum", type_id: "Sum".to_owned() }))
        );
    }

    #[test]
    fn checksum_validation() {
        let schema = compile(CHECKSUM);
        let ctx = Context::new(&schema, Registry::new().with_checksum::<ByteSum>("Sum")).unwrap();

        let view = ctx.view("P", vec![0x05, 0x05, 0x00]).unwrap();
        assert!(view.is_valid());
        assert_that!(view.get("a"), ok(eq(Value::Scalar(5))));
        assert_that!(view.get("c"), ok(eq(Value::Scalar(5))));

        let view = ctx.view("P", vec![0x05, 0xff, 0x00]).unwrap();
        assert!(!view.is_valid());
        assert_that!(view.get("a"), err(eq(Error::InvalidPacket)));
    }

    #[test]
    fn checksum_is_computed() {
        let schema = compile(CHECKSUM);
        let ctx = Context::new(&schema, Registry::new().with_checksum::<ByteSum>("Sum")).unwrap();
        let builder = Builder::create(&ctx, "P", vec![Value::Scalar(0x42)], None).unwrap();
        assert_eq!(builder.encoded_len(), 3);
        assert_that!(builder.build(), ok(eq(Bytes::from_static(&[0x42, 0x42, 0x00]))));
    }

    #[test]
    fn unknown_names() {
        let schema = compile(CHECKSUM);
        let ctx = Context::new(&schema, Registry::new().with_checksum::<ByteSum>("Sum")).unwrap();
        assert!(matches!(ctx.view("Q", vec![]), Err(Error::UnknownPacket(_))));
        let view = ctx.view("P", vec![0x05, 0x05, 0x00]).unwrap();
        assert!(matches!(view.get("b"), Err(Error::UnknownField { .. })));
        assert!(matches!(
            Builder::create_named(&ctx, "P", [("b", Value::Scalar(1))], None),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            Builder::create(&ctx, "P", vec![], None),
            Err(Error::ArgumentCount { expected: 1, actual: 0, .. })
        ));
    }

    const COMMAND: &str = r#"{ "endianness": "big_endian", "declarations": [
      { "kind": "enum_declaration", "id": "Op", "width": 4, "tags": [
        { "id": "READ", "value": 1 }, { "id": "WRITE", "value": 2 }
      ]},
      { "kind": "packet_declaration", "id": "Command", "fields": [
        { "kind": "enum_field", "id": "op", "enum_id": "Op" },
        { "kind": "scalar_field", "id": "handle", "width": 12 },
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
    fn derived_packets() {
        let schema = compile(COMMAND);
        let ctx = Context::new(&schema, Registry::new()).unwrap();

        assert!(matches!(
            Builder::create(&ctx, "Command", vec![], None),
            Err(Error::AbstractPacket(_))
        ));

        let bytes = Builder::create_named(
            &ctx,
            "Write",
            [("handle", Value::Scalar(0x123)), ("offset", Value::Scalar(0x0400))],
            Some(Bytes::from_static(&[0xaa, 0xbb])),
        )
        .unwrap()
        .build()
        .unwrap();
        assert_eq!(bytes, Bytes::from_static(&[0x21, 0x23, 0x04, 0x04, 0x00, 0xaa, 0xbb]));

        let command = ctx.view("Command", bytes.clone()).unwrap();
        assert_that!(command.get("op"), ok(eq(Value::Tag("WRITE".to_owned()))));
        assert_that!(command.payload(), ok(eq(Bytes::from_static(&[0x04, 0x00, 0xaa, 0xbb]))));

        let write = command.specialize("Write").unwrap();
        assert!(write.is_valid());
        assert_that!(write.get("offset"), ok(eq(Value::Scalar(0x400))));
        assert_that!(write.get("handle"), ok(eq(Value::Scalar(0x123))));
        assert_that!(write.payload(), ok(eq(Bytes::from_static(&[0xaa, 0xbb]))));
        assert_eq!(write.parent().map(View::id), Some("Command"));
    }

    #[test]
    fn parameter_checks() {
        let schema = compile(COMMAND);
        let ctx = Context::new(&schema, Registry::new()).unwrap();
        assert!(matches!(
            Builder::create(&ctx, "Write", vec![Value::Scalar(0x1000), Value::Scalar(0)], None),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            Builder::create(&ctx, "Write", vec![Value::from("READ"), Value::Scalar(0)], None),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn size_overflow() {
        let schema = compile(COMMAND);
        let ctx = Context::new(&schema, Registry::new()).unwrap();
        let builder = Builder::create(
            &ctx,
            "Write",
            vec![Value::Scalar(1), Value::Scalar(2)],
            Some(Bytes::from(vec![0; 254])),
        )
        .unwrap();
        assert!(matches!(builder.build(), Err(Error::SizeOverflow { size: 256, .. })));
    }
}
