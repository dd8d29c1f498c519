#![no_main]

use libfuzzer_sys::fuzz_target;
use packetdef_compiler::packet::{Context, Registry};
use packetdef_compiler::{ast, parser, schema};
use packetdef_runtime::Crc8;

const DEFINITION: &str = r#"{ "endianness": "big_endian", "declarations": [
  { "kind": "checksum_declaration", "id": "Crc8", "width": 8 },
  { "kind": "enum_declaration", "id": "Kind", "width": 4, "tags": [
    { "id": "A", "value": 1 }, { "id": "B", "value": 2 }
  ]},
  { "kind": "custom_field_declaration", "id": "Name" },
  { "kind": "packet_declaration", "id": "Frame", "fields": [
    { "kind": "checksum_start_field", "field_id": "crc" },
    { "kind": "enum_field", "id": "kind", "enum_id": "Kind" },
    { "kind": "fixed_scalar_field", "width": 4, "value": 5 },
    { "kind": "size_field", "field_id": "_payload_", "width": 8 },
    { "kind": "payload_field", "size_modifier": 1 },
    { "kind": "checksum_field", "id": "crc", "checksum_id": "Crc8" }
  ]},
  { "kind": "packet_declaration", "id": "Named", "parent_id": "Frame",
    "constraints": [{ "id": "kind", "tag_id": "B" }], "fields": [
    { "kind": "custom_field", "id": "name", "type_id": "Name" },
    { "kind": "scalar_field", "id": "value", "width": 24 }
  ]}
]}"#;

// Short names have a one octet length prefix, long names an eight
// octet length that is not bounded by the buffer.
fn name_size(buf: &[u8]) -> Option<usize> {
    match buf.first()? {
        len if len & 0x80 == 0 => Some(*len as usize + 1),
        _ => usize::try_from(u64::from_be_bytes(buf.get(1..9)?.try_into().ok()?)).ok(),
    }
}

// Validity checks and accessors never panic on arbitrary buffers.
fuzz_target!(|data: &[u8]| {
    let mut sources = ast::SourceDatabase::new();
    let file = parser::parse_inline(&mut sources, "fuzz.json", DEFINITION.to_owned())
        .expect("invalid definition");
    let schema = schema::compile(&file).expect("compilation failure");
    let registry = Registry::new()
        .with_checksum::<Crc8>("Crc8")
        .with_custom_size("Name", name_size);
    let ctx = Context::new(&schema, registry).expect("missing capability");

    let view = ctx.view("Named", data.to_vec()).expect("unknown packet");
    if view.is_valid() {
        assert!(view.parent().is_some_and(|parent| parent.is_valid()));
        for field in ["kind", "crc", "name", "value"] {
            assert!(view.get(field).is_ok());
        }
    }
    let _ = view.payload();
});
