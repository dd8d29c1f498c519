#![no_main]

use libfuzzer_sys::fuzz_target;
use packetdef_compiler::{ast, backends, parser, schema};
use std::path::Path;

// Fuzz packetdef_compiler::schema::compile and the backends.
fuzz_target!(|source: String| {
    let mut sources = ast::SourceDatabase::new();
    let Ok(file) = parser::parse_inline(&mut sources, "input.json", source) else {
        return;
    };
    let Ok(schema) = schema::compile(&file) else {
        return;
    };
    let _ = backends::json::generate(&schema);
    let _ = backends::rust::generate(&schema, Path::new("input.json"), &[]);
});
