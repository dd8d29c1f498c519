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

//! Generate the Rust packets of `fixtures/frames.json`.

use codespan_reporting::term::termcolor;
use std::error::Error;
use std::path::Path;

use packetdef_compiler::{ast, backends, parser, schema};

const INPUT: &str = "fixtures/frames.json";

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed={INPUT}");
    let mut sources = ast::SourceDatabase::new();
    let file = parser::parse_file(&mut sources, INPUT).map_err(|err| err.message)?;
    let schema = schema::compile(&file).map_err(|diagnostics| {
        let mut buffer = termcolor::Buffer::no_color();
        let _ = diagnostics.emit(&sources, &mut buffer);
        String::from_utf8_lossy(buffer.as_slice()).into_owned()
    })?;
    let code = backends::rust::generate(
        &schema,
        Path::new(INPUT),
        &[
            "crate::custom::Name".to_owned(),
            "crate::custom::Token".to_owned(),
            "packetdef_runtime::Crc8".to_owned(),
        ],
    )?;
    let out_dir = std::env::var("OUT_DIR")?;
    std::fs::write(Path::new(&out_dir).join("frames.rs"), code)?;
    Ok(())
}
