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

//! Packet definition compiler.

use argh::FromArgs;
use codespan_reporting::term::{self, termcolor};
use std::path::Path;

use packetdef_compiler::{backends, parser, schema};

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputFormat {
    JSON,
    Rust,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "json" => Ok(Self::JSON),
            "rust" => Ok(Self::Rust),
            _ => Err(format!("could not parse {input:?}, valid option are 'json', 'rust'.")),
        }
    }
}

#[derive(FromArgs, Debug)]
/// Packet definition compiler and generator.
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option, default = "OutputFormat::JSON")]
    /// generate output in this format ("json", "rust").
    /// The output will be printed on stdout in all cases.
    output_format: OutputFormat,

    #[argh(positional)]
    /// input file, a JSON packet definition.
    input_file: Option<String>,

    #[argh(option)]
    /// exclude declarations from the generated output.
    /// Packets derived from excluded packets are excluded as well.
    exclude_declaration: Vec<String>,

    #[argh(option)]
    /// custom field and checksum import paths.
    /// For the rust backend this is a path e.g. "module::CustomField" or "super::CustomField".
    custom_field: Vec<String>,

    #[argh(switch)]
    /// report only the first compilation error.
    fail_fast: bool,

    #[argh(switch, short = 'v')]
    /// log compiler progress.
    verbose: bool,
}

fn generate_backend(opt: &Opt, input_file: &str) -> Result<(), String> {
    let mut sources = packetdef_compiler::ast::SourceDatabase::new();
    let writer = termcolor::StandardStream::stderr(termcolor::ColorChoice::Always);
    let file = match parser::parse_file(&mut sources, input_file) {
        Ok(file) => file,
        Err(err) => {
            let config = term::Config::default();
            term::emit(&mut writer.lock(), &config, &sources, &err)
                .map_err(|err| format!("could not print error: {err}"))?;
            return Err(String::from("Error while parsing input"));
        }
    };

    let file = schema::exclude_declarations(&file, &opt.exclude_declaration);
    let compiled = match schema::compile(&file) {
        Ok(compiled) => compiled,
        Err(diagnostics) => {
            let diagnostics = if opt.fail_fast { diagnostics.first() } else { diagnostics };
            log::debug!("{} compilation errors", diagnostics.diagnostics.len());
            diagnostics
                .emit(&sources, &mut writer.lock())
                .map_err(|err| format!("could not print diagnostics: {err}"))?;
            return Err(String::from("Compilation failed"));
        }
    };

    match opt.output_format {
        OutputFormat::JSON => println!("{}", backends::json::generate(&compiled)?),
        OutputFormat::Rust => println!(
            "{}",
            backends::rust::generate(&compiled, Path::new(input_file), &opt.custom_field)?
        ),
    }
    Ok(())
}

fn main() -> Result<(), String> {
    let opt: Opt = argh::from_env();

    env_logger::Builder::new()
        .filter_level(if opt.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn })
        .format_timestamp_secs()
        .init();

    if opt.version {
        println!("pdefc {}\nCopyright (C) 2026 Google LLC", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(input_file) = opt.input_file.as_ref() else {
        return Err(String::from("Missing input file"));
    };
    generate_backend(&opt, input_file)
}
