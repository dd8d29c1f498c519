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

//! Loader for packet definition files.
//!
//! Definitions are exchanged as the JSON serialization of [`ast::File`],
//! as produced by the schema front-end.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files;
use std::ops::Range;

use crate::ast;

/// Convert a 1-based line and column reported by serde_json to a byte
/// offset into `source`.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let line_starts: Vec<_> = files::line_starts(source).collect();
    let line_start = line
        .checked_sub(1)
        .and_then(|line| line_starts.get(line))
        .copied()
        .unwrap_or(source.len());
    std::cmp::min(line_start + column.saturating_sub(1), source.len())
}

/// Byte ranges of the objects listed in the top-level `declarations`
/// array, in order of appearance. Only meaningful for well-formed input.
fn declaration_ranges(source: &str) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let mut ranges = vec![];
    let mut depth = 0usize;
    let mut key = None;
    let mut in_declarations = false;
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'"' => {
                let begin = index + 1;
                index += 1;
                while index < bytes.len() && bytes[index] != b'"' {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
                if depth == 1 {
                    key = source.get(begin..index);
                }
            }
            open @ (b'{' | b'[') => {
                depth += 1;
                if depth == 2 && open == b'[' {
                    in_declarations = key == Some("declarations");
                }
                if depth == 3 && in_declarations && open == b'{' {
                    start = index;
                }
            }
            close @ (b'}' | b']') => {
                if depth == 3 && in_declarations && close == b'}' {
                    ranges.push(start..index + 1);
                }
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    in_declarations = false;
                }
            }
            _ => (),
        }
        index += 1;
    }
    ranges
}

/// Parse a definition file from a string.
///
/// The source is added to the compilation database. Returns the
/// definition tree, or a diagnostic pointing at the syntax error.
pub fn parse_inline(
    sources: &mut ast::SourceDatabase,
    name: &str,
    source: String,
) -> Result<ast::File, Diagnostic<ast::FileId>> {
    let parsed = serde_json::from_str::<ast::File>(&source);
    let offset = parsed.as_ref().err().map(|err| byte_offset(&source, err.line(), err.column()));
    let ranges = if parsed.is_ok() { declaration_ranges(&source) } else { vec![] };
    let file = sources.add(name.to_owned(), source);
    let mut parsed = parsed.map_err(|err| {
        log::debug!("failed to parse {name}: {err}");
        Diagnostic::error()
            .with_message(format!("failed to parse input file '{name}'"))
            .with_labels(
                offset
                    .map(|offset| {
                        Label::primary(file, offset..offset).with_message(err.to_string())
                    })
                    .into_iter()
                    .collect(),
            )
    })?;
    for (decl, range) in parsed.declarations.iter_mut().zip(ranges) {
        *decl.loc_mut() = ast::SourceRange { file, start: range.start, end: range.end };
    }
    Ok(parsed)
}

/// Parse a new source file.
///
/// The source file is fully read and added to the compilation
/// database. Returns the constructed definition tree, or a descriptive
/// error message in case of syntax error.
pub fn parse_file(
    sources: &mut ast::SourceDatabase,
    name: &str,
) -> Result<ast::File, Diagnostic<ast::FileId>> {
    let source = std::fs::read_to_string(name).map_err(|e| {
        Diagnostic::error().with_message(format!("failed to read input file '{}': {}", name, e))
    })?;
    parse_inline(sources, name, source)
}

#[cfg(test)]
mod test {
    use super::*;
    use googletest::prelude::*;
    use std::io::Write;

    #[test]
    fn endianness_is_set() {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(
            &mut db,
            "stdin",
            r#"{ "endianness": "big_endian", "declarations": [] }"#.to_owned(),
        )
        .unwrap();
        assert_eq!(file.endianness, ast::EndiannessValue::BigEndian);
        assert!(file.declarations.is_empty());
    }

    #[test]
    fn packet_declaration() {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(
            &mut db,
            "stdin",
            r#"{
              "endianness": "little_endian",
              "declarations": [
                { "kind": "packet_declaration", "id": "A", "fields": [
                  { "kind": "scalar_field", "id": "a", "width": 8 },
                  { "kind": "payload_field" }
                ]},
                { "kind": "packet_declaration", "id": "B", "parent_id": "A",
                  "constraints": [{ "id": "a", "value": 1 }], "fields": [] }
              ]
            }"#
            .to_owned(),
        )
        .unwrap();
        assert_eq!(file.declarations.len(), 2);
        assert_eq!(file.declarations[1].parent_id(), Some("A"));
        assert_that!(
            file.declarations[1].constraints().collect::<Vec<_>>(),
            elements_are![eq(&ast::Constraint {
                id: "a".to_owned(),
                value: Some(1),
                tag_id: None
            })]
        );
    }

    #[test]
    fn declarations_are_located() {
        let mut db = ast::SourceDatabase::new();
        let source = r#"{
          "endianness": "little_endian",
          "declarations": [
            { "kind": "enum_declaration", "id": "E", "width": 8,
              "tags": [{ "id": "X", "value": 1 }] },
            { "kind": "packet_declaration", "id": "P}]", "fields": [
              { "kind": "enum_field", "id": "e", "enum_id": "E" }
            ]}
          ]
        }"#;
        let file = parse_inline(&mut db, "stdin", source.to_owned()).unwrap();
        let texts: Vec<_> = file
            .declarations
            .iter()
            .map(|decl| &source[decl.loc().start..decl.loc().end])
            .collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with(r#"{ "kind": "enum_declaration""#), "{}", texts[0]);
        assert!(texts[0].ends_with("}] }"), "{}", texts[0]);
        assert!(texts[1].starts_with(r#"{ "kind": "packet_declaration""#), "{}", texts[1]);
        assert!(texts[1].ends_with("]}"), "{}", texts[1]);
        assert!(file.declarations.iter().all(|decl| decl.loc().file == 0));
    }

    #[test]
    fn syntax_error_is_located() {
        let mut db = ast::SourceDatabase::new();
        let source = "{\n  \"endianness\": \"middle_endian\",\n  \"declarations\": []\n}";
        let diagnostic = parse_inline(&mut db, "stdin", source.to_owned()).unwrap_err();
        assert_eq!(diagnostic.labels.len(), 1);
        let range = diagnostic.labels[0].range.clone();
        // The label points into the second line.
        assert_eq!(source[..range.start].matches('\n').count(), 1, "{range:?}");
    }

    #[test]
    fn read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "endianness": "little_endian", "declarations": [] }"#).unwrap();
        let mut db = ast::SourceDatabase::new();
        let path = file.path().to_str().unwrap().to_owned();
        assert!(parse_file(&mut db, &path).is_ok());
        assert!(parse_file(&mut db, "/nonexistent/definition.json").is_err());
    }
}
