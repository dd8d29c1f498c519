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

//! JSON compiler backend.

use crate::schema::Schema;

/// Turn the compiled schema into a JSON representation.
pub fn generate(schema: &Schema) -> Result<String, String> {
    serde_json::to_string_pretty(schema)
        .map_err(|err| format!("could not JSON serialize schema: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::parser::parse_inline;
    use crate::schema;

    #[test]
    fn schema_is_serialized() {
        let mut db = ast::SourceDatabase::new();
        let file = parse_inline(
            &mut db,
            "stdin",
            r#"{ "endianness": "little_endian", "declarations": [
              { "kind": "packet_declaration", "id": "A", "fields": [
                { "kind": "scalar_field", "id": "a", "width": 8 },
                { "kind": "reserved_field", "width": 8 }
              ]}
            ]}"#
            .to_owned(),
        )
        .unwrap();
        let schema = schema::compile(&file).unwrap();
        let json: serde_json::Value = serde_json::from_str(&generate(&schema).unwrap()).unwrap();
        assert_eq!(json["endianness"], "little_endian");
        assert_eq!(json["packets"][0]["id"], "A");
        assert_eq!(json["packets"][0]["view"]["validity"]["static_size"], 16);
        assert_eq!(
            json["packets"][0]["view"]["accessors"][0],
            serde_json::json!({ "field_id": "a", "kind": "scalar", "position": { "from_start": 0 }, "width": 8 })
        );
    }
}
