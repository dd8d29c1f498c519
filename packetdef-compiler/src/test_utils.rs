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

//! Various utility functions used in tests.

/// Format Rust code in `input`.
pub fn format_rust(input: &str) -> String {
    let syntax_tree = syn::parse_file(input)
        .unwrap_or_else(|err| panic!("Could not parse {input:#?} as Rust code: {err}"));
    prettyplease::unparse(&syntax_tree)
}

/// Check that `haystack` contains `needle`.
///
/// Panics with the full haystack otherwise.
#[track_caller]
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(haystack.contains(needle), "could not find {needle:?} in:\n{haystack}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rust() {
        assert_eq!(format_rust("fn  main ( ) { }"), "fn main() {}\n");
    }

    #[test]
    #[should_panic]
    fn test_assert_contains_panics() {
        assert_contains("foo", "bar");
    }
}
