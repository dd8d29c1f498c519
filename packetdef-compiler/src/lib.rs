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
//!
//! Resolves field offsets, and compiles for every packet of a
//! definition file a view (field accessors and validity procedure) and
//! a builder (constructor and serialization plan).

pub mod analyzer;
pub mod ast;
pub mod backends;
pub mod builder;
pub mod layout;
pub mod packet;
pub mod parser;
pub mod schema;
#[cfg(test)]
pub mod test_utils;
pub mod validity;
pub mod view;
