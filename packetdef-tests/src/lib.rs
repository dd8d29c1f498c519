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

//! Packets generated from `fixtures/frames.json` by the Rust backend,
//! with the custom field types they import.

pub mod custom;

#[allow(dead_code, unused_imports)]
pub mod frames {
    include!(concat!(env!("OUT_DIR"), "/frames.rs"));
}
