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

use std::cell::Cell;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    #[default]
    Unchecked,
    /// The check is running; the view is treated as valid meanwhile so
    /// that accessors called from the check are usable.
    Checking,
    Valid,
}

/// Memoized result of a view validity check.
///
/// A successful check is remembered, a failed one is not: the next call
/// runs the check again. The cache is not `Sync`, views are used from a
/// single thread at a time.
#[derive(Debug, Default, Clone)]
pub struct ValidityCache(Cell<Validity>);

impl ValidityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Validity {
        self.0.get()
    }

    /// Run `procedure` unless the view is already known valid, or is
    /// currently being checked.
    pub fn check(&self, procedure: impl FnOnce() -> bool) -> bool {
        if self.0.get() != Validity::Unchecked {
            return true;
        }
        self.0.set(Validity::Checking);
        let valid = procedure();
        self.0.set(if valid { Validity::Valid } else { Validity::Unchecked });
        valid
    }
}
