// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use shadow_rs::shadow;

shadow!(build);

/// Package author information from Cargo.toml
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Version string shown by `--version`: the crate version, annotated with
/// the short commit hash when built from a checkout, plus a dirty marker for
/// builds from a modified working tree.
pub const FULL_VERSION: &str = if build::SHORT_COMMIT.is_empty() {
    build::PKG_VERSION
} else if build::GIT_CLEAN {
    shadow_rs::formatcp!("{} ({})", build::PKG_VERSION, build::SHORT_COMMIT)
} else {
    shadow_rs::formatcp!("{} ({}-dirty)", build::PKG_VERSION, build::SHORT_COMMIT)
};
