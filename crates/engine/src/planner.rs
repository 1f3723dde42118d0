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

use crate::session::Part;

/// Partition a resource of `content_length` bytes into `desired` contiguous
/// ranges, one [`Part`] each.
///
/// Falls back to a single open-ended part when the size is unknown or only
/// one part was requested; the caller forces `desired = 1` when the server
/// does not advertise range support. The last part absorbs the division
/// remainder.
#[must_use]
pub fn plan_parts(suggested_file_name: &str, content_length: i64, desired: u32) -> Vec<Part> {
    let file_name = |i: usize| format!("{suggested_file_name}.part{i}");

    if desired <= 1 || content_length <= 0 {
        return vec![Part::new(file_name(0), 0, 0)];
    }

    let count = i64::from(desired);
    let fragment = content_length / count;
    let mut parts = Vec::with_capacity(desired as usize);
    for i in 0..count {
        let start = i * fragment;
        let stop = if i == count - 1 {
            content_length - 1
        } else {
            start + fragment - 1
        };
        parts.push(Part::new(file_name(i as usize), start, stop));
    }
    parts
}
