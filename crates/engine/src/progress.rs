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

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Container for all per-part bars.
///
/// Workers never read bar state back; they only post updates through
/// [`BarHandle`]. Quiet mode swaps in a hidden draw target so every update
/// (and [`Progress::println`]) becomes a no-op.
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Progress { multi }
    }

    /// One bar per part; `total <= 0` starts the bar without a known length.
    #[must_use]
    pub fn add_part_bar(&self, name: &str, total: i64) -> BarHandle {
        let bar = self.multi.add(ProgressBar::new(total.max(0) as u64));
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:>4} {bytes:>10}/{total_bytes:<10} {wide_bar} {bytes_per_sec:>12} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix(name.to_owned());
        BarHandle { bar }
    }

    /// Print a line above the bars; suppressed in quiet mode.
    pub fn println(&self, line: impl AsRef<str>) { let _ = self.multi.println(line); }
}

/// One-way message channel from a worker to its bar.
#[derive(Clone)]
pub struct BarHandle {
    bar: ProgressBar,
}

impl BarHandle {
    pub fn set_total(&self, total: u64) { self.bar.set_length(total); }

    pub fn set_position(&self, position: u64) { self.bar.set_position(position); }

    pub fn inc(&self, delta: u64) { self.bar.inc(delta); }

    /// Short status shown next to the bar ("Retrying...", "Timeout...",
    /// a final status line).
    pub fn flash(&self, message: impl Into<String>) { self.bar.set_message(message.into()); }

    /// Stop rendering this bar, leaving the last message visible.
    pub fn abort(&self) { self.bar.abandon(); }

    pub fn finish(&self) { self.bar.finish(); }
}
