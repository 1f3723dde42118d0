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

//! Part-parallel, resumable HTTP download engine.
//!
//! The resolver follows redirects to a final location, the planner cuts the
//! resource into contiguous byte ranges, one worker per range transfers its
//! segment with bounded retries under a shared cancellation token, and the
//! assembler stitches the segments into the final file. Interrupted runs
//! persist a JSON sidecar that a later run picks up with `--continue`.

mod assembler;
mod cancel;
mod client;
mod config;
mod error;
mod mirror;
mod orchestrator;
mod planner;
mod progress;
mod resolver;
mod session;
mod state;
mod worker;

pub use cancel::install_signal_handler;
pub use config::{Config, Credentials, Headers, UserAgentProfile};
pub use error::{DownloadError, Result};
pub use mirror::{MIRROR_RACE_WINDOW, MirrorSelector, read_lines};
pub use orchestrator::{EntryPoint, Orchestrator, Outcome, Prompter};
pub use planner::plan_parts;
pub use resolver::MAX_REDIRECTS;
pub use session::{Part, Session};
pub use state::{load_state, save_state};
pub use worker::GLOBAL_TRY;
