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

use std::fmt::Write as _;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::fs;

use crate::{
    config::Headers,
    error::{FileWriteSnafu, Result},
};

/// State of a single byte-range segment, backed by a `.part<i>` file.
///
/// Index position inside [`Session::parts`] is the part's stable identity;
/// only its owning worker mutates it between the fan-out and the join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(rename = "FileName")]
    pub file_name: String,

    /// First byte of the assigned range, inclusive.
    #[serde(rename = "Start")]
    pub start: i64,

    /// Last byte of the assigned range, inclusive; <= 0 means open-ended.
    #[serde(rename = "Stop")]
    pub stop: i64,

    /// Bytes already appended to the segment file.
    #[serde(rename = "Written")]
    pub written: i64,

    /// Set when the server answered a full body to part 0 and this part's
    /// data must be discarded.
    #[serde(rename = "Skip")]
    pub skip: bool,

    /// Wall clock accumulated across attempts, surviving resume.
    #[serde(rename = "Elapsed", default)]
    pub elapsed: SignedDuration,
}

impl Part {
    #[must_use]
    pub fn new(file_name: String, start: i64, stop: i64) -> Self {
        Part {
            file_name,
            start,
            stop,
            written: 0,
            skip: false,
            elapsed: SignedDuration::ZERO,
        }
    }

    /// A part is finished once it is skipped or every byte of its range got
    /// written. The strict comparison makes an open-ended part (stop 0)
    /// read as done as soon as it owns any data; its real stop is filled in
    /// from `written` at stream end.
    #[must_use]
    pub fn is_done(&self) -> bool { self.skip || self.written > self.stop - self.start }

    /// `Range` header value for the next attempt, continuing after whatever
    /// is already on disk.
    #[must_use]
    pub fn range_header(&self) -> String {
        if self.stop <= 0 {
            "bytes=0-".to_owned()
        } else {
            format!("bytes={}-{}", self.start + self.written, self.stop)
        }
    }

    /// Size of the assigned range, meaningless while the range is open-ended.
    #[must_use]
    pub fn total(&self) -> i64 { self.stop - self.start + 1 }
}

/// Persistent record of a download in progress.
///
/// Created by the resolver from a fresh response or loaded back from the
/// JSON sidecar; serialized field names are part of the on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Last known canonical URL, post-redirect. Rewritten to the user-typed
    /// URL right before persisting so a resume replays the same entry point.
    #[serde(rename = "Location")]
    pub location: String,

    #[serde(rename = "SuggestedFileName")]
    pub suggested_file_name: String,

    /// Server advertised digest token, only compared for resume equality.
    #[serde(rename = "ContentMD5")]
    pub content_md5: String,

    #[serde(rename = "AcceptRanges")]
    pub accept_ranges: String,

    #[serde(rename = "ContentType")]
    pub content_type: String,

    #[serde(rename = "StatusCode")]
    pub status_code: u16,

    /// Total size in bytes, -1 when unknown.
    #[serde(rename = "ContentLength")]
    pub content_length: i64,

    /// Request headers to replay on resume.
    #[serde(rename = "HeaderMap")]
    pub header_map: Headers,

    #[serde(rename = "Parts")]
    pub parts: Vec<Part>,
}

impl Session {
    #[must_use]
    pub fn is_accept_ranges(&self) -> bool { self.accept_ranges == "bytes" }

    #[must_use]
    pub fn total_written(&self) -> i64 { self.parts.iter().map(|p| p.written).sum() }

    /// Sidecar file the session is persisted to.
    #[must_use]
    pub fn state_file_name(&self) -> String { format!("{}.json", self.suggested_file_name) }

    /// Drop parts that own no bytes before persisting or assembling: a
    /// skipped part's file is already gone and a resumed session must not
    /// reference it.
    pub fn retain_actual_parts(&mut self) { self.parts.retain(|p| !p.skip); }

    /// Delete every segment file, used when the user confirms an overwrite.
    pub async fn remove_files(&self) -> Result<()> {
        for part in &self.parts {
            match fs::remove_file(&part.file_name).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context(FileWriteSnafu),
            }
        }
        Ok(())
    }

    /// Human readable pre-download summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "GET: {}", self.location);
        if self.content_length < 0 {
            let _ = writeln!(out, "Length: unknown [{}]", self.content_type);
        } else {
            let _ = writeln!(
                out,
                "Length: {} bytes [{}]",
                self.content_length, self.content_type
            );
        }
        let _ = write!(out, "Saving to: {:?}", self.suggested_file_name);
        out
    }
}
