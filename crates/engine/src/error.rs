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

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("canceled"))]
    Canceled,

    #[snafu(display("maximum number of redirects ({limit}) followed"))]
    MaxRedirects { limit: usize },

    #[snafu(display("redirect response without a Location header"))]
    MissingLocation,

    #[snafu(display("unexpected status: {status}"))]
    UnexpectedStatus { status: u16 },

    #[snafu(display("give up!"))]
    GiveUp,

    #[snafu(display("empty response body"))]
    EmptyBody,

    #[snafu(display("attempt deadline exceeded"))]
    AttemptTimeout,

    #[snafu(display("no mirror responded with 200 within {seconds}s"))]
    MirrorDeadline { seconds: u64 },

    #[snafu(display("invalid url {url:?}: {source}"))]
    InvalidUrl {
        url:    String,
        source: url::ParseError,
    },

    #[snafu(display("network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("file write error: {source}"))]
    FileWrite { source: std::io::Error },

    #[snafu(display("file read error: {source}"))]
    FileRead { source: std::io::Error },

    #[snafu(display("state file error at {}: {source}", path.display()))]
    StateFile {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("ContentMD5 mismatch: remote {remote:?} expected {expected:?}"))]
    DigestMismatch { remote: String, expected: String },

    #[snafu(display("ContentLength mismatch: remote {remote} expected {expected}"))]
    LengthMismatch { remote: i64, expected: i64 },

    #[snafu(display("worker task panicked: {message}"))]
    WorkerPanic { message: String },

    #[snafu(display("prompt error: {source}"))]
    Prompt { source: std::io::Error },

    #[snafu(display("{context}: {source}"))]
    Context {
        context: String,
        #[snafu(source(from(DownloadError, Box::new)))]
        source:  Box<DownloadError>,
    },
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

impl DownloadError {
    /// Prefix an error with a component name, the way each layer tags its
    /// failures ("follow", "best mirror", a part name, "run").
    #[must_use]
    pub fn annotate(self, context: impl Into<String>) -> Self {
        DownloadError::Context {
            context: context.into(),
            source:  Box::new(self),
        }
    }

    /// Expected errors are user-facing single-liners (exit code 1):
    /// cancellation, redirect exhaustion, a non-2xx terminal response,
    /// retry give-up and a lost mirror race. Everything else is a bug or an
    /// environment failure (exit code 3).
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            DownloadError::Canceled
            | DownloadError::MaxRedirects { .. }
            | DownloadError::UnexpectedStatus { .. }
            | DownloadError::GiveUp
            | DownloadError::MirrorDeadline { .. } => true,
            DownloadError::Context { source, .. } => source.is_expected(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            DownloadError::Canceled => true,
            DownloadError::Context { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Errors that end the whole retry round of a part worker instead of
    /// scheduling another attempt.
    pub(crate) fn is_fatal_for_attempt_round(&self) -> bool {
        matches!(
            self,
            DownloadError::Canceled
                | DownloadError::UnexpectedStatus { .. }
                | DownloadError::EmptyBody
                | DownloadError::GiveUp
        )
    }
}
