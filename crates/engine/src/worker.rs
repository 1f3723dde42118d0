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

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::StreamExt;
use jiff::SignedDuration;
use reqwest::{Client, StatusCode, header};
use snafu::ResultExt;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::apply_headers,
    config::{Credentials, Headers},
    error::{
        DownloadError, EmptyBodySnafu, FileWriteSnafu, GiveUpSnafu, NetworkSnafu, Result,
        UnexpectedStatusSnafu,
    },
    progress::BarHandle,
    session::Part,
};

/// Process-wide retry counter surfaced by the progress UI; the only global
/// mutable state in the engine.
pub static GLOBAL_TRY: AtomicU32 = AtomicU32::new(0);

/// Staging granularity of the transfer; also drives the extrapolated bar
/// total while the real length is unknown.
const BUF_SIZE: i64 = 1 << 12;

const ATTEMPT_DEADLINE_CAP: Duration = Duration::from_secs(600);
const BACKOFF_BASE_DELAY: Duration = Duration::from_millis(50);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Transfers one byte range into its segment file with bounded retries,
/// exponential backoff, a per-attempt deadline and shared cancellation.
pub struct PartWorker {
    pub client:       Client,
    pub url:          String,
    pub headers:      Headers,
    pub credentials:  Option<Credentials>,
    pub base_timeout: Duration,
    pub max_retry:    u32,
    /// Index of the owned part; index 0 alone may adopt a full-body 200.
    pub order:        usize,
    pub name:         String,
    pub cancel:       CancellationToken,
    pub bar:          BarHandle,
}

/// Deadline for attempt `n` (0-based): the base timeout, doubling per retry,
/// capped at ten minutes.
fn attempt_deadline(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return base;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(ATTEMPT_DEADLINE_CAP)
}

impl PartWorker {
    /// Run the retry loop to completion and hand the (possibly updated) part
    /// back to the orchestrator. Errors come back tagged with the part name.
    pub async fn download(self, mut part: Part) -> (Part, Result<()>) {
        let result = self.run(&mut part).await;
        debug!(part = %self.name, ok = result.is_ok(), "quit");
        let result = result.map_err(|e| e.annotate(self.name.clone()));
        (part, result)
    }

    async fn run(&self, part: &mut Part) -> Result<()> {
        if part.is_done() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&part.file_name)
            .await
            .context(FileWriteSnafu)?;

        let mut total = part.stop - part.start + 1;
        if part.stop > 0 {
            self.bar.set_total(total as u64);
        }

        let mut delays = ExponentialBuilder::default()
            .with_min_delay(BACKOFF_BASE_DELAY)
            .with_max_delay(BACKOFF_CEILING)
            .without_max_times()
            .build();
        let mut tries: u32 = 0;

        let result = loop {
            if tries > self.max_retry {
                self.bar.flash("give up!");
                break GiveUpSnafu.fail();
            }
            if part.is_done() {
                debug!(part = %self.name, "done in try, quitting");
                break Ok(());
            }

            if tries > 0 {
                GLOBAL_TRY.fetch_add(1, Ordering::Relaxed);
                self.bar.flash("Retrying...");
            }
            let deadline = attempt_deadline(self.base_timeout, tries);
            debug!(part = %self.name, try_count = tries, ?deadline, "attempt");

            let started = Instant::now();
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => Err(DownloadError::Canceled),
                outcome = self.attempt(part, &mut file, deadline, &mut total) => outcome,
            };
            part.elapsed = part
                .elapsed
                .saturating_add(SignedDuration::try_from(started.elapsed()).unwrap_or_default());

            match outcome {
                Ok(()) => break Ok(()),
                Err(e) if e.is_fatal_for_attempt_round() => break Err(e),
                Err(e) => debug!(part = %self.name, error = %e, "attempt failed"),
            }

            tries += 1;
            let delay = delays.next().unwrap_or(BACKOFF_CEILING);
            tokio::select! {
                () = self.cancel.cancelled() => break Err(DownloadError::Canceled),
                () = tokio::time::sleep(delay) => {}
            }
        };

        drop(file);
        if part.skip {
            let _ = tokio::fs::remove_file(&part.file_name).await;
        }
        result
    }

    /// One HTTP attempt. The deadline is re-armed on the header read and on
    /// every body chunk, so a stalled connection fails the attempt while a
    /// slow-but-moving one survives.
    async fn attempt(
        &self,
        part: &mut Part,
        file: &mut File,
        deadline: Duration,
        total: &mut i64,
    ) -> Result<()> {
        let range = part.range_header();
        debug!(part = %self.name, %range, "GET {}", self.url);

        let request = apply_headers(
            self.client.get(&self.url),
            &self.headers,
            self.credentials.as_ref(),
        )
        .header(header::RANGE, range);

        let response = match tokio::time::timeout(deadline, request.send()).await {
            Err(_) => {
                self.bar.flash("Timeout...");
                return Err(DownloadError::AttemptTimeout);
            }
            Ok(sent) => sent.context(NetworkSnafu)?,
        };
        let status = response.status();
        debug!(part = %self.name, %status, "response");

        match status {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => {
                // server ignored the Range header and answered the whole
                // body; only the first part may carry it
                if self.order != 0 {
                    part.skip = true;
                    self.bar.abort();
                    debug!(part = %self.name, "no partial content, skipping");
                    return Ok(());
                }
                *total = response
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(-1);
                part.written = 0;
                part.stop = *total - 1;
                file.set_len(0).await.context(FileWriteSnafu)?;
                if *total > 0 {
                    self.bar.set_total(*total as u64);
                }
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                self.bar.flash(status.to_string());
                return UnexpectedStatusSnafu {
                    status: status.as_u16(),
                }
                .fail();
            }
            other => {
                return UnexpectedStatusSnafu {
                    status: other.as_u16(),
                }
                .fail();
            }
        }

        if part.written > 0 {
            self.bar.set_position(part.written as u64);
        }
        let written_snapshot = part.written;

        let mut stream = response.bytes_stream();
        loop {
            let next = match tokio::time::timeout(deadline, stream.next()).await {
                Err(_) => {
                    self.bar.flash("Timeout...");
                    return Err(DownloadError::AttemptTimeout);
                }
                Ok(next) => next,
            };
            match next {
                None => break,
                Some(Ok(chunk)) => {
                    file.write_all(&chunk).await.context(FileWriteSnafu)?;
                    part.written += chunk.len() as i64;
                    self.bar.inc(chunk.len() as u64);
                    if *total <= 0 {
                        self.bar.set_total((part.written + 2 * BUF_SIZE) as u64);
                    }
                }
                Some(Err(e)) => return Err(e).context(NetworkSnafu),
            }
        }
        file.flush().await.context(FileWriteSnafu)?;

        debug!(
            part = %self.name,
            written = part.written - written_snapshot,
            "attempt finished"
        );
        if *total <= 0 {
            part.stop = part.written - 1;
        }
        if part.written == written_snapshot && !part.is_done() {
            return EmptyBodySnafu.fail();
        }
        Ok(())
    }
}
