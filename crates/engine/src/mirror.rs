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
    io::BufRead,
    sync::Arc,
    time::Duration,
};

use reqwest::{Client, StatusCode, Url};
use tokio::sync::{Barrier, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::Credentials,
    error::{DownloadError, MirrorDeadlineSnafu, Result},
};

/// Shared window every probe has to come back with a 200.
pub const MIRROR_RACE_WINDOW: Duration = Duration::from_secs(15);

/// Collect candidate URLs from a line-oriented reader: whitespace trimmed,
/// blank lines and `#` comments dropped.
pub fn read_lines<R: BufRead>(input: R) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in input.lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        lines.push(text.to_owned());
    }
    Ok(lines)
}

/// Races candidate URLs and yields the first one answering 200.
pub struct MirrorSelector {
    pub client:      Client,
    pub credentials: Option<Credentials>,
    pub cancel:      CancellationToken,
}

impl MirrorSelector {
    /// All probes register on a start barrier, get released at once, and the
    /// first 200 wins a capacity-1 rendezvous channel. Candidates that fail
    /// URL parsing are skipped up front; the race is bounded by
    /// [`MIRROR_RACE_WINDOW`].
    pub async fn select(&self, candidates: &[String]) -> Result<String> {
        self.select_inner(candidates)
            .await
            .map_err(|e| e.annotate("best mirror"))
    }

    async fn select_inner(&self, candidates: &[String]) -> Result<String> {
        let mut probes = Vec::with_capacity(candidates.len());
        for raw in candidates {
            match Url::parse(raw) {
                Ok(url) => probes.push((raw.clone(), url)),
                Err(e) => debug!("skipping {raw:?}: {e}"),
            }
        }

        let barrier = Arc::new(Barrier::new(probes.len() + 1));
        let (winner_tx, mut winner_rx) = mpsc::channel::<String>(1);

        for (raw, url) in probes {
            let client = self.client.clone();
            let credentials = self.credentials.clone();
            let barrier = Arc::clone(&barrier);
            let winner_tx = winner_tx.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                debug!("fetching: {raw:?}");
                let mut request = client.get(url);
                if let Some(creds) = &credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
                match tokio::time::timeout(MIRROR_RACE_WINDOW, request.send()).await {
                    Err(_) => debug!("fetch {raw:?}: deadline exceeded"),
                    Ok(Err(e)) => debug!("fetch error: {e}"),
                    Ok(Ok(response)) if response.status() == StatusCode::OK => {
                        // losers find the channel full and are discarded
                        let _ = winner_tx.try_send(raw);
                    }
                    Ok(Ok(response)) => {
                        debug!("fetch {raw:?} unexpected status: {}", response.status());
                    }
                }
            });
        }
        drop(winner_tx);

        // release every registered probe at once
        barrier.wait().await;

        tokio::select! {
            () = self.cancel.cancelled() => Err(DownloadError::Canceled),
            winner = winner_rx.recv() => match winner {
                Some(best) => {
                    debug!("best mirror found: {best:?}");
                    Ok(best)
                }
                // every probe finished without a 200; same terminal state as
                // an expired window
                None => MirrorDeadlineSnafu {
                    seconds: MIRROR_RACE_WINDOW.as_secs(),
                }
                .fail(),
            },
            () = tokio::time::sleep(MIRROR_RACE_WINDOW) => MirrorDeadlineSnafu {
                seconds: MIRROR_RACE_WINDOW.as_secs(),
            }
            .fail(),
        }
    }
}
