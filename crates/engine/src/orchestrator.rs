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
    path::{Path, PathBuf},
    sync::Arc,
};

use reqwest::cookie::Jar;
use snafu::ResultExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    assembler,
    client::{build_client, build_probe_client},
    config::Config,
    error::{
        DigestMismatchSnafu, DownloadError, LengthMismatchSnafu, PromptSnafu, Result,
        WorkerPanicSnafu,
    },
    mirror::MirrorSelector,
    planner::plan_parts,
    progress::Progress,
    resolver::Resolver,
    session::Session,
    state::{load_state, save_state},
    worker::PartWorker,
};

/// How a run was started.
#[derive(Debug)]
pub enum EntryPoint {
    /// Positional URL.
    Url(String),
    /// `--continue <state.json>`: resume a persisted session.
    Resume(PathBuf),
    /// `--best-mirror`: race candidate URLs, download the winner.
    Mirrors(Vec<String>),
}

/// Answer to the "file exists, overwrite?" question.
///
/// Injected so the engine stays testable without a terminal; the binary
/// plugs in a stdin-backed implementation.
pub trait Prompter: Send + Sync {
    fn confirm_overwrite(&self, file_name: &str) -> std::io::Result<bool>;
}

/// Terminal outcome of a run that did not error.
#[derive(Debug)]
pub enum Outcome {
    /// All bytes on disk under the final name, no sidecars left behind.
    Completed { file_name: String, written: i64 },
    /// The user declined to overwrite an existing file; nothing was touched.
    Aborted,
    /// Workers stopped short of completion; the session was persisted.
    Saved { state_file: String },
}

/// Wires resolver, planner, worker fan-out and assembler together and owns
/// the resume-vs-fresh branching.
pub struct Orchestrator {
    config:   Config,
    cancel:   CancellationToken,
    prompter: Box<dyn Prompter>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: Config, cancel: CancellationToken, prompter: Box<dyn Prompter>) -> Self {
        Orchestrator {
            config,
            cancel,
            prompter,
        }
    }

    pub async fn run(&self, entry: EntryPoint) -> Result<Outcome> {
        self.run_inner(entry).await.map_err(|e| e.annotate("run"))
    }

    async fn run_inner(&self, entry: EntryPoint) -> Result<Outcome> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&self.config, Arc::clone(&jar))?;

        let mut headers = self.config.headers.clone();
        let mut output = self.config.output.clone();
        let mut last_session: Option<Session> = None;
        let mut resume_state_path: Option<PathBuf> = None;

        let user_url = match entry {
            EntryPoint::Resume(path) => {
                let loaded = load_state(&path).await?;
                headers = loaded.header_map.clone();
                output = Some(loaded.suggested_file_name.clone());
                let url = loaded.location.clone();
                resume_state_path = Some(path);
                last_session = Some(loaded);
                url
            }
            EntryPoint::Mirrors(candidates) => {
                let selector = MirrorSelector {
                    client:      build_probe_client(&self.config)?,
                    credentials: self.config.credentials.clone(),
                    cancel:      self.cancel.clone(),
                };
                selector.select(&candidates).await?
            }
            EntryPoint::Url(url) => url,
        };

        headers.ensure_user_agent(self.config.user_agent.agent());

        let resolver = Resolver {
            client:      client.clone(),
            jar:         Arc::clone(&jar),
            headers:     headers.clone(),
            credentials: self.config.credentials.clone(),
            cancel:      self.cancel.clone(),
        };
        let mut session = resolver.follow(&user_url, output.as_deref()).await?;

        if let Some(mut last) = last_session {
            // a changed remote invalidates every byte already on disk
            snafu::ensure!(
                last.content_md5 == session.content_md5,
                DigestMismatchSnafu {
                    remote:   session.content_md5,
                    expected: last.content_md5,
                }
            );
            snafu::ensure!(
                last.content_length == session.content_length,
                LengthMismatchSnafu {
                    remote:   session.content_length,
                    expected: last.content_length,
                }
            );
            last.location = session.location.clone();
            session = last;
        } else if self.config.parts > 0 {
            let mut desired = self.config.parts;
            if !session.is_accept_ranges() {
                desired = 1;
            }
            session.header_map = headers.clone();
            session.parts = plan_parts(
                &session.suggested_file_name,
                session.content_length,
                desired,
            );
            if tokio::fs::try_exists(&session.suggested_file_name)
                .await
                .unwrap_or(false)
            {
                let overwrite = self
                    .prompter
                    .confirm_overwrite(&session.suggested_file_name)
                    .context(PromptSnafu)?;
                if !overwrite {
                    return Ok(Outcome::Aborted);
                }
                session.remove_files().await?;
            }
        }

        let progress = Progress::new(self.config.quiet);
        progress.println(session.summary());

        let mut join_set: JoinSet<(usize, crate::session::Part, Result<()>)> = JoinSet::new();
        for (index, part) in session.parts.iter().enumerate() {
            if part.is_done() {
                continue;
            }
            let name = format!("P{:02}", index + 1);
            let worker = PartWorker {
                client:       client.clone(),
                url:          session.location.clone(),
                headers:      session.header_map.clone(),
                credentials:  self.config.credentials.clone(),
                base_timeout: self.config.timeout,
                max_retry:    self.config.max_retry,
                order:        index,
                name:         name.clone(),
                cancel:       self.cancel.clone(),
                bar:          progress.add_part_bar(&name, part.total()),
            };
            let part = part.clone();
            join_set.spawn(async move {
                let (part, result) = worker.download(part).await;
                (index, part, result)
            });
        }

        let mut first_err: Option<DownloadError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, part, result)) => {
                    session.parts[index] = part;
                    if let Err(e) = result
                        && first_err.is_none()
                    {
                        first_err = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_err.is_none() {
                        first_err = Some(
                            WorkerPanicSnafu {
                                message: join_err.to_string(),
                            }
                            .build(),
                        );
                    }
                }
            }
        }
        session.retain_actual_parts();

        // a failure caused by the user's interrupt is expected, not a defect
        if first_err.is_some() && self.cancel.is_cancelled() {
            first_err = Some(DownloadError::Canceled);
        }

        let canceled = first_err.as_ref().is_some_and(DownloadError::is_canceled);
        if !canceled && self.config.parts > 0 {
            let written = session.total_written();
            if written == session.content_length
                || (session.content_length <= 0 && written > 0)
            {
                let state_path = resume_state_path
                    .unwrap_or_else(|| PathBuf::from(session.state_file_name()));
                assembler::assemble(&session, &state_path).await?;
                progress.println(format!(
                    "{:?} saved [{}/{}]",
                    session.suggested_file_name, session.content_length, written
                ));
                return Ok(Outcome::Completed {
                    file_name: session.suggested_file_name,
                    written,
                });
            }
        }

        // anything short of a clean finish leaves a resumable session behind,
        // keyed by the URL the user actually typed
        session.location = user_url;
        let state_file = session.state_file_name();
        debug!(%state_file, "persisting session");
        match save_state(Path::new(&state_file), &session).await {
            Ok(()) => progress.println(format!("session state saved to {state_file:?}")),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(Outcome::Saved { state_file }),
        }
    }
}
