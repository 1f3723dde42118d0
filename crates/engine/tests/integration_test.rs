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
    io,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_test::TestServer;
use partfetch::{
    Config, EntryPoint, Headers, Orchestrator, Outcome, Part, Prompter, Session, load_state,
    save_state,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Behavior knobs for the in-process origin server.
#[derive(Clone, Default)]
struct ServerOptions {
    /// Advertise `Accept-Ranges: bytes` and honor Range requests.
    accept_ranges: bool,
    /// Advertise ranges but answer every request with a full 200 body.
    ignore_range: bool,
    /// First ranged request starting at `.0` delivers `.1` bytes and then
    /// aborts the connection; later requests behave normally.
    truncate_first: Option<(u64, usize)>,
    /// Every ranged request starting below this offset aborts before any
    /// byte is delivered.
    fail_ranges_below: Option<u64>,
}

#[derive(Clone)]
struct AppState {
    content: Arc<Vec<u8>>,
    options: ServerOptions,
    /// Range header (or None) of every GET, in arrival order.
    requests: Arc<Mutex<Vec<Option<String>>>>,
    truncated: Arc<Mutex<bool>>,
}

impl AppState {
    fn new(content: Vec<u8>, options: ServerOptions) -> Self {
        AppState {
            content: Arc::new(content),
            options,
            requests: Arc::new(Mutex::new(Vec::new())),
            truncated: Arc::new(Mutex::new(false)),
        }
    }

    fn ranged_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn request_count(&self) -> usize { self.requests.lock().unwrap().len() }
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start, end) = value.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        total.checked_sub(1)?
    } else {
        end.parse().ok()?
    };
    (start <= end && end < total).then_some((start, end))
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    state.requests.lock().unwrap().push(range_header.clone());

    let total = state.content.len();
    let range = range_header
        .as_deref()
        .and_then(|value| parse_range(value, total));

    if state.options.accept_ranges && !state.options.ignore_range {
        if let Some((start, end)) = range {
            if state
                .options
                .fail_ranges_below
                .is_some_and(|limit| (start as u64) < limit)
            {
                return broken_body_response(start, end, Bytes::new());
            }
            if let Some((at, deliver)) = state.options.truncate_first {
                let mut truncated = state.truncated.lock().unwrap();
                if start as u64 == at && !*truncated {
                    *truncated = true;
                    let head = Bytes::copy_from_slice(
                        &state.content[start..(start + deliver).min(end + 1)],
                    );
                    return broken_body_response(start, end, head);
                }
            }
            let slice = Bytes::copy_from_slice(&state.content[start..=end]);
            let mut response_headers = HeaderMap::new();
            response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
            );
            return (StatusCode::PARTIAL_CONTENT, response_headers, slice).into_response();
        }
    }

    let mut response_headers = HeaderMap::new();
    if state.options.accept_ranges {
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    (
        StatusCode::OK,
        response_headers,
        Bytes::copy_from_slice(&state.content),
    )
        .into_response()
}

/// A 206 whose body dies mid-flight: the delivered prefix reaches the client,
/// then the connection aborts.
fn broken_body_response(start: usize, end: usize, head: Bytes) -> Response {
    // an empty prefix must not be written at all: a zero-length frame would
    // read as a clean end of body instead of an abort
    let first_step = u8::from(head.is_empty());
    let stream = futures::stream::unfold(first_step, move |step| {
        let head = head.clone();
        async move {
            match step {
                0 => Some((Ok::<Bytes, io::Error>(head), 1)),
                1 => {
                    // let the first frame flush before killing the stream
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Some((Err(io::Error::other("injected transport failure")), 2))
                }
                _ => None,
            }
        }
    });
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/unknown"))
        .body(Body::from_stream(stream))
        .unwrap()
}

fn spawn_server(state: AppState) -> TestServer {
    let app = Router::new().route("/file", get(handle_get)).with_state(state);
    TestServer::builder()
        .http_transport()
        .build(app)
        .expect("failed to start test server")
}

fn file_url(server: &TestServer) -> String {
    let base = server
        .server_address()
        .expect("server should expose an address")
        .to_string();
    if base.ends_with('/') {
        format!("{base}file")
    } else {
        format!("{base}/file")
    }
}

struct NoPrompt;

impl Prompter for NoPrompt {
    fn confirm_overwrite(&self, _file_name: &str) -> io::Result<bool> { Ok(false) }
}

struct YesPrompt;

impl Prompter for YesPrompt {
    fn confirm_overwrite(&self, _file_name: &str) -> io::Result<bool> { Ok(true) }
}

fn test_config(output: &Path, parts: u32) -> Config {
    Config {
        parts,
        quiet: true,
        output: Some(output.to_string_lossy().into_owned()),
        ..Config::default()
    }
}

async fn run(config: Config, entry: EntryPoint) -> partfetch::Result<Outcome> {
    Orchestrator::new(config, CancellationToken::new(), Box::new(NoPrompt))
        .run(entry)
        .await
}

fn assert_no_leftovers(output: &Path) {
    for i in 0..4 {
        let part = format!("{}.part{i}", output.display());
        assert!(!Path::new(&part).exists(), "{part} should be gone");
    }
    let sidecar = format!("{}.json", output.display());
    assert!(!Path::new(&sidecar).exists(), "{sidecar} should be gone");
}

// Scenario 1: no Accept-Ranges forces the planner down to a single part.
#[tokio::test]
async fn single_part_happy_path() {
    let state = AppState::new(b"hello world".to_vec(), ServerOptions::default());
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("greeting.txt");

    let outcome = run(test_config(&output, 2), EntryPoint::Url(file_url(&server)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Completed { written: 11, .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"hello world");
    assert_no_leftovers(&output);
    // one resolver GET plus a single open-ended worker GET
    assert_eq!(state.request_count(), 2);
    assert_eq!(state.ranged_requests(), vec!["bytes=0-"]);
}

// Scenario 2: two ranged parts assemble byte-exactly and clean up after
// themselves.
#[tokio::test]
async fn two_part_range_download() {
    let state = AppState::new(
        b"Hello World".to_vec(),
        ServerOptions {
            accept_ranges: true,
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("hello.bin");

    let outcome = run(test_config(&output, 2), EntryPoint::Url(file_url(&server)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Completed { written: 11, .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"Hello World");
    assert_no_leftovers(&output);

    let mut ranges = state.ranged_requests();
    ranges.sort();
    assert_eq!(ranges, vec!["bytes=0-4", "bytes=5-10"]);
}

// Scenario 3: the server advertises ranges but answers 200 everywhere; part 0
// adopts the full body, the other worker skips and removes its segment.
#[tokio::test]
async fn range_ignored_part_zero_carries_the_file() {
    let content = b"full body wins the day".to_vec();
    let state = AppState::new(
        content.clone(),
        ServerOptions {
            accept_ranges: true,
            ignore_range: true,
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("adopted.bin");

    let outcome = run(test_config(&output, 2), EntryPoint::Url(file_url(&server)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Completed { .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), content);
    assert_no_leftovers(&output);
}

// Scenario 4: a transport failure after 3 bytes retries from byte 3; the part
// sees exactly two HTTP attempts.
#[tokio::test]
async fn transient_failure_then_resume_from_offset() {
    let state = AppState::new(
        b"Hello World".to_vec(),
        ServerOptions {
            accept_ranges: true,
            truncate_first: Some((0, 3)),
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("retry.bin");

    let outcome = run(test_config(&output, 2), EntryPoint::Url(file_url(&server)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Completed { written: 11, .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"Hello World");
    assert_no_leftovers(&output);

    let part_zero: Vec<String> = state
        .ranged_requests()
        .into_iter()
        .filter(|r| r != "bytes=5-10")
        .collect();
    assert_eq!(part_zero, vec!["bytes=0-4", "bytes=3-4"]);
}

// Scenario 5: a persisted session resumes only the unfinished tail of part 0
// and deletes the sidecar on completion.
#[tokio::test]
async fn interrupted_session_resumes_where_it_stopped() {
    let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let state = AppState::new(
        content.clone(),
        ServerOptions {
            accept_ranges: true,
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("resumed.bin");
    let output_name = output.to_string_lossy().into_owned();

    let mut part0 = Part::new(format!("{output_name}.part0"), 0, 2047);
    part0.written = 2000;
    let mut part1 = Part::new(format!("{output_name}.part1"), 2048, 4095);
    part1.written = 2048;

    tokio::fs::write(&part0.file_name, &content[..2000]).await.unwrap();
    tokio::fs::write(&part1.file_name, &content[2048..]).await.unwrap();

    let session = Session {
        location:            file_url(&server),
        suggested_file_name: output_name.clone(),
        content_md5:         String::new(),
        accept_ranges:       "bytes".to_owned(),
        content_type:        "application/octet-stream".to_owned(),
        status_code:         200,
        content_length:      4096,
        header_map:          Headers::default(),
        parts:               vec![part0, part1],
    };
    let sidecar = dir.path().join("resumed.bin.json");
    save_state(&sidecar, &session).await.unwrap();

    let outcome = run(
        test_config(&output, 2),
        EntryPoint::Resume(sidecar.clone()),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, Outcome::Completed { written: 4096, .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), content);
    assert!(!sidecar.exists());
    assert_no_leftovers(&output);
    // only the unfinished tail of part 0 went over the wire
    assert_eq!(state.ranged_requests(), vec!["bytes=2000-2047"]);
}

// Resume guard: a remote whose length changed must be rejected without
// touching any file.
#[tokio::test]
async fn resume_rejects_a_changed_remote() {
    let state = AppState::new(
        b"Hello World".to_vec(),
        ServerOptions {
            accept_ranges: true,
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("stale.bin");
    let output_name = output.to_string_lossy().into_owned();

    let mut part0 = Part::new(format!("{output_name}.part0"), 0, 9_998);
    part0.written = 1234;
    tokio::fs::write(&part0.file_name, vec![7u8; 1234]).await.unwrap();

    let session = Session {
        location:            file_url(&server),
        suggested_file_name: output_name.clone(),
        content_md5:         String::new(),
        accept_ranges:       "bytes".to_owned(),
        content_type:        String::new(),
        status_code:         200,
        content_length:      9_999,
        header_map:          Headers::default(),
        parts:               vec![part0.clone()],
    };
    let sidecar = dir.path().join("stale.bin.json");
    save_state(&sidecar, &session).await.unwrap();

    let err = run(test_config(&output, 2), EntryPoint::Resume(sidecar.clone()))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("ContentLength mismatch"));
    assert!(sidecar.exists());
    let untouched = tokio::fs::read(&part0.file_name).await.unwrap();
    assert_eq!(untouched, vec![7u8; 1234]);
    assert!(!output.exists());
}

// Scenario 6: only the second candidate answers 200; the race picks it and
// the download proceeds from it.
#[tokio::test]
async fn mirror_race_picks_the_responsive_candidate() {
    let content = b"mirror payload".to_vec();
    let state = AppState::new(content.clone(), ServerOptions::default());
    let server = spawn_server(state.clone());
    let good = file_url(&server);
    let bad_one = format!("{}missing", good.trim_end_matches("file"));
    let bad_two = format!("{}also-missing", good.trim_end_matches("file"));

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("mirrored.bin");

    let outcome = run(
        test_config(&output, 1),
        EntryPoint::Mirrors(vec![bad_one, good.clone(), bad_two]),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, Outcome::Completed { .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), content);
}

// A part that keeps failing gives up after max_retry + 1 attempts and leaves
// a resumable sidecar behind.
#[tokio::test]
async fn give_up_persists_state_for_a_later_resume() {
    let state = AppState::new(
        b"Hello World".to_vec(),
        ServerOptions {
            accept_ranges: true,
            fail_ranges_below: Some(5),
            ..ServerOptions::default()
        },
    );
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("doomed.bin");

    let config = Config {
        max_retry: 1,
        ..test_config(&output, 2)
    };
    let err = run(config, EntryPoint::Url(file_url(&server)))
        .await
        .unwrap_err();

    assert!(err.is_expected());
    assert!(err.to_string().contains("give up!"));

    // max_retry = 1 allows exactly two attempts on part 0
    let part_zero: Vec<String> = state
        .ranged_requests()
        .into_iter()
        .filter(|r| r.strip_prefix("bytes=").is_some_and(|r| r.starts_with('0')))
        .collect();
    assert_eq!(part_zero.len(), 2);

    let sidecar = format!("{}.json", output.display());
    let saved = load_state(Path::new(&sidecar)).await.unwrap();
    assert_eq!(saved.content_length, 11);
    assert_eq!(saved.parts.len(), 2);
    assert_eq!(saved.parts[0].written, 0);
    assert_eq!(saved.parts[1].written, 6);
}

// Declining the overwrite prompt aborts cleanly without touching anything.
#[tokio::test]
async fn declined_overwrite_aborts_without_changes() {
    let state = AppState::new(b"new content".to_vec(), ServerOptions::default());
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("existing.bin");
    tokio::fs::write(&output, b"old content").await.unwrap();

    let outcome = run(test_config(&output, 2), EntryPoint::Url(file_url(&server)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Aborted));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"old content");
}

// Accepting the prompt replaces the file.
#[tokio::test]
async fn confirmed_overwrite_downloads_fresh() {
    let state = AppState::new(b"new content".to_vec(), ServerOptions::default());
    let server = spawn_server(state.clone());
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("existing.bin");
    tokio::fs::write(&output, b"old content").await.unwrap();

    let outcome = Orchestrator::new(
        test_config(&output, 2),
        CancellationToken::new(),
        Box::new(YesPrompt),
    )
    .run(EntryPoint::Url(file_url(&server)))
    .await
    .unwrap();

    assert!(matches!(outcome, Outcome::Completed { .. }));
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"new content");
}

// A terminal non-2xx from the resolver is an expected, exit-1 class error.
#[tokio::test]
async fn resolver_terminal_error_is_expected() {
    let state = AppState::new(b"irrelevant".to_vec(), ServerOptions::default());
    let server = spawn_server(state);
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("nope.bin");
    let missing = format!("{}nothing-here", file_url(&server).trim_end_matches("file"));

    let err = run(test_config(&output, 2), EntryPoint::Url(missing))
        .await
        .unwrap_err();
    assert!(err.is_expected());
    assert!(err.to_string().contains("unexpected status"));
}

// A pre-cancelled token surfaces as an expected cancellation before any
// state is created.
#[tokio::test]
async fn cancellation_is_expected_and_touches_nothing() {
    let state = AppState::new(b"irrelevant".to_vec(), ServerOptions::default());
    let server = spawn_server(state);
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("cancelled.bin");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = Orchestrator::new(test_config(&output, 2), cancel, Box::new(NoPrompt))
        .run(EntryPoint::Url(file_url(&server)))
        .await
        .unwrap_err();

    assert!(err.is_canceled());
    assert!(err.is_expected());
    assert!(!output.exists());
}
