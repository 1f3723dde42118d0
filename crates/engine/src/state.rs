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

use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tokio::fs;

use crate::{
    error::{FileReadSnafu, FileWriteSnafu, Result, StateFileSnafu},
    session::Session,
};

/// Load a session back from its JSON sidecar.
pub async fn load_state(path: &Path) -> Result<Session> {
    let raw = fs::read_to_string(path).await.context(FileReadSnafu)?;
    serde_json::from_str(&raw).context(StateFileSnafu { path })
}

/// Persist a session to its sidecar, pretty printed.
///
/// The write goes to a sibling temp file first and is renamed over the
/// target, so an interrupted save never corrupts an existing sidecar.
pub async fn save_state(path: &Path, session: &Session) -> Result<()> {
    let raw = serde_json::to_string_pretty(session).context(StateFileSnafu { path })?;
    let tmp = tmp_path(path);
    fs::write(&tmp, raw).await.context(FileWriteSnafu)?;
    fs::rename(&tmp, path).await.context(FileWriteSnafu)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Headers, session::Part};

    fn sample_session() -> Session {
        Session {
            location:            "https://example.com/a.bin".to_owned(),
            suggested_file_name: "a.bin".to_owned(),
            content_md5:         "md5token".to_owned(),
            accept_ranges:       "bytes".to_owned(),
            content_type:        "application/octet-stream".to_owned(),
            status_code:         200,
            content_length:      100,
            header_map:          Headers::default(),
            parts:               vec![Part::new("a.bin.part0".to_owned(), 0, 99)],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin.json");

        let session = sample_session();
        save_state(&path, &session).await.unwrap();

        let loaded = load_state(&path).await.unwrap();
        assert_eq!(loaded.location, session.location);
        assert_eq!(loaded.content_md5, session.content_md5);
        assert_eq!(loaded.content_length, session.content_length);
        assert_eq!(loaded.parts.len(), 1);

        // the temp file must not survive a successful save
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn save_replaces_an_existing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin.json");

        let mut session = sample_session();
        save_state(&path, &session).await.unwrap();

        session.parts[0].written = 42;
        save_state(&path, &session).await.unwrap();

        let loaded = load_state(&path).await.unwrap();
        assert_eq!(loaded.parts[0].written, 42);
    }

    #[tokio::test]
    async fn corrupted_sidecar_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").await.unwrap();

        let err = load_state(&path).await.unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
