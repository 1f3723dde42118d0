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

use std::path::Path;

use snafu::ResultExt;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufReader, BufWriter},
};
use tracing::debug;

use crate::{
    error::{FileReadSnafu, FileWriteSnafu, Result},
    session::Session,
};

const COPY_BUF: usize = 512 * 1024;

/// Concatenate the completed segments into the final output file.
///
/// Parts 1..n are appended onto part 0's file in index order, each consumed
/// segment file is deleted, part 0's file is renamed to the suggested name
/// and the state sidecar goes away. Any I/O failure surfaces immediately and
/// leaves the remaining segments on disk for a future resume.
pub async fn assemble(session: &Session, state_file: &Path) -> Result<()> {
    let Some(first) = session.parts.first() else {
        return Ok(());
    };

    if session.parts.len() > 1 {
        let dest = OpenOptions::new()
            .append(true)
            .open(&first.file_name)
            .await
            .context(FileWriteSnafu)?;
        let mut writer = BufWriter::with_capacity(COPY_BUF, dest);
        for part in &session.parts[1..] {
            let src = File::open(&part.file_name).await.context(FileReadSnafu)?;
            let mut reader = BufReader::with_capacity(COPY_BUF, src);
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .context(FileWriteSnafu)?;
            fs::remove_file(&part.file_name)
                .await
                .context(FileWriteSnafu)?;
            debug!(part = %part.file_name, "concatenated");
        }
        writer.flush().await.context(FileWriteSnafu)?;
    }

    fs::rename(&first.file_name, &session.suggested_file_name)
        .await
        .context(FileWriteSnafu)?;

    match fs::remove_file(state_file).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(FileWriteSnafu),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Headers, session::Part};

    fn session_with_parts(dir: &Path, pieces: &[&[u8]]) -> Session {
        let suggested = dir.join("joined.bin").to_string_lossy().into_owned();
        let parts = pieces
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let mut p = Part::new(format!("{suggested}.part{i}"), 0, 0);
                p.written = pieces[i].len() as i64;
                p
            })
            .collect();
        Session {
            location: String::new(),
            suggested_file_name: suggested,
            content_md5: String::new(),
            accept_ranges: "bytes".to_owned(),
            content_type: String::new(),
            status_code: 200,
            content_length: pieces.iter().map(|p| p.len() as i64).sum(),
            header_map: Headers::default(),
            parts,
        }
    }

    #[tokio::test]
    async fn concatenates_in_index_order_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_parts(dir.path(), &[b"Hello", b" ", b"World"]);
        for (part, bytes) in session.parts.iter().zip([&b"Hello"[..], b" ", b"World"]) {
            fs::write(&part.file_name, bytes).await.unwrap();
        }
        let state_file = dir.path().join("joined.bin.json");
        fs::write(&state_file, "{}").await.unwrap();

        assemble(&session, &state_file).await.unwrap();

        let joined = fs::read(&session.suggested_file_name).await.unwrap();
        assert_eq!(joined, b"Hello World");
        for part in &session.parts {
            assert!(!Path::new(&part.file_name).exists());
        }
        assert!(!state_file.exists());
    }

    #[tokio::test]
    async fn single_part_is_just_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_parts(dir.path(), &[b"solo"]);
        fs::write(&session.parts[0].file_name, b"solo").await.unwrap();

        // no sidecar on disk is fine
        let state_file = dir.path().join("joined.bin.json");
        assemble(&session, &state_file).await.unwrap();

        let joined = fs::read(&session.suggested_file_name).await.unwrap();
        assert_eq!(joined, b"solo");
        assert!(!Path::new(&session.parts[0].file_name).exists());
    }

    #[tokio::test]
    async fn missing_segment_surfaces_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_with_parts(dir.path(), &[b"Hello", b"World"]);
        fs::write(&session.parts[0].file_name, b"Hello").await.unwrap();
        // part1's file is absent

        let state_file = dir.path().join("joined.bin.json");
        fs::write(&state_file, "{}").await.unwrap();

        assert!(assemble(&session, &state_file).await.is_err());
        assert!(state_file.exists());
        assert!(Path::new(&session.parts[0].file_name).exists());
    }
}
