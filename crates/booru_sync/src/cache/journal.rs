//! Append-only JSON Lines journal.
//!
//! Every durable cache in the crate (differences, patch state, created tags,
//! HTTP responses) is a map rebuilt from one of these files on startup. Lines
//! are appended under a mutex so concurrent writers never interleave, and a
//! line that fails to parse is skipped with a warning instead of aborting the
//! load.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while opening or appending to a journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error on journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Journal lock poisoned: {path}")]
    Poisoned { path: PathBuf },
}

impl JournalError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;

/// A typed append-only JSONL file.
pub struct Journal<R> {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    _record: PhantomData<fn(R) -> R>,
}

impl<R> std::fmt::Debug for Journal<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

impl<R: Serialize + DeserializeOwned> Journal<R> {
    /// Open (creating if needed) the journal at `path` and return every
    /// readable record in file order.
    ///
    /// If the file ends in a torn line, a newline is written first so the
    /// next append starts on a fresh line; the torn line itself is skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<R>)> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| JournalError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| JournalError::io(path, e))?;

        let records = read_records(&mut file, path)?;
        fence_torn_tail(&mut file, path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file: Arc::new(Mutex::new(file)),
                _record: PhantomData,
            },
            records,
        ))
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &R) -> Result<()> {
        let line = encode_line(record)?;
        write_line(&self.file, &self.path, &line)
    }

    /// Like [`Journal::append`], but the write runs on tokio's blocking pool.
    /// Meant for large records appended from async code.
    pub async fn append_blocking(&self, record: &R) -> Result<()> {
        let line = encode_line(record)?;
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_line(&file, &path, &line))
            .await
            .map_err(|e| JournalError::io(&self.path, std::io::Error::other(e)))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_line<R: Serialize>(record: &R) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

fn write_line(file: &Mutex<File>, path: &Path, line: &str) -> Result<()> {
    let mut file = file.lock().map_err(|_| JournalError::Poisoned {
        path: path.to_path_buf(),
    })?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| JournalError::io(path, e))
}

fn read_records<R: DeserializeOwned>(file: &mut File, path: &Path) -> Result<Vec<R>> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| JournalError::io(path, e))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (index, line) in BufReader::new(&mut *file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                // Invalid UTF-8 is treated like any other corrupt line
                tracing::warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable journal line");
                skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = index + 1, error = %e, "Skipping corrupt journal line");
                skipped += 1;
            }
        }
    }

    tracing::debug!(
        path = %path.display(),
        records = records.len(),
        skipped,
        "Loaded journal"
    );
    Ok(records)
}

fn fence_torn_tail(file: &mut File, path: &Path) -> Result<()> {
    let len = file
        .metadata()
        .map_err(|e| JournalError::io(path, e))?
        .len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| JournalError::io(path, e))?;

    if last[0] != b'\n' {
        file.write_all(b"\n")
            .map_err(|e| JournalError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Line {
        id: i64,
        value: String,
    }

    fn line(id: i64, value: &str) -> Line {
        Line {
            id,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_open_creates_missing_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/cache.jsonl");

        let (journal, records) = Journal::<Line>::open(&path).unwrap();
        assert!(records.is_empty());
        assert!(path.exists());
        assert_eq!(journal.path(), path);
    }

    #[test]
    fn test_append_then_reload_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");

        {
            let (journal, _) = Journal::<Line>::open(&path).unwrap();
            journal.append(&line(1, "a")).unwrap();
            journal.append(&line(2, "b")).unwrap();
            journal.append(&line(1, "c")).unwrap();
        }

        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records, vec![line(1, "a"), line(2, "b"), line(1, "c")]);
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        std::fs::write(
            &path,
            "{\"id\":1,\"value\":\"a\"}\nnot json at all\n\n{\"id\":2,\"value\":\"b\"}\n",
        )
        .unwrap();

        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records, vec![line(1, "a"), line(2, "b")]);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        let mut bytes = b"{\"id\":1,\"value\":\"a\"}\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'{', 0xc3, b'\n']);
        bytes.extend_from_slice(b"{\"id\":2,\"value\":\"b\"}\n");
        std::fs::write(&path, bytes).unwrap();

        let (journal, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records, vec![line(1, "a"), line(2, "b")]);

        journal.append(&line(3, "c")).unwrap();
        drop(journal);
        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_append_blocking_writes_whole_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("responses.jsonl");
        let (journal, _) = Journal::<Line>::open(&path).unwrap();
        let journal = Arc::new(journal);

        let tasks: Vec<_> = (0..4)
            .map(|t| {
                let journal = Arc::clone(&journal);
                tokio::spawn(async move {
                    for i in 0..20 {
                        journal
                            .append_blocking(&line(t * 100 + i, &"y".repeat(4096)))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        drop(journal);

        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records.len(), 80);
        assert!(records.iter().all(|r| r.value.len() == 4096));
    }

    #[test]
    fn test_torn_tail_is_fenced_before_next_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        std::fs::write(&path, "{\"id\":1,\"value\":\"a\"}\n{\"id\":2,\"va").unwrap();

        {
            let (journal, records) = Journal::<Line>::open(&path).unwrap();
            assert_eq!(records, vec![line(1, "a")]);
            journal.append(&line(3, "c")).unwrap();
        }

        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records, vec![line(1, "a"), line(3, "c")]);
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        let (journal, _) = Journal::<Line>::open(&path).unwrap();
        let journal = Arc::new(journal);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let journal = Arc::clone(&journal);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        journal.append(&line(t * 100 + i, &"x".repeat(64))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(journal);

        let (_, records) = Journal::<Line>::open(&path).unwrap();
        assert_eq!(records.len(), 400);
    }
}
