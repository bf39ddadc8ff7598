//! Persistence of received files.
//!
//! The session never writes to disk itself; completed transfers are
//! handed to an [`ArtifactSink`]. The sink decides where the bytes go and
//! reports a human-readable location back.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PersistError;
use crate::transfer::receiver::ReceivedFile;

#[async_trait]
pub trait ArtifactSink: Send + Sync + 'static {
    /// Store `file`, returning where it ended up.
    async fn save(&self, file: ReceivedFile) -> Result<String, PersistError>;
}

// ── DirectorySink ────────────────────────────────────────────────

/// Writes files into a single download directory.
///
/// Names are reduced to their final component with separators and control
/// characters replaced, and never overwrite an existing file: a clash gets
/// a ` (n)` suffix before the extension.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn free_path(&self, name: &str) -> PathBuf {
        let candidate = self.dir.join(name);
        if !path_exists(&candidate).await {
            return candidate;
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };

        let mut n = 1u32;
        loop {
            let numbered = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            let candidate = self.dir.join(numbered);
            if !path_exists(&candidate).await {
                return candidate;
            }
            n += 1;
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, file: ReceivedFile) -> Result<String, PersistError> {
        let write_err = |path: &Path, source| PersistError::Write {
            path: path.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_err(&self.dir, e))?;

        let path = self.free_path(&sanitize_file_name(&file.name)).await;
        tokio::fs::write(&path, &file.data)
            .await
            .map_err(|e| write_err(&path, e))?;

        tracing::info!(
            path = %path.display(),
            bytes = file.len(),
            digest = %file.digest.to_hex(),
            "saved received file"
        );
        Ok(path.display().to_string())
    }
}

/// Reduce a peer-supplied name to something safe to create in one directory.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        String::from("download")
    } else {
        cleaned.to_owned()
    }
}

// ── MemorySink ───────────────────────────────────────────────────

/// Keeps received files in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    saved: Mutex<Vec<ReceivedFile>>,
    should_fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every file.
    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            should_fail: true,
        }
    }

    pub fn saved(&self) -> Vec<ReceivedFile> {
        self.saved
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn save(&self, file: ReceivedFile) -> Result<String, PersistError> {
        if self.should_fail {
            return Err(PersistError::Rejected(format!("{} refused", file.name)));
        }
        let location = format!("memory:{}", file.name);
        self.saved
            .lock()
            .map_err(|_| PersistError::Rejected("memory sink poisoned".into()))?
            .push(file);
        Ok(location)
    }
}
