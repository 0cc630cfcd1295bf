//! Persisted record of what the previous run wrote.
//!
//! The log lives as JSON next to the generated extension. Before a fresh
//! write, the cleaner deletes exactly the files the previous run recorded,
//! verifying their hashes so a file the user edited (or replaced) since is
//! left alone. The same ownership test decides whether an existing file at
//! an output path is a collision or just our own stale output.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// One file written by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrittenFile {
    /// Path relative to the output extension folder.
    pub path: String,
    /// Virtual path of the content, when it has one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub virtual_path: Option<String>,
    pub sha256: String,
    pub bytes: u64,
}

/// The run log for one output extension folder.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default)]
    files: Vec<WrittenFile>,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn relative_to(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

impl RunLog {
    pub const FILE_NAME: &'static str = "forge_log.json";

    /// Load the log stored in `dir`; a missing or unreadable log is empty.
    pub fn load(dir: &Path) -> RunLog {
        let path = dir.join(Self::FILE_NAME);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(log) => log,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "run log unreadable, ignoring");
                    RunLog::default()
                }
            },
            Err(_) => RunLog::default(),
        }
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(dir.join(Self::FILE_NAME), json)?;
        Ok(())
    }

    pub fn files(&self) -> &[WrittenFile] {
        &self.files
    }

    /// Record a file just written to disk, hashing its final content.
    pub fn record(&mut self, dir: &Path, path: &Path, virtual_path: Option<&str>) -> Result<()> {
        let bytes = fs::read(path)?;
        self.files.push(WrittenFile {
            path: relative_to(dir, path),
            virtual_path: virtual_path.map(str::to_string),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
        });
        Ok(())
    }

    /// True when `path` was written by the logged run and still has the
    /// recorded content.
    pub fn owns(&self, dir: &Path, path: &Path) -> bool {
        let rel = relative_to(dir, path);
        let Some(entry) = self.files.iter().find(|f| f.path == rel) else {
            return false;
        };
        match fs::read(path) {
            Ok(bytes) => sha256_hex(&bytes) == entry.sha256,
            Err(_) => false,
        }
    }

    /// Delete every file the logged run wrote, skipping files whose
    /// content changed since (with a warning). Returns the paths removed.
    pub fn cleanup(&self, dir: &Path) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for entry in &self.files {
            let path = dir.join(&entry.path);
            if !path.exists() {
                continue;
            }
            if !self.owns(dir, &path) {
                warn!(path = %path.display(), "skipping cleanup of externally changed file");
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed prior output");
                    removed.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libraries/jobs.xml");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"<diff/>").unwrap();

        let mut log = RunLog::default();
        log.record(dir.path(), &file, Some("libraries/jobs.xml"))
            .unwrap();
        log.store(dir.path()).unwrap();

        let reloaded = RunLog::load(dir.path());
        assert_eq!(reloaded.files().len(), 1);
        assert_eq!(reloaded.files()[0].path, "libraries/jobs.xml");
        assert!(reloaded.owns(dir.path(), &file));
    }

    #[test]
    fn test_ownership_fails_after_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.xml");
        fs::write(&file, b"mine").unwrap();

        let mut log = RunLog::default();
        log.record(dir.path(), &file, None).unwrap();
        fs::write(&file, b"user edited this").unwrap();
        assert!(!log.owns(dir.path(), &file));
    }

    #[test]
    fn test_cleanup_respects_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let ours = dir.path().join("ours.xml");
        let theirs = dir.path().join("theirs.xml");
        fs::write(&ours, b"generated").unwrap();
        fs::write(&theirs, b"generated").unwrap();

        let mut log = RunLog::default();
        log.record(dir.path(), &ours, None).unwrap();
        log.record(dir.path(), &theirs, None).unwrap();
        fs::write(&theirs, b"hand edited").unwrap();

        let removed = log.cleanup(dir.path());
        assert_eq!(removed.len(), 1);
        assert!(!ours.exists());
        assert!(theirs.exists());
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::load(dir.path());
        assert!(log.files().is_empty());
    }
}
