//! Catalog pair emission.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::Result;
use crate::hash::md5_hex;
use crate::vpath;

#[derive(Debug, Clone)]
struct PackedFile {
    path: String,
    bytes: Vec<u8>,
    timestamp: u64,
    is_signature: bool,
}

/// Collects files and writes them out as a cat/dat pair.
///
/// Emission order is insertion order; [`scan_dir`](CatalogWriter::scan_dir)
/// produces the lexical depth-first order a fresh scan of a source folder
/// yields, so repacking the same tree is deterministic.
pub struct CatalogWriter {
    cat_path: PathBuf,
    dat_path: PathBuf,
    files: Vec<PackedFile>,
}

impl CatalogWriter {
    pub fn new(cat_path: impl AsRef<Path>) -> Self {
        let cat_path = cat_path.as_ref().to_path_buf();
        let dat_path = cat_path.with_extension("dat");
        CatalogWriter {
            cat_path,
            dat_path,
            files: Vec::new(),
        }
    }

    pub fn cat_path(&self) -> &Path {
        &self.cat_path
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Queue a file. `timestamp` defaults to the current time for
    /// synthetic content; pass the source mtime when repacking disk files.
    pub fn add_file(&mut self, virtual_path: &str, bytes: Vec<u8>, timestamp: Option<u64>) {
        let path = vpath::normalize(virtual_path);
        let is_signature = path.ends_with(".sig");
        self.files.push(PackedFile {
            path,
            bytes,
            timestamp: timestamp.unwrap_or_else(now_epoch),
            is_signature,
        });
    }

    /// Queue every file under `dir`, keyed by its path relative to `dir`,
    /// in lexical depth-first order with source mtimes.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        for (path, bytes, mtime) in Self::scan_dir(dir)? {
            self.add_file(&path, bytes, Some(mtime));
        }
        Ok(())
    }

    /// Enumerate a directory tree as `(virtual_path, bytes, mtime)`
    /// triples in lexical order of the normalised paths.
    pub fn scan_dir(dir: impl AsRef<Path>) -> Result<Vec<(String, Vec<u8>, u64)>> {
        let dir = dir.as_ref();
        let mut paths: Vec<(String, PathBuf)> = Vec::new();
        collect_files(dir, dir, &mut paths)?;
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::with_capacity(paths.len());
        for (virtual_path, fs_path) in paths {
            let bytes = fs::read(&fs_path)?;
            let mtime = fs::metadata(&fs_path)?
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or_else(now_epoch);
            out.push((virtual_path, bytes, mtime));
        }
        Ok(out)
    }

    /// Write the queued files out.
    ///
    /// * `generate_sigs` adds an empty `<path>.sig` entry for every file
    ///   that lacks one, satisfying the game's signature presence check.
    /// * `separate_sigs` moves signature entries to a second pair named
    ///   `<name>.cat.sig`/`<name>.dat.sig`.
    pub fn write(&mut self, generate_sigs: bool, separate_sigs: bool) -> Result<()> {
        if generate_sigs {
            let existing: Vec<String> = self
                .files
                .iter()
                .filter(|f| f.is_signature)
                .map(|f| f.path.clone())
                .collect();
            let missing: Vec<PackedFile> = self
                .files
                .iter()
                .filter(|f| !f.is_signature)
                .filter(|f| !existing.iter().any(|s| *s == format!("{}.sig", f.path)))
                .map(|f| PackedFile {
                    path: format!("{}.sig", f.path),
                    bytes: Vec::new(),
                    timestamp: f.timestamp,
                    is_signature: true,
                })
                .collect();
            self.files.extend(missing);
        }

        let modes: &[Mode] = if separate_sigs {
            &[Mode::Standard, Mode::Signatures]
        } else {
            &[Mode::All]
        };

        for &mode in modes {
            let mut cat_text = String::new();
            let mut dat_bytes: Vec<u8> = Vec::new();
            for file in &self.files {
                match mode {
                    Mode::Standard if file.is_signature => continue,
                    Mode::Signatures if !file.is_signature => continue,
                    _ => {}
                }
                let hash = md5_hex(&file.bytes);
                cat_text.push_str(&format!(
                    "{} {} {} {hash}\n",
                    file.path,
                    file.bytes.len(),
                    file.timestamp
                ));
                dat_bytes.extend_from_slice(&file.bytes);
            }

            let (cat_path, dat_path) = match mode {
                Mode::Signatures => (
                    sig_companion(&self.cat_path),
                    sig_companion(&self.dat_path),
                ),
                _ => (self.cat_path.clone(), self.dat_path.clone()),
            };
            fs::write(&cat_path, cat_text.as_bytes())?;
            fs::write(&dat_path, &dat_bytes)?;
            info!(cat = %cat_path.display(), bytes = dat_bytes.len(), "wrote catalog pair");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    All,
    Standard,
    Signatures,
}

fn sig_companion(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".sig");
    path.with_file_name(name)
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push((vpath::normalize(&rel), path));
        }
    }
    Ok(())
}
