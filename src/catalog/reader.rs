//! Catalog index parsing and payload extraction.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ForgeError, Result};
use crate::hash::{md5_hex, EMPTY_MD5_HEX, ZERO_MD5_HEX};
use crate::vpath;

/// One index row: where an entry's bytes live inside the paired `.dat`.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Normalised virtual path (lookup key).
    pub path: String,
    /// Path exactly as spelled in the index; shipped catalogs mix case.
    pub original_path: String,
    pub length: u64,
    pub offset: u64,
    /// Seconds since the epoch, compared as integers.
    pub timestamp: u64,
    pub md5_hex: String,
}

/// A parsed, read-only catalog. The `.dat` handle is opened on first read
/// and guarded so only one range read is in flight at a time.
pub struct Catalog {
    cat_path: PathBuf,
    dat_path: PathBuf,
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    dat: Mutex<Option<File>>,
    empty_hash_hits: AtomicU64,
}

impl Catalog {
    /// Parse the index at `cat_path`. The paired `.dat` sits next to it
    /// and is not touched until a read.
    pub fn open(cat_path: impl AsRef<Path>) -> Result<Self> {
        let cat_path = cat_path.as_ref().to_path_buf();
        let dat_path = cat_path.with_extension("dat");
        let text = fs::read_to_string(&cat_path)?;

        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut offset = 0u64;
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            let parse_err = || ForgeError::CatalogParse {
                cat: cat_path.clone(),
                line: line_number + 1,
            };
            if line.is_empty() {
                // Blank and comment lines are not part of the format.
                return Err(parse_err());
            }

            // Paths may contain spaces; only the last three fields are
            // fixed, so split from the right.
            let (rest, md5) = line.rsplit_once(' ').ok_or_else(parse_err)?;
            let (rest, timestamp) = rest.rsplit_once(' ').ok_or_else(parse_err)?;
            let (path, length) = rest.rsplit_once(' ').ok_or_else(parse_err)?;
            if path.is_empty() || md5.len() != 32 {
                return Err(parse_err());
            }
            let length: u64 = length.parse().map_err(|_| parse_err())?;
            let timestamp: u64 = timestamp.parse().map_err(|_| parse_err())?;

            let normalized = vpath::normalize(path);
            // Later lines shadow earlier ones, mirroring how stacked
            // extension layers behave within a single index.
            index.insert(normalized.clone(), entries.len());
            entries.push(CatalogEntry {
                path: normalized,
                original_path: path.to_string(),
                length,
                offset,
                timestamp,
                md5_hex: md5.to_ascii_lowercase(),
            });
            offset += length;
        }

        debug!(cat = %cat_path.display(), entries = entries.len(), "opened catalog");
        Ok(Catalog {
            cat_path,
            dat_path,
            entries,
            index,
            dat: Mutex::new(None),
            empty_hash_hits: AtomicU64::new(0),
        })
    }

    pub fn cat_path(&self) -> &Path {
        &self.cat_path
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// All entries in index order, shadowed duplicates included.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Sorted unique virtual paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn contains(&self, virtual_path: &str) -> bool {
        self.index.contains_key(&vpath::normalize(virtual_path))
    }

    /// The winning entry for a path, if present.
    pub fn entry(&self, virtual_path: &str) -> Option<&CatalogEntry> {
        self.index
            .get(&vpath::normalize(virtual_path))
            .map(|&i| &self.entries[i])
    }

    /// Times the empty-hash catalog bug was tolerated on reads.
    pub fn empty_hash_hits(&self) -> u64 {
        self.empty_hash_hits.load(Ordering::Relaxed)
    }

    /// Extract an entry's bytes from the `.dat`, verifying the recorded
    /// MD5. Returns `Ok(None)` when the path is not in this catalog.
    pub fn read(&self, virtual_path: &str, allow_md5_error: bool) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.entry(virtual_path) else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; entry.length as usize];
        {
            let mut guard = self.dat.lock();
            if guard.is_none() {
                *guard = Some(File::open(&self.dat_path)?);
            }
            let file = guard.as_mut().expect("dat handle just opened");
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut buffer)?;
        }

        let actual = md5_hex(&buffer);
        if actual == entry.md5_hex {
            return Ok(Some(buffer));
        }
        if entry.md5_hex == EMPTY_MD5_HEX && !buffer.is_empty() {
            // Some shipped catalogs record the empty-input digest for
            // entries that have real content. Accept the bytes.
            self.empty_hash_hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                path = %entry.path,
                cat = %self.cat_path.display(),
                "tolerating empty-hash catalog bug"
            );
            return Ok(Some(buffer));
        }
        if entry.md5_hex == ZERO_MD5_HEX && buffer.is_empty() {
            // Packing tools write a zero hash for empty entries.
            return Ok(Some(buffer));
        }
        if allow_md5_error {
            warn!(
                path = %entry.path,
                cat = %self.cat_path.display(),
                "md5 mismatch allowed by policy"
            );
            return Ok(Some(buffer));
        }
        Err(ForgeError::ChecksumMismatch {
            path: entry.path.clone(),
            cat: self.cat_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_pair(dir: &Path, name: &str, entries: &[(&str, &[u8], Option<&str>)]) -> PathBuf {
        let cat_path = dir.join(format!("{name}.cat"));
        let dat_path = dir.join(format!("{name}.dat"));
        let mut cat = String::new();
        let mut dat = Vec::new();
        for (path, bytes, forced_hash) in entries {
            let hash = match forced_hash {
                Some(hash) => hash.to_string(),
                None => md5_hex(bytes),
            };
            cat.push_str(&format!("{path} {} 1600000000 {hash}\n", bytes.len()));
            dat.extend_from_slice(bytes);
        }
        fs::write(&cat_path, cat).unwrap();
        let mut f = File::create(dat_path).unwrap();
        f.write_all(&dat).unwrap();
        cat_path
    }

    #[test]
    fn test_read_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(
            dir.path(),
            "01",
            &[
                ("libraries/jobs.xml", b"<jobs/>", None),
                ("t/0001.xml", b"<lang/>", None),
            ],
        );
        let catalog = Catalog::open(&cat).unwrap();
        assert_eq!(catalog.entries().len(), 2);
        assert_eq!(
            catalog.read("libraries/jobs.xml", false).unwrap().unwrap(),
            b"<jobs/>"
        );
        assert_eq!(
            catalog.read("t/0001.xml", false).unwrap().unwrap(),
            b"<lang/>"
        );
        assert!(catalog.read("missing.xml", false).unwrap().is_none());
    }

    #[test]
    fn test_paths_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(
            dir.path(),
            "01",
            &[("extensions/some mod/sound file.ogg", b"RIFFdata", None)],
        );
        let catalog = Catalog::open(&cat).unwrap();
        assert_eq!(
            catalog
                .read("extensions/some mod/sound file.ogg", false)
                .unwrap()
                .unwrap(),
            b"RIFFdata"
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(dir.path(), "01", &[("Libraries/Jobs.xml", b"<jobs/>", None)]);
        let catalog = Catalog::open(&cat).unwrap();
        assert!(catalog.contains("LIBRARIES/JOBS.XML"));
        assert_eq!(
            catalog.entry("libraries/jobs.xml").unwrap().original_path,
            "Libraries/Jobs.xml"
        );
    }

    #[test]
    fn test_later_duplicate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(
            dir.path(),
            "01",
            &[("a.xml", b"first", None), ("a.xml", b"second", None)],
        );
        let catalog = Catalog::open(&cat).unwrap();
        assert_eq!(catalog.read("a.xml", false).unwrap().unwrap(), b"second");
        assert_eq!(catalog.entries().len(), 2);
    }

    #[test]
    fn test_empty_hash_bug_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(
            dir.path(),
            "01",
            &[("foo", b"twelve bytes", Some(EMPTY_MD5_HEX))],
        );
        let catalog = Catalog::open(&cat).unwrap();
        assert_eq!(
            catalog.read("foo", false).unwrap().unwrap(),
            b"twelve bytes"
        );
        assert_eq!(catalog.empty_hash_hits(), 1);
    }

    #[test]
    fn test_zero_hash_empty_entry_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(dir.path(), "01", &[("empty.txt", b"", Some(ZERO_MD5_HEX))]);
        let catalog = Catalog::open(&cat).unwrap();
        assert_eq!(catalog.read("empty.txt", false).unwrap().unwrap(), b"");
    }

    #[test]
    fn test_checksum_mismatch_policy() {
        let dir = tempfile::tempdir().unwrap();
        let cat = write_pair(
            dir.path(),
            "01",
            &[("bad.xml", b"payload", Some("deadbeefdeadbeefdeadbeefdeadbeef"))],
        );
        let catalog = Catalog::open(&cat).unwrap();
        assert!(matches!(
            catalog.read("bad.xml", false),
            Err(ForgeError::ChecksumMismatch { .. })
        ));
        assert_eq!(
            catalog.read("bad.xml", true).unwrap().unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_malformed_line_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cat_path = dir.path().join("01.cat");
        fs::write(&cat_path, "not enough fields\n").unwrap();
        assert!(matches!(
            Catalog::open(&cat_path),
            Err(ForgeError::CatalogParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_crlf_lines_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let cat_path = dir.path().join("01.cat");
        let body = b"<jobs/>";
        fs::write(
            &cat_path,
            format!("libraries/jobs.xml {} 1600000000 {}\r\n", body.len(), md5_hex(body)),
        )
        .unwrap();
        fs::write(dir.path().join("01.dat"), body).unwrap();
        let catalog = Catalog::open(&cat_path).unwrap();
        assert_eq!(
            catalog.read("libraries/jobs.xml", false).unwrap().unwrap(),
            body
        );
    }
}
