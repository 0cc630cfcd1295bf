//! A single search root: the base game folder, the override source
//! folder, or one extension.
//!
//! Each location owns an ordered cat stack and a loose-file tree. Cats
//! follow the game's naming convention: `01.cat` upward for the base game,
//! `ext_01.cat`/`subst_01.cat` upward for extensions. Within the stack a
//! higher number shadows a lower one, and `subst_*` outranks `ext_*`
//! (substitution catalogs replace files outright instead of patching, so
//! the game resolves them first).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::extension::ExtensionInfo;
use crate::vpath;

/// Subfolders the game actually reads. Anything else at a location root
/// (logs, readmes, the cat files themselves) is not part of the virtual
/// tree.
const VALID_PATH_PREFIXES: &[&str] = &[
    "aiscripts/",
    "assets/",
    "cutscenes/",
    "extensions/",
    "index/",
    "libraries/",
    "maps/",
    "md/",
    "music/",
    "particles/",
    "sfx/",
    "shadergl/",
    "t/",
    "textures/",
    "ui/",
    "voice-l044/",
    "voice-l049/",
    "vulkan/",
];

fn in_valid_subfolder(virtual_path: &str) -> bool {
    VALID_PATH_PREFIXES
        .iter()
        .any(|prefix| virtual_path.starts_with(prefix))
}

/// The outcome of a location read: the bytes, where they came from, and
/// whether a substitution catalog supplied them.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub bytes: Vec<u8>,
    pub origin: PathBuf,
    pub is_substitution: bool,
}

/// One search root with its cat stack and loose files.
pub struct SourceLocation {
    root: PathBuf,
    extension: Option<ExtensionInfo>,
    /// Highest priority first.
    cats: Vec<Catalog>,
    loose: BTreeMap<String, PathBuf>,
    prefer_loose: bool,
    allow_md5_errors: bool,
}

impl SourceLocation {
    pub fn open(
        root: impl AsRef<Path>,
        extension: Option<ExtensionInfo>,
        prefer_loose: bool,
        allow_md5_errors: bool,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let cats = find_catalogs(&root, extension.is_some())?;
        let loose = scan_loose_files(&root);
        debug!(
            root = %root.display(),
            cats = cats.len(),
            loose = loose.len(),
            "opened source location"
        );
        Ok(SourceLocation {
            root,
            extension,
            cats,
            loose,
            prefer_loose,
            allow_md5_errors,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> Option<&ExtensionInfo> {
        self.extension.as_ref()
    }

    pub fn extension_id(&self) -> Option<&str> {
        self.extension.as_ref().map(|e| e.id.as_str())
    }

    pub fn contains(&self, virtual_path: &str) -> bool {
        let path = vpath::normalize(virtual_path);
        self.loose.contains_key(&path) || self.cats.iter().any(|c| c.contains(&path))
    }

    /// Every virtual path this location can serve, relative to the
    /// location root.
    pub fn paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self.loose.keys().cloned().collect();
        for cat in &self.cats {
            all.extend(cat.paths());
        }
        all.sort();
        all.dedup();
        all
    }

    /// All loose files, keyed by virtual path.
    pub fn loose_files(&self) -> &BTreeMap<String, PathBuf> {
        &self.loose
    }

    fn read_loose(&self, path: &str) -> Result<Option<SourceFile>> {
        let Some(fs_path) = self.loose.get(path) else {
            return Ok(None);
        };
        Ok(Some(SourceFile {
            bytes: fs::read(fs_path)?,
            origin: fs_path.clone(),
            is_substitution: false,
        }))
    }

    fn read_packed(&self, path: &str) -> Result<Option<SourceFile>> {
        for cat in &self.cats {
            if let Some(bytes) = cat.read(path, self.allow_md5_errors)? {
                let origin = cat.cat_path().to_path_buf();
                let is_substitution = origin
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with("subst_"))
                    .unwrap_or(false);
                return Ok(Some(SourceFile {
                    bytes,
                    origin,
                    is_substitution,
                }));
            }
        }
        Ok(None)
    }

    /// Read one path from this location, honouring the loose-vs-packed
    /// preference. Returns `Ok(None)` on a miss.
    pub fn read(&self, virtual_path: &str) -> Result<Option<SourceFile>> {
        let path = vpath::normalize(virtual_path);
        if self.prefer_loose {
            if let Some(hit) = self.read_loose(&path)? {
                return Ok(Some(hit));
            }
        }
        if let Some(hit) = self.read_packed(&path)? {
            return Ok(Some(hit));
        }
        if !self.prefer_loose {
            if let Some(hit) = self.read_loose(&path)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

/// Find the cat stack at `root` per the naming convention, returned
/// highest priority first.
fn find_catalogs(root: &Path, is_extension: bool) -> Result<Vec<Catalog>> {
    // Collected low to high, then reversed. For extensions the subst
    // prefix is appended after ext so it lands on top.
    let prefixes: &[&str] = if is_extension {
        &["ext_", "subst_"]
    } else {
        &[""]
    };

    let mut low_to_high: Vec<PathBuf> = Vec::new();
    for prefix in prefixes {
        for index in 1..100u32 {
            let cat_path = root.join(format!("{prefix}{index:02}.cat"));
            if !cat_path.exists() {
                break;
            }
            low_to_high.push(cat_path);
        }
    }

    let mut cats = Vec::with_capacity(low_to_high.len());
    for path in low_to_high.into_iter().rev() {
        cats.push(Catalog::open(path)?);
    }
    Ok(cats)
}

fn scan_loose_files(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut out = BTreeMap::new();
    let mut stack: Vec<PathBuf> = match fs::read_dir(root) {
        Ok(read_dir) => read_dir.flatten().map(|e| e.path()).collect(),
        Err(_) => return out,
    };
    while let Some(path) = stack.pop() {
        if path.is_dir() {
            if let Ok(read_dir) = fs::read_dir(&path) {
                stack.extend(read_dir.flatten().map(|e| e.path()));
            }
            continue;
        }
        if !path.is_file() {
            continue;
        }
        // Signature files are companions, not content.
        if path.extension().map(|e| e == "sig").unwrap_or(false) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let virtual_path = vpath::normalize(&rel.to_string_lossy());
        if in_valid_subfolder(&virtual_path) {
            out.insert(virtual_path, path);
        }
    }
    out
}
