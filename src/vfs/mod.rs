//! The layered virtual file system.
//!
//! Sources are composed in load order: the base game folder, the optional
//! override source folder, then every enabled extension in dependency
//! order. A read seeds from the highest-priority source that has the path,
//! then walks the remaining extensions for substitutions and diff patches.
//! Loaded files are cached; caller edits are buffered until
//! [`write_files`](FileSystem::write_files) drains them through the output
//! stage.

pub mod file;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diff::PatchMode;
use crate::error::{ForgeError, Result};
use crate::extension;
use crate::source::SourceLocation;
use crate::vpath::{self, Glob};
use crate::xml::{self, Document};

pub use file::{FileKind, GameFile, TreeVersion};

/// One failed patch operation observed during loading, attributed to the
/// extension whose patch carried it.
#[derive(Debug, Clone)]
pub struct PatchReport {
    pub virtual_path: String,
    pub extension_id: String,
    pub op_index: usize,
    pub sel: String,
    pub message: String,
}

/// The composed file system.
pub struct FileSystem {
    config: Config,
    base: SourceLocation,
    source_override: Option<SourceLocation>,
    /// Load order: dependencies first.
    extensions: Vec<SourceLocation>,
    files: HashMap<String, GameFile>,
    patch_mode: PatchMode,
    patch_reports: Mutex<Vec<PatchReport>>,
    abort: Arc<AtomicBool>,
}

impl FileSystem {
    /// Build the file system with the default (alphabetical) load order
    /// and strict patch application.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_priorities(config, &HashMap::new(), PatchMode::Strict)
    }

    /// Build with explicit load-order priorities and patch mode. The
    /// checker uses this to schedule one extension early or late and to
    /// collect failures instead of aborting.
    pub fn with_priorities(
        config: Config,
        priorities: &HashMap<String, i32>,
        patch_mode: PatchMode,
    ) -> Result<Self> {
        let discovered = extension::discover(&config)?;
        let ordered = extension::resolve_load_order(discovered, priorities);

        let base = SourceLocation::open(
            &config.game_root,
            None,
            config.prefer_loose,
            config.allow_checksum_errors,
        )?;
        let source_override = match &config.source_folder {
            Some(folder) => Some(SourceLocation::open(
                folder,
                None,
                // The override folder only holds loose files; preference
                // is irrelevant but loose must win.
                true,
                config.allow_checksum_errors,
            )?),
            None => None,
        };
        let mut extensions = Vec::with_capacity(ordered.len());
        for ext in ordered {
            extensions.push(SourceLocation::open(
                ext.root.clone(),
                Some(ext),
                config.prefer_loose,
                config.allow_checksum_errors,
            )?);
        }

        info!(
            extensions = extensions.len(),
            "virtual file system initialised"
        );
        Ok(FileSystem {
            config,
            base,
            source_override,
            extensions,
            files: HashMap::new(),
            patch_mode,
            patch_reports: Mutex::new(Vec::new()),
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enabled extension ids in load order.
    pub fn extension_ids(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter_map(|s| s.extension_id())
            .map(str::to_string)
            .collect()
    }

    /// Cooperative cancellation flag, checked between files during bulk
    /// loads.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Failed patch operations collected so far (soft mode only).
    pub fn take_patch_reports(&self) -> Vec<PatchReport> {
        std::mem::take(&mut self.patch_reports.lock())
    }

    /// Forget all cached files and collected reports.
    pub fn reset(&mut self) {
        self.files.clear();
        self.patch_reports.lock().clear();
    }

    /// True if a file of this path has already been loaded.
    pub fn is_loaded(&self, virtual_path: &str) -> bool {
        self.files.contains_key(&vpath::normalize(virtual_path))
    }

    /// Load (or fetch the cached) file for a path.
    pub fn load_file(&mut self, virtual_path: &str) -> Result<&mut GameFile> {
        let path = vpath::normalize(virtual_path);
        if !self.files.contains_key(&path) {
            match self.read_from_sources(&path)? {
                Some(file) => {
                    self.files.insert(path.clone(), file);
                }
                None => return Err(ForgeError::PathMissing(path)),
            }
        }
        Ok(self
            .files
            .get_mut(&path)
            .expect("inserted or present above"))
    }

    /// Like [`load_file`](Self::load_file) but a miss is `Ok(None)`.
    pub fn load_file_optional(&mut self, virtual_path: &str) -> Result<Option<&mut GameFile>> {
        match self.load_file(virtual_path) {
            Ok(file) => Ok(Some(file)),
            Err(ForgeError::PathMissing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Register a generated file, keyed by its virtual path.
    pub fn add_file(&mut self, file: GameFile) {
        self.files.insert(file.virtual_path().to_string(), file);
    }

    /// Duplicate a loaded file under a new virtual path and mark the copy
    /// modified, so it ships with the output.
    pub fn copy_file(&mut self, source_path: &str, dest_path: &str) -> Result<()> {
        let file = self.load_file(source_path)?;
        let copy = if file.is_xml() {
            GameFile::from_generated_root(dest_path, file.get_root()?)
        } else {
            GameFile::from_generated_bytes(dest_path, file.full_bytes()?)
        };
        self.add_file(copy);
        Ok(())
    }

    /// Current bytes of a file (full content, never diff encoded).
    pub fn read(&mut self, virtual_path: &str) -> Result<Vec<u8>> {
        self.load_file(virtual_path)?.full_bytes()
    }

    /// A caller-editable clone of a file's current tree.
    pub fn get_root(&mut self, virtual_path: &str) -> Result<Document> {
        self.load_file(virtual_path)?.get_root()
    }

    /// Install an edited tree and mark the file modified.
    pub fn update_root(&mut self, virtual_path: &str, root: Document) -> Result<()> {
        self.load_file(virtual_path)?.update_root(root)
    }

    /// Ids of every extension that contributed to a file's content.
    pub fn originating_extensions(&mut self, virtual_path: &str) -> Result<Vec<String>> {
        Ok(self.load_file(virtual_path)?.source_extension_ids())
    }

    /// All virtual paths matching a glob, across every source plus files
    /// generated this run. Extension-private paths appear with their
    /// `extensions/<id>/` prefix.
    pub fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        let glob = Glob::new(pattern)?;
        let mut base_paths: BTreeSet<String> = self.base.paths().into_iter().collect();
        if let Some(src) = &self.source_override {
            base_paths.extend(src.paths());
        }

        let mut all: BTreeSet<String> = base_paths.clone();
        for src in &self.extensions {
            let Some(ext_id) = src.extension_id() else {
                continue;
            };
            for path in src.paths() {
                if base_paths.contains(&path) {
                    all.insert(path);
                } else {
                    all.insert(format!("extensions/{ext_id}/{path}"));
                }
            }
        }
        all.extend(self.files.keys().cloned());

        Ok(all.into_iter().filter(|p| glob.matches(p)).collect())
    }

    /// Paths one extension contributes, in the full-path form
    /// [`list_files`](Self::list_files) uses.
    pub fn extension_paths(&self, extension_id: &str) -> Result<Vec<String>> {
        let ext_id = extension_id.to_ascii_lowercase();
        let src = self
            .extensions
            .iter()
            .find(|s| s.extension_id() == Some(ext_id.as_str()))
            .ok_or_else(|| ForgeError::UnknownExtension(extension_id.to_string()))?;
        Ok(src
            .paths()
            .into_iter()
            .map(|path| {
                if self.base.contains(&path) {
                    path
                } else {
                    format!("extensions/{ext_id}/{path}")
                }
            })
            .collect())
    }

    /// Bulk-load every file matching a glob. XML parsing and patch
    /// composition run on the worker pool; insertion into the cache is
    /// sequential. The abort flag is honoured between files.
    pub fn load_files(&mut self, pattern: &str) -> Result<Vec<String>> {
        let pending: Vec<String> = self
            .list_files(pattern)?
            .into_iter()
            .filter(|p| !self.files.contains_key(p))
            .collect();

        let loaded: Vec<Result<Option<(String, GameFile)>>> = pending
            .par_iter()
            .map(|path| {
                if self.abort.load(Ordering::Relaxed) {
                    return Err(ForgeError::Aborted);
                }
                Ok(self
                    .read_from_sources(path)?
                    .map(|file| (path.clone(), file)))
            })
            .collect();

        let mut names = Vec::new();
        for item in loaded {
            if let Some((path, file)) = item? {
                names.push(path.clone());
                self.files.insert(path, file);
            }
        }
        debug!(pattern, loaded = names.len(), "bulk load finished");
        Ok(names)
    }

    /// Iterate the cached files.
    pub fn loaded_files(&self) -> impl Iterator<Item = &GameFile> {
        self.files.values()
    }

    pub(crate) fn files_mut(&mut self) -> &mut HashMap<String, GameFile> {
        &mut self.files
    }

    /// Loose files in the override folder that were never loaded become
    /// modified binary files, so hand-edited content ships with the
    /// output. Already-loaded override files are flagged modified.
    pub(crate) fn add_source_folder_copies(&mut self) -> Result<()> {
        let Some(src) = &self.source_override else {
            return Ok(());
        };
        let loose: Vec<(String, std::path::PathBuf)> = src
            .loose_files()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (path, fs_path) in loose {
            match self.files.get_mut(&path) {
                Some(file) => file.modified = true,
                None => {
                    let bytes = fs::read(&fs_path)?;
                    self.add_file(GameFile::from_generated_bytes(&path, bytes));
                }
            }
        }
        Ok(())
    }

    /// Resolve one path through the load order: seed, then substitutions
    /// and patches from every other extension.
    fn read_from_sources(&self, virtual_path: &str) -> Result<Option<GameFile>> {
        let path = vpath::normalize(virtual_path);

        // Paths under extensions/<id>/ seed from that extension with the
        // truncated path; everything else seeds from the override folder,
        // then the base game.
        let seed = if let Some(rest) = path.strip_prefix("extensions/") {
            let Some((ext_id, ext_path)) = rest.split_once('/') else {
                return Ok(None);
            };
            match self
                .extensions
                .iter()
                .find(|s| s.extension_id() == Some(ext_id))
            {
                Some(src) => src.read(ext_path)?.map(|hit| {
                    GameFile::from_source_bytes(
                        &path,
                        hit.bytes,
                        hit.origin,
                        src.extension_id().map(str::to_string),
                        hit.is_substitution,
                    )
                }),
                None => None,
            }
        } else {
            let mut hit = None;
            if let Some(src) = &self.source_override {
                hit = src.read(&path)?;
            }
            if hit.is_none() {
                hit = self.base.read(&path)?;
            }
            hit.map(|hit| {
                GameFile::from_source_bytes(&path, hit.bytes, hit.origin, None, hit.is_substitution)
            })
        };

        let Some(mut file) = seed else {
            return Ok(None);
        };

        // A seed whose root is <diff> has nothing to patch; the game
        // treats the file as missing.
        if file.is_xml() {
            if let Ok(bytes) = file.full_bytes() {
                if xml::root_tag_of(&bytes).as_deref() == Some("diff") {
                    warn!(path = %path, "file is a diff patch with nothing to patch");
                    return Ok(None);
                }
            }
        }

        // Substitutions and patches from every other extension, in load
        // order.
        for src in &self.extensions {
            if src.extension_id().is_some() && src.extension_id() == file.extension_id() {
                continue;
            }
            let Some(hit) = src.read(&path)? else {
                continue;
            };
            let ext_id = src
                .extension_id()
                .unwrap_or("unknown-extension")
                .to_string();

            if hit.is_substitution {
                let other = GameFile::from_source_bytes(
                    &path,
                    hit.bytes,
                    hit.origin,
                    Some(ext_id),
                    true,
                );
                file = file.substituted_by(other)?;
                continue;
            }
            if !file.is_xml() {
                // Two extensions shipping the same binary asset is a
                // packaging mistake, not something we can merge.
                if !path.ends_with(".gz") {
                    warn!(path = %path, extension = %ext_id, "skipping merge of non-xml override");
                }
                continue;
            }

            let patch = match Document::parse_named(&hit.bytes, &path) {
                Ok(doc) => doc,
                Err(e) => match self.patch_mode {
                    PatchMode::Strict => return Err(e),
                    PatchMode::Soft => {
                        self.patch_reports.lock().push(PatchReport {
                            virtual_path: path.clone(),
                            extension_id: ext_id,
                            op_index: 0,
                            sel: String::new(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                },
            };
            let errors = file.apply_patch(&patch, &ext_id, self.patch_mode)?;
            if !errors.is_empty() {
                let mut reports = self.patch_reports.lock();
                reports.extend(errors.into_iter().map(|e| PatchReport {
                    virtual_path: path.clone(),
                    extension_id: ext_id.clone(),
                    op_index: e.op_index,
                    sel: e.sel,
                    message: e.message,
                }));
            }
        }

        Ok(Some(file))
    }

    /// Drain the modified set through the output stage. See
    /// [`crate::output::write_extension`].
    pub fn write_files(&mut self, skip_content: bool) -> Result<()> {
        crate::output::write_extension(self, skip_content)
    }
}
