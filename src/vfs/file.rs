//! Runtime representation of one loaded file.
//!
//! XML files keep three roots, the way the patch pipeline needs them:
//! `original` (as read from the winning source), `patched` (after every
//! extension diff was applied — the base later diffs are computed against)
//! and `modified` (after caller edits). Binary files stay bytes. Raw XML
//! bytes are promoted to a tree on first structural access; once promoted,
//! the tree is authoritative and the bytes are dropped.

use std::path::PathBuf;

use tracing::warn;

use crate::diff::{self, DiffOptions, PatchMode, PatchOpError};
use crate::error::{ForgeError, Result};
use crate::vpath;
use crate::xml::Document;

/// Which tree of an XML file to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVersion {
    /// As read from the winning source, before any extension patches.
    Vanilla,
    /// After extension patches, before caller edits.
    Patched,
    /// After caller edits (same as patched until the first edit).
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Xml,
    Binary,
}

fn kind_for(virtual_path: &str) -> FileKind {
    match virtual_path.rsplit_once('.').map(|(_, suffix)| suffix) {
        Some("xml") | Some("ogl") | Some("xsd") => FileKind::Xml,
        _ => FileKind::Binary,
    }
}

fn is_shader_text(virtual_path: &str) -> bool {
    matches!(
        virtual_path.rsplit_once('.').map(|(_, suffix)| suffix),
        Some("f") | Some("v") | Some("vh") | Some("tcs") | Some("tes")
    )
}

/// One file tracked by the virtual file system.
#[derive(Debug, Clone)]
pub struct GameFile {
    virtual_path: String,
    kind: FileKind,
    /// Raw bytes. For XML this is a staging area until promotion; for
    /// binary files it stays authoritative.
    binary: Option<Vec<u8>>,
    original: Option<Document>,
    patched: Option<Document>,
    modified_tree: Option<Document>,

    /// The caller changed this file; it will be emitted.
    pub modified: bool,
    /// Read from a source on disk (as opposed to generated this run).
    from_source: bool,
    /// Overwrite the on-disk original instead of logging a new write.
    pub edit_in_place: bool,
    is_substitution: bool,
    /// Extension the winning seed came from, if any.
    extension_id: Option<String>,
    /// Every extension that contributed content, seed and patches alike.
    source_extension_ids: Vec<String>,
    origin: Option<PathBuf>,
}

impl GameFile {
    /// A file read from a source location.
    pub fn from_source_bytes(
        virtual_path: &str,
        bytes: Vec<u8>,
        origin: PathBuf,
        extension_id: Option<String>,
        is_substitution: bool,
    ) -> Self {
        let virtual_path = vpath::normalize(virtual_path);
        let mut source_extension_ids = Vec::new();
        if let Some(id) = &extension_id {
            source_extension_ids.push(id.clone());
        }
        GameFile {
            kind: kind_for(&virtual_path),
            virtual_path,
            binary: Some(bytes),
            original: None,
            patched: None,
            modified_tree: None,
            modified: false,
            from_source: true,
            edit_in_place: false,
            is_substitution,
            extension_id,
            source_extension_ids,
            origin: Some(origin),
        }
    }

    /// A file generated by the tool this run, from raw bytes.
    pub fn from_generated_bytes(virtual_path: &str, bytes: Vec<u8>) -> Self {
        let virtual_path = vpath::normalize(virtual_path);
        GameFile {
            kind: kind_for(&virtual_path),
            virtual_path,
            binary: Some(bytes),
            original: None,
            patched: None,
            modified_tree: None,
            modified: true,
            from_source: false,
            edit_in_place: false,
            is_substitution: false,
            extension_id: None,
            source_extension_ids: Vec::new(),
            origin: None,
        }
    }

    /// A file generated by the tool this run, from a tree.
    pub fn from_generated_root(virtual_path: &str, root: Document) -> Self {
        let virtual_path = vpath::normalize(virtual_path);
        GameFile {
            kind: FileKind::Xml,
            virtual_path,
            binary: None,
            original: None,
            patched: Some(root.clone()),
            modified_tree: Some(root),
            modified: true,
            from_source: false,
            edit_in_place: false,
            is_substitution: false,
            extension_id: None,
            source_extension_ids: Vec::new(),
            origin: None,
        }
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_xml(&self) -> bool {
        self.kind == FileKind::Xml
    }

    pub fn is_substitution(&self) -> bool {
        self.is_substitution
    }

    pub fn from_source(&self) -> bool {
        self.from_source
    }

    pub fn origin(&self) -> Option<&PathBuf> {
        self.origin.as_ref()
    }

    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    /// Sorted ids of every extension whose content reached this file.
    pub fn source_extension_ids(&self) -> Vec<String> {
        let mut ids = self.source_extension_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn add_source_extension(&mut self, id: &str) {
        self.source_extension_ids.push(id.to_string());
    }

    /// Promote raw bytes to a parsed tree. A no-op for already-promoted
    /// files; an error for binary files and empty XML.
    pub fn ensure_parsed(&mut self) -> Result<()> {
        if self.kind != FileKind::Xml {
            return Err(ForgeError::Xml {
                path: self.virtual_path.clone(),
                message: "not an XML file".to_string(),
            });
        }
        if self.original.is_some() || self.patched.is_some() {
            return Ok(());
        }
        let Some(bytes) = self.binary.take() else {
            return Err(ForgeError::Xml {
                path: self.virtual_path.clone(),
                message: "no content to parse".to_string(),
            });
        };
        if bytes.is_empty() {
            return Err(ForgeError::Xml {
                path: self.virtual_path.clone(),
                message: "empty xml file".to_string(),
            });
        }
        let doc = Document::parse_named(&bytes, &self.virtual_path)?;
        self.patched = Some(doc.clone());
        self.original = Some(doc);
        Ok(())
    }

    /// Read-only view of one of the three roots.
    pub fn tree(&mut self, version: TreeVersion) -> Result<&Document> {
        self.ensure_parsed()?;
        let tree = match version {
            TreeVersion::Vanilla => self.original.as_ref(),
            TreeVersion::Patched => self.patched.as_ref(),
            TreeVersion::Current => self.modified_tree.as_ref().or(self.patched.as_ref()),
        };
        tree.ok_or_else(|| ForgeError::Xml {
            path: self.virtual_path.clone(),
            message: "tree not available".to_string(),
        })
    }

    /// A clone of the current tree, safe for the caller to edit and hand
    /// back through [`update_root`](Self::update_root).
    pub fn get_root(&mut self) -> Result<Document> {
        Ok(self.tree(TreeVersion::Current)?.clone())
    }

    /// Install an edited tree and flag the file modified. The root tag
    /// must be unchanged.
    pub fn update_root(&mut self, root: Document) -> Result<()> {
        self.ensure_parsed()?;
        let expected = self
            .patched
            .as_ref()
            .map(|t| t.tag(t.root()).to_string())
            .unwrap_or_default();
        if root.tag(root.root()) != expected {
            return Err(ForgeError::Xml {
                path: self.virtual_path.clone(),
                message: format!(
                    "update_root with changed root tag: {} vs {expected}",
                    root.tag(root.root())
                ),
            });
        }
        self.modified_tree = Some(root);
        self.modified = true;
        Ok(())
    }

    /// Apply an extension's diff onto the patched tree. Does not flag the
    /// file as modified; patching is part of loading.
    pub fn apply_patch(
        &mut self,
        patch: &Document,
        from_extension: &str,
        mode: PatchMode,
    ) -> Result<Vec<PatchOpError>> {
        self.ensure_parsed()?;
        let context = format!("{} patched from extension {from_extension}", self.virtual_path);
        let patched = self.patched.as_mut().ok_or_else(|| ForgeError::Xml {
            path: self.virtual_path.clone(),
            message: "no tree to patch".to_string(),
        })?;
        let errors = diff::apply_patch(patched, patch, mode, &context)?;
        self.source_extension_ids.push(from_extension.to_string());
        Ok(errors)
    }

    /// Replace this file with a substitution from another source,
    /// preserving the vanilla root for later reference.
    pub fn substituted_by(mut self, mut other: GameFile) -> Result<GameFile> {
        if self.is_xml() && other.is_xml() {
            self.ensure_parsed()?;
            other.ensure_parsed()?;
            let own_tag = self
                .original
                .as_ref()
                .map(|t| t.tag(t.root()).to_string())
                .unwrap_or_default();
            let other_tag = other
                .patched
                .as_ref()
                .map(|t| t.tag(t.root()).to_string())
                .unwrap_or_default();
            if own_tag != other_tag {
                // The game swallows this silently; keep it visible here.
                warn!(
                    path = %self.virtual_path,
                    own = %own_tag,
                    subst = %other_tag,
                    "substitution changes the root tag"
                );
            }
            other.original = self.original.take();
            // The game treats a diff fed as a substitution as an empty
            // file: keep the root, drop its operations.
            if other_tag == "diff" {
                if let Some(patched) = other.patched.as_mut() {
                    for child in patched.children(patched.root()).to_vec() {
                        patched.remove_node(child);
                    }
                }
            }
        }
        let mut ids = std::mem::take(&mut self.source_extension_ids);
        ids.extend(other.source_extension_ids.drain(..));
        other.source_extension_ids = ids;
        Ok(other)
    }

    /// True when packing must place this file in a substitution catalog
    /// (diff patching does not work for it in-game).
    pub fn needs_subst(&self) -> bool {
        if self.virtual_path.ends_with(".xml") {
            return false;
        }
        match self.kind {
            // ogl shader specs and xsd go subst.
            FileKind::Xml => true,
            FileKind::Binary => is_shader_text(&self.virtual_path) || self.from_source,
        }
    }

    /// True when emission should encode this file as a diff patch against
    /// its patched base rather than full content.
    pub fn emit_as_diff(&self) -> bool {
        self.from_source
            && !self.edit_in_place
            && self.kind == FileKind::Xml
            && self.virtual_path.ends_with(".xml")
            && self.patched.is_some()
    }

    /// Synthesise the diff from the patched base to the current tree.
    pub fn make_diff(&mut self, maximal: bool, forced_attributes: &[String]) -> Result<Document> {
        self.ensure_parsed()?;
        let patched = self.patched.as_ref().ok_or_else(|| ForgeError::Xml {
            path: self.virtual_path.clone(),
            message: "no patched base to diff against".to_string(),
        })?;
        let current = self.modified_tree.as_ref().unwrap_or(patched);
        let opts = DiffOptions {
            maximal,
            verify: true,
            forced_attributes: forced_attributes.to_vec(),
        };
        match diff::make_patch(patched, current, &opts, &self.virtual_path) {
            Ok(patch) => Ok(patch),
            Err(ForgeError::DiffSynthesisFailure(path)) if !maximal => {
                // Last resort: the whole-root replacement.
                warn!(path = %path, "minimal diff failed, emitting maximal diff");
                let opts = DiffOptions {
                    maximal: true,
                    verify: true,
                    forced_attributes: Vec::new(),
                };
                diff::make_patch(patched, current, &opts, &self.virtual_path)
            }
            Err(e) => Err(e),
        }
    }

    /// Bytes for emission. Source-derived XML becomes a diff document;
    /// everything else is full content.
    pub fn output_bytes(&mut self, maximal: bool, forced_attributes: &[String]) -> Result<Vec<u8>> {
        if self.emit_as_diff() {
            let patch = self.make_diff(maximal, forced_attributes)?;
            return Ok(patch.to_bytes());
        }
        self.full_bytes()
    }

    /// Full current content as bytes, never diff encoded.
    pub fn full_bytes(&mut self) -> Result<Vec<u8>> {
        if self.kind == FileKind::Xml && (self.patched.is_some() || self.binary.is_none()) {
            return Ok(self.tree(TreeVersion::Current)?.to_bytes());
        }
        self.binary.clone().ok_or_else(|| ForgeError::Xml {
            path: self.virtual_path.clone(),
            message: "file has no content".to_string(),
        })
    }
}
