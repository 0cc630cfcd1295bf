//! Engine configuration.
//!
//! One immutable record, built up front and passed by reference into every
//! component's constructor. Nothing reads mutable global state; the
//! checker re-runs discovery by constructing a fresh file system from the
//! same record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Settings for a single engine run.
#[derive(Debug, Clone)]
pub struct Config {
    /// The game installation root (the folder holding `01.cat`).
    pub game_root: PathBuf,
    /// The user documents folder (holds `config.xml`, `uidata.xml` and a
    /// second `extensions/` tree), when known.
    pub user_root: Option<PathBuf>,
    /// Optional override folder searched before the game root; loose files
    /// here stand in for packed game files.
    pub source_folder: Option<PathBuf>,

    /// Folder id of the generated output extension.
    pub extension_id: String,
    /// Display name for the generated `content.xml`.
    pub extension_name: String,
    /// Version string in the game's form (integer or dotted).
    pub extension_version: String,
    /// Place the output extension under the user folder instead of the
    /// game folder.
    pub output_to_user_extensions: bool,
    /// Pack modified files into `ext_01.cat`/`subst_01.cat` pairs instead
    /// of loose files.
    pub output_to_catalog: bool,
    /// Emit dummy signature entries alongside packed files.
    pub generate_sigs: bool,

    /// Within a location, loose files win over cat entries.
    pub prefer_loose: bool,
    /// Skip extension discovery entirely.
    pub ignore_extensions: bool,
    /// Leave the output extension itself out of the load order.
    pub ignore_output_extension: bool,
    /// Downgrade catalog checksum mismatches to warnings.
    pub allow_checksum_errors: bool,

    /// Emit whole-root replacement diffs instead of minimal ones.
    pub make_maximal_diffs: bool,
    /// Extra identifying attributes for diff XPath generation; entries may
    /// be nested (`component/@ref`).
    pub forced_xpath_attributes: Vec<String>,

    /// When set, only these extension folders are considered.
    pub extension_whitelist: Option<BTreeSet<String>>,
    /// Extension folders never considered.
    pub extension_blacklist: BTreeSet<String>,

    /// Surface unexpected errors with full context instead of summaries.
    pub developer: bool,
}

impl Config {
    pub fn new(game_root: impl Into<PathBuf>) -> Self {
        Config {
            game_root: game_root.into(),
            user_root: None,
            source_folder: None,
            extension_id: "x4forge".to_string(),
            extension_name: "X4 Forge".to_string(),
            extension_version: "100".to_string(),
            output_to_user_extensions: false,
            output_to_catalog: false,
            generate_sigs: false,
            prefer_loose: false,
            ignore_extensions: false,
            ignore_output_extension: true,
            allow_checksum_errors: false,
            make_maximal_diffs: false,
            forced_xpath_attributes: Vec::new(),
            extension_whitelist: None,
            extension_blacklist: BTreeSet::new(),
            developer: false,
        }
    }

    pub fn with_user_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_root = Some(path.into());
        self
    }

    pub fn with_source_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_folder = Some(path.into());
        self
    }

    pub fn with_extension_identity(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.extension_id = id.into();
        self.extension_name = name.into();
        self.extension_version = version.into();
        self
    }

    pub fn with_output_to_catalog(mut self, enabled: bool) -> Self {
        self.output_to_catalog = enabled;
        self
    }

    pub fn with_generate_sigs(mut self, enabled: bool) -> Self {
        self.generate_sigs = enabled;
        self
    }

    pub fn with_prefer_loose(mut self, enabled: bool) -> Self {
        self.prefer_loose = enabled;
        self
    }

    pub fn with_allow_checksum_errors(mut self, enabled: bool) -> Self {
        self.allow_checksum_errors = enabled;
        self
    }

    pub fn with_maximal_diffs(mut self, enabled: bool) -> Self {
        self.make_maximal_diffs = enabled;
        self
    }

    pub fn with_forced_xpath_attributes(
        mut self,
        attributes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.forced_xpath_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignore_output_extension(mut self, enabled: bool) -> Self {
        self.ignore_output_extension = enabled;
        self
    }

    /// Folder the generated extension is written to.
    pub fn output_folder(&self) -> PathBuf {
        let base = if self.output_to_user_extensions {
            self.user_root.as_deref().unwrap_or(&self.game_root)
        } else {
            &self.game_root
        };
        base.join("extensions").join(&self.extension_id)
    }

    /// Path of the user's `config.xml`, when a user folder is configured.
    pub fn user_config_path(&self) -> Option<PathBuf> {
        self.user_root.as_ref().map(|root| root.join("config.xml"))
    }

    /// The two roots that may hold an `extensions/` tree.
    pub fn extension_roots(&self) -> Vec<&Path> {
        let mut roots: Vec<&Path> = vec![&self.game_root];
        if let Some(user) = &self.user_root {
            roots.push(user);
        }
        roots
    }
}
