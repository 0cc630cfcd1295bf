//! # x4forge — X4 Foundations extension engine
//!
//! `x4forge` is the core of an X4 Foundations modding framework: a layered
//! virtual file system over the game's cat/dat archives, an XML diff
//! engine speaking the game's own patch dialect, and an output stage that
//! emits a generated extension together with its dependency manifest.
//!
//! ## What it does
//!
//! - **Catalog codec** — reads the game's `.cat` text indexes and extracts
//!   byte ranges from the paired `.dat` blobs, verifying per-entry MD5
//!   checksums (including tolerance for the well-known empty-hash bug in
//!   shipped catalogs), and writes new pairs deterministically.
//! - **Layered VFS** — merges the base game, an optional override folder
//!   and every enabled extension in dependency order, with
//!   case-insensitive virtual paths, loose-vs-packed preference and
//!   per-file provenance tracking.
//! - **XML diff engine** — applies `<diff>` patch documents (XPath
//!   targeted add/remove/replace) onto base trees, and synthesises
//!   minimal, verified patches from a base/modified pair.
//! - **Extension output** — drains modified files to loose files or a
//!   fresh cat/dat pair and regenerates `content.xml`, declaring a
//!   dependency on every extension whose content was touched.
//! - **Load-order checking** — replays an extension's patches under
//!   alternative load orders to surface ordering accidents.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use x4forge::{Config, FileSystem, Result};
//!
//! # fn main() -> Result<()> {
//! let config = Config::new("/games/X4 Foundations")
//!     .with_extension_identity("my_mod", "My Mod", "100");
//! let mut fs = FileSystem::new(config)?;
//!
//! // Read a game file through the full extension stack.
//! let mut jobs = fs.get_root("libraries/jobs.xml")?;
//! let job = jobs.find_all("//job[@id='miner']")?[0];
//! jobs.set_attr(job, "quota", "42");
//! fs.update_root("libraries/jobs.xml", jobs)?;
//!
//! // Emit the change as a diff patch inside a generated extension.
//! fs.write_files(false)?;
//! # Ok(())
//! # }
//! ```
//!
//! The engine is headless and synchronous; reads block on disk only.
//! Bulk loading ([`FileSystem::load_files`]) and per-file diff synthesis
//! run on a worker pool. Install a `tracing` subscriber to see what the
//! engine is doing.

pub mod catalog;
pub mod checker;
pub mod config;
pub mod diff;
pub mod error;
pub mod extension;
pub mod hash;
pub mod output;
pub mod source;
pub mod vfs;
pub mod vpath;
pub mod xml;

pub use catalog::{Catalog, CatalogEntry, CatalogWriter};
pub use checker::{check_all_extensions, check_extension, CheckFailure, CheckReport};
pub use config::Config;
pub use diff::{apply_patch, make_patch, DiffOptions, PatchMode};
pub use error::{ForgeError, Result};
pub use extension::{Dependency, ExtensionInfo};
pub use output::RunLog;
pub use source::{SourceFile, SourceLocation};
pub use vfs::{FileKind, FileSystem, GameFile, PatchReport, TreeVersion};
pub use vpath::Glob;
pub use xml::{Document, NodeId};
