use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("File not found in any source: {0}")]
    PathMissing(String),

    #[error("Entry {path} in catalog {cat} failed its md5 check")]
    ChecksumMismatch { path: String, cat: PathBuf },

    #[error("Malformed catalog line {line} in {cat}")]
    CatalogParse { cat: PathBuf, line: usize },

    #[error("Patch op {op_index} (sel \"{sel}\") failed on {path}: {message}")]
    PatchApplyFailure {
        path: String,
        op_index: usize,
        sel: String,
        message: String,
    },

    #[error("Diff synthesis failed for {0}: generated patch did not verify")]
    DiffSynthesisFailure(String),

    #[error("Bad extension manifest {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    #[error("Dependency cycle between extensions: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("Output path {0} already exists and was not written by a prior run")]
    OutputPathCollision(PathBuf),

    #[error("XML error in {path}: {message}")]
    Xml { path: String, message: String },

    #[error("Invalid glob pattern \"{pattern}\": {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    #[error("Load aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
