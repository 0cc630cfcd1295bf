//! XML diff patching: application of `<diff>` documents onto a base tree,
//! and synthesis of minimal patches from a base/modified pair.

pub mod apply;
pub mod synthesize;

pub use apply::{apply_patch, PatchMode, PatchOpError};
pub use synthesize::{make_patch, DiffOptions};
