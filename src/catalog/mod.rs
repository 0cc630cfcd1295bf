//! The game's cat/dat archive pair.
//!
//! A `.cat` is a UTF-8 text index, one entry per line:
//! `virtual/path length timestamp md5hex`. Paths may contain spaces, so the
//! line is split from the right. The paired `.dat` is the raw concatenation
//! of every entry's payload in index order; an entry's offset is the prefix
//! sum of the lengths before it.

pub mod reader;
pub mod writer;

pub use reader::{Catalog, CatalogEntry};
pub use writer::CatalogWriter;
