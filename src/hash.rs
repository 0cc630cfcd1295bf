//! MD5 helpers for the catalog format.
//!
//! The cat index records a 128-bit MD5 per entry, hex encoded. Two sentinel
//! values matter: the digest of the empty string (shipped catalogs sometimes
//! record it for nonempty entries) and the all-zero string some packing tools
//! write for genuinely empty entries.

use md5::{Digest, Md5};

/// Hex MD5 of the empty input. Buggy shipped catalogs record this for
/// entries that actually have content.
pub const EMPTY_MD5_HEX: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// All-zero hash some packers emit for empty entries.
pub const ZERO_MD5_HEX: &str = "00000000000000000000000000000000";

/// Returns the 32-char lowercase hex MD5 of the given bytes.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_matches_sentinel() {
        assert_eq!(md5_hex(b""), EMPTY_MD5_HEX);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
