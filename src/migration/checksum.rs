//! Checksum calculation for migration content

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of migration content
///
/// Returns the lowercase hexadecimal digest. SQL units hash the raw file bytes,
/// so whitespace or comment edits to an applied file are detected too.
pub fn checksum_of(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Compare a ledger checksum against the current one
///
/// A unit recorded without a checksum, or one that reports none, always matches.
pub fn checksums_match(stored: Option<&str>, current: Option<&str>) -> bool {
    match (stored, current) {
        (Some(stored), Some(current)) => stored == current,
        _ => true,
    }
}
