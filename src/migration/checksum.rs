//! Checksums of revision identity
//!
//! Revisions are compiled code, so the checksum covers what defines the revision's place in
//! the chain: its token, its predecessor tokens and its message. A revision that gets
//! re-parented or rewritten after it was applied no longer matches the checksum stored in the
//! history table.

use crate::migration::revision::Revision;
use crate::migration::MigrationError;
use sha2::{Digest, Sha256};

/// Hexadecimal SHA-256 of a revision's identity
pub fn calculate_checksum(revision: &Revision) -> String {
    let mut hasher = Sha256::new();
    hasher.update(revision.id().as_bytes());
    for parent in revision.down_revisions() {
        hasher.update(b"\0");
        hasher.update(parent.as_bytes());
    }
    hasher.update(b"\n");
    hasher.update(revision.message().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate a stored checksum against the compiled revision
///
/// # Errors
///
/// Returns `MigrationError::ChecksumMismatch` if they differ.
pub fn validate_checksum(revision: &Revision, stored: &str) -> Result<(), MigrationError> {
    let current = calculate_checksum(revision);
    if stored == current {
        Ok(())
    } else {
        Err(MigrationError::ChecksumMismatch {
            revision: revision.id().to_string(),
            stored: stored.to_string(),
            current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_and_hex() {
        let rev = Revision::new("b2", "add proposal").revises("a1");
        let sum = calculate_checksum(&rev);
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sum, calculate_checksum(&rev.clone()));
    }

    #[test]
    fn test_reparenting_changes_checksum() {
        let original = Revision::new("b2", "add proposal").revises("a1");
        let moved = Revision::new("b2", "add proposal").revises("a0");
        let stored = calculate_checksum(&original);

        assert!(validate_checksum(&original, &stored).is_ok());
        assert!(matches!(
            validate_checksum(&moved, &stored),
            Err(MigrationError::ChecksumMismatch { .. })
        ));
    }
}
