//! SHA-256 checksums for element payloads.

use crate::{Result, StrataError};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of `data`
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Checksums for several payloads, computed in parallel
pub fn compute_checksums(payloads: &[&[u8]]) -> Vec<String> {
    payloads.par_iter().map(|p| compute_checksum(p)).collect()
}

/// Fails with `IntegrityCheckFailed` when `data` does not hash to `expected`
pub fn verify_checksum(expected: &str, data: &[u8]) -> Result<()> {
    let actual = compute_checksum(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(StrataError::IntegrityCheckFailed {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_checksum(b"test data"),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_verify() {
        let sum = compute_checksum(b"payload");
        assert!(verify_checksum(&sum, b"payload").is_ok());
        assert!(verify_checksum(&sum.to_uppercase(), b"payload").is_ok());
        assert!(matches!(
            verify_checksum(&sum, b"tampered"),
            Err(StrataError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let a: &[u8] = b"one";
        let b: &[u8] = b"two";
        assert_eq!(
            compute_checksums(&[a, b]),
            vec![compute_checksum(a), compute_checksum(b)]
        );
    }
}
