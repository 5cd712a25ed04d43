/*!
Compression for manifests and the persisted snapshot index.

Element payloads (tracks, catalogs, attachments) are stored as-is; they are usually
already compressed media. Manifests and the repository index are JSON and go through
a [`Compressor`] before they reach a storage tier or the disk.
*/

use crate::{Result, StrataError};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Byte-level compression used for JSON documents written to storage
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;

    /// Name recorded alongside persisted data
    fn algorithm_name(&self) -> &str;
}

/// Gzip (DEFLATE) compressor
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    /// Gzip with the default level (6)
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Gzip with an explicit level in 0..=9
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .map_err(|e| StrataError::compression(format!("gzip write failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| StrataError::compression(format!("gzip finish failed: {e}")))
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StrataError::compression(format!("gzip decode failed: {e}")))?;
        Ok(out)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_shrinks_repetitive_manifest() {
        let compressor = GzipCompressor::new();
        let manifest = br#"{"id":"mp-1","elements":[{"flavor":"presenter/source"}]}"#.repeat(20);

        let compressed = compressor.compress(&manifest).unwrap();
        assert!(compressed.len() < manifest.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), manifest);
    }

    #[test]
    fn test_level_is_clamped() {
        let compressor = GzipCompressor::with_level(42);
        let data = b"clamped level still works";
        let compressed = compressor.compress(data).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = GzipCompressor::new().decompress(b"not gzip at all");
        assert!(matches!(result, Err(StrataError::Compression(_))));
    }
}
