//! LZ4 compression for data chunks
//!
//! Uses the LZ4 block format without a size prefix; the decompressed length
//! travels in the chunk header's `extra` field instead.
//! Only compresses if the result is actually smaller.

use crate::error::{Error, Result};

/// Single-call, non-streaming byte compressor
pub trait Compressor {
    /// Compress `src` in one call
    fn compress(&self, src: &[u8]) -> Vec<u8>;

    /// Decompress `src` into at most `capacity` bytes
    fn decompress(&self, src: &[u8], capacity: usize) -> Result<Vec<u8>>;

    /// Largest output `len` compressed bytes can expand to
    fn max_decompressed_len(&self, len: usize) -> usize;
}

/// LZ4 block compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, src: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(src)
    }

    fn decompress(&self, src: &[u8], capacity: usize) -> Result<Vec<u8>> {
        lz4_flex::block::decompress(src, capacity)
            .map_err(|e| Error::Decompression(e.to_string()))
    }

    fn max_decompressed_len(&self, len: usize) -> usize {
        // A match token extends by at most 255 bytes per input byte
        len.saturating_mul(255).saturating_add(16)
    }
}

/// Compress data using `compressor`
///
/// Returns None if the data is under `threshold` or compression doesn't reduce size
pub fn compress<C: Compressor + ?Sized>(
    compressor: &C,
    data: &[u8],
    threshold: usize,
) -> Option<Vec<u8>> {
    if data.len() < threshold {
        return None; // Too small to bother
    }

    let compressed = compressor.compress(data);

    // Only use compression if it actually helps
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompress data, requiring exactly `expected_len` output bytes.
///
/// `expected_len` comes from an unprotected header field, so the output
/// buffer never grows past what `data` can actually expand to. Any output
/// that is not exactly `expected_len` bytes long is a length mismatch.
pub fn decompress<C: Compressor + ?Sized>(
    compressor: &C,
    data: &[u8],
    expected_len: u32,
) -> Result<Vec<u8>> {
    let expected = expected_len as usize;
    let bound = compressor.max_decompressed_len(data.len());

    let out = if expected <= bound {
        match compressor.decompress(data, expected) {
            Ok(out) => out,
            // Real output is longer than the header claims; measure it
            Err(_) => compressor.decompress(data, bound)?,
        }
    } else {
        compressor.decompress(data, bound)?
    };

    if out.len() != expected {
        return Err(Error::DecompressionLengthMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let data = b"Hello, World! Hello, World! Hello, World!";

        if let Some(compressed) = compress(&Lz4Compressor, data, 10) {
            let decompressed = decompress(&Lz4Compressor, &compressed, data.len() as u32).unwrap();
            assert_eq!(decompressed, data);
        }
    }

    #[test]
    fn test_compress_threshold() {
        let small_data = b"Hi";
        assert!(compress(&Lz4Compressor, small_data, 32).is_none());
    }

    #[test]
    fn test_compressible_round_trip() {
        let compressible = vec![0x42u8; 1000];
        let compressed = compress(&Lz4Compressor, &compressible, 32).unwrap();
        assert!(compressed.len() < compressible.len());

        let decompressed = decompress(&Lz4Compressor, &compressed, 1000).unwrap();
        assert_eq!(decompressed, compressible);
    }

    #[test]
    fn test_long_output_is_length_mismatch() {
        let data = vec![0x11u8; 1000];
        let compressed = Lz4Compressor.compress(&data);

        let err = decompress(&Lz4Compressor, &compressed, 999).unwrap_err();
        assert!(matches!(
            err,
            Error::DecompressionLengthMismatch {
                expected: 999,
                actual: 1000
            }
        ));
    }

    #[test]
    fn test_oversized_claim_is_bounded() {
        let data = vec![0x11u8; 1000];
        let compressed = Lz4Compressor.compress(&data);

        // A 4 GiB claim must not size the output buffer
        let err = decompress(&Lz4Compressor, &compressed, u32::MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::DecompressionLengthMismatch {
                expected: u32::MAX,
                actual: 1000
            }
        ));
    }

    #[test]
    fn test_short_output_is_length_mismatch() {
        let data = vec![0x11u8; 500];
        let compressed = Lz4Compressor.compress(&data);

        // Header claims more bytes than the stream produces
        let err = decompress(&Lz4Compressor, &compressed, 600).unwrap_err();
        assert!(matches!(
            err,
            Error::DecompressionLengthMismatch {
                expected: 600,
                actual: 500
            }
        ));
    }

    #[test]
    fn test_garbage_fails() {
        let garbage = [0xF0u8, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(Lz4Compressor.decompress(&garbage, 64).is_err());
    }
}
