//! Producer-side packer
//!
//! Builds a complete container from a file: magic, one metadata chunk with
//! the file's base name, then fixed-size data chunks.

use super::codec::{encode_data_chunk_with, encode_metadata_chunk};
use super::compression::Lz4Compressor;
use super::{write_magic, MAGIC};
use crate::config::CodecConfig;
use crate::error::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

/// Statistics of a packing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    /// Name recorded in the metadata chunk
    pub name: String,
    /// Input size in bytes
    pub original_size: usize,
    /// Container size in bytes
    pub container_size: usize,
    /// Number of data chunks
    pub data_chunks: usize,
    /// Data chunks that ended up compressed
    pub compressed_chunks: usize,
}

impl PackSummary {
    /// Space saved in per mille, 0 when the container is not smaller
    pub fn saved_per_mille(&self) -> u64 {
        if self.original_size == 0 || self.container_size >= self.original_size {
            return 0;
        }
        1000 - (self.container_size as u64 * 1000 / self.original_size as u64)
    }
}

/// Strip any directory prefix, e.g. "foo/bar/FILE.bmp" becomes "FILE.bmp"
pub fn shown_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Container packer
pub struct Packer {
    config: CodecConfig,
    compressor: Lz4Compressor,
}

impl Packer {
    pub fn new(config: &CodecConfig) -> Self {
        Packer {
            config: config.clone(),
            compressor: Lz4Compressor,
        }
    }

    /// Pack `data` under `name`
    pub fn pack(&self, name: &str, data: &[u8]) -> Result<(Vec<u8>, PackSummary)> {
        if self.config.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be non-zero".into()));
        }

        let declared = u32::try_from(data.len()).map_err(|_| {
            Error::OutOfRange(format!("input of {} bytes exceeds 32-bit size", data.len()))
        })?;

        let mut out = Vec::with_capacity(MAGIC.len() + data.len() + 64);
        write_magic(&mut out);
        out.extend_from_slice(&encode_metadata_chunk(name, declared)?);

        let mut summary = PackSummary {
            name: name.to_string(),
            original_size: data.len(),
            container_size: 0,
            data_chunks: 0,
            compressed_chunks: 0,
        };

        for piece in data.chunks(self.config.chunk_size) {
            let chunk = encode_data_chunk_with(
                piece,
                self.config.compression_enabled,
                self.config.compression_threshold,
                &self.compressor,
            )?;

            // options field sits right after the id
            if chunk[2] == 1 {
                summary.compressed_chunks += 1;
            }
            debug!(
                "data chunk {}: {} -> {} bytes",
                summary.data_chunks,
                piece.len(),
                chunk.len()
            );

            summary.data_chunks += 1;
            out.extend_from_slice(&chunk);
        }

        summary.container_size = out.len();
        Ok((out, summary))
    }

    /// Pack a file from disk, naming it after its base name
    pub fn pack_file<P: AsRef<Path>>(&self, path: P) -> Result<(Vec<u8>, PackSummary)> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;

        if data.starts_with(&MAGIC) {
            return Err(Error::Config(format!(
                "{} is already a container",
                path.display()
            )));
        }

        let name = shown_name(path);
        let packed = self.pack(&name, &data)?;

        info!(
            "packed {} ({} bytes) into {} chunks, {} bytes",
            name, packed.1.original_size, packed.1.data_chunks, packed.1.container_size
        );
        Ok(packed)
    }
}
