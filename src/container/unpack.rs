//! Decode pipeline
//!
//! Walks a container chunk by chunk, verifies every checksum before using a
//! payload, decompresses data chunks and pushes the pixel bytes to a
//! renderer in file order.

use super::codec::{decode_chunk_header, decode_data_chunk_with, decode_metadata_chunk};
use super::compression::Lz4Compressor;
use super::stream::ChunkStream;
use super::{detect_magic, ChunkHeader, ChunkKind, CHUNK_HEADER_LEN, MAGIC};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Sink for decoded pixel bytes
pub trait Renderer {
    /// Called once before the first span of an image
    fn begin_stream(&mut self) {}

    /// Called once per decoded data chunk, in file order
    fn render_span(&mut self, bytes: &[u8]);
}

impl Renderer for Vec<u8> {
    fn begin_stream(&mut self) {
        self.clear();
    }

    fn render_span(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Result of a successful decode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Name from the metadata chunk
    pub name: Option<String>,
    /// Declared size from the metadata chunk
    pub declared_length: u32,
    /// Chunks walked, including skipped ones
    pub chunks: usize,
    /// Data chunks handed to the renderer
    pub spans: usize,
    /// Pixel bytes handed to the renderer
    pub bytes_rendered: u64,
}

/// A chunk header and where it sits in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Logical offset of the header
    pub offset: u64,
    pub header: ChunkHeader,
}

/// Container decoder
pub struct Unpacker {
    compressor: Lz4Compressor,
}

impl Unpacker {
    pub fn new() -> Self {
        Unpacker {
            compressor: Lz4Compressor,
        }
    }
}

impl Default for Unpacker {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_available(stream_pos: u64, len: u64, total: u64, what: &str) -> Result<()> {
    if stream_pos + len > total {
        return Err(Error::OutOfRange(format!(
            "truncated {}: {} bytes at offset {} but only {} received",
            what, len, stream_pos, total
        )));
    }
    Ok(())
}

fn skip_magic<S: ChunkStream + ?Sized>(stream: &mut S) -> Result<()> {
    let pos = stream.position();
    if pos < MAGIC.len() as u64 {
        stream.skip(MAGIC.len() - pos as usize)?;
    }
    Ok(())
}

impl Unpacker {
    /// Decode the first `total` bytes of `stream` into `renderer`.
    ///
    /// Stops at the first failure; the renderer only ever sees payloads
    /// whose checksum verified.
    pub fn unpack<S, R>(&self, stream: &mut S, total: u64, renderer: &mut R) -> Result<UnpackSummary>
    where
        S: ChunkStream + ?Sized,
        R: Renderer + ?Sized,
    {
        if total < MAGIC.len() as u64 || !detect_magic(stream)? {
            warn!("not a container, aborting decode");
            return Err(Error::NotAContainer);
        }

        skip_magic(stream)?;

        info!("decoding container of {} bytes", total);
        renderer.begin_stream();

        let mut summary = UnpackSummary::default();
        let mut seen_metadata = false;

        while stream.position() < total {
            ensure_available(stream.position(), CHUNK_HEADER_LEN as u64, total, "chunk header")?;
            let header = decode_chunk_header(stream)?;
            ensure_available(stream.position(), header.size as u64, total, "chunk payload")?;
            summary.chunks += 1;

            match header.kind() {
                ChunkKind::Metadata => {
                    let meta = decode_metadata_chunk(&header, stream)?;
                    info!(
                        "file name: {} ({} bytes declared)",
                        meta.name, meta.declared_length
                    );
                    summary.name = Some(meta.name);
                    summary.declared_length = meta.declared_length;
                    seen_metadata = true;
                }
                ChunkKind::Data if seen_metadata => {
                    let pixels = decode_data_chunk_with(&header, stream, &self.compressor)?;
                    renderer.render_span(&pixels);
                    summary.spans += 1;
                    summary.bytes_rendered += pixels.len() as u64;
                }
                ChunkKind::Data => {
                    warn!("data chunk before metadata, skipping {} bytes", header.size);
                    stream.skip(header.size as usize)?;
                }
                ChunkKind::Unknown(id) => {
                    debug!("skipping unknown chunk id {} ({} bytes)", id, header.size);
                    stream.skip(header.size as usize)?;
                }
            }
        }

        info!(
            "decode finished: {} chunks, {} bytes rendered",
            summary.chunks, summary.bytes_rendered
        );
        Ok(summary)
    }
}

/// Decode with the default LZ4 compressor
pub fn unpack<S, R>(stream: &mut S, total: u64, renderer: &mut R) -> Result<UnpackSummary>
where
    S: ChunkStream + ?Sized,
    R: Renderer + ?Sized,
{
    Unpacker::new().unpack(stream, total, renderer)
}

/// List chunk headers without verifying or decompressing payloads
pub fn inspect<S: ChunkStream + ?Sized>(stream: &mut S, total: u64) -> Result<Vec<ChunkEntry>> {
    if total < MAGIC.len() as u64 || !detect_magic(stream)? {
        return Err(Error::NotAContainer);
    }
    skip_magic(stream)?;

    let mut entries = Vec::new();
    while stream.position() < total {
        let offset = stream.position();
        ensure_available(offset, CHUNK_HEADER_LEN as u64, total, "chunk header")?;
        let header = decode_chunk_header(stream)?;
        ensure_available(stream.position(), header.size as u64, total, "chunk payload")?;
        stream.skip(header.size as usize)?;
        entries.push(ChunkEntry { offset, header });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::container::{encode_data_chunk, encode_metadata_chunk, write_magic, Packer, SliceStream};

    /// Renderer that counts calls
    #[derive(Default)]
    struct Counting {
        calls: usize,
        bytes: Vec<u8>,
    }

    impl Renderer for Counting {
        fn render_span(&mut self, bytes: &[u8]) {
            self.calls += 1;
            self.bytes.extend_from_slice(bytes);
        }
    }

    fn two_chunk_container(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_magic(&mut out);
        out.extend(encode_metadata_chunk("img", payload.len() as u32).unwrap());
        out.extend(encode_data_chunk(payload, true).unwrap());
        out
    }

    #[test]
    fn test_round_trip_lengths() {
        let block = 1024usize;
        let lengths = [0, 1, 31, 32, 33, block - 1, block, block + 1, 3 * block + 7];

        for compress in [true, false] {
            let config = CodecConfig {
                chunk_size: 500,
                compression_enabled: compress,
                compression_threshold: 32,
            };

            for &len in &lengths {
                let data: Vec<u8> = (0..len).map(|i| (i % 13) as u8 ^ (i / 97) as u8).collect();
                let (container, _) = Packer::new(&config).pack("pic.raw", &data).unwrap();

                let mut out = Vec::new();
                let summary = unpack(
                    &mut SliceStream::new(&container),
                    container.len() as u64,
                    &mut out,
                )
                .unwrap();

                assert_eq!(out, data, "len {} compress {}", len, compress);
                assert_eq!(summary.name.as_deref(), Some("pic.raw"));
                assert_eq!(summary.declared_length as usize, len);
            }
        }
    }

    #[test]
    fn test_not_a_container() {
        let data = b"definitely not a container";
        let mut renderer = Counting::default();

        let err = unpack(&mut SliceStream::new(data), data.len() as u64, &mut renderer).unwrap_err();
        assert!(matches!(err, Error::NotAContainer));
        assert_eq!(renderer.calls, 0);
    }

    #[test]
    fn test_corrupted_checksum_never_renders() {
        let payload = vec![0x33u8; 200];
        let mut container = two_chunk_container(&payload);

        // Checksum field of the data chunk header
        let data_header = 8 + CHUNK_HEADER_LEN + 10 + 4;
        container[data_header + 8] ^= 0xFF;

        let mut renderer = Counting::default();
        let err = unpack(
            &mut SliceStream::new(&container),
            container.len() as u64,
            &mut renderer,
        )
        .unwrap_err();

        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert_eq!(renderer.calls, 0);
    }

    #[test]
    fn test_one_span_per_data_chunk() {
        let config = CodecConfig {
            chunk_size: 64,
            compression_enabled: true,
            compression_threshold: 32,
        };
        let data = vec![1u8; 64 * 4 + 10];
        let (container, _) = Packer::new(&config).pack("x", &data).unwrap();

        let mut renderer = Counting::default();
        let summary = unpack(
            &mut SliceStream::new(&container),
            container.len() as u64,
            &mut renderer,
        )
        .unwrap();

        assert_eq!(renderer.calls, 5);
        assert_eq!(renderer.bytes, data);
        assert_eq!(summary.spans, 5);
        assert_eq!(summary.bytes_rendered, data.len() as u64);
    }

    #[test]
    fn test_data_before_metadata_is_skipped() {
        let mut container = Vec::new();
        write_magic(&mut container);
        container.extend(encode_data_chunk(b"orphan", false).unwrap());
        container.extend(encode_metadata_chunk("late", 4).unwrap());
        container.extend(encode_data_chunk(b"kept", false).unwrap());

        let mut out = Vec::new();
        let summary = unpack(
            &mut SliceStream::new(&container),
            container.len() as u64,
            &mut out,
        )
        .unwrap();

        assert_eq!(out, b"kept");
        assert_eq!(summary.chunks, 3);
    }

    #[test]
    fn test_truncated_container() {
        let container = two_chunk_container(&[9u8; 100]);
        let cut = container.len() - 5;

        let mut out = Vec::new();
        let err = unpack(&mut SliceStream::new(&container[..cut]), cut as u64, &mut out).unwrap_err();
        assert!(matches!(err, Error::OutOfRange(_)));
    }

    #[test]
    fn test_inspect_lists_headers() {
        let container = two_chunk_container(&[5u8; 100]);
        let entries = inspect(&mut SliceStream::new(&container), container.len() as u64).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 8);
        assert_eq!(entries[0].header.kind(), ChunkKind::Metadata);
        assert_eq!(entries[1].header.kind(), ChunkKind::Data);
        assert_eq!(entries[1].header.extra, 100);
    }
}
