//! Chunk encoding and decoding

use super::compression::{self, Compressor, Lz4Compressor};
use super::stream::ChunkStream;
use super::{ChunkHeader, ChunkKind, Encoding, CHUNK_HEADER_LEN, METADATA_PREFIX_LEN};
use crate::checksum::{adler32, ADLER32_SEED};
use crate::config::DEFAULT_COMPRESSION_THRESHOLD;
use crate::error::{Error, Result};
use tracing::debug;

/// Contents of a metadata chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// File name without the terminating NUL
    pub name: String,
    /// Declared size of the original file
    pub declared_length: u32,
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::OutOfRange(format!("chunk payload of {} bytes exceeds u32", len)))
}

fn emit(kind: ChunkKind, encoding: Encoding, payload: &[u8], extra: u32) -> Result<Vec<u8>> {
    let header = ChunkHeader {
        id: kind.id(),
        options: encoding.options(),
        size: payload_len(payload.len())?,
        checksum: adler32(ADLER32_SEED, payload),
        extra,
    };

    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a metadata chunk for `name` and the declared file size
pub fn encode_metadata_chunk(name: &str, declared_length: u32) -> Result<Vec<u8>> {
    // Name length counts the terminating NUL
    let name_length = u16::try_from(name.len() + 1)
        .map_err(|_| Error::OutOfRange(format!("name of {} bytes is too long", name.len())))?;

    let mut payload = Vec::with_capacity(METADATA_PREFIX_LEN + name_length as usize);
    payload.extend_from_slice(&declared_length.to_le_bytes());
    // Upper half of the 64-bit size field, sizes are 32-bit
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&name_length.to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);

    emit(ChunkKind::Metadata, Encoding::Stored, &payload, 0)
}

/// Encode a data chunk with the default LZ4 compressor and threshold
pub fn encode_data_chunk(payload: &[u8], compress: bool) -> Result<Vec<u8>> {
    encode_data_chunk_with(
        payload,
        compress,
        DEFAULT_COMPRESSION_THRESHOLD,
        &Lz4Compressor,
    )
}

/// Encode a data chunk.
///
/// Falls back to a stored chunk when compression is off, the payload is
/// under `threshold`, or the compressed form would not be smaller.
pub fn encode_data_chunk_with<C: Compressor + ?Sized>(
    payload: &[u8],
    compress: bool,
    threshold: usize,
    compressor: &C,
) -> Result<Vec<u8>> {
    let original_len = payload_len(payload.len())?;

    let compressed = if compress {
        compression::compress(compressor, payload, threshold)
    } else {
        None
    };

    match compressed {
        Some(stored) => emit(ChunkKind::Data, Encoding::Compressed, &stored, original_len),
        None => emit(ChunkKind::Data, Encoding::Stored, payload, original_len),
    }
}

/// Read the next 16-byte chunk header
pub fn decode_chunk_header<S: ChunkStream + ?Sized>(stream: &mut S) -> Result<ChunkHeader> {
    let bytes = stream.read_bytes(CHUNK_HEADER_LEN)?;
    let mut raw = [0u8; CHUNK_HEADER_LEN];
    raw.copy_from_slice(&bytes);

    let header = ChunkHeader::from_bytes(&raw);
    debug!(
        "chunk header: id={} options={} size={} checksum={:08X} extra={}",
        header.id, header.options, header.size, header.checksum, header.extra
    );
    Ok(header)
}

/// Read a chunk's stored payload and verify its checksum
pub fn read_verified_payload<S: ChunkStream + ?Sized>(
    header: &ChunkHeader,
    stream: &mut S,
) -> Result<Vec<u8>> {
    let payload = stream.read_bytes(header.size as usize)?;

    let actual = adler32(ADLER32_SEED, &payload);
    if actual != header.checksum {
        return Err(Error::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(payload)
}

/// Decode a data chunk with the default LZ4 compressor
pub fn decode_data_chunk<S: ChunkStream + ?Sized>(
    header: &ChunkHeader,
    stream: &mut S,
) -> Result<Vec<u8>> {
    decode_data_chunk_with(header, stream, &Lz4Compressor)
}

/// Read, verify and decompress a data chunk's payload
pub fn decode_data_chunk_with<S: ChunkStream + ?Sized, C: Compressor + ?Sized>(
    header: &ChunkHeader,
    stream: &mut S,
    compressor: &C,
) -> Result<Vec<u8>> {
    let payload = read_verified_payload(header, stream)?;

    match Encoding::from_options(header.options) {
        Some(Encoding::Stored) => Ok(payload),
        Some(Encoding::Compressed) => compression::decompress(compressor, &payload, header.extra),
        None => Err(Error::UnsupportedCompression(header.options)),
    }
}

/// Read and verify a metadata chunk
pub fn decode_metadata_chunk<S: ChunkStream + ?Sized>(
    header: &ChunkHeader,
    stream: &mut S,
) -> Result<Metadata> {
    if (header.size as usize) < METADATA_PREFIX_LEN {
        return Err(Error::OutOfRange(format!(
            "metadata chunk of {} bytes is shorter than its {} byte prefix",
            header.size, METADATA_PREFIX_LEN
        )));
    }

    let payload = read_verified_payload(header, stream)?;

    let declared_length = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);

    // Clamp the name to what the payload actually holds
    let name_length = u16::from_le_bytes([payload[8], payload[9]]) as usize;
    let name_length = name_length.min(payload.len() - METADATA_PREFIX_LEN);

    let raw_name = &payload[METADATA_PREFIX_LEN..METADATA_PREFIX_LEN + name_length];
    let raw_name = match raw_name.iter().position(|&b| b == 0) {
        Some(nul) => &raw_name[..nul],
        None => raw_name,
    };

    Ok(Metadata {
        name: String::from_utf8_lossy(raw_name).into_owned(),
        declared_length,
    })
}
