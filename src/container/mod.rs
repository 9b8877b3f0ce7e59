//! Container format
//!
//! A container is an 8-byte magic signature followed by a sequence of
//! chunks. Every chunk starts with a 16-byte little-endian header:
//!
//! ```text
//! id:u16  options:u16  size:u32  checksum:u32  extra:u32
//! ```
//!
//! followed by `size` payload bytes. The checksum is Adler-32 over the stored
//! payload. Two chunk kinds exist: a metadata chunk carrying the declared
//! image size and a file name, and data chunks carrying raw or compressed
//! pixel bytes.

mod codec;
mod compression;
mod pack;
mod stream;
mod unpack;

pub use codec::{
    decode_chunk_header, decode_data_chunk, decode_data_chunk_with, decode_metadata_chunk,
    encode_data_chunk, encode_data_chunk_with, encode_metadata_chunk, read_verified_payload,
    Metadata,
};
pub use compression::{compress, decompress, Compressor, Lz4Compressor};
pub use pack::{shown_name, PackSummary, Packer};
pub use stream::{ChunkStream, SliceStream};
pub use unpack::{inspect, unpack, ChunkEntry, Renderer, UnpackSummary, Unpacker};

use crate::error::Result;

/// Magic signature, PNG style so text-mode transfers corrupt it visibly
pub const MAGIC: [u8; 8] = [0x89, b'6', b'P', b'K', 0x0D, 0x0A, 0x1A, 0x0A];

/// Length of an encoded chunk header
pub const CHUNK_HEADER_LEN: usize = 16;

/// Fixed part of the metadata payload: 8-byte size field and 2-byte name length
pub const METADATA_PREFIX_LEN: usize = 10;

/// Kind of a chunk, from its header id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// File entry: declared size and name
    Metadata,
    /// Pixel data, raw or compressed
    Data,
    /// Anything else; skipped by readers
    Unknown(u16),
}

impl ChunkKind {
    pub const METADATA_ID: u16 = 1;
    pub const DATA_ID: u16 = 17;

    pub fn from_id(id: u16) -> Self {
        match id {
            Self::METADATA_ID => ChunkKind::Metadata,
            Self::DATA_ID => ChunkKind::Data,
            other => ChunkKind::Unknown(other),
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            ChunkKind::Metadata => Self::METADATA_ID,
            ChunkKind::Data => Self::DATA_ID,
            ChunkKind::Unknown(id) => *id,
        }
    }
}

/// Payload encoding of a data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Stored,
    Compressed,
}

impl Encoding {
    pub fn from_options(options: u16) -> Option<Self> {
        match options {
            0 => Some(Encoding::Stored),
            1 => Some(Encoding::Compressed),
            _ => None,
        }
    }

    pub fn options(&self) -> u16 {
        match self {
            Encoding::Stored => 0,
            Encoding::Compressed => 1,
        }
    }
}

/// Decoded chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: u16,
    pub options: u16,
    /// Stored payload length
    pub size: u32,
    /// Adler-32 of the stored payload
    pub checksum: u32,
    /// Decompressed length for compressed data chunks
    pub extra: u32,
}

impl ChunkHeader {
    pub fn kind(&self) -> ChunkKind {
        ChunkKind::from_id(self.id)
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_LEN] {
        let mut buf = [0u8; CHUNK_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.options.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..16].copy_from_slice(&self.extra.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; CHUNK_HEADER_LEN]) -> Self {
        ChunkHeader {
            id: u16::from_le_bytes([buf[0], buf[1]]),
            options: u16::from_le_bytes([buf[2], buf[3]]),
            size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            checksum: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            extra: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// Append the magic signature
pub fn write_magic(out: &mut Vec<u8>) {
    out.extend_from_slice(&MAGIC);
}

/// Check for the magic signature at the start of the stream.
///
/// Looks at logical offset 0 without moving the stream position.
pub fn detect_magic<S: ChunkStream + ?Sized>(stream: &mut S) -> Result<bool> {
    let head = stream.peek_at(0, MAGIC.len())?;
    Ok(head == MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = ChunkHeader {
            id: 17,
            options: 1,
            size: 0x0102_0304,
            checksum: 0xA1B2_C3D4,
            extra: 0x0000_1000,
        };

        let bytes = header.to_bytes();
        assert_eq!(
            bytes,
            [
                17, 0, 1, 0, 0x04, 0x03, 0x02, 0x01, 0xD4, 0xC3, 0xB2, 0xA1, 0x00, 0x10, 0x00,
                0x00
            ]
        );
        assert_eq!(ChunkHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_chunk_kinds() {
        assert_eq!(ChunkKind::from_id(1), ChunkKind::Metadata);
        assert_eq!(ChunkKind::from_id(17), ChunkKind::Data);
        assert_eq!(ChunkKind::from_id(9), ChunkKind::Unknown(9));
        assert_eq!(Encoding::from_options(2), None);
    }

    #[test]
    fn test_detect_magic_keeps_position() {
        let mut data = Vec::new();
        write_magic(&mut data);
        data.extend_from_slice(b"rest");

        let mut stream = SliceStream::new(&data);
        stream.skip(3).unwrap();

        assert!(detect_magic(&mut stream).unwrap());
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn test_detect_magic_rejects_text_mangling() {
        // CRLF -> LF conversion shortens the signature
        let mangled = [0x89, b'6', b'P', b'K', 0x0A, 0x1A, 0x0A, 0x00];
        let mut stream = SliceStream::new(&mangled);
        assert!(!detect_magic(&mut stream).unwrap());
    }
}
