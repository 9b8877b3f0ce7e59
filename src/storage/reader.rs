//! Reads that span block boundaries
//!
//! Storage only loads from word-aligned offsets inside one block. The reader
//! turns that into a flat logical byte space: it widens each load down to the
//! previous word boundary, strips the extra leading bytes and continues in
//! the next block when a read crosses the end of the current one.

use super::{BlockStorage, WORD_SIZE};
use crate::container::ChunkStream;
use crate::error::{Error, Result};
use tracing::trace;

/// Read position expressed as block index and offset within the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockCursor {
    pub block: usize,
    pub offset: usize,
}

impl BlockCursor {
    /// Start of the region
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor for a logical offset
    pub fn from_logical(pos: u64, block_size: usize) -> Self {
        let pos = pos as usize;
        BlockCursor {
            block: pos / block_size,
            offset: pos % block_size,
        }
    }

    /// Logical offset of the cursor
    pub fn logical(&self, block_size: usize) -> u64 {
        (self.block * block_size + self.offset) as u64
    }
}

/// The block holding the end of a received image.
///
/// `last_value` is the byte the ingest side placed at `valid_len - 1`. Some
/// flash parts drop the final byte of a short write, so reads of that
/// position return the remembered value instead of what storage holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalBlock {
    pub index: usize,
    pub valid_len: usize,
    pub last_value: u8,
}

/// Logical reader over a [`BlockStorage`]
pub struct BlockReader<'a, S: BlockStorage + ?Sized> {
    storage: &'a S,
    final_block: Option<FinalBlock>,
}

impl<'a, S: BlockStorage + ?Sized> BlockReader<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        BlockReader {
            storage,
            final_block: None,
        }
    }

    /// Enable the final-byte substitution
    pub fn with_final_block(mut self, final_block: Option<FinalBlock>) -> Self {
        self.final_block = final_block;
        self
    }

    pub fn block_size(&self) -> usize {
        self.storage.block_size()
    }

    /// Read `len` bytes at `cursor` and advance it
    pub fn read(&self, len: usize, cursor: &mut BlockCursor) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(&mut out, cursor)?;
        Ok(out)
    }

    /// Fill `buf` from `cursor` and advance it
    pub fn read_into(&self, buf: &mut [u8], cursor: &mut BlockCursor) -> Result<()> {
        let block_size = self.storage.block_size();
        let mut filled = 0;

        while filled < buf.len() {
            if cursor.offset >= block_size {
                cursor.block += 1;
                cursor.offset = 0;
            }

            let id = self
                .storage
                .block_id(cursor.block)
                .map_err(|e| Error::read_failure(cursor.block, e.to_string()))?;

            let align = cursor.offset % WORD_SIZE;
            let take = (buf.len() - filled).min(block_size - cursor.offset);

            let mut segment = vec![0u8; take + align];
            self.storage
                .load(&mut segment, id, cursor.offset - align)
                .map_err(|e| match e {
                    Error::StorageReadFailure { .. } => e,
                    other => Error::read_failure(cursor.block, other.to_string()),
                })?;

            buf[filled..filled + take].copy_from_slice(&segment[align..]);
            self.patch(&mut buf[filled..filled + take], cursor);

            trace!(
                "read {} bytes from block {} at {}",
                take,
                cursor.block,
                cursor.offset
            );

            filled += take;
            cursor.offset += take;
        }

        Ok(())
    }

    fn patch(&self, segment: &mut [u8], cursor: &BlockCursor) {
        let Some(fin) = self.final_block else {
            return;
        };
        if fin.index != cursor.block || fin.valid_len == 0 {
            return;
        }

        let last = fin.valid_len - 1;
        if last >= cursor.offset && last < cursor.offset + segment.len() {
            segment[last - cursor.offset] = fin.last_value;
        }
    }
}

/// [`ChunkStream`] over block storage
pub struct BlockStream<'a, S: BlockStorage + ?Sized> {
    reader: BlockReader<'a, S>,
    cursor: BlockCursor,
}

impl<'a, S: BlockStorage + ?Sized> BlockStream<'a, S> {
    pub fn new(reader: BlockReader<'a, S>) -> Self {
        BlockStream {
            reader,
            cursor: BlockCursor::start(),
        }
    }

    pub fn cursor(&self) -> BlockCursor {
        self.cursor
    }
}

impl<S: BlockStorage + ?Sized> ChunkStream for BlockStream<'_, S> {
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.reader.read(len, &mut self.cursor)
    }

    fn position(&self) -> u64 {
        self.cursor.logical(self.reader.block_size())
    }

    fn peek_at(&mut self, at: u64, len: usize) -> Result<Vec<u8>> {
        let mut cursor = BlockCursor::from_logical(at, self.reader.block_size());
        self.reader.read(len, &mut cursor)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        let target = self.position() + len as u64;
        self.cursor = BlockCursor::from_logical(target, self.reader.block_size());
        Ok(())
    }
}
