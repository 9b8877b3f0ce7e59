//! Block storage
//!
//! The image region is a fixed number of fixed-size blocks addressed by a
//! 0-based index. Stores and clears are asynchronous: submitting one returns
//! immediately and its outcome arrives later as a [`StorageCompletion`].
//! Loads are synchronous.

mod memory;
mod reader;

pub use memory::{FaultPlan, MemoryFlash, ERASED};
pub use reader::{BlockCursor, BlockReader, BlockStream, FinalBlock};

use crate::error::Result;

/// Flash word size; store lengths and load offsets are multiples of it
pub const WORD_SIZE: usize = 4;

/// Round `len` up to a whole number of words
pub fn align_up(len: usize) -> usize {
    (len + WORD_SIZE - 1) / WORD_SIZE * WORD_SIZE
}

/// Caller-chosen value echoed back by a store completion
pub type OpTag = u64;

/// Handle of one block inside the registered region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Operation a completion refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Store { block: usize, tag: OpTag },
    Clear,
}

/// Outcome of an asynchronous storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCompletion {
    pub op: StorageOp,
    pub success: bool,
}

/// Block-structured durable storage
pub trait BlockStorage {
    /// Bytes per block
    fn block_size(&self) -> usize;

    /// Blocks in the region
    fn block_count(&self) -> usize;

    /// Resolve a block index to a handle
    fn block_id(&self, index: usize) -> Result<BlockId>;

    /// Submit an asynchronous write of `data` at `offset` within `block`.
    ///
    /// The bytes are taken over at submission, so the caller may reuse its
    /// buffer right away. An `Err` means the request was refused and no
    /// completion will follow.
    fn store(&mut self, block: BlockId, data: &[u8], offset: usize, tag: OpTag) -> Result<()>;

    /// Submit an asynchronous erase of the whole region
    fn clear(&mut self) -> Result<()>;

    /// Synchronously read `buf.len()` bytes at `offset` within `block`
    fn load(&self, buf: &mut [u8], block: BlockId, offset: usize) -> Result<()>;

    /// Next finished operation, if any
    fn poll_completion(&mut self) -> Option<StorageCompletion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 4);
        assert_eq!(align_up(4), 4);
        assert_eq!(align_up(5), 8);
        assert_eq!(align_up(1023), 1024);
    }
}
