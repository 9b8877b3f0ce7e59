//! In-memory flash with deferred completions
//!
//! Operations queue up in submission order and only take effect when the
//! driver polls for their completion, which makes store latency explicit in
//! tests and simulations.

use super::{BlockId, BlockStorage, OpTag, StorageCompletion, StorageOp, WORD_SIZE};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

/// Failures to inject into a [`MemoryFlash`]
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Block indices whose store completes with failure
    pub failing_stores: HashSet<usize>,
    /// Complete the next clear with failure
    pub fail_next_clear: bool,
    /// Every load fails
    pub fail_loads: bool,
    /// A store shorter than a block leaves its last byte erased
    pub final_byte_erratum: bool,
}

#[derive(Debug)]
enum PendingOp {
    Store {
        block: usize,
        offset: usize,
        data: Vec<u8>,
        tag: OpTag,
    },
    Clear,
}

/// Simulated flash region
pub struct MemoryFlash {
    block_size: usize,
    blocks: Vec<Vec<u8>>,
    pending: VecDeque<PendingOp>,
    faults: FaultPlan,
}

impl MemoryFlash {
    /// Register a region of `block_count` blocks of `block_size` bytes
    pub fn new(block_size: usize, block_count: usize) -> Self {
        MemoryFlash {
            block_size,
            blocks: vec![vec![ERASED; block_size]; block_count],
            pending: VecDeque::new(),
            faults: FaultPlan::default(),
        }
    }

    /// Register a region with the configured geometry
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.block_size, config.block_count)
    }

    /// Mutable access to injected faults
    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        &mut self.faults
    }

    /// Operations submitted but not completed yet
    pub fn pending_ops(&self) -> usize {
        self.pending.len()
    }

    /// Whole region as one flat buffer
    pub fn contents(&self) -> Vec<u8> {
        self.blocks.concat()
    }

    /// Write bytes at a logical offset immediately, bypassing the queue
    pub fn write_raw(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let capacity = self.block_size * self.blocks.len();
        if offset + bytes.len() > capacity {
            return Err(Error::OutOfRange(format!(
                "raw write of {} bytes at {} past region of {} bytes",
                bytes.len(),
                offset,
                capacity
            )));
        }

        for (i, &b) in bytes.iter().enumerate() {
            let pos = offset + i;
            self.blocks[pos / self.block_size][pos % self.block_size] = b;
        }
        Ok(())
    }

    fn apply(&mut self, op: PendingOp) -> StorageCompletion {
        match op {
            PendingOp::Store {
                block,
                offset,
                data,
                tag,
            } => {
                let op = StorageOp::Store { block, tag };

                if self.faults.failing_stores.remove(&block) {
                    warn!("injected store failure on block {}", block);
                    return StorageCompletion { op, success: false };
                }

                let target = &mut self.blocks[block][offset..offset + data.len()];
                target.copy_from_slice(&data);

                if self.faults.final_byte_erratum && data.len() < self.block_size {
                    if let Some(last) = target.last_mut() {
                        *last = ERASED;
                    }
                }

                debug!("flash store applied: block {} ({} bytes)", block, data.len());
                StorageCompletion { op, success: true }
            }
            PendingOp::Clear => {
                if std::mem::take(&mut self.faults.fail_next_clear) {
                    warn!("injected clear failure");
                    return StorageCompletion {
                        op: StorageOp::Clear,
                        success: false,
                    };
                }

                for block in &mut self.blocks {
                    block.fill(ERASED);
                }
                debug!("flash cleared");
                StorageCompletion {
                    op: StorageOp::Clear,
                    success: true,
                }
            }
        }
    }
}

impl BlockStorage for MemoryFlash {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_id(&self, index: usize) -> Result<BlockId> {
        if index >= self.blocks.len() {
            return Err(Error::OutOfRange(format!(
                "block {} outside region of {} blocks",
                index,
                self.blocks.len()
            )));
        }
        Ok(BlockId(index))
    }

    fn store(&mut self, block: BlockId, data: &[u8], offset: usize, tag: OpTag) -> Result<()> {
        let index = block.index();

        if offset % WORD_SIZE != 0 || data.len() % WORD_SIZE != 0 {
            return Err(Error::write_failure(
                index,
                format!("unaligned store of {} bytes at {}", data.len(), offset),
            ));
        }
        if offset + data.len() > self.block_size {
            return Err(Error::write_failure(
                index,
                format!("store of {} bytes at {} overruns block", data.len(), offset),
            ));
        }

        self.pending.push_back(PendingOp::Store {
            block: index,
            offset,
            data: data.to_vec(),
            tag,
        });
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.pending.push_back(PendingOp::Clear);
        Ok(())
    }

    fn load(&self, buf: &mut [u8], block: BlockId, offset: usize) -> Result<()> {
        let index = block.index();

        if self.faults.fail_loads {
            return Err(Error::read_failure(index, "injected load failure"));
        }
        if offset % WORD_SIZE != 0 {
            return Err(Error::read_failure(index, format!("unaligned load at {}", offset)));
        }
        if offset + buf.len() > self.block_size {
            return Err(Error::read_failure(
                index,
                format!("load of {} bytes at {} overruns block", buf.len(), offset),
            ));
        }

        buf.copy_from_slice(&self.blocks[index][offset..offset + buf.len()]);
        Ok(())
    }

    fn poll_completion(&mut self) -> Option<StorageCompletion> {
        let op = self.pending.pop_front()?;
        Some(self.apply(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_deferred() {
        let mut flash = MemoryFlash::new(16, 2);
        let id = flash.block_id(1).unwrap();

        flash.store(id, &[1, 2, 3, 4], 0, 7).unwrap();
        assert_eq!(flash.pending_ops(), 1);

        let mut buf = [0u8; 4];
        flash.load(&mut buf, id, 0).unwrap();
        assert_eq!(buf, [ERASED; 4]);

        let done = flash.poll_completion().unwrap();
        assert_eq!(done.op, StorageOp::Store { block: 1, tag: 7 });
        assert!(done.success);

        flash.load(&mut buf, id, 0).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(flash.poll_completion().is_none());
    }

    #[test]
    fn test_operations_complete_in_order() {
        let mut flash = MemoryFlash::new(8, 1);
        let id = flash.block_id(0).unwrap();

        flash.store(id, &[9; 8], 0, 1).unwrap();
        flash.clear().unwrap();

        assert!(matches!(flash.poll_completion().unwrap().op, StorageOp::Store { .. }));
        assert_eq!(flash.poll_completion().unwrap().op, StorageOp::Clear);
        assert_eq!(flash.contents(), vec![ERASED; 8]);
    }

    #[test]
    fn test_alignment_rules() {
        let mut flash = MemoryFlash::new(16, 1);
        let id = flash.block_id(0).unwrap();

        assert!(flash.store(id, &[0; 3], 0, 0).is_err());
        assert!(flash.store(id, &[0; 4], 2, 0).is_err());
        assert!(flash.store(id, &[0; 20], 0, 0).is_err());

        let mut buf = [0u8; 2];
        assert!(flash.load(&mut buf, id, 1).is_err());
        assert!(flash.load(&mut buf, id, 4).is_ok());
        assert!(flash.block_id(1).is_err());
    }

    #[test]
    fn test_injected_faults() {
        let mut flash = MemoryFlash::new(8, 2);
        flash.faults_mut().failing_stores.insert(1);
        flash.faults_mut().fail_next_clear = true;

        flash.write_raw(0, &[7; 4]).unwrap();

        let id = flash.block_id(1).unwrap();
        flash.store(id, &[1; 8], 0, 0).unwrap();
        flash.clear().unwrap();
        flash.clear().unwrap();

        // Neither the failed store nor the failed clear touch the cells
        assert!(!flash.poll_completion().unwrap().success);
        assert!(!flash.poll_completion().unwrap().success);
        assert_eq!(&flash.contents()[..4], &[7; 4]);
        assert!(flash.contents()[8..].iter().all(|&b| b == ERASED));

        assert!(flash.poll_completion().unwrap().success);
        assert!(flash.contents().iter().all(|&b| b == ERASED));
    }

    #[test]
    fn test_final_byte_erratum() {
        let mut flash = MemoryFlash::new(16, 1);
        flash.faults_mut().final_byte_erratum = true;

        let id = flash.block_id(0).unwrap();
        flash.store(id, &[1, 2, 3, 4, 5, 6, 7, 8], 0, 0).unwrap();
        flash.poll_completion();

        assert_eq!(&flash.contents()[..8], &[1, 2, 3, 4, 5, 6, 7, ERASED]);
    }
}
