//! Ingest assembler
//!
//! Turns link fragments of arbitrary size into sequential block stores. Two
//! block-sized buffers alternate: while one has been handed to storage the
//! other keeps absorbing bytes, so the link never waits on a flash write.

use crate::config::{LinkConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::storage::{align_up, FinalBlock, ERASED};
use tracing::{debug, info, trace, warn};

/// Size of the session length prefix
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Store the assembler wants issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    /// Block index, strictly increasing within a session
    pub block: usize,
    /// Word-aligned bytes, padded with the erase value
    pub data: Vec<u8>,
    /// Last store of the session
    pub is_final: bool,
}

/// Where the session stands after a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// More fragments expected in the current window
    Receiving,
    /// Window done, the sender waits for an acknowledgement
    WindowComplete,
    /// Declared length or fragment budget reached
    Finished,
}

/// Effect of one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub stores: Vec<StoreRequest>,
    pub status: IngestStatus,
}

/// Parse the big-endian length prefix that opens a session
pub fn parse_length_prefix(prefix: &[u8]) -> Result<usize> {
    if prefix.len() != LENGTH_PREFIX_LEN {
        return Err(Error::MalformedLengthPrefix(prefix.len()));
    }

    let declared = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
    if declared == 0 {
        return Err(Error::MalformedLengthPrefix(prefix.len()));
    }
    Ok(declared)
}

/// Double-buffered fragment assembler for one session
pub struct IngestAssembler {
    block_size: usize,
    block_count: usize,
    buffers: [Box<[u8]>; 2],
    active: usize,
    offset: usize,
    next_block: usize,

    declared: usize,
    received: usize,

    fragments: usize,
    fragment_budget: usize,
    window_fragments: usize,
    window_remaining: usize,

    final_block: Option<FinalBlock>,
    finished: bool,
}

impl IngestAssembler {
    /// Open a session from its first fragment
    pub fn start(prefix: &[u8], storage: &StorageConfig, link: &LinkConfig) -> Result<Self> {
        let declared = parse_length_prefix(prefix)?;

        let capacity = storage.capacity();
        if declared > capacity {
            return Err(Error::CapacityExceeded { declared, capacity });
        }

        let fragment_budget = declared / link.fragment_size + 1;
        let window_remaining = link.first_window_fragments.min(fragment_budget);

        info!(
            "ingest session: {} bytes declared, at most {} fragments",
            declared, fragment_budget
        );

        Ok(IngestAssembler {
            block_size: storage.block_size,
            block_count: storage.block_count,
            buffers: [
                vec![ERASED; storage.block_size].into_boxed_slice(),
                vec![ERASED; storage.block_size].into_boxed_slice(),
            ],
            active: 0,
            offset: 0,
            next_block: 0,
            declared,
            received: 0,
            fragments: 0,
            fragment_budget,
            window_fragments: link.window_fragments,
            window_remaining,
            final_block: None,
            finished: false,
        })
    }

    pub fn declared_length(&self) -> usize {
        self.declared
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn fragment_budget(&self) -> usize {
        self.fragment_budget
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Final block descriptor, set once the last store has been requested
    pub fn final_block(&self) -> Option<FinalBlock> {
        self.final_block
    }

    /// Absorb one payload fragment
    pub fn push(&mut self, fragment: &[u8]) -> Result<IngestOutcome> {
        if self.finished {
            warn!("fragment of {} bytes after session end, ignored", fragment.len());
            return Ok(IngestOutcome {
                stores: Vec::new(),
                status: IngestStatus::Finished,
            });
        }

        let mut stores = Vec::new();
        self.fragments += 1;

        let room = self.declared - self.received;
        let take = fragment.len().min(room);
        if take < fragment.len() {
            warn!(
                "fragment overruns declared length by {} bytes, truncating",
                fragment.len() - take
            );
        }

        let mut copied = 0;
        while copied < take {
            if self.offset == self.block_size {
                stores.push(self.flush(false)?);
            }

            let n = (take - copied).min(self.block_size - self.offset);
            self.buffers[self.active][self.offset..self.offset + n]
                .copy_from_slice(&fragment[copied..copied + n]);
            self.offset += n;
            copied += n;
        }

        self.received += take;
        self.window_remaining = self.window_remaining.saturating_sub(1);

        trace!(
            "fragment {}: {} bytes, {}/{} received",
            self.fragments,
            take,
            self.received,
            self.declared
        );

        let status = if self.received >= self.declared || self.fragments >= self.fragment_budget {
            if self.received < self.declared {
                warn!(
                    "fragment budget exhausted with {}/{} bytes received",
                    self.received, self.declared
                );
            }
            if self.offset > 0 {
                stores.push(self.flush(true)?);
            }
            self.finished = true;
            self.window_remaining = 0;
            IngestStatus::Finished
        } else if self.window_remaining == 0 {
            self.window_remaining = self
                .window_fragments
                .min(self.fragment_budget - self.fragments);
            debug!(
                "window complete after {} fragments, next window {}",
                self.fragments, self.window_remaining
            );
            IngestStatus::WindowComplete
        } else {
            IngestStatus::Receiving
        };

        Ok(IngestOutcome { stores, status })
    }

    fn flush(&mut self, is_final: bool) -> Result<StoreRequest> {
        let block = self.next_block;
        if block >= self.block_count {
            return Err(Error::Internal(format!(
                "block {} past region of {} blocks",
                block, self.block_count
            )));
        }

        let valid = self.offset;
        let padded = align_up(valid);
        let buffer = &mut self.buffers[self.active];
        buffer[valid..padded].fill(ERASED);

        if is_final {
            self.final_block = Some(FinalBlock {
                index: block,
                valid_len: valid,
                last_value: buffer[valid - 1],
            });
        }

        // The request owns a copy, so the buffer is free again right away
        let data = buffer[..padded].to_vec();

        debug!(
            "flush buffer {} to block {} ({} bytes{})",
            self.active,
            block,
            valid,
            if is_final { ", final" } else { "" }
        );

        self.next_block += 1;
        self.active ^= 1;
        self.offset = 0;

        Ok(StoreRequest {
            block,
            data,
            is_final,
        })
    }
}
