//! Sender side of the wireless link
//!
//! A transfer starts with a 2-byte big-endian length prefix, then the
//! container in fixed-size fragments. Fragments go out in windows; after
//! each window the sender waits for the device to report OK.

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use bytes::Bytes;

/// Splits a container into link fragments grouped by window
pub struct Fragmenter {
    payload: Bytes,
    fragment_size: usize,
    first_window: usize,
    window: usize,
    sent: usize,
    windows_sent: usize,
}

impl Fragmenter {
    pub fn new(container: impl Into<Bytes>, link: &LinkConfig) -> Result<Self> {
        let payload = container.into();
        if payload.is_empty() || payload.len() > u16::MAX as usize {
            return Err(Error::OutOfRange(format!(
                "container of {} bytes cannot be described by a 2-byte length",
                payload.len()
            )));
        }

        Ok(Fragmenter {
            payload,
            fragment_size: link.fragment_size,
            first_window: link.first_window_fragments,
            window: link.window_fragments,
            sent: 0,
            windows_sent: 0,
        })
    }

    /// Length prefix that opens the session
    pub fn length_prefix(&self) -> Bytes {
        Bytes::copy_from_slice(&(self.payload.len() as u16).to_be_bytes())
    }

    /// Total number of payload fragments
    pub fn fragment_count(&self) -> usize {
        (self.payload.len() + self.fragment_size - 1) / self.fragment_size
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.payload.len()
    }

    /// Next window of fragments, `None` once everything was handed out
    pub fn next_window(&mut self) -> Option<Vec<Bytes>> {
        if self.is_done() {
            return None;
        }

        let limit = if self.windows_sent == 0 {
            self.first_window
        } else {
            self.window
        };

        let mut fragments = Vec::with_capacity(limit);
        while fragments.len() < limit && !self.is_done() {
            let end = (self.sent + self.fragment_size).min(self.payload.len());
            fragments.push(self.payload.slice(self.sent..end));
            self.sent = end;
        }

        self.windows_sent += 1;
        Some(fragments)
    }
}
