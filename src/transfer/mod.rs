//! Transfer control
//!
//! [`TransferMachine`] is a synchronous function from events to effects: it
//! never touches storage or the renderer itself. [`Device`] owns the machine
//! together with the storage and renderer, executes the effects and turns
//! storage completions back into events.

mod device;
mod machine;
mod state;

pub use device::Device;
pub use machine::TransferMachine;
pub use state::TransmitState;

use crate::container::UnpackSummary;
use crate::error::Result;
use crate::storage::FinalBlock;
use bytes::Bytes;

/// Identifies one transfer; also the tag of every store it issues
pub type SessionId = u64;

/// Input to the transfer machine
#[derive(Debug)]
pub enum Event {
    /// Status value written by the sender
    Status(TransmitState),
    /// Payload written by the sender
    Fragment(Bytes),
    /// Storage finished a store
    StoreCompleted {
        session: SessionId,
        block: usize,
        success: bool,
    },
    /// The decode pipeline ran
    DecodeFinished {
        session: SessionId,
        outcome: Result<UnpackSummary>,
    },
    /// Storage finished a clear
    ClearCompleted { success: bool },
}

/// Decode job for a fully received image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRequest {
    pub session: SessionId,
    /// Bytes committed to storage
    pub received: usize,
    pub final_block: Option<FinalBlock>,
}

/// Action requested by the transfer machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a status value to the sender
    Report(TransmitState),
    /// Write one block
    Store {
        session: SessionId,
        block: usize,
        data: Vec<u8>,
    },
    /// Run the decode pipeline over storage
    Decode(DecodeRequest),
    /// Erase the image region
    Clear,
}
