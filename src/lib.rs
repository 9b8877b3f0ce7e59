//! flashpack - Bitmap transfer into block flash over a low-bandwidth link
//!
//! A companion packs an image into a checksummed chunk container and streams
//! it in small fragments. The device assembles the fragments into flash
//! blocks, then decodes the container straight from flash into a renderer.

pub mod checksum;
pub mod config;
pub mod container;
pub mod error;
pub mod ingest;
pub mod link;
pub mod storage;
pub mod transfer;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::container::{Packer, Renderer, Unpacker};
    pub use crate::error::{Error, Result};
    pub use crate::storage::{BlockStorage, MemoryFlash};
    pub use crate::transfer::{Device, TransmitState};
}
