//! Configuration management for flashpack

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default storage block size in bytes (one flash page chunk)
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Default number of storage blocks in the image region
pub const DEFAULT_BLOCK_COUNT: usize = 39;

/// Default payload bytes per wireless write
pub const DEFAULT_FRAGMENT_SIZE: usize = 18;

/// Fragments per window after the first one
pub const DEFAULT_WINDOW_FRAGMENTS: usize = 128;

/// The first window is one short because the length prefix uses a write
pub const DEFAULT_FIRST_WINDOW_FRAGMENTS: usize = 127;

/// Default uncompressed bytes per data chunk when packing
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Payloads smaller than this are stored raw
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 32;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Block storage geometry
    #[serde(default)]
    pub storage: StorageConfig,

    /// Wireless link framing
    #[serde(default)]
    pub link: LinkConfig,

    /// Container codec settings
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Block storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Size of one storage block in bytes
    pub block_size: usize,

    /// Number of blocks in the region
    pub block_count: usize,

    /// Substitute the last byte of the final partial block with the value
    /// remembered at flush time
    pub patch_final_byte: bool,
}

/// Wireless link framing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// Bytes per fragment written by the sender
    pub fragment_size: usize,

    /// Fragments in the first window
    pub first_window_fragments: usize,

    /// Fragments in every following window
    pub window_fragments: usize,
}

/// Container codec configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodecConfig {
    /// Uncompressed bytes per data chunk
    pub chunk_size: usize,

    /// Enable compression
    pub compression_enabled: bool,

    /// Minimum size to compress (bytes)
    pub compression_threshold: usize,
}

impl StorageConfig {
    /// Total capacity of the region in bytes
    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
            patch_final_byte: true,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            first_window_fragments: DEFAULT_FIRST_WINDOW_FRAGMENTS,
            window_fragments: DEFAULT_WINDOW_FRAGMENTS,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_enabled: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(size) = env_usize("FLASHPACK_BLOCK_SIZE") {
            self.storage.block_size = size;
        }

        if let Some(count) = env_usize("FLASHPACK_BLOCK_COUNT") {
            self.storage.block_count = count;
        }

        if let Some(size) = env_usize("FLASHPACK_FRAGMENT_SIZE") {
            self.link.fragment_size = size;
        }

        if let Some(size) = env_usize("FLASHPACK_CHUNK_SIZE") {
            self.codec.chunk_size = size;
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.block_size == 0 || self.storage.block_size % 4 != 0 {
            return Err(Error::InvalidConfig(format!(
                "Block size must be a non-zero multiple of 4, got {}",
                self.storage.block_size
            )));
        }

        if self.storage.block_count == 0 {
            return Err(Error::InvalidConfig(
                "Block count must be greater than 0".to_string(),
            ));
        }

        if self.link.fragment_size == 0 {
            return Err(Error::InvalidConfig(
                "Fragment size must be greater than 0".to_string(),
            ));
        }

        if self.link.first_window_fragments == 0 || self.link.window_fragments == 0 {
            return Err(Error::InvalidConfig(
                "Window sizes must be greater than 0".to_string(),
            ));
        }

        if self.codec.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        // The data chunk header stores sizes as u32
        if self.codec.chunk_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(
                "Chunk size exceeds the 32-bit header field".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse::<usize>().ok()
}
