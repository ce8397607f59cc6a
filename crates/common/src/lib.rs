//! visreg Common Library
//!
//! Shared types, error taxonomy and configuration for the visual-regression
//! engine and its command-line front end.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Credentials, VisregConfig, RetryPolicy};
pub use error::{CaptureError, Error, Result};
pub use types::*;

use sha2::{Digest, Sha256};

/// visreg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("visreg.toml")
}

/// SHA-256 of `data`, hex encoded
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
