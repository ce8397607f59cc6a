//! Error types for visreg

use thiserror::Error;

/// Result type alias using the visreg Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the capture collaborator for a single (page, viewport) pair
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture timed out after {ms} ms")]
    Timeout { ms: u64 },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("sign-in failed: {0}")]
    Authentication(String),

    #[error("capture process failed: {0}")]
    Process(String),
}

impl CaptureError {
    /// Timeouts and navigation failures are worth retrying; anything else
    /// fails the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Timeout { .. } | CaptureError::Navigation(_))
    }
}

/// visreg error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("Render error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Baseline not found for {0}")]
    MissingBaseline(String),

    #[error("Threshold violation: {key} scored {score:.2} (threshold: {threshold:.2})")]
    ThresholdViolation {
        key: String,
        score: f64,
        threshold: f64,
    },

    #[error("Invalid threshold {0}: must lie in (0, 100]")]
    InvalidThreshold(f64),

    #[error("Baseline store is locked by another writer ({attempts} attempts)")]
    StoreLockConflict { attempts: usize },

    #[error("Baseline version not found: {0}")]
    VersionNotFound(String),

    #[error("Baseline version already exists: {0}")]
    VersionExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} counts are inconsistent: {detail}")]
    SessionInvariant { id: String, detail: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
