//! visreg engine
//!
//! Visual-regression core: keeps a versioned corpus of approved screenshots,
//! scores fresh captures against it and records every session for trend
//! analysis.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ComparisonOrchestrator                     │
//! │    run(scope, cancel) -> TestSession                        │
//! │      for each (page, viewport), on a bounded worker pool:   │
//! │        Capturer::capture          -> CAPTURED | ERROR       │
//! │        BaselineStore::load        -> MISSING_BASELINE       │
//! │        SimilarityEngine::compare  -> SCORED                 │
//! │        ThresholdPolicy::judge     -> PASS | FAIL (+ diff)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BaselineStore      generate / backup / restore / list /    │
//! │                     compare / clean / info                  │
//! │  IsolationManager   per-session artifact namespaces,        │
//! │                     retention cleanup, usage report         │
//! │  ReportStore        append-only SQLite history, reports,    │
//! │                     historical scores for recommendations   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod baseline;
pub mod capture;
pub mod isolation;
pub mod orchestrator;
pub mod report;
pub mod similarity;
pub mod threshold;

pub use baseline::{BaselineStore, CURRENT};
pub use capture::{CaptureRequest, CapturedImage, Capturer, PlaywrightCapturer, RetryingCapturer};
pub use isolation::{IsolationManager, SessionHandle};
pub use orchestrator::{ComparisonOrchestrator, OrchestratorConfig, Scope};
pub use report::{QueryWindow, ReportFormat, ReportStore};
pub use similarity::{DiffImage, SimilarityEngine};
pub use threshold::{HistoricalScore, Recommendation, ThresholdPolicy};
