//! Session history and report rendering

mod render;
mod store;

pub use render::{
    render, FailurePattern, FailureRecord, GroupStats, ReportFormat, ReportRecord, LOW_SIMILARITY,
};
pub use store::{QueryWindow, ReportStore, SessionIter};
