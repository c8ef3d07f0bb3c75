//! Shared data models for the reelpipe pipeline.

mod format;
mod health;
mod job;

pub use format::{FormatParseError, OutputFormat};
pub use health::HealthSnapshot;
pub use job::{JobId, JobRecord, JobSpec, JobState};
