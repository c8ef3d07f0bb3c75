//! Job queue, worker pool and health state for the reelpipe pipeline.
//!
//! Jobs enter through [`Pipeline::submit`], wait in a bounded in-process
//! FIFO, and are driven by a fixed pool of worker tasks through fetch,
//! transcode and storage finalization. Transient step failures retry with
//! exponential backoff at the step that failed; terminal ones fail the job.

pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use health::PipelineHealth;
pub use pipeline::Pipeline;
pub use processor::{JobProcessor, MediaProcessor};
pub use queue::JobQueue;
pub use retry::RetryConfig;
pub use worker::WorkerPool;
