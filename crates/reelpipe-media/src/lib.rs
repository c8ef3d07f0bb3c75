//! Source fetching and FFmpeg orchestration for the reelpipe pipeline.
//!
//! This crate owns the two external-facing steps of a job: downloading the
//! source media over HTTP and driving an ffmpeg subprocess to convert it.
//! Both are cancellable and report failures through [`MediaError`], which
//! classifies each failure as retryable or terminal.

pub mod error;
pub mod fetch;
pub mod fs_utils;
pub mod transcode;

pub use error::{MediaError, MediaResult};
pub use fetch::FetchClient;
pub use transcode::{check_ffmpeg, FfmpegCommand, FfmpegProgress, FfmpegRunner};
