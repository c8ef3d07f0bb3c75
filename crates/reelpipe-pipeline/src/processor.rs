//! The two media steps a worker drives, behind a trait seam.
//!
//! Workers only know about [`JobProcessor`]; the production implementation
//! shells out to HTTP and ffmpeg, while tests substitute a stub so pipeline
//! behavior can be exercised without a network or an ffmpeg binary.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::watch;

use reelpipe_media::{FetchClient, FfmpegCommand, FfmpegRunner, MediaResult};
use reelpipe_models::OutputFormat;

/// Fetch and transcode operations as seen by a worker.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Download the source to `dest`, returning bytes written.
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64>;

    /// Convert `input` into `output` in the requested format.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<()>;
}

/// Production processor: HTTP fetch plus an ffmpeg subprocess.
pub struct MediaProcessor {
    fetch_client: FetchClient,
}

impl MediaProcessor {
    pub fn new(fetch_client: FetchClient) -> Self {
        Self { fetch_client }
    }
}

#[async_trait]
impl JobProcessor for MediaProcessor {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64> {
        self.fetch_client.fetch(source_url, dest, cancel).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::for_format(input, output, format);
        FfmpegRunner::new().with_cancel(cancel).run(&cmd).await
    }
}
