//! FFmpeg command builder and runner.
//!
//! The runner treats the ffmpeg child as a scoped resource: the process is
//! spawned with `kill_on_drop` and is explicitly killed and reaped on
//! timeout and cancellation, so no exit path leaks a subprocess or its
//! pipes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reelpipe_models::OutputFormat;

use crate::error::{MediaError, MediaResult};

/// How many trailing stderr lines to retain for failure reports.
const STDERR_TAIL_LINES: usize = 40;

/// Progress sample parsed from ffmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    /// Output timestamp in milliseconds
    pub out_time_ms: i64,
    /// Frames emitted so far
    pub frame: u64,
    /// Encoding speed relative to realtime ("1.5x")
    pub speed: f64,
    /// True once ffmpeg reported `progress=end`
    pub is_complete: bool,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before -i
    input_args: Vec<String>,
    /// Arguments placed after -i
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Create a command with the codec preset for a target format.
    pub fn for_format(
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        format: OutputFormat,
    ) -> Self {
        let cmd = Self::new(input, output);
        match format {
            OutputFormat::Mp4 => cmd
                .video_codec("libx264")
                .preset("veryfast")
                .crf(23)
                .audio_codec("aac")
                .audio_bitrate("192k")
                .output_args(["-movflags", "+faststart"]),
            OutputFormat::Webm => cmd
                .video_codec("libvpx-vp9")
                .crf(32)
                .output_args(["-b:v", "0"])
                .audio_codec("libopus"),
            // Container rewrap only; keep source streams untouched.
            OutputFormat::Mkv => cmd.video_codec("copy").audio_codec("copy"),
            OutputFormat::Mp3 => cmd
                .drop_video()
                .audio_codec("libmp3lame")
                .audio_bitrate("192k"),
            OutputFormat::M4a => cmd.drop_video().audio_codec("aac").audio_bitrate("192k"),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set encoder preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Drop the video stream (audio-only outputs).
    pub fn drop_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set ffmpeg log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the full argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            // Progress key=value stream interleaved on stderr
            "-progress".to_string(),
            "pipe:2".to_string(),
        ];

        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with timeout and cancellation.
#[derive(Debug, Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set a hard timeout for the subprocess.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command, invoking `progress_callback` on each sample.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr).lines();

        // Parse progress samples and keep a tail of diagnostic lines for
        // failure reports.
        let stderr_task = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail: Vec<String> = Vec::new();

            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    progress_callback(progress);
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }

            tail.join("\n")
        });

        let status = self.wait_for_completion(&mut child).await?;
        let captured = stderr_task.await.unwrap_or_default();

        if status.success() {
            info!(output = %cmd.output.display(), "FFmpeg completed");
            Ok(())
        } else {
            Err(MediaError::transcode_failed(
                format!("ffmpeg exited with status {status}"),
                if captured.is_empty() {
                    None
                } else {
                    Some(captured)
                },
                status.code(),
            ))
        }
    }

    /// Wait for the child, killing it on timeout or cancellation.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let timeout = self.timeout;
        let timeout_fut = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout_fut);

        let mut cancel = self.cancel_rx.clone();

        loop {
            tokio::select! {
                status = child.wait() => return Ok(status?),
                _ = &mut timeout_fut => {
                    let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                    warn!("FFmpeg timed out after {secs}s, killing process");
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
                res = changed_or_pending(&mut cancel) => {
                    match res {
                        Ok(()) => {
                            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                                info!("FFmpeg cancelled, killing process");
                                let _ = child.kill().await;
                                return Err(MediaError::Cancelled);
                            }
                        }
                        // Sender dropped; stop watching for cancellation.
                        Err(_) => cancel = None,
                    }
                }
            }
        }
    }
}

/// Await the next cancellation change, or pend forever if unused.
async fn changed_or_pending(
    cancel: &mut Option<watch::Receiver<bool>>,
) -> Result<(), watch::error::RecvError> {
    match cancel {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

/// Parse one line of ffmpeg's `-progress` output.
///
/// Returns a sample to emit when a `progress=` terminator line is seen.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        "out_time_ms" | "out_time_us" => {
            // Both keys are microseconds in practice (ffmpeg quirk).
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "speed" => {
            if let Some(speed_str) = value.strip_suffix('x') {
                if let Ok(speed) = speed_str.parse() {
                    current.speed = speed;
                }
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}
