//! Output format for transcoded artifacts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a requested format string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown output format: {0}")]
pub struct FormatParseError(pub String);

/// Supported transcode targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Mkv,
    Mp3,
    M4a,
}

impl OutputFormat {
    /// File extension for this format (no leading dot).
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
        }
    }

    /// Whether this format drops the video stream.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::M4a)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            "mkv" => Ok(OutputFormat::Mkv),
            "mp3" => Ok(OutputFormat::Mp3),
            "m4a" => Ok(OutputFormat::M4a),
            other => Err(FormatParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}
