//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SplitError};

/// Segment duration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Duration used when the request does not carry a usable value
    pub default_secs: u32,

    /// Lower clamp bound (prevents pathologically many tiny segments)
    pub min_secs: u32,

    /// Upper clamp bound
    pub max_secs: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            default_secs: 900,
            min_secs: 60,
            max_secs: 3600,
        }
    }
}

/// Audio output profile passed to ffmpeg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output channel count
    pub channels: u32,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// ffmpeg encoder name
    pub codec: String,

    /// Bitrate in ffmpeg notation (e.g. "48k")
    pub bitrate: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 16000, // speech
            codec: "aac".to_string(),
            bitrate: "48k".to_string(),
        }
    }
}

/// Resource limits and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum upload size in megabytes
    pub max_upload_mb: usize,

    /// Upper bound on a single ffmpeg run, in seconds
    pub transcode_timeout_secs: u64,

    /// Upper bound on streaming the archive to one client, in seconds
    pub stream_timeout_secs: u64,

    /// Maximum number of ffmpeg stderr bytes retained for error reports
    pub diagnostic_limit_bytes: usize,

    /// Number of archive chunks buffered between the writer and the response
    pub archive_channel_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: 200,
            transcode_timeout_secs: 1800,
            stream_timeout_secs: 1800,
            diagnostic_limit_bytes: 64 * 1024,
            archive_channel_capacity: 8,
        }
    }
}

impl LimitsConfig {
    /// Get maximum upload size in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

/// Logging output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Path (or bare name resolved through PATH) of the ffmpeg binary
    pub ffmpeg_path: PathBuf,

    /// Directory under which uploads and workspaces are created
    pub temp_dir: PathBuf,

    /// Bearer token required on /split; `None` disables auth
    pub require_auth_token: Option<String>,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log output format
    pub log_format: LogFormat,

    /// Segment duration configuration
    pub segment: SegmentConfig,

    /// Audio output profile
    pub audio: AudioConfig,

    /// Limits and timeouts
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: std::env::temp_dir(),
            require_auth_token: None,
            cors_enabled: true,
            log_format: LogFormat::Pretty,
            segment: SegmentConfig::default(),
            audio: AudioConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply `PORT`, `HOST`, `API_TOKEN` and `FFMPEG_PATH` from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value {:?}", port),
            }
        }
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(token) = lookup("API_TOKEN") {
            // An empty token switches auth off
            self.require_auth_token = if token.is_empty() { None } else { Some(token) };
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            self.ffmpeg_path = PathBuf::from(path);
        }
    }

    /// Reject configurations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segment;
        if seg.min_secs == 0 {
            return Err(SplitError::Config(
                "segment.min_secs must be greater than zero".to_string(),
            ));
        }
        if seg.min_secs > seg.max_secs {
            return Err(SplitError::Config(format!(
                "segment.min_secs ({}) exceeds segment.max_secs ({})",
                seg.min_secs, seg.max_secs
            )));
        }
        if self.limits.archive_channel_capacity == 0 {
            return Err(SplitError::Config(
                "limits.archive_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            return Err(SplitError::Config(
                "audio.channels and audio.sample_rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
