//! Configuration file support
//!
//! Loads server configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{AudioConfig, LimitsConfig, LogFormat, SegmentConfig, ServerConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Authentication settings
    pub auth: Option<AuthSettings>,
    /// Segment settings
    pub segment: Option<SegmentSettings>,
    /// Audio settings
    pub audio: Option<AudioSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
    /// ffmpeg binary
    pub ffmpeg_path: Option<PathBuf>,
    /// Root for uploads and workspaces (defaults to the system temp dir)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Bearer token; absent or empty disables auth
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSettings {
    pub default_secs: Option<u32>,
    pub min_secs: Option<u32>,
    pub max_secs: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub codec: Option<String>,
    pub bitrate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Output format (json, pretty)
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum upload size in MB
    pub max_upload_mb: Option<usize>,
    pub transcode_timeout_secs: Option<u64>,
    pub stream_timeout_secs: Option<u64>,
    pub diagnostic_limit_bytes: Option<usize>,
    pub archive_channel_capacity: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let segment = SegmentConfig::default();
        let audio = AudioConfig::default();
        let limits = LimitsConfig::default();
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
                cors_enabled: Some(true),
                ffmpeg_path: Some(PathBuf::from("ffmpeg")),
                temp_dir: None,
            },
            auth: Some(AuthSettings { token: None }),
            segment: Some(SegmentSettings {
                default_secs: Some(segment.default_secs),
                min_secs: Some(segment.min_secs),
                max_secs: Some(segment.max_secs),
            }),
            audio: Some(AudioSettings {
                channels: Some(audio.channels),
                sample_rate: Some(audio.sample_rate),
                codec: Some(audio.codec),
                bitrate: Some(audio.bitrate),
            }),
            logging: Some(LoggingSettings {
                format: Some(LogFormat::Pretty),
            }),
            limits: Some(LimitsSettings {
                max_upload_mb: Some(limits.max_upload_mb),
                transcode_timeout_secs: Some(limits.transcode_timeout_secs),
                stream_timeout_secs: Some(limits.stream_timeout_secs),
                diagnostic_limit_bytes: Some(limits.diagnostic_limit_bytes),
                archive_channel_capacity: Some(limits.archive_channel_capacity),
            }),
        }
    }

    /// Convert to ServerConfig, filling unset values from the defaults
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();

        let segment = match self.segment {
            Some(s) => SegmentConfig {
                default_secs: s.default_secs.unwrap_or(defaults.segment.default_secs),
                min_secs: s.min_secs.unwrap_or(defaults.segment.min_secs),
                max_secs: s.max_secs.unwrap_or(defaults.segment.max_secs),
            },
            None => defaults.segment,
        };

        let audio = match self.audio {
            Some(a) => AudioConfig {
                channels: a.channels.unwrap_or(defaults.audio.channels),
                sample_rate: a.sample_rate.unwrap_or(defaults.audio.sample_rate),
                codec: a.codec.unwrap_or(defaults.audio.codec),
                bitrate: a.bitrate.unwrap_or(defaults.audio.bitrate),
            },
            None => defaults.audio,
        };

        let limits = match self.limits {
            Some(l) => LimitsConfig {
                max_upload_mb: l.max_upload_mb.unwrap_or(defaults.limits.max_upload_mb),
                transcode_timeout_secs: l
                    .transcode_timeout_secs
                    .unwrap_or(defaults.limits.transcode_timeout_secs),
                stream_timeout_secs: l
                    .stream_timeout_secs
                    .unwrap_or(defaults.limits.stream_timeout_secs),
                diagnostic_limit_bytes: l
                    .diagnostic_limit_bytes
                    .unwrap_or(defaults.limits.diagnostic_limit_bytes),
                archive_channel_capacity: l
                    .archive_channel_capacity
                    .unwrap_or(defaults.limits.archive_channel_capacity),
            },
            None => defaults.limits,
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            ffmpeg_path: self.server.ffmpeg_path.unwrap_or(defaults.ffmpeg_path),
            temp_dir: self.server.temp_dir.unwrap_or(defaults.temp_dir),
            require_auth_token: self
                .auth
                .and_then(|a| a.token)
                .filter(|t| !t.is_empty()),
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_format: self
                .logging
                .and_then(|l| l.format)
                .unwrap_or_default(),
            segment,
            audio,
            limits,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

/// Resolve the effective configuration: defaults, then the TOML file, then env.
///
/// A missing file is not an error; a file that cannot be parsed is.
pub fn load_server_config<P: AsRef<Path>>(
    path: P,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        ConfigFile::from_file(path)?.into_server_config()
    } else {
        ServerConfig::default()
    };
    config.apply_env();
    Ok(config)
}
