//! ffmpeg invocation
//!
//! Builds the segmenting command line, runs ffmpeg as a child process (never
//! through a shell) and reports a single outcome. Everything ffmpeg writes to
//! stderr is captured into a bounded buffer for error reports.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{Result, SplitError};

/// Filename prefix of every segment ffmpeg writes
pub const SEGMENT_PREFIX: &str = "part_";

/// Extension of every segment ffmpeg writes
pub const SEGMENT_EXTENSION: &str = "m4a";

/// printf-style output pattern handed to ffmpeg's segment muxer. The fixed
/// three-digit zero padding makes lexicographic order equal ordinal order.
pub fn segment_pattern() -> String {
    format!("{}%03d.{}", SEGMENT_PREFIX, SEGMENT_EXTENSION)
}

/// Outcome of one ffmpeg run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Success,
    Failure {
        /// `None` when the process was killed by a signal
        exit_code: Option<i32>,
        diagnostic: String,
    },
}

impl TranscodeOutcome {
    /// Convert a failure into the pipeline error
    pub fn into_result(self) -> Result<()> {
        match self {
            TranscodeOutcome::Success => Ok(()),
            TranscodeOutcome::Failure {
                exit_code,
                diagnostic,
            } => Err(SplitError::TranscodeFailed {
                exit_code,
                diagnostic,
            }),
        }
    }
}

/// Runs ffmpeg to cut an input into fixed-duration audio segments
#[derive(Debug, Clone)]
pub struct SegmentTranscoder {
    program: PathBuf,
    audio: AudioConfig,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl SegmentTranscoder {
    pub fn new(program: impl Into<PathBuf>, audio: AudioConfig) -> Self {
        Self {
            program: program.into(),
            audio,
            timeout: None,
            diagnostic_limit: 64 * 1024,
        }
    }

    /// Kill ffmpeg if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap the number of stderr bytes kept for diagnostics.
    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    /// Build the ffmpeg argument vector.
    pub fn build_args(&self, input: &Path, output_dir: &Path, segment_seconds: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_os_string());

        let output = [
            // Drop video, downmix and resample for speech
            "-vn".to_string(),
            "-ac".to_string(),
            self.audio.channels.to_string(),
            "-ar".to_string(),
            self.audio.sample_rate.to_string(),
            "-c:a".to_string(),
            self.audio.codec.clone(),
            "-b:a".to_string(),
            self.audio.bitrate.clone(),
            // Native time-based segmentation, timestamps restart in every part
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            segment_seconds.to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
        ];
        args.extend(output.into_iter().map(OsString::from));

        args.push(output_dir.join(segment_pattern()).into_os_string());
        args
    }

    /// Run ffmpeg to completion.
    ///
    /// A binary that cannot be spawned is reported as `ProcessStartup`, a run
    /// exceeding the timeout as `TranscodeTimeout`. Any exit status other than
    /// zero is a `TranscodeOutcome::Failure`, not an error.
    pub async fn invoke(
        &self,
        input: &Path,
        output_dir: &Path,
        segment_seconds: u32,
    ) -> Result<TranscodeOutcome> {
        let args = self.build_args(input, output_dir, segment_seconds);
        debug!(
            "Running {} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SplitError::ProcessStartup {
                program: self.program.clone(),
                source,
            })?;

        let stderr = child.stderr.take();
        let limit = self.diagnostic_limit;
        let capture = tokio::spawn(async move {
            match stderr {
                Some(stderr) => capture_diagnostics(stderr, limit).await,
                None => String::new(),
            }
        });

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "ffmpeg timed out after {} seconds, killing process",
                        timeout.as_secs()
                    );
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill ffmpeg: {}", e);
                    }
                    capture.abort();
                    return Err(SplitError::TranscodeTimeout {
                        seconds: timeout.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let diagnostic = capture.await.unwrap_or_default();

        if status.success() {
            debug!("ffmpeg finished successfully");
            Ok(TranscodeOutcome::Success)
        } else {
            warn!("ffmpeg exited with {}", status);
            Ok(TranscodeOutcome::Failure {
                exit_code: status.code(),
                diagnostic,
            })
        }
    }

    /// Log the ffmpeg version line; returns `None` if ffmpeg is unusable.
    pub async fn probe(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                let line = text.lines().next().unwrap_or_default().to_string();
                info!("Using {}", line);
                Some(line)
            }
            Ok(out) => {
                warn!(
                    "{} -version exited with {}",
                    self.program.display(),
                    out.status
                );
                None
            }
            Err(e) => {
                warn!("ffmpeg not available at {}: {}", self.program.display(), e);
                None
            }
        }
    }
}

/// Drain `reader` to EOF, keeping at most the last `limit` bytes.
async fn capture_diagnostics<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut buffer = DiagnosticBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                debug!("Stopped reading ffmpeg stderr: {}", e);
                break;
            }
        }
    }
    buffer.into_text()
}

/// Tail buffer for process diagnostics.
///
/// ffmpeg prints the decisive error last, so once the limit is reached the
/// oldest bytes are dropped.
#[derive(Debug)]
pub struct DiagnosticBuffer {
    bytes: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl DiagnosticBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }

    /// Number of bytes discarded so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_text(self) -> String {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            format!("[{} earlier bytes truncated]\n{}", self.dropped, text)
        } else {
            text
        }
    }
}
