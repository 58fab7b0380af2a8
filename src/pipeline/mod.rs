//! Segmentation and packaging pipeline
//!
//! This module turns an uploaded media file into a ZIP of audio segments:
//! - Segment duration planning (clamped, never rejected)
//! - ffmpeg invocation with bounded stderr capture and timeout
//! - Discovery of produced segments in playback order
//! - Streaming ZIP assembly into the response body
//! - Per-request workspaces with completion-driven cleanup

pub mod archive;
pub mod discovery;
pub mod orchestrator;
pub mod planner;
pub mod transcode;
pub mod workspace;

use std::path::PathBuf;

pub use orchestrator::Pipeline;

/// An upload already written to local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    pub path: PathBuf,
    /// Size in bytes as received
    pub size: u64,
}
