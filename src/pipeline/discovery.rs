//! Segment discovery - finds the files ffmpeg produced and puts them in
//! playback order

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use super::transcode::{SEGMENT_EXTENSION, SEGMENT_PREFIX};

/// A segment file produced by ffmpeg inside a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    /// Bare filename, also used as the archive entry name
    pub name: String,
    /// Zero-based position in playback order
    pub ordinal: u32,
    /// Full path on local storage
    pub path: PathBuf,
}

fn segment_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^{}(\d{{3,}})\.{}$",
            regex::escape(SEGMENT_PREFIX),
            regex::escape(SEGMENT_EXTENSION)
        ))
        .unwrap()
    })
}

/// Parse a segment filename into its ordinal.
///
/// Only `part_NNN.m4a` names with at least three digits qualify, and the
/// digits must fit a `u32`.
pub fn parse_segment_name(name: &str) -> Option<u32> {
    let caps = segment_name_regex().captures(name)?;
    match caps[1].parse::<u32>() {
        Ok(ordinal) => Some(ordinal),
        Err(_) => {
            warn!("Ignoring segment with unparsable ordinal: {}", name);
            None
        }
    }
}

/// List the segments in `dir`, ordered by ordinal.
///
/// Never fails: an unreadable directory or one without matching files yields
/// an empty list, and deciding what that means is left to the caller.
pub fn discover(dir: &Path) -> Vec<SegmentFile> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut segments: Vec<SegmentFile> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let ordinal = parse_segment_name(&name)?;
            Some(SegmentFile {
                name,
                ordinal,
                path: entry.path(),
            })
        })
        .collect();

    // With fixed-width names this is the same as sorting by filename
    segments.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));

    debug!("Discovered {} segment(s) in {}", segments.len(), dir.display());
    segments
}
