//! Segment planner - turns the untrusted `segmentSeconds` parameter into a
//! duration the pipeline can safely hand to ffmpeg

use crate::config::SegmentConfig;

/// Validated per-request segmentation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRequestParams {
    /// Segment length in seconds, always within the configured range
    pub segment_seconds: u32,
}

impl SegmentRequestParams {
    /// Build params from the raw query value
    pub fn from_raw(raw: Option<&str>, config: &SegmentConfig) -> Self {
        Self {
            segment_seconds: plan(raw, config),
        }
    }
}

/// Compute the segment duration for a request.
///
/// Absent or non-numeric input falls back to `config.default_secs`. The
/// result is clamped into `[config.min_secs, config.max_secs]`; out-of-range
/// values are never rejected.
pub fn plan(raw: Option<&str>, config: &SegmentConfig) -> u32 {
    let min = i64::from(config.min_secs);
    let max = i64::from(config.max_secs.max(config.min_secs));

    let requested = raw
        .map(str::trim)
        .and_then(parse_leading_integer)
        .unwrap_or_else(|| i64::from(config.default_secs));

    // Bounds fit in u32 because they come from u32
    requested.clamp(min, max) as u32
}

/// Parse the leading decimal integer of `s`, ignoring any trailing text
/// ("120s" → 120). Values too large for i64 saturate.
fn parse_leading_integer(s: &str) -> Option<i64> {
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value = digits[..end]
        .bytes()
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add(i64::from(b - b'0')));

    Some(if negative { -value } else { value })
}
