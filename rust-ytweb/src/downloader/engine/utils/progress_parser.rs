//! Parser for the structured progress lines emitted by yt-dlp.
//!
//! The engine asks yt-dlp to print progress using a fixed template:
//!
//! ```text
//! progress:<downloaded>:<total>:<percent>:<eta>:<speed>
//! ```
//!
//! The ETA field is free-form and usually contains colons itself
//! (`00:10`, `01:02:03`), so the last two fields are separated at the last
//! colon of the remainder rather than by a plain split.

use crate::domain::ProgressSample;

/// Prefix that marks a structured progress line.
pub const PROGRESS_PREFIX: &str = "progress:";

/// Placeholders yt-dlp prints for unknown values.
const UNKNOWN_MARKERS: &[&str] = &["none", "na", "n/a", "unknown"];

/// Decode one line of tool output into a progress sample.
///
/// Returns `None` for lines that are not progress lines. Malformed fields
/// never fail the whole line: bad counters become 0 or absent, the
/// percentage is clamped to `[0, 100]`.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let body = line.trim().strip_prefix(PROGRESS_PREFIX)?;

    let mut fields = body.splitn(4, ':');
    let downloaded = fields.next().unwrap_or_default();
    let total = fields.next().unwrap_or_default();
    let percent = fields.next().unwrap_or_default();
    let rest = fields.next().unwrap_or_default();

    let (eta, speed) = match rest.rsplit_once(':') {
        Some((eta, speed)) => (text_field(eta), text_field(speed)),
        None => (text_field(rest), None),
    };

    Some(ProgressSample {
        downloaded_bytes: parse_count(downloaded).unwrap_or(0),
        total_bytes: parse_count(total).filter(|total| *total > 0),
        percent: parse_percent(percent),
        eta,
        speed,
    })
}

/// Parse a byte counter. yt-dlp may print estimates as floats.
fn parse_count(field: &str) -> Option<u64> {
    let field = field.trim();
    if let Ok(value) = field.parse::<u64>() {
        return Some(value);
    }
    field
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value.round() as u64)
}

fn parse_percent(field: &str) -> f64 {
    let value = field
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .unwrap_or(0.0);
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

fn text_field(field: &str) -> Option<String> {
    let field = field.trim();
    if field.is_empty()
        || UNKNOWN_MARKERS
            .iter()
            .any(|marker| field.eq_ignore_ascii_case(marker))
    {
        return None;
    }
    Some(field.to_string())
}
