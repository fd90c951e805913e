//! Stage inference from auxiliary tool output.

use crate::domain::JobStage;

/// Classifies a raw output line into a stage transition.
///
/// Detection is best effort; a line that matches nothing leaves the current
/// stage unchanged.
pub trait StageDetector: Send + Sync {
    fn detect(&self, line: &str) -> Option<JobStage>;
}

/// Markers yt-dlp prints while its post-processors run.
const POSTPROCESS_MARKERS: &[&str] = &[
    "Post-process",
    "[ExtractAudio]",
    "[EmbedSubtitle]",
    "[Metadata]",
    "[EmbedThumbnail]",
    "[ThumbnailsConvertor]",
    "[SubtitlesConvertor]",
    "[FixupM3u8]",
    "[FFmpeg",
];

/// Substring heuristics over yt-dlp's human-readable log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicStageDetector;

impl StageDetector for HeuristicStageDetector {
    fn detect(&self, line: &str) -> Option<JobStage> {
        if line.contains("[Merger]") || line.contains("Merging formats") {
            return Some(JobStage::Merging);
        }
        if POSTPROCESS_MARKERS.iter().any(|marker| line.contains(marker)) {
            return Some(JobStage::Postprocessing);
        }
        None
    }
}
