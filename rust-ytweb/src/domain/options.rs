//! Download request options.

use serde::{Deserialize, Serialize};

/// Lower bound for the fragment parallelism hint.
pub const MIN_PARALLEL_FRAGMENTS: u32 = 1;

/// Upper bound for the fragment parallelism hint.
pub const MAX_PARALLEL_FRAGMENTS: u32 = 16;

/// High-level download preset chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Best video and audio, merged into a common container.
    Best,
    /// Audio-only extraction.
    Audio,
    /// Raw format selector supplied by the client.
    Custom,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Audio => "audio",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target codec for audio extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }
}

/// Subtitle container to convert downloaded subtitles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    Ass,
    Vtt,
}

impl SubtitleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Ass => "ass",
            Self::Vtt => "vtt",
        }
    }
}

/// Subtitle retrieval options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleOptions {
    /// Subtitle languages to fetch.
    #[serde(default)]
    pub langs: Vec<String>,
    /// Embed subtitles into the media container (needs the transcoder).
    #[serde(default)]
    pub embed: bool,
    /// Convert subtitles to this format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_to: Option<SubtitleFormat>,
}

impl SubtitleOptions {
    fn is_empty(&self) -> bool {
        self.langs.is_empty() && !self.embed && self.convert_to.is_none()
    }
}

/// Options bag attached to a download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOptions {
    /// Format selector passed to the external tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Audio codec for the `audio` preset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<AudioFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<SubtitleOptions>,
    /// Embed metadata and thumbnail (needs the transcoder).
    #[serde(default)]
    pub embed_metadata: bool,
    /// Output naming template, relative to the job directory.
    pub output_template: String,
    /// Fragment download parallelism hint.
    pub parallel_fragments: u32,
    /// Rate limit in KiB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: None,
            audio_format: None,
            subtitles: None,
            embed_metadata: false,
            output_template: "%(title)s.%(ext)s".to_string(),
            parallel_fragments: 8,
            speed_limit: None,
            proxy: None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl DownloadOptions {
    /// Parallelism hint clamped to the range the external tool accepts.
    pub fn clamped_parallelism(&self) -> u32 {
        self.parallel_fragments
            .clamp(MIN_PARALLEL_FRAGMENTS, MAX_PARALLEL_FRAGMENTS)
    }

    /// Normalized copy used for equality checks.
    ///
    /// Two option bags that would produce the same invocation compare equal
    /// after canonicalization, regardless of field order, blank strings or
    /// subtitle language ordering.
    pub fn canonical(&self) -> Self {
        let subtitles = self.subtitles.as_ref().and_then(|sub| {
            let mut langs: Vec<String> = sub
                .langs
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            langs.sort();
            langs.dedup();
            let sub = SubtitleOptions {
                langs,
                embed: sub.embed,
                convert_to: sub.convert_to,
            };
            (!sub.is_empty()).then_some(sub)
        });

        Self {
            format: non_empty(&self.format),
            audio_format: self.audio_format,
            subtitles,
            embed_metadata: self.embed_metadata,
            output_template: self.output_template.trim().to_string(),
            parallel_fragments: self.clamped_parallelism(),
            speed_limit: self.speed_limit.filter(|limit| *limit > 0),
            proxy: non_empty(&self.proxy),
        }
    }

    /// Compare two option bags by their canonical form.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_parallelism() {
        let mut options = DownloadOptions::default();
        options.parallel_fragments = 0;
        assert_eq!(options.clamped_parallelism(), 1);
        options.parallel_fragments = 64;
        assert_eq!(options.clamped_parallelism(), 16);
        options.parallel_fragments = 4;
        assert_eq!(options.clamped_parallelism(), 4);
    }

    #[test]
    fn test_canonical_ignores_cosmetic_differences() {
        let a = DownloadOptions {
            format: Some("  ".to_string()),
            subtitles: Some(SubtitleOptions {
                langs: vec!["fr".to_string(), "en".to_string(), "en".to_string()],
                embed: false,
                convert_to: None,
            }),
            speed_limit: Some(0),
            proxy: Some(String::new()),
            ..Default::default()
        };
        let b = DownloadOptions {
            format: None,
            subtitles: Some(SubtitleOptions {
                langs: vec![" en".to_string(), "fr".to_string()],
                embed: false,
                convert_to: None,
            }),
            speed_limit: None,
            proxy: None,
            ..Default::default()
        };
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_canonical_drops_empty_subtitles() {
        let options = DownloadOptions {
            subtitles: Some(SubtitleOptions::default()),
            ..Default::default()
        };
        assert_eq!(options.canonical().subtitles, None);
        assert!(options.is_equivalent(&DownloadOptions::default()));
    }

    #[test]
    fn test_canonical_keeps_meaningful_differences() {
        let a = DownloadOptions::default();
        let b = DownloadOptions {
            audio_format: Some(AudioFormat::Opus),
            ..Default::default()
        };
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "format": "bv*+ba/b",
            "audioFormat": "m4a",
            "subtitles": {"langs": ["en"], "embed": true, "convertTo": "srt"},
            "embedMetadata": true,
            "outputTemplate": "%(title)s.%(ext)s",
            "parallelFragments": 4,
            "speedLimit": 500,
            "proxy": "socks5://127.0.0.1:1080"
        }"#;
        let options: DownloadOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.audio_format, Some(AudioFormat::M4a));
        let subs = options.subtitles.unwrap();
        assert!(subs.embed);
        assert_eq!(subs.convert_to, Some(SubtitleFormat::Srt));
        assert_eq!(options.speed_limit, Some(500));
    }
}
