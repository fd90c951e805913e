//! Process configuration loaded from the environment.
//!
//! `.env` is read by `main` through `dotenvy` before [`AppConfig::from_env`]
//! runs, so both sources are covered here.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::downloader::engine::{DEFAULT_FFMPEG, DEFAULT_YT_DLP, default_cancel_grace};
use crate::domain::options::{MAX_PARALLEL_FRAGMENTS, MIN_PARALLEL_FRAGMENTS};
use crate::scheduler::SchedulerConfig;
use crate::utils::fs;
use crate::{Error, Result};

/// Secret used when `DOWNLOAD_TOKEN_SECRET` is not set.
pub const DEV_TOKEN_SECRET: &str = "dev-secret";

/// Subdirectory of the data dir holding the job snapshot.
pub const CACHE_DIR_NAME: &str = "cache";

/// Subdirectory of the data dir holding per-job output directories.
pub const DOWNLOADS_DIR_NAME: &str = "downloads";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub max_concurrency: usize,
    pub per_client_limit: usize,
    /// Fragment parallelism applied when a request leaves it unset.
    pub parallel_fragments_default: u32,
    pub download_token_secret: String,
    pub download_token_ttl: Duration,
    pub job_log_tail_lines: usize,
    /// How long a canceled yt-dlp gets to exit after an interrupt.
    pub cancel_grace: Duration,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_concurrency: 3,
            per_client_limit: 3,
            parallel_fragments_default: 8,
            download_token_secret: DEV_TOKEN_SECRET.to_string(),
            download_token_ttl: Duration::from_secs(3600),
            job_log_tail_lines: 50,
            cancel_grace: default_cancel_grace(),
            log_dir: data_dir.join("logs"),
            data_dir,
            yt_dlp_path: DEFAULT_YT_DLP.to_string(),
            ffmpeg_path: DEFAULT_FFMPEG.to_string(),
            cors_origin: None,
        }
    }
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let log_dir = get("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        let download_token_secret =
            get("DOWNLOAD_TOKEN_SECRET").unwrap_or(defaults.download_token_secret);

        let parallel_fragments_default: u32 =
            parse_or(&get, "PARALLEL_FRAGMENTS_DEFAULT", defaults.parallel_fragments_default)?;
        let parallel_range = MIN_PARALLEL_FRAGMENTS..=MAX_PARALLEL_FRAGMENTS;
        if !parallel_range.contains(&parallel_fragments_default) {
            return Err(Error::config(format!(
                "PARALLEL_FRAGMENTS_DEFAULT must be between {MIN_PARALLEL_FRAGMENTS} and {MAX_PARALLEL_FRAGMENTS}"
            )));
        }

        let cancel_grace = match get("CANCEL_GRACE_MS") {
            Some(raw) => Duration::from_millis(parse_value("CANCEL_GRACE_MS", &raw)?),
            None => defaults.cancel_grace,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            max_concurrency: positive(
                parse_or(&get, "MAX_CONCURRENCY", defaults.max_concurrency)?,
                "MAX_CONCURRENCY",
            )?,
            per_client_limit: positive(
                parse_or(&get, "PER_CLIENT_LIMIT", defaults.per_client_limit)?,
                "PER_CLIENT_LIMIT",
            )?,
            parallel_fragments_default,
            download_token_secret,
            download_token_ttl: Duration::from_secs(parse_or(
                &get,
                "DOWNLOAD_TOKEN_TTL_SECS",
                defaults.download_token_ttl.as_secs(),
            )?),
            job_log_tail_lines: positive(
                parse_or(&get, "JOB_LOG_TAIL_LINES", defaults.job_log_tail_lines)?,
                "JOB_LOG_TAIL_LINES",
            )?,
            cancel_grace,
            data_dir,
            log_dir,
            yt_dlp_path: get("YT_DLP_PATH").unwrap_or(defaults.yt_dlp_path),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            cors_origin: get("CORS_ORIGIN").filter(|origin| origin != "*"),
        })
    }

    /// Whether download links are signed with the built-in development secret.
    pub fn uses_dev_secret(&self) -> bool {
        self.download_token_secret == DEV_TOKEN_SECRET
    }

    /// Where the job snapshot lives.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join(CACHE_DIR_NAME)
    }

    /// Root of the per-job output directories.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join(DOWNLOADS_DIR_NAME)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency: self.max_concurrency,
            per_client_limit: self.per_client_limit,
            log_tail_lines: self.job_log_tail_lines,
        }
    }

    /// Create the data, cache and downloads directories.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.data_dir.clone(), self.cache_dir(), self.downloads_dir()] {
            fs::ensure_dir_all_with_op("creating data directory", &dir).await?;
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::config(format!("{key} has an invalid value: {raw:?}")))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn positive(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        return Err(Error::config(format!("{key} must be at least 1")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.port, 5000);
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(config.uses_dev_secret());
        assert_eq!(config.log_dir, PathBuf::from("./data/logs"));
        assert_eq!(config.downloads_dir(), PathBuf::from("./data/downloads"));
        assert_eq!(config.cache_dir(), PathBuf::from("./data/cache"));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("MAX_CONCURRENCY", "5"),
            ("PER_CLIENT_LIMIT", "2"),
            ("PARALLEL_FRAGMENTS_DEFAULT", "4"),
            ("DOWNLOAD_TOKEN_SECRET", "s3cret"),
            ("DOWNLOAD_TOKEN_TTL_SECS", "60"),
            ("JOB_LOG_TAIL_LINES", "10"),
            ("CANCEL_GRACE_MS", "250"),
            ("DATA_DIR", "/srv/ytweb"),
            ("YT_DLP_PATH", "/opt/yt-dlp"),
            ("CORS_ORIGIN", "http://localhost:5173"),
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.parallel_fragments_default, 4);
        assert_eq!(config.download_token_ttl, Duration::from_secs(60));
        assert_eq!(config.cancel_grace, Duration::from_millis(250));
        assert_eq!(config.log_dir, PathBuf::from("/srv/ytweb/logs"));
        assert_eq!(config.yt_dlp_path, "/opt/yt-dlp");
        assert_eq!(config.ffmpeg_path, DEFAULT_FFMPEG);
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:5173"));

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.max_concurrency, 5);
        assert_eq!(scheduler.per_client_limit, 2);
        assert_eq!(scheduler.log_tail_lines, 10);
    }

    #[test]
    fn test_wildcard_cors_means_any() {
        let config = from_pairs(&[("CORS_ORIGIN", "*")]).unwrap();
        assert_eq!(config.cors_origin, None);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        for (key, value) in [
            ("PORT", "eighty"),
            ("PORT", "70000"),
            ("MAX_CONCURRENCY", "0"),
            ("MAX_CONCURRENCY", "-1"),
            ("PARALLEL_FRAGMENTS_DEFAULT", "17"),
            ("DOWNLOAD_TOKEN_TTL_SECS", "1h"),
            ("CANCEL_GRACE_MS", "soon"),
        ] {
            let err = from_pairs(&[(key, value)]).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{key}={value}");
        }
    }

    #[tokio::test]
    async fn test_ensure_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: temp.path().join("data"),
            ..AppConfig::default()
        };
        config.ensure_dirs().await.unwrap();
        assert!(config.cache_dir().is_dir());
        assert!(config.downloads_dir().is_dir());
    }
}
