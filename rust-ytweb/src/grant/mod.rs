//! Signed download grants.
//!
//! A grant binds a job id and the file path it may serve to an expiry time.
//! Tokens are stateless: `<expiry_ms>.<signature>` where the signature is
//! an HMAC-SHA256 over `job_id|path|expiry_ms`, base64url without padding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default grant lifetime.
pub const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(3600);

/// Grant verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrantError {
    #[error("Malformed download token")]
    Malformed,
    #[error("Download token expired")]
    Expired,
    #[error("Invalid download token signature")]
    InvalidSignature,
}

/// A minted capability to download one job's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGrant {
    pub job_id: String,
    pub path: PathBuf,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadGrant {
    /// Relative URL that redeems this grant.
    pub fn url(&self) -> String {
        format!("/dl/{}?token={}", self.job_id, self.token)
    }
}

/// Mints and verifies download tokens.
#[derive(Clone)]
pub struct GrantService {
    mac: HmacSha256,
    ttl: Duration,
}

impl GrantService {
    pub fn new(secret: &str, ttl: Duration) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::config(format!("invalid download token secret: {e}")))?;
        Ok(Self { mac, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn payload(job_id: &str, path: &Path, expiry_ms: i64) -> String {
        format!("{}|{}|{}", job_id, path.to_string_lossy(), expiry_ms)
    }

    fn sign(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    /// Mint a token valid for the configured TTL.
    pub fn mint(&self, job_id: &str, path: &Path) -> DownloadGrant {
        self.mint_at(job_id, path, Utc::now())
    }

    /// Mint a token as if the current time were `now`.
    pub fn mint_at(&self, job_id: &str, path: &Path, now: DateTime<Utc>) -> DownloadGrant {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let expiry_ms = now.timestamp_millis().saturating_add(ttl_ms);
        let signature = self
            .sign(&Self::payload(job_id, path, expiry_ms))
            .finalize()
            .into_bytes();

        DownloadGrant {
            job_id: job_id.to_string(),
            path: path.to_path_buf(),
            token: format!("{}.{}", expiry_ms, URL_SAFE_NO_PAD.encode(signature)),
            expires_at: Utc
                .timestamp_millis_opt(expiry_ms)
                .single()
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Check a token against the job and path it claims to grant.
    pub fn verify(
        &self,
        token: &str,
        job_id: &str,
        path: &Path,
    ) -> std::result::Result<(), GrantError> {
        let (expiry, signature) = token.split_once('.').ok_or(GrantError::Malformed)?;
        let expiry_ms: i64 = expiry.parse().map_err(|_| GrantError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| GrantError::Malformed)?;

        self.sign(&Self::payload(job_id, path, expiry_ms))
            .verify_slice(&signature)
            .map_err(|_| GrantError::InvalidSignature)?;

        if Utc::now().timestamp_millis() > expiry_ms {
            return Err(GrantError::Expired);
        }
        Ok(())
    }
}

impl std::fmt::Debug for GrantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> GrantService {
        GrantService::new("test-secret", DEFAULT_GRANT_TTL).unwrap()
    }

    fn path() -> PathBuf {
        PathBuf::from("/data/downloads/job-1/video.mp4")
    }

    #[test]
    fn test_mint_and_verify() {
        let service = service();
        let grant = service.mint("job-1", &path());
        assert!(service.verify(&grant.token, "job-1", &path()).is_ok());
        assert_eq!(grant.url(), format!("/dl/job-1?token={}", grant.token));
    }

    #[test]
    fn test_token_is_bound_to_job_and_path() {
        let service = service();
        let grant = service.mint("job-1", &path());
        assert_eq!(
            service.verify(&grant.token, "job-2", &path()),
            Err(GrantError::InvalidSignature)
        );
        assert_eq!(
            service.verify(&grant.token, "job-1", Path::new("/etc/passwd")),
            Err(GrantError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_token() {
        let service = service();
        let issued = Utc::now() - chrono::Duration::hours(2);
        let grant = service.mint_at("job-1", &path(), issued);
        assert_eq!(
            service.verify(&grant.token, "job-1", &path()),
            Err(GrantError::Expired)
        );
    }

    #[test]
    fn test_tampered_expiry_is_rejected() {
        let service = service();
        let grant = service.mint("job-1", &path());
        let (_, signature) = grant.token.split_once('.').unwrap();
        let forged = format!("{}.{}", i64::MAX, signature);
        assert_eq!(
            service.verify(&forged, "job-1", &path()),
            Err(GrantError::InvalidSignature)
        );
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let grant = service().mint("job-1", &path());
        let other = GrantService::new("other-secret", DEFAULT_GRANT_TTL).unwrap();
        assert_eq!(
            other.verify(&grant.token, "job-1", &path()),
            Err(GrantError::InvalidSignature)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let service = service();
        for token in ["", "abc", "notanumber.sig", "123.!!!"] {
            assert_eq!(
                service.verify(token, "job-1", &path()),
                Err(GrantError::Malformed),
                "token {token:?}"
            );
        }
    }
}
