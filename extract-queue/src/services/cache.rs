//! Content-addressed lookup of previously submitted documents.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::{Error, Result};
use crate::database::models::Fingerprint;
use crate::database::repositories::JobRepository;

/// Fingerprint a document: lower-case hex SHA-256 plus byte length.
pub fn fingerprint(content: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(content);
    Fingerprint {
        digest: hex::encode(digest),
        length: content.len() as i64,
    }
}

/// [`fingerprint`] on the blocking pool; uploads can be hundreds of MiB.
pub async fn fingerprint_blocking(content: Bytes) -> Result<Fingerprint> {
    tokio::task::spawn_blocking(move || fingerprint(&content))
        .await
        .map_err(|e| Error::Other(format!("Fingerprint task failed: {}", e)))
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub fingerprint: Fingerprint,
    /// Most recent job with the same fingerprint, in any lifecycle state.
    pub existing_job_id: Option<String>,
}

/// Read-only view of the job store keyed by content.
#[derive(Clone)]
pub struct ContentCache {
    repository: Arc<dyn JobRepository>,
}

impl ContentCache {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Look for a prior job with the same fingerprint.
    ///
    /// In-flight and errored jobs count as hits.
    pub async fn lookup(&self, fingerprint: Fingerprint) -> Result<CacheLookup> {
        let existing_job_id = self
            .repository
            .find_by_fingerprint(&fingerprint)
            .await?
            .map(|job| job.id);

        debug!(
            fingerprint = %fingerprint,
            hit = existing_job_id.is_some(),
            "Cache lookup"
        );

        Ok(CacheLookup {
            fingerprint,
            existing_job_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            fp.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fp.length, 3);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(b"same bytes"), fingerprint(b"same bytes"));
        assert_ne!(fingerprint(b"A"), fingerprint(b"B"));
    }

    #[test]
    fn test_empty_content() {
        let fp = fingerprint(b"");
        assert_eq!(fp.length, 0);
        assert_eq!(fp.digest.len(), 64);
    }

    #[tokio::test]
    async fn test_fingerprint_blocking_matches_inline() {
        let content = Bytes::from(vec![7u8; 1 << 20]);
        let fp = fingerprint_blocking(content.clone()).await.unwrap();
        assert_eq!(fp, fingerprint(&content));
    }
}
