//! The human signoff artifact that gates starting the next run.
//!
//! A signoff is valid only for the exact `final_review.json` bytes it was
//! computed over — any edit to that file after signoff invalidates it, which
//! is the whole point: the reviewer is attesting to what they actually read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSignoff {
    pub run_id: String,
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
    pub final_review_json: String,
    pub final_review_md: String,
    pub final_review_sha256: String,
    pub notes: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignoffError {
    #[error("reviewer name must not be empty")]
    EmptyReviewer,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl RunSignoff {
    pub fn new(
        run_id: impl Into<String>,
        reviewer: impl Into<String>,
        reviewed_at: DateTime<Utc>,
        final_review_json: impl Into<String>,
        final_review_md: impl Into<String>,
        final_review_bytes: &[u8],
        notes: Option<String>,
    ) -> Result<Self, SignoffError> {
        let reviewer = reviewer.into();
        if reviewer.trim().is_empty() {
            return Err(SignoffError::EmptyReviewer);
        }
        Ok(Self {
            run_id: run_id.into(),
            reviewer,
            reviewed_at,
            final_review_json: final_review_json.into(),
            final_review_md: final_review_md.into(),
            final_review_sha256: sha256_hex(final_review_bytes),
            notes,
        })
    }

    /// Recompute the hash of `final_review_bytes` and compare against what
    /// this signoff recorded. A mismatch means the final review was edited,
    /// replaced, or the signoff was forged against a different run.
    pub fn validates(&self, final_review_json_name: &str, final_review_md_name: &str, final_review_bytes: &[u8]) -> bool {
        self.final_review_json == final_review_json_name
            && self.final_review_md == final_review_md_name
            && self.final_review_sha256 == sha256_hex(final_review_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-01-15T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn rejects_empty_reviewer() {
        let err = RunSignoff::new("r1", "  ", now(), "final_review.json", "final_review.md", b"{}", None).unwrap_err();
        assert!(matches!(err, SignoffError::EmptyReviewer));
    }

    #[test]
    fn validates_against_identical_bytes() {
        let bytes = b"{\"run_id\":\"r1\"}";
        let signoff = RunSignoff::new("r1", "alice", now(), "final_review.json", "final_review.md", bytes, None).unwrap();
        assert!(signoff.validates("final_review.json", "final_review.md", bytes));
    }

    #[test]
    fn detects_tampering_via_hash_mismatch() {
        let bytes = b"{\"run_id\":\"r1\"}";
        let signoff = RunSignoff::new("r1", "alice", now(), "final_review.json", "final_review.md", bytes, None).unwrap();
        assert!(!signoff.validates("final_review.json", "final_review.md", b"{\"run_id\":\"r1\",\"tampered\":true}"));
    }

    #[test]
    fn detects_filename_mismatch() {
        let bytes = b"{}";
        let signoff = RunSignoff::new("r1", "alice", now(), "final_review.json", "final_review.md", bytes, None).unwrap();
        assert!(!signoff.validates("other.json", "final_review.md", bytes));
    }
}
