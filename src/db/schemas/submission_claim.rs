//! Duplicate-submission claims
//!
//! One document per submission fingerprint. The unique `_id` makes the claim
//! atomic; a TTL index removes claims once the dedup window has passed.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::complaint::store::DEDUP_WINDOW_MINUTES;
use crate::db::mongo::IntoIndexes;

/// Collection name for submission claims
pub const SUBMISSION_CLAIM_COLLECTION: &str = "submission_claims";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubmissionClaimDoc {
    /// Submission fingerprint
    pub _id: String,
    pub claimed_at: DateTime,
}

impl IntoIndexes for SubmissionClaimDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "claimed_at": 1 },
            Some(
                IndexOptions::builder()
                    .name("claimed_at_ttl".to_string())
                    .expire_after(Duration::from_secs(DEDUP_WINDOW_MINUTES as u64 * 60))
                    .build(),
            ),
        )]
    }
}
