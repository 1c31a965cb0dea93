//! Complaint persistence
//!
//! [`ComplaintStore`] is the seam between the state machine and the
//! document store. Every mutation goes through [`ComplaintStore::apply`],
//! which implementations must run as one atomic per-document step.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::model::{haversine_km, Complaint, ComplaintStatus, NewComplaint};
use super::transitions::{self, Command};
use crate::cache::keys::normalize_page;
use crate::types::{GrievanceError, Page, Pagination, Result};

/// How long an identical submission is rejected
pub const DEDUP_WINDOW_MINUTES: i64 = 30;

/// Filters for list queries
#[derive(Debug, Clone, Default)]
pub struct ComplaintQuery {
    pub citizen_id: Option<String>,
    pub status: Option<ComplaintStatus>,
    pub page: u64,
    pub limit: u64,
}

impl ComplaintQuery {
    /// Page and limit after clamping
    pub fn window(&self) -> (u64, u64) {
        normalize_page(self.page, self.limit)
    }
}

/// Complaint before and after a committed command
#[derive(Debug, Clone)]
pub struct Applied {
    pub before: Complaint,
    pub after: Complaint,
}

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Atomically claim a submission fingerprint. Returns false when the
    /// same fingerprint was claimed within `window` before `now`.
    async fn claim_submission(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool>;

    /// Drop a claim whose complaint never got stored
    async fn release_submission(&self, fingerprint: &str) -> Result<()>;

    async fn insert(&self, complaint: &Complaint) -> Result<()>;

    async fn get(&self, complaint_id: &str) -> Result<Option<Complaint>>;

    /// Apply `command` as one atomic update.
    ///
    /// Rejections are the same typed errors [`transitions::apply`] returns;
    /// an unknown id is `NotFound`.
    async fn apply(&self, complaint_id: &str, command: &Command, now: DateTime<Utc>)
        -> Result<Applied>;

    /// Newest first
    async fn list(&self, query: &ComplaintQuery) -> Result<Page<Complaint>>;

    /// Open complaints within `radius_km`, nearest first
    async fn nearby(&self, lat: f64, lng: f64, radius_km: f64, limit: usize)
        -> Result<Vec<Complaint>>;

    /// Ids awaiting confirmation and not updated since `cutoff`, oldest first
    async fn stale_candidates(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<String>>;
}

/// Dedup fingerprint of a submission
pub fn submission_fingerprint(input: &NewComplaint) -> String {
    let address = input
        .location
        .address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let coords = match input.location.coordinates() {
        Some((lat, lng)) => format!("{:.5},{:.5}", lat, lng),
        None => "-".to_string(),
    };
    let description = input.description.trim().to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(input.citizen_id.as_bytes());
    hasher.update(b"|");
    hasher.update(address.as_bytes());
    hasher.update(b"|");
    hasher.update(coords.as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-process store for development and tests
#[derive(Default)]
pub struct MemoryComplaintStore {
    complaints: DashMap<String, Complaint>,
    claims: DashMap<String, DateTime<Utc>>,
}

impl MemoryComplaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.complaints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.complaints.is_empty()
    }
}

#[async_trait]
impl ComplaintStore for MemoryComplaintStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn claim_submission(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        match self.claims.entry(fingerprint.to_string()) {
            Entry::Occupied(mut held) => {
                if *held.get() > now - window {
                    return Ok(false);
                }
                held.insert(now);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(true)
            }
        }
    }

    async fn release_submission(&self, fingerprint: &str) -> Result<()> {
        self.claims.remove(fingerprint);
        Ok(())
    }

    async fn insert(&self, complaint: &Complaint) -> Result<()> {
        match self.complaints.entry(complaint.complaint_id.clone()) {
            Entry::Occupied(_) => Err(GrievanceError::Persistence(format!(
                "Complaint {} already exists",
                complaint.complaint_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(complaint.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, complaint_id: &str) -> Result<Option<Complaint>> {
        Ok(self.complaints.get(complaint_id).map(|c| c.clone()))
    }

    async fn apply(
        &self,
        complaint_id: &str,
        command: &Command,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        // get_mut holds the shard lock for the whole read-apply-write
        let mut current = self
            .complaints
            .get_mut(complaint_id)
            .ok_or_else(|| GrievanceError::NotFound(format!("Complaint {}", complaint_id)))?;

        let after = transitions::apply(&current, command, now)?;
        let before = std::mem::replace(&mut *current, after.clone());
        debug!(complaint_id = complaint_id, status = %after.status, "Complaint updated");
        Ok(Applied { before, after })
    }

    async fn list(&self, query: &ComplaintQuery) -> Result<Page<Complaint>> {
        let (page, limit) = query.window();

        let mut matching: Vec<Complaint> = self
            .complaints
            .iter()
            .filter(|c| {
                query
                    .citizen_id
                    .as_ref()
                    .map_or(true, |id| &c.citizen_id == id)
                    && query.status.map_or(true, |s| c.status == s)
            })
            .map(|c| c.clone())
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.complaint_id.cmp(&a.complaint_id))
        });

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        Ok(Page {
            data,
            pagination: Pagination::new(page, limit, total),
        })
    }

    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Complaint>> {
        let mut found: Vec<(f64, Complaint)> = self
            .complaints
            .iter()
            .filter(|c| !c.status.is_terminal())
            .filter_map(|c| {
                let at = c.location.coordinates()?;
                let d = haversine_km((lat, lng), at);
                (d <= radius_km).then(|| (d, c.clone()))
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn stale_candidates(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let mut stale: Vec<(DateTime<Utc>, String)> = self
            .complaints
            .iter()
            .filter(|c| c.status == ComplaintStatus::AwaitingConfirmation && c.updated_at < cutoff)
            .map(|c| (c.updated_at, c.complaint_id.clone()))
            .collect();
        stale.sort();
        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complaint::model::{ComplaintCategory, Location};
    use crate::complaint::transitions::created_action;
    use std::sync::Arc;

    fn complaint(id: &str, citizen: &str, status: ComplaintStatus) -> Complaint {
        let now = Utc::now();
        Complaint {
            complaint_id: id.into(),
            citizen_id: citizen.into(),
            description: "Broken streetlight".into(),
            category: ComplaintCategory::StreetLight,
            location: Location {
                lat: Some(12.9716),
                lng: Some(77.5946),
                address: "MG Road".into(),
            },
            media: vec![],
            status,
            upvoters: vec![],
            confirmations: vec![],
            refiles: vec![],
            actions: vec![created_action(citizen, now)],
            danger_score: 3.5,
            priority: 45,
            expected_resolution_date: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn submission(description: &str, address: &str) -> NewComplaint {
        NewComplaint {
            citizen_id: "user-123".into(),
            description: description.into(),
            category: None,
            location: Location {
                lat: Some(12.9716),
                lng: Some(77.5946),
                address: address.into(),
            },
            media: vec![],
        }
    }

    #[test]
    fn test_fingerprint_normalization() {
        let a = submission("Pothole near school", "5th  Street");
        let b = submission("  pothole near SCHOOL ", "5th street");
        let c = submission("Pothole near school", "6th street");
        assert_eq!(submission_fingerprint(&a), submission_fingerprint(&b));
        assert_ne!(submission_fingerprint(&a), submission_fingerprint(&c));
    }

    #[tokio::test]
    async fn test_claim_window() {
        let store = MemoryComplaintStore::new();
        let now = Utc::now();
        let window = Duration::minutes(DEDUP_WINDOW_MINUTES);

        assert!(store.claim_submission("fp", now, window).await.unwrap());
        assert!(!store
            .claim_submission("fp", now + Duration::minutes(10), window)
            .await
            .unwrap());
        assert!(store
            .claim_submission("fp", now + Duration::minutes(31), window)
            .await
            .unwrap());

        store.release_submission("fp").await.unwrap();
        assert!(store.claim_submission("fp", now, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_confirmations_not_lost() {
        let store = Arc::new(MemoryComplaintStore::new());
        store
            .insert(&complaint("COMP-1", "user-123", ComplaintStatus::AwaitingConfirmation))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let cmd = Command::Confirm {
                    citizen_id: format!("c{}", i),
                };
                store.apply("COMP-1", &cmd, Utc::now()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let c = store.get("COMP-1").await.unwrap().unwrap();
        assert_eq!(c.confirmations.len(), 3);
        assert_eq!(c.status, ComplaintStatus::Resolved);
        let auto = c
            .actions
            .iter()
            .filter(|a| a.action == crate::complaint::ActionKind::AutoResolved)
            .count();
        assert_eq!(auto, 1);
    }

    #[tokio::test]
    async fn test_apply_unknown_and_rejected_leave_store_unchanged() {
        let store = MemoryComplaintStore::new();
        let err = store
            .apply("nope", &Command::Upvote { citizen_id: "c1".into() }, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::NotFound(_)));

        store
            .insert(&complaint("COMP-2", "user-123", ComplaintStatus::Unresolved))
            .await
            .unwrap();
        let up = Command::Upvote { citizen_id: "c1".into() };
        store.apply("COMP-2", &up, Utc::now()).await.unwrap();
        let before = store.get("COMP-2").await.unwrap().unwrap();
        assert!(store.apply("COMP-2", &up, Utc::now()).await.is_err());
        assert_eq!(store.get("COMP-2").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemoryComplaintStore::new();
        for i in 0..5 {
            let mut c = complaint(&format!("COMP-{}", i), "u1", ComplaintStatus::Unresolved);
            c.created_at = Utc::now() + Duration::seconds(i);
            store.insert(&c).await.unwrap();
        }
        store
            .insert(&complaint("COMP-X", "u12", ComplaintStatus::Resolved))
            .await
            .unwrap();

        let page = store
            .list(&ComplaintQuery {
                citizen_id: Some("u1".into()),
                status: None,
                page: 2,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.pagination, Pagination::new(2, 2, 5));
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(page.data[0].complaint_id, "COMP-2");

        let resolved = store
            .list(&ComplaintQuery {
                status: Some(ComplaintStatus::Resolved),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resolved.pagination.total, 1);
        assert_eq!(resolved.pagination.limit, 10);
    }

    #[tokio::test]
    async fn test_nearby_and_stale() {
        let store = MemoryComplaintStore::new();
        let now = Utc::now();

        let mut stale = complaint("COMP-OLD", "u1", ComplaintStatus::AwaitingConfirmation);
        stale.updated_at = now - Duration::days(8);
        store.insert(&stale).await.unwrap();
        store
            .insert(&complaint("COMP-NEW", "u1", ComplaintStatus::AwaitingConfirmation))
            .await
            .unwrap();

        let ids = store
            .stale_candidates(now - Duration::days(7), 100)
            .await
            .unwrap();
        assert_eq!(ids, vec!["COMP-OLD".to_string()]);

        let near = store.nearby(12.9716, 77.5946, 1.0, 10).await.unwrap();
        assert_eq!(near.len(), 2);
        let far = store.nearby(13.5, 77.5946, 1.0, 10).await.unwrap();
        assert!(far.is_empty());
    }
}
