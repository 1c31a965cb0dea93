//! Audit log persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::RwLock;

use super::entry::{AuditLogEntry, AuditUserType, ResourceType};
use crate::types::{GrievanceError, Result};

/// Conjunctive filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub user_type: Option<AuditUserType>,
    pub action: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub department_id: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, got: &T) -> bool {
            want.as_ref().map_or(true, |w| w == got)
        }

        eq(&self.user_id, &entry.user_id)
            && eq(&self.user_type, &entry.user_type)
            && eq(&self.action, &entry.action)
            && eq(&self.resource_type, &entry.resource_type)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |id| entry.resource_id.as_ref() == Some(id))
            && self
                .department_id
                .as_ref()
                .map_or(true, |id| entry.department_id.as_ref() == Some(id))
            && eq(&self.success, &entry.success)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}

/// Result ordering by timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditSort {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl FromStr for AuditSort {
    type Err = GrievanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "desc" | "-timestamp" | "newest" => Ok(Self::NewestFirst),
            "asc" | "timestamp" | "oldest" => Ok(Self::OldestFirst),
            other => Err(GrievanceError::Validation(format!("Unknown sort '{}'", other))),
        }
    }
}

/// Totals over a filtered set of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub by_action: BTreeMap<String, u64>,
}

impl AuditStats {
    fn add(&mut self, entry: &AuditLogEntry) {
        self.total += 1;
        if entry.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        *self.by_action.entry(entry.action.clone()).or_insert(0) += 1;
    }
}

/// Append-only storage for audit entries
#[async_trait]
pub trait AuditStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;

    async fn query(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<AuditLogEntry>>;

    async fn count(&self, filter: &AuditFilter) -> Result<u64>;

    async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats>;
}

/// In-process audit store
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<AuditLogEntry>> {
        let entries = self.entries.read().await;
        let mut found: Vec<AuditLogEntry> =
            entries.iter().filter(|e| filter.matches(e)).cloned().collect();

        // Stable sort keeps insertion order among equal timestamps
        match sort {
            AuditSort::NewestFirst => found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            AuditSort::OldestFirst => found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
        }

        Ok(found
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count(&self, filter: &AuditFilter) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats> {
        let entries = self.entries.read().await;
        let mut stats = AuditStats::default();
        for entry in entries.iter().filter(|e| filter.matches(e)) {
            stats.add(entry);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use chrono::Duration;

    fn entry(action: AuditAction, user: &str, offset_secs: i64) -> AuditLogEntry {
        AuditLogEntry::new(action, user, AuditUserType::Citizen)
            .with_timestamp(Utc::now() + Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_filter_sort_and_page() {
        let store = MemoryAuditStore::new();
        for i in 0..5 {
            store
                .append(&entry(AuditAction::ComplaintUpvote, "c1", i))
                .await
                .unwrap();
        }
        store
            .append(&entry(AuditAction::ComplaintCreate, "c2", 10).failed("duplicate"))
            .await
            .unwrap();

        let filter = AuditFilter {
            user_id: Some("c1".into()),
            ..Default::default()
        };
        assert_eq!(store.count(&filter).await.unwrap(), 5);

        let newest = store
            .query(&filter, AuditSort::NewestFirst, 0, 2)
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert!(newest[0].timestamp > newest[1].timestamp);

        let oldest = store
            .query(&filter, AuditSort::OldestFirst, 4, 10)
            .await
            .unwrap();
        assert_eq!(oldest.len(), 1);

        let failed = AuditFilter {
            success: Some(false),
            ..Default::default()
        };
        assert_eq!(store.count(&failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryAuditStore::new();
        store
            .append(&entry(AuditAction::ComplaintUpvote, "c1", 0))
            .await
            .unwrap();
        store
            .append(&entry(AuditAction::ComplaintUpvote, "c2", 0).failed("resolved"))
            .await
            .unwrap();
        store
            .append(&entry(AuditAction::ComplaintCreate, "c1", 0))
            .await
            .unwrap();

        let stats = store.stats(&AuditFilter::default()).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_action.get("COMPLAINT_UPVOTE"), Some(&2));
    }

    #[test]
    fn test_time_range_filter() {
        let now = Utc::now();
        let e = AuditLogEntry::system(AuditAction::AutoResolutionRun).with_timestamp(now);
        let inside = AuditFilter {
            from: Some(now - Duration::hours(1)),
            to: Some(now),
            ..Default::default()
        };
        let before = AuditFilter {
            to: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(inside.matches(&e));
        assert!(!before.matches(&e));
    }
}
