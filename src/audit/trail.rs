//! Best-effort audit trail
//!
//! `log` hands the entry to a bounded queue drained by one writer task, so the
//! request path never waits on the audit store and never sees its errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::entry::{AuditLogEntry, ResourceType};
use super::export::{self, Export, ExportFormat};
use super::store::{AuditFilter, AuditSort, AuditStats, AuditStore};
use crate::cache::keys::normalize_page;
use crate::types::{Page, Pagination, Result};

/// Largest export in one call
pub const MAX_EXPORT_ENTRIES: u64 = 10_000;

pub const DEFAULT_USER_ACTIVITY_LIMIT: u64 = 50;
pub const DEFAULT_DEPARTMENT_ACTIVITY_LIMIT: u64 = 100;

enum Message {
    Entry(Box<AuditLogEntry>),
    Flush(oneshot::Sender<()>),
}

/// Audit trail statistics
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailStats {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Audit log front end shared by all handlers
pub struct AuditTrail {
    tx: mpsc::Sender<Message>,
    store: Arc<dyn AuditStore>,
    counters: Arc<Counters>,
}

impl AuditTrail {
    /// Create the trail and spawn its writer task
    pub fn spawn(store: Arc<dyn AuditStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        tokio::spawn(write_loop(rx, store.clone(), counters.clone()));
        Self {
            tx,
            store,
            counters,
        }
    }

    /// Enqueue an entry. Never blocks; a full or closed queue drops the entry.
    pub fn log(&self, entry: AuditLogEntry) {
        match self.tx.try_send(Message::Entry(Box::new(entry))) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(Message::Entry(entry))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(action = %entry.action, "Audit queue full, dropping entry");
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit writer stopped, dropping entry");
            }
        }
    }

    /// Wait until every entry enqueued before this call has been written
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> TrailStats {
        TrailStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Interactive query; limit is capped at 100
    pub async fn query(
        &self,
        filter: &AuditFilter,
        page: u64,
        limit: u64,
        sort: AuditSort,
    ) -> Result<Page<AuditLogEntry>> {
        let (page, limit) = normalize_page(page, limit);
        let total = self.store.count(filter).await?;
        let pagination = Pagination::new(page, limit, total);
        let data = self
            .store
            .query(filter, sort, pagination.offset(), limit)
            .await?;
        Ok(Page { data, pagination })
    }

    /// Export up to [`MAX_EXPORT_ENTRIES`] matching entries, newest first
    pub async fn export(&self, filter: &AuditFilter, format: ExportFormat) -> Result<Export> {
        let entries = self
            .store
            .query(filter, AuditSort::NewestFirst, 0, MAX_EXPORT_ENTRIES)
            .await?;
        export::render(&entries, format)
    }

    /// Audit entries about one complaint, oldest first
    pub async fn complaint_history(&self, complaint_id: &str) -> Result<Vec<AuditLogEntry>> {
        let filter = AuditFilter {
            resource_type: Some(ResourceType::Complaint),
            resource_id: Some(complaint_id.to_string()),
            ..Default::default()
        };
        self.store
            .query(&filter, AuditSort::OldestFirst, 0, MAX_EXPORT_ENTRIES)
            .await
    }

    pub async fn user_activity(&self, user_id: &str, limit: Option<u64>) -> Result<Vec<AuditLogEntry>> {
        let filter = AuditFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        };
        let limit = limit.unwrap_or(DEFAULT_USER_ACTIVITY_LIMIT).min(MAX_EXPORT_ENTRIES);
        self.store.query(&filter, AuditSort::NewestFirst, 0, limit).await
    }

    pub async fn department_activity(
        &self,
        department_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<AuditLogEntry>> {
        let filter = AuditFilter {
            department_id: Some(department_id.to_string()),
            ..Default::default()
        };
        let limit = limit
            .unwrap_or(DEFAULT_DEPARTMENT_ACTIVITY_LIMIT)
            .min(MAX_EXPORT_ENTRIES);
        self.store.query(&filter, AuditSort::NewestFirst, 0, limit).await
    }

    pub async fn stats_for(&self, filter: &AuditFilter) -> Result<AuditStats> {
        self.store.stats(filter).await
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Message>,
    store: Arc<dyn AuditStore>,
    counters: Arc<Counters>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Entry(entry) => match store.append(&entry).await {
                Ok(()) => {
                    counters.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(action = %entry.action, error = %e, "Failed to write audit entry");
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Audit writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditUserType, MemoryAuditStore};
    use crate::types::GrievanceError;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl AuditStore for BrokenStore {
        fn backend(&self) -> &'static str {
            "broken"
        }
        async fn append(&self, _entry: &AuditLogEntry) -> Result<()> {
            Err(GrievanceError::Persistence("disk full".into()))
        }
        async fn query(
            &self,
            _filter: &AuditFilter,
            _sort: AuditSort,
            _skip: u64,
            _limit: u64,
        ) -> Result<Vec<AuditLogEntry>> {
            Ok(vec![])
        }
        async fn count(&self, _filter: &AuditFilter) -> Result<u64> {
            Ok(0)
        }
        async fn stats(&self, _filter: &AuditFilter) -> Result<AuditStats> {
            Ok(AuditStats::default())
        }
    }

    fn upvote(user: &str, complaint: &str) -> AuditLogEntry {
        AuditLogEntry::new(AuditAction::ComplaintUpvote, user, AuditUserType::Citizen)
            .with_resource(ResourceType::Complaint, complaint)
    }

    #[tokio::test]
    async fn test_log_then_flush_is_visible() {
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 16);
        for i in 0..5 {
            trail.log(upvote(&format!("c{}", i), "COMP-1"));
        }
        trail.flush().await;

        let page = trail
            .query(&AuditFilter::default(), 1, 2, AuditSort::NewestFirst)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(page.data.len(), 2);

        assert_eq!(trail.complaint_history("COMP-1").await.unwrap().len(), 5);
        assert_eq!(trail.stats().written, 5);
    }

    #[tokio::test]
    async fn test_query_limit_capped() {
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 256);
        for _ in 0..120 {
            trail.log(upvote("c1", "COMP-1"));
        }
        trail.flush().await;
        let page = trail
            .query(&AuditFilter::default(), 1, 500, AuditSort::NewestFirst)
            .await
            .unwrap();
        assert_eq!(page.pagination.limit, 100);
        assert_eq!(page.data.len(), 100);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let trail = AuditTrail::spawn(Arc::new(BrokenStore), 4);
        trail.log(upvote("c1", "COMP-1"));
        trail.flush().await;
        assert_eq!(trail.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // Current-thread runtime: the writer cannot run until we yield
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 2);
        for _ in 0..5 {
            trail.log(upvote("c1", "COMP-1"));
        }
        let stats = trail.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test]
    async fn test_export_csv() {
        let trail = AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 16);
        trail.log(upvote("c1", "COMP-1"));
        trail.flush().await;
        let export = trail
            .export(&AuditFilter::default(), ExportFormat::Csv)
            .await
            .unwrap();
        assert_eq!(export.count, 1);
        let text = String::from_utf8(export.body).unwrap();
        assert!(text.starts_with(export::CSV_HEADER));
    }
}
