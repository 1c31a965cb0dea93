//! Complaint state machine
//!
//! Each operation runs one atomic store update, then applies the resulting
//! effects in a fixed order: cache invalidation, audit, notification. Only
//! the store update can fail the caller.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::model::{
    generate_complaint_id, validate_media, Complaint, ComplaintStatus, Media, NewComplaint,
};
use super::store::{submission_fingerprint, ComplaintQuery, ComplaintStore, DEDUP_WINDOW_MINUTES};
use super::transitions::{self, Command, Effect, StatusUpdate};
use super::ActorType;
use crate::audit::{AuditAction, AuditLogEntry, AuditTrail, RequestContext, ResourceType};
use crate::cache::keys::normalize_page;
use crate::cache::{CacheKey, CacheLayer, CacheStatus};
use crate::notify::{NotificationDispatcher, HIGH_DANGER_THRESHOLD};
use crate::scoring::{DangerScorer, KeywordScorer, ScoringInput};
use crate::types::{GrievanceError, Page, Result};

/// Days a complaint may sit in awaiting_confirmation before the sweep resolves it
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 7;

/// Candidates fetched per sweep round
pub const SWEEP_BATCH: usize = 500;

/// Upper bound on `GET /complaints/mine`
pub const MINE_LIMIT: u64 = 100;

pub const NEARBY_LIMIT: usize = 50;
pub const MAX_NEARBY_RADIUS_KM: f64 = 50.0;

/// Why a scheduled sweep did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepSkip {
    Disabled,
    /// Another sweep in this process is still running
    InFlight,
    /// Another instance holds the sweep lease
    LeaseHeld,
}

/// Outcome of one stale sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Complaint ids resolved by this run
    pub resolved: Vec<String>,
    /// Candidates another actor changed first
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_run: Option<SweepSkip>,
}

impl SweepReport {
    pub fn not_run(reason: SweepSkip) -> Self {
        Self {
            not_run: Some(reason),
            ..Default::default()
        }
    }
}

/// Action and audit history of one complaint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintHistory {
    pub complaint_id: String,
    pub status: ComplaintStatus,
    pub actions: Vec<super::model::ActionEntry>,
    pub refiles: Vec<super::model::Refile>,
    pub audit: Vec<AuditLogEntry>,
}

/// Business operations on complaints
pub struct ComplaintStateMachine {
    store: Arc<dyn ComplaintStore>,
    cache: Arc<CacheLayer>,
    audit: Arc<AuditTrail>,
    notifier: Arc<dyn NotificationDispatcher>,
    scorer: Arc<dyn DangerScorer>,
    stale_after: Duration,
    dedup_window: Duration,
}

impl ComplaintStateMachine {
    pub fn new(
        store: Arc<dyn ComplaintStore>,
        cache: Arc<CacheLayer>,
        audit: Arc<AuditTrail>,
        notifier: Arc<dyn NotificationDispatcher>,
        scorer: Arc<dyn DangerScorer>,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            notifier,
            scorer,
            stale_after: Duration::days(DEFAULT_STALE_AFTER_DAYS),
            dedup_window: Duration::minutes(DEDUP_WINDOW_MINUTES),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn store(&self) -> &Arc<dyn ComplaintStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    // ---- mutations ----

    /// File a new complaint.
    ///
    /// An identical submission (citizen, location, description) within the
    /// dedup window is rejected with `Duplicate`.
    pub async fn create(&self, input: NewComplaint, ctx: &RequestContext) -> Result<Complaint> {
        if let Err(e) = input.validate() {
            self.audit_failure(
                AuditAction::ComplaintCreate,
                ActorType::Citizen,
                &input.citizen_id,
                None,
                &e,
                ctx,
            );
            return Err(e);
        }

        let now = now_millis();
        let fingerprint = submission_fingerprint(&input);
        if !self
            .store
            .claim_submission(&fingerprint, now, self.dedup_window)
            .await?
        {
            let e = GrievanceError::Duplicate(format!(
                "An identical complaint was filed in the last {} minutes",
                DEDUP_WINDOW_MINUTES
            ));
            self.audit_failure(
                AuditAction::ComplaintCreate,
                ActorType::Citizen,
                &input.citizen_id,
                None,
                &e,
                ctx,
            );
            return Err(e);
        }

        let category = input.category.unwrap_or_default();
        let scoring = ScoringInput {
            description: input.description.trim().to_string(),
            category,
            media_type: ScoringInput::strongest_media(&input.media),
            lat: input.location.lat,
            lng: input.location.lng,
        };
        let score = match self.scorer.score(&scoring).await {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "Danger scorer failed, using keyword score");
                KeywordScorer::evaluate(&scoring)
            }
        };

        let complaint = Complaint {
            complaint_id: generate_complaint_id(now),
            citizen_id: input.citizen_id.clone(),
            description: input.description.trim().to_string(),
            category,
            location: input.location,
            media: input.media,
            status: ComplaintStatus::Unresolved,
            upvoters: Vec::new(),
            confirmations: Vec::new(),
            refiles: Vec::new(),
            actions: vec![transitions::created_action(&input.citizen_id, now)],
            danger_score: score.danger_score,
            priority: score.priority(),
            expected_resolution_date: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert(&complaint).await {
            if let Err(release) = self.store.release_submission(&fingerprint).await {
                warn!(error = %release, "Failed to release submission claim");
            }
            self.audit_failure(
                AuditAction::ComplaintCreate,
                ActorType::Citizen,
                &complaint.citizen_id,
                None,
                &e,
                ctx,
            );
            return Err(e);
        }

        info!(
            complaint_id = %complaint.complaint_id,
            danger_score = complaint.danger_score,
            priority = complaint.priority,
            "Complaint created"
        );
        self.run_effects(
            transitions::creation_effects(&complaint, HIGH_DANGER_THRESHOLD),
            ctx,
        )
        .await;
        Ok(complaint)
    }

    /// Staff status change with optional comment, media and ETA
    pub async fn update_status(
        &self,
        complaint_id: &str,
        update: StatusUpdate,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        validate_media(&update.media)?;
        self.execute(complaint_id, Command::UpdateStatus(update), ctx).await
    }

    pub async fn add_upvote(
        &self,
        complaint_id: &str,
        citizen_id: &str,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        let command = Command::Upvote {
            citizen_id: citizen_id.to_string(),
        };
        self.execute(complaint_id, command, ctx).await
    }

    /// Record a confirmation; the third distinct one resolves the complaint
    pub async fn add_confirmation(
        &self,
        complaint_id: &str,
        citizen_id: &str,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        let command = Command::Confirm {
            citizen_id: citizen_id.to_string(),
        };
        self.execute(complaint_id, command, ctx).await
    }

    pub async fn refile(
        &self,
        complaint_id: &str,
        citizen_id: &str,
        description: Option<String>,
        media: Vec<Media>,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        validate_media(&media)?;
        let command = Command::Refile {
            citizen_id: citizen_id.to_string(),
            description,
            media,
        };
        self.execute(complaint_id, command, ctx).await
    }

    pub async fn escalate(
        &self,
        complaint_id: &str,
        citizen_id: &str,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        let command = Command::Escalate {
            citizen_id: citizen_id.to_string(),
            reason,
        };
        self.execute(complaint_id, command, ctx).await
    }

    /// Resolve every complaint left in awaiting_confirmation for longer than
    /// the stale period.
    ///
    /// Each candidate is resolved by its own conditional update, so running
    /// this concurrently or twice in a row resolves each complaint once.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let now = truncate_millis(now);
        let cutoff = now - self.stale_after;
        let ctx = RequestContext::default();
        let mut report = SweepReport::default();

        // Resolved complaints leave the candidate set, so each round reads
        // the next batch. A round that resolves nothing ends the sweep.
        loop {
            let candidates = self.store.stale_candidates(cutoff, SWEEP_BATCH).await?;
            let fetched = candidates.len();
            let resolved_before = report.resolved.len();

            for id in candidates {
                let command = Command::ResolveStale { cutoff };
                match self.store.apply(&id, &command, now).await {
                    Ok(applied) => {
                        let effects =
                            transitions::effects(&command, &applied.before, &applied.after);
                        self.run_effects(effects, &ctx).await;
                        report.resolved.push(id);
                    }
                    Err(GrievanceError::InvalidTransition(_)) | Err(GrievanceError::NotFound(_)) => {
                        debug!(complaint_id = %id, "Stale candidate changed before sweep");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(complaint_id = %id, error = %e, "Failed to auto-resolve complaint");
                        report.skipped += 1;
                    }
                }
            }

            if fetched < SWEEP_BATCH || report.resolved.len() == resolved_before {
                break;
            }
        }

        self.audit.log(
            AuditLogEntry::system(AuditAction::AutoResolutionRun).with_details(json!({
                "resolved": report.resolved.len(),
                "skipped": report.skipped,
                "cutoff": cutoff,
            })),
        );
        if !report.resolved.is_empty() {
            info!(resolved = report.resolved.len(), skipped = report.skipped, "Stale complaints auto-resolved");
        }
        Ok(report)
    }

    // ---- reads ----

    pub async fn get(&self, complaint_id: &str) -> Result<(Complaint, CacheStatus)> {
        let store = &self.store;
        self.cache
            .read_through(&CacheKey::complaint(complaint_id), None, || async move {
                store
                    .get(complaint_id)
                    .await?
                    .ok_or_else(|| GrievanceError::NotFound(format!("Complaint {}", complaint_id)))
            })
            .await
    }

    /// A citizen's own complaints, newest first
    pub async fn list_mine(
        &self,
        citizen_id: &str,
        status: Option<ComplaintStatus>,
    ) -> Result<(Vec<Complaint>, CacheStatus)> {
        let key = CacheKey::citizen_list(citizen_id, status.as_ref().map(|s| s.as_str()));
        let query = ComplaintQuery {
            citizen_id: Some(citizen_id.to_string()),
            status,
            page: 1,
            limit: MINE_LIMIT,
        };
        let store = &self.store;
        self.cache
            .read_through(&key, None, || async move {
                Ok(store.list(&query).await?.data)
            })
            .await
    }

    /// Staff view of all complaints
    pub async fn list_all(
        &self,
        status: Option<ComplaintStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Page<Complaint>, CacheStatus)> {
        let (page, limit) = normalize_page(page, limit);
        let key = CacheKey::staff_list(status.as_ref().map(|s| s.as_str()), page, limit);
        let query = ComplaintQuery {
            citizen_id: None,
            status,
            page,
            limit,
        };
        let store = &self.store;
        self.cache
            .read_through(&key, None, || async move { store.list(&query).await })
            .await
    }

    pub async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
    ) -> Result<(Vec<Complaint>, CacheStatus)> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(GrievanceError::Validation("Coordinates out of range".into()));
        }
        if !(radius_km > 0.0 && radius_km <= MAX_NEARBY_RADIUS_KM) {
            return Err(GrievanceError::Validation(format!(
                "Radius must be between 0 and {} km",
                MAX_NEARBY_RADIUS_KM
            )));
        }

        let key = CacheKey::nearby(lat, lng, radius_km);
        let store = &self.store;
        self.cache
            .read_through(&key, None, || async move {
                store.nearby(lat, lng, radius_km, NEARBY_LIMIT).await
            })
            .await
    }

    /// Action history plus audit entries. Audit writes are asynchronous, so
    /// the newest entry may show up one cache TTL late.
    pub async fn history(&self, complaint_id: &str) -> Result<(ComplaintHistory, CacheStatus)> {
        let store = &self.store;
        let audit = &self.audit;
        self.cache
            .read_through(&CacheKey::history(complaint_id), None, || async move {
                let complaint = store.get(complaint_id).await?.ok_or_else(|| {
                    GrievanceError::NotFound(format!("Complaint {}", complaint_id))
                })?;
                let entries = audit.complaint_history(complaint_id).await?;
                Ok(ComplaintHistory {
                    complaint_id: complaint.complaint_id,
                    status: complaint.status,
                    actions: complaint.actions,
                    refiles: complaint.refiles,
                    audit: entries,
                })
            })
            .await
    }

    // ---- internals ----

    async fn execute(
        &self,
        complaint_id: &str,
        command: Command,
        ctx: &RequestContext,
    ) -> Result<Complaint> {
        let now = now_millis();
        match self.store.apply(complaint_id, &command, now).await {
            Ok(applied) => {
                debug!(
                    complaint_id = complaint_id,
                    action = %command.audit_action(),
                    from = %applied.before.status,
                    to = %applied.after.status,
                    "Complaint transition committed"
                );
                let effects = transitions::effects(&command, &applied.before, &applied.after);
                self.run_effects(effects, ctx).await;
                Ok(applied.after)
            }
            Err(e) => {
                let (actor_type, actor_id) = command.actor();
                self.audit_failure(
                    command.audit_action(),
                    actor_type,
                    actor_id,
                    Some(complaint_id),
                    &e,
                    ctx,
                );
                Err(e)
            }
        }
    }

    async fn run_effects(&self, effects: Vec<Effect>, ctx: &RequestContext) {
        for effect in effects {
            match effect {
                Effect::InvalidateCache(patterns) => {
                    self.cache.invalidate_all(&patterns).await;
                }
                Effect::Audit {
                    action,
                    actor_type,
                    actor_id,
                    complaint_id,
                    details,
                } => {
                    self.audit.log(
                        AuditLogEntry::new(action, actor_id, actor_type.into())
                            .with_resource(ResourceType::Complaint, complaint_id)
                            .with_details(details)
                            .with_request(ctx),
                    );
                }
                Effect::Notify(notification) => self.notifier.dispatch(notification),
            }
        }
    }

    fn audit_failure(
        &self,
        action: AuditAction,
        actor_type: ActorType,
        actor_id: &str,
        complaint_id: Option<&str>,
        error: &GrievanceError,
        ctx: &RequestContext,
    ) {
        let mut entry = AuditLogEntry::new(action, actor_id, actor_type.into())
            .with_request(ctx)
            .with_details(json!({ "reason": error.reason() }))
            .failed(error.to_string());
        if let Some(id) = complaint_id {
            entry = entry.with_resource(ResourceType::Complaint, id);
        }
        self.audit.log(entry);
    }
}

/// Current time at the millisecond precision the document store keeps
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, MemoryAuditStore};
    use crate::complaint::{ActionKind, Location, MemoryComplaintStore};
    use crate::counter::MemoryCounterStore;
    use crate::notify::Notification;
    use crate::scoring::FallbackScorer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Notification>>);

    impl NotificationDispatcher for Recorder {
        fn dispatch(&self, notification: Notification) {
            if let Ok(mut sent) = self.0.lock() {
                sent.push(notification);
            }
        }
    }

    struct Fixture {
        machine: ComplaintStateMachine,
        store: Arc<MemoryComplaintStore>,
        notes: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryComplaintStore::new());
        let cache = Arc::new(CacheLayer::new(
            Arc::new(MemoryCounterStore::new()),
            std::time::Duration::from_secs(30),
        ));
        let audit = Arc::new(AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 256));
        let notes = Arc::new(Recorder::default());
        let machine = ComplaintStateMachine::new(
            store.clone(),
            cache,
            audit,
            notes.clone(),
            Arc::new(FallbackScorer::keyword_only()),
        );
        Fixture {
            machine,
            store,
            notes,
        }
    }

    fn input(description: &str) -> NewComplaint {
        NewComplaint {
            citizen_id: "user-123".into(),
            description: description.into(),
            category: None,
            location: Location {
                lat: Some(12.9716),
                lng: Some(77.5946),
                address: "MG Road".into(),
            },
            media: vec![],
        }
    }

    fn staff(status: ComplaintStatus) -> StatusUpdate {
        StatusUpdate {
            actor_type: ActorType::Staff,
            actor_id: "staff-1".into(),
            status,
            comment: None,
            media: vec![],
            expected_resolution_date: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Pothole"), &ctx).await.unwrap();
        assert_eq!(c.status, ComplaintStatus::Unresolved);
        assert_eq!(c.actions[0].action, ActionKind::Created);

        let err = f.machine.create(input("  pothole "), &ctx).await.unwrap_err();
        assert!(matches!(err, GrievanceError::Duplicate(_)));
        assert_eq!(f.store.len(), 1);

        // Different description is a different complaint
        f.machine.create(input("Broken bench"), &ctx).await.unwrap();
        assert_eq!(f.store.len(), 2);
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl DangerScorer for Unreachable {
        async fn score(&self, _input: &ScoringInput) -> Result<crate::scoring::ScoreResult> {
            Err(GrievanceError::UpstreamUnavailable("scoring offline".into()))
        }
    }

    #[tokio::test]
    async fn test_create_survives_scorer_failure() {
        let store = Arc::new(MemoryComplaintStore::new());
        let machine = ComplaintStateMachine::new(
            store.clone(),
            Arc::new(CacheLayer::new(
                Arc::new(MemoryCounterStore::new()),
                std::time::Duration::from_secs(30),
            )),
            Arc::new(AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 16)),
            Arc::new(Recorder::default()),
            Arc::new(Unreachable),
        );
        let ctx = RequestContext::default();

        let c = machine.create(input("Exposed live wire"), &ctx).await.unwrap();
        let expected = KeywordScorer::evaluate(&ScoringInput {
            description: "Exposed live wire".into(),
            category: c.category,
            media_type: None,
            lat: c.location.lat,
            lng: c.location.lng,
        });
        assert_eq!(c.danger_score, expected.danger_score);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_three_confirmations_example() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Garbage pile"), &ctx).await.unwrap();
        let id = c.complaint_id.clone();

        f.machine.add_upvote(&id, "c9", &ctx).await.unwrap();
        for citizen in ["c1", "c2", "c3"] {
            f.machine.add_confirmation(&id, citizen, &ctx).await.unwrap();
        }

        let (final_state, _) = f.machine.get(&id).await.unwrap();
        assert_eq!(final_state.status, ComplaintStatus::Resolved);
        assert_eq!(final_state.confirmations.len(), 3);
        assert!(final_state.upvoters.is_empty());
        assert!(final_state.resolved_at.is_some());

        let notes = f.notes.0.lock().unwrap();
        assert!(notes.iter().any(|n| matches!(
            n,
            Notification::StatusChanged { to: ComplaintStatus::Resolved, .. }
        )));
    }

    #[tokio::test]
    async fn test_reads_invalidated_after_mutation() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Leaking pipe"), &ctx).await.unwrap();

        let (_, first) = f.machine.list_mine("user-123", None).await.unwrap();
        let (_, second) = f.machine.list_mine("user-123", None).await.unwrap();
        assert_eq!(first, CacheStatus::Miss);
        assert_eq!(second, CacheStatus::Hit);

        let (_, staff_first) = f.machine.list_all(None, 1, 10).await.unwrap();
        assert_eq!(staff_first, CacheStatus::Miss);

        f.machine
            .update_status(&c.complaint_id, staff(ComplaintStatus::InProgress), &ctx)
            .await
            .unwrap();

        let (mine, after) = f.machine.list_mine("user-123", None).await.unwrap();
        assert_eq!(after, CacheStatus::Miss);
        assert_eq!(mine[0].status, ComplaintStatus::InProgress);
        let (_, staff_after) = f.machine.list_all(None, 1, 10).await.unwrap();
        assert_eq!(staff_after, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_audited() {
        let f = fixture();
        let ctx = RequestContext::default().with_ip("10.0.0.9");
        let c = f.machine.create(input("Open manhole"), &ctx).await.unwrap();
        f.machine.add_upvote(&c.complaint_id, "c1", &ctx).await.unwrap();
        let err = f.machine.add_upvote(&c.complaint_id, "c1", &ctx).await.unwrap_err();
        assert!(matches!(err, GrievanceError::Duplicate(_)));

        f.machine.audit().flush().await;
        let failed = f
            .machine
            .audit()
            .query(
                &AuditFilter {
                    success: Some(false),
                    ..Default::default()
                },
                1,
                10,
                Default::default(),
            )
            .await
            .unwrap();
        assert_eq!(failed.pagination.total, 1);
        assert_eq!(failed.data[0].ip_address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Fallen tree"), &ctx).await.unwrap();
        f.machine
            .update_status(&c.complaint_id, staff(ComplaintStatus::AwaitingConfirmation), &ctx)
            .await
            .unwrap();

        let later = Utc::now() + Duration::days(8);
        let first = f.machine.sweep_stale(later).await.unwrap();
        let second = f.machine.sweep_stale(later).await.unwrap();
        assert_eq!(first.resolved, vec![c.complaint_id.clone()]);
        assert!(second.resolved.is_empty());

        let (resolved, _) = f.machine.get(&c.complaint_id).await.unwrap();
        let auto = resolved
            .actions
            .iter()
            .filter(|a| a.action == ActionKind::AutoResolved)
            .count();
        assert_eq!(auto, 1);
    }

    #[tokio::test]
    async fn test_sweep_drains_backlog_past_one_batch() {
        let f = fixture();
        let ctx = RequestContext::default();
        let total = SWEEP_BATCH + 10;
        for i in 0..total {
            let c = f
                .machine
                .create(input(&format!("Pothole number {}", i)), &ctx)
                .await
                .unwrap();
            f.machine
                .update_status(&c.complaint_id, staff(ComplaintStatus::AwaitingConfirmation), &ctx)
                .await
                .unwrap();
        }

        let report = f.machine.sweep_stale(Utc::now() + Duration::days(8)).await.unwrap();
        assert_eq!(report.resolved.len(), total);
        assert_eq!(report.skipped, 0);

        let again = f.machine.sweep_stale(Utc::now() + Duration::days(8)).await.unwrap();
        assert!(again.resolved.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_recent() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Broken signal"), &ctx).await.unwrap();
        f.machine
            .update_status(&c.complaint_id, staff(ComplaintStatus::AwaitingConfirmation), &ctx)
            .await
            .unwrap();
        let report = f.machine.sweep_stale(Utc::now()).await.unwrap();
        assert!(report.resolved.is_empty());
    }

    #[tokio::test]
    async fn test_history_includes_audit() {
        let f = fixture();
        let ctx = RequestContext::default();
        let c = f.machine.create(input("Stray cattle"), &ctx).await.unwrap();
        f.machine
            .escalate(&c.complaint_id, "user-123", Some("No action".into()), &ctx)
            .await
            .unwrap();
        f.machine.audit().flush().await;

        let (history, status) = f.machine.history(&c.complaint_id).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(history.actions.len(), 2);
        assert_eq!(history.audit.len(), 2);
    }

    #[tokio::test]
    async fn test_nearby_validation() {
        let f = fixture();
        assert!(f.machine.nearby(12.0, 77.0, 0.0).await.is_err());
        assert!(f.machine.nearby(95.0, 77.0, 1.0).await.is_err());
        let (found, _) = f.machine.nearby(12.0, 77.0, 1.0).await.unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_now_millis_truncates() {
        let t = now_millis();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
