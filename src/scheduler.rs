//! Auto-resolution scheduler
//!
//! Periodically resolves complaints left in awaiting_confirmation. At most
//! one sweep runs at a time in this process (mutex) and across instances
//! (lease in the shared counter store). The sweep itself is idempotent, so
//! the lease only saves duplicate work.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::complaint::{now_millis, ComplaintStateMachine, SweepReport, SweepSkip};
use crate::counter::CounterStore;
use crate::types::Result;

/// Shared lease key for the sweep
pub const LEASE_KEY: &str = "lease:auto-resolution";

pub struct AutoResolutionScheduler {
    machine: Arc<ComplaintStateMachine>,
    leases: Arc<dyn CounterStore>,
    enabled: bool,
    interval: Duration,
    owner: String,
    running: Mutex<()>,
}

impl AutoResolutionScheduler {
    pub fn new(
        machine: Arc<ComplaintStateMachine>,
        leases: Arc<dyn CounterStore>,
        enabled: bool,
        interval: Duration,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            machine,
            leases,
            enabled,
            interval,
            owner: owner.into(),
            running: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the periodic loop. Returns `None` when disabled.
    pub fn spawn(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.enabled {
            info!("Auto-resolution disabled");
            return None;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_days = self.machine.stale_after().num_days(),
            "Starting auto-resolution scheduler"
        );

        let scheduler = Arc::clone(&self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = scheduler.run_once().await {
                    error!(error = %e, "Auto-resolution sweep failed");
                }
            }
        }))
    }

    /// Run one sweep now, unless disabled or another sweep holds the slot
    pub async fn run_once(&self) -> Result<SweepReport> {
        if !self.enabled {
            return Ok(SweepReport::not_run(SweepSkip::Disabled));
        }

        let Ok(_guard) = self.running.try_lock() else {
            debug!("Auto-resolution sweep already running in this instance");
            return Ok(SweepReport::not_run(SweepSkip::InFlight));
        };

        let leased = match self
            .leases
            .try_lease(LEASE_KEY, &self.owner, self.interval)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!("Auto-resolution lease held by another instance");
                return Ok(SweepReport::not_run(SweepSkip::LeaseHeld));
            }
            Err(e) => {
                // Sweeps are idempotent; losing the lease only risks duplicate work
                warn!(error = %e, "Lease store unavailable, sweeping without lease");
                false
            }
        };

        let result = self.machine.sweep_stale(now_millis()).await;

        if leased {
            if let Err(e) = self.leases.release_lease(LEASE_KEY, &self.owner).await {
                warn!(error = %e, "Failed to release auto-resolution lease");
            }
        }

        let report = result?;
        debug!(
            resolved = report.resolved.len(),
            skipped = report.skipped,
            "Auto-resolution sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditTrail, MemoryAuditStore, RequestContext};
    use crate::cache::CacheLayer;
    use crate::complaint::{
        ActorType, ComplaintStatus, Location, MemoryComplaintStore, NewComplaint, StatusUpdate,
    };
    use crate::counter::testing::DownStore;
    use crate::counter::MemoryCounterStore;
    use crate::notify::LogDispatcher;
    use crate::scoring::FallbackScorer;

    fn machine() -> Arc<ComplaintStateMachine> {
        let cache = Arc::new(CacheLayer::disabled());
        let audit = Arc::new(AuditTrail::spawn(Arc::new(MemoryAuditStore::new()), 64));
        Arc::new(
            ComplaintStateMachine::new(
                Arc::new(MemoryComplaintStore::new()),
                cache,
                audit,
                Arc::new(LogDispatcher),
                Arc::new(FallbackScorer::keyword_only()),
            )
            // Anything awaiting confirmation is already stale
            .with_stale_after(chrono::Duration::zero()),
        )
    }

    async fn awaiting(machine: &ComplaintStateMachine) -> String {
        let ctx = RequestContext::default();
        let c = machine
            .create(
                NewComplaint {
                    citizen_id: "user-123".into(),
                    description: "Broken streetlight".into(),
                    category: None,
                    location: Location {
                        lat: None,
                        lng: None,
                        address: "5th Cross".into(),
                    },
                    media: vec![],
                },
                &ctx,
            )
            .await
            .unwrap();
        machine
            .update_status(
                &c.complaint_id,
                StatusUpdate {
                    actor_type: ActorType::Staff,
                    actor_id: "staff-1".into(),
                    status: ComplaintStatus::AwaitingConfirmation,
                    comment: None,
                    media: vec![],
                    expected_resolution_date: None,
                },
                &ctx,
            )
            .await
            .unwrap();
        c.complaint_id
    }

    #[tokio::test]
    async fn test_disabled_does_not_spawn() {
        let scheduler = Arc::new(AutoResolutionScheduler::new(
            machine(),
            Arc::new(MemoryCounterStore::new()),
            false,
            Duration::from_secs(60),
            "node-a",
        ));
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.not_run, Some(SweepSkip::Disabled));
        assert!(scheduler.spawn().is_none());
    }

    #[tokio::test]
    async fn test_run_once_resolves_and_releases_lease() {
        let machine = machine();
        let id = awaiting(&machine).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let leases = Arc::new(MemoryCounterStore::new());
        let scheduler = AutoResolutionScheduler::new(
            machine.clone(),
            leases.clone(),
            true,
            Duration::from_secs(60),
            "node-a",
        );

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.resolved, vec![id]);
        assert!(report.not_run.is_none());

        // Lease was released, so another owner can take it
        assert!(leases
            .try_lease(LEASE_KEY, "node-b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_skips() {
        let leases = Arc::new(MemoryCounterStore::new());
        leases
            .try_lease(LEASE_KEY, "node-b", Duration::from_secs(60))
            .await
            .unwrap();

        let scheduler = AutoResolutionScheduler::new(
            machine(),
            leases,
            true,
            Duration::from_secs(60),
            "node-a",
        );
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.not_run, Some(SweepSkip::LeaseHeld));
    }

    #[tokio::test]
    async fn test_in_flight_run_is_skipped() {
        let scheduler = AutoResolutionScheduler::new(
            machine(),
            Arc::new(MemoryCounterStore::new()),
            true,
            Duration::from_secs(60),
            "node-a",
        );
        let _held = scheduler.running.lock().await;
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.not_run, Some(SweepSkip::InFlight));
    }

    #[tokio::test]
    async fn test_sweeps_without_lease_store() {
        let machine = machine();
        let id = awaiting(&machine).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let scheduler = AutoResolutionScheduler::new(
            machine,
            Arc::new(DownStore),
            true,
            Duration::from_secs(60),
            "node-a",
        );
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.resolved, vec![id]);
    }
}
