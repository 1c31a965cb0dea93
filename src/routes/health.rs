//! Health endpoint
//!
//! Always 200 while the process is serving. `status` turns `degraded` when
//! the shared counter store or MongoDB does not answer a ping; rate limiting
//! and caching then fail open, so the service keeps working.

use serde::Serialize;

use crate::audit::TrailStats;
use crate::cache::CacheStats;
use crate::server::{AppState, Handled, Reply};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// `online` or `degraded`
    pub status: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    pub instance_id: String,
    pub mode: &'static str,
    pub stores: StoreHealth,
    pub cache: CacheHealth,
    pub audit: AuditHealth,
    pub auto_resolution: SchedulerHealth,
    pub timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub counter_backend: &'static str,
    pub counter_reachable: bool,
    pub complaint_backend: &'static str,
    /// `None` when running without MongoDB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo_reachable: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditHealth {
    pub backend: &'static str,
    #[serde(flatten)]
    pub queue: TrailStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerHealth {
    pub enabled: bool,
    pub interval_secs: u64,
    pub stale_after_days: i64,
}

/// GET /health
pub async fn health_check(state: &AppState) -> Handled {
    let counter_reachable = state.counters.ping().await.is_ok();
    let mongo_reachable = match &state.mongo {
        Some(mongo) => Some(mongo.ping().await.is_ok()),
        None => None,
    };
    let degraded = !counter_reachable || mongo_reachable == Some(false);

    let cache_stats = state.cache().stats();
    let response = HealthResponse {
        healthy: true,
        status: if degraded { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        instance_id: state.args.instance_id.to_string(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        stores: StoreHealth {
            counter_backend: state.counters.backend(),
            counter_reachable,
            complaint_backend: state.complaints.store().backend(),
            mongo_reachable,
        },
        cache: CacheHealth {
            hit_rate: cache_stats.hit_rate(),
            stats: cache_stats,
            ttl_secs: state.cache().default_ttl().as_secs(),
        },
        audit: AuditHealth {
            backend: state.audit().backend(),
            queue: state.audit().stats(),
        },
        auto_resolution: SchedulerHealth {
            enabled: state.scheduler.is_enabled(),
            interval_secs: state.scheduler.interval().as_secs(),
            stale_after_days: state.complaints.stale_after().num_days(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    Ok(Reply::ok(&response))
}
