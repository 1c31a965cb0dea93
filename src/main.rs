//! Grievance - civic complaint tracking service

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grievance::{
    audit::{AuditStore, AuditTrail, MemoryAuditStore},
    cache::CacheLayer,
    complaint::{ComplaintStateMachine, ComplaintStore, MemoryComplaintStore},
    config::Args,
    counter::{spawn_cleanup_task, CounterStore, MemoryCounterStore, RedisCounterStore},
    db::{MongoAuditStore, MongoClient, MongoComplaintStore},
    notify::{LogDispatcher, NotificationDispatcher, WebhookDispatcher},
    scoring::{DangerScorer, FallbackScorer, HttpDangerScorer},
    server::{self, AppState},
};

/// How often the in-process counter store drops expired slots
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("grievance={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Grievance - civic complaint service");
    info!("======================================");
    info!("Instance ID: {}", args.instance_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}/{}", args.stores.mongodb_uri, args.stores.mongodb_db);
    info!(
        "Counter store: {}",
        if args.stores.redis_url.is_some() { "redis" } else { "in-process" }
    );
    info!(
        "Auto-resolution: {} (every {}s, after {} days)",
        if args.auto_resolve.enabled { "enabled" } else { "disabled" },
        args.auto_resolve.interval_secs,
        args.auto_resolve.after_days
    );
    info!("======================================");

    let counters: Arc<dyn CounterStore> = match &args.stores.redis_url {
        Some(url) => match RedisCounterStore::connect(url, args.stores.kv_timeout()).await {
            Ok(store) => {
                info!("Redis connected successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Redis connection failed: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("REDIS_URL not set; rate limits, cache and leases are local to this instance");
            let store = Arc::new(MemoryCounterStore::new());
            spawn_cleanup_task(Arc::clone(&store), MEMORY_CLEANUP_INTERVAL);
            store
        }
    };

    // MongoDB is optional in dev mode
    let mongo = match MongoClient::new(&args.stores.mongodb_uri, &args.stores.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = Arc::new(build_state(args, mongo, counters).await?);

    if Arc::clone(&state.scheduler).spawn().is_some() {
        info!("Auto-resolution scheduler started");
    }

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Wire stores and outbound clients. Without MongoDB (dev mode only)
/// complaints and audit entries live in memory.
async fn build_state(
    args: Args,
    mongo: Option<MongoClient>,
    counters: Arc<dyn CounterStore>,
) -> anyhow::Result<AppState> {
    let (complaint_store, audit_store): (Arc<dyn ComplaintStore>, Arc<dyn AuditStore>) =
        match &mongo {
            Some(mongo) => (
                Arc::new(MongoComplaintStore::new(mongo).await?),
                Arc::new(MongoAuditStore::new(mongo).await?),
            ),
            None => (
                Arc::new(MemoryComplaintStore::new()),
                Arc::new(MemoryAuditStore::new()),
            ),
        };
    let audit = Arc::new(AuditTrail::spawn(audit_store, args.audit_queue_capacity));

    let cache = Arc::new(CacheLayer::new(
        Arc::clone(&counters),
        Duration::from_secs(args.cache_ttl_secs),
    ));

    let remote: Option<Box<dyn DangerScorer>> = match &args.ai_service_url {
        Some(url) => {
            info!("Danger scoring via {}", url);
            Some(Box::new(HttpDangerScorer::new(
                url,
                Duration::from_millis(args.ai_timeout_ms),
            )?))
        }
        None => {
            info!("AI_SERVICE_URL not set; using keyword danger scoring");
            None
        }
    };

    let notifier: Arc<dyn NotificationDispatcher> = match &args.notify_webhook_url {
        Some(url) => Arc::new(WebhookDispatcher::new(url.as_str(), args.request_timeout())),
        None => Arc::new(LogDispatcher),
    };

    let complaints = Arc::new(
        ComplaintStateMachine::new(
            complaint_store,
            cache,
            audit,
            Arc::clone(&notifier),
            Arc::new(FallbackScorer::new(remote)),
        )
        .with_stale_after(args.auto_resolve.stale_after()),
    );

    let state = AppState::new(args, complaints, counters, notifier)?;
    Ok(match mongo {
        Some(mongo) => state.with_mongo(mongo),
        None => state,
    })
}
