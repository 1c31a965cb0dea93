//! Grievance Sweep - one-shot auto-resolution run
//!
//! Resolves complaints that have waited in awaiting_confirmation past the
//! configured window, then exits. Meant for cron jobs and for deployments
//! that run the HTTP service with `AUTO_RESOLVE_ENABLED=false`.
//!
//! Usage:
//!   grievance-sweep --mongodb-uri mongodb://localhost:27017 --redis-url redis://localhost:6379
//!
//! Takes the same store and auto-resolution variables as the service
//! (MONGODB_URI, MONGODB_DB, REDIS_URL, AUTO_RESOLVE_AFTER_DAYS, ...).

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use grievance::{
    audit::AuditTrail,
    cache::CacheLayer,
    complaint::ComplaintStateMachine,
    config::{AutoResolveArgs, StoreArgs},
    counter::{CounterStore, MemoryCounterStore, RedisCounterStore},
    db::{MongoAuditStore, MongoClient, MongoComplaintStore},
    notify::{LogDispatcher, NotificationDispatcher, WebhookDispatcher},
    scheduler::AutoResolutionScheduler,
    scoring::FallbackScorer,
};

#[derive(Parser, Debug)]
#[command(name = "grievance-sweep")]
#[command(about = "Run one auto-resolution sweep and exit")]
#[command(version)]
struct Args {
    /// Lease owner for this run (auto-generated if not provided)
    #[arg(long, env = "INSTANCE_ID")]
    instance_id: Option<String>,

    #[command(flatten)]
    stores: StoreArgs,

    #[command(flatten)]
    auto_resolve: AutoResolveArgs,

    /// Webhook receiving notification events (log-only when unset)
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    notify_webhook_url: Option<String>,

    /// Capacity of the background audit queue
    #[arg(long, env = "AUDIT_QUEUE_CAPACITY", default_value = "1024")]
    audit_queue_capacity: usize,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if let Err(e) = args.stores.validate().and_then(|_| args.auto_resolve.validate()) {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Sweep failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let owner = args
        .instance_id
        .clone()
        .unwrap_or_else(|| format!("sweep-{}", uuid::Uuid::new_v4()));

    let counters: Arc<dyn CounterStore> = match &args.stores.redis_url {
        Some(url) => Arc::new(RedisCounterStore::connect(url, args.stores.kv_timeout()).await?),
        None => {
            warn!("REDIS_URL not set; no shared lease and no cache invalidation across instances");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let mongo = MongoClient::new(&args.stores.mongodb_uri, &args.stores.mongodb_db).await?;
    let audit = Arc::new(AuditTrail::spawn(
        Arc::new(MongoAuditStore::new(&mongo).await?),
        args.audit_queue_capacity,
    ));

    let notifier: Arc<dyn NotificationDispatcher> = match &args.notify_webhook_url {
        Some(url) => Arc::new(WebhookDispatcher::new(url.as_str(), Duration::from_secs(5))),
        None => Arc::new(LogDispatcher),
    };

    let machine = Arc::new(
        ComplaintStateMachine::new(
            Arc::new(MongoComplaintStore::new(&mongo).await?),
            // TTL is irrelevant here; the sweep only invalidates
            Arc::new(CacheLayer::new(Arc::clone(&counters), Duration::from_secs(30))),
            Arc::clone(&audit),
            notifier,
            Arc::new(FallbackScorer::keyword_only()),
        )
        .with_stale_after(args.auto_resolve.stale_after()),
    );

    let scheduler = AutoResolutionScheduler::new(
        machine,
        counters,
        true,
        args.auto_resolve.interval(),
        owner.clone(),
    );

    info!(
        owner = %owner,
        stale_after_days = args.auto_resolve.after_days,
        "Running auto-resolution sweep"
    );
    let report = scheduler.run_once().await?;

    // Entries are written in the background; wait before exiting
    audit.flush().await;

    match report.not_run {
        Some(reason) => info!(?reason, "Sweep not run"),
        None => info!(
            resolved = report.resolved.len(),
            skipped = report.skipped,
            "Sweep complete"
        ),
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
