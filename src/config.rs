//! Configuration for the grievance service
//!
//! CLI arguments and environment variable handling using clap.
//! Store and auto-resolution settings are separate groups so the sweep
//! binary can reuse them without the HTTP options.

use clap::{Args as ClapArgs, Parser};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use uuid::Uuid;

/// Grievance - civic complaint tracking service
#[derive(Parser, Debug, Clone)]
#[command(name = "grievance")]
#[command(about = "Civic complaint tracking with shared rate limits, caching and audit")]
pub struct Args {
    /// Unique identifier for this instance (used as lease owner)
    #[arg(long, env = "INSTANCE_ID", default_value_t = Uuid::new_v4())]
    pub instance_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Enable development mode (dev JWT secret, optional stores)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Store connections
    #[command(flatten)]
    pub stores: StoreArgs,

    /// Auto-resolution sweep
    #[command(flatten)]
    pub auto_resolve: AutoResolveArgs,

    /// JWT secret for token verification (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "1048576")]
    pub max_body_bytes: usize,

    /// TTL for cached list/detail reads, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "30")]
    pub cache_ttl_secs: u64,

    /// AI danger scoring endpoint (keyword fallback when unset or unreachable)
    #[arg(long, env = "AI_SERVICE_URL")]
    pub ai_service_url: Option<String>,

    /// Scoring request timeout in milliseconds
    #[arg(long, env = "AI_TIMEOUT_MS", default_value = "3000")]
    pub ai_timeout_ms: u64,

    /// Webhook receiving notification events (log-only when unset)
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,

    /// Capacity of the background audit queue
    #[arg(long, env = "AUDIT_QUEUE_CAPACITY", default_value = "1024")]
    pub audit_queue_capacity: usize,

    /// Reverse proxies whose X-Forwarded-For / X-Real-IP headers are honored
    #[arg(long, env = "TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<IpAddr>,
}

/// Document store and shared key-value store connections
#[derive(ClapArgs, Debug, Clone)]
pub struct StoreArgs {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "grievance")]
    pub mongodb_db: String,

    /// Redis URL for counters, cache and leases.
    /// When unset an in-process store is used, which is only correct for a
    /// single instance.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Timeout for a single key-value store operation in milliseconds
    #[arg(long, env = "KV_TIMEOUT_MS", default_value = "500")]
    pub kv_timeout_ms: u64,
}

/// Auto-resolution of complaints stuck awaiting confirmation
#[derive(ClapArgs, Debug, Clone)]
pub struct AutoResolveArgs {
    /// Run the periodic sweep in this instance
    #[arg(long = "auto-resolve-enabled", env = "AUTO_RESOLVE_ENABLED", default_value = "true")]
    pub enabled: bool,

    /// Interval between sweeps in seconds
    #[arg(long = "auto-resolve-interval-secs", env = "AUTO_RESOLVE_INTERVAL_SECS", default_value = "3600")]
    pub interval_secs: u64,

    /// Days a complaint may sit in awaiting_confirmation before it is resolved
    #[arg(long = "auto-resolve-after-days", env = "AUTO_RESOLVE_AFTER_DAYS", default_value = "7")]
    pub after_days: i64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(s) if s.len() < 32 => {
                    return Err("JWT_SECRET must be at least 32 characters".to_string())
                }
                Some(_) => {}
            }
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.cache_ttl_secs == 0 || self.cache_ttl_secs > 300 {
            return Err("CACHE_TTL_SECS must be between 1 and 300".to_string());
        }

        if self.audit_queue_capacity == 0 {
            return Err("AUDIT_QUEUE_CAPACITY must be greater than zero".to_string());
        }

        self.stores.validate()?;
        self.auto_resolve.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl StoreArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.kv_timeout_ms == 0 {
            return Err("KV_TIMEOUT_MS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_millis(self.kv_timeout_ms)
    }
}

impl AutoResolveArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("AUTO_RESOLVE_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.after_days <= 0 {
            return Err("AUTO_RESOLVE_AFTER_DAYS must be positive".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.after_days)
    }
}
