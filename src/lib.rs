//! Grievance - civic complaint tracking service
//!
//! Citizens file complaints about local infrastructure; staff move them
//! through a fixed lifecycle; citizens confirm the fix. Every instance of
//! the service shares its rate limits, read cache and sweep lease through
//! one counter store, so a fleet behaves like a single process.
//!
//! ## Components
//!
//! - **Complaint**: lifecycle state machine with guarded transitions
//! - **Rate limiting**: fixed-window counters per route class
//! - **Cache**: read-through cache with pattern invalidation
//! - **Audit**: append-only trail of every attempted mutation
//! - **Scheduler**: periodic auto-resolution of stale confirmations

pub mod audit;
pub mod auth;
pub mod cache;
pub mod complaint;
pub mod config;
pub mod counter;
pub mod db;
pub mod notify;
pub mod ratelimit;
pub mod routes;
pub mod scheduler;
pub mod scoring;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GrievanceError, Result};
