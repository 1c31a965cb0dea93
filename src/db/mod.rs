//! MongoDB persistence
//!
//! Document-store backends for [`ComplaintStore`](crate::complaint::ComplaintStore)
//! and [`AuditStore`](crate::audit::AuditStore).

pub mod audit_logs;
pub mod complaints;
pub mod mongo;
pub mod schemas;

pub use audit_logs::MongoAuditStore;
pub use complaints::MongoComplaintStore;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection};
