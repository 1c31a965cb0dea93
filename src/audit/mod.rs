//! Append-only audit trail
//!
//! - `entry` - the audit record and its builders
//! - `store` - persistence trait and in-memory backend
//! - `trail` - non-blocking front end with a background writer
//! - `export` - JSON and CSV export

pub mod entry;
pub mod export;
pub mod store;
pub mod trail;

pub use entry::{AuditAction, AuditLogEntry, AuditUserType, RequestContext, ResourceType};
pub use export::{Export, ExportFormat, CSV_HEADER};
pub use store::{AuditFilter, AuditSort, AuditStats, AuditStore, MemoryAuditStore};
pub use trail::{AuditTrail, TrailStats, MAX_EXPORT_ENTRIES};
