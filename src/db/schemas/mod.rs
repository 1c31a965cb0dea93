//! Database schemas
//!
//! MongoDB document structures for complaints, audit logs and submission
//! claims.

mod audit_log;
mod complaint;
mod submission_claim;

pub use audit_log::{AuditLogDoc, AUDIT_LOG_COLLECTION};
pub use complaint::{ActionDoc, ComplaintDoc, RefileDoc, COMPLAINT_COLLECTION};
pub use submission_claim::{SubmissionClaimDoc, SUBMISSION_CLAIM_COLLECTION};
