//! Audit log document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditLogEntry, AuditUserType, ResourceType};
use crate::db::mongo::IntoIndexes;

/// Collection name for audit logs
pub const AUDIT_LOG_COLLECTION: &str = "audit_logs";

/// Audit entry stored in MongoDB; `_id` is the entry's uuid
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditLogDoc {
    pub _id: String,
    pub user_id: String,
    pub user_type: AuditUserType,
    pub action: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime,
}

impl From<&AuditLogEntry> for AuditLogDoc {
    fn from(e: &AuditLogEntry) -> Self {
        Self {
            _id: e.id.clone(),
            user_id: e.user_id.clone(),
            user_type: e.user_type,
            action: e.action.clone(),
            resource_type: e.resource_type,
            resource_id: e.resource_id.clone(),
            details: e.details.clone(),
            ip_address: e.ip_address.clone(),
            user_agent: e.user_agent.clone(),
            device_id: e.device_id.clone(),
            department_id: e.department_id.clone(),
            success: e.success,
            error_message: e.error_message.clone(),
            session_id: e.session_id.clone(),
            timestamp: DateTime::from_chrono(e.timestamp),
        }
    }
}

impl From<AuditLogDoc> for AuditLogEntry {
    fn from(d: AuditLogDoc) -> Self {
        Self {
            id: d._id,
            user_id: d.user_id,
            user_type: d.user_type,
            action: d.action,
            resource_type: d.resource_type,
            resource_id: d.resource_id,
            details: d.details,
            ip_address: d.ip_address,
            user_agent: d.user_agent,
            device_id: d.device_id,
            department_id: d.department_id,
            success: d.success,
            error_message: d.error_message,
            session_id: d.session_id,
            timestamp: d.timestamp.to_chrono(),
        }
    }
}

impl IntoIndexes for AuditLogDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        let index = |keys: Document, name: &str| {
            (
                keys,
                Some(IndexOptions::builder().name(name.to_string()).build()),
            )
        };
        vec![
            index(doc! { "timestamp": -1 }, "timestamp_index"),
            index(doc! { "user_id": 1, "timestamp": -1 }, "user_timestamp_index"),
            index(
                doc! { "resource_type": 1, "resource_id": 1, "timestamp": -1 },
                "resource_timestamp_index",
            ),
            index(doc! { "action": 1, "timestamp": -1 }, "action_timestamp_index"),
            index(
                doc! { "department_id": 1, "timestamp": -1 },
                "department_timestamp_index",
            ),
        ]
    }
}
