//! Audit log entries
//!
//! Entries are append-only. They are built with `with_*` setters and handed
//! to [`AuditTrail::log`](super::AuditTrail::log).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::complaint::ActorType;
use crate::types::{GrievanceError, Result};

/// Who performed an audited action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditUserType {
    Citizen,
    Staff,
    Supervisor,
    Guest,
    System,
}

impl AuditUserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Staff => "staff",
            Self::Supervisor => "supervisor",
            Self::Guest => "guest",
            Self::System => "system",
        }
    }
}

impl From<ActorType> for AuditUserType {
    fn from(actor: ActorType) -> Self {
        match actor {
            ActorType::Citizen => Self::Citizen,
            ActorType::Staff => Self::Staff,
            ActorType::Supervisor => Self::Supervisor,
            ActorType::System => Self::System,
        }
    }
}

impl FromStr for AuditUserType {
    type Err = GrievanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "citizen" => Ok(Self::Citizen),
            "staff" => Ok(Self::Staff),
            "supervisor" => Ok(Self::Supervisor),
            "guest" => Ok(Self::Guest),
            "system" => Ok(Self::System),
            other => Err(GrievanceError::Validation(format!("Unknown user type '{}'", other))),
        }
    }
}

/// What kind of resource an entry is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Complaint,
    User,
    Department,
    AuditLog,
    System,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complaint => "complaint",
            Self::User => "user",
            Self::Department => "department",
            Self::AuditLog => "audit_log",
            Self::System => "system",
        }
    }
}

impl FromStr for ResourceType {
    type Err = GrievanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "complaint" => Ok(Self::Complaint),
            "user" => Ok(Self::User),
            "department" => Ok(Self::Department),
            "audit_log" => Ok(Self::AuditLog),
            "system" => Ok(Self::System),
            other => Err(GrievanceError::Validation(format!(
                "Unknown resource type '{}'",
                other
            ))),
        }
    }
}

/// Audited action names
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ComplaintCreate,
    ComplaintStatusChange,
    ComplaintUpvote,
    ComplaintConfirm,
    ComplaintAutoResolve,
    ComplaintRefile,
    ComplaintEscalate,
    ComplaintView,
    OtpRequest,
    AuditLogView,
    AuditLogExport,
    AutoResolutionRun,
}

impl AuditAction {
    pub const ALL: [AuditAction; 12] = [
        AuditAction::ComplaintCreate,
        AuditAction::ComplaintStatusChange,
        AuditAction::ComplaintUpvote,
        AuditAction::ComplaintConfirm,
        AuditAction::ComplaintAutoResolve,
        AuditAction::ComplaintRefile,
        AuditAction::ComplaintEscalate,
        AuditAction::ComplaintView,
        AuditAction::OtpRequest,
        AuditAction::AuditLogView,
        AuditAction::AuditLogExport,
        AuditAction::AutoResolutionRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComplaintCreate => "COMPLAINT_CREATE",
            Self::ComplaintStatusChange => "COMPLAINT_STATUS_CHANGE",
            Self::ComplaintUpvote => "COMPLAINT_UPVOTE",
            Self::ComplaintConfirm => "COMPLAINT_CONFIRM",
            Self::ComplaintAutoResolve => "COMPLAINT_AUTO_RESOLVE",
            Self::ComplaintRefile => "COMPLAINT_REFILE",
            Self::ComplaintEscalate => "COMPLAINT_ESCALATE",
            Self::ComplaintView => "COMPLAINT_VIEW",
            Self::OtpRequest => "OTP_REQUEST",
            Self::AuditLogView => "AUDIT_LOG_VIEW",
            Self::AuditLogExport => "AUDIT_LOG_EXPORT",
            Self::AutoResolutionRun => "AUTO_RESOLUTION_RUN",
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::OtpRequest => ResourceType::User,
            Self::AuditLogView | Self::AuditLogExport => ResourceType::AuditLog,
            Self::AutoResolutionRun => ResourceType::System,
            _ => ResourceType::Complaint,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: String,
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
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Create a successful entry for `action` by `user_id`
    pub fn new(action: AuditAction, user_id: impl Into<String>, user_type: AuditUserType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            user_type,
            action: action.as_str().to_string(),
            resource_type: action.resource_type(),
            resource_id: None,
            details: serde_json::Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
            device_id: None,
            department_id: None,
            success: true,
            error_message: None,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Entry for work done by the service itself
    pub fn system(action: AuditAction) -> Self {
        Self::new(action, "system", AuditUserType::System)
    }

    pub fn with_resource(mut self, resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        self.resource_type = resource_type;
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request(mut self, ctx: &RequestContext) -> Self {
        self.ip_address = ctx.ip_address.clone();
        self.user_agent = ctx.user_agent.clone();
        self.device_id = ctx.device_id.clone();
        self.session_id = ctx.session_id.clone();
        if self.department_id.is_none() {
            self.department_id = ctx.department_id.clone();
        }
        self
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Mark the entry as a failed attempt
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }
}

/// Request attributes copied into audit entries
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub department_id: Option<String>,
}

impl RequestContext {
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let ctx = RequestContext {
            ip_address: Some("10.1.2.3".into()),
            user_agent: Some("curl/8".into()),
            ..Default::default()
        };
        let entry = AuditLogEntry::new(AuditAction::ComplaintUpvote, "c1", AuditUserType::Citizen)
            .with_resource(ResourceType::Complaint, "COMP-1")
            .with_request(&ctx)
            .failed("already upvoted");

        assert_eq!(entry.action, "COMPLAINT_UPVOTE");
        assert_eq!(entry.resource_id.as_deref(), Some("COMP-1"));
        assert_eq!(entry.ip_address.as_deref(), Some("10.1.2.3"));
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("already upvoted"));
    }

    #[test]
    fn test_action_names_match_serde() {
        for action in AuditAction::ALL {
            let v = serde_json::to_value(action).unwrap();
            assert_eq!(v, action.as_str());
        }
    }

    #[test]
    fn test_audit_resource_types() {
        assert_eq!(AuditAction::AuditLogExport.resource_type(), ResourceType::AuditLog);
        assert_eq!(AuditAction::ComplaintCreate.resource_type(), ResourceType::Complaint);
        let system = AuditLogEntry::system(AuditAction::AutoResolutionRun);
        assert_eq!(system.user_type, AuditUserType::System);
        assert_eq!(system.resource_type, ResourceType::System);
    }
}
