//! HTTP routes for the grievance service

pub mod audit_logs;
pub mod auth;
pub mod complaints;
pub mod health;

use serde::de::DeserializeOwned;

use crate::audit::{AuditAction, AuditLogEntry, AuditUserType, RequestContext, ResourceType};
use crate::auth::Caller;
use crate::ratelimit::{Admission, RouteClass};
use crate::server::{ApiRequest, AppState, Reply};
use crate::types::{GrievanceError, Result};

/// One audited mutation attempt.
///
/// Refusals that happen before the state machine runs (auth, role, body,
/// rate limit) are recorded here so every attempt leaves an audit entry.
pub(crate) struct Attempt<'a> {
    state: &'a AppState,
    req: &'a ApiRequest,
    action: AuditAction,
    resource_id: Option<&'a str>,
}

impl<'a> Attempt<'a> {
    pub fn new(
        state: &'a AppState,
        req: &'a ApiRequest,
        action: AuditAction,
        resource_id: Option<&'a str>,
    ) -> Self {
        Self {
            state,
            req,
            action,
            resource_id,
        }
    }

    /// Authenticate, then apply a role check
    pub fn authorize(
        &self,
        check: impl FnOnce(&Caller) -> Result<()>,
    ) -> std::result::Result<Caller, Reply> {
        let caller = self
            .state
            .authenticate(self.req)
            .map_err(|e| self.refuse(None, e))?;
        check(&caller).map_err(|e| self.refuse(Some(&caller), e))?;
        Ok(caller)
    }

    pub fn body<T: DeserializeOwned>(&self, caller: Option<&Caller>) -> std::result::Result<T, Reply> {
        self.req.json().map_err(|e| self.refuse(caller, e))
    }

    pub fn body_or_default<T: DeserializeOwned + Default>(
        &self,
        caller: Option<&Caller>,
    ) -> std::result::Result<T, Reply> {
        self.req.json_or_default().map_err(|e| self.refuse(caller, e))
    }

    pub async fn admit(
        &self,
        caller: Option<&Caller>,
        class: RouteClass,
        identity: &str,
    ) -> std::result::Result<Admission, Reply> {
        match self.state.admit(class, identity).await {
            Ok(admission) => Ok(admission),
            Err(reply) => {
                self.record_failure(
                    caller,
                    &GrievanceError::RateLimitExceeded(class.as_str().to_string()),
                );
                Err(reply)
            }
        }
    }

    /// Request context for the state machine
    pub fn context(&self, caller: &Caller) -> RequestContext {
        caller.context(self.req.context())
    }

    pub fn refuse(&self, caller: Option<&Caller>, err: GrievanceError) -> Reply {
        self.record_failure(caller, &err);
        Reply::from(err)
    }

    fn record_failure(&self, caller: Option<&Caller>, err: &GrievanceError) {
        let (user_id, user_type) = match caller {
            Some(c) => (c.id.as_str(), c.user_type()),
            None => ("anonymous", AuditUserType::Guest),
        };
        let mut entry = AuditLogEntry::new(self.action, user_id, user_type)
            .with_request(&self.req.context())
            .with_details(serde_json::json!({ "reason": err.reason() }))
            .failed(err.to_string());
        if let Some(id) = self.resource_id {
            entry = entry.with_resource(ResourceType::Complaint, id);
        }
        if let Some(department) = caller.and_then(|c| c.department_id.as_deref()) {
            entry = entry.with_department(department);
        }
        self.state.audit().log(entry);
    }
}
