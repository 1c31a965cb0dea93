//! Audit log routes
//!
//! Staff only; bulk export needs a supervisor. Viewing and exporting are
//! themselves audited.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::{
    AuditAction, AuditFilter, AuditLogEntry, AuditSort, AuditUserType, ExportFormat, ResourceType,
};
use crate::auth::Caller;
use crate::server::{ApiRequest, AppState, Handled, Reply};
use crate::types::{GrievanceError, Result};

/// Build a filter from query parameters
pub fn filter_from_query(req: &ApiRequest) -> Result<AuditFilter> {
    let owned = |key: &str| req.query_param(key).map(str::to_string);

    let filter = AuditFilter {
        user_id: owned("user_id"),
        user_type: req.query_parse::<AuditUserType>("user_type")?,
        action: owned("action").map(|a| a.to_uppercase()),
        resource_type: req.query_parse::<ResourceType>("resource_type")?,
        resource_id: owned("resource_id"),
        department_id: owned("department_id"),
        success: req.query_parse::<bool>("success")?,
        from: timestamp_param(req, "from")?,
        to: timestamp_param(req, "to")?,
    };

    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(GrievanceError::Validation(
                "'from' must not be after 'to'".into(),
            ));
        }
    }
    Ok(filter)
}

/// RFC 3339 timestamp, or a bare date meaning midnight UTC
fn timestamp_param(req: &ApiRequest, key: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = req.query_param(key) else {
        return Ok(None);
    };
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| Some(t.and_utc()))
        .ok_or_else(|| GrievanceError::Validation(format!("Invalid timestamp for '{}'", key)))
}

fn staff(state: &AppState, req: &ApiRequest) -> std::result::Result<Caller, Reply> {
    let caller = state.authenticate(req)?;
    caller.require_staff()?;
    Ok(caller)
}

fn log_access(
    state: &AppState,
    req: &ApiRequest,
    caller: &Caller,
    action: AuditAction,
    details: serde_json::Value,
) {
    state.audit().log(
        AuditLogEntry::new(action, caller.id.as_str(), caller.user_type())
            .with_request(&caller.context(req.context()))
            .with_details(details),
    );
}

/// GET /audit-logs
pub async fn list(state: &AppState, req: &ApiRequest) -> Handled {
    let caller = staff(state, req)?;
    let filter = filter_from_query(req)?;
    let sort = req.query_parse::<AuditSort>("sort")?.unwrap_or_default();
    let page = req.query_parse::<u64>("page")?.unwrap_or(1);
    let limit = req.query_parse::<u64>("limit")?.unwrap_or(0);

    let result = state.audit().query(&filter, page, limit, sort).await?;

    log_access(
        state,
        req,
        &caller,
        AuditAction::AuditLogView,
        json!({
            "page": result.pagination.page,
            "limit": result.pagination.limit,
            "total": result.pagination.total,
        }),
    );

    Ok(Reply::ok(&json!({
        "success": true,
        "data": result.data,
        "pagination": result.pagination,
    })))
}

/// GET /audit-logs/export?format=json|csv
pub async fn export(state: &AppState, req: &ApiRequest) -> Handled {
    let caller = state.authenticate(req)?;
    caller.require_supervisor()?;
    let filter = filter_from_query(req)?;
    let format = req
        .query_parse::<ExportFormat>("format")?
        .unwrap_or(ExportFormat::Json);

    let export = state.audit().export(&filter, format).await?;

    log_access(
        state,
        req,
        &caller,
        AuditAction::AuditLogExport,
        json!({ "format": format.extension(), "count": export.count }),
    );

    let filename = format!(
        "audit-logs-{}.{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        format.extension()
    );
    Ok(
        Reply::raw(hyper::StatusCode::OK, format.content_type(), export.body)
            .with_attachment(filename),
    )
}

/// GET /audit-logs/stats
pub async fn stats(state: &AppState, req: &ApiRequest) -> Handled {
    let caller = staff(state, req)?;
    let filter = filter_from_query(req)?;

    let stats = state.audit().stats_for(&filter).await?;

    log_access(
        state,
        req,
        &caller,
        AuditAction::AuditLogView,
        json!({ "view": "stats" }),
    );

    Ok(Reply::ok(&json!({
        "success": true,
        "stats": stats,
        "queue": state.audit().stats(),
    })))
}

/// GET /audit-logs/users/:id
pub async fn user_activity(state: &AppState, req: &ApiRequest, user_id: &str) -> Handled {
    let caller = staff(state, req)?;
    let limit = req.query_parse::<u64>("limit")?;

    let entries = state.audit().user_activity(user_id, limit).await?;

    log_access(
        state,
        req,
        &caller,
        AuditAction::AuditLogView,
        json!({ "view": "user_activity", "userId": user_id }),
    );

    Ok(Reply::ok(&json!({
        "success": true,
        "userId": user_id,
        "count": entries.len(),
        "data": entries,
    })))
}

/// GET /audit-logs/departments/:id
pub async fn department_activity(
    state: &AppState,
    req: &ApiRequest,
    department_id: &str,
) -> Handled {
    let caller = staff(state, req)?;
    let limit = req.query_parse::<u64>("limit")?;

    let entries = state
        .audit()
        .department_activity(department_id, limit)
        .await?;

    log_access(
        state,
        req,
        &caller,
        AuditAction::AuditLogView,
        json!({ "view": "department_activity", "departmentId": department_id }),
    );

    Ok(Reply::ok(&json!({
        "success": true,
        "departmentId": department_id,
        "count": entries.len(),
        "data": entries,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hyper::Request;

    fn request(uri: &str) -> ApiRequest {
        let req = Request::builder().uri(uri).body(Bytes::new()).unwrap();
        ApiRequest::new(req, "127.0.0.1:9000".parse().unwrap(), &[])
    }

    #[test]
    fn test_filter_from_query() {
        let req = request(
            "/audit-logs?user_type=staff&action=complaint_upvote&success=false&from=2025-01-01&to=2025-01-31T23:59:59Z",
        );
        let filter = filter_from_query(&req).unwrap();
        assert_eq!(filter.user_type, Some(AuditUserType::Staff));
        assert_eq!(filter.action.as_deref(), Some("COMPLAINT_UPVOTE"));
        assert_eq!(filter.success, Some(false));
        assert!(filter.from.unwrap() < filter.to.unwrap());
    }

    #[test]
    fn test_filter_rejects_bad_input() {
        assert!(filter_from_query(&request("/audit-logs?user_type=robot")).is_err());
        assert!(filter_from_query(&request("/audit-logs?from=yesterday")).is_err());
        assert!(filter_from_query(&request("/audit-logs?from=2025-02-01&to=2025-01-01")).is_err());
        assert_eq!(
            filter_from_query(&request("/audit-logs")).unwrap(),
            AuditFilter::default()
        );
    }
}
