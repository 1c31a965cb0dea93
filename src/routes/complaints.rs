//! Complaint routes
//!
//! Mutations go through the state machine, which audits its own outcomes.
//! Reads report the cache outcome in `X-Cache`.

use chrono::{DateTime, Utc};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audit::{AuditAction, AuditLogEntry, ResourceType};
use crate::auth::Caller;
use crate::complaint::{
    haversine_km, ComplaintCategory, ComplaintStatus, Location, Media, NewComplaint,
    StatusUpdate,
};
use crate::ratelimit::{escalate_identity, RouteClass};
use crate::routes::Attempt;
use crate::server::{ApiRequest, AppState, Handled, Reply};
use crate::types::GrievanceError;

/// Radius used when `GET /complaints/nearby` omits one
pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 10.0;

#[derive(Debug, Deserialize)]
pub struct CreateComplaintBody {
    pub description: String,
    #[serde(default)]
    pub category: Option<ComplaintCategory>,
    pub location: Location,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: ComplaintStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub expected_resolution_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RefileBody {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EscalateBody {
    #[serde(default)]
    pub reason: Option<String>,
}

fn authenticated(state: &AppState, req: &ApiRequest) -> std::result::Result<Caller, Reply> {
    state.authenticate(req).map_err(Reply::from)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ---- mutations ----

/// POST /complaints
pub async fn create(state: &AppState, req: &ApiRequest) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintCreate, None);
    let caller = attempt.authorize(Caller::require_citizen)?;
    let admission = attempt
        .admit(Some(&caller), RouteClass::ComplaintSubmit, &caller.id)
        .await?;
    let body: CreateComplaintBody = attempt.body(Some(&caller))?;

    let input = NewComplaint {
        citizen_id: caller.id.clone(),
        description: body.description,
        category: body.category,
        location: body.location,
        media: body.media,
    };
    let complaint = state
        .complaints
        .create(input, &attempt.context(&caller))
        .await?;

    Ok(Reply::json(
        StatusCode::CREATED,
        &json!({
            "success": true,
            "message": "Complaint submitted successfully",
            "complaint": complaint,
        }),
    )
    .with_admission(admission))
}

/// PATCH /complaints/:id/status
pub async fn update_status(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintStatusChange, Some(id));
    let caller = attempt.authorize(Caller::require_staff)?;
    let body: StatusBody = attempt.body(Some(&caller))?;

    let update = StatusUpdate {
        actor_type: caller.actor_type(),
        actor_id: caller.id.clone(),
        status: body.status,
        comment: non_empty(body.comment),
        media: body.media,
        expected_resolution_date: body.expected_resolution_date,
    };
    let complaint = state
        .complaints
        .update_status(id, update, &attempt.context(&caller))
        .await?;

    Ok(Reply::ok(&json!({
        "success": true,
        "message": format!("Status updated to {}", complaint.status),
        "complaint": complaint,
    })))
}

/// POST /complaints/:id/upvote
pub async fn upvote(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintUpvote, Some(id));
    let caller = attempt.authorize(Caller::require_citizen)?;

    let complaint = state
        .complaints
        .add_upvote(id, &caller.id, &attempt.context(&caller))
        .await?;

    Ok(Reply::ok(&json!({
        "success": true,
        "message": "Upvote recorded",
        "upvotes": complaint.upvote_count(),
        "complaint": complaint,
    })))
}

/// POST /complaints/:id/confirm_resolution
pub async fn confirm_resolution(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintConfirm, Some(id));
    let caller = attempt.authorize(Caller::require_citizen)?;

    let complaint = state
        .complaints
        .add_confirmation(id, &caller.id, &attempt.context(&caller))
        .await?;

    let message = if complaint.status == ComplaintStatus::Resolved {
        "Resolution confirmed; complaint resolved"
    } else {
        "Resolution confirmation recorded"
    };
    Ok(Reply::ok(&json!({
        "success": true,
        "message": message,
        "confirmations": complaint.confirmation_count(),
        "complaint": complaint,
    })))
}

/// POST /complaints/:id/refile
pub async fn refile(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintRefile, Some(id));
    let caller = attempt.authorize(Caller::require_citizen)?;
    let admission = attempt
        .admit(Some(&caller), RouteClass::ComplaintSubmit, &caller.id)
        .await?;
    let body: RefileBody = attempt.body(Some(&caller))?;

    let complaint = state
        .complaints
        .refile(
            id,
            &caller.id,
            non_empty(body.description),
            body.media,
            &attempt.context(&caller),
        )
        .await?;

    Ok(Reply::ok(&json!({
        "success": true,
        "message": "Complaint refiled",
        "complaint": complaint,
    }))
    .with_admission(admission))
}

/// POST /complaints/:id/escalate
pub async fn escalate(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::ComplaintEscalate, Some(id));
    let caller = attempt.authorize(Caller::require_citizen)?;
    let admission = attempt
        .admit(
            Some(&caller),
            RouteClass::Escalate,
            &escalate_identity(id, &caller.id),
        )
        .await?;
    let body: EscalateBody = attempt.body_or_default(Some(&caller))?;

    let complaint = state
        .complaints
        .escalate(id, &caller.id, non_empty(body.reason), &attempt.context(&caller))
        .await?;

    Ok(Reply::ok(&json!({
        "success": true,
        "message": "Complaint escalated",
        "complaint": complaint,
    }))
    .with_admission(admission))
}

/// POST /complaints/trigger-auto-resolution
pub async fn trigger_auto_resolution(state: &AppState, req: &ApiRequest) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::AutoResolutionRun, None);
    let caller = attempt.authorize(Caller::require_supervisor)?;

    let report = state
        .scheduler
        .run_once()
        .await
        .map_err(|e| attempt.refuse(Some(&caller), e))?;

    state.audit().log(
        AuditLogEntry::new(AuditAction::AutoResolutionRun, caller.id.as_str(), caller.user_type())
            .with_request(&attempt.context(&caller))
            .with_details(json!({
                "trigger": "manual",
                "resolved": report.resolved.len(),
                "skipped": report.skipped,
                "notRun": report.not_run,
            })),
    );

    Ok(Reply::ok(&json!({
        "success": true,
        "message": format!("Auto-resolved {} complaint(s)", report.resolved.len()),
        "report": report,
    })))
}

// ---- reads ----

/// GET /complaints (staff view)
pub async fn list_all(state: &AppState, req: &ApiRequest) -> Handled {
    let caller = authenticated(state, req)?;
    caller.require_staff()?;

    let status = req.query_parse::<ComplaintStatus>("status")?;
    let page = req.query_parse::<u64>("page")?.unwrap_or(1);
    let limit = req.query_parse::<u64>("limit")?.unwrap_or(0);

    let (page, cache) = state.complaints.list_all(status, page, limit).await?;
    Ok(Reply::ok(&json!({
        "success": true,
        "complaints": page.data,
        "pagination": page.pagination,
    }))
    .with_cache(cache))
}

/// GET /complaints/mine
pub async fn list_mine(state: &AppState, req: &ApiRequest) -> Handled {
    let caller = authenticated(state, req)?;
    let status = req.query_parse::<ComplaintStatus>("status")?;

    let (complaints, cache) = state.complaints.list_mine(&caller.id, status).await?;
    Ok(Reply::ok(&json!({
        "success": true,
        "count": complaints.len(),
        "complaints": complaints,
    }))
    .with_cache(cache))
}

/// GET /complaints/nearby?lat=&lng=&radius= (or /complaints/nearby/:lat/:lng)
pub async fn nearby(state: &AppState, req: &ApiRequest, path: Option<(&str, &str)>) -> Handled {
    authenticated(state, req)?;

    let (lat, lng) = match path {
        Some((lat, lng)) => (parse_coordinate("lat", lat)?, parse_coordinate("lng", lng)?),
        None => (
            required_coordinate(req, "lat")?,
            required_coordinate(req, "lng")?,
        ),
    };
    let radius = req
        .query_parse::<f64>("radius")?
        .unwrap_or(DEFAULT_NEARBY_RADIUS_KM);

    let (complaints, cache) = state.complaints.nearby(lat, lng, radius).await?;
    let complaints: Vec<Value> = complaints
        .into_iter()
        .map(|c| {
            let distance = c
                .location
                .coordinates()
                .map(|at| (haversine_km((lat, lng), at) * 100.0).round() / 100.0);
            let mut value = serde_json::to_value(&c).unwrap_or(Value::Null);
            if let (Value::Object(map), Some(distance)) = (&mut value, distance) {
                map.insert("distance".into(), json!(distance));
            }
            value
        })
        .collect();

    Ok(Reply::ok(&json!({
        "success": true,
        "search_location": { "lat": lat, "lng": lng, "radius": radius },
        "count": complaints.len(),
        "complaints": complaints,
    }))
    .with_cache(cache))
}

fn parse_coordinate(name: &str, raw: &str) -> std::result::Result<f64, Reply> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            Reply::from(GrievanceError::Validation(format!(
                "Invalid {}: must be a number",
                name
            )))
        })
}

fn required_coordinate(req: &ApiRequest, name: &str) -> std::result::Result<f64, Reply> {
    let raw = req.query_param(name).ok_or_else(|| {
        Reply::from(GrievanceError::Validation(format!("Query parameter '{}' is required", name)))
    })?;
    parse_coordinate(name, raw)
}

/// GET /complaints/:id
pub async fn get(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    let caller = authenticated(state, req)?;

    let (complaint, cache) = state.complaints.get(id).await?;

    // Staff access to citizen records is audited
    if caller.is_staff() {
        state.audit().log(
            AuditLogEntry::new(AuditAction::ComplaintView, caller.id.as_str(), caller.user_type())
                .with_resource(ResourceType::Complaint, id)
                .with_request(&caller.context(req.context())),
        );
    }

    Ok(Reply::ok(&json!({
        "success": true,
        "complaint": complaint,
    }))
    .with_cache(cache))
}

/// GET /complaints/:id/history
pub async fn history(state: &AppState, req: &ApiRequest, id: &str) -> Handled {
    authenticated(state, req)?;

    let (history, cache) = state.complaints.history(id).await?;
    Ok(Reply::ok(&json!({
        "success": true,
        "history": history,
    }))
    .with_cache(cache))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body() {
        let body: StatusBody = serde_json::from_str(
            r#"{"status":"in_progress","comment":"Crew dispatched","expected_resolution_date":"2025-01-10T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(body.status, ComplaintStatus::InProgress);
        assert!(body.media.is_empty());
        assert!(body.expected_resolution_date.is_some());

        assert!(serde_json::from_str::<StatusBody>(r#"{"status":"closed"}"#).is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" late ".into())).as_deref(), Some("late"));
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate("lat", "12.5").unwrap(), 12.5);
        assert!(parse_coordinate("lat", "north").is_err());
        assert!(parse_coordinate("lat", "NaN").is_err());
    }
}
