//! Pure complaint transitions
//!
//! Every mutation is a [`Command`]. [`apply`] takes the current complaint and
//! returns the next value or a typed rejection; [`effects`] lists what must
//! happen after the new value is committed. Neither touches I/O, so a store
//! can run `apply` under its own per-document atomicity and the state machine
//! can derive side effects from the before/after pair.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::model::{
    ActionEntry, ActionKind, ActorType, Complaint, ComplaintStatus, Media, Refile,
};
use crate::audit::AuditAction;
use crate::cache::CacheKeys;
use crate::notify::{is_upvote_milestone, Notification};
use crate::types::{GrievanceError, Result};

/// Distinct confirmations that resolve a complaint
pub const CONFIRMATIONS_TO_RESOLVE: usize = 3;

pub const CONFIRMATION_RESOLVE_COMMENT: &str =
    "Automatically resolved after 3+ citizen confirmations";

pub const STALE_RESOLVE_COMMENT: &str =
    "Automatically resolved after 7 days in awaiting_confirmation status";

/// Staff status change request
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub actor_type: ActorType,
    pub actor_id: String,
    pub status: ComplaintStatus,
    pub comment: Option<String>,
    pub media: Vec<Media>,
    pub expected_resolution_date: Option<DateTime<Utc>>,
}

/// A mutation of an existing complaint
#[derive(Debug, Clone)]
pub enum Command {
    UpdateStatus(StatusUpdate),
    Upvote {
        citizen_id: String,
    },
    Confirm {
        citizen_id: String,
    },
    Refile {
        citizen_id: String,
        description: Option<String>,
        media: Vec<Media>,
    },
    Escalate {
        citizen_id: String,
        reason: Option<String>,
    },
    /// Resolve if still awaiting confirmation and untouched since `cutoff`
    ResolveStale {
        cutoff: DateTime<Utc>,
    },
}

impl Command {
    pub fn audit_action(&self) -> AuditAction {
        match self {
            Self::UpdateStatus(_) => AuditAction::ComplaintStatusChange,
            Self::Upvote { .. } => AuditAction::ComplaintUpvote,
            Self::Confirm { .. } => AuditAction::ComplaintConfirm,
            Self::Refile { .. } => AuditAction::ComplaintRefile,
            Self::Escalate { .. } => AuditAction::ComplaintEscalate,
            Self::ResolveStale { .. } => AuditAction::ComplaintAutoResolve,
        }
    }

    /// Actor performing the command
    pub fn actor(&self) -> (ActorType, &str) {
        match self {
            Self::UpdateStatus(u) => (u.actor_type, u.actor_id.as_str()),
            Self::Upvote { citizen_id }
            | Self::Confirm { citizen_id }
            | Self::Refile { citizen_id, .. }
            | Self::Escalate { citizen_id, .. } => (ActorType::Citizen, citizen_id.as_str()),
            Self::ResolveStale { .. } => (ActorType::System, "system"),
        }
    }
}

/// Side effect to run after a committed mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Key patterns to delete from the read cache
    InvalidateCache(Vec<String>),
    /// Audit entry describing the change
    Audit {
        action: AuditAction,
        actor_type: ActorType,
        actor_id: String,
        complaint_id: String,
        details: serde_json::Value,
    },
    Notify(Notification),
}

pub fn created_action(citizen_id: &str, now: DateTime<Utc>) -> ActionEntry {
    ActionEntry::new(ActorType::Citizen, Some(citizen_id), ActionKind::Created, now)
        .with_comment("Complaint submitted")
}

pub fn confirmation_action(citizen_id: &str, count: usize, now: DateTime<Utc>) -> ActionEntry {
    ActionEntry::new(
        ActorType::Citizen,
        Some(citizen_id),
        ActionKind::ConfirmedResolution,
        now,
    )
    .with_comment(format!("Citizen confirmed resolution ({} confirmations)", count))
}

pub fn auto_resolved_action(comment: &str, now: DateTime<Utc>) -> ActionEntry {
    ActionEntry::new(ActorType::System, None, ActionKind::AutoResolved, now).with_comment(comment)
}

pub fn status_action(update: &StatusUpdate, now: DateTime<Utc>) -> ActionEntry {
    let comment = update
        .comment
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| format!("Status changed to {}", update.status));
    ActionEntry::new(
        update.actor_type,
        Some(&update.actor_id),
        ActionKind::StatusUpdated,
        now,
    )
    .with_comment(comment)
    .with_media(update.media.clone())
}

pub fn refile_action(citizen_id: &str, media: &[Media], now: DateTime<Utc>) -> ActionEntry {
    ActionEntry::new(ActorType::Citizen, Some(citizen_id), ActionKind::Refiled, now)
        .with_comment("Complaint refiled with new evidence")
        .with_media(media.to_vec())
}

pub fn escalation_action(citizen_id: &str, reason: Option<&str>, now: DateTime<Utc>) -> ActionEntry {
    let comment = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Escalated by citizen");
    ActionEntry::new(ActorType::Citizen, Some(citizen_id), ActionKind::Escalated, now)
        .with_comment(comment)
}

/// Refile record; the location is always the complaint's own
pub fn refile_entry(
    complaint: &Complaint,
    citizen_id: &str,
    description: Option<&str>,
    media: &[Media],
    now: DateTime<Utc>,
) -> Refile {
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(&complaint.description)
        .to_string();
    Refile {
        citizen_id: citizen_id.to_string(),
        description,
        media: media.to_vec(),
        location: complaint.location.clone(),
        created_at: now,
    }
}

fn mark_resolved(c: &mut Complaint, now: DateTime<Utc>) {
    c.status = ComplaintStatus::Resolved;
    c.resolved_at = Some(now);
    c.upvoters.clear();
}

fn terminal(c: &Complaint, what: &str) -> GrievanceError {
    GrievanceError::InvalidTransition(format!(
        "Cannot {} complaint {}: it is already resolved",
        what, c.complaint_id
    ))
}

/// Checks that depend only on the command, not on the complaint
pub fn precheck(command: &Command) -> Result<()> {
    match command {
        Command::UpdateStatus(update) if !update.actor_type.is_staff() => Err(
            GrievanceError::Forbidden("Only staff can update complaint status".into()),
        ),
        Command::Refile { media, .. } if media.is_empty() => Err(GrievanceError::Validation(
            "A refile needs at least one photo or video".into(),
        )),
        _ => Ok(()),
    }
}

/// Compute the complaint after `command`, or reject it.
pub fn apply(current: &Complaint, command: &Command, now: DateTime<Utc>) -> Result<Complaint> {
    precheck(command)?;
    let mut next = current.clone();

    match command {
        Command::UpdateStatus(update) => {
            if !current.status.can_transition_to(update.status) {
                return Err(GrievanceError::InvalidTransition(format!(
                    "Cannot move complaint {} from {} to {}",
                    current.complaint_id, current.status, update.status
                )));
            }
            next.status = update.status;
            if update.expected_resolution_date.is_some() {
                next.expected_resolution_date = update.expected_resolution_date;
            }
            next.actions.push(status_action(update, now));
            if update.status == ComplaintStatus::Resolved {
                mark_resolved(&mut next, now);
            }
        }

        Command::Upvote { citizen_id } => {
            if current.status.is_terminal() {
                return Err(terminal(current, "upvote"));
            }
            if current.upvoters.iter().any(|u| u == citizen_id) {
                return Err(GrievanceError::Duplicate(format!(
                    "Citizen {} already upvoted {}",
                    citizen_id, current.complaint_id
                )));
            }
            next.upvoters.push(citizen_id.clone());
        }

        Command::Confirm { citizen_id } => {
            if current.status.is_terminal() {
                return Err(terminal(current, "confirm"));
            }
            if current.confirmations.iter().any(|c| c == citizen_id) {
                return Err(GrievanceError::Duplicate(format!(
                    "Citizen {} already confirmed {}",
                    citizen_id, current.complaint_id
                )));
            }
            next.confirmations.push(citizen_id.clone());
            next.actions.push(confirmation_action(
                citizen_id,
                next.confirmations.len(),
                now,
            ));
            if next.confirmations.len() >= CONFIRMATIONS_TO_RESOLVE {
                mark_resolved(&mut next, now);
                next.actions
                    .push(auto_resolved_action(CONFIRMATION_RESOLVE_COMMENT, now));
            }
        }

        Command::Refile {
            citizen_id,
            description,
            media,
        } => {
            let refile = refile_entry(current, citizen_id, description.as_deref(), media, now);
            next.refiles.push(refile);
            next.actions.push(refile_action(citizen_id, media, now));
        }

        Command::Escalate { citizen_id, reason } => {
            if current.status.is_terminal() {
                return Err(terminal(current, "escalate"));
            }
            next.actions
                .push(escalation_action(citizen_id, reason.as_deref(), now));
        }

        Command::ResolveStale { cutoff } => {
            if current.status != ComplaintStatus::AwaitingConfirmation {
                return Err(GrievanceError::InvalidTransition(format!(
                    "Complaint {} is {}, not awaiting confirmation",
                    current.complaint_id, current.status
                )));
            }
            if current.updated_at >= *cutoff {
                return Err(GrievanceError::InvalidTransition(format!(
                    "Complaint {} was updated after the cutoff",
                    current.complaint_id
                )));
            }
            mark_resolved(&mut next, now);
            next.actions.push(auto_resolved_action(STALE_RESOLVE_COMMENT, now));
        }
    }

    next.updated_at = now;
    Ok(next)
}

/// Effects of a new complaint
pub fn creation_effects(created: &Complaint, high_danger_threshold: f64) -> Vec<Effect> {
    let mut effects = vec![
        Effect::InvalidateCache(CacheKeys::affected_by(
            &created.complaint_id,
            &created.citizen_id,
        )),
        Effect::Audit {
            action: AuditAction::ComplaintCreate,
            actor_type: ActorType::Citizen,
            actor_id: created.citizen_id.clone(),
            complaint_id: created.complaint_id.clone(),
            details: json!({
                "category": created.category.as_str(),
                "dangerScore": created.danger_score,
                "priority": created.priority,
                "address": created.location.address,
            }),
        },
    ];
    if created.danger_score >= high_danger_threshold {
        effects.push(Effect::Notify(Notification::HighDanger {
            complaint_id: created.complaint_id.clone(),
            danger_score: created.danger_score,
            address: created.location.address.clone(),
        }));
    }
    effects
}

/// Effects of a committed command, derived from the before/after pair.
///
/// Invalidation always comes first so that later effects never observe a
/// cache older than the commit.
pub fn effects(command: &Command, before: &Complaint, after: &Complaint) -> Vec<Effect> {
    let (actor_type, actor_id) = command.actor();
    let mut effects = vec![Effect::InvalidateCache(CacheKeys::affected_by(
        &after.complaint_id,
        &after.citizen_id,
    ))];

    let details = match command {
        Command::UpdateStatus(u) => json!({
            "from": before.status,
            "to": after.status,
            "comment": u.comment,
            "expectedResolutionDate": u.expected_resolution_date,
        }),
        Command::Upvote { .. } => json!({ "upvotes": after.upvote_count() }),
        Command::Confirm { .. } => json!({
            "confirmations": after.confirmation_count(),
            "resolved": after.status == ComplaintStatus::Resolved,
        }),
        Command::Refile { media, .. } => json!({
            "refiles": after.refiles.len(),
            "mediaCount": media.len(),
        }),
        Command::Escalate { reason, .. } => json!({ "reason": reason }),
        Command::ResolveStale { cutoff } => json!({
            "reason": "stale_awaiting_confirmation",
            "cutoff": cutoff,
        }),
    };

    effects.push(Effect::Audit {
        action: command.audit_action(),
        actor_type,
        actor_id: actor_id.to_string(),
        complaint_id: after.complaint_id.clone(),
        details,
    });

    // Confirmation that crossed the threshold gets its own system entry
    if matches!(command, Command::Confirm { .. })
        && before.status != ComplaintStatus::Resolved
        && after.status == ComplaintStatus::Resolved
    {
        effects.push(Effect::Audit {
            action: AuditAction::ComplaintAutoResolve,
            actor_type: ActorType::System,
            actor_id: "system".to_string(),
            complaint_id: after.complaint_id.clone(),
            details: json!({
                "reason": "confirmation_threshold",
                "confirmations": after.confirmation_count(),
            }),
        });
    }

    if before.status != after.status {
        effects.push(Effect::Notify(Notification::StatusChanged {
            complaint_id: after.complaint_id.clone(),
            citizen_id: after.citizen_id.clone(),
            from: before.status,
            to: after.status,
        }));
    }

    if let Command::Upvote { .. } = command {
        let count = after.upvote_count();
        if is_upvote_milestone(count) {
            effects.push(Effect::Notify(Notification::UpvoteMilestone {
                complaint_id: after.complaint_id.clone(),
                citizen_id: after.citizen_id.clone(),
                upvotes: count,
            }));
        }
    }

    effects
}
