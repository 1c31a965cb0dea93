//! Complaint document schema
//!
//! Mirrors [`Complaint`] with BSON dates so range filters on `updated_at`
//! and `created_at` compare as dates, not strings.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::complaint::{
    ActionEntry, ActionKind, ActorType, Complaint, ComplaintCategory, ComplaintStatus, Location,
    Media, Refile,
};
use crate::db::mongo::IntoIndexes;

/// Collection name for complaints
pub const COMPLAINT_COLLECTION: &str = "complaints";

/// Action history entry as stored
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionDoc {
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub action: ActionKind,
    pub timestamp: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl From<&ActionEntry> for ActionDoc {
    fn from(a: &ActionEntry) -> Self {
        Self {
            actor_type: a.actor_type,
            actor_id: a.actor_id.clone(),
            action: a.action,
            timestamp: DateTime::from_chrono(a.timestamp),
            comment: a.comment.clone(),
            media: a.media.clone(),
        }
    }
}

impl From<ActionDoc> for ActionEntry {
    fn from(d: ActionDoc) -> Self {
        Self {
            actor_type: d.actor_type,
            actor_id: d.actor_id,
            action: d.action,
            timestamp: d.timestamp.to_chrono(),
            comment: d.comment,
            media: d.media,
        }
    }
}

/// Refile record as stored
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefileDoc {
    pub citizen_id: String,
    pub description: String,
    #[serde(default)]
    pub media: Vec<Media>,
    pub location: Location,
    pub created_at: DateTime,
}

impl From<&Refile> for RefileDoc {
    fn from(r: &Refile) -> Self {
        Self {
            citizen_id: r.citizen_id.clone(),
            description: r.description.clone(),
            media: r.media.clone(),
            location: r.location.clone(),
            created_at: DateTime::from_chrono(r.created_at),
        }
    }
}

impl From<RefileDoc> for Refile {
    fn from(d: RefileDoc) -> Self {
        Self {
            citizen_id: d.citizen_id,
            description: d.description,
            media: d.media,
            location: d.location,
            created_at: d.created_at.to_chrono(),
        }
    }
}

/// Complaint document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ComplaintDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    pub complaint_id: String,
    pub citizen_id: String,
    pub description: String,
    #[serde(default)]
    pub category: ComplaintCategory,
    pub location: Location,
    #[serde(default)]
    pub media: Vec<Media>,
    pub status: ComplaintStatus,
    #[serde(default)]
    pub upvoters: Vec<String>,
    #[serde(default)]
    pub confirmations: Vec<String>,
    #[serde(default)]
    pub refiles: Vec<RefileDoc>,
    #[serde(default)]
    pub actions: Vec<ActionDoc>,
    #[serde(default)]
    pub danger_score: f64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_resolution_date: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl From<&Complaint> for ComplaintDoc {
    fn from(c: &Complaint) -> Self {
        Self {
            _id: None,
            complaint_id: c.complaint_id.clone(),
            citizen_id: c.citizen_id.clone(),
            description: c.description.clone(),
            category: c.category,
            location: c.location.clone(),
            media: c.media.clone(),
            status: c.status,
            upvoters: c.upvoters.clone(),
            confirmations: c.confirmations.clone(),
            refiles: c.refiles.iter().map(RefileDoc::from).collect(),
            actions: c.actions.iter().map(ActionDoc::from).collect(),
            danger_score: c.danger_score,
            priority: i32::from(c.priority),
            expected_resolution_date: c.expected_resolution_date.map(DateTime::from_chrono),
            resolved_at: c.resolved_at.map(DateTime::from_chrono),
            created_at: DateTime::from_chrono(c.created_at),
            updated_at: DateTime::from_chrono(c.updated_at),
        }
    }
}

impl From<ComplaintDoc> for Complaint {
    fn from(d: ComplaintDoc) -> Self {
        Self {
            complaint_id: d.complaint_id,
            citizen_id: d.citizen_id,
            description: d.description,
            category: d.category,
            location: d.location,
            media: d.media,
            status: d.status,
            upvoters: d.upvoters,
            confirmations: d.confirmations,
            refiles: d.refiles.into_iter().map(Refile::from).collect(),
            actions: d.actions.into_iter().map(ActionEntry::from).collect(),
            danger_score: d.danger_score,
            priority: d.priority.clamp(0, 100) as u8,
            expected_resolution_date: d.expected_resolution_date.map(|t| t.to_chrono()),
            resolved_at: d.resolved_at.map(|t| t.to_chrono()),
            created_at: d.created_at.to_chrono(),
            updated_at: d.updated_at.to_chrono(),
        }
    }
}

impl IntoIndexes for ComplaintDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "complaint_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("complaint_id_unique".to_string())
                        .build(),
                ),
            ),
            // Citizen's own list, newest first
            (
                doc! { "citizen_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("citizen_created_index".to_string())
                        .build(),
                ),
            ),
            // Staff list and the stale sweep
            (
                doc! { "status": 1, "updated_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_updated_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "location.lat": 1, "location.lng": 1 },
                Some(
                    IndexOptions::builder()
                        .name("location_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
