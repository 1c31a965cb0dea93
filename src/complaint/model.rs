//! Complaint domain types

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{GrievanceError, Result};

/// Maximum description length accepted from citizens
pub const MAX_DESCRIPTION_LEN: usize = 2000;

/// Lifecycle of a complaint. `Resolved` is terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Unresolved,
    InProgress,
    AwaitingConfirmation,
    Resolved,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 4] = [
        ComplaintStatus::Unresolved,
        ComplaintStatus::InProgress,
        ComplaintStatus::AwaitingConfirmation,
        ComplaintStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::InProgress => "in_progress",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Resolved => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Whether staff may move a complaint from `self` to `next`.
    ///
    /// Re-posting the current status (to add a comment or media) is allowed
    /// for any non-terminal status.
    pub fn can_transition_to(&self, next: ComplaintStatus) -> bool {
        use ComplaintStatus::*;
        match (self, next) {
            (Resolved, _) => false,
            (a, b) if *a == b => true,
            (Unresolved, InProgress | AwaitingConfirmation) => true,
            (InProgress, AwaitingConfirmation | Resolved) => true,
            (AwaitingConfirmation, Resolved) => true,
            _ => false,
        }
    }

    /// Statuses from which `next` can be reached; used as the store-side
    /// guard of a conditional update.
    pub fn predecessors(next: ComplaintStatus) -> Vec<ComplaintStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = GrievanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unresolved" => Ok(Self::Unresolved),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "awaiting_confirmation" | "awaiting-confirmation" => Ok(Self::AwaitingConfirmation),
            "resolved" => Ok(Self::Resolved),
            other => Err(GrievanceError::Validation(format!(
                "Unknown status '{}'",
                other
            ))),
        }
    }
}

/// Who performed an action on a complaint
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Citizen,
    Staff,
    Supervisor,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Staff => "staff",
            Self::Supervisor => "supervisor",
            Self::System => "system",
        }
    }

    /// Staff and supervisors operate complaints on behalf of the city
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Staff | Self::Supervisor)
    }
}

/// Named entries in a complaint's action history
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Created,
    StatusUpdated,
    ConfirmedResolution,
    AutoResolved,
    Refiled,
    Escalated,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusUpdated => "status_updated",
            Self::ConfirmedResolution => "confirmed_resolution",
            Self::AutoResolved => "auto_resolved",
            Self::Refiled => "refiled",
            Self::Escalated => "escalated",
        }
    }
}

/// Complaint category, used as a scoring hint
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintCategory {
    MedicalEmergency,
    Fire,
    Violence,
    Accident,
    ElectricalHazard,
    WaterLeakage,
    RoadDamage,
    Garbage,
    StreetLight,
    #[default]
    Other,
}

impl ComplaintCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalEmergency => "medical_emergency",
            Self::Fire => "fire",
            Self::Violence => "violence",
            Self::Accident => "accident",
            Self::ElectricalHazard => "electrical_hazard",
            Self::WaterLeakage => "water_leakage",
            Self::RoadDamage => "road_damage",
            Self::Garbage => "garbage",
            Self::StreetLight => "street_light",
            Self::Other => "other",
        }
    }

    /// Base risk on the 0-100 scale before keyword and media adjustments
    pub fn base_risk(&self) -> f64 {
        match self {
            Self::MedicalEmergency => 95.0,
            Self::Fire => 90.0,
            Self::Violence => 85.0,
            Self::Accident => 80.0,
            Self::ElectricalHazard => 75.0,
            Self::WaterLeakage => 60.0,
            Self::RoadDamage => 55.0,
            Self::Garbage => 40.0,
            Self::StreetLight => 35.0,
            Self::Other => 30.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// Reference to an uploaded photo or video
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Media {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: String,
}

/// Where the problem is. Coordinates are optional, the address is not.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub address: String,
}

impl Location {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(GrievanceError::Validation("Location address is required".into()));
        }
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
                    return Err(GrievanceError::Validation(
                        "Latitude must be between -90 and 90".into(),
                    ));
                }
                if !(-180.0..=180.0).contains(&lng) || !lng.is_finite() {
                    return Err(GrievanceError::Validation(
                        "Longitude must be between -180 and 180".into(),
                    ));
                }
                Ok(())
            }
            (None, None) => Ok(()),
            _ => Err(GrievanceError::Validation(
                "Latitude and longitude must be given together".into(),
            )),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lng)
    }
}

/// A citizen re-raising the complaint with new evidence
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Refile {
    pub citizen_id: String,
    pub description: String,
    pub media: Vec<Media>,
    /// Copied from the original complaint
    pub location: Location,
    pub created_at: DateTime<Utc>,
}

/// One entry in the append-only action history
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionEntry {
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub action: ActionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl ActionEntry {
    pub fn new(
        actor_type: ActorType,
        actor_id: Option<&str>,
        action: ActionKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.map(str::to_string),
            action,
            timestamp,
            comment: None,
            media: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_media(mut self, media: Vec<Media>) -> Self {
        self.media = media;
        self
    }
}

/// A tracked civic complaint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Complaint {
    pub complaint_id: String,
    pub citizen_id: String,
    pub description: String,
    #[serde(default)]
    pub category: ComplaintCategory,
    pub location: Location,
    #[serde(default)]
    pub media: Vec<Media>,
    pub status: ComplaintStatus,
    /// Citizens who upvoted; never contains duplicates
    #[serde(default)]
    pub upvoters: Vec<String>,
    /// Citizens who confirmed the fix; never contains duplicates
    #[serde(default)]
    pub confirmations: Vec<String>,
    #[serde(default)]
    pub refiles: Vec<Refile>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    /// 0-10, from the scoring collaborator
    pub danger_score: f64,
    /// 0-100, derived from danger score
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_resolution_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    pub fn upvote_count(&self) -> usize {
        self.upvoters.len()
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }
}

/// Citizen input for a new complaint
#[derive(Deserialize, Clone, Debug)]
pub struct NewComplaint {
    #[serde(default)]
    pub citizen_id: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<ComplaintCategory>,
    pub location: Location,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl NewComplaint {
    pub fn validate(&self) -> Result<()> {
        if self.citizen_id.trim().is_empty() {
            return Err(GrievanceError::Validation("Citizen id is required".into()));
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(GrievanceError::Validation("Description is required".into()));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(GrievanceError::Validation(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        self.location.validate()?;
        validate_media(&self.media)
    }
}

pub fn validate_media(media: &[Media]) -> Result<()> {
    if media.iter().any(|m| m.url.trim().is_empty()) {
        return Err(GrievanceError::Validation("Media url must not be empty".into()));
    }
    Ok(())
}

/// Generate `COMP-{base36 millis}-{5 base36 chars}`, upper-case.
pub fn generate_complaint_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!(
        "COMP-{}-{}",
        to_base36(now.timestamp_millis().max(0) as u64),
        suffix
    )
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Great-circle distance in kilometres
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}
