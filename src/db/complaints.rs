//! MongoDB complaint store
//!
//! Every command becomes one conditional `find_one_and_update`. The filter
//! carries the guard (status predecessors, set membership, staleness) so the
//! database decides atomically; the pre-image comes back and the pure
//! transition recomputes the post-image locally. When the filter misses, the
//! current document is re-read to name the rejection.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime as BsonDateTime, Document};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use mongodb::options::{ReturnDocument, UpdateModifications};
use tracing::{debug, warn};

use super::mongo::{is_duplicate_key, MongoClient, MongoCollection};
use super::schemas::{
    ActionDoc, ComplaintDoc, SubmissionClaimDoc, COMPLAINT_COLLECTION,
    SUBMISSION_CLAIM_COLLECTION,
};
use crate::complaint::transitions::{
    self, auto_resolved_action, confirmation_action, escalation_action, refile_action,
    status_action, Command, CONFIRMATIONS_TO_RESOLVE, CONFIRMATION_RESOLVE_COMMENT,
    STALE_RESOLVE_COMMENT,
};
use crate::complaint::{
    haversine_km, Applied, Complaint, ComplaintQuery, ComplaintStatus, ComplaintStore,
};
use crate::types::{GrievanceError, Page, Pagination, Result};

/// Attempts before giving up on a document that keeps changing under us
const MAX_APPLY_ATTEMPTS: usize = 3;

/// Upper bound on documents pulled for the nearby distance filter
const NEARBY_SCAN_LIMIT: i64 = 1000;

const KM_PER_DEGREE: f64 = 111.32;

pub struct MongoComplaintStore {
    complaints: MongoCollection<ComplaintDoc>,
    claims: MongoCollection<SubmissionClaimDoc>,
}

impl MongoComplaintStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            complaints: client.collection(COMPLAINT_COLLECTION).await?,
            claims: client.collection(SUBMISSION_CLAIM_COLLECTION).await?,
        })
    }

    async fn fetch(&self, complaint_id: &str) -> Result<Option<Complaint>> {
        let found = self
            .complaints
            .inner()
            .find_one(doc! { "complaint_id": complaint_id })
            .await?;
        Ok(found.map(Complaint::from))
    }
}

fn bson_time(t: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(t)
}

fn action_bson(entry: &crate::complaint::ActionEntry) -> Result<Bson> {
    Ok(bson::to_bson(&ActionDoc::from(entry))?)
}

/// Filter and update expressing `command` as one conditional write
fn conditional_update(
    complaint_id: &str,
    command: &Command,
    now: DateTime<Utc>,
) -> Result<(Document, UpdateModifications)> {
    let at = bson_time(now);
    let resolved = ComplaintStatus::Resolved.as_str();

    let plan = match command {
        Command::UpdateStatus(update) => {
            let from: Vec<&str> = ComplaintStatus::predecessors(update.status)
                .iter()
                .map(|s| s.as_str())
                .collect();
            let filter = doc! {
                "complaint_id": complaint_id,
                "status": { "$in": from },
            };

            let mut set = doc! { "status": update.status.as_str(), "updated_at": at };
            if let Some(eta) = update.expected_resolution_date {
                set.insert("expected_resolution_date", bson_time(eta));
            }
            if update.status == ComplaintStatus::Resolved {
                set.insert("resolved_at", at);
                set.insert("upvoters", Bson::Array(vec![]));
            }
            let action = action_bson(&status_action(update, now))?;
            (
                filter,
                UpdateModifications::Document(doc! { "$set": set, "$push": { "actions": action } }),
            )
        }

        Command::Upvote { citizen_id } => (
            doc! {
                "complaint_id": complaint_id,
                "status": { "$ne": resolved },
                "upvoters": { "$ne": citizen_id },
            },
            UpdateModifications::Document(doc! {
                "$addToSet": { "upvoters": citizen_id },
                "$set": { "updated_at": at },
            }),
        ),

        Command::Confirm { citizen_id } => {
            // The count in the comment is computed server-side below
            let mut confirm =
                bson::to_document(&ActionDoc::from(&confirmation_action(citizen_id, 0, now)))?;
            confirm.insert(
                "comment",
                doc! { "$concat": [
                    "Citizen confirmed resolution (",
                    { "$toString": { "$size": "$confirmations" } },
                    " confirmations)",
                ]},
            );
            confirm.insert("actor_id", doc! { "$literal": citizen_id });
            let auto = action_bson(&auto_resolved_action(CONFIRMATION_RESOLVE_COMMENT, now))?;
            let threshold = doc! {
                "$gte": [ { "$size": "$confirmations" }, CONFIRMATIONS_TO_RESOLVE as i32 ]
            };

            let pipeline = vec![
                doc! { "$set": {
                    "confirmations": { "$concatArrays": [
                        { "$ifNull": ["$confirmations", []] },
                        [ { "$literal": citizen_id } ],
                    ]},
                    "actions": { "$ifNull": ["$actions", []] },
                    "updated_at": at,
                }},
                doc! { "$set": {
                    "actions": { "$concatArrays": ["$actions", [confirm]] },
                }},
                // Threshold reached: resolve in the same write
                doc! { "$set": {
                    "status": { "$cond": [threshold.clone(), resolved, "$status"] },
                    "resolved_at": { "$cond": [threshold.clone(), at, "$resolved_at"] },
                    "upvoters": { "$cond": [threshold.clone(), { "$literal": [] }, "$upvoters"] },
                    "actions": { "$cond": [
                        threshold,
                        { "$concatArrays": ["$actions", [ { "$literal": auto } ]] },
                        "$actions",
                    ]},
                }},
            ];
            (
                doc! {
                    "complaint_id": complaint_id,
                    "status": { "$ne": resolved },
                    "confirmations": { "$ne": citizen_id },
                },
                UpdateModifications::Pipeline(pipeline),
            )
        }

        Command::Refile {
            citizen_id,
            description,
            media,
        } => {
            let description = description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty());
            let media_bson = bson::to_bson(media)?;
            // Without new text the refile repeats the complaint's own description
            let description_expr = match description {
                Some(d) => Bson::Document(doc! { "$literal": d }),
                None => Bson::String("$description".into()),
            };
            let refile = doc! {
                "citizen_id": { "$literal": citizen_id },
                "description": description_expr,
                "media": { "$literal": media_bson },
                "location": "$location",
                "created_at": at,
            };
            let action = action_bson(&refile_action(citizen_id, media, now))?;
            let pipeline = vec![doc! { "$set": {
                "refiles": { "$concatArrays": [ { "$ifNull": ["$refiles", []] }, [refile] ] },
                "actions": { "$concatArrays": [
                    { "$ifNull": ["$actions", []] },
                    [ { "$literal": action } ],
                ]},
                "updated_at": at,
            }}];
            (
                doc! { "complaint_id": complaint_id },
                UpdateModifications::Pipeline(pipeline),
            )
        }

        Command::Escalate { citizen_id, reason } => {
            let action = action_bson(&escalation_action(citizen_id, reason.as_deref(), now))?;
            (
                doc! { "complaint_id": complaint_id, "status": { "$ne": resolved } },
                UpdateModifications::Document(doc! {
                    "$push": { "actions": action },
                    "$set": { "updated_at": at },
                }),
            )
        }

        Command::ResolveStale { cutoff } => {
            let action = action_bson(&auto_resolved_action(STALE_RESOLVE_COMMENT, now))?;
            (
                doc! {
                    "complaint_id": complaint_id,
                    "status": ComplaintStatus::AwaitingConfirmation.as_str(),
                    "updated_at": { "$lt": bson_time(*cutoff) },
                },
                UpdateModifications::Document(doc! {
                    "$set": {
                        "status": resolved,
                        "resolved_at": at,
                        "updated_at": at,
                        "upvoters": [],
                    },
                    "$push": { "actions": action },
                }),
            )
        }
    };

    Ok(plan)
}

/// Bounding box around a point, in degrees
fn bounding_box(lat: f64, lng: f64, radius_km: f64) -> (f64, f64, f64, f64) {
    let dlat = radius_km / KM_PER_DEGREE;
    let dlng = radius_km / (KM_PER_DEGREE * lat.to_radians().cos().abs().max(0.01));
    (lat - dlat, lat + dlat, lng - dlng, lng + dlng)
}

#[async_trait]
impl ComplaintStore for MongoComplaintStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn claim_submission(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        // Matches only an expired claim; an active one makes the upsert
        // collide on _id
        let result = self
            .claims
            .inner()
            .update_one(
                doc! { "_id": fingerprint, "claimed_at": { "$lt": bson_time(now - window) } },
                doc! { "$set": { "claimed_at": bson_time(now) } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_submission(&self, fingerprint: &str) -> Result<()> {
        self.claims
            .inner()
            .delete_one(doc! { "_id": fingerprint })
            .await?;
        Ok(())
    }

    async fn insert(&self, complaint: &Complaint) -> Result<()> {
        self.complaints
            .inner()
            .insert_one(ComplaintDoc::from(complaint))
            .await?;
        Ok(())
    }

    async fn get(&self, complaint_id: &str) -> Result<Option<Complaint>> {
        self.fetch(complaint_id).await
    }

    async fn apply(
        &self,
        complaint_id: &str,
        command: &Command,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        transitions::precheck(command)?;

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let (filter, update) = conditional_update(complaint_id, command, now)?;
            let pre_image = self
                .complaints
                .inner()
                .find_one_and_update(filter, update)
                .return_document(ReturnDocument::Before)
                .await?;

            if let Some(doc) = pre_image {
                let before = Complaint::from(doc);
                let after = match transitions::apply(&before, command, now) {
                    Ok(after) => after,
                    Err(e) => {
                        // Filter and pure rule disagree; trust the database
                        warn!(
                            complaint_id = complaint_id,
                            error = %e,
                            "Re-reading complaint after update"
                        );
                        self.fetch(complaint_id).await?.ok_or_else(|| {
                            GrievanceError::NotFound(format!("Complaint {}", complaint_id))
                        })?
                    }
                };
                return Ok(Applied { before, after });
            }

            let Some(current) = self.fetch(complaint_id).await? else {
                return Err(GrievanceError::NotFound(format!("Complaint {}", complaint_id)));
            };
            transitions::apply(&current, command, now)?;

            // The document changed between our write and the re-read
            debug!(
                complaint_id = complaint_id,
                attempt = attempt,
                "Conditional update raced, retrying"
            );
        }

        Err(GrievanceError::Persistence(format!(
            "Complaint {} kept changing during update",
            complaint_id
        )))
    }

    async fn list(&self, query: &ComplaintQuery) -> Result<Page<Complaint>> {
        let (page, limit) = query.window();
        let mut filter = Document::new();
        if let Some(citizen_id) = &query.citizen_id {
            filter.insert("citizen_id", citizen_id);
        }
        if let Some(status) = query.status {
            filter.insert("status", status.as_str());
        }

        let total = self
            .complaints
            .inner()
            .count_documents(filter.clone())
            .await?;
        let pagination = Pagination::new(page, limit, total);

        let cursor = self
            .complaints
            .inner()
            .find(filter)
            .sort(doc! { "created_at": -1, "complaint_id": -1 })
            .skip(pagination.offset())
            .limit(limit as i64)
            .await?;
        let docs: Vec<ComplaintDoc> = cursor.try_collect().await?;

        Ok(Page {
            data: docs.into_iter().map(Complaint::from).collect(),
            pagination,
        })
    }

    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Complaint>> {
        let (min_lat, max_lat, min_lng, max_lng) = bounding_box(lat, lng, radius_km);
        let filter = doc! {
            "status": { "$ne": ComplaintStatus::Resolved.as_str() },
            "location.lat": { "$gte": min_lat, "$lte": max_lat },
            "location.lng": { "$gte": min_lng, "$lte": max_lng },
        };

        let cursor = self
            .complaints
            .inner()
            .find(filter)
            .limit(NEARBY_SCAN_LIMIT)
            .await?;
        let docs: Vec<ComplaintDoc> = cursor.try_collect().await?;

        let mut found: Vec<(f64, Complaint)> = docs
            .into_iter()
            .map(Complaint::from)
            .filter_map(|c| {
                let d = haversine_km((lat, lng), c.location.coordinates()?);
                (d <= radius_km).then_some((d, c))
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn stale_candidates(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let cursor = self
            .complaints
            .inner()
            .clone_with_type::<Document>()
            .find(doc! {
                "status": ComplaintStatus::AwaitingConfirmation.as_str(),
                "updated_at": { "$lt": bson_time(cutoff) },
            })
            .projection(doc! { "complaint_id": 1, "_id": 0 })
            .sort(doc! { "updated_at": 1 })
            .limit(limit as i64)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;

        Ok(docs
            .iter()
            .filter_map(|d| d.get_str("complaint_id").ok().map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complaint::{ActorType, Media, MediaType, StatusUpdate};

    #[test]
    fn test_upvote_guard_in_filter() {
        let cmd = Command::Upvote {
            citizen_id: "c1".into(),
        };
        let (filter, update) = conditional_update("COMP-1", &cmd, Utc::now()).unwrap();
        assert_eq!(filter.get_document("upvoters").unwrap(), &doc! { "$ne": "c1" });
        assert_eq!(
            filter.get_document("status").unwrap(),
            &doc! { "$ne": "resolved" }
        );
        match update {
            UpdateModifications::Document(d) => assert!(d.contains_key("$addToSet")),
            _ => panic!("expected a plain update"),
        }
    }

    #[test]
    fn test_status_guard_lists_predecessors() {
        let cmd = Command::UpdateStatus(StatusUpdate {
            actor_type: ActorType::Staff,
            actor_id: "s1".into(),
            status: ComplaintStatus::Resolved,
            comment: None,
            media: vec![],
            expected_resolution_date: None,
        });
        let (filter, update) = conditional_update("COMP-1", &cmd, Utc::now()).unwrap();
        let allowed = filter
            .get_document("status")
            .unwrap()
            .get_array("$in")
            .unwrap()
            .clone();
        assert_eq!(
            allowed,
            vec![Bson::from("in_progress"), Bson::from("awaiting_confirmation")]
        );
        let UpdateModifications::Document(d) = update else {
            panic!("expected a plain update");
        };
        let set = d.get_document("$set").unwrap();
        assert!(set.contains_key("resolved_at"));
        assert_eq!(set.get_array("upvoters").unwrap().len(), 0);
    }

    #[test]
    fn test_confirm_is_single_pipeline() {
        let cmd = Command::Confirm {
            citizen_id: "c3".into(),
        };
        let (filter, update) = conditional_update("COMP-1", &cmd, Utc::now()).unwrap();
        assert_eq!(
            filter.get_document("confirmations").unwrap(),
            &doc! { "$ne": "c3" }
        );
        let UpdateModifications::Pipeline(stages) = update else {
            panic!("expected a pipeline");
        };
        assert_eq!(stages.len(), 3);
        let last = stages[2].get_document("$set").unwrap();
        for field in ["status", "resolved_at", "upvoters", "actions"] {
            assert!(last.contains_key(field), "missing {}", field);
        }
    }

    #[test]
    fn test_stale_guard_rechecks_both_predicates() {
        let cutoff = Utc::now() - Duration::days(7);
        let cmd = Command::ResolveStale { cutoff };
        let (filter, _) = conditional_update("COMP-1", &cmd, Utc::now()).unwrap();
        assert_eq!(filter.get_str("status").unwrap(), "awaiting_confirmation");
        assert!(filter.get_document("updated_at").unwrap().contains_key("$lt"));
    }

    #[test]
    fn test_refile_keeps_location_server_side() {
        let cmd = Command::Refile {
            citizen_id: "c1".into(),
            description: None,
            media: vec![Media {
                media_type: MediaType::Image,
                url: "https://cdn/x.jpg".into(),
            }],
        };
        let (_, update) = conditional_update("COMP-1", &cmd, Utc::now()).unwrap();
        let UpdateModifications::Pipeline(stages) = update else {
            panic!("expected a pipeline");
        };
        let text = format!("{:?}", stages[0]);
        assert!(text.contains("$location"));
        assert!(text.contains("$description"));
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let (min_lat, max_lat, min_lng, max_lng) = bounding_box(12.97, 77.59, 5.0);
        assert!(min_lat < 12.97 && max_lat > 12.97);
        assert!(haversine_km((12.97, 77.59), (max_lat, 77.59)) >= 4.9);
        assert!(haversine_km((12.97, 77.59), (12.97, max_lng)) >= 4.9);
        assert!(min_lng < 77.59);
    }
}
