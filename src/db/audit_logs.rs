//! MongoDB audit store

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime, Document};
use futures_util::TryStreamExt;

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::{AuditLogDoc, AUDIT_LOG_COLLECTION};
use crate::audit::{AuditFilter, AuditLogEntry, AuditSort, AuditStats, AuditStore};
use crate::types::Result;

pub struct MongoAuditStore {
    logs: MongoCollection<AuditLogDoc>,
}

impl MongoAuditStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            logs: client.collection(AUDIT_LOG_COLLECTION).await?,
        })
    }
}

/// Translate an [`AuditFilter`] into a query document
pub fn filter_document(filter: &AuditFilter) -> Document {
    let mut query = Document::new();
    if let Some(user_id) = &filter.user_id {
        query.insert("user_id", user_id);
    }
    if let Some(user_type) = filter.user_type {
        query.insert("user_type", user_type.as_str());
    }
    if let Some(action) = &filter.action {
        query.insert("action", action);
    }
    if let Some(resource_type) = filter.resource_type {
        query.insert("resource_type", resource_type.as_str());
    }
    if let Some(resource_id) = &filter.resource_id {
        query.insert("resource_id", resource_id);
    }
    if let Some(department_id) = &filter.department_id {
        query.insert("department_id", department_id);
    }
    if let Some(success) = filter.success {
        query.insert("success", success);
    }

    let mut range = Document::new();
    if let Some(from) = filter.from {
        range.insert("$gte", BsonDateTime::from_chrono(from));
    }
    if let Some(to) = filter.to {
        range.insert("$lte", BsonDateTime::from_chrono(to));
    }
    if !range.is_empty() {
        query.insert("timestamp", range);
    }
    query
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.logs.inner().insert_one(AuditLogDoc::from(entry)).await?;
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        sort: AuditSort,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<AuditLogEntry>> {
        let direction = match sort {
            AuditSort::NewestFirst => -1,
            AuditSort::OldestFirst => 1,
        };
        let cursor = self
            .logs
            .inner()
            .find(filter_document(filter))
            .sort(doc! { "timestamp": direction })
            .skip(skip)
            .limit(limit as i64)
            .await?;
        let docs: Vec<AuditLogDoc> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(AuditLogEntry::from).collect())
    }

    async fn count(&self, filter: &AuditFilter) -> Result<u64> {
        Ok(self
            .logs
            .inner()
            .count_documents(filter_document(filter))
            .await?)
    }

    async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats> {
        let pipeline = vec![
            doc! { "$match": filter_document(filter) },
            doc! { "$group": {
                "_id": { "action": "$action", "success": "$success" },
                "count": { "$sum": 1 },
            }},
        ];
        let cursor = self.logs.inner().aggregate(pipeline).await?;
        let groups: Vec<Document> = cursor.try_collect().await?;

        let mut stats = AuditStats::default();
        for group in groups {
            let count = match group.get("count") {
                Some(bson::Bson::Int32(n)) => *n as u64,
                Some(bson::Bson::Int64(n)) => *n as u64,
                _ => 0,
            };
            let Ok(key) = group.get_document("_id") else {
                continue;
            };
            let action = key.get_str("action").unwrap_or("UNKNOWN").to_string();
            let success = key.get_bool("success").unwrap_or(false);

            stats.total += count;
            if success {
                stats.successful += count;
            } else {
                stats.failed += count;
            }
            *stats.by_action.entry(action).or_insert(0) += count;
        }
        Ok(stats)
    }
}
