//! In-memory storage driver.
//!
//! Collections are vectors of BSON documents behind an async-aware read-write lock.
//! Reads take the read lock for the whole query or pipeline, so a `$lookup` sees the
//! same snapshot as the stage that precedes it. Updates take the write lock, which
//! makes every update operator atomic per document.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::Document;
use mea::rwlock::RwLock;
use tracing::trace;

use adminlayer_core::{
    driver::{NativeQuery, StoreDriver, StoreDriverBuilder, UpdateOutcome},
    error::{DriverError, DriverResult},
    record::RecordId,
};

use crate::{
    evaluator::{Comparable, FilterEvaluator},
    pipeline::{self, Collections},
    update,
};

/// Thread-safe in-memory storage driver.
///
/// `InMemoryDriver` is cloneable and every clone shares the same collections, so one
/// instance can be handed to several stores or tasks.
///
/// Queries scan whole collections; there are no indexes. It is meant for tests,
/// development and small datasets.
///
/// # Example
///
/// ```ignore
/// use adminlayer_memory::InMemoryDriver;
/// use bson::{doc, oid::ObjectId};
///
/// let driver = InMemoryDriver::builder()
///     .collection("companies", vec![doc! { "_id": ObjectId::new(), "name": "Acme" }])
///     .build()
///     .await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryDriver {
    collections: Arc<RwLock<Collections>>,
}

impl InMemoryDriver {
    /// Creates a driver with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryDriverBuilder {
        InMemoryDriverBuilder::default()
    }

    /// Number of documents stored in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        multi: bool,
    ) -> DriverResult<UpdateOutcome> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        // Every update is computed on copies first, so a failing filter or operator
        // leaves the whole collection untouched.
        let mut outcome = UpdateOutcome::default();
        let mut staged = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if !FilterEvaluator::matches(document, filter)? {
                continue;
            }

            let mut updated = document.clone();
            outcome.matched += 1;
            if update::apply(&mut updated, filter, update)? {
                staged.push((index, updated));
            }
            if !multi {
                break;
            }
        }

        outcome.modified = staged.len() as u64;
        for (index, updated) in staged {
            documents[index] = updated;
        }

        trace!(collection, matched = outcome.matched, modified = outcome.modified, "applied update");
        Ok(outcome)
    }
}

#[async_trait]
impl StoreDriver for InMemoryDriver {
    async fn execute_query(&self, collection: &str, query: NativeQuery) -> DriverResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for document in documents {
            if FilterEvaluator::matches(document, &query.filter)? {
                matched.push(document.clone());
            }
        }
        drop(collections);

        if let Some(sort) = &query.sort {
            pipeline::sort_documents(&mut matched, sort)?;
        }

        let window = matched
            .into_iter()
            .skip(query.skip as usize)
            .take(query.limit.map_or(usize::MAX, |limit| limit as usize));

        match &query.projection {
            Some(projection) => window
                .map(|document| pipeline::project(document, projection))
                .collect(),
            None => Ok(window.collect()),
        }
    }

    async fn execute_aggregation(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let documents = collections.get(collection).cloned().unwrap_or_default();

        pipeline::aggregate(documents, &pipeline, &collections)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DriverResult<()> {
        let mut collections = self.collections.write().await;
        let existing = collections.entry(collection.to_string()).or_default();

        let mut seen = Vec::with_capacity(documents.len());
        for document in &documents {
            let id = document.get("_id").ok_or_else(|| {
                DriverError::Backend(format!("document without `_id` inserted into {collection}"))
            })?;

            let duplicate = existing
                .iter()
                .filter_map(|stored| stored.get("_id"))
                .chain(seen.iter().copied())
                .any(|stored| Comparable::from(stored) == Comparable::from(id));
            if duplicate {
                let key = RecordId::from_bson(id).map_or_else(|| id.to_string(), |id| id.to_string());
                return Err(DriverError::DuplicateKey(key, collection.to_string()));
            }
            seen.push(id);
        }

        existing.extend(documents.iter().cloned());
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        self.update(collection, &filter, &update, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        self.update(collection, &filter, &update, true).await
    }

    async fn delete(&self, collection: &str, filter: Document) -> DriverResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let matched = documents
            .iter()
            .map(|document| FilterEvaluator::matches(document, &filter))
            .collect::<DriverResult<Vec<_>>>()?;

        let mut verdicts = matched.iter();
        documents.retain(|_| !verdicts.next().copied().unwrap_or(false));

        Ok(matched.into_iter().filter(|matched| *matched).count() as u64)
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        let mut names = self.collections.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

/// Builder for [`InMemoryDriver`] instances, optionally seeded with documents.
///
/// # Example
///
/// ```ignore
/// use adminlayer_memory::InMemoryDriver;
/// use adminlayer::driver::StoreDriverBuilder;
///
/// let driver = InMemoryDriver::builder()
///     .collection("orders", orders)
///     .build()
///     .await?;
/// ```
#[derive(Default, Debug)]
pub struct InMemoryDriverBuilder {
    collections: HashMap<String, Vec<Document>>,
}

impl InMemoryDriverBuilder {
    /// Adds documents to a collection, creating it if needed.
    pub fn collection(mut self, name: impl Into<String>, documents: impl IntoIterator<Item = Document>) -> Self {
        self.collections.entry(name.into()).or_default().extend(documents);
        self
    }
}

#[async_trait]
impl StoreDriverBuilder for InMemoryDriverBuilder {
    type Driver = InMemoryDriver;

    async fn build(self) -> DriverResult<Self::Driver> {
        let driver = InMemoryDriver::new();
        for (name, documents) in self.collections {
            driver.insert(&name, documents).await?;
        }
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use bson::{Uuid, doc};

    use super::*;

    async fn seeded() -> InMemoryDriver {
        InMemoryDriver::builder()
            .collection(
                "orders",
                vec![
                    doc! { "_id": 1, "status": "open", "total": 30 },
                    doc! { "_id": 2, "status": "closed", "total": 10 },
                    doc! { "_id": 3, "status": "open", "total": 20 },
                ],
            )
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_windows() {
        let driver = seeded().await;

        let rows = driver
            .execute_query(
                "orders",
                NativeQuery::new(doc! { "status": "open" })
                    .sort(doc! { "total": 1 })
                    .projection(doc! { "_id": 1 })
                    .skip(1)
                    .limit(5),
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let driver = InMemoryDriver::new();

        let rows = driver.execute_query("nothing", NativeQuery::default()).await.unwrap();
        let deleted = driver.delete("nothing", doc! {}).await.unwrap();

        assert!(rows.is_empty());
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_rejected_atomically() {
        let driver = seeded().await;
        let fresh = Uuid::new();

        let result = driver
            .insert("orders", vec![doc! { "_id": fresh }, doc! { "_id": 2 }])
            .await;

        assert!(matches!(result, Err(DriverError::DuplicateKey(_, _))));
        assert_eq!(driver.len("orders").await, 3);
    }

    #[tokio::test]
    async fn test_update_reports_matched_and_modified() {
        let driver = seeded().await;

        let outcome = driver
            .update_many("orders", doc! { "status": "open" }, doc! { "$set": { "status": "closed" } })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 2, modified: 2 });

        let outcome = driver
            .update_one("orders", doc! { "_id": 1 }, doc! { "$set": { "status": "closed" } })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });
    }

    #[tokio::test]
    async fn test_delete_returns_count() {
        let driver = seeded().await;

        let deleted = driver.delete("orders", doc! { "total": { "$gte": 20 } }).await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(driver.len("orders").await, 1);
    }

    #[tokio::test]
    async fn test_failing_delete_keeps_the_collection() {
        let driver = seeded().await;

        let result = driver.delete("orders", doc! { "total": { "$near": 1 } }).await;

        assert!(matches!(result, Err(DriverError::Unsupported(_))));
        assert_eq!(driver.len("orders").await, 3);
    }

    #[tokio::test]
    async fn test_failing_update_many_changes_nothing() {
        let driver = seeded().await;
        driver
            .update_one("orders", doc! { "_id": 2 }, doc! { "$set": { "notes": "late" } })
            .await
            .unwrap();

        let result = driver
            .update_many("orders", doc! {}, doc! { "$addToSet": { "notes": "checked" } })
            .await;
        assert!(matches!(result, Err(DriverError::Backend(_))));

        let rows = driver
            .execute_query("orders", NativeQuery::new(doc! { "notes": { "$exists": true } }))
            .await
            .unwrap();
        assert_eq!(rows, vec![doc! { "_id": 2, "status": "closed", "total": 10, "notes": "late" }]);

        let result = driver
            .update_many("orders", doc! { "total": { "$near": 1 } }, doc! { "$set": { "total": 0 } })
            .await;
        assert!(matches!(result, Err(DriverError::Unsupported(_))));
        let zeroed = driver.execute_query("orders", NativeQuery::new(doc! { "total": 0 })).await.unwrap();
        assert!(zeroed.is_empty());
    }

    #[tokio::test]
    async fn test_aggregation_reads_other_collections() {
        let driver = seeded().await;
        driver
            .insert("notes", vec![doc! { "_id": 10, "order": 2, "text": "late" }])
            .await
            .unwrap();

        let rows = driver
            .execute_aggregation(
                "orders",
                vec![
                    doc! { "$lookup": { "from": "notes", "localField": "_id", "foreignField": "order", "as": "__notes" } },
                    doc! { "$match": { "__notes.text": "late" } },
                    doc! { "$project": { "__notes": 0 } },
                ],
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![doc! { "_id": 2, "status": "closed", "total": 10 }]);
    }

    #[tokio::test]
    async fn test_collections_are_listed_sorted() {
        let driver = seeded().await;
        driver.insert("customers", vec![doc! { "_id": 1 }]).await.unwrap();

        assert_eq!(driver.list_collections().await.unwrap(), vec!["customers", "orders"]);
    }
}
