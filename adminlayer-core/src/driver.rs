//! Storage driver abstraction.
//!
//! The adapter owns no persistence. Everything it reads or writes goes through a
//! [`StoreDriver`], which speaks the MongoDB dialect: filters, projections and sorts are
//! BSON documents, aggregations are pipelines of stage documents and updates are
//! update-operator documents (`$set`, `$unset`, `$addToSet`, `$pull`).
//!
//! # Traits
//!
//! - [`StoreDriver`]: the driver interface
//! - [`StoreDriverBuilder`]: factory trait for creating driver instances
//!
//! # Example
//!
//! ```ignore
//! use adminlayer::driver::{NativeQuery, StoreDriver};
//! use bson::doc;
//!
//! let rows = driver
//!     .execute_query("orders", NativeQuery::new(doc! { "status": "open" }).limit(10))
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::error::DriverResult;

/// A plain `find` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl NativeQuery {
    pub fn new(filter: Document) -> Self {
        Self { filter, ..Default::default() }
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
}

/// Abstract interface for document storage drivers.
///
/// # Atomicity
///
/// `update_one` and `update_many` must apply the update operators atomically per
/// document: the adapter relies on them instead of read-modify-write cycles.
///
/// # Errors
///
/// Operations return [`DriverResult<T>`](crate::error::DriverResult). The adapter wraps
/// every failure with the operation parameters and never retries on its own.
#[async_trait]
pub trait StoreDriver: Send + Sync + Debug {
    /// Runs a `find` on a collection.
    async fn execute_query(&self, collection: &str, query: NativeQuery) -> DriverResult<Vec<Document>>;

    /// Runs an aggregation pipeline on a collection.
    async fn execute_aggregation(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>>;

    /// Inserts documents. Every document carries its `_id`.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DriverResult<()>;

    /// Applies update operators to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome>;

    /// Applies update operators to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome>;

    /// Deletes every document matching `filter` and returns how many were removed.
    /// Matching nothing is not an error.
    async fn delete(&self, collection: &str, filter: Document) -> DriverResult<u64>;

    /// Lists the collections known to the storage engine.
    async fn list_collections(&self) -> DriverResult<Vec<String>>;

    /// Cleanly shuts down the driver, releasing its resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DriverResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<D> StoreDriver for &D
where
    D: StoreDriver,
{
    async fn execute_query(&self, collection: &str, query: NativeQuery) -> DriverResult<Vec<Document>> {
        (*self).execute_query(collection, query).await
    }

    async fn execute_aggregation(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>> {
        (*self).execute_aggregation(collection, pipeline).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DriverResult<()> {
        (*self).insert(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        (*self).update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        (*self).update_many(collection, filter, update).await
    }

    async fn delete(&self, collection: &str, filter: Document) -> DriverResult<u64> {
        (*self).delete(collection, filter).await
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        (*self).list_collections().await
    }
}

/// Factory trait for drivers that need asynchronous setup.
#[async_trait]
pub trait StoreDriverBuilder {
    type Driver: StoreDriver;

    async fn build(self) -> DriverResult<Self::Driver>;
}
