use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions},
};
use tracing::debug;

use adminlayer_core::{
    driver::{NativeQuery, StoreDriver, StoreDriverBuilder, UpdateOutcome},
    error::{DriverError, DriverResult},
};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug)]
pub struct MongoDbDriver {
    client: Client,
    database: String,
}

impl MongoDbDriver {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbDriverBuilder {
        MongoDbDriverBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }
}

fn backend_error(err: MongoError) -> DriverError {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. } => DriverError::Timeout(err.to_string()),
        _ => DriverError::Backend(err.to_string()),
    }
}

/// Index of the document rejected for a duplicate `_id`, if that is what failed.
fn duplicate_index(err: &MongoError) -> Option<usize> {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY => Some(0),
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()?
            .iter()
            .find(|failure| failure.code == DUPLICATE_KEY)
            .map(|failure| failure.index),
        _ => None,
    }
}

/// Splits a native query into the filter and options of a `find`.
fn find_options(query: NativeQuery) -> (Document, FindOptions) {
    let mut options = FindOptions::default();

    if let Some(limit) = query.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if query.skip > 0 {
        options.skip = Some(query.skip);
    }
    options.sort = query.sort;
    options.projection = query.projection;

    (query.filter, options)
}

#[async_trait]
impl StoreDriver for MongoDbDriver {
    async fn execute_query(&self, collection: &str, query: NativeQuery) -> DriverResult<Vec<Document>> {
        let (filter, options) = find_options(query);

        self.get_collection(collection)
            .find(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn execute_aggregation(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>> {
        debug!(collection, stages = pipeline.len(), "running aggregation");

        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DriverResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        self.get_collection(collection)
            .insert_many(&documents)
            .await
            .map_err(|err| match duplicate_index(&err) {
                Some(index) => DriverError::DuplicateKey(
                    documents
                        .get(index)
                        .and_then(|document| document.get("_id"))
                        .map_or_else(|| err.to_string(), ToString::to_string),
                    collection.to_string(),
                ),
                None => backend_error(err),
            })?;

        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        let result = self
            .get_collection(collection)
            .update_one(filter, update)
            .await
            .map_err(backend_error)?;

        Ok(UpdateOutcome { matched: result.matched_count, modified: result.modified_count })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        let result = self
            .get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(backend_error)?;

        Ok(UpdateOutcome { matched: result.matched_count, modified: result.modified_count })
    }

    async fn delete(&self, collection: &str, filter: Document) -> DriverResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        let mut names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();

        Ok(names)
    }

    async fn shutdown(self) -> DriverResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbDriverBuilder {
    dsn: String,
    database: String,
}

impl MongoDbDriverBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreDriverBuilder for MongoDbDriverBuilder {
    type Driver = MongoDbDriver;

    async fn build(self) -> DriverResult<Self::Driver> {
        Ok(MongoDbDriver::new(
            Client::with_options(ClientOptions::parse(&self.dsn).await.map_err(backend_error)?)
                .map_err(backend_error)?,
            self.database,
        ))
    }
}
