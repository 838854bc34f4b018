//! Main entry point of the adapter.
//!
//! [`AdminStore`] owns a driver, the schema description and the configuration, and
//! hands out one service per concern:
//!
//! - [`AdminStore::resource`] - list, get, create, update and remove records
//! - [`AdminStore::has_many`] / [`AdminStore::belongs_to`] - relation mutations
//! - [`AdminStore::stats`] - value, pie and line charts
//! - [`AdminStore::exporter`] - batched exports
//!
//! Services borrow the store and are cheap to create. The only state shared between
//! requests is the immutable schema and configuration, and whatever the driver pools.
//!
//! # Example
//!
//! ```ignore
//! use adminlayer::prelude::*;
//!
//! let store = AdminStore::new(driver, schema);
//! let page = store
//!     .resource("orders")?
//!     .list(&ListRequest::new().condition(Condition::equal("status", "open")))
//!     .await?;
//! ```

use std::{collections::HashSet, sync::Arc};

use bson::{Bson, Document, doc};
use tracing::warn;

use crate::{
    compiler::QueryCompiler,
    config::AdapterConfig,
    decorator,
    driver::{NativeQuery, StoreDriver, UpdateOutcome},
    error::{AdapterError, AdapterResult, DriverError},
    export::Exporter,
    page::Page,
    plan::QueryPlan,
    request::ListRequest,
    resolver::PathResolver,
    record::{Record, RecordId},
    relation::{BelongsTo, HasMany},
    resource::Resource,
    schema::{CollectionSchema, FieldSchema, PRIMARY_KEY, RelationKind, SchemaAdapter},
    stats::Stats,
};

/// An admin-panel adapter bound to a specific driver implementation.
///
/// # Type Parameters
///
/// * `D` - The storage driver type
#[derive(Debug)]
pub struct AdminStore<D: StoreDriver> {
    driver: D,
    schema: Arc<dyn SchemaAdapter>,
    config: Arc<AdapterConfig>,
}

impl<D: StoreDriver> AdminStore<D> {
    /// Creates a store with the default configuration.
    pub fn new(driver: D, schema: impl SchemaAdapter + 'static) -> Self {
        Self::with_config(driver, Arc::new(schema), Arc::new(AdapterConfig::default()))
    }

    /// Creates a store sharing an existing schema and configuration.
    pub fn with_config(driver: D, schema: Arc<dyn SchemaAdapter>, config: Arc<AdapterConfig>) -> Self {
        Self { driver, schema, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn schema(&self) -> &dyn SchemaAdapter {
        self.schema.as_ref()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// A compiler bound to this store's schema and configuration.
    pub fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(self.schema.as_ref(), &self.config)
    }

    /// Record access for a collection.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the collection is unknown or only describes embedded documents.
    pub fn resource(&self, collection: &str) -> AdapterResult<Resource<'_, D>> {
        Ok(Resource::new(self.context(collection)?))
    }

    /// Relation mutations for a has-many field.
    ///
    /// # Arguments
    ///
    /// * `collection` - The parent collection
    /// * `field` - The has-many field of the parent collection
    pub fn has_many(&self, collection: &str, field: &str) -> AdapterResult<HasMany<'_, D>> {
        let context = self.context(collection)?;
        let field = context.relation_field(field, RelationKind::HasMany)?;
        HasMany::new(context, field)
    }

    /// Relation mutations for a belongs-to field.
    ///
    /// # Arguments
    ///
    /// * `collection` - The owning collection
    /// * `field` - The belongs-to field of the owning collection
    pub fn belongs_to(&self, collection: &str, field: &str) -> AdapterResult<BelongsTo<'_, D>> {
        let context = self.context(collection)?;
        let field = context.relation_field(field, RelationKind::BelongsTo)?;
        BelongsTo::new(context, field)
    }

    /// Chart statistics for a collection.
    pub fn stats(&self, collection: &str) -> AdapterResult<Stats<'_, D>> {
        Ok(Stats::new(self.context(collection)?))
    }

    /// Batched export of a collection.
    pub fn exporter(&self, collection: &str) -> AdapterResult<Exporter<'_, D>> {
        Ok(Exporter::new(self.context(collection)?))
    }

    /// Lists the collections known to the storage engine.
    pub async fn list_collections(&self) -> AdapterResult<Vec<String>> {
        self.driver
            .list_collections()
            .await
            .map_err(|err| storage_error("list_collections", "*", String::new(), err))
    }

    /// Cleanly shuts down the store, releasing the driver's resources.
    pub async fn shutdown(self) -> AdapterResult<()> {
        self.driver
            .shutdown()
            .await
            .map_err(|err| storage_error("shutdown", "*", String::new(), err))
    }

    fn context(&self, collection: &str) -> AdapterResult<Context<'_, D>> {
        let schema = self.schema.require(collection)?;
        if schema.embedded {
            return Err(AdapterError::Schema(format!(
                "`{collection}` describes embedded documents and is not a collection"
            )));
        }

        Ok(Context {
            driver: &self.driver,
            schema: self.schema.as_ref(),
            config: &self.config,
            collection: schema,
        })
    }
}

fn storage_error(operation: &'static str, collection: &str, params: String, err: DriverError) -> AdapterError {
    warn!(operation, collection, params = %params, error = %err, "storage call failed");
    AdapterError::storage(operation, collection, params, err)
}

/// What every service borrows from the store: the driver, the schema, the
/// configuration and the schema of the collection it serves.
#[derive(Debug)]
pub(crate) struct Context<'a, D> {
    pub(crate) driver: &'a D,
    pub(crate) schema: &'a dyn SchemaAdapter,
    pub(crate) config: &'a AdapterConfig,
    pub(crate) collection: &'a CollectionSchema,
}

impl<D> Clone for Context<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Context<'_, D> {}

impl<'a, D: StoreDriver> Context<'a, D> {
    pub(crate) fn name(&self) -> &'a str {
        &self.collection.name
    }

    pub(crate) fn compiler(&self) -> QueryCompiler<'a> {
        QueryCompiler::new(self.schema, self.config)
    }

    /// The same context, serving another collection.
    pub(crate) fn switch(&self, collection: &str) -> AdapterResult<Self> {
        Ok(Self { collection: self.schema.require(collection)?, ..*self })
    }

    fn relation_field(&self, field: &str, kind: RelationKind) -> AdapterResult<&'a FieldSchema> {
        self.collection
            .field(field)
            .filter(|candidate| candidate.relation_kind() == Some(kind))
            .ok_or_else(|| {
                AdapterError::Schema(format!("`{}.{field}` is not a {kind:?} relation", self.name()))
            })
    }

    pub(crate) async fn find(&self, collection: &str, query: NativeQuery) -> AdapterResult<Vec<Document>> {
        let params = format!("filter: {}", query.filter);
        self.driver
            .execute_query(collection, query)
            .await
            .map_err(|err| storage_error("find", collection, params, err))
    }

    pub(crate) async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> AdapterResult<Vec<Document>> {
        let params = format!("pipeline: {}", Bson::from(pipeline.clone()));
        self.driver
            .execute_aggregation(collection, pipeline)
            .await
            .map_err(|err| storage_error("aggregate", collection, params, err))
    }

    pub(crate) async fn insert(&self, collection: &str, documents: Vec<Document>) -> AdapterResult<()> {
        let params = format!("{} documents", documents.len());
        self.driver
            .insert(collection, documents)
            .await
            .map_err(|err| storage_error("insert", collection, params, err))
    }

    pub(crate) async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> AdapterResult<UpdateOutcome> {
        let params = format!("filter: {filter}, update: {update}");
        self.driver
            .update_one(collection, filter, update)
            .await
            .map_err(|err| storage_error("update_one", collection, params, err))
    }

    pub(crate) async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> AdapterResult<UpdateOutcome> {
        let params = format!("filter: {filter}, update: {update}");
        self.driver
            .update_many(collection, filter, update)
            .await
            .map_err(|err| storage_error("update_many", collection, params, err))
    }

    pub(crate) async fn delete(&self, collection: &str, filter: Document) -> AdapterResult<u64> {
        let params = format!("filter: {filter}");
        self.driver
            .delete(collection, filter)
            .await
            .map_err(|err| storage_error("delete", collection, params, err))
    }

    /// Fetches one raw document by primary key.
    pub(crate) async fn find_by_id(&self, collection: &str, id: RecordId) -> AdapterResult<Option<Document>> {
        Ok(self
            .find(collection, NativeQuery::new(doc! { PRIMARY_KEY: id }).limit(1))
            .await?
            .into_iter()
            .next())
    }

    /// Returns the subset of `ids` that exist in `collection`.
    pub(crate) async fn existing_ids(&self, collection: &str, ids: &[RecordId]) -> AdapterResult<HashSet<RecordId>> {
        self.matching_ids(collection, ids, Document::new()).await
    }

    /// Returns the subset of `ids` whose documents in `collection` also match `filter`.
    pub(crate) async fn matching_ids(
        &self,
        collection: &str,
        ids: &[RecordId],
        filter: Document,
    ) -> AdapterResult<HashSet<RecordId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query = doc! { PRIMARY_KEY: { "$in": ids_to_bson(ids) } };
        query.extend(filter);
        let documents = self
            .find(collection, NativeQuery::new(query).projection(doc! { PRIMARY_KEY: 1 }))
            .await?;

        Ok(documents
            .iter()
            .filter_map(|document| document.get(PRIMARY_KEY).and_then(RecordId::from_bson))
            .collect())
    }

    /// Reads the window of a plan, through `find` when it needs no join.
    pub(crate) async fn fetch(&self, plan: &QueryPlan) -> AdapterResult<Vec<Record>> {
        let documents = match plan.native_query() {
            Some(query) => self.find(&plan.collection, query).await?,
            None => self.aggregate(&plan.collection, plan.pipeline()).await?,
        };

        documents.into_iter().map(Record::from_document).collect()
    }

    /// Counts the records matched by a plan, ignoring its window.
    pub(crate) async fn count(&self, plan: &QueryPlan) -> AdapterResult<u64> {
        let documents = self.aggregate(&plan.collection, plan.count_pipeline()).await?;

        Ok(documents
            .first()
            .and_then(|document| document.get("count"))
            .and_then(crate::stats::as_f64)
            .map(|count| count as u64)
            .unwrap_or(0))
    }

    /// Executes a list plan: one page of records plus the total count.
    ///
    /// Records are hydrated when the request asks for it, then annotated with the fields
    /// that matched its search term.
    pub(crate) async fn list(&self, plan: &QueryPlan, request: &ListRequest) -> AdapterResult<Page<Record>> {
        let mut records = self.fetch(plan).await?;
        let count = self.count(plan).await?;
        if request.hydrate {
            self.hydrate(&mut records).await?;
        }
        if let Some(term) = request.filter.search_term() {
            let resolver = PathResolver::new(self.schema, self.config.max_relation_depth);
            decorator::annotate_search_matches(&resolver, self.collection, &mut records, term)?;
        }
        Ok(Page::new(records, count))
    }

    /// Attaches the documents referenced by the belongs-to fields of each record,
    /// with one query per field.
    pub(crate) async fn hydrate(&self, records: &mut [Record]) -> AdapterResult<()> {
        for field in self.collection.belongs_to_fields() {
            let Some(relation) = &field.relation else { continue };

            let mut seen = HashSet::new();
            let ids = records
                .iter()
                .filter_map(|record| record.get(&field.name).and_then(RecordId::from_bson))
                .filter(|id| seen.insert(*id))
                .collect::<Vec<_>>();
            if ids.is_empty() {
                continue;
            }

            let related = self
                .find(
                    &relation.collection,
                    NativeQuery::new(doc! { PRIMARY_KEY: { "$in": ids_to_bson(&ids) } }),
                )
                .await?;

            for document in related {
                let Some(id) = document.get(PRIMARY_KEY).and_then(RecordId::from_bson) else { continue };
                for record in records.iter_mut() {
                    if record.get(&field.name).and_then(RecordId::from_bson) == Some(id) {
                        record.attach_related(&field.name, document.clone());
                    }
                }
            }
        }

        Ok(())
    }
}

pub(crate) fn ids_to_bson(ids: &[RecordId]) -> Vec<Bson> {
    ids.iter().copied().map(Bson::from).collect()
}

/// Deduplicates ids, keeping the first occurrence of each.
pub(crate) fn unique_ids(ids: impl IntoIterator<Item = impl Into<RecordId>>) -> Vec<RecordId> {
    let mut seen = HashSet::new();
    ids.into_iter().map(Into::into).filter(|id| seen.insert(*id)).collect()
}
