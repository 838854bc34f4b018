#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use adminlayer::{
    bson::{Bson, Document, doc, oid::ObjectId},
    memory::InMemoryDriver,
    prelude::*,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

/// Wraps the in-memory driver, counting calls and optionally failing once a number of
/// calls has succeeded.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    inner: InMemoryDriver,
    calls: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl RecordingDriver {
    pub fn new(inner: InMemoryDriver) -> Self {
        Self { inner, ..Default::default() }
    }

    pub fn failing_after(inner: InMemoryDriver, calls: usize) -> Self {
        Self { inner, calls: Arc::default(), fail_after: Some(calls) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryDriver {
        &self.inner
    }

    fn record(&self) -> DriverResult<()> {
        let made = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(limit) if made >= limit => Err(DriverError::Backend("connection reset".to_string())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StoreDriver for RecordingDriver {
    async fn execute_query(&self, collection: &str, query: NativeQuery) -> DriverResult<Vec<Document>> {
        self.record()?;
        self.inner.execute_query(collection, query).await
    }

    async fn execute_aggregation(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DriverResult<Vec<Document>> {
        self.record()?;
        self.inner.execute_aggregation(collection, pipeline).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DriverResult<()> {
        self.record()?;
        self.inner.insert(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        self.record()?;
        self.inner.update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DriverResult<UpdateOutcome> {
        self.record()?;
        self.inner.update_many(collection, filter, update).await
    }

    async fn delete(&self, collection: &str, filter: Document) -> DriverResult<u64> {
        self.record()?;
        self.inner.delete(collection, filter).await
    }

    async fn list_collections(&self) -> DriverResult<Vec<String>> {
        self.record()?;
        self.inner.list_collections().await
    }
}

pub fn schema() -> SchemaRegistry {
    SchemaRegistry::new([
        CollectionSchema::new("companies", vec![FieldSchema::new("name", FieldType::String)]),
        CollectionSchema::new(
            "customers",
            vec![
                FieldSchema::new("name", FieldType::String),
                FieldSchema::relation("company", Relation::belongs_to("companies")),
                FieldSchema::relation("orders", Relation::has_many("orders").with_foreign_key("customer")),
            ],
        ),
        CollectionSchema::new(
            "orders",
            vec![
                FieldSchema::new("reference", FieldType::String),
                FieldSchema::new("total", FieldType::Number),
                FieldSchema::new("createdAt", FieldType::Date),
                FieldSchema::enumeration("status", ["open", "closed", "pending"]),
                FieldSchema::relation("customer", Relation::belongs_to("customers")),
                FieldSchema::relation("items", Relation::embedded("orders.items")),
                FieldSchema::relation("tags", Relation::has_many("tags").with_back_reference("order")),
            ],
        )
        .with_segment("open", Condition::equal("status", "open")),
        CollectionSchema::new(
            "orders.items",
            vec![
                FieldSchema::new("sku", FieldType::String),
                FieldSchema::new("quantity", FieldType::Number),
            ],
        )
        .into_embedded(),
        CollectionSchema::new(
            "tags",
            vec![
                FieldSchema::new("label", FieldType::String),
                FieldSchema::relation("order", Relation::belongs_to("orders")),
            ],
        )
        .with_id_kind(IdKind::Uuid),
    ])
    .expect("fixture schema is valid")
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
}

pub fn date(d: u32) -> Bson {
    adminlayer::temporal::to_bson(day(d))
}

/// Ids of the seeded records, all `ObjectId`s.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub acme: RecordId,
    pub globex: RecordId,
    pub ada: RecordId,
    pub grace: RecordId,
    pub linus: RecordId,
}

/// An id no seeded record uses.
pub fn missing() -> RecordId {
    RecordId::generate(IdKind::ObjectId)
}

/// Three customers; Ada (Acme) has three orders, Grace (Globex) one, Linus none.
pub async fn seeded() -> (InMemoryDriver, Fixture) {
    let fixture = Fixture {
        acme: missing(),
        globex: missing(),
        ada: missing(),
        grace: missing(),
        linus: missing(),
    };

    let driver = InMemoryDriver::builder()
        .collection(
            "companies",
            vec![
                doc! { "_id": fixture.acme, "name": "Acme" },
                doc! { "_id": fixture.globex, "name": "Globex" },
            ],
        )
        .collection(
            "customers",
            vec![
                doc! { "_id": fixture.ada, "name": "Ada", "company": fixture.acme },
                doc! { "_id": fixture.grace, "name": "Grace", "company": fixture.globex },
                doc! { "_id": fixture.linus, "name": "Linus", "company": Bson::Null },
            ],
        )
        .collection(
            "orders",
            vec![
                doc! { "_id": ObjectId::new(), "reference": "A-1", "total": 10, "status": "open", "createdAt": date(1), "customer": fixture.ada },
                doc! { "_id": ObjectId::new(), "reference": "A-2", "total": 25, "status": "open", "createdAt": date(1), "customer": fixture.ada },
                doc! { "_id": ObjectId::new(), "reference": "A-3", "total": 5, "status": "closed", "createdAt": date(3), "customer": fixture.ada },
                doc! { "_id": ObjectId::new(), "reference": "G-1", "total": 40, "status": "pending", "createdAt": date(3), "customer": fixture.grace },
            ],
        )
        .build()
        .await
        .expect("seeded driver");

    (driver, fixture)
}

pub fn store<D: StoreDriver>(driver: D) -> AdminStore<D> {
    AdminStore::new(driver, schema())
}

pub fn store_with<D: StoreDriver>(driver: D, config: AdapterConfig) -> AdminStore<D> {
    AdminStore::with_config(driver, Arc::new(schema()), Arc::new(config))
}

pub fn references(page: &Page<Record>) -> Vec<String> {
    page.records
        .iter()
        .filter_map(|record| record.get("reference").and_then(Bson::as_str).map(str::to_string))
        .collect()
}
