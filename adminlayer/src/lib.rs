//! Main adminlayer crate: the database adapter behind an admin panel.
//!
//! This crate is the primary entry point. It re-exports the core types from
//! `adminlayer-core` and gives access to the storage drivers.
//!
//! # Features
//!
//! - **Condition trees** - Filters, segments and free-text search compiled into native queries
//! - **Relation-aware paths** - `customer.company.name` filters, sorts and groups through joins
//! - **Resources and relations** - CRUD plus has-many and belongs-to association management
//! - **Statistics** - Value, pie and line charts computed by the storage engine
//! - **Export** - Batched record streams with partial-failure reporting
//!
//! # Quick Start
//!
//! ```ignore
//! use adminlayer::{prelude::*, memory::InMemoryDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = SchemaRegistry::from_json(include_str!("schema.json"))?;
//!     let store = AdminStore::new(InMemoryDriver::builder().build().await?, schema);
//!
//!     let orders = store.resource("orders")?;
//!     let created = orders
//!         .create(bson::doc! { "reference": "A-1", "total": 42 })
//!         .await?;
//!
//!     let page = orders
//!         .list(
//!             &ListRequest::new()
//!                 .condition(Condition::greater_than("total", 10))
//!                 .sort(SortSpec::parse("-total")),
//!         )
//!         .await?;
//!     assert_eq!(page.records[0].id(), created.id());
//!
//!     let open = store
//!         .stats("orders")?
//!         .value(&ValueStatRequest {
//!             filter: FilterRequest::new().condition(Condition::equal("status", "open")),
//!             metric: Metric::Count,
//!         })
//!         .await?;
//!     println!("{open} open orders");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development and testing
//! - [`mongodb`] - MongoDB driver (requires the `mongodb` feature)

pub mod prelude;

pub use adminlayer_core::{
    compiler, condition, config, driver, error, export, joiner, page, plan, record, relation, request,
    resolver, resource, schema, stats, store, temporal,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage driver.
pub mod memory {
    pub use adminlayer_memory::{InMemoryDriver, InMemoryDriverBuilder};
}

/// MongoDB storage driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use adminlayer_mongodb::{MongoDbDriver, MongoDbDriverBuilder};
}
