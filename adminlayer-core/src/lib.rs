//! Query adapter between admin-panel requests and relation-bearing document stores.
//!
//! This crate is the core of the adminlayer project and provides:
//!
//! - **Schema description** ([`schema`]) - Collections, fields and relations exposed to the panel
//! - **Condition trees** ([`condition`]) - Filters as boolean trees of field predicates
//! - **Path resolution** ([`resolver`]) - Dotted field paths across relations
//! - **Compilation** ([`compiler`], [`joiner`], [`plan`]) - Requests into native queries and pipelines
//! - **Driver abstraction** ([`driver`]) - The storage seam, speaking the MongoDB dialect
//! - **Services** ([`resource`], [`relation`], [`stats`], [`export`]) - What the panel calls
//! - **Store** ([`store`]) - Owns the driver, schema and configuration and hands out services
//! - **Error handling** ([`error`]) - Adapter and driver error types
//!
//! # Example
//!
//! ```ignore
//! use adminlayer::prelude::*;
//!
//! let schema = SchemaRegistry::from_json(include_str!("schema.json"))?;
//! let store = AdminStore::new(driver, schema);
//!
//! let page = store
//!     .resource("orders")?
//!     .list(
//!         &ListRequest::new()
//!             .condition(Condition::equal("customer.company.name", "Acme"))
//!             .sort(SortSpec::parse("-createdAt")),
//!     )
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as adminlayer_core;

pub mod compiler;
pub mod condition;
pub mod config;
mod decorator;
pub mod driver;
pub mod error;
pub mod export;
pub mod joiner;
pub mod page;
pub mod plan;
pub mod record;
pub mod relation;
pub mod request;
pub mod resolver;
pub mod resource;
pub mod schema;
pub mod stats;
pub mod store;
pub mod temporal;
