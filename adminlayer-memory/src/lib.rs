//! In-memory storage driver for adminlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreDriver`
//! trait. It understands the subset of the MongoDB dialect the adapter emits, which
//! makes it suitable for tests, development and small deployments.
//!
//! # Features
//!
//! - **Filters** - Comparison, set, existence, regex and boolean operators over dotted paths
//! - **Pipelines** - `$lookup`, `$unwind`, `$group`, `$sort`, `$skip`, `$limit`, `$count`, `$project`
//! - **Updates** - `$set` (positional included), `$unset`, `$addToSet`, `$pull`
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//!
//! # Quick Start
//!
//! ```ignore
//! use adminlayer::prelude::*;
//! use adminlayer::memory::InMemoryDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = InMemoryDriver::builder()
//!         .collection("orders", orders)
//!         .build()
//!         .await?;
//!     let store = AdminStore::new(driver, SchemaRegistry::from_json(SCHEMA)?);
//!
//!     let page = store.resource("orders")?.list(&ListRequest::new()).await?;
//!     println!("{} orders", page.count());
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as adminlayer_memory;

pub mod driver;
mod evaluator;
mod pipeline;
mod update;

pub use driver::{InMemoryDriver, InMemoryDriverBuilder};
