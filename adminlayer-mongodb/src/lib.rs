//! MongoDB driver implementation for adminlayer.
//!
//! This crate provides a MongoDB-based implementation of the `StoreDriver` trait. The
//! adapter already speaks the MongoDB dialect, so filters, pipelines and update documents
//! are passed to the server unchanged.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! adminlayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Error mapping
//!
//! - duplicate `_id` on insert (code 11000) becomes `DriverError::DuplicateKey`
//! - server selection failures become `DriverError::Timeout`
//! - everything else becomes `DriverError::Backend`
//!
//! # Example
//!
//! ```ignore
//! use adminlayer::{driver::StoreDriverBuilder, mongodb::MongoDbDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MongoDbDriver::builder("mongodb://localhost:27017", "admin_panel")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as adminlayer_mongodb;

pub mod driver;

pub use driver::{MongoDbDriver, MongoDbDriverBuilder};
