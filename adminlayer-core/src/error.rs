//! Error types and result types for adapter operations.
//!
//! Two layers of errors exist:
//!
//! - [`DriverError`] is what a [`StoreDriver`](crate::driver::StoreDriver) implementation reports.
//! - [`AdapterError`] is what every service returns. Driver failures are wrapped into
//!   [`AdapterError::Storage`] together with the operation that caused them.
//!
//! Compilation failures ([`AdapterError::Schema`], [`AdapterError::Operand`] and
//! [`AdapterError::RelationDepth`]) are always raised before the driver is touched.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Errors reported by a storage driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// An error occurred in the underlying storage engine.
    #[error("Backend error: {0}")]
    Backend(String),
    /// The storage engine did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// A document with the given id already exists in the collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DuplicateKey(String, String),
    /// The driver does not understand a stage, operator or update modifier.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Serialization/deserialization error when converting driver values.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

impl From<BsonError> for DriverError {
    fn from(err: BsonError) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

/// Represents all possible errors surfaced by the adapter services.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// A collection, field or segment does not exist in the schema description.
    #[error("Schema error: {0}")]
    Schema(String),
    /// A value is incompatible with the operator or the field type it is applied to.
    #[error("Operand error: {0}")]
    Operand(String),
    /// A field path crosses more relations than the configured maximum.
    #[error("Relation path `{path}` crosses {hops} relations, the maximum is {max}")]
    RelationDepth {
        path: String,
        hops: usize,
        max: usize,
    },
    /// The requested record does not exist.
    /// The first argument is the record id, the second is the collection name.
    #[error("Record {0} not found in collection {1}")]
    NotFound(String, String),
    /// A write payload references unknown fields or carries malformed values.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A relation mutation references a parent or child that does not exist.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// An export stream failed after some rows were already handed to the consumer.
    #[error("Export interrupted after {rows_flushed} rows: {source}")]
    PartialExport {
        rows_flushed: u64,
        #[source]
        source: Box<AdapterError>,
    },
    /// The storage driver failed while executing an operation.
    #[error("Storage error during {operation} on {collection} ({params}): {source}")]
    Storage {
        operation: &'static str,
        collection: String,
        params: String,
        #[source]
        source: DriverError,
    },
    /// A driver document could not be mapped into a result record.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    /// Wraps a driver failure with the operation and parameters that produced it.
    pub fn storage(
        operation: &'static str,
        collection: &str,
        params: impl Into<String>,
        source: DriverError,
    ) -> Self {
        AdapterError::Storage {
            operation,
            collection: collection.to_string(),
            params: params.into(),
            source,
        }
    }

    /// Returns `true` for [`AdapterError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(..))
    }
}

impl From<BsonError> for AdapterError {
    fn from(err: BsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for AdapterError {
    fn from(err: SerdeJsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}
