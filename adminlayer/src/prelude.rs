//! Convenient re-exports of commonly used types from adminlayer.
//!
//! ```ignore
//! use adminlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - The store and the services it hands out
//! - Schema description types
//! - Condition trees and request types
//! - Statistics requests and results
//! - Driver traits and error types

pub use adminlayer_core::{
    compiler::{CompiledFilter, QueryCompiler},
    condition::{Aggregator, Condition, ConditionNode, ConditionVisitor, Operator},
    config::{AdapterConfig, AdapterConfigBuilder},
    driver::{NativeQuery, StoreDriver, StoreDriverBuilder, UpdateOutcome},
    error::{AdapterError, AdapterResult, DriverError, DriverResult},
    export::Exporter,
    page::{Page, PageMeta, PageSpec},
    plan::QueryPlan,
    record::{IdKind, Record, RecordId},
    relation::{BelongsTo, DissociateMode, HasMany},
    request::{FilterRequest, ListRequest, SortDirection, SortSpec},
    resource::Resource,
    schema::{CollectionSchema, FieldSchema, FieldType, Relation, RelationKind, SchemaAdapter, SchemaRegistry},
    stats::{LineBucket, LineStatRequest, Metric, PieEntry, PieKey, PieStatRequest, Stats, ValueStatRequest},
    store::AdminStore,
    temporal::TimeInterval,
};
