//! Compiled query plans.
//!
//! A [`QueryPlan`] is the output of the condition compiler: the native filter, the
//! join stages it depends on, the projection, the sort and the window. Plans compare
//! by value, and the compiler always produces the same plan for the same request.

use bson::{Document, doc};

use crate::{
    driver::NativeQuery,
    joiner::{self, JoinStage},
};

/// A query ready for execution by a [`StoreDriver`](crate::driver::StoreDriver).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub joins: Vec<JoinStage>,
    pub filter: Document,
    /// Inclusion projection requested by the client, if any.
    pub projection: Option<Document>,
    /// Sort document, always ending with the `_id` tie-break.
    pub sort: Document,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl QueryPlan {
    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Returns a copy of the plan reading another window.
    pub fn with_window(&self, skip: u64, limit: Option<u64>) -> Self {
        Self { skip, limit, ..self.clone() }
    }

    /// Join stages followed by the filter.
    pub fn scoped_pipeline(&self) -> Vec<Document> {
        let mut pipeline = joiner::render(&self.joins);
        pipeline.push(doc! { "$match": self.filter.clone() });
        pipeline
    }

    /// Full pipeline: scope, sort, window and projection.
    pub fn pipeline(&self) -> Vec<Document> {
        let mut pipeline = self.scoped_pipeline();
        pipeline.push(doc! { "$sort": self.sort.clone() });
        if self.skip > 0 {
            pipeline.push(doc! { "$skip": i64::try_from(self.skip).unwrap_or(i64::MAX) });
        }
        if let Some(limit) = self.limit {
            pipeline.push(doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) });
        }
        if let Some(projection) = self.projection.clone().or_else(|| joiner::alias_exclusion(&self.joins)) {
            pipeline.push(doc! { "$project": projection });
        }
        pipeline
    }

    /// Pipeline counting the scoped documents into a `count` field.
    pub fn count_pipeline(&self) -> Vec<Document> {
        let mut pipeline = self.scoped_pipeline();
        pipeline.push(doc! { "$count": "count" });
        pipeline
    }

    /// The plan as a plain `find`, when it needs no join.
    pub fn native_query(&self) -> Option<NativeQuery> {
        if self.has_joins() {
            return None;
        }

        let mut query = NativeQuery::new(self.filter.clone())
            .sort(self.sort.clone())
            .skip(self.skip);
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(projection) = &self.projection {
            query = query.projection(projection.clone());
        }
        Some(query)
    }
}
