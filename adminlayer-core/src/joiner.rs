//! Cross-collection joins.
//!
//! Every relation hop collected by the resolver becomes a `$lookup` stage writing the
//! related documents into an alias field. A lookup never multiplies the parent row: a
//! parent matches a predicate on a has-many child as soon as one element of the alias
//! array matches. Hops reached only through belongs-to relations are additionally
//! unwound (keeping parents without a match) so that sorts and groups can read a
//! scalar value.

use std::collections::HashSet;

use bson::{Bson, Document, doc};

use crate::{resolver::JoinRequirement, schema::RelationKind};

/// One join, ready to be rendered into pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStage {
    pub alias: String,
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    /// Whether the alias array is unwound into a single document.
    pub unwind: bool,
}

impl From<JoinRequirement> for JoinStage {
    fn from(join: JoinRequirement) -> Self {
        Self {
            unwind: join.single_valued && join.kind == RelationKind::BelongsTo,
            alias: join.alias,
            from: join.from,
            local_field: join.local_field,
            foreign_field: join.foreign_field,
        }
    }
}

impl JoinStage {
    /// Renders the `$lookup` stage and, for single-valued hops, its `$unwind`.
    pub fn stages(&self) -> Vec<Document> {
        let mut stages = vec![doc! {
            "$lookup": {
                "from": self.from.as_str(),
                "localField": self.local_field.as_str(),
                "foreignField": self.foreign_field.as_str(),
                "as": self.alias.as_str(),
            }
        }];

        if self.unwind {
            stages.push(doc! {
                "$unwind": {
                    "path": format!("${}", self.alias),
                    "preserveNullAndEmptyArrays": true,
                }
            });
        }

        stages
    }
}

/// Collects join requirements, keeping one stage per alias in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct RelationJoiner {
    stages: Vec<JoinStage>,
    seen: HashSet<String>,
}

impl RelationJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the joins of one resolved path.
    pub fn require(&mut self, joins: impl IntoIterator<Item = JoinRequirement>) {
        for join in joins {
            if self.seen.insert(join.alias.clone()) {
                self.stages.push(join.into());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[JoinStage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<JoinStage> {
        self.stages
    }
}

/// Renders a list of joins into pipeline stages.
pub fn render(joins: &[JoinStage]) -> Vec<Document> {
    joins.iter().flat_map(JoinStage::stages).collect()
}

/// Projection dropping every join alias from the output documents.
pub fn alias_exclusion(joins: &[JoinStage]) -> Option<Document> {
    if joins.is_empty() {
        return None;
    }

    Some(joins.iter().map(|join| (join.alias.clone(), Bson::Int32(0))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{PathResolver, tests::shop_schema};

    #[test]
    fn test_belongs_to_join_is_unwound() {
        let schema = shop_schema();
        let resolved = PathResolver::new(&schema, 2).resolve("orders", "customer.name").unwrap();
        let mut joiner = RelationJoiner::new();
        joiner.require(resolved.joins);

        assert_eq!(
            render(joiner.stages()),
            vec![
                doc! { "$lookup": { "from": "customers", "localField": "customer", "foreignField": "_id", "as": "__customer" } },
                doc! { "$unwind": { "path": "$__customer", "preserveNullAndEmptyArrays": true } },
            ]
        );
    }

    #[test]
    fn test_has_many_join_is_not_unwound() {
        let schema = shop_schema();
        let resolved = PathResolver::new(&schema, 2).resolve("customers", "orders.total").unwrap();
        let mut joiner = RelationJoiner::new();
        joiner.require(resolved.joins);

        assert_eq!(
            render(joiner.stages()),
            vec![doc! { "$lookup": { "from": "orders", "localField": "_id", "foreignField": "customer", "as": "__orders" } }]
        );
    }

    #[test]
    fn test_shared_hops_are_deduplicated() {
        let schema = shop_schema();
        let resolver = PathResolver::new(&schema, 2);
        let mut joiner = RelationJoiner::new();
        joiner.require(resolver.resolve("orders", "customer.name").unwrap().joins);
        joiner.require(resolver.resolve("orders", "customer.company.name").unwrap().joins);
        joiner.require(resolver.resolve("orders", "customer.age").unwrap().joins);

        let aliases = joiner.stages().iter().map(|join| join.alias.as_str()).collect::<Vec<_>>();
        assert_eq!(aliases, vec!["__customer", "__customer__company"]);
        assert_eq!(
            alias_exclusion(joiner.stages()),
            Some(doc! { "__customer": 0, "__customer__company": 0 })
        );
    }
}
