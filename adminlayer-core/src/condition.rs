//! Condition trees describing admin-panel filters.
//!
//! A [`ConditionNode`] is a boolean combination of field/operator/value leaves. Trees are
//! built with the [`Condition`] helpers or deserialized from the wire form used by
//! admin front-ends:
//!
//! ```ignore
//! { "aggregator": "and", "conditions": [
//!     { "field": "status", "operator": "equal", "value": "open" },
//!     { "field": "customer.country", "operator": "in", "value": ["FR", "DE"] }
//! ] }
//! ```
//!
//! The [`ConditionVisitor`] trait walks a tree; the condition compiler is its main
//! implementation.

use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Filter operators understood by the condition compiler.
///
/// The set is closed: the compiler matches every operator against every field type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    /// Inclusive range, the value is a two element array.
    Between,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Missing, null or empty.
    Blank,
    Present,
    /// Membership in a list of values.
    In,
    Today,
    Yesterday,
    /// The `n` full days before today, `n` being the value.
    PreviousXDays,
    Past,
    Future,
    BeforeXHoursAgo,
    AfterXHoursAgo,
}

/// Boolean combinator of a branch node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    And,
    Or,
}

/// A node of a condition tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub enum ConditionNode {
    /// A single predicate on a (possibly dotted) field path.
    Leaf {
        field: String,
        operator: Operator,
        value: Bson,
    },
    /// All children must match. An empty list matches every record.
    And(Vec<ConditionNode>),
    /// At least one child must match. An empty list matches no record.
    Or(Vec<ConditionNode>),
}

impl ConditionNode {
    /// Creates a leaf node.
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Bson>) -> Self {
        ConditionNode::Leaf { field: field.into(), operator, value: value.into() }
    }

    /// Combines this node with another using logical AND.
    ///
    /// If this node is already an AND, the other node is appended to it.
    pub fn and(self, other: ConditionNode) -> Self {
        match self {
            ConditionNode::And(mut list) => {
                list.push(other);
                ConditionNode::And(list)
            }
            _ => ConditionNode::And(vec![self, other]),
        }
    }

    /// Combines this node with another using logical OR.
    ///
    /// If this node is already an OR, the other node is appended to it.
    pub fn or(self, other: ConditionNode) -> Self {
        match self {
            ConditionNode::Or(mut list) => {
                list.push(other);
                ConditionNode::Or(list)
            }
            _ => ConditionNode::Or(vec![self, other]),
        }
    }
}

/// Wire representation of a condition node.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Branch {
        aggregator: Aggregator,
        #[serde(default)]
        conditions: Vec<ConditionNode>,
    },
    Leaf {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Bson,
    },
}

impl TryFrom<RawCondition> for ConditionNode {
    type Error = AdapterError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawCondition::Branch { aggregator: Aggregator::And, conditions } => ConditionNode::And(conditions),
            RawCondition::Branch { aggregator: Aggregator::Or, conditions } => ConditionNode::Or(conditions),
            RawCondition::Leaf { field, operator, value } => {
                if field.trim().is_empty() {
                    return Err(AdapterError::Schema("condition field cannot be empty".to_string()));
                }
                ConditionNode::Leaf { field, operator, value }
            }
        })
    }
}

impl From<ConditionNode> for RawCondition {
    fn from(node: ConditionNode) -> Self {
        match node {
            ConditionNode::Leaf { field, operator, value } => RawCondition::Leaf { field, operator, value },
            ConditionNode::And(conditions) => RawCondition::Branch { aggregator: Aggregator::And, conditions },
            ConditionNode::Or(conditions) => RawCondition::Branch { aggregator: Aggregator::Or, conditions },
        }
    }
}

/// Helper for building leaves.
///
/// ```ignore
/// use adminlayer::condition::Condition;
///
/// let tree = Condition::equal("status", "open")
///     .and(Condition::greater_than("amount", 100));
/// ```
pub struct Condition;

impl Condition {
    pub fn equal(field: impl Into<String>, value: impl Into<Bson>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::Equal, value)
    }

    pub fn not_equal(field: impl Into<String>, value: impl Into<Bson>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::NotEqual, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Bson>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::GreaterThan, value)
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Bson>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::LessThan, value)
    }

    /// Inclusive range between `from` and `to`.
    pub fn between(
        field: impl Into<String>,
        from: impl Into<Bson>,
        to: impl Into<Bson>,
    ) -> ConditionNode {
        ConditionNode::leaf(field, Operator::Between, Bson::Array(vec![from.into(), to.into()]))
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::Contains, value.into())
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::StartsWith, value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::EndsWith, value.into())
    }

    pub fn blank(field: impl Into<String>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::Blank, Bson::Null)
    }

    pub fn present(field: impl Into<String>) -> ConditionNode {
        ConditionNode::leaf(field, Operator::Present, Bson::Null)
    }

    pub fn in_list<V: Into<Bson>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> ConditionNode {
        ConditionNode::leaf(
            field,
            Operator::In,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn and(nodes: impl IntoIterator<Item = ConditionNode>) -> ConditionNode {
        ConditionNode::And(nodes.into_iter().collect())
    }

    pub fn or(nodes: impl IntoIterator<Item = ConditionNode>) -> ConditionNode {
        ConditionNode::Or(nodes.into_iter().collect())
    }
}

/// Walks a condition tree, one callback per node kind.
pub trait ConditionVisitor {
    type Output;
    type Error: Into<AdapterError>;

    fn visit_and(&mut self, nodes: &[ConditionNode]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, nodes: &[ConditionNode]) -> Result<Self::Output, Self::Error>;
    fn visit_leaf(
        &mut self,
        field: &str,
        operator: Operator,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_node(&mut self, node: &ConditionNode) -> Result<Self::Output, Self::Error> {
        match node {
            ConditionNode::And(nodes) => self.visit_and(nodes),
            ConditionNode::Or(nodes) => self.visit_or(nodes),
            ConditionNode::Leaf { field, operator, value } => self.visit_leaf(field, *operator, value),
        }
    }
}
