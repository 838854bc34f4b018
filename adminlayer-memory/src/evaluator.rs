//! Filter evaluation for in-memory documents.
//!
//! Evaluates MongoDB-dialect filter documents against BSON documents. Dotted paths
//! traverse sub-documents and fan out across arrays; a predicate on a path matches when
//! any reached value (or any element of a reached array) satisfies it.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::RegexBuilder;

use adminlayer_core::error::{DriverError, DriverResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numbers are normalized to `f64`, so `Int32(1)`, `Int64(1)` and `Double(1.0)` compare
/// equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    /// Binary payloads, UUIDs included.
    Bytes(&'a [u8]),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Binary(binary) => Comparable::Bytes(&binary.bytes),
            Bson::ObjectId(id) => Comparable::ObjectId(*id),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => {
                Comparable::Map(doc.iter().map(|(k, v)| (k.as_str(), Comparable::from(v))).collect())
            }
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Orders values of the same kind only, as range predicates do.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Bytes(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used for sorting: kinds first, then values.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(a, b)| a.total_cmp(b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Map(_), Comparable::Map(_)) => Ordering::Equal,
            _ => self
                .partial_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }
}

/// Compares two optional values with the sort order, a missing value sorting as null.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);
    left.total_cmp(&right)
}

/// Values reached by a dotted path, fanning out across arrays of documents.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let Some(value) = document.get(head) else {
        return Vec::new();
    };
    let Some(rest) = rest else {
        return vec![value];
    };

    match value {
        Bson::Document(inner) => lookup(inner, rest),
        Bson::Array(items) => items
            .iter()
            .filter_map(Bson::as_document)
            .flat_map(|inner| lookup(inner, rest))
            .collect(),
        _ => Vec::new(),
    }
}

/// First value reached by a dotted path.
pub(crate) fn first_value<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    lookup(document, path).into_iter().next()
}

/// Reached values plus the elements of reached arrays.
fn expand<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut expanded = Vec::with_capacity(values.len());
    for value in values.iter().copied() {
        if let Bson::Array(items) = value {
            expanded.extend(items.iter());
        }
        expanded.push(value);
    }
    expanded
}

pub(crate) fn equals(candidates: &[&Bson], value: &Bson) -> bool {
    if matches!(value, Bson::Null) && candidates.is_empty() {
        return true;
    }

    let target = Comparable::from(value);
    expand(candidates).into_iter().any(|candidate| Comparable::from(candidate) == target)
}

fn compares(candidates: &[&Bson], value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let target = Comparable::from(value);
    expand(candidates)
        .into_iter()
        .filter_map(|candidate| Comparable::from(candidate).partial_cmp(&target))
        .any(accept)
}

fn expect_array<'v>(operator: &str, value: &'v Bson) -> DriverResult<&'v Vec<Bson>> {
    value
        .as_array()
        .ok_or_else(|| DriverError::Unsupported(format!("{operator} expects an array, got {value}")))
}

/// Evaluates filter documents against documents.
pub(crate) struct FilterEvaluator;

impl FilterEvaluator {
    /// Whether `document` matches `filter`. The empty filter matches everything.
    pub(crate) fn matches(document: &Document, filter: &Document) -> DriverResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in expect_array(key, condition)? {
                        if !Self::matches(document, Self::clause(clause)?)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for clause in expect_array(key, condition)? {
                        if Self::matches(document, Self::clause(clause)?)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                "$nor" => {
                    let mut none = true;
                    for clause in expect_array(key, condition)? {
                        if Self::matches(document, Self::clause(clause)?)? {
                            none = false;
                            break;
                        }
                    }
                    none
                }
                operator if operator.starts_with('$') => {
                    return Err(DriverError::Unsupported(format!("top-level operator {operator}")));
                }
                path => Self::matches_field(&lookup(document, path), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the documents matching `filter`.
    pub(crate) fn filter_documents(documents: Vec<Document>, filter: &Document) -> DriverResult<Vec<Document>> {
        let mut matched = Vec::with_capacity(documents.len());
        for document in documents {
            if Self::matches(&document, filter)? {
                matched.push(document);
            }
        }
        Ok(matched)
    }

    fn clause(clause: &Bson) -> DriverResult<&Document> {
        clause
            .as_document()
            .ok_or_else(|| DriverError::Unsupported(format!("expected a filter document, got {clause}")))
    }

    /// Evaluates the condition of one path: an operator document or an implicit `$eq`.
    fn matches_field(candidates: &[&Bson], condition: &Bson) -> DriverResult<bool> {
        let operators = match condition {
            Bson::Document(operators) if operators.keys().next().is_some_and(|key| key.starts_with('$')) => operators,
            value => return Ok(equals(candidates, value)),
        };

        for (operator, value) in operators {
            let matched = match operator.as_str() {
                "$eq" => equals(candidates, value),
                "$ne" => !equals(candidates, value),
                "$gt" => compares(candidates, value, Ordering::is_gt),
                "$gte" => compares(candidates, value, Ordering::is_ge),
                "$lt" => compares(candidates, value, Ordering::is_lt),
                "$lte" => compares(candidates, value, Ordering::is_le),
                "$in" => expect_array(operator, value)?.iter().any(|value| equals(candidates, value)),
                "$nin" => !expect_array(operator, value)?.iter().any(|value| equals(candidates, value)),
                "$exists" => !candidates.is_empty() == matches!(value, Bson::Boolean(true)),
                "$regex" => {
                    let pattern = value
                        .as_str()
                        .ok_or_else(|| DriverError::Unsupported(format!("$regex expects a string, got {value}")))?;
                    let options = operators.get_str("$options").unwrap_or_default();
                    let regex = RegexBuilder::new(pattern)
                        .case_insensitive(options.contains('i'))
                        .multi_line(options.contains('m'))
                        .build()
                        .map_err(|err| DriverError::Backend(format!("invalid regex `{pattern}`: {err}")))?;

                    expand(candidates)
                        .into_iter()
                        .filter_map(Bson::as_str)
                        .any(|candidate| regex.is_match(candidate))
                }
                "$options" => true,
                "$not" => !Self::matches_field(candidates, value)?,
                other => return Err(DriverError::Unsupported(format!("query operator {other}"))),
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
