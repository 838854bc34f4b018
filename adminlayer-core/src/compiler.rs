//! Condition compiler.
//!
//! [`QueryCompiler`] turns a [`FilterRequest`] (condition tree, segment and search term)
//! into a native MongoDB-dialect filter, and a [`ListRequest`] into a full
//! [`QueryPlan`]. Every field reference is resolved against the schema description
//! before anything else happens, so a request referencing an unknown field or crossing
//! too many relations never reaches the driver.
//!
//! Compilation is pure: relative date operators read the request's `now` rather than
//! the clock, and joins are emitted in first-seen order.
//!
//! # Example
//!
//! ```ignore
//! use adminlayer::prelude::*;
//!
//! let compiler = QueryCompiler::new(&schema, &config);
//! let plan = compiler.compile(
//!     "orders",
//!     &ListRequest::new()
//!         .condition(Condition::equal("customer.country", "FR"))
//!         .sort(SortSpec::descending("createdAt")),
//! )?;
//! ```

use bson::{Bson, Document, doc};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    condition::{ConditionNode, ConditionVisitor, Operator},
    config::AdapterConfig,
    error::{AdapterError, AdapterResult},
    joiner::RelationJoiner,
    plan::QueryPlan,
    record::RecordId,
    request::{FilterRequest, ListRequest, SortSpec},
    resolver::{PathResolver, ResolvedPath},
    schema::{CollectionSchema, FieldSchema, FieldType, PRIMARY_KEY, SchemaAdapter},
    temporal::{self, DateOperand},
};

/// Characters escaped before a client string is embedded into a regular expression.
const REGEX_SPECIAL: [char; 18] = [
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$', '#', '&', '-', '~',
];

/// Escapes a client string so that it matches literally inside a regular expression.
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if REGEX_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Filter that matches no document.
pub fn match_none() -> Document {
    doc! { PRIMARY_KEY: { "$in": [] } }
}

/// A compiled filter together with the joins it reads from.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub filter: Document,
    pub joiner: RelationJoiner,
}

/// Compiles admin-panel requests into native queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    schema: &'a dyn SchemaAdapter,
    config: &'a AdapterConfig,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a dyn SchemaAdapter, config: &'a AdapterConfig) -> Self {
        Self { schema, config }
    }

    fn resolver(&self) -> PathResolver<'a> {
        PathResolver::new(self.schema, self.config.max_relation_depth)
    }

    /// Compiles the filtering part of a request: condition tree, segment and search,
    /// AND-combined.
    ///
    /// # Errors
    ///
    /// Schema, operand and relation depth errors, raised before any storage access.
    pub fn compile_filter(&self, collection: &str, request: &FilterRequest) -> AdapterResult<CompiledFilter> {
        let schema = self.schema.require(collection)?;
        let mut joiner = RelationJoiner::new();
        let mut clauses = Vec::new();

        {
            let mut leaves = LeafCompiler {
                resolver: self.resolver(),
                collection,
                now: request.now,
                joiner: &mut joiner,
            };

            if let Some(condition) = &request.condition {
                clauses.push(leaves.visit_node(condition)?);
            }

            if let Some(name) = &request.segment {
                let segment = schema.segment(name).ok_or_else(|| {
                    AdapterError::Schema(format!("unknown segment `{name}` in `{collection}`"))
                })?;
                clauses.push(leaves.visit_node(segment)?);
            }

            if let Some(term) = request.search_term() {
                clauses.push(leaves.search(term)?);
            }
        }

        Ok(CompiledFilter { filter: conjunction(clauses), joiner })
    }

    /// Compiles a list request into a query plan.
    pub fn compile(&self, collection: &str, request: &ListRequest) -> AdapterResult<QueryPlan> {
        self.compile_scoped(collection, request, None)
    }

    /// Compiles a list request, AND-merging an additional native scope into the filter.
    pub fn compile_scoped(
        &self,
        collection: &str,
        request: &ListRequest,
        scope: Option<Document>,
    ) -> AdapterResult<QueryPlan> {
        let CompiledFilter { filter, mut joiner } = self.compile_filter(collection, &request.filter)?;
        let filter = match scope {
            Some(scope) => conjunction(vec![scope, filter]),
            None => filter,
        };
        let sort = self.compile_sort(collection, request.sort.as_ref(), &mut joiner)?;
        let projection = self.compile_projection(collection, request.fields.as_deref())?;
        let window = request.page.clamp(self.config);

        let plan = QueryPlan {
            collection: collection.to_string(),
            joins: joiner.into_stages(),
            filter,
            projection,
            sort,
            skip: window.skip,
            limit: Some(window.limit),
        };

        debug!(
            collection,
            joins = plan.joins.len(),
            filter = %plan.filter,
            sort = %plan.sort,
            skip = plan.skip,
            limit = window.limit,
            "compiled query plan"
        );

        Ok(plan)
    }

    /// Resolves a path that must yield at most one value per record (sort and group
    /// keys), registering its joins.
    pub fn resolve_single_valued(
        &self,
        collection: &str,
        path: &str,
        joiner: &mut RelationJoiner,
    ) -> AdapterResult<ResolvedPath<'a>> {
        let resolved = self.resolver().resolve(collection, path)?;
        if !resolved.single_valued {
            return Err(AdapterError::Schema(format!(
                "`{path}` yields several values per `{collection}` record"
            )));
        }
        joiner.require(resolved.joins.iter().cloned());
        Ok(resolved)
    }

    fn compile_sort(
        &self,
        collection: &str,
        sort: Option<&SortSpec>,
        joiner: &mut RelationJoiner,
    ) -> AdapterResult<Document> {
        let Some(sort) = sort else {
            return Ok(doc! { PRIMARY_KEY: 1 });
        };

        let resolved = self.resolve_single_valued(collection, &sort.field, joiner)?;
        if resolved.hops > 1 {
            return Err(AdapterError::RelationDepth { path: sort.field.clone(), hops: resolved.hops, max: 1 });
        }

        let mut document = doc! { resolved.native_path.as_str(): sort.direction.as_i32() };
        if resolved.native_path != PRIMARY_KEY {
            document.insert(PRIMARY_KEY, 1);
        }
        Ok(document)
    }

    fn compile_projection(&self, collection: &str, fields: Option<&[String]>) -> AdapterResult<Option<Document>> {
        let Some(fields) = fields else {
            return Ok(None);
        };
        let schema = self.schema.require(collection)?;

        let mut projection = doc! { PRIMARY_KEY: 1 };
        for name in fields {
            if schema.field(name).is_none() {
                return Err(AdapterError::Schema(format!("unknown field `{name}` in `{collection}`")));
            }
            projection.insert(name.as_str(), 1);
        }
        Ok(Some(projection))
    }
}

/// AND-combines filters, dropping the ones that match everything.
fn conjunction(clauses: Vec<Document>) -> Document {
    let mut clauses = clauses.into_iter().filter(|clause| !clause.is_empty()).collect::<Vec<_>>();
    match clauses.len() {
        0 => Document::new(),
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses },
    }
}

/// Compiles the leaves of one request, collecting the joins they need.
struct LeafCompiler<'c, 'a> {
    resolver: PathResolver<'a>,
    collection: &'c str,
    now: DateTime<Utc>,
    joiner: &'c mut RelationJoiner,
}

impl ConditionVisitor for LeafCompiler<'_, '_> {
    type Output = Document;
    type Error = AdapterError;

    fn visit_and(&mut self, nodes: &[ConditionNode]) -> Result<Self::Output, Self::Error> {
        let clauses = nodes
            .iter()
            .map(|node| self.visit_node(node))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match clauses.len() {
            0 => Document::new(),
            1 => clauses.into_iter().next().unwrap_or_default(),
            _ => doc! { "$and": clauses },
        })
    }

    fn visit_or(&mut self, nodes: &[ConditionNode]) -> Result<Self::Output, Self::Error> {
        let clauses = nodes
            .iter()
            .map(|node| self.visit_node(node))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match clauses.len() {
            0 => match_none(),
            1 => clauses.into_iter().next().unwrap_or_default(),
            _ => doc! { "$or": clauses },
        })
    }

    fn visit_leaf(&mut self, field: &str, operator: Operator, value: &Bson) -> Result<Self::Output, Self::Error> {
        let resolved = self.resolver.resolve(self.collection, field)?;
        let predicate = predicate(&resolved.native_path, resolved.field, operator, value, self.now)?;
        self.joiner.require(resolved.joins);
        Ok(predicate)
    }
}

impl LeafCompiler<'_, '_> {
    /// ORs one predicate per searchable field.
    fn search(&mut self, term: &str) -> AdapterResult<Document> {
        let schema = self.resolver.schema().require(self.collection)?;

        let mut clauses = Vec::new();
        for path in search_paths(schema) {
            let resolved = self.resolver.resolve(self.collection, &path)?;
            let Some(clause) = search_predicate(&resolved.native_path, resolved.field, term) else {
                continue;
            };
            self.joiner.require(resolved.joins);
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => match_none(),
            1 => clauses.remove(0),
            _ => doc! { "$or": clauses },
        })
    }
}

/// Paths matched by free-text search: the declared search fields, or every field that
/// is not a relation.
pub(crate) fn search_paths(schema: &CollectionSchema) -> Vec<String> {
    match &schema.search_fields {
        Some(fields) => fields.clone(),
        None => schema
            .fields
            .iter()
            .filter(|field| !field.is_relation())
            .map(|field| field.name.clone())
            .collect(),
    }
}

fn search_predicate(path: &str, field: &FieldSchema, term: &str) -> Option<Document> {
    match field.field_type {
        FieldType::String => Some(doc! { path: text_pattern(Operator::Contains, term) }),
        FieldType::Number => term
            .parse::<i64>()
            .map(Bson::Int64)
            .or_else(|_| term.parse::<f64>().map(Bson::Double))
            .ok()
            .map(|number| doc! { path: { "$eq": number } }),
        FieldType::Id => RecordId::parse_str(term).map(|id| doc! { path: { "$eq": id } }),
        FieldType::Enum => (field.enum_values.is_empty() || field.enum_values.iter().any(|value| value == term))
            .then(|| doc! { path: { "$eq": term } }),
        FieldType::Boolean | FieldType::Date | FieldType::Json => None,
    }
}

fn operand_error(field: &FieldSchema, operator: Operator, detail: impl std::fmt::Display) -> AdapterError {
    AdapterError::Operand(format!("`{}` ({:?}) with {operator:?}: {detail}", field.name, field.field_type))
}

/// Maps one operator applied to one field into a native predicate.
fn predicate(
    path: &str,
    field: &FieldSchema,
    operator: Operator,
    value: &Bson,
    now: DateTime<Utc>,
) -> AdapterResult<Document> {
    use FieldType as T;
    use Operator as O;

    match (operator, field.field_type) {
        (O::Blank, _) => Ok(doc! { path: { "$in": [Bson::Null, ""] } }),
        (O::Present, _) => Ok(doc! { path: { "$exists": true, "$nin": [Bson::Null, ""] } }),

        (O::Equal, T::Date) => match date_operand(field, operator, value)? {
            None => Ok(doc! { path: { "$eq": Bson::Null } }),
            Some(DateOperand::Instant(instant)) => Ok(doc! { path: { "$eq": temporal::to_bson(instant) } }),
            Some(day) => Ok(doc! { path: day_range(field, operator, &day)? }),
        },
        (O::Equal, _) => Ok(doc! { path: { "$eq": scalar(field, operator, value)? } }),

        (O::NotEqual, T::Date) => match date_operand(field, operator, value)? {
            None => Ok(doc! { path: { "$ne": Bson::Null } }),
            Some(DateOperand::Instant(instant)) => Ok(doc! { path: { "$ne": temporal::to_bson(instant) } }),
            Some(day) => Ok(doc! { path: { "$not": day_range(field, operator, &day)? } }),
        },
        (O::NotEqual, _) => Ok(doc! { path: { "$ne": scalar(field, operator, value)? } }),

        (O::GreaterThan, T::Number | T::Json) => Ok(doc! { path: { "$gt": bound(field, operator, value)? } }),
        (O::LessThan, T::Number | T::Json) => Ok(doc! { path: { "$lt": bound(field, operator, value)? } }),
        (O::GreaterThan, T::Date) => {
            let operand = required_date(field, operator, value)?;
            Ok(match operand {
                DateOperand::Instant(instant) => doc! { path: { "$gt": temporal::to_bson(instant) } },
                DateOperand::Day(_) => {
                    doc! { path: { "$gte": temporal::to_bson(in_range(field, operator, operand.end())?) } }
                }
            })
        }
        (O::LessThan, T::Date) => {
            let operand = required_date(field, operator, value)?;
            Ok(doc! { path: { "$lt": temporal::to_bson(operand.start()) } })
        }

        (O::Between, T::Number | T::Json) => {
            let (from, to) = pair(field, operator, value)?;
            Ok(doc! { path: { "$gte": bound(field, operator, from)?, "$lte": bound(field, operator, to)? } })
        }
        (O::Between, T::Date) => {
            let (from, to) = pair(field, operator, value)?;
            let from = required_date(field, operator, from)?;
            let to = required_date(field, operator, to)?;
            Ok(match to {
                DateOperand::Instant(instant) => doc! { path: {
                    "$gte": temporal::to_bson(from.start()),
                    "$lte": temporal::to_bson(instant),
                } },
                DateOperand::Day(_) => doc! { path: {
                    "$gte": temporal::to_bson(from.start()),
                    "$lt": temporal::to_bson(in_range(field, operator, to.end())?),
                } },
            })
        }

        (O::Contains | O::StartsWith | O::EndsWith, T::String | T::Enum | T::Json) => {
            Ok(doc! { path: text_pattern(operator, text(field, operator, value)?) })
        }
        (O::NotContains, T::String | T::Enum | T::Json) => {
            Ok(doc! { path: { "$not": text_pattern(Operator::Contains, text(field, operator, value)?) } })
        }

        (O::In, T::Date) => {
            let mut instants = Vec::new();
            let mut days = Vec::new();
            for item in list(field, operator, value)? {
                match required_date(field, operator, &item)? {
                    DateOperand::Instant(instant) => instants.push(temporal::to_bson(instant)),
                    day => days.push(doc! { path: day_range(field, operator, &day)? }),
                }
            }
            if days.is_empty() {
                return Ok(doc! { path: { "$in": instants } });
            }
            if !instants.is_empty() {
                days.insert(0, doc! { path: { "$in": instants } });
            }
            Ok(match days.len() {
                1 => days.remove(0),
                _ => doc! { "$or": days },
            })
        }
        (O::In, _) => {
            let values = list(field, operator, value)?
                .iter()
                .map(|item| scalar(field, operator, item))
                .collect::<AdapterResult<Vec<_>>>()?;
            Ok(doc! { path: { "$in": values } })
        }

        (O::Today, T::Date) => {
            let today = temporal::start_of_day(now.date_naive());
            let tomorrow = in_range(field, operator, today.checked_add_signed(Duration::days(1)))?;
            Ok(doc! { path: range(today, tomorrow) })
        }
        (O::Yesterday, T::Date) => {
            let today = temporal::start_of_day(now.date_naive());
            let yesterday = in_range(field, operator, today.checked_sub_signed(Duration::days(1)))?;
            Ok(doc! { path: range(yesterday, today) })
        }
        (O::PreviousXDays, T::Date) => {
            let days = count(field, operator, value)?;
            let today = temporal::start_of_day(now.date_naive());
            let first = Duration::try_days(days).and_then(|span| today.checked_sub_signed(span));
            Ok(doc! { path: range(in_range(field, operator, first)?, today) })
        }
        (O::Past, T::Date) => Ok(doc! { path: { "$lte": temporal::to_bson(now) } }),
        (O::Future, T::Date) => Ok(doc! { path: { "$gte": temporal::to_bson(now) } }),
        (O::BeforeXHoursAgo, T::Date) => {
            let hours = count(field, operator, value)?;
            let bound = Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span));
            Ok(doc! { path: { "$lt": temporal::to_bson(in_range(field, operator, bound)?) } })
        }
        (O::AfterXHoursAgo, T::Date) => {
            let hours = count(field, operator, value)?;
            let bound = Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span));
            Ok(doc! { path: { "$gt": temporal::to_bson(in_range(field, operator, bound)?) } })
        }

        (O::GreaterThan | O::LessThan | O::Between, T::String | T::Boolean | T::Id | T::Enum)
        | (O::Contains | O::NotContains | O::StartsWith | O::EndsWith, T::Number | T::Boolean | T::Date | T::Id)
        | (
            O::Today
            | O::Yesterday
            | O::PreviousXDays
            | O::Past
            | O::Future
            | O::BeforeXHoursAgo
            | O::AfterXHoursAgo,
            T::String | T::Number | T::Boolean | T::Id | T::Enum | T::Json,
        ) => Err(operand_error(field, operator, "operator does not apply to this field type")),
    }
}

/// Coerces a scalar operand into the field's storage type.
fn scalar(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<Bson> {
    field.coerce(value).map_err(|detail| operand_error(field, operator, detail))
}

/// An ordering bound: a non-null scalar.
fn bound(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<Bson> {
    match scalar(field, operator, value)? {
        Bson::Null => Err(operand_error(field, operator, "a value is required")),
        bound => Ok(bound),
    }
}

fn text<'v>(field: &FieldSchema, operator: Operator, value: &'v Bson) -> AdapterResult<&'v str> {
    match value {
        Bson::String(text) => Ok(text),
        other => Err(operand_error(field, operator, format!("expected a string, got {other}"))),
    }
}

fn text_pattern(operator: Operator, text: &str) -> Document {
    let escaped = escape_regex(text);
    let pattern = match operator {
        Operator::StartsWith => format!("^{escaped}"),
        Operator::EndsWith => format!("{escaped}$"),
        _ => escaped,
    };
    doc! { "$regex": pattern, "$options": "i" }
}

fn pair<'v>(field: &FieldSchema, operator: Operator, value: &'v Bson) -> AdapterResult<(&'v Bson, &'v Bson)> {
    match value {
        Bson::Array(values) if values.len() == 2 => Ok((&values[0], &values[1])),
        other => Err(operand_error(field, operator, format!("expected a two element array, got {other}"))),
    }
}

/// Accepts an array or a comma separated string.
fn list(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<Vec<Bson>> {
    match value {
        Bson::Array(values) => Ok(values.clone()),
        Bson::String(values) => Ok(values
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Bson::from)
            .collect()),
        other => Err(operand_error(field, operator, format!("expected a list, got {other}"))),
    }
}

/// A non-negative integer operand.
fn count(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<i64> {
    let parsed = match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        Bson::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed
        .filter(|n| *n >= 0)
        .ok_or_else(|| operand_error(field, operator, format!("expected a non-negative integer, got {value}")))
}

/// Parses a date operand. `null` yields `None`.
fn date_operand(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<Option<DateOperand>> {
    match value {
        Bson::Null => Ok(None),
        Bson::DateTime(instant) => Ok(Some(DateOperand::Instant(instant.to_chrono()))),
        Bson::String(input) => DateOperand::parse(input)
            .map(Some)
            .ok_or_else(|| operand_error(field, operator, format!("`{input}` is not an ISO-8601 date"))),
        other => Err(operand_error(field, operator, format!("expected a date, got {other}"))),
    }
}

fn required_date(field: &FieldSchema, operator: Operator, value: &Bson) -> AdapterResult<DateOperand> {
    date_operand(field, operator, value)?.ok_or_else(|| operand_error(field, operator, "a date is required"))
}

fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Document {
    doc! { "$gte": temporal::to_bson(start), "$lt": temporal::to_bson(end) }
}

fn day_range(field: &FieldSchema, operator: Operator, day: &DateOperand) -> AdapterResult<Document> {
    Ok(range(day.start(), in_range(field, operator, day.end())?))
}

/// Rejects date arithmetic that left the representable range.
fn in_range(field: &FieldSchema, operator: Operator, instant: Option<DateTime<Utc>>) -> AdapterResult<DateTime<Utc>> {
    instant.ok_or_else(|| operand_error(field, operator, "the resulting date is out of range"))
}
