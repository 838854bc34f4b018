//! Aggregation pipeline execution for in-memory collections.
//!
//! Stages run in order over an owned vector of documents. Supported stages are
//! `$match`, `$lookup`, `$unwind`, `$group` (`$sum` and `$avg` accumulators, `$dateTrunc`
//! keys), `$sort`, `$skip`, `$limit`, `$count` and `$project`. Anything else is
//! reported as [`DriverError::Unsupported`].

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, doc};
use chrono::{DateTime, Utc};

use adminlayer_core::{
    error::{DriverError, DriverResult},
    temporal::{self, TimeInterval},
};

use crate::{
    evaluator::{Comparable, FilterEvaluator, compare_values, equals, first_value, lookup},
    update,
};

pub(crate) type Collections = HashMap<String, Vec<Document>>;

/// Runs `pipeline` over `documents`. `$lookup` stages read from `collections`.
pub(crate) fn aggregate(
    mut documents: Vec<Document>,
    pipeline: &[Document],
    collections: &Collections,
) -> DriverResult<Vec<Document>> {
    for stage in pipeline {
        let mut operators = stage.iter();
        let (Some((name, argument)), None) = (operators.next(), operators.next()) else {
            return Err(DriverError::Unsupported(format!(
                "a stage must hold exactly one operator, got {stage}"
            )));
        };

        documents = match name.as_str() {
            "$match" => FilterEvaluator::filter_documents(documents, stage_document(name, argument)?)?,
            "$lookup" => join(documents, stage_document(name, argument)?, collections)?,
            "$unwind" => unwind(documents, argument)?,
            "$group" => group(documents, stage_document(name, argument)?)?,
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, argument)?)?;
                documents
            }
            "$skip" => documents.into_iter().skip(amount(name, argument)?).collect(),
            "$limit" => documents.into_iter().take(amount(name, argument)?).collect(),
            "$count" => {
                let field = argument
                    .as_str()
                    .ok_or_else(|| DriverError::Unsupported(format!("$count expects a field name, got {argument}")))?;
                match documents.len() {
                    0 => Vec::new(),
                    total => vec![doc! { field: total as i64 }],
                }
            }
            "$project" => {
                let projection = stage_document(name, argument)?;
                documents
                    .into_iter()
                    .map(|document| project(document, projection))
                    .collect::<DriverResult<_>>()?
            }
            other => return Err(DriverError::Unsupported(format!("aggregation stage {other}"))),
        };
    }

    Ok(documents)
}

/// Stable multi-key sort. Directions are `1` or `-1`.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) -> DriverResult<()> {
    let keys = sort
        .iter()
        .map(|(field, direction)| match integer(direction) {
            Some(1) => Ok((field.as_str(), false)),
            Some(-1) => Ok((field.as_str(), true)),
            _ => Err(DriverError::Unsupported(format!("sort direction {direction} on `{field}`"))),
        })
        .collect::<DriverResult<Vec<_>>>()?;

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare_values(first_value(a, field), first_value(b, field));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    Ok(())
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded.
pub(crate) fn project(mut document: Document, projection: &Document) -> DriverResult<Document> {
    let inclusion = projection
        .iter()
        .any(|(field, flag)| field != "_id" && truthy(flag));

    if !inclusion {
        for (field, _) in projection {
            update::remove_path(&mut document, &field.split('.').collect::<Vec<_>>());
        }
        return Ok(document);
    }

    let mut projected = Document::new();
    if projection.get("_id").is_none_or(truthy)
        && let Some(id) = document.get("_id")
    {
        projected.insert("_id", id.clone());
    }

    for (field, flag) in projection {
        if field == "_id" {
            continue;
        }
        if !truthy(flag) {
            return Err(DriverError::Unsupported(format!(
                "cannot exclude `{field}` in an inclusion projection"
            )));
        }
        if let Some(value) = first_value(&document, field) {
            update::set_path(&mut projected, &field.split('.').collect::<Vec<_>>(), value.clone())?;
        }
    }

    Ok(projected)
}

fn truthy(flag: &Bson) -> bool {
    match flag {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

fn amount(stage: &str, argument: &Bson) -> DriverResult<usize> {
    integer(argument)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| DriverError::Unsupported(format!("{stage} expects a non-negative integer, got {argument}")))
}

fn stage_document<'s>(stage: &str, argument: &'s Bson) -> DriverResult<&'s Document> {
    argument
        .as_document()
        .ok_or_else(|| DriverError::Unsupported(format!("{stage} expects a document, got {argument}")))
}

fn stage_str<'s>(stage: &str, argument: &'s Document, key: &str) -> DriverResult<&'s str> {
    argument
        .get_str(key)
        .map_err(|_| DriverError::Unsupported(format!("{stage} requires a string `{key}`")))
}

/// `$lookup` with `localField`/`foreignField` equality. A missing local field joins
/// the foreign documents whose foreign field is null or missing.
fn join(documents: Vec<Document>, argument: &Document, collections: &Collections) -> DriverResult<Vec<Document>> {
    let from = stage_str("$lookup", argument, "from")?;
    let local_field = stage_str("$lookup", argument, "localField")?;
    let foreign_field = stage_str("$lookup", argument, "foreignField")?;
    let alias = stage_str("$lookup", argument, "as")?;
    let foreign = collections.get(from).map(Vec::as_slice).unwrap_or_default();

    Ok(documents
        .into_iter()
        .map(|mut document| {
            let mut locals = Vec::new();
            for value in lookup(&document, local_field) {
                match value {
                    Bson::Array(items) => locals.extend(items.iter().cloned()),
                    value => locals.push(value.clone()),
                }
            }
            if locals.is_empty() {
                locals.push(Bson::Null);
            }

            let matched = foreign
                .iter()
                .filter(|candidate| {
                    let values = lookup(candidate, foreign_field);
                    locals.iter().any(|local| equals(&values, local))
                })
                .cloned()
                .map(Bson::Document)
                .collect();

            document.insert(alias, Bson::Array(matched));
            document
        })
        .collect())
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> DriverResult<Vec<Document>> {
    let (path, preserve) = match argument {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(options) => (
            stage_str("$unwind", options, "path")?,
            options.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        other => return Err(DriverError::Unsupported(format!("$unwind expects a path, got {other}"))),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| DriverError::Unsupported(format!("$unwind path `{path}` must start with `$`")))?;

    let mut unwound = Vec::with_capacity(documents.len());
    for mut document in documents {
        match document.remove(field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    copy.insert(field, item);
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) | None => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(Bson::Null) => {
                if preserve {
                    document.insert(field, Bson::Null);
                    unwound.push(document);
                }
            }
            Some(value) => {
                document.insert(field, value);
                unwound.push(document);
            }
        }
    }

    Ok(unwound)
}

enum Accumulator<'s> {
    Sum(&'s Bson),
    Avg(&'s Bson),
}

#[derive(Default, Clone)]
struct Total {
    sum: f64,
    count: u64,
    fractional: bool,
}

impl Total {
    fn add(&mut self, value: &Bson) {
        let value = match value {
            Bson::Int32(n) => *n as f64,
            Bson::Int64(n) => *n as f64,
            Bson::Double(n) => {
                self.fractional = true;
                *n
            }
            _ => return,
        };
        self.sum += value;
        self.count += 1;
    }
}

/// `$group`. Groups are emitted in the order their key was first seen.
fn group(documents: Vec<Document>, argument: &Document) -> DriverResult<Vec<Document>> {
    let key = argument
        .get("_id")
        .ok_or_else(|| DriverError::Unsupported("$group requires an `_id` expression".to_string()))?;

    let accumulators = argument
        .iter()
        .filter(|(name, _)| name.as_str() != "_id")
        .map(|(name, accumulator)| {
            let accumulator = stage_document("$group", accumulator)?;
            let accumulator = match accumulator.iter().next() {
                Some((operator, expression)) if operator == "$sum" => Accumulator::Sum(expression),
                Some((operator, expression)) if operator == "$avg" => Accumulator::Avg(expression),
                _ => {
                    return Err(DriverError::Unsupported(format!("accumulator {accumulator} on `{name}`")));
                }
            };
            Ok((name.as_str(), accumulator))
        })
        .collect::<DriverResult<Vec<_>>>()?;

    let mut groups: Vec<(Bson, Vec<Total>)> = Vec::new();
    for document in &documents {
        let group_key = evaluate(document, key)?;
        let index = match groups
            .iter()
            .position(|(existing, _)| Comparable::from(existing) == Comparable::from(&group_key))
        {
            Some(index) => index,
            None => {
                groups.push((group_key, vec![Total::default(); accumulators.len()]));
                groups.len() - 1
            }
        };

        for ((_, accumulator), total) in accumulators.iter().zip(groups[index].1.iter_mut()) {
            let (Accumulator::Sum(expression) | Accumulator::Avg(expression)) = accumulator;
            total.add(&evaluate(document, expression)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, totals)| {
            let mut row = doc! { "_id": key };
            for ((name, accumulator), total) in accumulators.iter().zip(totals) {
                let value = match accumulator {
                    Accumulator::Sum(_) if total.fractional => Bson::Double(total.sum),
                    Accumulator::Sum(_) => Bson::Int64(total.sum as i64),
                    Accumulator::Avg(_) if total.count == 0 => Bson::Null,
                    Accumulator::Avg(_) => Bson::Double(total.sum / total.count as f64),
                };
                row.insert(*name, value);
            }
            row
        })
        .collect())
}

/// Evaluates a field reference (`"$path"`), a literal or a `$dateTrunc` expression.
fn evaluate(document: &Document, expression: &Bson) -> DriverResult<Bson> {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => {
            Ok(first_value(document, &reference[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Document(operator) => match operator.iter().next() {
            Some((name, argument)) if name == "$dateTrunc" => date_trunc(document, stage_document(name, argument)?),
            Some((name, _)) if name.starts_with('$') => {
                Err(DriverError::Unsupported(format!("expression operator {name}")))
            }
            _ => operator
                .iter()
                .map(|(field, value)| Ok((field.clone(), evaluate(document, value)?)))
                .collect::<DriverResult<Document>>()
                .map(Bson::Document),
        },
        literal => Ok(literal.clone()),
    }
}

fn date_trunc(document: &Document, argument: &Document) -> DriverResult<Bson> {
    let unit = stage_str("$dateTrunc", argument, "unit")?;
    let interval = TimeInterval::from_unit(unit)
        .ok_or_else(|| DriverError::Unsupported(format!("$dateTrunc unit `{unit}`")))?;
    if let Ok(start) = argument.get_str("startOfWeek")
        && !start.eq_ignore_ascii_case("monday")
    {
        return Err(DriverError::Unsupported(format!("weeks starting on {start}")));
    }

    match evaluate(document, argument.get("date").unwrap_or(&Bson::Null))? {
        Bson::DateTime(date) => {
            let instant: DateTime<Utc> = date.to_chrono();
            Ok(temporal::to_bson(interval.truncate(instant)))
        }
        Bson::Null => Ok(Bson::Null),
        other => Err(DriverError::Backend(format!("$dateTrunc expects a date, got {other}"))),
    }
}
