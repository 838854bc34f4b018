//! Update operators for in-memory documents.
//!
//! Supports `$set` (dotted paths and the positional `$` segment), `$unset`,
//! `$addToSet` (with `$each`) and `$pull` (a value or an `$in` list). Every operator of an
//! update is applied to the same document while the caller holds the write lock.

use bson::{Bson, Document};

use adminlayer_core::error::{DriverError, DriverResult};

use crate::evaluator::{Comparable, FilterEvaluator};

/// Applies an update document and reports whether the document changed.
pub(crate) fn apply(document: &mut Document, filter: &Document, update: &Document) -> DriverResult<bool> {
    let before = document.clone();

    for (operator, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DriverError::Unsupported(format!("{operator} expects a document, got {fields}")))?;

        for (path, value) in fields {
            let path = resolve_positional(document, filter, path)?;
            let segments = path.split('.').collect::<Vec<_>>();

            match operator.as_str() {
                "$set" => set_path(document, &segments, value.clone())?,
                "$unset" => remove_path(document, &segments),
                "$addToSet" => {
                    let values = match value {
                        Bson::Document(each) if each.contains_key("$each") => each
                            .get_array("$each")
                            .map_err(|_| DriverError::Unsupported("$each expects an array".to_string()))?
                            .clone(),
                        value => vec![value.clone()],
                    };
                    add_to_set(document, &segments, values)?;
                }
                "$pull" => {
                    let values = match value {
                        Bson::Document(condition) if condition.contains_key("$in") => condition
                            .get_array("$in")
                            .map_err(|_| DriverError::Unsupported("$in expects an array".to_string()))?
                            .clone(),
                        value => vec![value.clone()],
                    };
                    pull(document, &segments, &values);
                }
                other => return Err(DriverError::Unsupported(format!("update operator {other}"))),
            }
        }
    }

    Ok(*document != before)
}

/// Replaces a `.$` segment with the index of the first array element matching the
/// filter's conditions on that array.
fn resolve_positional(document: &Document, filter: &Document, path: &str) -> DriverResult<String> {
    let Some((array_path, rest)) = path.split_once(".$") else {
        return Ok(path.to_string());
    };

    let prefix = format!("{array_path}.");
    let element_filter = filter
        .iter()
        .filter_map(|(key, value)| key.strip_prefix(&prefix).map(|key| (key.to_string(), value.clone())))
        .collect::<Document>();

    let items = match crate::evaluator::first_value(document, array_path) {
        Some(Bson::Array(items)) => items,
        _ => return Err(DriverError::Backend(format!("positional update on non-array `{array_path}`"))),
    };

    for (index, item) in items.iter().enumerate() {
        if let Bson::Document(element) = item
            && FilterEvaluator::matches(element, &element_filter)?
        {
            return Ok(format!("{array_path}.{index}{rest}"));
        }
    }

    Err(DriverError::Backend(format!(
        "the positional operator did not find a matching element in `{array_path}`"
    )))
}

pub(crate) fn set_path(document: &mut Document, segments: &[&str], value: Bson) -> DriverResult<()> {
    let [head, rest @ ..] = segments else {
        return Ok(());
    };

    if rest.is_empty() {
        document.insert(*head, value);
        return Ok(());
    }

    let child = document
        .entry(head.to_string())
        .or_insert_with(|| Bson::Document(Document::new()));
    set_in_value(child, rest, value)
}

fn set_in_value(target: &mut Bson, segments: &[&str], value: Bson) -> DriverResult<()> {
    match target {
        Bson::Document(document) => set_path(document, segments, value),
        Bson::Array(items) => {
            let [head, rest @ ..] = segments else {
                return Ok(());
            };
            let index = head
                .parse::<usize>()
                .map_err(|_| DriverError::Backend(format!("cannot address array element `{head}`")))?;
            let item = items
                .get_mut(index)
                .ok_or_else(|| DriverError::Backend(format!("array index {index} out of bounds")))?;

            if rest.is_empty() {
                *item = value;
                Ok(())
            } else {
                set_in_value(item, rest, value)
            }
        }
        other => Err(DriverError::Backend(format!("cannot set a field inside {other}"))),
    }
}

pub(crate) fn remove_path(document: &mut Document, segments: &[&str]) {
    match segments {
        [] => {}
        [field] => {
            document.remove(*field);
        }
        [head, rest @ ..] => {
            if let Some(Bson::Document(child)) = document.get_mut(*head) {
                remove_path(child, rest);
            }
        }
    }
}

fn array_at<'d>(document: &'d mut Document, segments: &[&str]) -> DriverResult<&'d mut Vec<Bson>> {
    let path = segments.join(".");
    let [head, rest @ ..] = segments else {
        return Err(DriverError::Backend("empty update path".to_string()));
    };

    if rest.is_empty() {
        let slot = document.entry(head.to_string()).or_insert_with(|| Bson::Array(Vec::new()));
        if matches!(slot, Bson::Null) {
            *slot = Bson::Array(Vec::new());
        }
        return match slot {
            Bson::Array(items) => Ok(items),
            other => Err(DriverError::Backend(format!("`{path}` holds {other}, not an array"))),
        };
    }

    match document
        .entry(head.to_string())
        .or_insert_with(|| Bson::Document(Document::new()))
    {
        Bson::Document(child) => array_at(child, rest),
        other => Err(DriverError::Backend(format!("cannot descend into {other} at `{path}`"))),
    }
}

fn add_to_set(document: &mut Document, segments: &[&str], values: Vec<Bson>) -> DriverResult<()> {
    let items = array_at(document, segments)?;
    for value in values {
        let present = items
            .iter()
            .any(|item| Comparable::from(item) == Comparable::from(&value));
        if !present {
            items.push(value);
        }
    }
    Ok(())
}

fn pull(document: &mut Document, segments: &[&str], values: &[Bson]) {
    let Ok(items) = array_at(document, segments) else {
        return;
    };
    items.retain(|item| {
        !values
            .iter()
            .any(|value| Comparable::from(item) == Comparable::from(value))
    });
}
