//! Search-match annotation of listed records.
//!
//! When a list request carries a search term, every returned record is annotated with
//! the search fields whose value matches the term, so a panel can highlight why the
//! record is part of the result. Matching mirrors the search predicates of the
//! compiler: case-insensitive containment for strings, equality for numbers, ids and
//! enumerations.
//!
//! Only values present on the record are inspected: local fields, embedded elements,
//! and fields of hydrated belongs-to documents one relation away.

use bson::{Bson, Document};

use crate::{
    compiler::search_paths,
    error::AdapterResult,
    record::{Record, RecordId},
    resolver::PathResolver,
    schema::{CollectionSchema, FieldSchema, FieldType, RelationKind},
    stats::as_f64,
};

/// Sets [`Record::search_matches`] on each record.
pub(crate) fn annotate_search_matches(
    resolver: &PathResolver<'_>,
    collection: &CollectionSchema,
    records: &mut [Record],
    term: &str,
) -> AdapterResult<()> {
    let mut targets = Vec::new();
    for path in search_paths(collection) {
        let resolved = resolver.resolve(&collection.name, &path)?;
        let source = match resolved.joins.as_slice() {
            [] => Source::Local,
            [join] if join.kind == RelationKind::BelongsTo && !join.local_field.contains('.') => {
                Source::Related(join.local_field.clone())
            }
            _ => continue,
        };
        let segments = match source {
            Source::Local => path.split('.').map(str::to_string).collect::<Vec<_>>(),
            Source::Related(_) => path.split('.').skip(1).map(str::to_string).collect(),
        };
        targets.push(Target { path, field: resolved.field, source, segments });
    }

    let needle = term.to_lowercase();
    for record in records {
        let matched = targets
            .iter()
            .filter(|target| {
                let document = match &target.source {
                    Source::Local => Some(record.fields()),
                    Source::Related(field) => record.related(field),
                };
                let mut values = Vec::new();
                if let Some(document) = document {
                    collect_values(document, &target.segments, &mut values);
                }
                values.iter().any(|value| matches(target.field, value, term, &needle))
            })
            .map(|target| target.path.clone())
            .collect();
        record.set_search_matches(matched);
    }

    Ok(())
}

enum Source {
    Local,
    /// A hydrated belongs-to document, keyed by the relation field.
    Related(String),
}

struct Target<'a> {
    path: String,
    field: &'a FieldSchema,
    source: Source,
    segments: Vec<String>,
}

/// Collects the values found at `segments`, descending into arrays of documents.
fn collect_values<'d>(document: &'d Document, segments: &[String], out: &mut Vec<&'d Bson>) {
    let Some((head, rest)) = segments.split_first() else { return };
    let Some(value) = document.get(head) else { return };
    descend(value, rest, out);
}

fn descend<'d>(value: &'d Bson, rest: &[String], out: &mut Vec<&'d Bson>) {
    match value {
        Bson::Array(items) => items.iter().for_each(|item| descend(item, rest, out)),
        Bson::Document(document) if !rest.is_empty() => collect_values(document, rest, out),
        _ if rest.is_empty() => out.push(value),
        _ => {}
    }
}

fn matches(field: &FieldSchema, value: &Bson, term: &str, needle: &str) -> bool {
    match field.field_type {
        FieldType::String => value.as_str().is_some_and(|text| text.to_lowercase().contains(needle)),
        FieldType::Enum => value.as_str() == Some(term),
        FieldType::Number => match (term.parse::<f64>(), as_f64(value)) {
            (Ok(expected), Some(actual)) => expected == actual,
            _ => false,
        },
        FieldType::Id => RecordId::parse_str(term).is_some_and(|id| RecordId::from_bson(value) == Some(id)),
        FieldType::Boolean | FieldType::Date | FieldType::Json => false,
    }
}
