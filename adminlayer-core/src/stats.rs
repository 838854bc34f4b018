//! Statistics engine.
//!
//! Chart requests reuse the condition compiler for filtering, then append grouping
//! stages to the pipeline:
//!
//! - [`Stats::value`] - one scalar (`$group` on `null`)
//! - [`Stats::pie`] - one value per distinct key of a field, largest first
//! - [`Stats::line`] - one value per time bucket, empty buckets zero-filled
//!
//! Grouping keys and metric fields must be single-valued paths so that no record is
//! counted twice.

use std::collections::HashMap;

use bson::{Bson, Document, doc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    compiler::CompiledFilter,
    driver::StoreDriver,
    error::{AdapterError, AdapterResult},
    joiner::{RelationJoiner, render},
    request::FilterRequest,
    schema::FieldType,
    store::Context,
    temporal::{self, TimeInterval},
};

/// Converts a numeric BSON value.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// What is computed for each group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Number of records.
    Count,
    /// Sum of a numeric field.
    Sum(String),
    /// Average of a numeric field.
    Avg(String),
}

/// A single scalar over a filtered set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValueStatRequest {
    #[serde(default)]
    pub filter: FilterRequest,
    pub metric: Metric,
}

/// A metric per distinct value of a field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PieStatRequest {
    #[serde(default)]
    pub filter: FilterRequest,
    pub group_by: String,
    pub metric: Metric,
}

/// A metric per time bucket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineStatRequest {
    #[serde(default)]
    pub filter: FilterRequest,
    pub time_field: String,
    pub interval: TimeInterval,
    /// Inclusive range; every bucket it touches is returned. Defaults to the span of
    /// the non-empty buckets.
    #[serde(default)]
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub metric: Metric,
}

/// Key of a pie slice.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PieKey {
    Value(Bson),
    /// The folded tail, with its configured label.
    Others(String),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PieEntry {
    pub key: PieKey,
    pub value: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LineBucket {
    pub start: DateTime<Utc>,
    pub label: String,
    pub value: f64,
}

/// Chart statistics for one collection.
#[derive(Debug)]
pub struct Stats<'a, D: StoreDriver> {
    context: Context<'a, D>,
}

impl<'a, D: StoreDriver> Stats<'a, D> {
    pub(crate) fn new(context: Context<'a, D>) -> Self {
        Self { context }
    }

    fn name(&self) -> &'a str {
        self.context.name()
    }

    /// Computes one scalar. An empty set yields `0`.
    pub async fn value(&self, request: &ValueStatRequest) -> AdapterResult<f64> {
        let CompiledFilter { filter, mut joiner } = self.context.compiler().compile_filter(self.name(), &request.filter)?;
        let accumulator = self.accumulator(&request.metric, &mut joiner)?;

        let mut pipeline = render(joiner.stages());
        pipeline.push(doc! { "$match": filter });
        pipeline.push(doc! { "$group": { "_id": Bson::Null, "value": accumulator } });

        let rows = self.run(pipeline).await?;
        Ok(rows.first().and_then(|row| row.get("value")).and_then(as_f64).unwrap_or(0.0))
    }

    /// Computes one value per distinct key, sorted by value descending then key
    /// ascending. Beyond `pie_max_categories` the tail is folded into one slice.
    pub async fn pie(&self, request: &PieStatRequest) -> AdapterResult<Vec<PieEntry>> {
        let compiler = self.context.compiler();
        let CompiledFilter { filter, mut joiner } = compiler.compile_filter(self.name(), &request.filter)?;
        let key = compiler.resolve_single_valued(self.name(), &request.group_by, &mut joiner)?;
        let accumulator = self.accumulator(&request.metric, &mut joiner)?;

        let mut pipeline = render(joiner.stages());
        pipeline.push(doc! { "$match": filter });
        pipeline.push(doc! { "$group": {
            "_id": format!("${}", key.native_path),
            "value": accumulator,
            "count": { "$sum": 1 },
        } });
        pipeline.push(doc! { "$sort": { "value": -1, "_id": 1 } });

        let rows = self.run(pipeline).await?;
        let slices = rows
            .into_iter()
            .map(|mut row| {
                let value = row.get("value").and_then(as_f64).unwrap_or(0.0);
                let count = row.get("count").and_then(as_f64).unwrap_or(0.0);
                let key = row.remove("_id").unwrap_or(Bson::Null);
                (key, value, count)
            })
            .collect::<Vec<_>>();

        Ok(fold_pie(
            slices,
            self.context.config.pie_max_categories,
            &self.context.config.pie_others_label,
            matches!(request.metric, Metric::Avg(_)),
        ))
    }

    /// Computes one value per time bucket across the whole range, zero-filling the
    /// buckets without records. Records whose time field is null are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Operand`] when the range spans more than
    /// `max_line_buckets` buckets. An explicit range is checked before anything runs.
    pub async fn line(&self, request: &LineStatRequest) -> AdapterResult<Vec<LineBucket>> {
        let compiler = self.context.compiler();
        let CompiledFilter { filter, mut joiner } = compiler.compile_filter(self.name(), &request.filter)?;
        let time = compiler.resolve_single_valued(self.name(), &request.time_field, &mut joiner)?;
        if time.field.field_type != FieldType::Date {
            return Err(AdapterError::Schema(format!(
                "`{}` is not a date field and cannot be bucketed",
                request.time_field
            )));
        }
        let accumulator = self.accumulator(&request.metric, &mut joiner)?;
        let interval = request.interval;
        let max = self.context.config.max_line_buckets;
        let range = request
            .range
            .map(|(start, end)| (interval.truncate(start), interval.truncate(end)));

        let mut bounds = doc! { "$ne": Bson::Null };
        let mut starts = None;
        if let Some((first, last)) = range {
            let spanned = bucket_starts(interval, first, last, max)?;
            bounds.insert("$gte", temporal::to_bson(first));
            if let Some(end) = interval.next(last) {
                bounds.insert("$lt", temporal::to_bson(end));
            }
            starts = Some(spanned);
        }

        let mut truncation = doc! { "date": format!("${}", time.native_path), "unit": interval.unit() };
        if interval == TimeInterval::Week {
            truncation.insert("startOfWeek", "monday");
        }

        let mut pipeline = render(joiner.stages());
        pipeline.push(doc! { "$match": filter });
        pipeline.push(doc! { "$match": { time.native_path.as_str(): bounds } });
        pipeline.push(doc! { "$group": { "_id": { "$dateTrunc": truncation }, "value": accumulator } });
        pipeline.push(doc! { "$sort": { "_id": 1 } });

        let rows = self.run(pipeline).await?;
        let mut values = HashMap::new();
        for row in &rows {
            if let Some(Bson::DateTime(bucket)) = row.get("_id") {
                let value = row.get("value").and_then(as_f64).unwrap_or(0.0);
                *values.entry(interval.truncate(bucket.to_chrono())).or_insert(0.0) += value;
            }
        }

        let starts = match starts {
            Some(starts) => starts,
            None => match (values.keys().min(), values.keys().max()) {
                (Some(first), Some(last)) => bucket_starts(interval, *first, *last, max)?,
                _ => return Ok(Vec::new()),
            },
        };

        Ok(starts
            .into_iter()
            .map(|bucket| LineBucket {
                start: bucket,
                label: interval.label(bucket),
                value: values.get(&bucket).copied().unwrap_or(0.0),
            })
            .collect())
    }

    fn accumulator(&self, metric: &Metric, joiner: &mut RelationJoiner) -> AdapterResult<Document> {
        let compiler = self.context.compiler();
        let (operator, path) = match metric {
            Metric::Count => return Ok(doc! { "$sum": 1 }),
            Metric::Sum(path) => ("$sum", path),
            Metric::Avg(path) => ("$avg", path),
        };

        let field = compiler.resolve_single_valued(self.name(), path, joiner)?;
        if !matches!(field.field.field_type, FieldType::Number | FieldType::Json) {
            return Err(AdapterError::Schema(format!("`{path}` is not a numeric field")));
        }
        Ok(doc! { operator: format!("${}", field.native_path) })
    }

    async fn run(&self, pipeline: Vec<Document>) -> AdapterResult<Vec<Document>> {
        debug!(collection = self.name(), stages = pipeline.len(), "running statistics pipeline");
        self.context.aggregate(self.name(), pipeline).await
    }
}

/// Starts of the buckets from `first` to `last`, both included.
///
/// Fails once more than `max` buckets would be needed.
fn bucket_starts(
    interval: TimeInterval,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    max: usize,
) -> AdapterResult<Vec<DateTime<Utc>>> {
    let mut starts = Vec::new();
    let mut bucket = Some(first);
    while let Some(start) = bucket.filter(|start| *start <= last) {
        if starts.len() == max {
            return Err(AdapterError::Operand(format!(
                "the range from {first} to {last} spans more than {max} {} buckets",
                interval.unit()
            )));
        }
        starts.push(start);
        bucket = interval.next(start);
    }
    Ok(starts)
}

/// Keeps the first `max` slices and folds the rest into one.
///
/// Slices arrive as `(key, value, count)`. Averages are folded weighted by count.
fn fold_pie(
    mut slices: Vec<(Bson, f64, f64)>,
    max: Option<usize>,
    others_label: &str,
    average: bool,
) -> Vec<PieEntry> {
    let tail = match max {
        Some(max) if slices.len() > max => slices.split_off(max),
        _ => Vec::new(),
    };

    let mut entries = slices
        .into_iter()
        .map(|(key, value, _)| PieEntry { key: PieKey::Value(key), value })
        .collect::<Vec<_>>();

    if !tail.is_empty() {
        let value = if average {
            let count = tail.iter().map(|(_, _, count)| count).sum::<f64>();
            let total = tail.iter().map(|(_, value, count)| value * count).sum::<f64>();
            if count > 0.0 { total / count } else { 0.0 }
        } else {
            tail.iter().map(|(_, value, _)| value).sum()
        };
        entries.push(PieEntry { key: PieKey::Others(others_label.to_string()), value });
    }

    entries
}
