//! Batched record export.
//!
//! [`Exporter::stream`] compiles the request up front and returns a lazy stream of
//! record batches. Each poll fetches at most `export_batch_size` records ordered by the
//! requested sort plus `_id`; dropping the stream stops the export. A failing batch
//! ends the stream with [`AdapterError::PartialExport`], which carries the number of
//! rows already handed to the consumer.
//!
//! # Example
//!
//! ```ignore
//! use futures::TryStreamExt;
//!
//! let mut batches = store.exporter("orders")?.stream(&ListRequest::new())?;
//! while let Some(batch) = batches.try_next().await? {
//!     write_csv(&batch)?;
//! }
//! ```

use futures::{Stream, stream};
use tracing::debug;

use crate::{
    driver::StoreDriver,
    error::{AdapterError, AdapterResult},
    plan::QueryPlan,
    record::Record,
    request::ListRequest,
    store::Context,
};

/// Streams the records of one collection.
#[derive(Debug)]
pub struct Exporter<'a, D: StoreDriver> {
    context: Context<'a, D>,
}

enum ExportState {
    Running { skip: u64, flushed: u64 },
    Done,
}

impl<'a, D: StoreDriver> Exporter<'a, D> {
    pub(crate) fn new(context: Context<'a, D>) -> Self {
        Self { context }
    }

    /// Number of records fetched per batch.
    pub fn batch_size(&self) -> u64 {
        self.context.config.export_batch_size.max(1)
    }

    /// Returns the stream of batches matching `request`.
    ///
    /// The request's filter, sort, projection and hydration options apply; its window is
    /// ignored since the export covers the whole result set.
    ///
    /// # Errors
    ///
    /// Compilation errors are returned immediately, before any storage access.
    pub fn stream(
        &self,
        request: &ListRequest,
    ) -> AdapterResult<impl Stream<Item = AdapterResult<Vec<Record>>> + use<'a, D>> {
        let context = self.context;
        let plan = context.compiler().compile(context.name(), request)?;
        let batch_size = self.batch_size();
        let hydrate = request.hydrate;

        Ok(stream::unfold(
            ExportState::Running { skip: 0, flushed: 0 },
            move |state| {
                let plan = plan.clone();
                async move {
                    let ExportState::Running { skip, flushed } = state else {
                        return None;
                    };

                    match fetch_batch(context, &plan.with_window(skip, Some(batch_size)), hydrate).await {
                        Ok(records) if records.is_empty() => None,
                        Ok(records) => {
                            let fetched = records.len() as u64;
                            debug!(collection = %plan.collection, skip, fetched, "exported batch");
                            let next = if fetched < batch_size {
                                ExportState::Done
                            } else {
                                ExportState::Running { skip: skip + fetched, flushed: flushed + fetched }
                            };
                            Some((Ok(records), next))
                        }
                        Err(err) => Some((
                            Err(AdapterError::PartialExport { rows_flushed: flushed, source: Box::new(err) }),
                            ExportState::Done,
                        )),
                    }
                }
            },
        ))
    }
}

async fn fetch_batch<D: StoreDriver>(
    context: Context<'_, D>,
    plan: &QueryPlan,
    hydrate: bool,
) -> AdapterResult<Vec<Record>> {
    let mut records = context.fetch(plan).await?;
    if hydrate {
        context.hydrate(&mut records).await?;
    }
    Ok(records)
}
