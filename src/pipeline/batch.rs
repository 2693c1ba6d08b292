//! Batch learn: bounded concurrency, per-item isolation, progress events.

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{BatchEventData, Event, EventPayload, EventType};

use super::{LearnOptions, Pipeline};

/// One failed batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Index of the failed item in the input slice.
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch learn run.
///
/// A batch never aborts on item failure; failures are collected here and
/// the remaining items still run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// New entities across all successful items.
    pub entities_created: usize,
    /// New relationships across all successful items.
    pub relationships_created: usize,
    /// Failures, ordered by item index.
    pub errors: Vec<BatchError>,
}

impl Pipeline {
    /// Learn a batch of texts with at most `pipeline.max_concurrent`
    /// in flight.
    ///
    /// Each item runs as a full learn call with its own lifecycle events.
    /// Emits `batch.progress` after every item and exactly one
    /// `batch.completed` at the end, even for an empty batch.
    pub async fn learn_batch(
        &self,
        texts: &[String],
        options: &LearnOptions,
    ) -> Result<BatchSummary> {
        let total = texts.len();
        let started = Instant::now();
        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };

        let mut results = stream::iter(texts.iter().enumerate())
            .map(|(index, text)| async move { (index, self.learn(text, options).await) })
            .buffer_unordered(self.config.pipeline.max_concurrent.max(1));

        let mut completed = 0;
        while let Some((index, result)) = results.next().await {
            completed += 1;
            match result {
                Ok(learned) => {
                    summary.succeeded += 1;
                    summary.entities_created += learned.entities_created;
                    summary.relationships_created += learned.relationships_created;
                }
                Err(e) => {
                    warn!(index, error = %e, "batch item failed");
                    summary.failed += 1;
                    summary.errors.push(BatchError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
            self.events.emit(Event::new(
                EventType::BatchProgress,
                &self.scope().id,
                EventPayload::Batch(BatchEventData {
                    completed,
                    total,
                    succeeded: summary.succeeded,
                    failed: summary.failed,
                    entities_created: summary.entities_created,
                    relationships_created: summary.relationships_created,
                    eta_ms: estimate_eta_ms(started.elapsed(), completed, total),
                }),
            ));
        }

        summary.errors.sort_by_key(|e| e.index);
        self.events.emit(Event::new(
            EventType::BatchCompleted,
            &self.scope().id,
            EventPayload::Batch(BatchEventData {
                completed,
                total,
                succeeded: summary.succeeded,
                failed: summary.failed,
                entities_created: summary.entities_created,
                relationships_created: summary.relationships_created,
                eta_ms: None,
            }),
        ));
        debug!(
            total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }
}

/// Naive remaining-time estimate: average time per completed item times
/// items left. None until the first item completes or once all are done.
fn estimate_eta_ms(elapsed: Duration, completed: usize, total: usize) -> Option<u64> {
    if completed == 0 || completed >= total {
        return None;
    }
    let per_item = elapsed.as_millis() as u64 / completed as u64;
    Some(per_item * (total - completed) as u64)
}
