// Priority / fairness strategy
//
// Picks the next lane from a scored candidate window and keeps the per-consumer scan
// cursor in the shared store.

mod oldest;
mod weighted;

pub use oldest::choose_oldest;
pub use weighted::{queue_weight, WeightedChoice, MAX_AGE_WEIGHT, MAX_SIZE_WEIGHT};

use std::sync::Arc;
use tracing::debug;

use crate::domain::{QueueRange, QueueWithScores, RunQueueKeyProducer};
use crate::error::Result;
use crate::port::ScanCursorStore;

/// Default number of lanes read from the parent index per poll
pub const DEFAULT_QUEUE_SELECTION_COUNT: u64 = 12;

/// Strategy variants, selected at construction
#[derive(Debug)]
pub enum PriorityStrategy {
    /// Random weighted choice (default fairness)
    WeightedChoice(WeightedChoice),
    /// Deterministic: highest age first
    OldestFirst,
}

impl PriorityStrategy {
    pub fn weighted(seed: Option<u64>) -> Self {
        PriorityStrategy::WeightedChoice(WeightedChoice::new(seed))
    }

    pub fn oldest_first() -> Self {
        PriorityStrategy::OldestFirst
    }

    pub fn name(&self) -> &'static str {
        match self {
            PriorityStrategy::WeightedChoice(_) => "weighted_choice",
            PriorityStrategy::OldestFirst => "oldest_first",
        }
    }

    /// Choose among lanes with headroom at both queue and environment level
    pub fn choose(&self, queues: &[QueueWithScores]) -> QueueChoice {
        let eligible: Vec<&QueueWithScores> = queues.iter().filter(|q| q.is_eligible()).collect();

        let chosen = match self {
            PriorityStrategy::WeightedChoice(weighted) => weighted.choose(&eligible),
            PriorityStrategy::OldestFirst => choose_oldest(&eligible),
        };

        match chosen {
            Some(queue) => QueueChoice::Queue(queue.queue.clone()),
            None => QueueChoice::Abort,
        }
    }
}

impl Default for PriorityStrategy {
    fn default() -> Self {
        Self::weighted(None)
    }
}

/// Strategy decision for one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueChoice {
    Queue(String),
    Abort,
}

/// Choice plus the range the next poll should read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSelection {
    pub choice: QueueChoice,
    pub next_range: QueueRange,
}

/// Strategy bound to the store-persisted scan cursor
pub struct QueueSelectionStrategy {
    strategy: PriorityStrategy,
    cursors: Arc<dyn ScanCursorStore>,
    keys: RunQueueKeyProducer,
    queue_selection_count: u64,
}

impl QueueSelectionStrategy {
    pub fn new(
        strategy: PriorityStrategy,
        cursors: Arc<dyn ScanCursorStore>,
        keys: RunQueueKeyProducer,
        queue_selection_count: u64,
    ) -> Self {
        Self {
            strategy,
            cursors,
            keys,
            queue_selection_count: queue_selection_count.max(1),
        }
    }

    pub fn strategy(&self) -> &PriorityStrategy {
        &self.strategy
    }

    /// Window to read for `(parent_queue, consumer_id)`; `{0, count}` until a cursor exists
    pub async fn next_candidate_selection(
        &self,
        parent_queue: &str,
        consumer_id: &str,
    ) -> Result<QueueRange> {
        let cursor_key = self.keys.scan_cursor_key(parent_queue, consumer_id);
        let range = self
            .cursors
            .load_cursor(&cursor_key)
            .await?
            .map(|range| QueueRange::new(range.offset, self.queue_selection_count))
            .unwrap_or_else(|| QueueRange::first(self.queue_selection_count));
        Ok(range)
    }

    /// Choose from `queues` (the window read at `previous_range`) and persist the next range.
    ///
    /// The next range depends only on `previous_range` and the window length, so calling
    /// this again for the same window writes the same cursor.
    pub async fn choose_queue(
        &self,
        queues: &[QueueWithScores],
        parent_queue: &str,
        consumer_id: &str,
        previous_range: QueueRange,
    ) -> Result<QueueSelection> {
        let next_range = previous_range.advance(queues.len());
        let cursor_key = self.keys.scan_cursor_key(parent_queue, consumer_id);
        self.cursors.save_cursor(&cursor_key, next_range).await?;

        let choice = self.strategy.choose(queues);

        debug!(
            parent_queue = %parent_queue,
            consumer_id = %consumer_id,
            strategy = self.strategy.name(),
            candidates = queues.len(),
            choice = ?choice,
            next_offset = next_range.offset,
            "Queue selection"
        );

        Ok(QueueSelection { choice, next_range })
    }
}
