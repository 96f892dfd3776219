use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;

use crate::event::RawEvent;
use crate::metrics_consts::{
    BATCH_DURATION, CANDIDATES_TRACKED, CONFIRMED_TRACKED, PLATES_CONFIRMED, READINGS_RECEIVED,
};
use crate::publisher::Publisher;
use crate::state::{DedupSettings, DedupState, TrackedPlate};
use crate::time::{MonotonicTime, TimeSource};

/// Owns the tracking state and publishes every confirmed plate exactly once.
///
/// All state changes for a batch happen under one lock, and the clock is read while
/// holding it, so timestamps never go backwards between batches. Publication happens
/// after the lock is released and is not awaited.
pub struct DedupEngine<T = MonotonicTime> {
    state: Mutex<DedupState>,
    settings: DedupSettings,
    publisher: Publisher,
    clock: T,
}

impl<T: TimeSource> DedupEngine<T> {
    pub fn new(settings: DedupSettings, publisher: Publisher, clock: T) -> Self {
        Self {
            state: Mutex::new(DedupState::new()),
            settings,
            publisher,
            clock,
        }
    }

    /// Apply one decoded batch of readings and return the plates it confirmed. The returned
    /// plates have already been handed to the publisher.
    pub async fn process_batch(&self, events: &[RawEvent]) -> Vec<TrackedPlate> {
        let start = Instant::now();

        let (promoted, candidates, confirmed) = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            let promoted = state.apply(events, &self.settings, now);
            (promoted, state.candidates().len(), state.confirmed().len())
        };

        metrics::counter!(READINGS_RECEIVED).increment(events.len() as u64);
        metrics::gauge!(CANDIDATES_TRACKED).set(candidates as f64);
        metrics::gauge!(CONFIRMED_TRACKED).set(confirmed as f64);
        metrics::histogram!(BATCH_DURATION).record(start.elapsed().as_secs_f64());

        if !promoted.is_empty() {
            for plate in &promoted {
                info!(plate = %plate.plate, confidence = plate.confidence, "plate confirmed");
            }
            metrics::counter!(PLATES_CONFIRMED).increment(promoted.len() as u64);
            self.publisher.spawn(&promoted);
        }

        promoted
    }

    /// Run expiry and promotion without new readings.
    pub async fn tick(&self) -> Vec<TrackedPlate> {
        self.process_batch(&[]).await
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> DedupState {
        self.state.lock().await.clone()
    }
}
