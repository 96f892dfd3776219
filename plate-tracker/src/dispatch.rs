//! Feeds recognizer messages to the engine, one at a time and in arrival order.
//!
//! A reader task drains the tokenizer into a bounded queue. When the queue is full the
//! reader stops pulling, which in turn stops reading the recognizer pipe. A single consumer
//! decodes queued messages and applies them to the engine, and a periodic tick keeps
//! confirmation and expiry running while no messages arrive.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use health::HealthHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::DedupEngine;
use crate::error::{TokenizerError, TrackerError};
use crate::event::decode;
use crate::metrics_consts::{MESSAGES_DROPPED, MESSAGES_RECEIVED, PENDING_MESSAGES};
use crate::time::TimeSource;

pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1000;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub messages: u64,
    pub decode_errors: u64,
    pub published: u64,
}

pub struct Dispatcher<T> {
    engine: Arc<DedupEngine<T>>,
    max_pending_messages: usize,
    tick_interval: Duration,
    liveness: Option<HealthHandle>,
}

impl<T> Dispatcher<T>
where
    T: TimeSource + 'static,
{
    pub fn new(engine: Arc<DedupEngine<T>>) -> Self {
        Self {
            engine,
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            tick_interval: DEFAULT_TICK_INTERVAL,
            liveness: None,
        }
    }

    /// Bound of the message queue. Zero is bumped to one.
    pub fn with_max_pending_messages(mut self, max_pending_messages: usize) -> Self {
        self.max_pending_messages = max_pending_messages.max(1);
        self
    }

    /// Interval between ticks. Zero is bumped to one millisecond.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Process messages until the stream ends, the stream fails or `shutdown` fires.
    ///
    /// A read error from the stream is fatal and returned once the queued messages have
    /// been processed. Messages that fail to decode are logged and dropped.
    pub async fn run<S>(
        self,
        messages: S,
        shutdown: CancellationToken,
    ) -> Result<DispatchSummary, TrackerError>
    where
        S: Stream<Item = Result<String, TokenizerError>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(self.max_pending_messages);
        let reader = spawn_reader(messages, tx);

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut summary = DispatchSummary::default();

        loop {
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping dispatcher");
                    reader.abort();
                    return Ok(summary);
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    metrics::gauge!(PENDING_MESSAGES).set(rx.len() as f64);
                    self.handle_message(&message, &mut summary).await;
                }
                _ = ticker.tick() => {
                    let promoted = self.engine.tick().await;
                    summary.published += promoted.len() as u64;
                }
            }
        }

        reader.await??;
        info!(
            messages = summary.messages,
            decode_errors = summary.decode_errors,
            published = summary.published,
            "recognizer output ended"
        );

        Ok(summary)
    }

    async fn handle_message(&self, message: &str, summary: &mut DispatchSummary) {
        summary.messages += 1;
        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        match decode(message) {
            Ok(response) => {
                let promoted = self.engine.process_batch(&response.results).await;
                summary.published += promoted.len() as u64;
            }
            Err(e) => {
                summary.decode_errors += 1;
                metrics::counter!(MESSAGES_DROPPED).increment(1);
                warn!(raw = message, "dropping message: {}", e);
            }
        }
    }
}

/// Drain `messages` into `tx`, stopping at the first read error.
fn spawn_reader<S>(
    messages: S,
    tx: mpsc::Sender<String>,
) -> JoinHandle<Result<(), TokenizerError>>
where
    S: Stream<Item = Result<String, TokenizerError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut messages = std::pin::pin!(messages);

        while let Some(message) = messages.next().await {
            if tx.send(message?).await.is_err() {
                // consumer is gone, nothing left to feed
                break;
            }
        }

        Ok(())
    })
}
