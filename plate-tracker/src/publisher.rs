use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::SinkError;
use crate::metrics_consts::{PUBLICATIONS, PUBLISH_DURATION};
use crate::sink::{Publication, PublicationSink};
use crate::state::TrackedPlate;

/// Called for every publication the sink failed to deliver.
pub type ErrorObserver = Arc<dyn Fn(&Publication, &SinkError) + Send + Sync>;

/// Hands confirmed plates to a sink without waiting for delivery.
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn PublicationSink>,
    stream_id: u64,
    on_error: ErrorObserver,
}

impl Publisher {
    pub fn new(sink: Arc<dyn PublicationSink>, stream_id: u64) -> Self {
        Self {
            sink,
            stream_id,
            on_error: Arc::new(log_publish_error),
        }
    }

    pub fn with_error_observer(mut self, on_error: ErrorObserver) -> Self {
        self.on_error = on_error;
        self
    }

    /// Spawn a task delivering one observation per plate, in order. Failures are reported
    /// to the error observer; nothing is retried.
    pub fn spawn(&self, plates: &[TrackedPlate]) -> JoinHandle<()> {
        let publications: Vec<Publication> = plates
            .iter()
            .map(|plate| Publication::observation(self.stream_id, plate))
            .collect();
        let sink = self.sink.clone();
        let on_error = self.on_error.clone();

        tokio::spawn(async move {
            for publication in publications {
                let start = Instant::now();
                let result = sink.publish(&publication).await;
                metrics::histogram!(PUBLISH_DURATION).record(start.elapsed().as_secs_f64());

                match result {
                    Ok(()) => {
                        metrics::counter!(PUBLICATIONS, "outcome" => "delivered").increment(1);
                        info!(
                            topic = %publication.topic,
                            "plate published: {}",
                            publication.payload
                        );
                    }
                    Err(e) => {
                        metrics::counter!(PUBLICATIONS, "outcome" => "failed").increment(1);
                        on_error(&publication, &e);
                    }
                }
            }
        })
    }
}

fn log_publish_error(publication: &Publication, error: &SinkError) {
    error!(
        topic = %publication.topic,
        payload = %publication.payload,
        "failed to publish plate: {}",
        error
    );
}
