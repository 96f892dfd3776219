#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plate_tracker::engine::DedupEngine;
use plate_tracker::error::SinkError;
use plate_tracker::publisher::Publisher;
use plate_tracker::sink::{Publication, PublicationSink};
use plate_tracker::state::DedupSettings;
use plate_tracker::time::ManualTime;
use reqwest::StatusCode;
use tokio::sync::Notify;

pub const STREAM_ID: u64 = 7;

/// Keeps every publication in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    publications: Arc<Mutex<Vec<Publication>>>,
    published: Arc<Notify>,
}

impl MemorySink {
    pub fn len(&self) -> usize {
        self.publications.lock().unwrap().len()
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.publications.lock().unwrap().clone()
    }

    /// Wait until at least `count` publications arrived, or panic after a second.
    pub async fn wait_for(&self, count: usize) -> Vec<Publication> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let notified = self.published.notified();
                if self.len() >= count {
                    return self.publications();
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for publications")
    }
}

#[async_trait]
impl PublicationSink for MemorySink {
    async fn publish(&self, publication: &Publication) -> Result<(), SinkError> {
        self.publications.lock().unwrap().push(publication.clone());
        self.published.notify_waiters();
        Ok(())
    }
}

/// Rejects every publication.
pub struct FailingSink {}

#[async_trait]
impl PublicationSink for FailingSink {
    async fn publish(&self, _publication: &Publication) -> Result<(), SinkError> {
        Err(SinkError::Rejected(StatusCode::SERVICE_UNAVAILABLE))
    }
}

pub fn settings(scan_ms: u64, lost_ms: u64) -> DedupSettings {
    DedupSettings {
        confidence_threshold: 80.0,
        lost_window: Duration::from_millis(lost_ms),
        scan_window: Duration::from_millis(scan_ms),
    }
}

/// An engine on a manual clock, publishing to memory.
pub fn engine(settings: DedupSettings) -> (Arc<DedupEngine<ManualTime>>, MemorySink, ManualTime) {
    let sink = MemorySink::default();
    let clock = ManualTime::new();
    let publisher = Publisher::new(Arc::new(sink.clone()), STREAM_ID);
    let engine = Arc::new(DedupEngine::new(settings, publisher, clock.clone()));

    (engine, sink, clock)
}

/// One recognizer frame holding the given readings.
pub fn frame(readings: &[(&str, f64)]) -> String {
    let results: Vec<serde_json::Value> = readings
        .iter()
        .map(|(plate, confidence)| {
            serde_json::json!({
                "plate": plate,
                "confidence": confidence,
                "matches_template": 0,
                "plate_index": 0,
                "region": "",
            })
        })
        .collect();

    serde_json::json!({
        "version": 2,
        "data_type": "alpr_results",
        "epoch_time": 1488558312457u64,
        "img_width": 1280,
        "img_height": 720,
        "processing_time_ms": 70.5,
        "results": results,
    })
    .to_string()
}
