use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// One frame of recognizer output, as written by `alpr -j`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub version: f32,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub epoch_time: f64,
    #[serde(default)]
    pub img_width: u32,
    #[serde(default)]
    pub img_height: u32,
    #[serde(default)]
    pub processing_time_ms: f64,
    pub results: Vec<RawEvent>,
}

/// A single plate reading within a frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawEvent {
    pub plate: String,
    pub confidence: f64,
    #[serde(default)]
    pub matches_template: i32,
    #[serde(default)]
    pub plate_index: i32,
    #[serde(default)]
    pub region: String,
}

impl RawEvent {
    pub fn new(plate: &str, confidence: f64) -> Self {
        Self {
            plate: plate.to_owned(),
            confidence,
            ..Default::default()
        }
    }
}

/// Parse one message from the recognizer.
pub fn decode(message: &str) -> Result<RecognitionResponse, DecodeError> {
    Ok(serde_json::from_str(message)?)
}
