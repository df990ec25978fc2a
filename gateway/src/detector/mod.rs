//! Detection engine abstraction.
//!
//! The model itself lives outside the gateway. A [`Detector`] is a blocking
//! call that turns an image into labelled boxes; [`DetectionEngine`] wraps it
//! with the PPE class table to produce a [`DetectionResult`]. Detectors are
//! only ever invoked from the worker pool's blocking threads.

mod classes;
mod http;

pub use classes::{default_mappings, ClassTable, DEFAULT_CLASS_MAPPINGS};
pub use http::HttpDetector;

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use ppe_common::DetectionResult;

use crate::decode::DecodedImage;

/// One labelled box as reported by a detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDetection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// Everything a detector reports for one image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDetections {
    #[serde(default)]
    pub detections: Vec<RawDetection>,
    /// `Some(false)` when the model saw no person in the image.
    #[serde(default, rename = "person_detected")]
    pub person_present: Option<bool>,
}

/// Failure of a single detection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    #[error("model error: {0}")]
    Model(String),

    #[error("detector request failed: {0}")]
    Request(String),

    #[error("invalid detector response: {0}")]
    InvalidResponse(String),

    #[error("detector unavailable")]
    Unavailable,

    #[error("detector panicked: {0}")]
    Panicked(String),
}

/// Blocking detection backend.
pub trait Detector: Send + Sync {
    /// Short name used in logs and the status endpoint.
    fn name(&self) -> &str;

    /// Whether the backend can serve requests.
    fn is_ready(&self) -> bool {
        true
    }

    /// Run detection on one image. May block for seconds.
    fn detect(&self, image: &DecodedImage, confidence: f32) -> Result<RawDetections, DetectionError>;
}

/// Placeholder used when no model server is configured.
#[derive(Debug, Default)]
pub struct UnavailableDetector;

impl Detector for UnavailableDetector {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn detect(&self, _image: &DecodedImage, _confidence: f32) -> Result<RawDetections, DetectionError> {
        Err(DetectionError::Unavailable)
    }
}

/// A detector paired with the class table that interprets its labels.
pub struct DetectionEngine {
    detector: Arc<dyn Detector>,
    classes: ClassTable,
}

impl DetectionEngine {
    pub fn new(detector: Arc<dyn Detector>, classes: ClassTable) -> Self {
        Self { detector, classes }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_ready()
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Run the detector and summarise its output. Blocking.
    pub fn run(&self, image: &DecodedImage, confidence: f32) -> Result<DetectionResult, DetectionError> {
        let start = Instant::now();
        let raw = self.detector.detect(image, confidence)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            detector = self.detector.name(),
            boxes = raw.detections.len(),
            elapsed_ms,
            "Detection finished"
        );

        Ok(self.classes.summarize(raw, confidence, elapsed_ms))
    }
}
