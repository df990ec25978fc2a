//! Detector backed by an HTTP model server.

use std::time::Duration;

use serde_json::json;
use tokio::runtime::Handle;

use super::{DetectionError, Detector, RawDetections};
use crate::decode::DecodedImage;

/// Posts images to a model server and parses its boxes.
///
/// Request body: `{"image": <base64>, "format": "jpeg", "confidence": 0.5}`.
/// Response body: `{"detections": [{"class", "confidence", "bbox"}], "person_detected"?}`.
///
/// `detect` is blocking: it drives the async client on the runtime that built
/// the detector, so it must be called from a blocking thread, never from a
/// task.
pub struct HttpDetector {
    endpoint: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpDetector {
    /// Create a detector. Must be called from within a tokio runtime.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Request(e.to_string()))?;
        let runtime = Handle::try_current().map_err(|e| DetectionError::Request(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
            runtime,
        })
    }

    async fn request(&self, image: &DecodedImage, confidence: f32) -> Result<RawDetections, DetectionError> {
        let body = json!({
            "image": image.to_base64(),
            "format": image.format().as_str(),
            "confidence": confidence,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DetectionError::Model(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))
    }
}

impl Detector for HttpDetector {
    fn name(&self) -> &str {
        "http"
    }

    fn detect(&self, image: &DecodedImage, confidence: f32) -> Result<RawDetections, DetectionError> {
        self.runtime.block_on(self.request(image, confidence))
    }
}
