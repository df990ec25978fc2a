//! Detection result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Label reported by the model (e.g., "hardhat").
    #[serde(rename = "class")]
    pub class_name: String,
    /// Confidence in the range `[0, 1]`.
    pub confidence: f32,
    /// Bounding box as `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
}

/// Outcome of running detection on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Whether each canonical PPE class was found.
    pub ppe_status: BTreeMap<String, bool>,
    /// Individual detections above the requested confidence.
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// True when every canonical class was found.
    pub is_compliant: bool,
    /// Processing latency in milliseconds.
    pub processing_time: f64,
    /// Whether a person was present in the image.
    #[serde(default = "default_has_person")]
    pub has_person: bool,
}

fn default_has_person() -> bool {
    true
}

impl DetectionResult {
    /// Canonical classes that were not found.
    pub fn missing(&self) -> Vec<&str> {
        self.ppe_status
            .iter()
            .filter(|(_, found)| !**found)
            .map(|(class, _)| class.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DetectionResult {
        let mut ppe_status = BTreeMap::new();
        ppe_status.insert("casco".to_string(), true);
        ppe_status.insert("guantes".to_string(), false);
        DetectionResult {
            ppe_status,
            detections: vec![Detection {
                class_name: "hardhat".to_string(),
                confidence: 0.89,
                bbox: [100.0, 50.0, 200.0, 150.0],
            }],
            is_compliant: false,
            processing_time: 45.2,
            has_person: true,
        }
    }

    #[test]
    fn test_detection_uses_class_key() {
        let json = serde_json::to_value(&sample()).unwrap();
        assert_eq!(json["detections"][0]["class"], "hardhat");
        assert!(json["detections"][0].get("class_name").is_none());
        assert_eq!(json["ppe_status"]["casco"], true);
    }

    #[test]
    fn test_missing_classes() {
        assert_eq!(sample().missing(), vec!["guantes"]);
    }

    #[test]
    fn test_has_person_defaults_to_true() {
        let json = r#"{
            "ppe_status": {"casco": true},
            "is_compliant": true,
            "processing_time": 12.5
        }"#;
        let result: DetectionResult = serde_json::from_str(json).unwrap();
        assert!(result.has_person);
        assert!(result.detections.is_empty());
    }
}
