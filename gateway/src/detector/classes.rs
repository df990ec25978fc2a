//! PPE class table: maps model labels onto canonical PPE classes.

use std::collections::BTreeMap;

use ppe_common::{Detection, DetectionResult};

use super::RawDetections;

/// Built-in mapping from canonical class to label synonyms.
pub const DEFAULT_CLASS_MAPPINGS: &[(&str, &[&str])] = &[
    ("casco", &["casco", "helmet", "hardhat"]),
    ("lentes", &["gafas", "goggles", "glasses"]),
    ("guantes", &["guantes", "gloves"]),
    ("botas", &["botas", "boots"]),
    ("ropa", &["chaleco", "protector", "vest"]),
    ("tapabocas", &["tapabocas", "mask"]),
];

/// Canonical PPE classes and the label fragments that identify them.
///
/// A label matches a class when it contains one of the class's synonyms,
/// ignoring case. Classes are tried in order and the first match wins: the
/// built-in classes in [`DEFAULT_CLASS_MAPPINGS`] order, then any other
/// configured class by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    classes: Vec<(String, Vec<String>)>,
}

impl ClassTable {
    pub fn new(mut mappings: BTreeMap<String, Vec<String>>) -> Self {
        let mut ordered = Vec::with_capacity(mappings.len());
        for (class, _) in DEFAULT_CLASS_MAPPINGS {
            if let Some(synonyms) = mappings.remove(*class) {
                ordered.push((class.to_string(), synonyms));
            }
        }
        ordered.extend(mappings);

        let classes = ordered
            .into_iter()
            .map(|(class, synonyms)| {
                let synonyms = synonyms
                    .into_iter()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                (class, synonyms)
            })
            .collect();
        Self { classes }
    }

    /// Canonical class names, in matching order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|(class, _)| class.as_str())
    }

    /// Canonical class for a model label, if any.
    pub fn classify(&self, label: &str) -> Option<&str> {
        let label = label.to_lowercase();
        self.classes
            .iter()
            .find(|(_, synonyms)| synonyms.iter().any(|s| label.contains(s.as_str())))
            .map(|(class, _)| class.as_str())
    }

    /// Build the client-facing result from raw detector output.
    ///
    /// Boxes below `confidence` are dropped. When the detector saw no person
    /// there is nothing to check and the result is compliant.
    pub fn summarize(&self, raw: RawDetections, confidence: f32, processing_time: f64) -> DetectionResult {
        let mut ppe_status: BTreeMap<String, bool> =
            self.class_names().map(|class| (class.to_string(), false)).collect();

        if raw.person_present == Some(false) {
            return DetectionResult {
                ppe_status,
                detections: Vec::new(),
                is_compliant: true,
                processing_time,
                has_person: false,
            };
        }

        let mut detections = Vec::with_capacity(raw.detections.len());
        for det in raw.detections.into_iter().filter(|d| d.confidence >= confidence) {
            match self.classify(&det.label) {
                Some(class) => {
                    tracing::trace!(label = %det.label, class, "Label matched");
                    ppe_status.insert(class.to_string(), true);
                }
                None => tracing::trace!(label = %det.label, "Label matched no PPE class"),
            }
            detections.push(Detection {
                class_name: det.label,
                confidence: det.confidence,
                bbox: det.bbox,
            });
        }

        let is_compliant = !ppe_status.is_empty() && ppe_status.values().all(|found| *found);

        DetectionResult {
            ppe_status,
            detections,
            is_compliant,
            processing_time,
            has_person: true,
        }
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new(default_mappings())
    }
}

/// [`DEFAULT_CLASS_MAPPINGS`] as an owned map, for configuration defaults.
pub fn default_mappings() -> BTreeMap<String, Vec<String>> {
    DEFAULT_CLASS_MAPPINGS
        .iter()
        .map(|(class, synonyms)| {
            (
                class.to_string(),
                synonyms.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect()
}
