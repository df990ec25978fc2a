use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::decode::DecodedImage;
use crate::detector::{DetectionError, Detector, RawDetection, RawDetections};

/// What a [`MockDetector`] does with each image.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// One `casco` box at exactly the requested confidence.
    Echo,
    /// The same detections for every image.
    Fixed(RawDetections),
    /// Always fail with a model error.
    Fail(String),
    /// Panic when the requested confidence is below the threshold, echo otherwise.
    PanicBelow(f32),
}

/// Scriptable detector that records how it was called.
#[derive(Debug)]
pub struct MockDetector {
    behavior: MockBehavior,
    delay: Duration,
    ready: bool,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockDetector {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            ready: true,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn fixed(detections: RawDetections) -> Self {
        Self::new(MockBehavior::Fixed(detections))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(MockBehavior::Fail(message.to_string()))
    }

    pub fn panicking_below(threshold: f32) -> Self {
        Self::new(MockBehavior::PanicBelow(threshold))
    }

    /// Block each detection for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of detections observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn echo_box(confidence: f32) -> RawDetections {
        RawDetections {
            detections: vec![RawDetection {
                label: "casco".to_string(),
                confidence,
                bbox: [10.0, 10.0, 50.0, 50.0],
            }],
            person_present: Some(true),
        }
    }
}

impl Detector for MockDetector {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn detect(&self, _image: &DecodedImage, confidence: f32) -> Result<RawDetections, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Echo => Ok(Self::echo_box(confidence)),
            MockBehavior::Fixed(detections) => Ok(detections.clone()),
            MockBehavior::Fail(message) => Err(DetectionError::Model(message.clone())),
            MockBehavior::PanicBelow(threshold) => {
                if confidence < *threshold {
                    panic!("mock detector panicked at confidence {}", confidence);
                }
                Ok(Self::echo_box(confidence))
            }
        }
    }
}
