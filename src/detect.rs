use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::frame::Frame;

/// Detection class treated as "of interest" by the gate
const PERSON_CLASS: &str = "person";

/// One labeled detection returned by the detector capability
#[derive(Debug, Clone)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    /// Bounding box as (x, y, width, height) in pixels
    pub bbox: (f32, f32, f32, f32),
}

/// Black-box object detector capability
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Outcome of consulting the gate for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether the frame should be kept
    pub keep: bool,
    /// Whether a person was positively detected (false on fail-open paths)
    pub person_detected: bool,
}

/// Gate deciding whether a sampled frame is worth persisting.
///
/// The detector may not be loaded yet, and may fail at inference time. Both
/// states fail open: the frame is kept rather than silently dropped, because
/// losing evidence is worse than keeping an uninteresting sample.
pub struct DetectionGate {
    detector: Option<Arc<dyn Detector>>,
}

impl DetectionGate {
    pub fn new(detector: Option<Arc<dyn Detector>>) -> Self {
        Self { detector }
    }

    /// Gate with no detector attached; everything passes
    pub fn disabled() -> Self {
        Self { detector: None }
    }

    /// Decide whether `frame` should be kept.
    ///
    /// With gating disabled every frame passes. Detector errors are logged
    /// and never surfaced to the caller.
    pub async fn should_keep(&self, frame: &Frame, gate_enabled: bool) -> GateDecision {
        if !gate_enabled {
            return GateDecision {
                keep: true,
                person_detected: false,
            };
        }

        let detector = match &self.detector {
            Some(detector) => detector,
            None => {
                // Fail open: model not loaded yet
                warn!("Detection gate enabled but detector unavailable, keeping frame");
                return GateDecision {
                    keep: true,
                    person_detected: false,
                };
            }
        };

        match detector.detect(frame).await {
            Ok(detections) => {
                let person_detected = detections
                    .iter()
                    .any(|d| d.class.eq_ignore_ascii_case(PERSON_CLASS));
                debug!(
                    "Detector returned {} detections, person={}",
                    detections.len(),
                    person_detected
                );
                GateDecision {
                    keep: person_detected,
                    person_detected,
                }
            }
            Err(e) => {
                // Fail open: inference error
                warn!("Detector failed ({}), keeping frame", e);
                GateDecision {
                    keep: true,
                    person_detected: false,
                }
            }
        }
    }
}
