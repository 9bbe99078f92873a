//! Per-frame presentation-attack heuristics.
//!
//! Runs before liveness evaluation and embedding: a rejected frame makes no
//! liveness progress and costs no inference.

use std::fmt;

use crate::config::PipelineConfig;
use crate::types::FaceObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofReason {
    /// More than one face in view.
    MultipleFaces,
    /// The face is too small relative to the frame, typical of a phone
    /// screen held at arm's length.
    FaceTooSmall,
}

impl SpoofReason {
    pub fn message(self) -> &'static str {
        match self {
            SpoofReason::MultipleFaces => "Multiple faces detected. Only one person allowed.",
            SpoofReason::FaceTooSmall => "Move Closer (Face too small)",
        }
    }
}

impl fmt::Display for SpoofReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Verdict for one frame's detections.
#[derive(Debug, Clone, PartialEq)]
pub enum Screening<'a> {
    /// Exactly one face, large enough; pass it downstream.
    Accept(&'a FaceObservation),
    Reject(SpoofReason),
    /// Nothing to screen.
    NoFace,
}

/// Stateless screen applied to every processed frame.
#[derive(Debug, Clone, Copy)]
pub struct SpoofGuard {
    min_face_ratio: f32,
}

impl SpoofGuard {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_face_ratio: config.min_face_ratio,
        }
    }

    pub fn screen<'a>(&self, faces: &'a [FaceObservation], frame_width: u32) -> Screening<'a> {
        match faces {
            [] => Screening::NoFace,
            [face] => {
                if face.bounding_box.width_ratio(frame_width) < self.min_face_ratio {
                    Screening::Reject(SpoofReason::FaceTooSmall)
                } else {
                    Screening::Accept(face)
                }
            }
            _ => Screening::Reject(SpoofReason::MultipleFaces),
        }
    }
}

impl Default for SpoofGuard {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
