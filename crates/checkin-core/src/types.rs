use serde::{Deserialize, Serialize};

/// Axis-aligned face box in upright (rotation-corrected) image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box width as a fraction of the frame width. Zero for a degenerate frame.
    pub fn width_ratio(&self, frame_width: u32) -> f32 {
        if frame_width == 0 {
            return 0.0;
        }
        self.width / frame_width as f32
    }
}

/// One detected face and the classification signals the detector attached to it.
///
/// Probabilities are in `[0, 1]`; any signal the detector could not produce is `None`.
/// Positive `head_yaw` means the head is turned to the subject's left.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: FaceBox,
    pub left_eye_open: Option<f32>,
    pub right_eye_open: Option<f32>,
    pub smiling: Option<f32>,
    pub head_yaw: Option<f32>,
}

impl FaceObservation {
    pub fn new(bounding_box: FaceBox) -> Self {
        Self {
            bounding_box,
            ..Default::default()
        }
    }

    pub fn with_eyes(mut self, left: f32, right: f32) -> Self {
        self.left_eye_open = Some(left);
        self.right_eye_open = Some(right);
        self
    }

    pub fn with_smile(mut self, probability: f32) -> Self {
        self.smiling = Some(probability);
        self
    }

    pub fn with_yaw(mut self, degrees: f32) -> Self {
        self.head_yaw = Some(degrees);
        self
    }
}

impl Default for FaceBox {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// A unit-norm face embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Identifier of the model that produced the vector.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}
