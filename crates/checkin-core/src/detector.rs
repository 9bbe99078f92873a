//! Face detection port.
//!
//! Detection itself is an external capability (a platform ML kit or a
//! separate model); the pipeline only depends on its output contract.

use std::future::Future;

use image::RgbImage;
use thiserror::Error;

use crate::frame::Frame;
use crate::types::FaceObservation;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector closed")]
    Closed,
    #[error("detection failed: {0}")]
    Failed(String),
}

/// What to run detection on.
#[derive(Debug, Clone, Copy)]
pub enum DetectorInput<'a> {
    /// A live camera frame. Boxes must be reported in upright coordinates.
    Frame(&'a Frame),
    /// A decoded still image, e.g. the enrollment photo.
    Still(&'a RgbImage),
}

impl DetectorInput<'_> {
    /// Upright width, the denominator of every face-size ratio.
    pub fn width(&self) -> u32 {
        match self {
            DetectorInput::Frame(frame) => frame.upright_width(),
            DetectorInput::Still(image) => image.width(),
        }
    }
}

/// Locates faces and attaches eye-open, smile and yaw signals.
///
/// One call is one cancellable asynchronous operation; dropping the future
/// abandons it.
pub trait FaceLocator: Send + Sync {
    fn detect(
        &self,
        input: DetectorInput<'_>,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send;
}
