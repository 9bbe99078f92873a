//! Camera frames and their conversion to croppable RGB images.
//!
//! Frames arrive as planar YUV 4:2:0 with per-plane strides (so both I420
//! and the interleaved-chroma NV12/NV21 layouts are covered) plus the
//! rotation needed to make them upright. Decoding is lazy: the pipeline only
//! pays for it once liveness is complete and an embedding is needed.

use std::fmt;
use std::time::Instant;

use image::imageops;
use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::types::FaceBox;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(u32),
    #[error("{plane} plane too short: need index {needed}, have {len} bytes")]
    PlaneTooShort {
        plane: &'static str,
        needed: usize,
        len: usize,
    },
    #[error("empty frame")]
    Empty,
}

/// One image plane.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of two consecutive rows.
    pub row_stride: usize,
    /// Bytes between two consecutive samples in a row (2 for interleaved chroma).
    pub pixel_stride: usize,
}

impl Plane {
    pub fn packed(data: Vec<u8>, width: usize) -> Self {
        Self {
            data,
            row_stride: width,
            pixel_stride: 1,
        }
    }

    fn sample(&self, name: &'static str, x: usize, y: usize) -> Result<u8, FrameError> {
        let idx = y * self.row_stride + x * self.pixel_stride;
        self.data.get(idx).copied().ok_or(FrameError::PlaneTooShort {
            plane: name,
            needed: idx,
            len: self.data.len(),
        })
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A camera frame: Y, U and V planes in sensor orientation.
///
/// The optional release hook hands the buffer back to the frame source. It
/// runs from `Drop`, so every frame is released exactly once whichever way
/// the pipeline leaves it.
pub struct Frame {
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
    /// Sensor width, before rotation.
    pub width: u32,
    /// Sensor height, before rotation.
    pub height: u32,
    /// Clockwise rotation that makes the image upright.
    pub rotation_degrees: u32,
    pub captured_at: Instant,
    release: Option<ReleaseHook>,
}

impl Frame {
    pub fn new(
        y: Plane,
        u: Plane,
        v: Plane,
        width: u32,
        height: u32,
        rotation_degrees: u32,
        captured_at: Instant,
    ) -> Self {
        Self {
            y,
            u,
            v,
            width,
            height,
            rotation_degrees,
            captured_at,
            release: None,
        }
    }

    /// Attach a callback run when the frame is dropped.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    /// Encode an RGB image as an I420 frame. Chroma is sampled from the
    /// top-left pixel of each 2×2 block.
    ///
    /// `image` is in sensor orientation; `rotation_degrees` is stored as-is.
    pub fn from_rgb(image: &RgbImage, rotation_degrees: u32, captured_at: Instant) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        let mut y_plane = vec![0u8; w * h];
        let mut u_plane = vec![128u8; cw * ch];
        let mut v_plane = vec![128u8; cw * ch];

        for (x, y, px) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            y_plane[y * w + x] = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
            if x % 2 == 0 && y % 2 == 0 {
                let ci = (y / 2) * cw + x / 2;
                u_plane[ci] = (128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b)
                    .round()
                    .clamp(0.0, 255.0) as u8;
                v_plane[ci] = (128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b)
                    .round()
                    .clamp(0.0, 255.0) as u8;
            }
        }

        Self::new(
            Plane::packed(y_plane, w),
            Plane::packed(u_plane, cw),
            Plane::packed(v_plane, cw),
            image.width(),
            image.height(),
            rotation_degrees,
            captured_at,
        )
    }

    /// Dimensions after rotation, i.e. the space detector boxes are expressed in.
    pub fn upright_size(&self) -> (u32, u32) {
        match self.rotation_degrees % 360 {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }

    pub fn upright_width(&self) -> u32 {
        self.upright_size().0
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation_degrees", &self.rotation_degrees)
            .field("captured_at", &self.captured_at)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Converts frames to upright RGB and cuts face crops out of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// YUV 4:2:0 → RGB (BT.601 full range), then rotate upright.
    pub fn decode(&self, frame: &Frame) -> Result<RgbImage, FrameError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(FrameError::Empty);
        }
        let rotation = frame.rotation_degrees % 360;
        if !matches!(rotation, 0 | 90 | 180 | 270) {
            return Err(FrameError::UnsupportedRotation(frame.rotation_degrees));
        }

        let mut rgb = RgbImage::new(frame.width, frame.height);
        for row in 0..frame.height as usize {
            for col in 0..frame.width as usize {
                let y = frame.y.sample("Y", col, row)? as f32;
                let u = frame.u.sample("U", col / 2, row / 2)? as f32 - 128.0;
                let v = frame.v.sample("V", col / 2, row / 2)? as f32 - 128.0;

                let r = y + 1.402 * v;
                let g = y - 0.344_136 * u - 0.714_136 * v;
                let b = y + 1.772 * u;
                rgb.put_pixel(col as u32, row as u32, Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)]));
            }
        }

        Ok(match rotation {
            90 => imageops::rotate90(&rgb),
            180 => imageops::rotate180(&rgb),
            270 => imageops::rotate270(&rgb),
            _ => rgb,
        })
    }

    /// Crop `face` out of `image`, grown by `margin` × box size on every side
    /// and clamped to the image. `None` if nothing of the box lies inside the image.
    pub fn crop_face(&self, image: &RgbImage, face: &FaceBox, margin: f32) -> Option<RgbImage> {
        let margin_x = (face.width * margin) as i64;
        let margin_y = (face.height * margin) as i64;

        let left = (face.x as i64 - margin_x).max(0);
        let top = (face.y as i64 - margin_y).max(0);
        let right = (face.x as i64 + face.width as i64 + margin_x).min(image.width() as i64);
        let bottom = (face.y as i64 + face.height as i64 + margin_y).min(image.height() as i64);

        let width = right - left;
        let height = bottom - top;
        if width <= 0 || height <= 0 {
            return None;
        }

        Some(imageops::crop_imm(image, left as u32, top as u32, width as u32, height as u32).to_image())
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
