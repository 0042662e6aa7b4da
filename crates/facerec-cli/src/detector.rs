//! Face detection via the SeetaFace frontal detector (`rustface`).
//!
//! Every detection is clamped to the frame, cropped, and normalised to the
//! recognizer's square face size.

use crate::config::DetectorSettings;
use crate::imaging;
use image::imageops;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} — place the SeetaFace model in the cascade folder")]
    ModelNotFound(String),
    #[error("failed to load detector model: {0}")]
    Load(String),
}

/// A detected face: its bounding box in the source frame and the normalised crop.
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
    pub image: GrayImage,
}

pub struct FaceDetector {
    inner: Box<dyn rustface::Detector>,
    face_size: u32,
}

impl FaceDetector {
    /// Load the detector model named in `settings` from `cascade_dir`.
    pub fn load(cascade_dir: &Path, settings: &DetectorSettings, face_size: u32) -> Result<Self, DetectorError> {
        let model_path = cascade_dir.join(&settings.model_file);
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let mut inner = rustface::create_detector(&model_path.to_string_lossy())
            .map_err(|e| DetectorError::Load(e.to_string()))?;
        inner.set_min_face_size(settings.min_face_size);
        inner.set_score_thresh(settings.score_threshold);
        inner.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        inner.set_slide_window_step(settings.slide_window_step, settings.slide_window_step);

        tracing::info!(path = %model_path.display(), "face detector loaded");
        Ok(Self { inner, face_size })
    }

    /// Detect faces in `frame`, highest score first.
    pub fn detect(&mut self, frame: &GrayImage) -> Vec<FaceRegion> {
        let (frame_w, frame_h) = frame.dimensions();
        let data = rustface::ImageData::new(frame.as_raw(), frame_w, frame_h);

        let mut regions: Vec<FaceRegion> = self
            .inner
            .detect(&data)
            .into_iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let (x, y, width, height) =
                    clamp_bbox(bbox.x(), bbox.y(), bbox.width(), bbox.height(), frame_w, frame_h)?;
                let crop = imageops::crop_imm(frame, x, y, width, height).to_image();
                Some(FaceRegion {
                    x,
                    y,
                    width,
                    height,
                    score: face.score(),
                    image: imaging::normalize_face(&crop, self.face_size),
                })
            })
            .collect();

        regions.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(faces = regions.len(), "detection finished");
        regions
    }
}

/// Intersect a detector box with the frame. `None` when nothing remains.
fn clamp_bbox(x: i32, y: i32, width: u32, height: u32, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = i64::from(x).clamp(0, i64::from(frame_w));
    let y0 = i64::from(y).clamp(0, i64::from(frame_h));
    let x1 = (i64::from(x) + i64::from(width)).clamp(0, i64::from(frame_w));
    let y1 = (i64::from(y) + i64::from(height)).clamp(0, i64::from(frame_h));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_frame() {
        assert_eq!(clamp_bbox(10, 20, 30, 40, 100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clamp_negative_origin() {
        assert_eq!(clamp_bbox(-5, -10, 30, 40, 100, 100), Some((0, 0, 25, 30)));
    }

    #[test]
    fn test_clamp_overflowing_edge() {
        assert_eq!(clamp_bbox(90, 95, 30, 40, 100, 100), Some((90, 95, 10, 5)));
    }

    #[test]
    fn test_clamp_outside_frame() {
        assert_eq!(clamp_bbox(120, 10, 30, 40, 100, 100), None);
        assert_eq!(clamp_bbox(-50, 10, 30, 40, 100, 100), None);
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FaceDetector::load(dir.path(), &DetectorSettings::default(), 100).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
