//! Grayscale image loading and face crop normalisation.

use facerec_core::{FaceImage, FaceImageError};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("face image: {0}")]
    Face(#[from] FaceImageError),
}

/// Decode any supported image file as 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, ImagingError> {
    Ok(image::open(path)?.to_luma8())
}

/// Resize a face crop to `face_size`² and equalise its histogram.
pub fn normalize_face(gray: &GrayImage, face_size: u32) -> GrayImage {
    let resized = if gray.dimensions() == (face_size, face_size) {
        gray.clone()
    } else {
        imageops::resize(gray, face_size, face_size, FilterType::Triangle)
    };
    equalize_histogram(&resized)
}

/// Global histogram equalisation. Uniform images are returned unchanged.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    let total = running;
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        return gray.clone();
    }

    let denom = (total - cdf_min) as f32;
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        let c = cdf[i].saturating_sub(cdf_min) as f32;
        *v = (c / denom * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    out
}

/// Load an image file as a normalised face crop.
pub fn load_face(path: &Path, face_size: u32) -> Result<FaceImage, ImagingError> {
    let gray = load_gray(path)?;
    to_face_image(normalize_face(&gray, face_size))
}

pub fn to_face_image(gray: GrayImage) -> Result<FaceImage, ImagingError> {
    let (width, height) = gray.dimensions();
    Ok(FaceImage::new(width, height, gray.into_raw())?)
}

pub fn from_face_image(face: &FaceImage) -> Option<GrayImage> {
    GrayImage::from_raw(face.width(), face.height(), face.pixels().to_vec())
}
