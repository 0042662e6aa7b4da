//! Local Binary Patterns Histograms (LBPH) face classifier.
//!
//! Each face crop is encoded as circular LBP codes, split into a grid of
//! cells, and summarised as one normalised code histogram per cell.
//! Prediction is nearest neighbour over all stored samples by chi-square
//! distance. Images need not share a size: the grid adapts per image.

use crate::classifier::{check_batch, Classifier, ClassifierError, ClassifierPrediction};
use crate::types::{FaceImage, Label};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// --- Named constants ---
const DEFAULT_RADIUS: u32 = 1;
const DEFAULT_NEIGHBORS: u32 = 8;
const DEFAULT_GRID: u32 = 8;
const MAX_NEIGHBORS: u32 = 16;
const SAMPLE_EPSILON: f64 = f32::EPSILON as f64;
const CHI_SQUARE_EPSILON: f32 = f32::EPSILON;

/// LBPH parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbphParams {
    /// Radius of the circular neighbourhood, in pixels.
    pub radius: u32,
    /// Sample points on the circle; histograms have `2^neighbors` bins.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Maximum accepted distance. `None` accepts every nearest match.
    pub threshold: Option<f64>,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            neighbors: DEFAULT_NEIGHBORS,
            grid_x: DEFAULT_GRID,
            grid_y: DEFAULT_GRID,
            threshold: None,
        }
    }
}

impl LbphParams {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.radius == 0 {
            return Err(ClassifierError::InvalidParams("radius must be at least 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(ClassifierError::InvalidParams(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ClassifierError::InvalidParams("grid must be at least 1x1".into()));
        }
        if matches!(self.threshold, Some(t) if t.is_nan() || t < 0.0) {
            return Err(ClassifierError::InvalidParams(
                "threshold must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sample {
    label: Label,
    histogram: Vec<f32>,
}

/// LBPH classifier holding one histogram per training image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphClassifier {
    params: LbphParams,
    samples: Vec<Sample>,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self {
            params,
            samples: Vec::new(),
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn histogram(&self, image: &FaceImage) -> Result<Vec<f32>, ClassifierError> {
        let codes = lbp_codes(image, self.params.radius, self.params.neighbors)?;
        spatial_histogram(&codes, &self.params)
            .ok_or(ClassifierError::ImageTooSmall {
                width: image.width(),
                height: image.height(),
            })
    }

    fn extract(&self, images: &[FaceImage], labels: &[Label]) -> Result<Vec<Sample>, ClassifierError> {
        check_batch(images, labels)?;
        images
            .iter()
            .zip(labels)
            .map(|(image, &label)| {
                Ok(Sample {
                    label,
                    histogram: self.histogram(image)?,
                })
            })
            .collect()
    }
}

impl Default for LbphClassifier {
    fn default() -> Self {
        Self {
            params: LbphParams::default(),
            samples: Vec::new(),
        }
    }
}

impl Classifier for LbphClassifier {
    fn train(&mut self, images: &[FaceImage], labels: &[Label]) -> Result<(), ClassifierError> {
        self.samples = self.extract(images, labels)?;
        tracing::debug!(samples = self.samples.len(), "LBPH trained");
        Ok(())
    }

    fn update(&mut self, images: &[FaceImage], labels: &[Label]) -> Result<(), ClassifierError> {
        let mut added = self.extract(images, labels)?;
        self.samples.append(&mut added);
        tracing::debug!(samples = self.samples.len(), "LBPH updated");
        Ok(())
    }

    fn predict(&self, image: &FaceImage) -> Result<ClassifierPrediction, ClassifierError> {
        if self.samples.is_empty() {
            return Err(ClassifierError::NotTrained);
        }
        let probe = self.histogram(image)?;

        let mut best_dist = f64::INFINITY;
        let mut best_label = None;
        for sample in &self.samples {
            let dist = chi_square(&sample.histogram, &probe);
            if dist < best_dist {
                best_dist = dist;
                best_label = Some(sample.label);
            }
        }

        let accepted = match self.params.threshold {
            Some(threshold) => best_dist <= threshold,
            None => true,
        };

        Ok(ClassifierPrediction {
            label: best_label.filter(|_| accepted),
            distance: best_dist,
        })
    }

    fn is_trained(&self) -> bool {
        !self.samples.is_empty()
    }
}

/// LBP code image: one code per pixel at least `radius` from the border.
struct CodeImage {
    codes: Vec<u32>,
    width: usize,
    height: usize,
}

/// Compute circular LBP codes with bilinear interpolation of the sample points.
fn lbp_codes(image: &FaceImage, radius: u32, neighbors: u32) -> Result<CodeImage, ClassifierError> {
    let w = image.width() as usize;
    let h = image.height() as usize;
    let r = radius as usize;
    if w <= 2 * r || h <= 2 * r {
        return Err(ClassifierError::ImageTooSmall {
            width: image.width(),
            height: image.height(),
        });
    }

    let out_w = w - 2 * r;
    let out_h = h - 2 * r;
    let mut codes = vec![0u32; out_w * out_h];

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f64 / neighbors as f64;
        let dx = radius as f64 * angle.cos();
        let dy = -(radius as f64) * angle.sin();

        let fx = dx.floor();
        let fy = dy.floor();
        let tx = dx - fx;
        let ty = dy - fy;
        let (fx, fy) = (fx as isize, fy as isize);
        let (cx, cy) = (dx.ceil() as isize, dy.ceil() as isize);

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..h - r {
            for x in r..w - r {
                let at = |ox: isize, oy: isize| {
                    image.at((x as isize + ox) as usize, (y as isize + oy) as usize) as f64
                };
                let sample = w1 * at(fx, fy) + w2 * at(cx, fy) + w3 * at(fx, cy) + w4 * at(cx, cy);
                let center = image.at(x, y) as f64;
                if sample > center || (sample - center).abs() < SAMPLE_EPSILON {
                    codes[(y - r) * out_w + (x - r)] |= 1 << n;
                }
            }
        }
    }

    Ok(CodeImage {
        codes,
        width: out_w,
        height: out_h,
    })
}

/// Concatenate per-cell code histograms, each normalised by its cell area.
///
/// Returns `None` when the code image is smaller than the grid.
fn spatial_histogram(codes: &CodeImage, params: &LbphParams) -> Option<Vec<f32>> {
    let grid_x = params.grid_x as usize;
    let grid_y = params.grid_y as usize;
    let bins = params.bins();
    let cell_w = codes.width / grid_x;
    let cell_h = codes.height / grid_y;
    if cell_w == 0 || cell_h == 0 {
        return None;
    }

    let area = (cell_w * cell_h) as f32;
    let mut histogram = vec![0f32; grid_x * grid_y * bins];

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let cell = &mut histogram[(gy * grid_x + gx) * bins..][..bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    cell[codes.codes[y * codes.width + x] as usize] += 1.0;
                }
            }
            for bin in cell.iter_mut() {
                *bin /= area;
            }
        }
    }

    Some(histogram)
}

/// Chi-square distance with the stored sample as the reference histogram.
fn chi_square(stored: &[f32], probe: &[f32]) -> f64 {
    stored
        .iter()
        .zip(probe)
        .filter(|&(&s, _)| s > CHI_SQUARE_EPSILON)
        .map(|(&s, &p)| {
            let d = (s - p) as f64;
            d * d / s as f64
        })
        .sum()
}
