use thiserror::Error;

/// Integer label, dense and 0-based, either local to a [`Dataset`](crate::Dataset)
/// or global to a trained model.
pub type Label = u32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FaceImageError {
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image has zero width or height")]
    Empty,
}

/// A cropped 8-bit grayscale face region.
///
/// Pixels are row-major, one byte per pixel. The core never mutates a
/// face image after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FaceImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FaceImageError> {
        if width == 0 || height == 0 {
            return Err(FaceImageError::Empty);
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(FaceImageError::InvalidLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at (x, y). Caller guarantees the coordinates are in bounds.
    pub(crate) fn at(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width as usize + x]
    }
}

/// Outcome of a recognizer prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Identity of the predicted label; empty when the label is unknown.
    pub identity: String,
    /// Model label returned by the classifier, if any.
    pub label: Option<Label>,
    /// Distance to the best match. Lower = more confident.
    pub confidence: f64,
}

impl Prediction {
    pub fn is_known(&self) -> bool {
        !self.identity.is_empty()
    }

    /// Identity for display, `"unknown"` when no identity matched.
    pub fn display_name(&self) -> &str {
        if self.identity.is_empty() {
            "unknown"
        } else {
            &self.identity
        }
    }
}
