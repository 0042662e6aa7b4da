//! Black-box statistical face classifier.

use crate::types::{FaceImage, Label};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ClassifierError {
    #[error("no training images")]
    EmptyInput,
    #[error("image/label count mismatch: {images} images, {labels} labels")]
    LengthMismatch { images: usize, labels: usize },
    #[error("image {width}x{height} too small for the feature grid")]
    ImageTooSmall { width: u32, height: u32 },
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("classifier has not been trained")]
    NotTrained,
}

/// Raw classifier output. `label` is `None` when the best match is rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierPrediction {
    pub label: Option<Label>,
    /// Distance to the best match. Lower = more confident.
    pub distance: f64,
}

/// Statistical recognition engine with dense integer labels.
///
/// The classifier knows nothing about identities; the caller keeps the
/// label → name association. Persistence goes through the implementor's
/// own serde representation, which callers must round-trip unmodified.
pub trait Classifier: Serialize + DeserializeOwned {
    /// Discard any learned state and train on `images`.
    fn train(&mut self, images: &[FaceImage], labels: &[Label]) -> Result<(), ClassifierError>;

    /// Add `images` to the learned state without discarding prior samples.
    fn update(&mut self, images: &[FaceImage], labels: &[Label]) -> Result<(), ClassifierError>;

    fn predict(&self, image: &FaceImage) -> Result<ClassifierPrediction, ClassifierError>;

    fn is_trained(&self) -> bool;
}

/// Shared argument validation for `train`/`update` implementations.
pub(crate) fn check_batch(images: &[FaceImage], labels: &[Label]) -> Result<(), ClassifierError> {
    if images.len() != labels.len() {
        return Err(ClassifierError::LengthMismatch {
            images: images.len(),
            labels: labels.len(),
        });
    }
    if images.is_empty() {
        return Err(ClassifierError::EmptyInput);
    }
    Ok(())
}
