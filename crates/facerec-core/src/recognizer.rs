//! Recognizer state machine: owns the classifier, its label table and the
//! buffer of data added by incremental updates.
//!
//! `Unloaded` → `Ready` after a successful load, train or update. Prediction,
//! update and save are rejected while `Unloaded`.

use crate::classifier::{Classifier, ClassifierError};
use crate::dataset::Dataset;
use crate::labels::LabelTable;
use crate::trainer::{self, TrainError, UpdateSummary};
use crate::types::{FaceImage, Prediction};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer is not ready — load or train a model first")]
    NotReady,
    #[error("dataset contains no images")]
    EmptyDataset,
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported model format version {0}")]
    UnsupportedFormat(u32),
    #[error("corrupt model file: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("training failed: {0}")]
    Train(#[from] TrainError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    Unloaded,
    Ready,
}

/// Behaviour switches for the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerOptions {
    /// Reject empty datasets with [`RecognizerError::EmptyDataset`] and keep
    /// the current state. When false, an empty `train` only logs a warning and
    /// marks the recognizer ready without touching the model.
    pub strict_empty_dataset: bool,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            strict_empty_dataset: true,
        }
    }
}

/// On-disk model document.
#[derive(Serialize)]
struct StoredModelRef<'a, C> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    labels: &'a LabelTable,
    classifier: &'a C,
}

#[derive(Deserialize)]
#[serde(bound = "C: DeserializeOwned")]
struct StoredModel<C> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    labels: LabelTable,
    classifier: C,
}

/// Face recognizer over a black-box [`Classifier`].
///
/// Not internally synchronised: callers serialise all calls on one instance.
pub struct Recognizer<C> {
    classifier: C,
    labels: LabelTable,
    state: RecognizerState,
    new_data: Dataset,
    options: RecognizerOptions,
}

impl<C: Classifier> Recognizer<C> {
    pub fn new(classifier: C, options: RecognizerOptions) -> Self {
        Self {
            classifier,
            labels: LabelTable::new(),
            state: RecognizerState::Unloaded,
            new_data: Dataset::new(),
            options,
        }
    }

    pub fn state(&self) -> RecognizerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == RecognizerState::Ready
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn options(&self) -> &RecognizerOptions {
        &self.options
    }

    /// Everything submitted through [`update`](Self::update) so far.
    pub fn new_data(&self) -> &Dataset {
        &self.new_data
    }

    /// Drain the update buffer.
    pub fn take_new_data(&mut self) -> Dataset {
        std::mem::take(&mut self.new_data)
    }

    /// Replace the model with the one stored at `path`.
    ///
    /// On failure the recognizer is left exactly as it was.
    pub fn load(&mut self, path: &Path) -> Result<(), RecognizerError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RecognizerError::ModelNotFound(path.display().to_string()),
            _ => RecognizerError::Io(e),
        })?;
        let stored: StoredModel<C> = serde_json::from_reader(BufReader::new(file))?;
        if stored.format_version != MODEL_FORMAT_VERSION {
            return Err(RecognizerError::UnsupportedFormat(stored.format_version));
        }

        self.classifier = stored.classifier;
        self.labels = stored.labels;
        self.state = RecognizerState::Ready;

        tracing::info!(
            path = %path.display(),
            identities = self.labels.len(),
            saved_at = %stored.saved_at,
            "loaded recognizer model"
        );
        Ok(())
    }

    /// Persist the model to `path`, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<(), RecognizerError> {
        if !self.is_ready() {
            return Err(RecognizerError::NotReady);
        }

        let stored = StoredModelRef {
            format_version: MODEL_FORMAT_VERSION,
            saved_at: Utc::now(),
            labels: &self.labels,
            classifier: &self.classifier,
        };

        // Write next to the target and rename so a crash never truncates the model.
        let tmp = path.with_extension("tmp");
        let written = write_json(&tmp, &stored).and_then(|()| Ok(std::fs::rename(&tmp, path)?));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            identities = self.labels.len(),
            "saved recognizer model"
        );
        Ok(())
    }

    /// Train from scratch on `dataset`, replacing the model and label table.
    pub fn train(&mut self, dataset: Dataset) -> Result<(), RecognizerError> {
        if dataset.is_empty() {
            if self.options.strict_empty_dataset {
                tracing::error!("empty dataset passed to recognizer; training aborted");
                return Err(RecognizerError::EmptyDataset);
            }
            tracing::warn!("empty dataset passed to recognizer; keeping current model");
            self.state = RecognizerState::Ready;
            return Ok(());
        }

        self.labels = trainer::full_train(&mut self.classifier, dataset)?;
        self.state = RecognizerState::Ready;
        Ok(())
    }

    /// Add `dataset` to the trained model.
    ///
    /// Returns `None` when a lenient recognizer skips an empty dataset.
    pub fn update(&mut self, dataset: Dataset) -> Result<Option<UpdateSummary>, RecognizerError> {
        if !self.is_ready() {
            return Err(RecognizerError::NotReady);
        }
        if dataset.is_empty() {
            if self.options.strict_empty_dataset {
                return Err(RecognizerError::EmptyDataset);
            }
            tracing::warn!("empty dataset passed to recognizer update; nothing to do");
            return Ok(None);
        }

        let summary = if self.classifier.is_trained() {
            trainer::incremental_update(&mut self.classifier, &mut self.labels, dataset, &mut self.new_data)?
        } else {
            // Ready without samples (lenient empty train): start the model from this batch.
            let pairs: Vec<_> = dataset.iter().map(|(i, n)| (i.clone(), n.to_string())).collect();
            self.labels = trainer::full_train(&mut self.classifier, dataset)?;
            let introduced: Vec<_> = self.labels.iter().map(|(l, n)| (l, n.to_string())).collect();
            let images = pairs.len();
            for (image, identity) in pairs {
                self.new_data.push(image, &identity).map_err(TrainError::from)?;
            }
            UpdateSummary {
                images,
                boundary: 0,
                reused: 0,
                introduced,
            }
        };
        Ok(Some(summary))
    }

    /// Predict the identity shown in `image`.
    ///
    /// An unrecognised face yields an empty identity. A ready recognizer with
    /// no trained samples recognises nobody.
    pub fn predict(&self, image: &FaceImage) -> Result<Prediction, RecognizerError> {
        if !self.is_ready() {
            return Err(RecognizerError::NotReady);
        }
        if !self.classifier.is_trained() {
            return Ok(Prediction {
                identity: String::new(),
                label: None,
                confidence: f64::INFINITY,
            });
        }

        let raw = self.classifier.predict(image)?;
        let identity = raw
            .label
            .and_then(|label| self.labels.name(label))
            .unwrap_or_default()
            .to_string();

        tracing::debug!(label = ?raw.label, identity = %identity, distance = raw.distance, "prediction");

        Ok(Prediction {
            identity,
            label: raw.label,
            confidence: raw.distance,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RecognizerError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
