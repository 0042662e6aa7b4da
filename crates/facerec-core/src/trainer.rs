//! Full training and incremental update of a classifier plus its label table.

use crate::classifier::{Classifier, ClassifierError};
use crate::dataset::{Dataset, DatasetError};
use crate::labels::{reconcile, LabelError, LabelTable};
use crate::types::Label;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("dataset contains no images")]
    EmptyDataset,
    #[error("label reconciliation: {0}")]
    Label(#[from] LabelError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// What an incremental update did to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Images added to the classifier.
    pub images: usize,
    /// High-water mark before the update.
    pub boundary: Label,
    /// Identities already known to the model.
    pub reused: usize,
    /// (model label, identity) for every identity the update introduced.
    pub introduced: Vec<(Label, String)>,
}

/// Train `classifier` from scratch. Local labels become model labels verbatim.
///
/// Returns the label table describing the freshly trained model.
pub fn full_train<C: Classifier>(classifier: &mut C, dataset: Dataset) -> Result<LabelTable, TrainError> {
    if dataset.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    let mut table = LabelTable::new();
    for (label, name) in dataset.identities().enumerate() {
        table.register(label as Label, name)?;
    }

    classifier.train(dataset.images(), dataset.labels())?;

    tracing::info!(
        images = dataset.len(),
        identities = table.len(),
        "trained recognizer from scratch"
    );
    Ok(table)
}

/// Extend a trained `classifier` with `dataset` without discarding prior state.
///
/// Local labels are reconciled against `table`; identities the model has not
/// seen are registered at the labels reconciliation assigned them, existing
/// names are left untouched. Every processed pair is appended to `new_data`.
pub fn incremental_update<C: Classifier>(
    classifier: &mut C,
    table: &mut LabelTable,
    dataset: Dataset,
    new_data: &mut Dataset,
) -> Result<UpdateSummary, TrainError> {
    if dataset.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    let reconciliation = reconcile(table, &dataset)?;
    let mapping = reconciliation.mapping();
    let model_labels: Vec<Label> = dataset
        .labels()
        .iter()
        .map(|&local| mapping[local as usize])
        .collect();

    // New names go into a staged table; it replaces `table` only once the
    // classifier has accepted the batch.
    let introduced: Vec<(Label, String)> = dataset
        .identities()
        .zip(mapping)
        .filter(|&(_, &model)| reconciliation.is_new(model))
        .map(|(name, &model)| (model, name.to_string()))
        .collect();
    let mut staged = table.clone();
    for (model, name) in &introduced {
        staged.register(*model, name)?;
    }
    new_data.check_append(&dataset)?;

    classifier.update(dataset.images(), &model_labels)?;

    *table = staged;
    for (model, name) in &introduced {
        tracing::info!(label = model, identity = %name, "registered new identity");
    }

    let summary = UpdateSummary {
        images: dataset.len(),
        boundary: reconciliation.boundary(),
        reused: dataset.label_count() - introduced.len(),
        introduced,
    };
    new_data.append(dataset)?;

    tracing::info!(
        images = summary.images,
        reused = summary.reused,
        introduced = summary.introduced.len(),
        high_water_mark = table.high_water_mark(),
        "updated recognizer incrementally"
    );
    Ok(summary)
}
