//! Model label table and label-space reconciliation.
//!
//! A trained model knows identities only as dense integer labels. Each new
//! training batch numbers its identities independently, so before an
//! incremental update every local label must be translated into the model's
//! label space: known identities keep their model label, unseen identities
//! take the next free labels starting at the high-water mark.

use crate::dataset::Dataset;
use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("label {0} has an empty name")]
    EmptyName(Label),
    #[error("name {name:?} is already registered as label {existing}")]
    DuplicateName { name: String, existing: Label },
    #[error("label {got} is not the next free label {expected}")]
    NotContiguous { expected: Label, got: Label },
    #[error("label space exhausted")]
    Exhausted,
    #[error("reverse index points at label {label} beyond high-water mark {high_water_mark}")]
    CorruptedIndex { label: Label, high_water_mark: Label },
}

/// Owned label → identity table of a trained model.
///
/// Labels `0..high_water_mark()` are contiguous and each carries a non-empty,
/// unique name. A reverse index gives O(1) name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelTable {
    names: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, Label>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest unused model label.
    pub fn high_water_mark(&self) -> Label {
        self.names.len() as Label
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name stored for `label`, `None` at or beyond the high-water mark.
    pub fn name(&self, label: Label) -> Option<&str> {
        self.names.get(label as usize).map(String::as_str)
    }

    pub fn label_of(&self, name: &str) -> Option<Label> {
        self.index.get(name).copied()
    }

    /// (label, name) pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(label, name)| (label as Label, name.as_str()))
    }

    /// Register `name` under `label`, which must be the current high-water mark.
    ///
    /// Existing labels can never be renamed through this call.
    pub fn register(&mut self, label: Label, name: &str) -> Result<(), LabelError> {
        let expected = self.high_water_mark();
        if label != expected {
            return Err(LabelError::NotContiguous { expected, got: label });
        }
        if name.is_empty() {
            return Err(LabelError::EmptyName(label));
        }
        if let Some(existing) = self.label_of(name) {
            return Err(LabelError::DuplicateName {
                name: name.to_string(),
                existing,
            });
        }
        if expected == Label::MAX {
            return Err(LabelError::Exhausted);
        }
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), label);
        Ok(())
    }
}

impl TryFrom<Vec<String>> for LabelTable {
    type Error = LabelError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let mut table = LabelTable::new();
        for (label, name) in names.iter().enumerate() {
            let label = Label::try_from(label).map_err(|_| LabelError::Exhausted)?;
            table.register(label, name)?;
        }
        Ok(table)
    }
}

impl From<LabelTable> for Vec<String> {
    fn from(table: LabelTable) -> Self {
        table.names
    }
}

/// Local label → model label map for one incremental update.
///
/// Built fresh per update call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    mapping: Vec<Label>,
    boundary: Label,
}

impl Reconciliation {
    /// Model label for a local label of the reconciled dataset.
    pub fn model_label(&self, local: Label) -> Option<Label> {
        self.mapping.get(local as usize).copied()
    }

    /// High-water mark of the table when reconciliation began. Model labels
    /// at or above it were introduced by this reconciliation.
    pub fn boundary(&self) -> Label {
        self.boundary
    }

    /// Model labels indexed by local label.
    pub fn mapping(&self) -> &[Label] {
        &self.mapping
    }

    pub fn is_new(&self, model: Label) -> bool {
        model >= self.boundary
    }

    /// (local, model) pairs for identities unseen by the model, in
    /// ascending model label order.
    pub fn introduced(&self) -> impl Iterator<Item = (Label, Label)> + '_ {
        self.mapping
            .iter()
            .enumerate()
            .filter(|&(_, &model)| model >= self.boundary)
            .map(|(local, &model)| (local as Label, model))
    }

    pub fn introduced_count(&self) -> usize {
        self.introduced().count()
    }
}

/// Map every local label of `dataset` into the label space of `table`.
///
/// Known identities reuse their model label. Unseen identities claim free
/// labels from the high-water mark upward in local label order, so earlier
/// local labels always win lower labels. The table itself is not modified.
pub fn reconcile(table: &LabelTable, dataset: &Dataset) -> Result<Reconciliation, LabelError> {
    assign_labels(table.high_water_mark(), dataset.identities(), |name| table.label_of(name))
}

/// Label assignment behind [`reconcile`], for a table whose labels end at
/// `boundary` and whose reverse index is `lookup`.
fn assign_labels<'a, I, F>(boundary: Label, identities: I, lookup: F) -> Result<Reconciliation, LabelError>
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Option<Label>,
{
    let mut next = boundary;
    let mut mapping = Vec::new();

    for name in identities {
        let model = match lookup(name) {
            Some(label) if label < boundary => label,
            Some(label) => {
                return Err(LabelError::CorruptedIndex {
                    label,
                    high_water_mark: boundary,
                })
            }
            None => {
                // Label::MAX is never registrable, so it is never handed out.
                if next == Label::MAX {
                    return Err(LabelError::Exhausted);
                }
                let label = next;
                next += 1;
                label
            }
        };
        mapping.push(model);
    }

    tracing::debug!(
        boundary,
        identities = mapping.len(),
        introduced = next - boundary,
        "reconciled dataset labels"
    );

    Ok(Reconciliation { mapping, boundary })
}
