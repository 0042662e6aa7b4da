//! In-memory training batch of (face image, identity) pairs.
//!
//! Local labels are assigned densely in first-seen order and only mean
//! something relative to the dataset that assigned them.

use crate::types::{FaceImage, Label};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DatasetError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("too many identities for the label space")]
    LabelOverflow,
}

/// Ordered sequence of (image, local label) pairs with a local label → identity map.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    images: Vec<FaceImage>,
    labels: Vec<Label>,
    identities: Vec<String>,
    index: HashMap<String, Label>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from pairs, assigning local labels in first-seen order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = (FaceImage, S)>,
        S: AsRef<str>,
    {
        let mut dataset = Self::new();
        for (image, identity) in pairs {
            dataset.push(image, identity.as_ref())?;
        }
        Ok(dataset)
    }

    /// Append an image for `identity`, returning its local label.
    pub fn push(&mut self, image: FaceImage, identity: &str) -> Result<Label, DatasetError> {
        let label = self.intern(identity)?;
        self.images.push(image);
        self.labels.push(label);
        Ok(label)
    }

    fn intern(&mut self, identity: &str) -> Result<Label, DatasetError> {
        if identity.is_empty() {
            return Err(DatasetError::EmptyIdentity);
        }
        if let Some(&label) = self.index.get(identity) {
            return Ok(label);
        }
        let label = Label::try_from(self.identities.len()).map_err(|_| DatasetError::LabelOverflow)?;
        self.identities.push(identity.to_string());
        self.index.insert(identity.to_string(), label);
        Ok(label)
    }

    pub fn images(&self) -> &[FaceImage] {
        &self.images
    }

    /// Local labels, parallel to [`images`](Self::images).
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn identity(&self, label: Label) -> Option<&str> {
        self.identities.get(label as usize).map(String::as_str)
    }

    pub fn label_of(&self, identity: &str) -> Option<Label> {
        self.index.get(identity).copied()
    }

    /// Identities in local label order.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }

    /// Number of distinct local labels.
    pub fn label_count(&self) -> usize {
        self.identities.len()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Iterate (image, identity) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&FaceImage, &str)> {
        let identities = &self.identities;
        self.images
            .iter()
            .zip(self.labels.iter())
            .map(move |(image, &label)| (image, identities[label as usize].as_str()))
    }

    /// Move every pair of `other` to the end of this dataset, interning its
    /// identities. Either all pairs are appended or none are.
    pub fn append(&mut self, other: Dataset) -> Result<(), DatasetError> {
        self.check_append(&other)?;
        for (image, identity) in other.into_pairs() {
            self.push(image, &identity)?;
        }
        Ok(())
    }

    /// Fails when appending `other` would overflow the local label space.
    pub(crate) fn check_append(&self, other: &Dataset) -> Result<(), DatasetError> {
        let unseen = other
            .identities()
            .filter(|name| !self.index.contains_key(*name))
            .count();
        Label::try_from(self.identities.len() + unseen).map_err(|_| DatasetError::LabelOverflow)?;
        Ok(())
    }

    /// Consume the dataset into (image, identity) pairs.
    pub fn into_pairs(self) -> Vec<(FaceImage, String)> {
        let identities = self.identities;
        self.images
            .into_iter()
            .zip(self.labels)
            .map(|(image, label)| (image, identities[label as usize].clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(v: u8) -> FaceImage {
        FaceImage::new(2, 2, vec![v; 4]).unwrap()
    }

    #[test]
    fn test_labels_assigned_first_seen() {
        let mut ds = Dataset::new();
        assert_eq!(ds.push(img(1), "carol").unwrap(), 0);
        assert_eq!(ds.push(img(2), "dave").unwrap(), 1);
        assert_eq!(ds.push(img(3), "carol").unwrap(), 0);

        assert_eq!(ds.labels(), &[0, 1, 0]);
        assert_eq!(ds.label_count(), 2);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.identity(1), Some("dave"));
        assert_eq!(ds.identity(2), None);
        assert_eq!(ds.label_of("carol"), Some(0));
        assert_eq!(ds.identities().collect::<Vec<_>>(), vec!["carol", "dave"]);
    }

    #[test]
    fn test_empty_identity_rejected() {
        let mut ds = Dataset::new();
        assert_eq!(ds.push(img(0), "").unwrap_err(), DatasetError::EmptyIdentity);
        assert!(ds.is_empty());
        assert_eq!(ds.label_count(), 0);
    }

    #[test]
    fn test_iter_and_into_pairs_preserve_order() {
        let ds = Dataset::from_pairs(vec![(img(1), "a"), (img(2), "b"), (img(3), "a")]).unwrap();
        let seen: Vec<(u8, &str)> = ds.iter().map(|(i, n)| (i.pixels()[0], n)).collect();
        assert_eq!(seen, vec![(1, "a"), (2, "b"), (3, "a")]);

        let pairs = ds.into_pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2].1, "a");
        assert_eq!(pairs[1].0.pixels()[0], 2);
    }

    #[test]
    fn test_append_interns_identities() {
        let mut ds = Dataset::from_pairs(vec![(img(1), "a"), (img(2), "b")]).unwrap();
        let more = Dataset::from_pairs(vec![(img(3), "c"), (img(4), "a")]).unwrap();
        ds.append(more).unwrap();

        assert_eq!(ds.labels(), &[0, 1, 2, 0]);
        assert_eq!(ds.identities().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(ds.iter().last().map(|(i, n)| (i.pixels()[0], n)), Some((4, "a")));
    }
}
