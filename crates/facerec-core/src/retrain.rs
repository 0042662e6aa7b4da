//! Change-driven retrain decision.
//!
//! Each run either trains from scratch or reuses the cached model, based on
//! an explicit force flag, the dataset source's freshness signal and whether
//! the recognizer already holds a model.

use crate::classifier::Classifier;
use crate::dataset::Dataset;
use crate::recognizer::{Recognizer, RecognizerError};
use std::path::Path;
use thiserror::Error;

/// Error type dataset sources report through.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("dataset source: {0}")]
    Source(BoxError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Producer of training datasets with a "changed since last training" signal.
pub trait DatasetSource {
    /// True when the source differs from what produced the cached model.
    fn changed(&self) -> bool;

    fn read_dataset(&self) -> Result<Dataset, BoxError>;

    /// Record the current state as the baseline for later [`changed`](Self::changed) checks.
    fn commit_baseline(&self) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainReason {
    Forced,
    DatasetChanged,
    NoModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainDecision {
    Train(RetrainReason),
    Reuse,
}

impl RetrainDecision {
    pub fn should_train(&self) -> bool {
        matches!(self, RetrainDecision::Train(_))
    }
}

pub fn decide(force: bool, changed: bool, ready: bool) -> RetrainDecision {
    if force {
        RetrainDecision::Train(RetrainReason::Forced)
    } else if changed {
        RetrainDecision::Train(RetrainReason::DatasetChanged)
    } else if !ready {
        RetrainDecision::Train(RetrainReason::NoModel)
    } else {
        RetrainDecision::Reuse
    }
}

/// Bring `recognizer` up to date with `source`.
///
/// When training leaves the recognizer ready, the model is saved to
/// `model_path` and the source's baseline is committed, in that order.
pub fn refresh<C, S>(
    recognizer: &mut Recognizer<C>,
    source: &S,
    force: bool,
    model_path: &Path,
) -> Result<RetrainDecision, RetrainError>
where
    C: Classifier,
    S: DatasetSource + ?Sized,
{
    let decision = decide(force, source.changed(), recognizer.is_ready());
    let RetrainDecision::Train(reason) = decision else {
        tracing::info!("dataset unchanged, reusing cached model");
        return Ok(decision);
    };

    tracing::info!(?reason, "training recognizer");
    let dataset = source.read_dataset().map_err(RetrainError::Source)?;
    recognizer.train(dataset)?;

    if recognizer.is_ready() {
        recognizer.save(model_path)?;
        source.commit_baseline().map_err(RetrainError::Source)?;
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::tests::pattern;
    use crate::lbph::LbphClassifier;
    use crate::recognizer::RecognizerOptions;
    use std::cell::Cell;

    struct FakeSource {
        changed: bool,
        identities: Vec<(usize, &'static str)>,
        fail_read: bool,
        reads: Cell<usize>,
        commits: Cell<usize>,
    }

    impl FakeSource {
        fn new(changed: bool, identities: Vec<(usize, &'static str)>) -> Self {
            Self {
                changed,
                identities,
                fail_read: false,
                reads: Cell::new(0),
                commits: Cell::new(0),
            }
        }
    }

    impl DatasetSource for FakeSource {
        fn changed(&self) -> bool {
            self.changed
        }

        fn read_dataset(&self) -> Result<Dataset, BoxError> {
            self.reads.set(self.reads.get() + 1);
            if self.fail_read {
                return Err("dataset folder vanished".into());
            }
            Ok(Dataset::from_pairs(self.identities.iter().map(|&(k, n)| (pattern(k), n)))?)
        }

        fn commit_baseline(&self) -> Result<(), BoxError> {
            self.commits.set(self.commits.get() + 1);
            Ok(())
        }
    }

    fn recognizer() -> Recognizer<LbphClassifier> {
        Recognizer::new(LbphClassifier::default(), RecognizerOptions::default())
    }

    #[test]
    fn test_decision_table() {
        use RetrainDecision::*;
        use RetrainReason::*;
        for changed in [false, true] {
            for ready in [false, true] {
                assert_eq!(decide(true, changed, ready), Train(Forced));
            }
        }
        assert_eq!(decide(false, true, false), Train(DatasetChanged));
        assert_eq!(decide(false, true, true), Train(DatasetChanged));
        assert_eq!(decide(false, false, false), Train(NoModel));
        assert_eq!(decide(false, false, true), Reuse);
        assert!(!Reuse.should_train());
        assert!(Train(NoModel).should_train());
    }

    #[test]
    fn test_refresh_trains_saves_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        let source = FakeSource::new(false, vec![(0, "bob"), (1, "carol")]);
        let mut rec = recognizer();

        let decision = refresh(&mut rec, &source, false, &model).unwrap();
        assert_eq!(decision, RetrainDecision::Train(RetrainReason::NoModel));
        assert!(rec.is_ready());
        assert!(model.exists());
        assert_eq!(source.commits.get(), 1);
    }

    #[test]
    fn test_refresh_reuses_ready_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        let source = FakeSource::new(false, vec![(0, "bob")]);
        let mut rec = recognizer();
        rec.train(Dataset::from_pairs(vec![(pattern(0), "bob")]).unwrap()).unwrap();

        let decision = refresh(&mut rec, &source, false, &model).unwrap();
        assert_eq!(decision, RetrainDecision::Reuse);
        assert_eq!(source.reads.get(), 0);
        assert_eq!(source.commits.get(), 0);
        assert!(!model.exists());
    }

    #[test]
    fn test_refresh_forced_retrains_ready_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        let source = FakeSource::new(false, vec![(2, "dave")]);
        let mut rec = recognizer();
        rec.train(Dataset::from_pairs(vec![(pattern(0), "bob")]).unwrap()).unwrap();

        let decision = refresh(&mut rec, &source, true, &model).unwrap();
        assert_eq!(decision, RetrainDecision::Train(RetrainReason::Forced));
        assert_eq!(rec.labels().iter().collect::<Vec<_>>(), vec![(0, "dave")]);
    }

    #[test]
    fn test_refresh_empty_dataset_does_not_commit() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        let source = FakeSource::new(true, vec![]);
        let mut rec = recognizer();

        let err = refresh(&mut rec, &source, false, &model).unwrap_err();
        assert!(matches!(err, RetrainError::Recognizer(RecognizerError::EmptyDataset)));
        assert!(!rec.is_ready());
        assert!(!model.exists());
        assert_eq!(source.commits.get(), 0);
    }

    #[test]
    fn test_refresh_propagates_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(true, vec![(0, "bob")]);
        source.fail_read = true;
        let mut rec = recognizer();

        let err = refresh(&mut rec, &source, false, &dir.path().join("m.json")).unwrap_err();
        assert!(matches!(err, RetrainError::Source(_)));
        assert!(!rec.is_ready());
    }
}
