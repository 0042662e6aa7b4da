//! Subcommand implementations.

use crate::config::{DatasetSettings, Folders, Settings, DATASET_STATE_FILE, MODEL_FILE};
use crate::dataset_manager::{self, DatasetManager, ManagerError};
use crate::detector::FaceDetector;
use crate::imaging;
use crate::prompt;
use anyhow::{bail, Context as _, Result};
use facerec_core::{refresh, Classifier, DatasetSource, LbphClassifier, Recognizer, RetrainDecision};
use std::path::{Path, PathBuf};

/// Resolved folders and settings shared by every subcommand.
pub struct Context {
    pub folders: Folders,
    pub config_dir: PathBuf,
    pub settings: Settings,
    pub retrain: bool,
}

impl Context {
    fn model_path(&self) -> PathBuf {
        self.config_dir.join(MODEL_FILE)
    }

    fn baseline_path(&self) -> PathBuf {
        self.config_dir.join(DATASET_STATE_FILE)
    }

    fn dataset_manager(&self, dataset_dir: &Path) -> Result<DatasetManager> {
        DatasetManager::open(dataset_dir, self.settings.dataset.clone(), &self.baseline_path())
            .with_context(|| format!("opening dataset {}", dataset_dir.display()))
    }

    fn detector(&self) -> Result<FaceDetector> {
        let cascade = self.folders.require_cascade()?;
        Ok(FaceDetector::load(
            cascade,
            &self.settings.detector,
            self.settings.dataset.face_size,
        )?)
    }

    fn new_recognizer(&self) -> Result<Recognizer<LbphClassifier>> {
        let classifier = LbphClassifier::new(self.settings.recognizer.lbph_params())
            .context("invalid [recognizer] settings")?;
        Ok(Recognizer::new(classifier, self.settings.recognizer.options()))
    }

    /// Load the stored model, then train from the dataset folder when forced,
    /// when the dataset changed, or when no model could be loaded.
    pub fn recognizer(&self) -> Result<Recognizer<LbphClassifier>> {
        let mut recognizer = self.new_recognizer()?;
        let model_path = self.model_path();

        load_stored(&mut recognizer, &model_path, self.retrain);
        let source = open_dataset(
            self.folders.dataset.as_deref(),
            &self.settings.dataset,
            &self.baseline_path(),
            recognizer.is_ready(),
            self.retrain,
        )?;
        ensure_trained(&mut recognizer, source.as_ref(), self.retrain, &model_path)?;
        Ok(recognizer)
    }
}

/// Load the model at `model_path` unless a retrain is forced. A model that
/// fails to load leaves the recognizer unloaded.
fn load_stored<C: Classifier>(recognizer: &mut Recognizer<C>, model_path: &Path, retrain: bool) {
    if retrain || !model_path.exists() {
        return;
    }
    tracing::info!(path = %model_path.display(), "loading pre-trained model");
    if let Err(e) = recognizer.load(model_path) {
        tracing::warn!(error = %e, "stored model unusable, training from scratch");
    }
}

/// Scan the dataset folder, if one is set. A folder that no longer exists is
/// skipped while a loaded model can serve without it.
fn open_dataset(
    dataset_dir: Option<&Path>,
    settings: &DatasetSettings,
    baseline_path: &Path,
    model_ready: bool,
    retrain: bool,
) -> Result<Option<DatasetManager>> {
    let Some(dataset_dir) = dataset_dir else {
        return Ok(None);
    };
    match DatasetManager::open(dataset_dir, settings.clone(), baseline_path) {
        Ok(manager) => Ok(Some(manager)),
        Err(ManagerError::NotFound(path)) if model_ready && !retrain => {
            tracing::warn!(path = %path, "dataset folder not found, using stored model");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("opening dataset {}", dataset_dir.display())),
    }
}

/// Run the retrain decision against `source` and fail unless the recognizer
/// ends up ready. Returns `None` when there was no source to decide against.
fn ensure_trained<C, S>(
    recognizer: &mut Recognizer<C>,
    source: Option<&S>,
    retrain: bool,
    model_path: &Path,
) -> Result<Option<RetrainDecision>>
where
    C: Classifier,
    S: DatasetSource,
{
    let decision = match source {
        Some(source) => {
            let decision = refresh(recognizer, source, retrain, model_path)?;
            tracing::debug!(?decision, "retrain decision");
            Some(decision)
        }
        None if retrain => {
            bail!("can't train recognizer because dataset folder is not specified");
        }
        None => None,
    };

    if !recognizer.is_ready() {
        bail!("failed to start face recognizer");
    }
    Ok(decision)
}

fn ensure_output(output: Option<&Path>) -> Result<()> {
    match output {
        None => tracing::info!("output path not specified, won't write images"),
        Some(dir) => std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create folder {}", dir.display()))?,
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

pub fn train(ctx: &Context) -> Result<()> {
    let recognizer = ctx.recognizer()?;
    println!("Recognizer ready with {} identities:", recognizer.labels().len());
    for (label, name) in recognizer.labels().iter() {
        println!("  {label:>4}  {name}");
    }
    Ok(())
}

pub fn recognize(ctx: &Context, input: &Path, output: Option<&Path>) -> Result<()> {
    let recognizer = ctx.recognizer()?;
    let mut detector = ctx.detector()?;
    ensure_output(output)?;

    let frame = imaging::load_gray(input).with_context(|| format!("could not read {}", input.display()))?;
    let faces = detector.detect(&frame);
    tracing::info!(faces = faces.len(), input = %input.display(), "faces found");

    for (i, face) in faces.into_iter().enumerate() {
        let probe = imaging::to_face_image(face.image.clone())?;
        let prediction = recognizer.predict(&probe)?;
        let name = prediction.display_name();
        println!(
            "{name} {:.2}  [x={} y={} w={} h={}]",
            prediction.confidence, face.x, face.y, face.width, face.height
        );

        if let Some(dir) = output {
            let path = dir.join(format!("{i}_{name}.png"));
            face.image
                .save(&path)
                .with_context(|| format!("could not write {}", path.display()))?;
        }
    }
    Ok(())
}

pub fn preprocess_image(ctx: &Context, input: &Path, output: Option<&Path>) -> Result<()> {
    let mut detector = ctx.detector()?;
    ensure_output(output)?;

    let frame = imaging::load_gray(input).with_context(|| format!("could not read {}", input.display()))?;
    let faces = detector.detect(&frame);
    println!("Found {} {}", faces.len(), if faces.len() == 1 { "face" } else { "faces" });

    if let Some(dir) = output {
        for (i, face) in faces.iter().enumerate() {
            let path = dir.join(format!("{i}.png"));
            face.image
                .save(&path)
                .with_context(|| format!("could not write {}", path.display()))?;
        }
    }
    Ok(())
}

pub fn preprocess_dataset(ctx: &Context, output: &Path) -> Result<()> {
    let Some(dataset_dir) = ctx.folders.dataset.as_deref() else {
        bail!("dataset folder not set");
    };
    let mut detector = ctx.detector()?;
    ensure_output(Some(output))?;

    let entries = dataset_manager::scan(dataset_dir, &ctx.settings.dataset)?;
    let mut written = 0usize;
    for entry in &entries {
        let frame = match imaging::load_gray(&entry.path) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(path = %entry.path.display(), error = %e, "could not read image");
                continue;
            }
        };

        let faces = detector.detect(&frame);
        match faces.len() {
            0 => {
                tracing::warn!(identity = %entry.identity, path = %entry.path.display(), "no faces found on image");
                continue;
            }
            1 => {}
            n => tracing::warn!(identity = %entry.identity, path = %entry.path.display(), faces = n, "more than one face found on image"),
        }

        let folder = output.join(&entry.identity);
        std::fs::create_dir_all(&folder).with_context(|| format!("could not create folder {}", folder.display()))?;
        let stem = file_stem(&entry.path);
        for (i, face) in faces.iter().enumerate() {
            let path = folder.join(format!("{stem}_{i}.png"));
            face.image
                .save(&path)
                .with_context(|| format!("could not write {}", path.display()))?;
            written += 1;
        }
    }

    println!("Preprocessed {} images into {} face crops", entries.len(), written);
    Ok(())
}

pub fn update(ctx: &Context, input: &Path, assume_yes: bool) -> Result<()> {
    let mut recognizer = ctx.recognizer()?;

    let batch = dataset_manager::load_folder(input, &ctx.settings.dataset)
        .with_context(|| format!("reading {}", input.display()))?;
    match recognizer.update(batch)? {
        Some(summary) => {
            println!(
                "Updated with {} images: {} known identities, {} new",
                summary.images,
                summary.reused,
                summary.introduced.len()
            );
            for (label, name) in &summary.introduced {
                println!("  new  {label:>4}  {name}");
            }
        }
        None => println!("Nothing to update"),
    }

    if recognizer.new_data().is_empty() {
        return Ok(());
    }

    let ask = |question: &str| -> Result<bool> {
        if assume_yes {
            return Ok(true);
        }
        Ok(prompt::confirm(question, false)?)
    };

    if let Some(dataset_dir) = ctx.folders.dataset.as_deref() {
        if ask("Save new images?")? {
            let written = dataset_manager::save_images(dataset_dir, recognizer.new_data())?;
            println!("Saved {written} images to {}", dataset_dir.display());
        }
    }
    if ask("Update stored recognizer with new data?")? {
        recognizer.save(&ctx.model_path())?;
        println!("Done");
    }
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    let model_path = ctx.model_path();
    let mut recognizer = ctx.new_recognizer()?;

    if model_path.exists() {
        match recognizer.load(&model_path) {
            Ok(()) => {
                println!("Model: {} ({} identities)", model_path.display(), recognizer.labels().len());
                for (label, name) in recognizer.labels().iter() {
                    println!("  {label:>4}  {name}");
                }
            }
            Err(e) => println!("Model: {} (unusable: {e})", model_path.display()),
        }
    } else {
        println!("Model: not trained");
    }

    match ctx.folders.dataset.as_deref() {
        Some(dataset_dir) => {
            let manager = ctx.dataset_manager(dataset_dir)?;
            println!(
                "Dataset: {} ({} images, fingerprint {}, {})",
                dataset_dir.display(),
                manager.entries().len(),
                &manager.fingerprint()[..12],
                if manager.changed() { "changed since last training" } else { "unchanged" }
            );
        }
        None => println!("Dataset: not set"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facerec_core::{RecognizerOptions, RetrainReason};
    use image::{GrayImage, Luma};

    fn write_image(path: &Path, seed: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::from_fn(32, 32, |x, y| Luma([(x as u8).wrapping_mul(seed) ^ (y as u8).wrapping_mul(3)]))
            .save(path)
            .unwrap();
    }

    fn sample_dataset(root: &Path) {
        write_image(&root.join("bob/0.png"), 5);
        write_image(&root.join("bob/1.png"), 6);
        write_image(&root.join("carol/0.png"), 11);
    }

    fn recognizer() -> Recognizer<LbphClassifier> {
        Recognizer::new(LbphClassifier::default(), RecognizerOptions::default())
    }

    fn open(root: &Path, config: &Path) -> DatasetManager {
        DatasetManager::open(root, DatasetSettings::default(), &config.join(DATASET_STATE_FILE)).unwrap()
    }

    #[test]
    fn test_fresh_start_trains_and_reuses() {
        let config = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        sample_dataset(data.path());
        let model_path = config.path().join(MODEL_FILE);

        let mut first = recognizer();
        load_stored(&mut first, &model_path, false);
        let decision = ensure_trained(&mut first, Some(&open(data.path(), config.path())), false, &model_path).unwrap();
        assert_eq!(decision, Some(RetrainDecision::Train(RetrainReason::DatasetChanged)));
        assert!(model_path.exists());

        let mut second = recognizer();
        load_stored(&mut second, &model_path, false);
        assert!(second.is_ready());
        let decision = ensure_trained(&mut second, Some(&open(data.path(), config.path())), false, &model_path).unwrap();
        assert_eq!(decision, Some(RetrainDecision::Reuse));
        assert_eq!(second.labels().label_of("carol"), Some(1));
    }

    #[test]
    fn test_garbage_model_with_unchanged_dataset_retrains() {
        let config = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        sample_dataset(data.path());
        let model_path = config.path().join(MODEL_FILE);

        open(data.path(), config.path()).commit_baseline().unwrap();
        std::fs::write(&model_path, b"{ not a model").unwrap();

        let mut rec = recognizer();
        load_stored(&mut rec, &model_path, false);
        assert!(!rec.is_ready());

        let manager = open(data.path(), config.path());
        assert!(!manager.changed());
        let decision = ensure_trained(&mut rec, Some(&manager), false, &model_path).unwrap();
        assert_eq!(decision, Some(RetrainDecision::Train(RetrainReason::NoModel)));
        assert!(rec.is_ready());

        let mut reloaded = recognizer();
        reloaded.load(&model_path).unwrap();
        assert_eq!(reloaded.labels().len(), 2);
    }

    #[test]
    fn test_forced_retrain_skips_stored_model() {
        let config = tempfile::tempdir().unwrap();
        let model_path = config.path().join(MODEL_FILE);
        std::fs::write(&model_path, b"{ not a model").unwrap();

        let mut rec = recognizer();
        load_stored(&mut rec, &model_path, true);
        assert!(!rec.is_ready());
    }

    #[test]
    fn test_forced_retrain_without_dataset_fails() {
        let config = tempfile::tempdir().unwrap();
        let model_path = config.path().join(MODEL_FILE);

        let mut rec = recognizer();
        let err = ensure_trained(&mut rec, None::<&DatasetManager>, true, &model_path).unwrap_err();
        assert!(err.to_string().contains("dataset folder is not specified"));
        assert!(!model_path.exists());
    }

    #[test]
    fn test_no_model_and_no_dataset_fails() {
        let config = tempfile::tempdir().unwrap();
        let model_path = config.path().join(MODEL_FILE);

        let mut rec = recognizer();
        load_stored(&mut rec, &model_path, false);
        let source = open_dataset(None, &DatasetSettings::default(), &config.path().join(DATASET_STATE_FILE), rec.is_ready(), false)
            .unwrap();
        assert!(source.is_none());

        let err = ensure_trained(&mut rec, source.as_ref(), false, &model_path).unwrap_err();
        assert_eq!(err.to_string(), "failed to start face recognizer");
    }

    #[test]
    fn test_missing_dataset_folder_reuses_loaded_model() {
        let config = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        sample_dataset(data.path());
        let model_path = config.path().join(MODEL_FILE);
        let baseline_path = config.path().join(DATASET_STATE_FILE);

        let mut first = recognizer();
        ensure_trained(&mut first, Some(&open(data.path(), config.path())), false, &model_path).unwrap();

        let missing = data.path().join("moved-away");
        let mut rec = recognizer();
        load_stored(&mut rec, &model_path, false);
        let source = open_dataset(Some(&missing), &DatasetSettings::default(), &baseline_path, rec.is_ready(), false)
            .unwrap();
        assert!(source.is_none());

        let decision = ensure_trained(&mut rec, source.as_ref(), false, &model_path).unwrap();
        assert_eq!(decision, None);
        assert!(rec.is_ready());
    }

    #[test]
    fn test_missing_dataset_folder_fails_without_model() {
        let config = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let missing = data.path().join("moved-away");
        let baseline_path = config.path().join(DATASET_STATE_FILE);

        let err = open_dataset(Some(&missing), &DatasetSettings::default(), &baseline_path, false, false).unwrap_err();
        assert!(err.to_string().contains("opening dataset"));

        let err = open_dataset(Some(&missing), &DatasetSettings::default(), &baseline_path, true, true).unwrap_err();
        assert!(err.to_string().contains("opening dataset"));
    }
}
