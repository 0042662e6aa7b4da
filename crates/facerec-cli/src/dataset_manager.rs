//! Dataset folder access: one sub-folder per identity, face images inside.
//!
//! The manager fingerprints the folder so a run can tell whether the
//! dataset changed since the cached model was trained.

use crate::config::DatasetSettings;
use crate::imaging;
use chrono::{DateTime, Utc};
use facerec_core::{BoxError, Dataset, DatasetError, DatasetSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("dataset folder not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("baseline: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("could not encode image for {0}")]
    Encode(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// One image file of the dataset folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub identity: String,
    pub path: PathBuf,
}

/// Freshness baseline persisted after each successful training.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Baseline {
    settings: DatasetSettings,
    fingerprint: String,
    recorded_at: DateTime<Utc>,
}

/// Dataset folder plus its freshness signal.
#[derive(Debug)]
pub struct DatasetManager {
    settings: DatasetSettings,
    baseline_path: PathBuf,
    entries: Vec<DatasetEntry>,
    fingerprint: String,
    changed: bool,
}

impl DatasetManager {
    /// Scan `root` and compare it against the baseline stored at `baseline_path`.
    pub fn open(root: &Path, settings: DatasetSettings, baseline_path: &Path) -> Result<Self, ManagerError> {
        let entries = scan(root, &settings)?;
        let fingerprint = fingerprint(root, &entries)?;
        let changed = match read_baseline(baseline_path) {
            Some(baseline) => baseline.settings != settings || baseline.fingerprint != fingerprint,
            None => true,
        };

        tracing::info!(
            root = %root.display(),
            images = entries.len(),
            changed,
            "dataset scanned"
        );

        Ok(Self {
            settings,
            baseline_path: baseline_path.to_path_buf(),
            entries,
            fingerprint,
            changed,
        })
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl DatasetSource for DatasetManager {
    fn changed(&self) -> bool {
        self.changed
    }

    fn read_dataset(&self) -> Result<Dataset, BoxError> {
        Ok(read_entries(&self.entries, &self.settings)?)
    }

    fn commit_baseline(&self) -> Result<(), BoxError> {
        let baseline = Baseline {
            settings: self.settings.clone(),
            fingerprint: self.fingerprint.clone(),
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&baseline)?;
        std::fs::write(&self.baseline_path, json)?;
        tracing::debug!(path = %self.baseline_path.display(), "dataset baseline recorded");
        Ok(())
    }
}

fn read_baseline(path: &Path) -> Option<Baseline> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(baseline) => Some(baseline),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable dataset baseline");
            None
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, ManagerError> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_hidden(&path) {
            children.push(path);
        }
    }
    children.sort();
    Ok(children)
}

/// List the accepted image files of a dataset folder, sorted by identity then name.
pub fn scan(root: &Path, settings: &DatasetSettings) -> Result<Vec<DatasetEntry>, ManagerError> {
    if !root.is_dir() {
        return Err(ManagerError::NotFound(root.display().to_string()));
    }

    let mut entries = Vec::new();
    for folder in sorted_children(root)?.into_iter().filter(|p| p.is_dir()) {
        let Some(identity) = folder.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            tracing::warn!(folder = %folder.display(), "skipping folder with non-UTF-8 name");
            continue;
        };

        let before = entries.len();
        for path in sorted_children(&folder)? {
            if path.is_file() && settings.accepts(&path) {
                entries.push(DatasetEntry {
                    identity: identity.clone(),
                    path,
                });
            }
        }
        if entries.len() == before {
            tracing::warn!(folder = %folder.display(), "empty folder");
        }
    }

    if entries.is_empty() {
        tracing::error!(root = %root.display(), "empty dataset");
    }
    Ok(entries)
}

/// SHA-256 over relative path, size and modification time of every entry.
fn fingerprint(root: &Path, entries: &[DatasetEntry]) -> Result<String, ManagerError> {
    let mut hasher = Sha256::new();
    for entry in entries {
        let meta = std::fs::metadata(&entry.path)?;
        let rel = entry.path.strip_prefix(root).unwrap_or(&entry.path);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_le_bytes());
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        hasher.update(mtime.as_secs().to_le_bytes());
        hasher.update(mtime.subsec_nanos().to_le_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Decode `entries` into a dataset. Unreadable images are logged and skipped.
pub fn read_entries(entries: &[DatasetEntry], settings: &DatasetSettings) -> Result<Dataset, ManagerError> {
    let mut dataset = Dataset::new();
    for entry in entries {
        match imaging::load_face(&entry.path, settings.face_size) {
            Ok(face) => {
                dataset.push(face, &entry.identity)?;
            }
            Err(e) => {
                tracing::error!(path = %entry.path.display(), error = %e, "could not read image");
            }
        }
    }
    tracing::info!(
        images = dataset.len(),
        identities = dataset.label_count(),
        "dataset loaded"
    );
    Ok(dataset)
}

/// Load every image of a dataset-shaped folder.
pub fn load_folder(root: &Path, settings: &DatasetSettings) -> Result<Dataset, ManagerError> {
    read_entries(&scan(root, settings)?, settings)
}

/// Write `data` into `root/<identity>/<n>.png`, numbering from 0 per identity
/// and skipping names that already exist. Returns the number of images written.
pub fn save_images(root: &Path, data: &Dataset) -> Result<usize, ManagerError> {
    std::fs::create_dir_all(root)?;
    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut written = 0;

    for (face, identity) in data.iter() {
        let folder = root.join(identity);
        std::fs::create_dir_all(&folder)?;

        let counter = counters.entry(identity).or_insert(0);
        let path = loop {
            let candidate = folder.join(format!("{counter}.png"));
            *counter += 1;
            if !candidate.exists() {
                break candidate;
            }
        };

        let gray = imaging::from_face_image(face)
            .ok_or_else(|| ManagerError::Encode(path.display().to_string()))?;
        gray.save(&path)?;
        written += 1;
    }

    tracing::info!(root = %root.display(), written, "saved new images");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facerec_core::FaceImage;
    use image::{GrayImage, Luma};

    fn write_image(path: &Path, seed: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::from_fn(16, 16, |x, y| Luma([(x as u8).wrapping_mul(seed).wrapping_add(y as u8)]))
            .save(path)
            .unwrap();
    }

    fn sample_dataset(root: &Path) {
        write_image(&root.join("bob/1.png"), 3);
        write_image(&root.join("bob/0.png"), 5);
        write_image(&root.join("carol/a.png"), 7);
        std::fs::write(root.join("carol/notes.txt"), b"ignored").unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let entries = scan(dir.path(), &DatasetSettings::default()).unwrap();
        let listed: Vec<(String, String)> = entries
            .iter()
            .map(|e| (e.identity.clone(), e.path.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("bob".into(), "0.png".into()),
                ("bob".into(), "1.png".into()),
                ("carol".into(), "a.png".into()),
            ]
        );
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("absent"), &DatasetSettings::default()).unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[test]
    fn test_read_dataset_skips_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());
        std::fs::write(dir.path().join("carol/broken.png"), b"garbage").unwrap();

        let settings = DatasetSettings { face_size: 12, ..Default::default() };
        let ds = load_folder(dir.path(), &settings).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.identities().collect::<Vec<_>>(), vec!["bob", "carol"]);
        assert!(ds.images().iter().all(|f| f.width() == 12 && f.height() == 12));
    }

    #[test]
    fn test_changed_until_baseline_committed() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let baseline = dir.path().join("state.json");
        sample_dataset(&data);

        let mgr = DatasetManager::open(&data, DatasetSettings::default(), &baseline).unwrap();
        assert!(mgr.changed());
        mgr.commit_baseline().unwrap();

        let again = DatasetManager::open(&data, DatasetSettings::default(), &baseline).unwrap();
        assert!(!again.changed());
        assert_eq!(again.fingerprint(), mgr.fingerprint());
    }

    #[test]
    fn test_new_file_marks_changed() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let baseline = dir.path().join("state.json");
        sample_dataset(&data);
        DatasetManager::open(&data, DatasetSettings::default(), &baseline)
            .unwrap()
            .commit_baseline()
            .unwrap();

        write_image(&data.join("dave/0.png"), 9);
        let mgr = DatasetManager::open(&data, DatasetSettings::default(), &baseline).unwrap();
        assert!(mgr.changed());
    }

    #[test]
    fn test_settings_change_marks_changed() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let baseline = dir.path().join("state.json");
        sample_dataset(&data);
        DatasetManager::open(&data, DatasetSettings::default(), &baseline)
            .unwrap()
            .commit_baseline()
            .unwrap();

        let resized = DatasetSettings { face_size: 64, ..Default::default() };
        let mgr = DatasetManager::open(&data, resized, &baseline).unwrap();
        assert!(mgr.changed());
    }

    #[test]
    fn test_corrupt_baseline_marks_changed() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let baseline = dir.path().join("state.json");
        sample_dataset(&data);
        std::fs::write(&baseline, b"{").unwrap();

        let mgr = DatasetManager::open(&data, DatasetSettings::default(), &baseline).unwrap();
        assert!(mgr.changed());
    }

    #[test]
    fn test_save_images_numbers_per_identity_and_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("carol/0.png"), 1);

        let face = |v: u8| FaceImage::new(4, 4, vec![v; 16]).unwrap();
        let data = Dataset::from_pairs(vec![
            (face(10), "carol"),
            (face(20), "dave"),
            (face(30), "carol"),
        ])
        .unwrap();

        assert_eq!(save_images(dir.path(), &data).unwrap(), 3);
        assert!(dir.path().join("carol/1.png").exists());
        assert!(dir.path().join("carol/2.png").exists());
        assert!(dir.path().join("dave/0.png").exists());

        let saved = image::open(dir.path().join("dave/0.png")).unwrap().to_luma8();
        assert!(saved.pixels().all(|p| p.0[0] == 20));
    }
}
