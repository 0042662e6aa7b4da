use anyhow::{bail, Context, Result};
use facerec_core::{LbphParams, RecognizerOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file inside the config folder.
pub const SETTINGS_FILE: &str = "facerec.toml";
/// Stored recognizer model inside the config folder.
pub const MODEL_FILE: &str = "model.json";
/// Freshness baseline of the dataset folder inside the config folder.
pub const DATASET_STATE_FILE: &str = "dataset_state.json";

const FOLDERS_FILE: &str = "folders.json";

/// Folders remembered between runs so they need not be passed every time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Folders {
    pub config: Option<PathBuf>,
    pub dataset: Option<PathBuf>,
    pub cascade: Option<PathBuf>,
}

impl Folders {
    /// Read stored folders. A missing or unreadable file yields no folders.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable folders file");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Fill folders missing from `self` with the `stored` ones.
    pub fn or(self, stored: &Folders) -> Folders {
        Folders {
            config: self.config.or_else(|| stored.config.clone()),
            dataset: self.dataset.or_else(|| stored.dataset.clone()),
            cascade: self.cascade.or_else(|| stored.cascade.clone()),
        }
    }

    /// The config folder, which every command needs.
    pub fn require_config(&self) -> Result<&Path> {
        let Some(dir) = self.config.as_deref() else {
            bail!("no config folder, aborting (pass --config or set FACEREC_CONFIG_DIR)");
        };
        if !dir.is_dir() {
            bail!("invalid config folder: {}", dir.display());
        }
        Ok(dir)
    }

    /// The detector model folder, needed only by commands that detect faces.
    pub fn require_cascade(&self) -> Result<&Path> {
        let Some(dir) = self.cascade.as_deref() else {
            bail!("no cascade folder, aborting (pass --cascade or set FACEREC_CASCADE_DIR)");
        };
        if !dir.is_dir() {
            bail!("invalid cascade folder: {}", dir.display());
        }
        Ok(dir)
    }
}

/// Location of the stored folders file.
///
/// `FACEREC_FOLDERS_FILE`, else `$XDG_CONFIG_HOME/facerec/folders.json`,
/// else `$HOME/.config/facerec/folders.json`.
pub fn folders_file() -> PathBuf {
    if let Ok(path) = std::env::var("FACEREC_FOLDERS_FILE") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facerec")
        .join(FOLDERS_FILE)
}

/// Contents of `facerec.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recognizer: RecognizerSettings,
    pub dataset: DatasetSettings,
    pub detector: DetectorSettings,
}

impl Settings {
    /// Load `facerec.toml` from `config_dir`, falling back to defaults when absent.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Maximum accepted LBPH distance; unset accepts every nearest match.
    pub threshold: Option<f64>,
    pub strict_empty_dataset: bool,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        let lbph = LbphParams::default();
        Self {
            radius: lbph.radius,
            neighbors: lbph.neighbors,
            grid_x: lbph.grid_x,
            grid_y: lbph.grid_y,
            threshold: lbph.threshold,
            strict_empty_dataset: RecognizerOptions::default().strict_empty_dataset,
        }
    }
}

impl RecognizerSettings {
    pub fn lbph_params(&self) -> LbphParams {
        LbphParams {
            radius: self.radius,
            neighbors: self.neighbors,
            grid_x: self.grid_x,
            grid_y: self.grid_y,
            threshold: self.threshold,
        }
    }

    pub fn options(&self) -> RecognizerOptions {
        RecognizerOptions {
            strict_empty_dataset: self.strict_empty_dataset,
        }
    }
}

/// Dataset preprocessing settings. Part of the freshness baseline: changing
/// any of them invalidates the cached model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// Side of the square face crops fed to the recognizer.
    pub face_size: u32,
    /// Accepted image file extensions, lowercase.
    pub extensions: Vec<String>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            face_size: 100,
            extensions: ["png", "jpg", "jpeg", "bmp", "pgm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DatasetSettings {
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Detector model file inside the cascade folder.
    pub model_file: String,
    pub min_face_size: u32,
    pub score_threshold: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_file: "seeta_fd_frontal_v1.0.bin".to_string(),
            min_face_size: 40,
            score_threshold: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}
