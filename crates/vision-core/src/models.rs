//! Model catalog: maps requested model names to model files on disk.
//!
//! Catalogued names resolve to a file inside the models directory and must
//! exist. Names the catalog does not know are forwarded to workers verbatim,
//! which lets a worker load a hub model by name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model file for '{name}' not found at {}", path.display())]
    FileMissing { name: String, path: PathBuf },

    #[error("model not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub file: String,
    pub description: String,
    pub accuracy: Option<f64>,
}

impl From<&ModelConfig> for ModelEntry {
    fn from(m: &ModelConfig) -> Self {
        Self {
            name: m.name.to_ascii_lowercase(),
            file: m.file.clone(),
            description: m.description.clone(),
            accuracy: m.accuracy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models_dir: PathBuf,
    entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    /// Build a catalog from configured entries. An empty list falls back to
    /// the built-in yolov5 / yolov8 / melanoma_model set.
    pub fn new(models_dir: impl Into<PathBuf>, configured: &[ModelConfig]) -> Self {
        let entries = if configured.is_empty() {
            builtin_entries()
        } else {
            configured.iter().map(ModelEntry::from).collect()
        };
        Self {
            models_dir: models_dir.into(),
            entries,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn list(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Look up a catalogued model, case-insensitively.
    pub fn get(&self, name: &str) -> Result<&ModelEntry, ModelError> {
        let key = name.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .find(|e| e.name == key)
            .ok_or_else(|| ModelError::NotFound(name.to_string()))
    }

    /// Resolve a requested model name to the path handed to a worker.
    pub fn resolve(&self, name: &str) -> Result<String, ModelError> {
        match self.get(name) {
            Ok(entry) => {
                let path = self.models_dir.join(&entry.file);
                if path.exists() {
                    Ok(path.to_string_lossy().into_owned())
                } else {
                    Err(ModelError::FileMissing {
                        name: entry.name.clone(),
                        path,
                    })
                }
            }
            Err(_) => Ok(name.to_string()),
        }
    }
}

fn builtin_entries() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            name: "yolov5".to_string(),
            file: "yolov5s.pt".to_string(),
            description: "YOLOv5 small object detector".to_string(),
            accuracy: None,
        },
        ModelEntry {
            name: "yolov8".to_string(),
            file: "yolov8.pt".to_string(),
            description: "YOLOv8 object detector".to_string(),
            accuracy: None,
        },
        ModelEntry {
            name: "melanoma_model".to_string(),
            file: "melanoma_model.pt".to_string(),
            description: "DenseNet melanoma classifier".to_string(),
            accuracy: None,
        },
    ]
}
