use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

/// Keeps `crop_size * crop_size * 3` comfortably inside `u32`.
pub const MAX_CROP_SIZE: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_path: PathBuf,
    /// JSON file carrying an `id2label` map, as shipped next to exported models.
    pub labels_path: PathBuf,
    pub crop_size: u32,
    pub top_k: usize,
    pub min_confidence: f32,
    pub use_gpu: bool,
    pub intra_threads: usize,
    pub inference_timeout_ms: Option<u64>,
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/mobilenetv2.onnx"),
            labels_path: PathBuf::from("models/mobilenetv2-config.json"),
            crop_size: 224,
            top_k: 5,
            min_confidence: 0.0,
            use_gpu: false,
            intra_threads: 4,
            inference_timeout_ms: None,
            event_capacity: 64,
        }
    }
}

impl AppConfig {
    /// Reads the TOML file when given, then applies `IMAGE_LENS_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn apply_env<F>(&mut self, var: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("IMAGE_LENS_MODEL") {
            self.model_path = PathBuf::from(value);
        }
        if let Some(value) = var("IMAGE_LENS_LABELS") {
            self.labels_path = PathBuf::from(value);
        }
        if let Some(value) = var("IMAGE_LENS_TOP_K") {
            self.top_k = parse_env("IMAGE_LENS_TOP_K", &value)?;
        }
        if let Some(value) = var("IMAGE_LENS_USE_GPU") {
            self.use_gpu = parse_bool(&value);
        }
        if let Some(value) = var("IMAGE_LENS_TIMEOUT_MS") {
            self.inference_timeout_ms = Some(parse_env("IMAGE_LENS_TIMEOUT_MS", &value)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.top_k == 0 {
            return Err(AppError::Config("top_k must be at least 1".into()));
        }
        if self.crop_size == 0 || self.crop_size > MAX_CROP_SIZE {
            return Err(AppError::Config(format!(
                "crop_size must be within [1, {}], got {}",
                MAX_CROP_SIZE, self.crop_size
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(AppError::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.event_capacity == 0 {
            return Err(AppError::Config("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} has an invalid value: {value}")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
