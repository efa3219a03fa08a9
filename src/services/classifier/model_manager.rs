use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::classify_types::{ModelStatus, Prediction};
use crate::services::classifier::inference;
use crate::services::classifier::ImageClassifier;
use image::DynamicImage;
use ort::session::Session;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Loads the model once at startup and remembers how that went.
#[derive(Clone)]
pub struct ModelManager {
    config: AppConfig,
    status: Arc<Mutex<ModelStatus>>,
}

impl ModelManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            status: Arc::new(Mutex::new(ModelStatus::default())),
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Builds the ONNX classifier. Any failure here is reported as
    /// `ModelUnavailable` and is final for the process.
    pub async fn load(&self) -> Result<OnnxClassifier, AppError> {
        let result = self.do_load().await;

        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &result {
            Ok(classifier) => {
                *status = ModelStatus {
                    ready: true,
                    model_name: Some(model_name(&self.config.model_path)),
                    labels: classifier.labels.len(),
                    error: None,
                };
                tracing::info!(
                    model = %self.config.model_path.display(),
                    labels = classifier.labels.len(),
                    use_gpu = self.config.use_gpu,
                    "model loaded"
                );
            }
            Err(e) => {
                *status = ModelStatus {
                    ready: false,
                    model_name: None,
                    labels: 0,
                    error: Some(e.to_string()),
                };
                tracing::warn!(model = %self.config.model_path.display(), error = %e, "model unavailable");
            }
        }

        result
    }

    async fn do_load(&self) -> Result<OnnxClassifier, AppError> {
        let config_content = tokio::fs::read_to_string(&self.config.labels_path)
            .await
            .map_err(|e| {
                AppError::ModelUnavailable(format!(
                    "Failed to read labels file {}: {}",
                    self.config.labels_path.display(),
                    e
                ))
            })?;
        let labels = parse_labels(&config_content)?;

        if !self.config.model_path.exists() {
            return Err(AppError::ModelUnavailable(format!(
                "Model file not found: {}",
                self.config.model_path.display()
            )));
        }

        let model_path = self.config.model_path.clone();
        let use_gpu = self.config.use_gpu;
        let intra_threads = self.config.intra_threads;

        let session = tokio::task::spawn_blocking(move || build_session(&model_path, use_gpu, intra_threads))
            .await
            .map_err(|e| {
                AppError::ModelUnavailable(format!("Failed to spawn model loading task: {}", e))
            })??;

        Ok(OnnxClassifier {
            session: Mutex::new(session),
            labels,
            crop_size: self.config.crop_size,
            top_k: self.config.top_k,
            min_confidence: self.config.min_confidence,
        })
    }
}

fn build_session(model_path: &Path, use_gpu: bool, intra_threads: usize) -> Result<Session, AppError> {
    let _ = ort::init().with_name("image-lens").commit();

    let mut builder = Session::builder()
        .map_err(|e| unavailable("Failed to create session builder", e))?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
        .map_err(|e| unavailable("Failed to set optimization level", e))?
        .with_intra_threads(intra_threads)
        .map_err(|e| unavailable("Failed to set intra threads", e))?;

    if use_gpu {
        builder = builder
            .with_execution_providers([
                ort::execution_providers::CoreMLExecutionProvider::default().build(),
                ort::execution_providers::CUDAExecutionProvider::default().build(),
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| unavailable("Failed to register GPU execution providers", e))?;
    } else {
        builder = builder
            .with_execution_providers([ort::execution_providers::CPUExecutionProvider::default().build()])
            .map_err(|e| unavailable("Failed to register CPU execution provider", e))?;
    }

    builder
        .commit_from_file(model_path)
        .map_err(|e| unavailable("Failed to load ONNX model", e))
}

/// Largest `id2label` index accepted; real classifier heads are far smaller.
const MAX_LABEL_INDEX: usize = 1 << 20;

fn unavailable(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::ModelUnavailable(format!("{}: {}", what, e))
}

/// Accepts either a model config with an `id2label` object or a bare JSON
/// array of label strings.
pub fn parse_labels(content: &str) -> Result<Vec<String>, AppError> {
    let config: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| AppError::ModelUnavailable(format!("Failed to parse labels JSON: {}", e)))?;

    if let Some(list) = config.as_array() {
        return Ok(list
            .iter()
            .map(|v| v.as_str().unwrap_or("unknown").to_string())
            .collect());
    }

    let id2label = config["id2label"]
        .as_object()
        .ok_or_else(|| AppError::ModelUnavailable("Config missing id2label field".to_string()))?;

    let mut labels: Vec<(usize, String)> = id2label
        .iter()
        .filter_map(|(k, v)| {
            let idx = k.parse::<usize>().ok()?;
            Some((idx, v.as_str().unwrap_or("unknown").to_string()))
        })
        .collect();
    labels.sort_by_key(|(idx, _)| *idx);

    if let Some((idx, _)) = labels.last() {
        if *idx >= MAX_LABEL_INDEX {
            return Err(AppError::ModelUnavailable(format!(
                "Label index {} exceeds the supported maximum of {}",
                idx,
                MAX_LABEL_INDEX - 1
            )));
        }
    }

    // Dense by index; gaps fall back to `class_{idx}` at ranking time.
    let len = labels.last().map(|(idx, _)| idx + 1).unwrap_or(0);
    let mut dense: Vec<String> = (0..len).map(|i| format!("class_{}", i)).collect();
    for (idx, label) in labels {
        dense[idx] = label;
    }
    Ok(dense)
}

fn model_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

/// Inference gateway backed by ONNX Runtime.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    labels: Vec<String>,
    crop_size: u32,
    top_k: usize,
    min_confidence: f32,
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<Vec<Prediction>, AppError> {
        let tensor = inference::preprocess_image(image, self.crop_size)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| AppError::Inference("Model session lock poisoned".to_string()))?;

        let predictions = inference::run_inference_with_model(&mut session, tensor, &self.labels, self.top_k)?;

        Ok(predictions
            .into_iter()
            .filter(|p| p.confidence >= self.min_confidence)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id2label_in_index_order() {
        let labels = parse_labels(r#"{"id2label": {"2": "tabby cat", "0": "tench", "1": "goldfish"}}"#).unwrap();
        assert_eq!(labels, vec!["tench", "goldfish", "tabby cat"]);
    }

    #[test]
    fn fills_gaps_in_id2label() {
        let labels = parse_labels(r#"{"id2label": {"0": "tench", "2": "tabby cat"}}"#).unwrap();
        assert_eq!(labels, vec!["tench", "class_1", "tabby cat"]);
    }

    #[test]
    fn oversized_label_indexes_are_model_unavailable() {
        for key in ["18446744073709551615", "4000000000", "1048576"] {
            let content = format!(r#"{{"id2label": {{"0": "tench", "{}": "x"}}}}"#, key);
            assert!(
                matches!(parse_labels(&content), Err(AppError::ModelUnavailable(_))),
                "index {key}"
            );
        }

        let labels = parse_labels(r#"{"id2label": {"1048575": "last"}}"#).unwrap();
        assert_eq!(labels.len(), MAX_LABEL_INDEX);
        assert_eq!(labels[MAX_LABEL_INDEX - 1], "last");
    }

    #[test]
    fn parses_plain_label_arrays() {
        let labels = parse_labels(r#"["tench", "goldfish"]"#).unwrap();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn missing_id2label_is_model_unavailable() {
        assert!(matches!(
            parse_labels(r#"{"architectures": []}"#),
            Err(AppError::ModelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_files_leave_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(AppConfig {
            model_path: dir.path().join("missing.onnx"),
            labels_path: dir.path().join("missing.json"),
            ..Default::default()
        });

        let err = manager.load().await.err().unwrap();
        assert!(matches!(err, AppError::ModelUnavailable(_)));

        let status = manager.status();
        assert!(!status.ready);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn missing_model_after_labels_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let labels_path = dir.path().join("config.json");
        std::fs::write(&labels_path, r#"{"id2label": {"0": "tench"}}"#).unwrap();

        let manager = ModelManager::new(AppConfig {
            model_path: dir.path().join("missing.onnx"),
            labels_path,
            ..Default::default()
        });

        match manager.load().await {
            Err(AppError::ModelUnavailable(msg)) => assert!(msg.contains("not found")),
            other => panic!("expected ModelUnavailable, got {:?}", other.err()),
        }
    }
}
