use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

/// Upper bound on predictions kept per record.
pub const MAX_PREDICTIONS: usize = 5;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub identifier: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }

    /// Whole-number percentage as shown next to a label.
    pub fn percent(&self) -> i32 {
        (self.confidence * 100.0) as i32
    }
}

/// One completed classification. Never mutated after construction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassificationRecord {
    pub id: Uuid,
    pub predictions: Vec<Prediction>,
    pub timestamp: DateTime<Utc>,
    pub image_name: String,
}

impl ClassificationRecord {
    /// Builds a record from raw gateway output, keeping the best
    /// `MAX_PREDICTIONS` in non-increasing confidence order.
    pub fn new(mut predictions: Vec<Prediction>, image_name: String) -> Self {
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.truncate(MAX_PREDICTIONS);

        Self {
            id: Uuid::new_v4(),
            predictions,
            timestamp: Utc::now(),
            image_name,
        }
    }

    pub fn top(&self, n: usize) -> &[Prediction] {
        &self.predictions[..n.min(self.predictions.len())]
    }

    /// Case-insensitive substring match against any prediction label.
    /// `query` is expected to be lowercase already.
    pub fn matches(&self, query: &str) -> bool {
        self.predictions
            .iter()
            .any(|p| p.identifier.to_lowercase().contains(query))
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageOrigin {
    #[default]
    Library,
    Camera,
}

#[derive(Debug, Clone)]
pub enum ImagePayload {
    Decoded(DynamicImage),
    Encoded(Vec<u8>),
    Path(PathBuf),
}

/// An image handed over by the picker or the camera.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub origin: ImageOrigin,
    pub payload: ImagePayload,
}

impl ImageSource {
    pub fn decoded(image: DynamicImage, origin: ImageOrigin) -> Self {
        Self {
            origin,
            payload: ImagePayload::Decoded(image),
        }
    }

    pub fn encoded(bytes: Vec<u8>, origin: ImageOrigin) -> Self {
        Self {
            origin,
            payload: ImagePayload::Encoded(bytes),
        }
    }

    pub fn file(path: impl Into<PathBuf>, origin: ImageOrigin) -> Self {
        Self {
            origin,
            payload: ImagePayload::Path(path.into()),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage, AppError> {
        match &self.payload {
            ImagePayload::Decoded(image) => Ok(image.clone()),
            ImagePayload::Encoded(bytes) => Ok(image::load_from_memory(bytes)?),
            ImagePayload::Path(path) => image::ImageReader::open(path)
                .map_err(|e| {
                    AppError::ImageDecode(format!("Failed to open image {}: {}", path.display(), e))
                })?
                .with_guessed_format()
                .map_err(|e| {
                    AppError::ImageDecode(format!("Failed to read image {}: {}", path.display(), e))
                })?
                .decode()
                .map_err(|e| {
                    AppError::ImageDecode(format!("Failed to decode image {}: {}", path.display(), e))
                }),
        }
    }

    pub fn describe(&self) -> String {
        match &self.payload {
            ImagePayload::Decoded(image) => format!("{}x{} bitmap", image.width(), image.height()),
            ImagePayload::Encoded(bytes) => format!("{} encoded bytes", bytes.len()),
            ImagePayload::Path(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    InProgress,
    Complete,
    Failed,
}

/// Read model published after every session mutation.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub current_image: Option<Arc<ImageSource>>,
    pub status: SessionStatus,
    pub current_result: Option<Arc<ClassificationRecord>>,
    pub history: Vec<Arc<ClassificationRecord>>,
    /// Error of the latest `Failed` transition; cleared on `Complete`.
    pub last_error: Option<AppError>,
    pub pending: usize,
}

impl SessionState {
    pub fn is_classifying(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

/// A history entry shaped for a list row: name, date and the two best labels.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: Uuid,
    pub image_name: String,
    pub date: String,
    pub predictions: Vec<Prediction>,
}

impl From<&ClassificationRecord> for HistoryRow {
    fn from(record: &ClassificationRecord) -> Self {
        Self {
            id: record.id,
            image_name: record.image_name.clone(),
            date: record.timestamp.format("%Y-%m-%d").to_string(),
            predictions: record.top(2).to_vec(),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct ModelStatus {
    pub ready: bool,
    pub model_name: Option<String>,
    pub labels: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_five_best_in_order() {
        let preds = (0..8)
            .map(|i| Prediction::new(format!("label{i}"), i as f32 / 10.0))
            .collect();
        let record = ClassificationRecord::new(preds, "Image 1".into());

        assert_eq!(record.predictions.len(), MAX_PREDICTIONS);
        assert_eq!(record.predictions[0].identifier, "label7");
        assert!(record
            .predictions
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn percent_truncates() {
        assert_eq!(Prediction::new("tabby cat", 0.917).percent(), 91);
        assert_eq!(Prediction::new("tabby cat", 0.0).percent(), 0);
    }

    #[test]
    fn history_row_shows_two_labels() {
        let record = ClassificationRecord::new(
            vec![
                Prediction::new("tabby cat", 0.6),
                Prediction::new("tiger cat", 0.3),
                Prediction::new("Egyptian cat", 0.1),
            ],
            "Image 3".into(),
        );
        let row = HistoryRow::from(&record);
        assert_eq!(row.image_name, "Image 3");
        assert_eq!(row.predictions.len(), 2);
        assert_eq!(row.predictions[1].identifier, "tiger cat");
    }

    #[test]
    fn records_sent_back_by_a_shell_are_accepted() {
        let json = r#"{
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "predictions": [{"identifier": "tabby cat", "confidence": 0.91}],
            "timestamp": "2025-03-08T10:15:00Z",
            "image_name": "Image 1"
        }"#;
        let record: ClassificationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.image_name, "Image 1");
        assert_eq!(record.predictions[0], Prediction::new("tabby cat", 0.91));
        assert_eq!(record.timestamp.format("%Y-%m-%d").to_string(), "2025-03-08");

        let back: ClassificationRecord =
            serde_json::from_value(serde_json::to_value(&record).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        let source = ImageSource::encoded(vec![0, 1, 2, 3], ImageOrigin::Camera);
        assert!(matches!(source.decode(), Err(AppError::ImageDecode(_))));
    }
}
