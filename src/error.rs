use serde::Serialize;
use thiserror::Error;

/// Every failure a classification attempt can surface.
///
/// Serialized as `{ "kind": ..., "message": ... }` so a UI shell can show it
/// without knowing the Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum AppError {
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(String),

    #[error("classification session has shut down")]
    SessionClosed,
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::ImageDecode(err.to_string())
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::Inference(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_kind_and_message() {
        let err = AppError::Inference("boom".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Inference");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn image_errors_map_to_decode_failures() {
        let err: AppError = image::load_from_memory(b"not an image").unwrap_err().into();
        assert!(matches!(err, AppError::ImageDecode(_)));
    }
}
