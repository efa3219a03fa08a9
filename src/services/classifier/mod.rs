pub mod inference;
pub mod model_manager;
pub mod scripted;

use crate::error::AppError;
use crate::models::classify_types::{ImageSource, Prediction};
use image::DynamicImage;

/// Maps a decoded image to labels ordered by descending confidence.
///
/// Implementations run on a blocking worker thread and must not keep the
/// image once they return.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<Vec<Prediction>, AppError>;

    fn classify_source(&self, source: &ImageSource) -> Result<Vec<Prediction>, AppError> {
        let image = source.decode()?;
        self.classify(&image)
    }
}

impl<F> ImageClassifier for F
where
    F: Fn(&DynamicImage) -> Result<Vec<Prediction>, AppError> + Send + Sync,
{
    fn classify(&self, image: &DynamicImage) -> Result<Vec<Prediction>, AppError> {
        self(image)
    }
}
