use crate::error::AppError;
use crate::models::classify_types::Prediction;
use crate::services::classifier::ImageClassifier;
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub result: Result<Vec<Prediction>, AppError>,
    pub delay: Duration,
}

/// Deterministic gateway that replays queued outcomes in call order.
///
/// When the queue runs dry it answers with the fallback outcome. Delays are
/// slept on the calling worker thread, which lets tests control which of two
/// overlapping calls resolves first.
pub struct ScriptedClassifier {
    queue: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ScriptedOutcome,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: ScriptedOutcome {
                result: Ok(vec![Prediction::new("unknown", 1.0)]),
                delay: Duration::ZERO,
            },
        }
    }

    pub fn with_fallback(mut self, result: Result<Vec<Prediction>, AppError>) -> Self {
        self.fallback = ScriptedOutcome {
            result,
            delay: Duration::ZERO,
        };
        self
    }

    pub fn push(&self, result: Result<Vec<Prediction>, AppError>) -> &Self {
        self.push_delayed(result, Duration::ZERO)
    }

    pub fn push_delayed(&self, result: Result<Vec<Prediction>, AppError>, delay: Duration) -> &Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ScriptedOutcome { result, delay });
        }
        self
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for ScriptedClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageClassifier for ScriptedClassifier {
    fn classify(&self, _image: &DynamicImage) -> Result<Vec<Prediction>, AppError> {
        let outcome = self
            .queue
            .lock()
            .map_err(|_| AppError::Inference("scripted queue poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !outcome.delay.is_zero() {
            std::thread::sleep(outcome.delay);
        }
        outcome.result
    }
}
