use crate::error::AppError;
use crate::models::classify_types::{
    ClassificationRecord, HistoryRow, ImageOrigin, ImageSource, ModelStatus, SessionState,
};
use crate::services::classifier::model_manager::ModelManager;
use crate::services::history::filter_history;
use crate::services::session::{RequestId, SessionHandle, Ticket};
use std::path::PathBuf;
use std::sync::Arc;

pub fn get_model_status(model_manager: &ModelManager) -> ModelStatus {
    model_manager.status()
}

pub async fn select_image(session: &SessionHandle, source: ImageSource) -> Result<Ticket, AppError> {
    session.select_image(source).await
}

pub async fn select_image_file(
    session: &SessionHandle,
    path: impl Into<PathBuf>,
    origin: ImageOrigin,
) -> Result<Ticket, AppError> {
    session.select_image(ImageSource::file(path, origin)).await
}

pub async fn select_image_bytes(
    session: &SessionHandle,
    bytes: Vec<u8>,
    origin: ImageOrigin,
) -> Result<Ticket, AppError> {
    session.select_image(ImageSource::encoded(bytes, origin)).await
}

/// Submits an image and waits for its result.
pub async fn classify_image(
    session: &SessionHandle,
    source: ImageSource,
) -> Result<(RequestId, Arc<ClassificationRecord>), AppError> {
    let ticket = session.select_image(source).await?;
    let id = ticket.id;
    Ok((id, ticket.wait().await?))
}

pub fn get_session_state(session: &SessionHandle) -> SessionState {
    session.state()
}

pub fn search_history(session: &SessionHandle, query: &str) -> Vec<HistoryRow> {
    filter_history(&session.history(), query)
        .iter()
        .map(|record| HistoryRow::from(record.as_ref()))
        .collect()
}
