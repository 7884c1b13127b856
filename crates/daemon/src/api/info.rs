use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::media::{Extractor, MediaMetadata};

#[derive(Deserialize)]
pub struct InfoQuery {
    url: Option<String>,
}

pub fn router(extractor: Arc<dyn Extractor>) -> Router {
    Router::new()
        .route("/info", get(video_info))
        .route("/video-info", get(video_info))
        .with_state(extractor)
}

/// Metadata lookup. Runs inline and never touches the job registry.
async fn video_info(
    State(extractor): State<Arc<dyn Extractor>>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<MediaMetadata>, ApiError> {
    let url = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("url is required"))?;

    let metadata = extractor.metadata(url).await?;
    Ok(Json(metadata))
}
