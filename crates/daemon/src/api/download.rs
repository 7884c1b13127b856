use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Form, Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use registry::{Job, JobId, JobRegistry, JobStatus, Kind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::error::ApiError;
use crate::jobs::JobRunner;
use crate::media::cleanup::remove_path;

#[derive(Deserialize, Debug, Default)]
pub struct DownloadForm {
    url: Option<String>,
    kind: Option<String>,
}

#[derive(Serialize)]
pub struct StartResponse {
    job_id: String,
    status: String,
}

#[derive(Serialize)]
pub struct JobResponse {
    job_id: String,
    kind: String,
    status: String,
    progress: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        JobResponse {
            job_id: job.id.to_string(),
            kind: job.kind.to_string(),
            status: job.status().to_string(),
            progress: job.progress.clone(),
            file_name: job.artifact_path().and_then(|p| file_name_of(p)),
            error: job.error_detail().map(str::to_string),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

pub fn router(runner: Arc<JobRunner>) -> Router {
    Router::new()
        .route("/download", post(start_download))
        .route("/status/:id", get(get_status))
        .route("/file/:id", get(get_file))
        .with_state(runner)
}

async fn start_download(
    State(runner): State<Arc<JobRunner>>,
    Form(form): Form<DownloadForm>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let url = form
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("url is required"))?;

    let kind = match form.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        Some(raw) => raw
            .parse::<Kind>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => Kind::Video,
    };

    let job = runner.start(kind, url)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            job_id: job.id.to_string(),
            status: job.status().to_string(),
        }),
    ))
}

async fn get_status(
    State(runner): State<Arc<JobRunner>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = runner
        .registry()
        .get(&id)
        .ok_or_else(|| job_not_found(&id))?;
    Ok(Json(JobResponse::from(&job)))
}

/// Stream a finished artifact. The job is evicted and its file deleted only
/// once the whole body has been produced, so an interrupted download can be
/// retried.
async fn get_file(
    State(runner): State<Arc<JobRunner>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    let registry = Arc::clone(runner.registry());
    let job = registry.get(&id).ok_or_else(|| job_not_found(&id))?;

    let Some(path) = job.artifact_path().cloned() else {
        let detail = match job.status() {
            JobStatus::Error => format!("job {id} failed and has no file, see /status/{id}"),
            status => format!("job {id} is not ready (status: {status})"),
        };
        return Err(ApiError::not_found(detail));
    };

    // A concurrent fetch may have delivered and deleted it since the lookup.
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| job_not_found(&id))?;

    let file_name = file_name_of(&path).unwrap_or_else(|| id.to_string());
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    let finalize = stream::once(finish_delivery(registry, id, path))
        .filter_map(|()| async { None::<Result<Bytes, std::io::Error>> });
    let body = Body::from_stream(ReaderStream::new(file).chain(finalize));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(body)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn finish_delivery(registry: Arc<JobRegistry>, id: JobId, path: PathBuf) {
    // Only the caller that actually evicts owns the deletion.
    if registry.evict(&id).is_some() {
        info!("Job {} delivered, removing {:?}", id, path);
        remove_path(&path).await;
    } else {
        debug!("Job {} was already delivered", id);
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse::<JobId>()
        .map_err(|_| ApiError::not_found(format!("job {raw} not found")))
}

fn job_not_found(id: &JobId) -> ApiError {
    ApiError::not_found(format!("job {id} not found"))
}

fn file_name_of(path: &std::path::Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}
