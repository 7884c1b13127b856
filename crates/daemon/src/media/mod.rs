pub mod cleanup;
pub mod options;
pub mod progress;
pub mod ytdlp;

use async_trait::async_trait;
use registry::{JobId, Kind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use progress::{ProgressEvent, ProgressSink};

/// What the runner asks the collaborator to produce for one job.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub job_id: JobId,
    pub url: String,
    pub kind: Kind,
}

/// A fully written, closed file in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("source unreachable or rejected: {0}")]
    Unreachable(String),
    #[error("requested format is not available: {0}")]
    FormatUnavailable(String),
    #[error("postprocessing failed: {0}")]
    Postprocess(String),
    #[error("no {kind} file was produced for this source")]
    ArtifactMissing { kind: Kind },
    #[error("extraction produced an empty file")]
    EmptyArtifact,
    #[error("could not write cookie file: {0}")]
    Cookies(#[source] std::io::Error),
    #[error("could not run yt-dlp: {0}")]
    Launch(#[source] std::io::Error),
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable metadata from yt-dlp: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

/// The external fetch/transcode collaborator.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Produce the artifact for `request`, reporting progress through `progress`.
    /// On success the returned file is complete and non-empty.
    async fn extract(
        &self,
        request: ExtractRequest,
        progress: ProgressSink,
    ) -> Result<Artifact, ExtractError>;

    /// Descriptive fields only; nothing is written to disk.
    async fn metadata(&self, url: &str) -> Result<MediaMetadata, ExtractError>;
}

/// File extensions an artifact of `kind` may end up with, most likely first.
pub fn artifact_extensions(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::Video => &["mp4", "mkv", "webm"],
        Kind::Audio => &["mp3", "m4a", "opus"],
        Kind::Thumbnail => &["jpg", "jpeg", "png", "webp"],
    }
}
