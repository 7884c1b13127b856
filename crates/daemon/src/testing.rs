//! In-process stand-ins for yt-dlp used by the runner and HTTP tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::media::{
    artifact_extensions, Artifact, ExtractError, ExtractRequest, Extractor, MediaMetadata,
    ProgressSink,
};

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Vec<u8>),
    Fail(String),
    EmptyFile,
    Panic,
}

pub struct MockExtractor {
    pub work_dir: PathBuf,
    pub behavior: Behavior,
    /// Sleep between progress steps; lets tests interleave jobs.
    pub step_delay: Duration,
    /// When set, extraction parks after the first progress event until notified.
    pub gate: Option<Arc<Notify>>,
    pub extract_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new(work_dir: impl Into<PathBuf>, behavior: Behavior) -> Self {
        MockExtractor {
            work_dir: work_dir.into(),
            behavior,
            step_delay: Duration::ZERO,
            gate: None,
            extract_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    async fn pause(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        request: ExtractRequest,
        progress: ProgressSink,
    ) -> Result<Artifact, ExtractError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);

        progress.downloading("10.0%");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.pause().await;
        progress.downloading("55.5%");
        self.pause().await;
        progress.processing();
        self.pause().await;

        let ext = artifact_extensions(request.kind)[0];
        let path = self.work_dir.join(format!("{}.{ext}", request.job_id));
        match &self.behavior {
            Behavior::Succeed(bytes) => {
                tokio::fs::write(&path, bytes).await?;
                Ok(Artifact {
                    path,
                    size: bytes.len() as u64,
                })
            }
            Behavior::Fail(msg) => Err(ExtractError::Unreachable(msg.clone())),
            Behavior::EmptyFile => Err(ExtractError::EmptyArtifact),
            Behavior::Panic => panic!("collaborator blew up"),
        }
    }

    async fn metadata(&self, url: &str) -> Result<MediaMetadata, ExtractError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("private") {
            return Err(ExtractError::Unreachable(
                "Video unavailable. This video is private".to_string(),
            ));
        }
        Ok(MediaMetadata {
            title: Some("Test Clip".to_string()),
            thumbnail: Some("https://img.example.com/clip.jpg".to_string()),
            uploader: Some("Uploader".to_string()),
            duration: Some(212.0),
            view_count: Some(1_000),
            like_count: Some(10),
            description: Some("A clip".to_string()),
        })
    }
}
