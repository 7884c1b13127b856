use registry::{Job, JobId, JobRegistry, Kind, RegistryError, Transition};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::StartError;
use crate::media::cleanup::remove_path;
use crate::media::{ExtractRequest, Extractor, ProgressEvent, ProgressSink};

/// Starts one background extraction per accepted request and feeds its
/// progress and outcome into the registry.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    extractor: Arc<dyn Extractor>,
    max_active_jobs: Option<usize>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, extractor: Arc<dyn Extractor>) -> Self {
        JobRunner {
            registry,
            extractor,
            max_active_jobs: None,
        }
    }

    pub fn with_max_active_jobs(mut self, limit: Option<usize>) -> Self {
        self.max_active_jobs = limit;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a job and spawn its extraction. Returns the queued snapshot
    /// without waiting on any of the work.
    pub fn start(&self, kind: Kind, url: impl Into<String>) -> Result<Job, StartError> {
        let url = url.into();
        let job = match self.max_active_jobs {
            Some(limit) => self
                .registry
                .create_bounded(kind, url.clone(), limit)
                .map_err(|_| StartError::AtCapacity { limit })?,
            None => self.registry.create(kind, url.clone()),
        };
        info!("Job {} queued: {} {}", job.id, kind, url);

        let request = ExtractRequest {
            job_id: job.id,
            url,
            kind,
        };
        tokio::spawn(run_job(
            Arc::clone(&self.registry),
            Arc::clone(&self.extractor),
            request,
        ));

        Ok(job)
    }
}

async fn run_job(registry: Arc<JobRegistry>, extractor: Arc<dyn Extractor>, request: ExtractRequest) {
    let id = request.job_id;
    if let Err(e) = registry.update(&id, Transition::StartDownload) {
        warn!("Job {} could not start: {}", id, e);
        return;
    }

    let (sink, mut events) = ProgressSink::channel();
    // Own task, so a panic inside the collaborator becomes a JoinError here.
    let extraction = tokio::spawn(async move { extractor.extract(request, sink).await });

    // Ends once the extraction has dropped its sink.
    while let Some(event) = events.recv().await {
        let transition = match event {
            ProgressEvent::Downloading(pct) => Transition::Progress(pct),
            ProgressEvent::Processing => {
                info!("Job {} postprocessing", id);
                Transition::StartProcessing
            }
        };
        if let Err(e) = registry.update(&id, transition) {
            debug!("Ignoring progress for job {}: {}", id, e);
        }
    }

    let outcome = match extraction.await {
        Ok(Ok(artifact)) => Ok(artifact),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("extraction task aborted: {e}")),
    };

    match outcome {
        Ok(artifact) => {
            let path = artifact.path.clone();
            match registry.update(&id, Transition::Finish(artifact.path)) {
                Ok(_) => info!("Job {} finished: {:?} ({} bytes)", id, path, artifact.size),
                Err(e) => {
                    warn!("Job {} produced {:?} but could not be finished: {}", id, path, e);
                    remove_path(&path).await;
                }
            }
        }
        Err(detail) => {
            warn!("Job {} failed: {}", id, detail);
            publish_failure(&registry, &id, detail);
        }
    }
}

fn publish_failure(registry: &JobRegistry, id: &JobId, detail: String) {
    match registry.update(id, Transition::Fail(detail)) {
        Ok(_) | Err(RegistryError::NotFound(_)) => {}
        Err(e) => warn!("Job {} failure not recorded: {}", id, e),
    }
}
