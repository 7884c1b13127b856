use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::job::{Job, JobId, JobStatus, Kind, Transition};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("too many active jobs (limit {limit})")]
    AtCapacity { limit: usize },
}

/// In-memory table of extraction jobs.
///
/// Every operation takes the same lock for the whole critical section and
/// does nothing but map work while holding it. Callers get owned snapshots,
/// never references into the map.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    // The map only holds plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a queued job and return its snapshot.
    pub fn create(&self, kind: Kind, source_url: impl Into<String>) -> Job {
        let mut jobs = self.lock();
        insert_fresh(&mut jobs, kind, source_url.into())
    }

    /// Like [`create`](Self::create), but refuses when `limit` jobs are
    /// already queued or running. The count and the insert share one lock.
    pub fn create_bounded(
        &self,
        kind: Kind,
        source_url: impl Into<String>,
        limit: usize,
    ) -> Result<Job, RegistryError> {
        let mut jobs = self.lock();
        let active = jobs.values().filter(|j| !j.status().is_terminal()).count();
        if active >= limit {
            return Err(RegistryError::AtCapacity { limit });
        }
        Ok(insert_fresh(&mut jobs, kind, source_url.into()))
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    pub fn update(&self, id: &JobId, transition: Transition) -> Result<Job, RegistryError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        job.apply(transition)
            .map_err(|(from, to)| RegistryError::InvalidTransition { id: *id, from, to })?;
        Ok(job.clone())
    }

    /// Remove a job. Only one of several concurrent callers gets `Some`.
    pub fn evict(&self, id: &JobId) -> Option<Job> {
        self.lock().remove(id)
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|j| !j.status().is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn insert_fresh(jobs: &mut HashMap<JobId, Job>, kind: Kind, source_url: String) -> Job {
    let mut job = Job::new(kind, source_url);
    // A v4 collision is not going to happen, but the map must never hold two
    // records under one id, so re-roll instead of overwriting.
    while jobs.contains_key(&job.id) {
        job.id = JobId::new();
    }
    jobs.insert(job.id, job.clone());
    job
}
