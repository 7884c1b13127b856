use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job handle. Backed by a random 128-bit UUID so ids stay unguessable
/// and collision-free without any coordination between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Artifact type requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Video,
    Audio,
    Thumbnail,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Video => "video",
            Kind::Audio => "audio",
            Kind::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kind {0:?}, expected one of: video, audio, thumbnail")]
pub struct ParseKindError(pub String);

impl FromStr for Kind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(Kind::Video),
            "audio" => Ok(Kind::Audio),
            "thumbnail" => Ok(Kind::Thumbnail),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Finished,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of a job. The artifact path only exists on `Finished`
/// and the error detail only on `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Downloading,
    Processing,
    Finished { artifact: PathBuf },
    Error { detail: String },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Downloading => JobStatus::Downloading,
            JobState::Processing => JobStatus::Processing,
            JobState::Finished { .. } => JobStatus::Finished,
            JobState::Error { .. } => JobStatus::Error,
        }
    }
}

/// A mutation requested by the task runner or the progress callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StartDownload,
    Progress(String),
    StartProcessing,
    Finish(PathBuf),
    Fail(String),
}

impl Transition {
    /// Status the job would be in after this transition.
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::StartDownload | Transition::Progress(_) => JobStatus::Downloading,
            Transition::StartProcessing => JobStatus::Processing,
            Transition::Finish(_) => JobStatus::Finished,
            Transition::Fail(_) => JobStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: Kind,
    pub source_url: String,
    pub state: JobState,
    pub progress: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: Kind, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            kind,
            source_url: source_url.into(),
            state: JobState::Queued,
            progress: "0%".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn artifact_path(&self) -> Option<&PathBuf> {
        match &self.state {
            JobState::Finished { artifact } => Some(artifact),
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.state {
            JobState::Error { detail } => Some(detail),
            _ => None,
        }
    }

    /// Apply a transition in place. Status only moves forward along
    /// queued -> downloading -> processing -> finished, with error reachable
    /// from any non-terminal state.
    pub fn apply(&mut self, transition: Transition) -> Result<(), (JobStatus, JobStatus)> {
        let from = self.status();
        let to = transition.target();
        let allowed = match (&self.state, &transition) {
            (JobState::Finished { .. } | JobState::Error { .. }, _) => false,
            (_, Transition::Fail(_)) => true,
            (JobState::Queued, Transition::StartDownload) => true,
            (JobState::Downloading, Transition::Progress(_)) => true,
            (JobState::Queued | JobState::Downloading, Transition::StartProcessing) => true,
            (
                JobState::Queued | JobState::Downloading | JobState::Processing,
                Transition::Finish(_),
            ) => true,
            _ => false,
        };
        if !allowed {
            return Err((from, to));
        }

        match transition {
            Transition::StartDownload => self.state = JobState::Downloading,
            Transition::Progress(pct) => self.progress = pct,
            Transition::StartProcessing => self.state = JobState::Processing,
            Transition::Finish(artifact) => {
                self.progress = "100%".to_string();
                self.state = JobState::Finished { artifact };
            }
            Transition::Fail(detail) => self.state = JobState::Error { detail },
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
