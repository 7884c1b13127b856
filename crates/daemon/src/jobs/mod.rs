pub mod runner;

pub use runner::JobRunner;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("server is busy, {limit} jobs are already in progress")]
    AtCapacity { limit: usize },
}
