use thiserror::Error;

/// Startup failures. Everything after a successful start is absorbed inside
/// the pipeline and logged.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[error("label list is empty")]
    EmptyLabels,
    #[error("classifier outputs {classes} classes but {labels} labels were supplied")]
    ClassCountMismatch { labels: usize, classes: usize },
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}
