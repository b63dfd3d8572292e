use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("API fetch failed after {attempts} attempts: {cause}")]
    FetchExhausted { attempts: u32, cause: String },
    /// Live fetch was exhausted but the raw cache stood in for it.
    #[error("using cached raw series ({cause})")]
    FetchDegraded { cause: String },
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("insufficient data: {usable} usable row(s), need at least 2")]
    InsufficientData { usable: usize },
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("verify failed: {0}")]
    VerifyFailed(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("artifact {path}: {message}")]
    Artifact { path: String, message: String },
}

impl PipelineError {
    /// Fatal kinds abort the run; the rest are surfaced as warnings.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::FetchDegraded { .. } | PipelineError::VerifyFailed(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::FetchExhausted { .. } => "fetch_exhausted",
            PipelineError::FetchDegraded { .. } => "fetch_degraded",
            PipelineError::StorageFailure(_) => "storage_failure",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::PublishFailed(_) => "publish_failed",
            PipelineError::VerifyFailed(_) => "verify_failed",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::Artifact { .. } => "artifact",
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::StorageFailure(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
