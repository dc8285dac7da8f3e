//! Error type for the audio front-end engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AfeError {
    /// The front-end model could not be created for the requested settings.
    #[error("failed to allocate front-end model: {0}")]
    AllocationFailed(String),

    #[error("audio processor is not initialized")]
    NotInitialized,

    #[error("processing task did not acknowledge pause within {0:?}")]
    PauseTimeout(std::time::Duration),

    /// A previous `stop()` timed out and the old task has not exited yet.
    #[error("processing task is still shutting down")]
    TaskBusy,

    #[error("reconfiguration requested from the processing task")]
    ReentrantReconfigure,

    #[error("invalid front-end configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn processing task: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AfeError>;
