use std::time::Duration;
use thiserror::Error;

/// Failures reported by a container engine, classified so callers can react
/// to the ones that matter (a missing image, an already removed container).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container name already in use: {0}")]
    NameConflict(String),

    #[error("container engine unreachable: {0}")]
    Unreachable(String),

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Misuse of an entity's lifecycle, or a readiness wait that gave up.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{entity} has no container id, create it first")]
    NotCreated { entity: String },

    #[error("{entity} already owns container {id}")]
    AlreadyCreated { entity: String, id: String },

    #[error("{entity} has not been started")]
    NotStarted { entity: String },

    #[error("{target} not ready after {attempts} attempt(s) in {elapsed:?}")]
    Timeout {
        target: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("readiness wait for {target} cancelled after {attempts} attempt(s)")]
    Cancelled { target: String, attempts: u32 },
}

/// Errors raised while reading a declarative container document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed JSON container document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML container document: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("container document has no Config.Image")]
    MissingImage,

    #[error("reading container document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
