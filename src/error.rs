//! Crate-wide error taxonomy: `TransientExternal`, `ShapeError`,
//! `Config`, `WorkerExit`, `Deadline`, `Internal`. Library functions
//! return `Result<T, CoreError>`; callers that aggregate several subsystems
//! are free to widen to `anyhow::Result` at the boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A remote call (HTTP, registry, child process I/O) failed transiently.
    #[error("transient external failure in {context}: {message}")]
    TransientExternal {
        context: String,
        message: String,
    },

    /// A response decoded but did not have the expected shape.
    #[error("unexpected shape from {context}: {message}")]
    ShapeError { context: String, message: String },

    /// Caller-facing misconfiguration: unknown bot, bad mode name, bad
    /// category. Never retried.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A supervised child process exited unexpectedly.
    #[error("worker {bot_id} exited unexpectedly: {detail}")]
    WorkerExit { bot_id: String, detail: String },

    /// A task missed its deadline. Fatal to the task, not the orchestrator.
    #[error("task {task_id} passed its deadline")]
    Deadline { task_id: String },

    /// An invariant the code assumed should never be violated.
    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn transient(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientExternal {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn shape(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShapeError {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn worker_exit(bot_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::WorkerExit {
            bot_id: bot_id.into(),
            detail: detail.into(),
        }
    }

    pub fn deadline(task_id: impl Into<String>) -> Self {
        Self::Deadline {
            task_id: task_id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Category label for log/metric tagging.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::TransientExternal { .. } => "transient_external",
            CoreError::ShapeError { .. } => "shape",
            CoreError::Config { .. } => "config",
            CoreError::WorkerExit { .. } => "worker_exit",
            CoreError::Deadline { .. } => "deadline",
            CoreError::Internal { .. } => "internal",
        }
    }

    /// Whether upstream policy is to retry/fall back rather than surface.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientExternal { .. } | CoreError::ShapeError { .. }
        )
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::transient("http", err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::shape("json", err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::TransientExternal {
            context: "io".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_kinds() {
        assert_eq!(CoreError::transient("x", "y").category(), "transient_external");
        assert_eq!(CoreError::config("bad").category(), "config");
        assert!(CoreError::transient("x", "y").is_retryable());
        assert!(!CoreError::config("bad").is_retryable());
    }
}
