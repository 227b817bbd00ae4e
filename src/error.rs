#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Top-level error for the library entry points.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal at graph-construction time; no run may start once reported.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Duplicate task name '{0}'")]
    DuplicateTask(String),

    #[error("No task named '{0}'")]
    UnknownTask(String),

    #[error("Watch binding '{pattern}' refers to unknown task '{task}'")]
    UnresolvedBinding { pattern: String, task: String },

    #[error("Source and destination roots must differ")]
    OverlappingRoots,

    #[error("Debounce interval must be greater than zero")]
    ZeroDebounce,
}

/// A stage failure on one file record. Collected per file; it aborts the
/// batch only when the pipeline is strict.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed on '{path}':\n{source}")]
pub struct TransformError {
    pub path: Utf8PathBuf,
    pub stage: String,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Strict pipeline aborted.\n{0}")]
    Strict(TransformError),
}

/// A single leaf task failure, aggregated into the run result in order.
#[derive(Debug, Error)]
#[error("Task '{task}':\n{source}")]
pub struct LeafError {
    pub task: String,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// The subtree is already running and the caller did not request
    /// supersession. The caller decides whether to retry, queue, or drop.
    #[error("Task '{0}' is already running")]
    Busy(String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("Couldn't reserve a websocket port.\n{0}")]
    Bind(std::io::Error),
}
