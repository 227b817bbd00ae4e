#![forbid(unsafe_code)]
//! Task orchestration for static web asset pipelines.
//!
//! A site is a forest of named tasks: leaves run a [`Pipeline`] of
//! [`Transformer`] stages against glob-matched files (or an opaque action
//! such as clean or deploy), Series groups run in order failing fast, and
//! Parallel groups fan out over a worker pool collecting every failure.
//! Expensive transforms go through the [`ContentCache`], which skips
//! recomputation for unchanged inputs and parameters.
//!
//! In build mode the selected entry task runs once and the result maps to a
//! process exit status. In watch mode (`live` feature) the entry stays
//! resident: a debounced file watcher maps changed paths through
//! [`WatchBinding`]s to the affected subtrees only, and every successful
//! rebuild is pushed to connected browsers as a full reload or an in-place
//! style injection.

mod cache;
mod config;
mod error;
mod executor;
mod hash;
#[cfg(feature = "live")]
mod live;
#[cfg(feature = "logging")]
pub mod logging;
mod pipeline;
mod record;
#[cfg(feature = "server")]
mod server;
mod task;
pub mod transform;
#[cfg(feature = "live")]
mod watch;

use std::fmt::Debug;

use console::style;

pub use crate::cache::{CacheStats, Cached, ContentCache};
pub use crate::config::{OverlapPolicy, SiteConfig};
pub use crate::error::*;
pub use crate::executor::{CancelFlag, Executor, RunResult};
pub use crate::hash::Hash32;
#[cfg(feature = "live")]
pub use crate::live::{Notifier, Observer, ReloadEvent};
pub use crate::pipeline::{Pipeline, PipelineReport};
pub use crate::record::FileRecord;
pub use crate::task::{Task, TaskGraph};
pub use crate::transform::{FnTransform, RenameSuffix, RenameTo, Transformer};
#[cfg(feature = "live")]
pub use crate::watch::{BindingKind, WatchBinding};

/// Whether the library runs the selected entry once (`Build`) or keeps it
/// resident behind the file watcher with live reload (`Watch`).
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Build,
    Watch,
}

fn banner(mode: Mode) {
    let mode = match mode {
        Mode::Build => style("build").blue(),
        Mode::Watch => style("watch").blue(),
    };

    eprintln!("Running {} in {} mode.", style("sitepipe").red(), mode);
}

/// A validated site: the task graph, its executor, and (in watch mode) the
/// binding table and reload notifier. Built through [`Site::builder`]; every
/// ConfigError is raised there, never at run time.
pub struct Site {
    config: SiteConfig,
    graph: TaskGraph,
    executor: Executor,
    #[cfg(feature = "live")]
    bindings: Vec<watch::CompiledBinding>,
    #[cfg(feature = "live")]
    notifier: Notifier,
}

impl Site {
    pub fn builder(config: SiteConfig) -> SiteBuilder {
        SiteBuilder {
            config,
            tasks: Vec::new(),
            #[cfg(feature = "live")]
            bindings: Vec::new(),
        }
    }

    /// Runs a named entry task once. The returned [`RunResult`] carries every
    /// collected leaf error; [`RunResult::exit_code`] maps it to the process
    /// exit status contract.
    pub fn run(&self, entry: &str) -> Result<RunResult, SiteError> {
        banner(Mode::Build);

        let task = self.graph.get(entry)?;
        let result = self.executor.execute(task)?;

        for err in &result.errors {
            eprintln!("{err}");
        }

        Ok(result)
    }

    /// Runs the entry once, then keeps it resident: watches the source tree,
    /// re-executes only the subtrees bound to each change, and pushes reload
    /// events to connected clients. Does not return until the watcher channel
    /// closes. A failed rebuild keeps the session alive and the previous good
    /// output on disk.
    #[cfg(feature = "live")]
    pub fn dev(&self, entry: &str) -> Result<(), SiteError> {
        banner(Mode::Watch);

        let task = self.graph.get(entry)?;

        let (tcp, port) = live::reserve_port().map_err(SiteError::Watch)?;
        eprintln!("Live reload websocket on port {port}");
        let _accept = live::accept_websockets(tcp, self.notifier.clone());

        let initial = self.executor.execute(task)?;
        for err in &initial.errors {
            eprintln!("{err}");
        }

        #[cfg(feature = "server")]
        let _http = server::start(self.config.dest.clone(), self.config.port);

        watch::watch(
            task,
            &self.bindings,
            &self.executor,
            &self.notifier,
            &self.config,
        )?;

        Ok(())
    }

    #[cfg(feature = "live")]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

impl Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Site({}, {})", self.config.source, self.config.dest)
    }
}

/// Builder collecting entry tasks and watch bindings before the one
/// validation pass in [`SiteBuilder::finish`].
pub struct SiteBuilder {
    config: SiteConfig,
    tasks: Vec<Task>,
    #[cfg(feature = "live")]
    bindings: Vec<WatchBinding>,
}

impl SiteBuilder {
    /// Registers a named entry task (dev, build, clean, images, deploy and
    /// whatever else the caller exposes).
    pub fn add_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    #[cfg(feature = "live")]
    pub fn bind(mut self, binding: WatchBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn finish(self) -> Result<Site, ConfigError> {
        self.config.validate()?;

        let mut tasks = self.tasks;
        if self.config.strict {
            for task in &mut tasks {
                task.set_strict_all(true);
            }
        }

        let graph = TaskGraph::new(tasks)?;

        #[cfg(feature = "live")]
        let bindings = watch::compile_bindings(self.bindings, &graph)?;

        Ok(Site {
            config: self.config,
            graph,
            executor: Executor::new(),
            #[cfg(feature = "live")]
            bindings,
            #[cfg(feature = "live")]
            notifier: Notifier::new(),
        })
    }
}
