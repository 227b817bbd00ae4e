use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::error::ConfigError;
use crate::executor::CancelFlag;
use crate::pipeline::Pipeline;

type ActionFn = Box<dyn Fn(&CancelFlag) -> anyhow::Result<()> + Send + Sync>;

/// A named node in the task tree.
///
/// Leaves perform the actual work; Series and Parallel group children under
/// their ordering rules. Children are owned by exactly one parent, so the
/// tree cannot contain cycles by construction; [`TaskGraph::new`] validates
/// the properties ownership cannot enforce, duplicate names and malformed
/// glob patterns, once before any run starts.
pub struct Task {
    name: String,
    pub(crate) kind: TaskKind,
}

pub(crate) enum TaskKind {
    Leaf(Job),
    Series(Vec<Task>),
    Parallel(Vec<Task>),
}

pub(crate) enum Job {
    /// One transform pipeline invocation: inputs matched by the globs at call
    /// time, outputs written under `dest` relative to `base`.
    Pipeline {
        base: Utf8PathBuf,
        globs: Vec<String>,
        dest: Utf8PathBuf,
        pipeline: Pipeline,
    },
    /// An opaque unit of work (clean, deploy). Runs as a whole; long-running
    /// actions should poll the cancel flag.
    Action(ActionFn),
}

impl Task {
    /// Leaf task running a transform pipeline against glob-matched files.
    pub fn pipeline(
        name: impl Into<String>,
        base: impl Into<Utf8PathBuf>,
        globs: Vec<String>,
        dest: impl Into<Utf8PathBuf>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Leaf(Job::Pipeline {
                base: base.into(),
                globs,
                dest: dest.into(),
                pipeline,
            }),
        }
    }

    /// Opaque leaf task, used for clean and deploy style work.
    pub fn action<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CancelFlag) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: TaskKind::Leaf(Job::Action(Box::new(func))),
        }
    }

    /// Ordered, fail-fast group: a failing child skips the rest.
    pub fn series(name: impl Into<String>, children: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Series(children),
        }
    }

    /// Concurrent, error-collecting group: every child runs to completion.
    pub fn parallel(name: impl Into<String>, children: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Parallel(children),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Depth-first lookup of a named subtree, used by the reactor to re-run
    /// only the tasks a watch binding points at.
    pub fn find(&self, name: &str) -> Option<&Task> {
        if self.name == name {
            return Some(self);
        }

        match &self.kind {
            TaskKind::Leaf(_) => None,
            TaskKind::Series(children) | TaskKind::Parallel(children) => {
                children.iter().find_map(|child| child.find(name))
            }
        }
    }

    /// Every task name in this subtree, in declaration order.
    pub(crate) fn names(&self) -> Vec<&str> {
        let mut acc = vec![self.name.as_str()];

        if let TaskKind::Series(children) | TaskKind::Parallel(children) = &self.kind {
            for child in children {
                acc.extend(child.names());
            }
        }

        acc
    }

    pub(crate) fn set_strict_all(&mut self, strict: bool) {
        match &mut self.kind {
            TaskKind::Leaf(Job::Pipeline { pipeline, .. }) => pipeline.set_strict(strict),
            TaskKind::Leaf(Job::Action(_)) => {}
            TaskKind::Series(children) | TaskKind::Parallel(children) => {
                for child in children {
                    child.set_strict_all(strict);
                }
            }
        }
    }

    fn validate(&self, seen: &mut HashSet<String>) -> Result<(), ConfigError> {
        if !seen.insert(self.name.clone()) {
            return Err(ConfigError::DuplicateTask(self.name.clone()));
        }

        match &self.kind {
            TaskKind::Leaf(Job::Pipeline { base, globs, .. }) => {
                for pattern in globs {
                    Pattern::new(&Utf8Path::new(base).join(pattern).into_string())?;
                }
            }
            TaskKind::Leaf(Job::Action(_)) => {}
            TaskKind::Series(children) | TaskKind::Parallel(children) => {
                for child in children {
                    child.validate(seen)?;
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TaskKind::Leaf(_) => write!(f, "Leaf({})", self.name),
            TaskKind::Series(c) => write!(f, "Series({}, {} children)", self.name, c.len()),
            TaskKind::Parallel(c) => write!(f, "Parallel({}, {} children)", self.name, c.len()),
        }
    }
}

/// The validated forest of entry-point tasks a site exposes (dev, build,
/// clean and friends). Construction is the single place ConfigErrors are
/// raised; a graph that exists may be executed.
pub struct TaskGraph {
    entries: Vec<Task>,
}

impl TaskGraph {
    pub fn new(entries: Vec<Task>) -> Result<Self, ConfigError> {
        let mut roots = HashSet::new();

        for entry in &entries {
            if !roots.insert(entry.name.clone()) {
                return Err(ConfigError::DuplicateTask(entry.name.clone()));
            }

            // Names must be unique within one entry tree; a subtree may be
            // shared across entries (clean under both clean-all and build).
            entry.validate(&mut HashSet::new())?;
        }

        Ok(Self { entries })
    }

    /// Entry point by root name.
    pub fn get(&self, name: &str) -> Result<&Task, ConfigError> {
        self.entries
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))
    }

    /// Any task in any entry tree, searched depth-first.
    pub(crate) fn find(&self, name: &str) -> Option<&Task> {
        self.entries.iter().find_map(|entry| entry.find(name))
    }
}
