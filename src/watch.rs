use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use camino::Utf8PathBuf;
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::config::{OverlapPolicy, SiteConfig};
use crate::error::{ConfigError, ExecError, WatchError};
use crate::executor::Executor;
use crate::live::{Notifier, ReloadEvent};
use crate::task::{Task, TaskGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Re-execute the bound task subtrees, then notify on success.
    Rebuild,
    /// No recompute; the changed paths themselves go to the notifier. Used
    /// for generated output the build already produced.
    ReloadOnly,
}

/// Glob pattern bound to the tasks a matching filesystem event retriggers.
pub struct WatchBinding {
    pub pattern: String,
    pub tasks: Vec<String>,
    pub kind: BindingKind,
}

impl WatchBinding {
    pub fn rebuild(pattern: impl Into<String>, tasks: impl IntoIterator<Item = String>) -> Self {
        Self {
            pattern: pattern.into(),
            tasks: tasks.into_iter().collect(),
            kind: BindingKind::Rebuild,
        }
    }

    pub fn reload(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            tasks: Vec::new(),
            kind: BindingKind::ReloadOnly,
        }
    }
}

pub(crate) struct CompiledBinding {
    pattern: Pattern,
    tasks: Vec<String>,
    kind: BindingKind,
}

/// Compiles the binding table once, rejecting malformed patterns and task
/// names nothing in the graph resolves to.
pub(crate) fn compile_bindings(
    bindings: Vec<WatchBinding>,
    graph: &TaskGraph,
) -> Result<Vec<CompiledBinding>, ConfigError> {
    bindings
        .into_iter()
        .map(|binding| {
            for task in &binding.tasks {
                if graph.find(task).is_none() {
                    return Err(ConfigError::UnresolvedBinding {
                        pattern: binding.pattern.clone(),
                        task: task.clone(),
                    });
                }
            }

            Ok(CompiledBinding {
                pattern: Pattern::new(&binding.pattern)?,
                tasks: binding.tasks,
                kind: binding.kind,
            })
        })
        .collect()
}

/// One debounced batch resolved against the binding table: the union of
/// bound task identities, plus the changed paths of reload-only bindings.
pub(crate) struct TriggerSet {
    pub tasks: BTreeSet<String>,
    pub reload: Vec<Utf8PathBuf>,
}

pub(crate) fn resolve_triggers(
    bindings: &[CompiledBinding],
    changed: &[Utf8PathBuf],
) -> TriggerSet {
    let mut tasks = BTreeSet::new();
    let mut reload = Vec::new();

    for path in changed {
        for binding in bindings {
            if !binding.pattern.matches(path.as_str()) {
                continue;
            }

            match binding.kind {
                BindingKind::Rebuild => {
                    tasks.extend(binding.tasks.iter().cloned());
                }
                BindingKind::ReloadOnly => {
                    if !reload.contains(path) {
                        reload.push(path.clone());
                    }
                }
            }
        }
    }

    TriggerSet { tasks, reload }
}

/// Keeps the entry subtree resident and re-executes only the tasks bound to
/// each coalesced batch of filesystem events. A failed rebuild is reported
/// and the loop keeps watching with the previous good output on disk.
pub(crate) fn watch(
    entry: &Task,
    bindings: &[CompiledBinding],
    executor: &Executor,
    notifier: &Notifier,
    config: &SiteConfig,
) -> Result<(), WatchError> {
    let root = std::env::current_dir()?;

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(config.debounce(), None, tx)?;

    debouncer.watch(config.source.as_std_path(), RecursiveMode::Recursive)?;
    if config.dest.is_dir() {
        // Output-side events only ever feed reload-only bindings.
        debouncer.watch(config.dest.as_std_path(), RecursiveMode::Recursive)?;
    }

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changed = changed_paths(&root, &events);
                if changed.is_empty() {
                    continue;
                }

                let triggers = resolve_triggers(bindings, &changed);
                react(entry, &triggers, executor, notifier, config);
            }
            Ok(Err(errors)) => {
                // Transient observation failures do not end the dev session.
                for e in errors {
                    tracing::warn!("watch error: {e}");
                }
            }
            Err(_) => break,
        }
    }

    Ok(())
}

fn react(
    entry: &Task,
    triggers: &TriggerSet,
    executor: &Executor,
    notifier: &Notifier,
    config: &SiteConfig,
) {
    for name in &triggers.tasks {
        let Some(task) = entry.find(name) else {
            tracing::debug!(task = %name, "bound task not in the resident tree, skipping");
            continue;
        };

        let s = Instant::now();
        let supersede = config.overlap == OverlapPolicy::Supersede;

        match executor.execute_with(task, supersede) {
            Ok(result) if result.is_success() => {
                eprintln!("Rebuilt '{}' in {:.2?}", name, s.elapsed());
                notifier.notify(&ReloadEvent::for_outputs(result.outputs));
            }
            Ok(result) => {
                for err in &result.errors {
                    eprintln!("{err}");
                }
                eprintln!("Rebuild of '{}' failed, keeping previous output", name);
            }
            Err(ExecError::Busy(task)) => {
                tracing::debug!(%task, policy = ?config.overlap, "subtree busy, trigger dropped");
            }
        }
    }

    if !triggers.reload.is_empty() {
        notifier.notify(&ReloadEvent::for_outputs(triggers.reload.clone()));
    }
}

fn changed_paths(
    root: &PathBuf,
    events: &[notify_debouncer_full::DebouncedEvent],
) -> Vec<Utf8PathBuf> {
    let mut changed = Vec::new();

    for de in events {
        if !matches!(
            de.event.kind,
            EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
        ) {
            continue;
        }

        for path in &de.event.paths {
            let path = path.strip_prefix(root).unwrap_or(path);
            match Utf8PathBuf::try_from(path.to_path_buf()) {
                Ok(path) => {
                    if !changed.contains(&path) {
                        changed.push(path);
                    }
                }
                Err(e) => tracing::warn!("non UTF-8 path in watch event: {e}"),
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskGraph;

    fn bindings() -> Vec<CompiledBinding> {
        let graph = graph();
        compile_bindings(
            vec![
                WatchBinding::rebuild("assets/sass/*.scss", ["styles".to_string()]),
                WatchBinding::rebuild("assets/js/*.js", ["scripts".to_string()]),
                WatchBinding::reload("dist/*.html"),
            ],
            &graph,
        )
        .unwrap()
    }

    fn graph() -> TaskGraph {
        TaskGraph::new(vec![Task::series(
            "dev",
            vec![
                Task::action("styles", |_| Ok(())),
                Task::action("scripts", |_| Ok(())),
            ],
        )])
        .unwrap()
    }

    #[test]
    fn style_change_triggers_styles_and_never_scripts() {
        let triggers = resolve_triggers(&bindings(), &["assets/sass/x.scss".into()]);

        assert!(triggers.tasks.contains("styles"));
        assert!(!triggers.tasks.contains("scripts"));
        assert!(triggers.reload.is_empty());
    }

    #[test]
    fn a_batch_of_events_coalesces_into_one_trigger_per_task() {
        // Editor save-storm: many raw events within one debounce window.
        let changed: Vec<Utf8PathBuf> = vec![
            "assets/sass/a.scss".into(),
            "assets/sass/a.scss".into(),
            "assets/sass/b.scss".into(),
            "assets/js/main.js".into(),
        ];

        let triggers = resolve_triggers(&bindings(), &changed);

        assert_eq!(
            triggers.tasks.iter().collect::<Vec<_>>(),
            ["scripts", "styles"]
        );
    }

    #[test]
    fn output_paths_hit_reload_only_bindings() {
        let triggers = resolve_triggers(&bindings(), &["dist/index.html".into()]);

        assert!(triggers.tasks.is_empty());
        assert_eq!(triggers.reload, vec![Utf8PathBuf::from("dist/index.html")]);
    }

    #[test]
    fn unmatched_paths_trigger_nothing() {
        let triggers = resolve_triggers(&bindings(), &["README.md".into()]);

        assert!(triggers.tasks.is_empty());
        assert!(triggers.reload.is_empty());
    }

    #[test]
    fn binding_to_an_unknown_task_is_a_config_error() {
        let result = compile_bindings(
            vec![WatchBinding::rebuild("*.scss", ["missing".to_string()])],
            &graph(),
        );

        assert!(matches!(
            result,
            Err(ConfigError::UnresolvedBinding { .. })
        ));
    }
}
