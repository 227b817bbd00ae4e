use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{ExecError, LeafError, PipelineError};
use crate::record::FileRecord;
use crate::task::{Job, Task, TaskKind};

/// Advisory cancellation flag. Leaf implementations cooperate by checking it
/// between file-level units of work; nothing preempts an in-flight transform.
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one execution of a task subtree. Owned by the executor invocation
/// that created it and discarded when the run completes.
pub struct RunContext {
    pub run_id: u64,
    pub cancel: CancelFlag,
    errors: Mutex<Vec<LeafError>>,
    outputs: Mutex<Vec<Utf8PathBuf>>,
}

impl RunContext {
    fn new(run_id: u64) -> Self {
        Self {
            run_id,
            cancel: CancelFlag::new(),
            errors: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    fn push_error(&self, task: &str, source: anyhow::Error) {
        self.errors.lock().unwrap().push(LeafError {
            task: task.to_string(),
            source,
        });
    }

    fn push_output(&self, path: Utf8PathBuf) {
        self.outputs.lock().unwrap().push(path);
    }
}

/// Aggregate outcome of one run. Success means the error list is empty.
pub struct RunResult {
    pub run_id: u64,
    /// Per-leaf errors in the order they were encountered.
    pub errors: Vec<LeafError>,
    /// Destination paths written by this run.
    pub outputs: Vec<Utf8PathBuf>,
    /// True when this run was superseded and aborted early. A superseded run
    /// may leave a partially updated output set; completed files stay valid.
    pub superseded: bool,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.superseded
    }

    /// Process exit status contract: zero on full success, nonzero if any
    /// fail-fast-reachable leaf failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Serializes writes to the same destination path, so two racing tasks never
/// interleave bytes of one file.
struct WriteLocks(Mutex<HashMap<Utf8PathBuf, Arc<Mutex<()>>>>);

impl WriteLocks {
    fn new() -> Self {
        Self(Mutex::new(HashMap::new()))
    }

    fn for_path(&self, path: &Utf8Path) -> Arc<Mutex<()>> {
        let mut locks = self.0.lock().unwrap();
        locks.entry(path.to_owned()).or_default().clone()
    }
}

/// Walks a task tree: leaves run their pipelines on the rayon pool, Series
/// children run in declared order failing fast, Parallel children fan out and
/// join regardless of individual failures.
pub struct Executor {
    active: Mutex<HashMap<String, Arc<RunContext>>>,
    write_locks: WriteLocks,
    next_run: AtomicU64,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            write_locks: WriteLocks::new(),
            next_run: AtomicU64::new(1),
        }
    }

    /// Runs a subtree once. Rejected with [`ExecError::Busy`] if any task in
    /// the subtree is already running under another context.
    pub fn execute(&self, task: &Task) -> Result<RunResult, ExecError> {
        self.execute_with(task, false)
    }

    /// Like [`Executor::execute`], but with supersession the stale runs'
    /// cancel flags are set before this run claims the subtree. The stale
    /// runs abort at their next cancellation check.
    pub fn execute_with(&self, task: &Task, supersede: bool) -> Result<RunResult, ExecError> {
        let ctx = Arc::new(RunContext::new(
            self.next_run.fetch_add(1, Ordering::Relaxed),
        ));
        let names = task.names();

        {
            let mut active = self.active.lock().unwrap();

            if let Some(&name) = names.iter().find(|&&n| active.contains_key(n)) {
                if !supersede {
                    return Err(ExecError::Busy(name.to_string()));
                }

                let stale: HashSet<_> = names
                    .iter()
                    .filter_map(|n| active.get(*n))
                    .map(|prev| prev.run_id)
                    .collect();
                tracing::debug!(?stale, "superseding active runs");

                for name in &names {
                    if let Some(prev) = active.get(*name) {
                        prev.cancel.set();
                    }
                }
            }

            for name in &names {
                active.insert(name.to_string(), ctx.clone());
            }
        }

        let s = Instant::now();
        self.run_node(task, &ctx);
        tracing::debug!(task = task.name(), elapsed = ?s.elapsed(), "run finished");

        {
            let mut active = self.active.lock().unwrap();
            active.retain(|_, c| !Arc::ptr_eq(c, &ctx));
        }

        Ok(RunResult {
            run_id: ctx.run_id,
            errors: std::mem::take(&mut ctx.errors.lock().unwrap()),
            outputs: std::mem::take(&mut ctx.outputs.lock().unwrap()),
            superseded: ctx.cancel.is_set(),
        })
    }

    fn run_node(&self, task: &Task, ctx: &RunContext) -> bool {
        match &task.kind {
            TaskKind::Leaf(job) => self.run_leaf(task.name(), job, ctx),
            TaskKind::Series(children) => {
                for child in children {
                    if ctx.cancel.is_set() {
                        return false;
                    }
                    if !self.run_node(child, ctx) {
                        // Fail fast, remaining children are skipped.
                        return false;
                    }
                }
                true
            }
            TaskKind::Parallel(children) => self.run_parallel(children, ctx),
        }
    }

    fn run_parallel(&self, children: &[Task], ctx: &RunContext) -> bool {
        let bar = ProgressBar::new(children.len() as u64).with_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Error setting progress bar template")
                .progress_chars("#>-"),
        );

        let active = Arc::new(Mutex::new(HashSet::new()));

        let results: Vec<bool> = children
            .par_iter()
            .map(|child| {
                let name = child.name().to_string();

                {
                    let mut active = active.lock().unwrap();
                    active.insert(name.clone());
                    bar.set_message(format_active(&active));
                }

                let ok = self.run_node(child, ctx);

                {
                    let mut active = active.lock().unwrap();
                    active.remove(&name);
                    bar.set_message(format_active(&active));
                    bar.inc(1);
                }

                ok
            })
            .collect();

        bar.finish_and_clear();

        results.into_iter().all(|ok| ok)
    }

    fn run_leaf(&self, name: &str, job: &Job, ctx: &RunContext) -> bool {
        match job {
            Job::Action(func) => match func(&ctx.cancel) {
                Ok(()) => true,
                Err(e) => {
                    ctx.push_error(name, e);
                    false
                }
            },
            Job::Pipeline {
                base,
                globs,
                dest,
                pipeline,
            } => {
                // Inputs are matched at call time, not graph construction.
                let records = match collect_records(base, globs) {
                    Ok(records) => records,
                    Err(e) => {
                        ctx.push_error(name, e);
                        return false;
                    }
                };

                let report = match pipeline.run(records, &ctx.cancel) {
                    Ok(report) => report,
                    Err(PipelineError::Strict(e)) => {
                        ctx.push_error(name, e.into());
                        return false;
                    }
                };

                let failed = !report.errors.is_empty();
                for err in report.errors {
                    ctx.push_error(name, err.into());
                }

                if report.cancelled {
                    return false;
                }

                for record in report.records {
                    if ctx.cancel.is_set() {
                        // Files already written stay in place.
                        return false;
                    }

                    let rel = record.path.strip_prefix(base).unwrap_or(&record.path);
                    let path = dest.join(rel);

                    if let Err(e) = self.write_output(&path, &record) {
                        ctx.push_error(name, e.into());
                        return false;
                    }

                    ctx.push_output(path);
                }

                !failed
            }
        }
    }

    fn write_output(&self, path: &Utf8Path, record: &FileRecord) -> std::io::Result<()> {
        let lock = self.write_locks.for_path(path);
        let _guard = lock.lock().unwrap();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(path, &record.content)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_records(base: &Utf8Path, globs: &[String]) -> anyhow::Result<Vec<FileRecord>> {
    let mut records = Vec::new();

    for pattern in globs {
        for entry in glob::glob(base.join(pattern).as_str())? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if path.is_dir() {
                continue;
            }
            records.push(FileRecord::read(&path)?);
        }
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

fn format_active(active: &HashSet<String>) -> String {
    const MAX: usize = 5;
    let mut names: Vec<_> = active.iter().cloned().collect();
    names.sort();

    if names.len() <= MAX {
        names.join(", ")
    } else {
        format!("{}… ({} total)", names[..MAX].join(", "), names.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn flag_action(name: &str, flag: Arc<AtomicBool>) -> Task {
        Task::action(name, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(name: &str) -> Task {
        Task::action(name, |_| anyhow::bail!("boom"))
    }

    #[test]
    fn series_fails_fast() {
        let a_ran = Arc::new(AtomicBool::new(false));
        let c_ran = Arc::new(AtomicBool::new(false));

        let task = Task::series(
            "root",
            vec![
                flag_action("a", a_ran.clone()),
                failing("b"),
                flag_action("c", c_ran.clone()),
            ],
        );

        let result = Executor::new().execute(&task).unwrap();

        assert!(a_ran.load(Ordering::SeqCst));
        assert!(!c_ran.load(Ordering::SeqCst));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].task, "b");
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn parallel_collects_errors_without_stopping_siblings() {
        let a_ran = Arc::new(AtomicBool::new(false));
        let c_ran = Arc::new(AtomicBool::new(false));

        let task = Task::parallel(
            "root",
            vec![
                flag_action("a", a_ran.clone()),
                failing("b"),
                flag_action("c", c_ran.clone()),
            ],
        );

        let result = Executor::new().execute(&task).unwrap();

        assert!(a_ran.load(Ordering::SeqCst));
        assert!(c_ran.load(Ordering::SeqCst));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].task, "b");
    }

    /// An action that signals once started and then spins until cancelled or
    /// released, so tests can hold a subtree in the running state.
    fn blocking_task(
        name: &str,
        started: mpsc::Sender<()>,
        release: Arc<AtomicBool>,
    ) -> Task {
        Task::action(name, move |cancel| {
            started.send(()).ok();
            while !cancel.is_set() && !release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
    }

    #[test]
    fn overlapping_run_is_rejected_with_busy() {
        let executor = Arc::new(Executor::new());
        let release = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let blocked = Arc::new(blocking_task("slow", tx, release.clone()));

        let handle = {
            let executor = executor.clone();
            let blocked = blocked.clone();
            std::thread::spawn(move || executor.execute(&blocked))
        };

        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let again = Task::action("slow", |_| Ok(()));
        match executor.execute(&again) {
            Err(ExecError::Busy(name)) => assert_eq!(name, "slow"),
            _ => panic!("expected busy"),
        }

        release.store(true, Ordering::SeqCst);
        assert!(handle.join().unwrap().unwrap().is_success());
    }

    #[test]
    fn supersession_cancels_the_stale_run() {
        let executor = Arc::new(Executor::new());
        let release = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let blocked = Arc::new(blocking_task("slow", tx, release));

        let handle = {
            let executor = executor.clone();
            let blocked = blocked.clone();
            std::thread::spawn(move || executor.execute(&blocked))
        };

        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let replacement = Task::action("slow", |_| Ok(()));
        let result = executor.execute_with(&replacement, true).unwrap();
        assert!(result.is_success());

        // The stale run saw its cancel flag and wound down on its own.
        let stale = handle.join().unwrap().unwrap();
        assert!(stale.superseded);
    }

    #[test]
    fn write_locks_are_shared_per_path() {
        let locks = WriteLocks::new();
        let a = locks.for_path(Utf8Path::new("dist/css/main.css"));
        let b = locks.for_path(Utf8Path::new("dist/css/main.css"));
        let c = locks.for_path(Utf8Path::new("dist/js/main.js"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
