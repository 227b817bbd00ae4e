use std::collections::HashMap;

use camino::Utf8PathBuf;

use crate::error::{PipelineError, TransformError};
use crate::executor::CancelFlag;
use crate::record::FileRecord;
use crate::transform::Transformer;

/// An ordered list of transformer stages applied to a batch of file records.
///
/// Records are streamed one input at a time through every stage, so the full
/// intermediate batch is never materialized between stages. A stage failure
/// on one record is collected as a per-file error and the record dropped;
/// sibling records continue. A strict pipeline instead aborts the whole batch
/// on the first stage error. Lint-class leaves stay non-strict: every
/// violation in the batch is collected, and the leaf still fails its series
/// once the batch finishes.
pub struct Pipeline {
    stages: Vec<Box<dyn Transformer>>,
    strict: bool,
}

/// Outcome of one pipeline run over a batch.
pub struct PipelineReport {
    /// Output records, unique by path.
    pub records: Vec<FileRecord>,
    /// Per-file stage errors, in encounter order.
    pub errors: Vec<TransformError>,
    /// Destination paths that more than one record resolved to.
    pub collisions: Vec<Utf8PathBuf>,
    /// True when the run stopped early on a cancelled flag.
    pub cancelled: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            strict: false,
        }
    }

    pub fn stage(mut self, stage: impl Transformer + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub(crate) fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Runs the batch through every stage in declared order. The cancel flag
    /// is checked between input records; a cancelled run returns whatever was
    /// produced so far with `cancelled` set.
    ///
    /// Collision policy: when two records resolve to the same output path the
    /// later one wins, replacing the earlier in place, and the path is
    /// reported as a warning-level diagnostic.
    pub fn run(
        &self,
        batch: impl IntoIterator<Item = FileRecord>,
        cancel: &CancelFlag,
    ) -> Result<PipelineReport, PipelineError> {
        let mut records: Vec<FileRecord> = Vec::new();
        let mut by_path: HashMap<Utf8PathBuf, usize> = HashMap::new();
        let mut errors = Vec::new();
        let mut collisions = Vec::new();
        let mut cancelled = false;

        for record in batch {
            if cancel.is_set() {
                cancelled = true;
                break;
            }

            for out in self.apply_stages(record, &mut errors)? {
                match by_path.get(&out.path) {
                    Some(&i) => {
                        tracing::warn!(path = %out.path, "output path collision, later record wins");
                        collisions.push(out.path.clone());
                        records[i] = out;
                    }
                    None => {
                        by_path.insert(out.path.clone(), records.len());
                        records.push(out);
                    }
                }
            }
        }

        Ok(PipelineReport {
            records,
            errors,
            collisions,
            cancelled,
        })
    }

    /// Pushes one input record through all stages, carrying along whatever
    /// fan-out earlier stages produced.
    fn apply_stages(
        &self,
        record: FileRecord,
        errors: &mut Vec<TransformError>,
    ) -> Result<Vec<FileRecord>, PipelineError> {
        let mut flowing = vec![record];

        for stage in &self.stages {
            let mut next = Vec::new();

            for record in flowing {
                let path = record.path.clone();

                match stage.apply(record) {
                    Ok(out) => next.extend(out),
                    Err(source) => {
                        let err = TransformError {
                            path,
                            stage: stage.name().to_string(),
                            source,
                        };

                        if self.strict {
                            return Err(PipelineError::Strict(err));
                        }

                        errors.push(err);
                    }
                }
            }

            flowing = next;
        }

        Ok(flowing)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
