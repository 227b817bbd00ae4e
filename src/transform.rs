#[cfg(feature = "image")]
pub mod image;
#[cfg(feature = "grass")]
pub mod styles;

use crate::record::FileRecord;

/// A unit of transform work applied to single file records.
///
/// Implementations must be pure with respect to their input record and
/// declared parameters: the same path, the same input bytes, and the same
/// `params` bytes always produce the same outputs. The content cache keys on
/// exactly this triple, so an impure transformer silently poisons cached
/// results.
///
/// A transformer may drop a record (empty output), rewrite it, or fan it out
/// into several records under different paths.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Parameter bytes mixed into the cache fingerprint. Transformers with no
    /// tunable parameters can rely on the default.
    fn params(&self) -> Vec<u8> {
        Vec::new()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>>;
}

type TransformFn = Box<dyn Fn(FileRecord) -> anyhow::Result<Vec<FileRecord>> + Send + Sync>;

/// Adapter wrapping a closure as a pipeline stage. This is the seam through
/// which external transforms (lint, transpile, minify) are plugged in.
pub struct FnTransform {
    name: String,
    params: Vec<u8>,
    func: TransformFn,
}

impl FnTransform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(FileRecord) -> anyhow::Result<Vec<FileRecord>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            func: Box::new(func),
        }
    }

    /// Declare the parameter bytes this closure is pure over.
    pub fn with_params(mut self, params: impl Into<Vec<u8>>) -> Self {
        self.params = params.into();
        self
    }
}

impl Transformer for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Vec<u8> {
        self.params.clone()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        (self.func)(record)
    }
}

/// Appends a suffix to the file stem, used to emit one record per output
/// variant, e.g. `logo.png` -> `logo_800.png`.
pub struct RenameSuffix {
    suffix: String,
}

impl RenameSuffix {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Transformer for RenameSuffix {
    fn name(&self) -> &str {
        "rename-suffix"
    }

    fn params(&self) -> Vec<u8> {
        self.suffix.as_bytes().to_vec()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        let path = record.path_with_suffix(&self.suffix);
        Ok(vec![record.renamed(path)])
    }
}

/// Replaces the file name entirely, keeping the directory, e.g. every
/// compiled stylesheet lands as `main.min.css`.
pub struct RenameTo {
    name: String,
}

impl RenameTo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transformer for RenameTo {
    fn name(&self) -> &str {
        "rename-to"
    }

    fn params(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        let path = record.path.with_file_name(&self.name);
        Ok(vec![record.renamed(path)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_suffix_fans_out_per_variant() {
        let record = FileRecord::new("img/photo.jpg", b"bytes".to_vec());
        let out = RenameSuffix::new("_400").apply(record).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "img/photo_400.jpg");
        assert_eq!(out[0].content, b"bytes");
    }

    #[test]
    fn rename_to_keeps_directory() {
        let record = FileRecord::new("sass/site.css", vec![]);
        let out = RenameTo::new("main.min.css").apply(record).unwrap();

        assert_eq!(out[0].path, "sass/main.min.css");
    }
}
