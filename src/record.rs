use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};

/// A single file flowing through a transform pipeline.
///
/// The content is immutable within one pipeline run; stages never mutate a
/// record in place, they produce new ones. A new record with the same path is
/// emitted per run if a transform altered the bytes.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: Utf8PathBuf,
    pub content: Vec<u8>,
    pub mtime: SystemTime,
}

impl FileRecord {
    pub fn new(path: impl Into<Utf8PathBuf>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content,
            mtime: SystemTime::now(),
        }
    }

    /// Read a record from disk, taking the modification time from metadata.
    pub fn read(path: impl AsRef<Utf8Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = fs::read(path)?;
        let mtime = fs::metadata(path)?.modified()?;

        Ok(Self {
            path: path.to_owned(),
            content,
            mtime,
        })
    }

    /// New record at a different path, same content and mtime.
    pub fn renamed(&self, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: self.content.clone(),
            mtime: self.mtime,
        }
    }

    /// New record with transformed content, same path and mtime.
    pub fn with_content(&self, content: Vec<u8>) -> Self {
        Self {
            path: self.path.clone(),
            content,
            mtime: self.mtime,
        }
    }

    /// File stem with a suffix appended, keeping directory and extension,
    /// e.g. `img/logo.png` with `_800` becomes `img/logo_800.png`.
    pub fn path_with_suffix(&self, suffix: &str) -> Utf8PathBuf {
        let stem = self.path.file_stem().unwrap_or("");
        let name = match self.path.extension() {
            Some(ext) => format!("{stem}{suffix}.{ext}"),
            None => format!("{stem}{suffix}"),
        };

        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_keeps_directory_and_extension() {
        let record = FileRecord::new("assets/img/logo.png", vec![]);
        assert_eq!(record.path_with_suffix("_800"), "assets/img/logo_800.png");
    }

    #[test]
    fn suffix_without_extension() {
        let record = FileRecord::new("assets/LICENSE", vec![]);
        assert_eq!(record.path_with_suffix("_copy"), "assets/LICENSE_copy");
    }
}
