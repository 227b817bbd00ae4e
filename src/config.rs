use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do when a filesystem event targets a subtree that is still
/// running. One policy applies to the whole site.
///
/// The watch loop runs its triggers back to back, so a trigger never races a
/// run started by the same loop; `Supersede` and `Drop` take effect only when
/// runs are also started concurrently through the executor, outside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Let the in-flight run finish; the event stays in the debouncer channel
    /// and triggers afterwards.
    #[default]
    Queue,
    /// Cancel the stale run and start over with the newer inputs.
    Supersede,
    /// Skip the trigger entirely.
    Drop,
}

/// Typed project configuration. Every recognized option is enumerated here;
/// unknown keys are rejected during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Root of the source tree the watcher observes.
    pub source: Utf8PathBuf,
    /// Root the pipelines write into and the dev server serves from.
    pub dest: Utf8PathBuf,
    /// Debounce quantum for coalescing filesystem event bursts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// When set, every leaf pipeline aborts its batch on the first stage
    /// error instead of collecting per-file errors.
    #[serde(default)]
    pub strict: bool,
    /// Port of the static HTTP server in dev mode.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

fn default_debounce_ms() -> u64 {
    250
}

fn default_port() -> u16 {
    8080
}

impl SiteConfig {
    pub fn new(source: impl Into<Utf8PathBuf>, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            debounce_ms: default_debounce_ms(),
            strict: false,
            port: default_port(),
            overlap: OverlapPolicy::default(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::ZeroDebounce);
        }

        // Writing into the watched source tree would retrigger forever.
        if self.source == self.dest
            || self.dest.starts_with(&self.source)
            || self.source.starts_with(&self.dest)
        {
            return Err(ConfigError::OverlappingRoots);
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
