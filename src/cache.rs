use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::hash::Hash32;
use crate::record::FileRecord;
use crate::transform::Transformer;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    payload: Vec<u8>,
    checksum: Hash32,
    created: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Content-addressable cache for expensive transform outputs.
///
/// Keys are fingerprints of (input path, input content, transform
/// parameters); two identical fingerprints must yield byte-identical
/// payloads, which holds as long as transformers are pure over their input
/// record and declared parameters. The path is part of the key because
/// cached payloads embed output paths, which transformers derive from the
/// input path. Entries are
/// append-only until [`ContentCache::clear`], which swaps the whole map out
/// under the write lock, so a racing `get` observes either the pre-clear or
/// the post-clear state.
pub struct ContentCache {
    entries: RwLock<HashMap<Hash32, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: Hash32) -> Option<Vec<u8>> {
        let entries = self.entries.read().unwrap();

        match entries.get(&key) {
            Some(entry) if Hash32::hash(&entry.payload) == entry.checksum => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            Some(_) => {
                // Corruption is never fatal, it just costs a recomputation.
                tracing::warn!(key = %key.to_hex(), "corrupted cache payload, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Unconditional write-through insert. Concurrent puts to the same
    /// fingerprint are serialized by the lock; the last writer wins.
    pub fn put(&self, key: Hash32, payload: Vec<u8>) {
        let entry = CacheEntry {
            checksum: Hash32::hash(&payload),
            payload,
            created: SystemTime::now(),
        };

        self.entries.write().unwrap().insert(key, entry);
    }

    /// Removes all entries atomically with respect to concurrent `get`/`put`.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Writes all entries to disk. This is the one cache that outlives the
    /// process; everything else is rebuilt from scratch per run.
    pub fn persist(&self, path: impl AsRef<Utf8Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let entries = self.entries.read().unwrap();
        let writer = BufWriter::new(File::create(path)?);

        ciborium::into_writer(&*entries, writer)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Restores a persisted cache. A missing or undecodable file yields an
    /// empty cache; corruption falls back to recomputation, never an error.
    pub fn restore(path: impl AsRef<Utf8Path>) -> Self {
        let path = path.as_ref();

        let entries = match File::open(path) {
            Ok(file) => match ciborium::from_reader(BufReader::new(file)) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(%path, "undecodable cache file, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            entries: RwLock::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct CachedRecord {
    path: Utf8PathBuf,
    content: Vec<u8>,
}

/// Write-through caching wrapper around a transformer.
///
/// A hit replays the recorded output records; a miss runs the inner
/// transformer and stores its outputs unconditionally. An undecodable cached
/// payload falls back to recomputation and overwrites the entry.
pub struct Cached<T> {
    inner: T,
    cache: Arc<ContentCache>,
}

impl<T: Transformer> Cached<T> {
    pub fn new(inner: T, cache: Arc<ContentCache>) -> Self {
        Self { inner, cache }
    }
}

impl<T: Transformer> Transformer for Cached<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn params(&self) -> Vec<u8> {
        self.inner.params()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        let key = Hash32::fingerprint(record.path.as_str(), &record.content, self.inner.params());

        if let Some(payload) = self.cache.get(key) {
            match decode_records(&payload, record.mtime) {
                Some(records) => return Ok(records),
                None => {
                    tracing::warn!(
                        key = %key.to_hex(),
                        "undecodable cached payload, recomputing"
                    );
                }
            }
        }

        let out = self.inner.apply(record)?;
        self.cache.put(key, encode_records(&out));

        Ok(out)
    }
}

fn encode_records(records: &[FileRecord]) -> Vec<u8> {
    let cached: Vec<CachedRecord> = records
        .iter()
        .map(|r| CachedRecord {
            path: r.path.clone(),
            content: r.content.clone(),
        })
        .collect();

    let mut payload = Vec::new();
    // Serialization into a Vec cannot fail.
    ciborium::into_writer(&cached, &mut payload).unwrap();
    payload
}

fn decode_records(payload: &[u8], mtime: SystemTime) -> Option<Vec<FileRecord>> {
    let cached: Vec<CachedRecord> = ciborium::from_reader(payload).ok()?;

    Some(
        cached
            .into_iter()
            .map(|r| FileRecord {
                path: r.path,
                content: r.content,
                mtime,
            })
            .collect(),
    )
}
