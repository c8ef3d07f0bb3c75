//! Disk-ceiling storage manager with least-recently-used eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reelpipe_models::{HealthSnapshot, JobId};

use crate::error::{StorageError, StorageResult};

/// Subdirectory of the downloads root holding per-job scratch space.
const SCRATCH_DIR: &str = "scratch";

/// Fallback extension for artifacts finalized without one.
const DEFAULT_EXTENSION: &str = "bin";

/// One retained artifact on disk.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    pub job_id: JobId,
    pub path: PathBuf,
    pub bytes: u64,
    pub last_access: DateTime<Utc>,
}

/// Accounting table guarded by the manager's mutex.
///
/// Invariant: `used` equals the sum of `entries` byte counts, and never
/// exceeds the ceiling after any mutation returns.
#[derive(Debug, Default)]
struct Accounting {
    entries: HashMap<JobId, StorageEntry>,
    used: u64,
}

impl Accounting {
    fn insert(&mut self, entry: StorageEntry) {
        self.used += entry.bytes;
        self.entries.insert(entry.job_id, entry);
    }

    fn remove(&mut self, job_id: &JobId) -> Option<StorageEntry> {
        let entry = self.entries.remove(job_id)?;
        self.used = self.used.saturating_sub(entry.bytes);
        Some(entry)
    }

    /// The entry touched longest ago, if any.
    fn lru(&self) -> Option<JobId> {
        self.entries
            .values()
            .min_by_key(|e| e.last_access)
            .map(|e| e.job_id)
    }
}

/// Single owner of the downloads directory and its size accounting.
///
/// Every filesystem mutation under the root goes through this manager,
/// serialized behind one async mutex, so the accounting table and the
/// directory contents cannot diverge.
#[derive(Debug)]
pub struct StorageManager {
    root: PathBuf,
    ceiling: u64,
    inner: Mutex<Accounting>,
}

impl StorageManager {
    /// Open the downloads root, rebuilding accounting from disk.
    ///
    /// Leftover scratch directories from a previous run are removed, and
    /// existing artifacts are re-registered with last-access taken from
    /// their mtime. If the survivors already exceed the ceiling, the
    /// oldest are evicted until they fit.
    pub async fn new(root: impl Into<PathBuf>, ceiling: u64) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(SCRATCH_DIR)).await?;

        let manager = Self {
            root,
            ceiling,
            inner: Mutex::new(Accounting::default()),
        };

        manager.sweep_scratch().await?;
        manager.rescan().await?;

        Ok(manager)
    }

    /// Configured ceiling in bytes.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Downloads root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently retained.
    pub async fn usage(&self) -> u64 {
        self.inner.lock().await.used
    }

    /// Fraction of the ceiling in use, in [0.0, 1.0].
    pub async fn utilization(&self) -> f64 {
        HealthSnapshot::utilization(self.usage().await, self.ceiling)
    }

    /// Create and return the scratch directory for a job.
    pub async fn allocate(&self, job_id: JobId) -> StorageResult<PathBuf> {
        let dir = self.scratch_path(job_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove a job's scratch directory and everything in it.
    ///
    /// Missing scratch is not an error; the common caller is cleanup code
    /// that must not fail a job over an already-gone directory.
    pub async fn discard_scratch(&self, job_id: JobId) {
        let dir = self.scratch_path(job_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %job_id, "Failed to discard scratch: {e}");
            }
        }
    }

    /// Promote a finished artifact from scratch into the downloads root.
    ///
    /// Evicts oldest-by-last-access artifacts until the new one fits under
    /// the ceiling; returns the final path together with the jobs whose
    /// artifacts were evicted to make room. When even full eviction cannot
    /// fit the artifact, returns [`StorageError::Exhausted`] carrying the
    /// jobs already evicted — those removals stand either way.
    pub async fn finalize(
        &self,
        job_id: JobId,
        temp: &Path,
    ) -> StorageResult<(PathBuf, Vec<JobId>)> {
        let bytes = fs::metadata(temp).await?.len();
        let mut inner = self.inner.lock().await;

        // A re-run replaces its own earlier artifact.
        if let Some(old) = inner.remove(&job_id) {
            let _ = fs::remove_file(&old.path).await;
        }

        let mut evicted = Vec::new();
        while inner.used + bytes > self.ceiling {
            let Some(victim) = inner.lru() else { break };
            let entry = inner
                .remove(&victim)
                .ok_or_else(|| StorageError::not_found(victim.to_string()))?;
            fs::remove_file(&entry.path).await?;
            info!(
                job_id = %victim,
                freed_bytes = entry.bytes,
                "Evicted artifact to make room"
            );
            evicted.push(victim);
        }

        if inner.used + bytes > self.ceiling {
            warn!(
                job_id = %job_id,
                needed = bytes,
                ceiling = self.ceiling,
                "Artifact does not fit even with storage emptied"
            );
            return Err(StorageError::Exhausted {
                needed: bytes,
                ceiling: self.ceiling,
                evicted,
            });
        }

        let extension = temp
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        let final_path = self.root.join(format!("{job_id}.{extension}"));
        fs::rename(temp, &final_path).await?;

        inner.insert(StorageEntry {
            job_id,
            path: final_path.clone(),
            bytes,
            last_access: Utc::now(),
        });

        debug!(
            job_id = %job_id,
            path = %final_path.display(),
            used = inner.used,
            "Finalized artifact"
        );

        Ok((final_path, evicted))
    }

    /// Remove a retained artifact and release its bytes.
    pub async fn evict(&self, job_id: JobId) -> StorageResult<u64> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .remove(&job_id)
            .ok_or_else(|| StorageError::not_found(job_id.to_string()))?;
        fs::remove_file(&entry.path).await?;
        info!(job_id = %job_id, freed_bytes = entry.bytes, "Evicted artifact");
        Ok(entry.bytes)
    }

    /// Refresh an artifact's last-access time.
    pub async fn touch(&self, job_id: JobId) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get_mut(&job_id)
            .ok_or_else(|| StorageError::not_found(job_id.to_string()))?;
        entry.last_access = Utc::now();
        Ok(())
    }

    /// Look up a retained artifact.
    pub async fn entry(&self, job_id: JobId) -> Option<StorageEntry> {
        self.inner.lock().await.entries.get(&job_id).cloned()
    }

    fn scratch_path(&self, job_id: JobId) -> PathBuf {
        self.root.join(SCRATCH_DIR).join(job_id.to_string())
    }

    /// Remove everything under the scratch directory.
    async fn sweep_scratch(&self) -> StorageResult<()> {
        let scratch = self.root.join(SCRATCH_DIR);
        let mut dir = fs::read_dir(&scratch).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            debug!("Sweeping leftover scratch: {}", path.display());
            if item.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Rebuild the accounting table from the files already in the root.
    async fn rescan(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_file() {
                continue;
            }
            let path = item.path();
            let Some(job_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<JobId>().ok())
            else {
                warn!("Ignoring unrecognized file in downloads root: {}", path.display());
                continue;
            };

            let meta = item.metadata().await?;
            let last_access = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            inner.insert(StorageEntry {
                job_id,
                path,
                bytes: meta.len(),
                last_access,
            });
        }

        if inner.used > 0 {
            info!(
                artifacts = inner.entries.len(),
                used = inner.used,
                "Recovered retained artifacts from disk"
            );
        }

        // Survivors from a run with a larger ceiling may not fit anymore.
        while inner.used > self.ceiling {
            let Some(victim) = inner.lru() else { break };
            if let Some(entry) = inner.remove(&victim) {
                fs::remove_file(&entry.path).await?;
                info!(job_id = %victim, "Evicted oversized survivor during rescan");
            }
        }

        Ok(())
    }
}
