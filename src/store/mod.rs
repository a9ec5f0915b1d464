//! Flat-directory job persistence and the `JobCreated` event stream
//! (spec.md §4.4).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::document::DocumentFormat;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A persisted print submission (spec.md §3 `PrintJob`). Created once,
/// never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub job_id: u32,
    pub received_at: DateTime<Utc>,
    pub document_format_declared: String,
    pub document_format_detected: String,
    pub byte_len: u64,
    pub file_path: PathBuf,
}

/// Delivered once per successful save (spec.md §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: u32,
    pub path: PathBuf,
    pub byte_len: u64,
    pub declared_mime: String,
    pub detected_mime: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the flat artifact directory and the monotonic job-id counter.
/// Shared (append-mostly) across request handlers (spec.md §3
/// "Ownership").
pub struct JobStore {
    base_dir: PathBuf,
    job_id_counter: AtomicU32,
    events: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<JobStore, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(JobStore {
            base_dir,
            job_id_counter: AtomicU32::new(1),
            events,
        })
    }

    /// Allocate the next monotonically increasing job id (spec.md §5
    /// "Job ids are monotonically increasing and unique").
    pub fn next_job_id(&self) -> u32 {
        self.job_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Subscribe to `JobCreated` events. Delivery is non-blocking for
    /// the producer; a slow subscriber drops its oldest undelivered
    /// event once its buffer fills (`tokio::sync::broadcast`'s native
    /// lagging-receiver behavior matches spec.md §4.4's backpressure
    /// policy).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn job_path(&self, job_id: u32, format: DocumentFormat) -> PathBuf {
        self.base_dir
            .join(format!("print_job_{}.{}", job_id, format.extension()))
    }

    /// Persist `bytes` under `job_id`, write-then-rename for atomicity,
    /// and broadcast exactly one `JobCreated` event on success
    /// (spec.md §4.4 contract, §8 property 7).
    pub async fn save(
        &self,
        bytes: &[u8],
        job_id: u32,
        declared_mime: &str,
        detected: DocumentFormat,
    ) -> Result<PrintJob, StoreError> {
        let path = self.job_path(job_id, detected);
        self.write_atomic(&path, bytes).await?;

        let job = PrintJob {
            job_id,
            received_at: Utc::now(),
            document_format_declared: declared_mime.to_string(),
            document_format_detected: detected.mime().to_string(),
            byte_len: bytes.len() as u64,
            file_path: path.clone(),
        };

        // Fan-out is best-effort: no subscribers is not an error.
        let _ = self.events.send(JobEvent {
            job_id,
            path,
            byte_len: job.byte_len,
            declared_mime: declared_mime.to_string(),
            detected_mime: detected.mime().to_string(),
        });

        Ok(job)
    }

    /// Persist a raw companion file alongside a synthetic-PDF primary
    /// (spec.md §6 "A raw companion may coexist for debugging"). Does
    /// not emit its own event; the primary's `save` call already did.
    pub async fn save_companion(
        &self,
        bytes: &[u8],
        job_id: u32,
        format: DocumentFormat,
    ) -> Result<PathBuf, StoreError> {
        let path = self.job_path(job_id, format);
        self.write_atomic(&path, bytes).await?;
        Ok(path)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp_path = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("part")
        ));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Enumerate persisted jobs, newest-first by file modification
    /// time (spec.md §4.4).
    pub async fn list(&self) -> Result<Vec<(u32, PathBuf, std::time::SystemTime)>, StoreError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let Some(job_id) = job_id_from_filename(&path) else {
                continue;
            };
            let modified = entry.metadata().await?.modified()?;
            entries.push((job_id, path, modified));
        }
        entries.sort_by(|a, b| b.2.cmp(&a.2));
        Ok(entries)
    }

    /// Delete every file whose name begins with `print_job_<job_id>.`
    /// (spec.md §6 "deletion of a job by id removes every file whose
    /// name begins with its prefix").
    pub async fn delete(&self, job_id: u32) -> Result<(), StoreError> {
        let prefix = format!("print_job_{}.", job_id);
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Delete all persisted jobs (spec.md §4.5 "Purge-Jobs").
    pub async fn delete_all(&self) -> Result<(), StoreError> {
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with("print_job_") {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

fn job_id_from_filename(path: &Path) -> Option<u32> {
    let name = path.file_stem()?.to_str()?;
    name.strip_prefix("print_job_")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_persists_file_and_emits_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        let mut rx = store.subscribe();

        let job_id = store.next_job_id();
        let job = store
            .save(b"%PDF-1.4 test", job_id, "application/pdf", DocumentFormat::Pdf)
            .await
            .unwrap();

        assert!(job.file_path.exists());
        assert_eq!(tokio::fs::read(&job.file_path).await.unwrap(), b"%PDF-1.4 test");

        let event = rx.try_recv().expect("event should have been emitted");
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.byte_len, job.byte_len);
        assert!(rx.try_recv().is_err(), "exactly one event per save");
    }

    #[tokio::test]
    async fn job_ids_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        let a = store.next_job_id();
        let b = store.next_job_id();
        let c = store.next_job_id();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn delete_removes_every_file_with_job_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        let job_id = store.next_job_id();
        store
            .save(b"unknown-bytes", job_id, "application/pdf", DocumentFormat::Pdf)
            .await
            .unwrap();
        store
            .save_companion(b"unknown-bytes", job_id, DocumentFormat::Unknown)
            .await
            .unwrap();

        store.delete(job_id).await.unwrap();

        let mut dir_iter = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(dir_iter.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        let first = store.next_job_id();
        store
            .save(b"a", first, "application/pdf", DocumentFormat::Pdf)
            .await
            .unwrap();
        let second = store.next_job_id();
        store
            .save(b"b", second, "application/pdf", DocumentFormat::Pdf)
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].0, second);
    }
}
