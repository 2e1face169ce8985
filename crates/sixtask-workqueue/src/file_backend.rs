//! Directory-backed queue shared between processes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::QueueBackend;
use crate::error::QueueError;
use crate::job::{Job, JobId};

/// File system queue backend.
///
/// Every job is one JSON file. Producers and consumers in different
/// processes can share the same root:
/// ```text
/// {root}/
/// ├── queues/
/// │   └── {queue}/
/// │       ├── pending/
/// │       │   └── {timestamp}-{seq}-{id}.json
/// │       ├── active/
/// │       │   └── {timestamp}-{seq}-{id}.json
/// │       └── failed/
/// │           └── {timestamp}-{seq}-{id}.json
/// └── dedup/
///     └── {uuid-v5 of key}.lock
/// ```
///
/// `pop` claims a job by renaming it from `pending/` to `active/`, which
/// only one consumer can win. `ack` deletes the active file. Claimed files
/// that cannot be read or decoded are moved to `failed/`.
pub struct FileBackend {
    root: PathBuf,
    claims: DashMap<JobId, PathBuf>,
    seq: AtomicU64,
}

impl FileBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        for dir in [root.join("queues"), root.join("dedup")] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error(&format!("Failed to create {:?}", dir), e))?;
        }

        debug!("FileBackend initialized at {:?}", root);

        Ok(Self {
            root,
            claims: DashMap::new(),
            seq: AtomicU64::new(0),
        })
    }

    /// The backend root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pending_dir(&self, queue: &str) -> PathBuf {
        self.root.join("queues").join(queue).join("pending")
    }

    fn active_dir(&self, queue: &str) -> PathBuf {
        self.root.join("queues").join(queue).join("active")
    }

    fn failed_dir(&self, queue: &str) -> PathBuf {
        self.root.join("queues").join(queue).join("failed")
    }

    fn dedup_path(&self, key: &str) -> PathBuf {
        let marker = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
        self.root.join("dedup").join(format!("{}.lock", marker))
    }

    fn file_name(&self, job: &Job) -> String {
        let micros = job.enqueued_at.timestamp_micros().max(0);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!("{:020}-{:06}-{}.json", micros, seq, job.id)
    }

    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError> {
        for dir in [self.pending_dir(queue), self.active_dir(queue)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error(&format!("Failed to create {:?}", dir), e))?;
        }
        Ok(())
    }

    async fn reserve_key(&self, key: &str) -> Result<(), QueueError> {
        let path = self.dedup_path(key);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(QueueError::DuplicateJob(key.to_string()));
            }
            Err(e) => return Err(io_error("Failed to create dedup marker", e)),
        };
        file.write_all(key.as_bytes())
            .await
            .map_err(|e| io_error("Failed to write dedup marker", e))?;
        Ok(())
    }

    async fn release_key(&self, key: &str) {
        match fs::remove_file(self.dedup_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release dedup key '{}': {}", key, e),
        }
    }

    /// Move an unusable claimed file to `failed/` and release its dedup key
    /// if one can still be read from it.
    async fn quarantine(&self, queue: &str, claimed: &Path, content: Option<&[u8]>) {
        let failed = self.failed_dir(queue);
        let moved = match fs::create_dir_all(&failed).await {
            Ok(()) => match claimed.file_name() {
                Some(name) => fs::rename(claimed, failed.join(name)).await,
                None => fs::remove_file(claimed).await,
            },
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            warn!("Failed to move {:?} to {:?}: {}", claimed, failed, e);
        }

        let key = content
            .and_then(|c| serde_json::from_slice::<serde_json::Value>(c).ok())
            .and_then(|v| {
                v.pointer("/options/dedup_key")
                    .and_then(|k| k.as_str())
                    .map(str::to_string)
            });
        match key {
            Some(key) => self.release_key(&key).await,
            None => warn!(
                "Dedup key of {:?} is unknown; a marker may remain under {:?}",
                claimed,
                self.root.join("dedup")
            ),
        }
    }

    async fn write_pending(&self, job: &Job) -> Result<(), QueueError> {
        let content = serde_json::to_vec(job)?;
        let name = self.file_name(job);
        // Write outside pending/ first so consumers never see a partial file.
        let tmp = self
            .root
            .join("queues")
            .join(&job.queue)
            .join(format!(".{}.tmp", job.id));

        fs::write(&tmp, content)
            .await
            .map_err(|e| io_error("Failed to write job file", e))?;
        fs::rename(&tmp, self.pending_dir(&job.queue).join(&name))
            .await
            .map_err(|e| io_error("Failed to publish job file", e))?;

        debug!("Pushed job '{}' to queue '{}'", job.id, job.queue);
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for FileBackend {
    async fn ping(&self) -> Result<(), QueueError> {
        let meta = fs::metadata(&self.root)
            .await
            .map_err(|e| io_error("Queue root is not accessible", e))?;
        if !meta.is_dir() {
            return Err(QueueError::Connectivity(format!(
                "{:?} is not a directory",
                self.root
            )));
        }
        Ok(())
    }

    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        self.ensure_queue(&job.queue).await?;

        if let Some(key) = &job.options.dedup_key {
            self.reserve_key(key).await?;
        }

        let result = self.write_pending(job).await;
        if result.is_err() {
            if let Some(key) = &job.options.dedup_key {
                self.release_key(key).await;
            }
        }
        result
    }

    async fn pop(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        let pending = self.pending_dir(queue);
        let mut entries = match fs::read_dir(&pending).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("Failed to read pending directory", e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("Failed to read directory entry", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();

        let active = self.active_dir(queue);
        fs::create_dir_all(&active)
            .await
            .map_err(|e| io_error("Failed to create active directory", e))?;

        for name in names {
            let claimed = active.join(&name);
            match fs::rename(pending.join(&name), &claimed).await {
                Ok(()) => {}
                // another consumer got there first
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("Failed to claim job file", e)),
            }

            let content = match fs::read(&claimed).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read claimed job {:?}: {}", claimed, e);
                    self.quarantine(queue, &claimed, None).await;
                    continue;
                }
            };
            match serde_json::from_slice::<Job>(&content) {
                Ok(job) => {
                    self.claims.insert(job.id, claimed);
                    return Ok(Some(job));
                }
                Err(e) => {
                    warn!("Unreadable job file {:?}: {}", claimed, e);
                    self.quarantine(queue, &claimed, Some(&content)).await;
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        if let Some((_, path)) = self.claims.remove(&job.id) {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("Failed to delete job file", e)),
            }
        }
        if let Some(key) = &job.options.dedup_key {
            self.release_key(key).await;
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let mut entries = match fs::read_dir(self.pending_dir(queue)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error("Failed to read pending directory", e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("Failed to read directory entry", e))?
        {
            if entry.file_name().to_string_lossy().ends_with(".json") {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn io_error(context: &str, err: std::io::Error) -> QueueError {
    QueueError::Connectivity(format!("{}: {}", context, err))
}
