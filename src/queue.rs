use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Classification of a queued record.
///
/// Closed set so adding a video mode is a compile-time decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Photo,
}

/// A capture awaiting delivery, as held by the durable store.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    /// Store-assigned identifier, unique within the queue
    pub id: u64,
    /// Encoded image bytes
    pub payload: Vec<u8>,
    /// Human-readable annotation (time, trigger reason, detection outcome)
    pub caption: String,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
    /// Size of `payload`, used for occupancy accounting
    pub byte_size: u64,
}

/// A capture before insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub payload: Vec<u8>,
    pub caption: String,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
}

impl NewRecord {
    pub fn photo(payload: Vec<u8>, caption: String) -> Self {
        Self {
            payload,
            caption,
            kind: RecordKind::Photo,
            created_at: Utc::now(),
        }
    }
}

/// Durable blob store capability backing the offline queue.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Insert a record and return its assigned id
    async fn insert(&self, record: NewRecord) -> Result<u64>;

    /// All records in insertion order (oldest first)
    async fn list_all(&self) -> Result<Vec<CaptureRecord>>;

    /// Remove a record; removing an unknown id is a no-op
    async fn remove(&self, id: u64) -> Result<()>;

    /// Remove all records
    async fn clear(&self) -> Result<()>;
}

/// Sidecar metadata persisted next to each payload file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordMeta {
    id: u64,
    caption: String,
    kind: RecordKind,
    created_at: DateTime<Utc>,
    byte_size: u64,
}

/// File-backed blob store: one payload file plus one JSON sidecar per record.
///
/// The sidecar is written after the payload, so a record missing its sidecar
/// was never fully inserted and is ignored on scan. Ids are monotonic within
/// the directory's lifetime, resuming past the highest id found on open.
pub struct FileBlobStore {
    root: PathBuf,
    next_id: AtomicU64,
}

impl FileBlobStore {
    /// Open (or create) a store rooted at `root`
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let mut max_id = 0u64;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(id) = parse_record_id(&path) {
                    max_id = max_id.max(id);
                }
            }
        }

        info!(
            "Opened blob store at {} (highest existing id: {})",
            root.display(),
            max_id
        );

        Ok(Self {
            root,
            next_id: AtomicU64::new(max_id + 1),
        })
    }

    fn payload_path(&self, id: u64) -> PathBuf {
        self.root.join(format!("{:08}.jpg", id))
    }

    fn meta_path(&self, id: u64) -> PathBuf {
        self.root.join(format!("{:08}.json", id))
    }
}

fn parse_record_id(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<u64>().ok())
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn insert(&self, record: NewRecord) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let meta = RecordMeta {
            id,
            caption: record.caption,
            kind: record.kind,
            created_at: record.created_at,
            byte_size: record.payload.len() as u64,
        };

        // Payload first; the sidecar commits the insertion
        fs::write(self.payload_path(id), &record.payload).await?;
        let rendered = serde_json::to_vec(&meta)?;
        fs::write(self.meta_path(id), rendered).await?;

        debug!("Stored record {} ({} bytes)", id, meta.byte_size);
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<CaptureRecord>> {
        let mut records = BTreeMap::new();

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = parse_record_id(&path) else {
                continue;
            };

            let meta_bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable record sidecar {}: {}", path.display(), e);
                    continue;
                }
            };
            let meta: RecordMeta = match serde_json::from_slice(&meta_bytes) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping corrupt record sidecar {}: {}", path.display(), e);
                    continue;
                }
            };

            let payload = match fs::read(self.payload_path(id)).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping record {} with missing payload: {}", id, e);
                    continue;
                }
            };

            records.insert(
                id,
                CaptureRecord {
                    id,
                    payload,
                    caption: meta.caption,
                    kind: meta.kind,
                    created_at: meta.created_at,
                    byte_size: meta.byte_size,
                },
            );
        }

        // BTreeMap iteration yields ascending ids, i.e. insertion order
        Ok(records.into_values().collect())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        for path in [self.meta_path(id), self.payload_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Removed record {}", id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if parse_record_id(&path).is_some() {
                if let Err(e) = fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
        }
        info!("Blob store cleared");
        Ok(())
    }
}

/// In-memory blob store used as a test double and for ephemeral runs.
pub struct MemoryBlobStore {
    records: parking_lot::Mutex<BTreeMap<u64, CaptureRecord>>,
    next_id: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            records: parking_lot::Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn insert(&self, record: NewRecord) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let byte_size = record.payload.len() as u64;
        self.records.lock().insert(
            id,
            CaptureRecord {
                id,
                payload: record.payload,
                caption: record.caption,
                kind: record.kind,
                created_at: record.created_at,
                byte_size,
            },
        );
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<CaptureRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.records.lock().remove(&id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().clear();
        Ok(())
    }
}

/// Durable offline queue of captures awaiting delivery.
///
/// The backing store is the single source of truth: occupancy is recomputed
/// from `list_all` after every mutation rather than cached, so observers
/// never see a stale figure.
pub struct OfflineQueue {
    store: Arc<dyn BlobStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Append a record; returns the store-assigned id
    pub async fn enqueue(&self, record: NewRecord) -> Result<u64> {
        let byte_size = record.payload.len() as u64;
        let id = self.store.insert(record).await?;
        let occupied = self.occupied_bytes().await?;
        info!(
            "Enqueued record {} ({} bytes, queue now {} bytes)",
            id, byte_size, occupied
        );
        Ok(id)
    }

    /// All queued records, oldest first
    pub async fn list_all(&self) -> Result<Vec<CaptureRecord>> {
        self.store.list_all().await
    }

    /// Remove one record by id; unknown ids are a no-op
    pub async fn remove(&self, id: u64) -> Result<()> {
        self.store.remove(id).await
    }

    /// Remove every queued record
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        info!("Offline queue cleared");
        Ok(())
    }

    /// Number of queued records
    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.list_all().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Total payload bytes currently queued, recomputed from the store
    pub async fn occupied_bytes(&self) -> Result<u64> {
        Ok(self
            .store
            .list_all()
            .await?
            .iter()
            .map(|r| r.byte_size)
            .sum())
    }

    /// Occupancy in megabytes, for status reporting
    pub async fn occupied_mb(&self) -> Result<f64> {
        Ok(self.occupied_bytes().await? as f64 / (1024.0 * 1024.0))
    }
}
