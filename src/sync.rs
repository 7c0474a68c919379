use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::SystemContext;
use crate::error::Result;
use crate::events::{EventBus, SentrycamEvent};
use crate::queue::{CaptureRecord, OfflineQueue};
use crate::remote::RemoteTransport;

/// Queue length above which a single archive upload replaces per-item delivery
pub const BATCH_THRESHOLD: usize = 5;

/// Packs a set of queued records into one uploadable blob
pub trait ArchivePacker: Send + Sync {
    fn pack(&self, records: &[CaptureRecord]) -> Result<Vec<u8>>;

    /// Filename for the packed blob
    fn archive_name(&self) -> String;
}

/// Zip archiver matching the remote side's expected batch format
pub struct ZipPacker;

impl ArchivePacker for ZipPacker {
    fn pack(&self, records: &[CaptureRecord]) -> Result<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for record in records {
            writer.start_file(format!("capture_{:08}.jpg", record.id), options)?;
            writer.write_all(&record.payload)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    fn archive_name(&self) -> String {
        format!("capture_batch_{}.zip", chrono::Utc::now().timestamp_millis())
    }
}

/// Reason a sync pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    MissingCredentials,
    /// Another sync pass is in flight; callers coalesce
    AlreadyRunning,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub batched: bool,
    pub skipped: Option<SkipReason>,
}

impl DeliveryReport {
    fn skip(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Drains the offline queue to the remote sink.
///
/// Above `BATCH_THRESHOLD` (with an archiver available) the whole backlog is
/// sent as one archive: success clears the queue, failure leaves it
/// untouched, because per-item confirmation inside an archive is impossible.
/// Otherwise items are delivered oldest first, each deleted only on its own
/// confirmed success, failures independent of each other.
pub struct SyncEngine {
    queue: Arc<OfflineQueue>,
    transport: Arc<dyn RemoteTransport>,
    packer: Option<Arc<dyn ArchivePacker>>,
    context: Arc<SystemContext>,
    event_bus: EventBus,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OfflineQueue>,
        transport: Arc<dyn RemoteTransport>,
        packer: Option<Arc<dyn ArchivePacker>>,
        context: Arc<SystemContext>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            queue,
            transport,
            packer,
            context,
            event_bus,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one sync pass. Overlapping calls coalesce behind a single-flight
    /// gate; the later caller gets `SkipReason::AlreadyRunning`.
    pub async fn sync(&self) -> Result<DeliveryReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in flight, coalescing");
            return Ok(DeliveryReport::skip(SkipReason::AlreadyRunning));
        }

        let result = self.sync_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn sync_inner(&self) -> Result<DeliveryReport> {
        // Precondition checks, not retryable errors
        if !self.context.is_online() {
            debug!("Sync skipped: offline");
            return Ok(DeliveryReport::skip(SkipReason::Offline));
        }

        let config = self.context.config();
        if !config.has_credentials() {
            debug!("Sync skipped: delivery credentials absent");
            return Ok(DeliveryReport::skip(SkipReason::MissingCredentials));
        }

        let records = self.queue.list_all().await?;
        if records.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let token = &config.remote.token;
        let chat_id = &config.remote.chat_id;

        let report = if records.len() > BATCH_THRESHOLD && self.packer.is_some() {
            self.sync_batched(&records, token, chat_id).await?
        } else {
            self.sync_per_item(&records, token, chat_id).await?
        };

        info!(
            "Sync pass: {}/{} delivered{}",
            report.delivered,
            report.attempted,
            if report.batched { " (batched)" } else { "" }
        );
        self.event_bus.publish(SentrycamEvent::SyncCompleted {
            delivered: report.delivered,
            failed: report.failed,
            batched: report.batched,
        });

        Ok(report)
    }

    async fn sync_batched(
        &self,
        records: &[CaptureRecord],
        token: &str,
        chat_id: &str,
    ) -> Result<DeliveryReport> {
        // Checked by the caller
        let packer = match &self.packer {
            Some(packer) => packer,
            None => return self.sync_per_item(records, token, chat_id).await,
        };

        let archive = packer.pack(records)?;
        let name = packer.archive_name();
        info!(
            "Backlog of {} records, uploading as archive {} ({} bytes)",
            records.len(),
            name,
            archive.len()
        );

        match self
            .transport
            .send_document(token, chat_id, archive, &name)
            .await
        {
            Ok(()) => {
                // All-or-nothing: the archive confirmed as a whole
                self.queue.clear().await?;
                Ok(DeliveryReport {
                    attempted: records.len(),
                    delivered: records.len(),
                    failed: 0,
                    batched: true,
                    skipped: None,
                })
            }
            Err(e) => {
                warn!("Archive upload failed, backlog retained: {}", e);
                Ok(DeliveryReport {
                    attempted: records.len(),
                    delivered: 0,
                    failed: records.len(),
                    batched: true,
                    skipped: None,
                })
            }
        }
    }

    async fn sync_per_item(
        &self,
        records: &[CaptureRecord],
        token: &str,
        chat_id: &str,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport {
            attempted: records.len(),
            ..DeliveryReport::default()
        };

        for record in records {
            let filename = format!("capture_{:08}.jpg", record.id);
            match self
                .transport
                .send_photo(
                    token,
                    chat_id,
                    record.payload.clone(),
                    &filename,
                    &record.caption,
                )
                .await
            {
                Ok(()) => {
                    self.queue.remove(record.id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    // One failure must not block the rest of the backlog
                    warn!("Delivery of record {} failed: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SentrycamConfig;
    use crate::error::SentrycamError;
    use crate::queue::{MemoryBlobStore, NewRecord};
    use crate::remote::RemoteCommand;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Transport scripted with per-call photo outcomes and a fixed document
    /// outcome; records every call it sees.
    #[derive(Default)]
    struct ScriptedTransport {
        photo_script: Mutex<VecDeque<bool>>,
        document_ok: Mutex<bool>,
        photos_sent: Mutex<Vec<String>>,
        documents_sent: Mutex<Vec<String>>,
        messages_sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with_photo_script(outcomes: &[bool]) -> Self {
            Self {
                photo_script: Mutex::new(outcomes.iter().copied().collect()),
                document_ok: Mutex::new(true),
                ..Self::default()
            }
        }

        fn with_document_outcome(ok: bool) -> Self {
            Self {
                document_ok: Mutex::new(ok),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for ScriptedTransport {
        async fn send_photo(
            &self,
            _token: &str,
            _chat_id: &str,
            _payload: Vec<u8>,
            filename: &str,
            _caption: &str,
        ) -> crate::error::Result<()> {
            let ok = self.photo_script.lock().pop_front().unwrap_or(true);
            if ok {
                self.photos_sent.lock().push(filename.to_string());
                Ok(())
            } else {
                Err(SentrycamError::transport("scripted photo failure"))
            }
        }

        async fn send_document(
            &self,
            _token: &str,
            _chat_id: &str,
            _payload: Vec<u8>,
            filename: &str,
        ) -> crate::error::Result<()> {
            if *self.document_ok.lock() {
                self.documents_sent.lock().push(filename.to_string());
                Ok(())
            } else {
                Err(SentrycamError::transport("scripted document failure"))
            }
        }

        async fn send_message(
            &self,
            _token: &str,
            _chat_id: &str,
            text: &str,
        ) -> crate::error::Result<()> {
            self.messages_sent.lock().push(text.to_string());
            Ok(())
        }

        async fn get_updates(
            &self,
            _token: &str,
            _offset: i64,
            _timeout_secs: u64,
        ) -> crate::error::Result<Vec<RemoteCommand>> {
            Ok(Vec::new())
        }
    }

    fn online_context() -> Arc<SystemContext> {
        let mut config = SentrycamConfig::default();
        config.remote.token = "123:abc".to_string();
        config.remote.chat_id = "42".to_string();
        let context = Arc::new(SystemContext::new(config));
        context.set_online(true);
        context
    }

    fn engine_with(
        transport: Arc<ScriptedTransport>,
        packer: Option<Arc<dyn ArchivePacker>>,
        context: Arc<SystemContext>,
    ) -> (Arc<SyncEngine>, Arc<OfflineQueue>) {
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryBlobStore::new())));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            transport,
            packer,
            context,
            EventBus::new(16),
        ));
        (engine, queue)
    }

    async fn fill_queue(queue: &OfflineQueue, n: usize) {
        for i in 0..n {
            queue
                .enqueue(NewRecord::photo(vec![i as u8; 32], format!("capture {}", i)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop() {
        let transport = Arc::new(ScriptedTransport::default());
        let (engine, _queue) = engine_with(Arc::clone(&transport), None, online_context());

        let report = engine.sync().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(transport.photos_sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_offline_skips_delivery() {
        let transport = Arc::new(ScriptedTransport::default());
        let context = online_context();
        context.set_online(false);
        let (engine, queue) = engine_with(Arc::clone(&transport), None, context);
        fill_queue(&queue, 2).await;

        let report = engine.sync().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Offline));
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_delivery() {
        let transport = Arc::new(ScriptedTransport::default());
        let context = Arc::new(SystemContext::new(SentrycamConfig::default()));
        context.set_online(true);
        let (engine, queue) = engine_with(Arc::clone(&transport), None, context);
        fill_queue(&queue, 1).await;

        let report = engine.sync().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::MissingCredentials));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_path_clears_queue_on_success() {
        let transport = Arc::new(ScriptedTransport::with_document_outcome(true));
        let (engine, queue) = engine_with(
            Arc::clone(&transport),
            Some(Arc::new(ZipPacker)),
            online_context(),
        );
        fill_queue(&queue, 6).await;

        let report = engine.sync().await.unwrap();
        assert!(report.batched);
        assert_eq!(report.delivered, 6);
        assert_eq!(transport.documents_sent.lock().len(), 1);
        assert!(transport.photos_sent.lock().is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_path_keeps_queue_on_failure() {
        let transport = Arc::new(ScriptedTransport::with_document_outcome(false));
        let (engine, queue) = engine_with(
            Arc::clone(&transport),
            Some(Arc::new(ZipPacker)),
            online_context(),
        );
        fill_queue(&queue, 6).await;

        let report = engine.sync().await.unwrap();
        assert!(report.batched);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 6);
        // No partial deletion inside a failed archive
        assert_eq!(queue.len().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_small_backlog_uses_per_item_delivery() {
        let transport = Arc::new(ScriptedTransport::default());
        let (engine, queue) = engine_with(
            Arc::clone(&transport),
            Some(Arc::new(ZipPacker)),
            online_context(),
        );
        fill_queue(&queue, 3).await;

        let report = engine.sync().await.unwrap();
        assert!(!report.batched);
        assert_eq!(report.delivered, 3);
        assert!(transport.documents_sent.lock().is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_item_failures_are_independent() {
        // Item 2 of 3 fails; 1 and 3 deliver and are removed
        let transport = Arc::new(ScriptedTransport::with_photo_script(&[true, false, true]));
        let (engine, queue) = engine_with(Arc::clone(&transport), None, online_context());
        fill_queue(&queue, 3).await;

        let ids: Vec<u64> = queue
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();

        let report = engine.sync().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);

        let remaining = queue.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_no_archiver_forces_per_item_even_over_threshold() {
        let transport = Arc::new(ScriptedTransport::default());
        let (engine, queue) = engine_with(Arc::clone(&transport), None, online_context());
        fill_queue(&queue, 7).await;

        let report = engine.sync().await.unwrap();
        assert!(!report.batched);
        assert_eq!(report.delivered, 7);
        assert_eq!(transport.photos_sent.lock().len(), 7);
    }

    #[tokio::test]
    async fn test_overlapping_sync_coalesces() {
        use tokio::sync::watch;

        struct GatedTransport {
            release: watch::Receiver<bool>,
        }

        #[async_trait]
        impl RemoteTransport for GatedTransport {
            async fn send_photo(
                &self,
                _token: &str,
                _chat_id: &str,
                _payload: Vec<u8>,
                _filename: &str,
                _caption: &str,
            ) -> crate::error::Result<()> {
                let mut release = self.release.clone();
                while !*release.borrow() {
                    release
                        .changed()
                        .await
                        .map_err(|_| SentrycamError::transport("gate dropped"))?;
                }
                Ok(())
            }

            async fn send_document(
                &self,
                _token: &str,
                _chat_id: &str,
                _payload: Vec<u8>,
                _filename: &str,
            ) -> crate::error::Result<()> {
                Ok(())
            }

            async fn send_message(
                &self,
                _token: &str,
                _chat_id: &str,
                _text: &str,
            ) -> crate::error::Result<()> {
                Ok(())
            }

            async fn get_updates(
                &self,
                _token: &str,
                _offset: i64,
                _timeout_secs: u64,
            ) -> crate::error::Result<Vec<RemoteCommand>> {
                Ok(Vec::new())
            }
        }

        let (tx, rx) = watch::channel(false);
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryBlobStore::new())));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::new(GatedTransport { release: rx }),
            None,
            online_context(),
            EventBus::new(16),
        ));
        fill_queue(&queue, 1).await;

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.sync().await })
        };

        // Let the first pass reach the gated upload
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let second = engine.sync().await.unwrap();
        assert_eq!(second.skipped, Some(SkipReason::AlreadyRunning));

        tx.send(true).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);

        // Gate released: a later pass runs normally
        let third = engine.sync().await.unwrap();
        assert!(third.skipped.is_none());
    }

    #[test]
    fn test_zip_packer_produces_archive_with_all_entries() {
        let records: Vec<CaptureRecord> = (1..=3u64)
            .map(|id| CaptureRecord {
                id,
                payload: vec![id as u8; 16],
                caption: format!("capture {}", id),
                kind: crate::queue::RecordKind::Photo,
                created_at: chrono::Utc::now(),
                byte_size: 16,
            })
            .collect();

        let archive = ZipPacker.pack(&records).unwrap();
        let mut reader = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        assert_eq!(reader.len(), 3);
        assert!(reader.by_name("capture_00000002.jpg").is_ok());
    }
}
