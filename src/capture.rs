use chrono::{Local, Timelike};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use rusttype::{Font, Scale};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, SentrycamConfig};
use crate::context::SystemContext;
use crate::detect::DetectionGate;
use crate::error::{Result, SentrycamError};
use crate::events::{EventBus, SentrycamEvent};
use crate::frame::{Frame, FrameSource};
use crate::hardware::{AuxLight, AuxSupport};
use crate::policy;
use crate::queue::{NewRecord, OfflineQueue};
use crate::sync::SyncEngine;

/// Fixed settle delay after switching the auxiliary light on, letting
/// illumination stabilize before sampling. Deliberately not configurable.
const FLASH_SETTLE: Duration = Duration::from_millis(800);

/// Outcome of one capture attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A record was produced and enqueued
    Stored { record_id: u64 },
    /// Nothing was produced; an expected state, not an error
    Skipped(SkipCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// Capture attempted before the camera session opened
    CameraNotStarted,
    /// The camera session is open but frame acquisition failed
    FrameUnavailable,
    /// The detection gate decided the frame is not of interest
    NotOfInterest,
}

/// Orchestrates one capture event: aux-light policy, frame acquisition,
/// detection gating, annotated encoding, enqueue, opportunistic sync.
pub struct CaptureProducer {
    frame_source: Arc<dyn FrameSource>,
    gate: DetectionGate,
    aux: Arc<dyn AuxLight>,
    queue: Arc<OfflineQueue>,
    sync: Arc<SyncEngine>,
    context: Arc<SystemContext>,
    event_bus: EventBus,
}

impl CaptureProducer {
    pub fn new(
        frame_source: Arc<dyn FrameSource>,
        gate: DetectionGate,
        aux: Arc<dyn AuxLight>,
        queue: Arc<OfflineQueue>,
        sync: Arc<SyncEngine>,
        context: Arc<SystemContext>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            frame_source,
            gate,
            aux,
            queue,
            sync,
            context,
            event_bus,
        }
    }

    /// Run one capture attempt for the given trigger reason.
    ///
    /// The auxiliary light is always switched back off afterward, whatever
    /// the capture outcome, so hardware is never left powered.
    pub async fn capture(&self, reason: &str) -> Result<CaptureOutcome> {
        let config = self.context.config();

        let aux_on = self.maybe_light(&config).await;
        let result = self.capture_inner(&config, reason).await;

        if aux_on {
            if let Err(e) = self.aux.set_active(false).await {
                warn!("Failed to deactivate aux light: {}", e);
            }
        }

        result
    }

    /// Switch the aux light on when the configured hour window applies.
    /// Returns whether the light was actually activated.
    async fn maybe_light(&self, config: &SentrycamConfig) -> bool {
        let hour = Local::now().hour() as u8;
        let wanted = config.flash.enabled
            && policy::in_window(hour, config.flash.start_hour, config.flash.end_hour);
        if !wanted {
            return false;
        }

        match self.aux.set_active(true).await {
            Ok(AuxSupport::Applied) => {
                debug!("Aux light on, settling {:?}", FLASH_SETTLE);
                tokio::time::sleep(FLASH_SETTLE).await;
                true
            }
            Ok(AuxSupport::Unsupported) => {
                debug!("Aux light unsupported, capturing without illumination");
                false
            }
            Err(e) => {
                warn!("Aux light activation failed: {}", e);
                false
            }
        }
    }

    async fn capture_inner(
        &self,
        config: &SentrycamConfig,
        reason: &str,
    ) -> Result<CaptureOutcome> {
        let frame = match self.frame_source.current_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Capture skipped: camera session not started");
                self.event_bus.publish(SentrycamEvent::CaptureSkipped {
                    reason: "camera not started".to_string(),
                });
                return Ok(CaptureOutcome::Skipped(SkipCause::CameraNotStarted));
            }
            Err(e) => {
                warn!("Frame acquisition failed, skipping capture: {}", e);
                self.event_bus.publish(SentrycamEvent::CaptureSkipped {
                    reason: format!("frame acquisition failed: {}", e),
                });
                return Ok(CaptureOutcome::Skipped(SkipCause::FrameUnavailable));
            }
        };

        let decision = self.gate.should_keep(&frame, config.capture.detect_gate).await;
        if !decision.keep {
            debug!("Capture gated out: no person in frame");
            self.event_bus.publish(SentrycamEvent::CaptureSkipped {
                reason: "not of interest".to_string(),
            });
            return Ok(CaptureOutcome::Skipped(SkipCause::NotOfInterest));
        }

        let time_text = frame.timestamp.format("%m/%d/%y %H:%M:%S").to_string();
        let overlay_text = if decision.person_detected {
            format!("{} [PERSON]", time_text)
        } else {
            time_text.clone()
        };

        let payload = encode_annotated_jpeg(&frame, &overlay_text, &config.capture)?;
        let caption = format!(
            "Time: {}\nReason: {}\nPerson: {}",
            time_text,
            reason,
            if decision.person_detected { "YES" } else { "No" }
        );

        let byte_size = payload.len() as u64;
        let record_id = self.queue.enqueue(NewRecord::photo(payload, caption)).await?;
        self.context.mark_capture();

        info!(
            "Capture stored as record {} (reason: {}, person: {})",
            record_id, reason, decision.person_detected
        );
        self.event_bus.publish(SentrycamEvent::CaptureStored {
            record_id,
            byte_size,
            reason: reason.to_string(),
        });

        // Opportunistic drain; failures wait for the next trigger
        if self.context.is_online() {
            if let Err(e) = self.sync.sync().await {
                warn!("Post-capture sync failed: {}", e);
            }
        }

        Ok(CaptureOutcome::Stored { record_id })
    }
}

/// Encode a frame as JPEG with the timestamp/detection text burned in.
///
/// An unreadable font degrades to encoding without the overlay.
fn encode_annotated_jpeg(frame: &Frame, text: &str, config: &CaptureConfig) -> Result<Vec<u8>> {
    let mut img: RgbImage =
        ImageBuffer::from_raw(frame.width, frame.height, frame.pixels.clone()).ok_or_else(
            || {
                SentrycamError::capture(format!(
                    "Frame buffer length {} does not match {}x{}",
                    frame.pixels.len(),
                    frame.width,
                    frame.height
                ))
            },
        )?;

    let font = std::fs::read(&config.overlay_font_path)
        .ok()
        .and_then(Font::try_from_vec);
    match font {
        Some(font) => {
            let scale = Scale::uniform(config.overlay_font_size);
            draw_text_mut(&mut img, Rgb([255u8, 255, 0]), 20, 40, scale, &font, text);
        }
        None => {
            warn!(
                "Overlay font '{}' unavailable, encoding without overlay",
                config.overlay_font_path
            );
        }
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, config.jpeg_quality)
        .encode_image(&img)
        .map_err(|e| SentrycamError::capture(format!("JPEG encoding failed: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBlobStore;
    use crate::remote::{RemoteCommand, RemoteTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct OkTransport {
        photos_sent: Mutex<usize>,
    }

    #[async_trait]
    impl RemoteTransport for OkTransport {
        async fn send_photo(
            &self,
            _token: &str,
            _chat_id: &str,
            _payload: Vec<u8>,
            _filename: &str,
            _caption: &str,
        ) -> Result<()> {
            *self.photos_sent.lock() += 1;
            Ok(())
        }

        async fn send_document(
            &self,
            _token: &str,
            _chat_id: &str,
            _payload: Vec<u8>,
            _filename: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn send_message(&self, _token: &str, _chat_id: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn get_updates(
            &self,
            _token: &str,
            _offset: i64,
            _timeout_secs: u64,
        ) -> Result<Vec<RemoteCommand>> {
            Ok(Vec::new())
        }
    }

    struct RecordingAuxLight {
        log: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl AuxLight for RecordingAuxLight {
        async fn set_active(&self, active: bool) -> Result<AuxSupport> {
            self.log.lock().push(active);
            Ok(AuxSupport::Applied)
        }
    }

    struct NoPersonDetector;

    #[async_trait]
    impl crate::detect::Detector for NoPersonDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<crate::detect::Detection>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        producer: CaptureProducer,
        queue: Arc<OfflineQueue>,
        context: Arc<SystemContext>,
        frame_source: Arc<crate::frame::StubFrameSource>,
        aux: Arc<RecordingAuxLight>,
    }

    fn fixture(config: SentrycamConfig, gate: DetectionGate) -> Fixture {
        let context = Arc::new(SystemContext::new(config));
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryBlobStore::new())));
        let transport = Arc::new(OkTransport {
            photos_sent: Mutex::new(0),
        });
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            transport,
            None,
            Arc::clone(&context),
            EventBus::new(16),
        ));
        let frame_source = Arc::new(crate::frame::StubFrameSource::new(32, 16));
        let aux = Arc::new(RecordingAuxLight {
            log: Mutex::new(Vec::new()),
        });
        let producer = CaptureProducer::new(
            frame_source.clone() as Arc<dyn FrameSource>,
            gate,
            aux.clone() as Arc<dyn AuxLight>,
            Arc::clone(&queue),
            sync,
            Arc::clone(&context),
            EventBus::new(16),
        );
        Fixture {
            producer,
            queue,
            context,
            frame_source,
            aux,
        }
    }

    fn base_config() -> SentrycamConfig {
        let mut config = SentrycamConfig::default();
        config.capture.detect_gate = false;
        config.flash.enabled = false;
        // No font on the test machine is fine; overlay degrades gracefully
        config
    }

    #[tokio::test]
    async fn test_capture_without_session_is_a_noop() {
        let f = fixture(base_config(), DetectionGate::disabled());

        let outcome = f.producer.capture("Init").await.unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Skipped(SkipCause::CameraNotStarted)
        );
        assert!(f.queue.is_empty().await.unwrap());
        assert!(f.context.last_capture_at().is_none());
    }

    #[tokio::test]
    async fn test_capture_enqueues_annotated_record() {
        let f = fixture(base_config(), DetectionGate::disabled());
        f.frame_source.start_session().await.unwrap();

        let outcome = f.producer.capture("Scheduled").await.unwrap();
        let record_id = match outcome {
            CaptureOutcome::Stored { record_id } => record_id,
            other => panic!("Expected stored capture, got {:?}", other),
        };

        let records = f.queue.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, record_id);
        assert!(records[0].caption.contains("Reason: Scheduled"));
        assert!(records[0].caption.contains("Person: No"));
        assert!(records[0].byte_size > 0);
        assert!(f.context.last_capture_at().is_some());
    }

    #[tokio::test]
    async fn test_gated_out_frame_is_not_persisted() {
        let mut config = base_config();
        config.capture.detect_gate = true;
        let gate = DetectionGate::new(Some(Arc::new(NoPersonDetector)));
        let f = fixture(config, gate);
        f.frame_source.start_session().await.unwrap();

        let outcome = f.producer.capture("Scheduled").await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped(SkipCause::NotOfInterest));
        assert!(f.queue.is_empty().await.unwrap());
    }

    /// Frame source that stamps when it was sampled
    struct TimedFrameSource {
        sampled_at: Mutex<Option<tokio::time::Instant>>,
    }

    #[async_trait]
    impl FrameSource for TimedFrameSource {
        async fn start_session(&self) -> Result<()> {
            Ok(())
        }

        async fn current_frame(&self) -> Result<Option<Frame>> {
            *self.sampled_at.lock() = Some(tokio::time::Instant::now());
            Ok(Some(Frame::new(8, 8, vec![128u8; 192])))
        }

        async fn stop_session(&self) {}
    }

    /// Aux light that stamps when it was switched on
    struct TimedAuxLight {
        activated_at: Mutex<Option<tokio::time::Instant>>,
    }

    #[async_trait]
    impl AuxLight for TimedAuxLight {
        async fn set_active(&self, active: bool) -> Result<AuxSupport> {
            if active {
                *self.activated_at.lock() = Some(tokio::time::Instant::now());
            }
            Ok(AuxSupport::Applied)
        }
    }

    struct FailingFrameSource;

    #[async_trait]
    impl FrameSource for FailingFrameSource {
        async fn start_session(&self) -> Result<()> {
            Ok(())
        }

        async fn current_frame(&self) -> Result<Option<Frame>> {
            Err(crate::error::SentrycamError::capture("sensor read failed"))
        }

        async fn stop_session(&self) {}
    }

    fn producer_with(
        config: SentrycamConfig,
        frame_source: Arc<dyn FrameSource>,
        aux: Arc<dyn AuxLight>,
    ) -> CaptureProducer {
        let context = Arc::new(SystemContext::new(config));
        let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryBlobStore::new())));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::new(OkTransport {
                photos_sent: Mutex::new(0),
            }),
            None,
            Arc::clone(&context),
            EventBus::new(16),
        ));
        CaptureProducer::new(
            frame_source,
            DetectionGate::disabled(),
            aux,
            queue,
            sync,
            context,
            EventBus::new(16),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_sampled_after_settle_delay() {
        let mut config = base_config();
        config.flash.enabled = true;
        let hour = Local::now().hour() as u8;
        config.flash.start_hour = hour;
        config.flash.end_hour = (hour + 1) % 24;

        let frame_source = Arc::new(TimedFrameSource {
            sampled_at: Mutex::new(None),
        });
        let aux = Arc::new(TimedAuxLight {
            activated_at: Mutex::new(None),
        });
        let producer = producer_with(
            config,
            frame_source.clone() as Arc<dyn FrameSource>,
            aux.clone() as Arc<dyn AuxLight>,
        );

        producer.capture("Scheduled").await.unwrap();

        let lit_at = aux.activated_at.lock().unwrap();
        let sampled_at = frame_source.sampled_at.lock().unwrap();
        assert!(
            sampled_at - lit_at >= FLASH_SETTLE,
            "frame sampled {:?} after activation, settle is {:?}",
            sampled_at - lit_at,
            FLASH_SETTLE
        );
    }

    #[tokio::test]
    async fn test_frame_acquisition_failure_is_reported_distinctly() {
        let producer = producer_with(
            base_config(),
            Arc::new(FailingFrameSource),
            Arc::new(crate::hardware::NullAuxLight),
        );

        let outcome = producer.capture("Scheduled").await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped(SkipCause::FrameUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aux_light_turned_off_after_capture() {
        let mut config = base_config();
        config.flash.enabled = true;
        // Window pinned to the current hour so the test is not time-of-day
        // dependent
        let hour = Local::now().hour() as u8;
        config.flash.start_hour = hour;
        config.flash.end_hour = (hour + 1) % 24;

        let f = fixture(config, DetectionGate::disabled());
        f.frame_source.start_session().await.unwrap();

        f.producer.capture("Scheduled").await.unwrap();
        assert_eq!(*f.aux.log.lock(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aux_light_turned_off_even_when_capture_skips() {
        let mut config = base_config();
        config.flash.enabled = true;
        let hour = Local::now().hour() as u8;
        config.flash.start_hour = hour;
        config.flash.end_hour = (hour + 1) % 24;

        let f = fixture(config, DetectionGate::disabled());
        // Session never started: capture will skip

        let outcome = f.producer.capture("Init").await.unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Skipped(SkipCause::CameraNotStarted)
        );
        assert_eq!(*f.aux.log.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_capture_triggers_sync_when_online() {
        let mut config = base_config();
        config.remote.token = "123:abc".to_string();
        config.remote.chat_id = "42".to_string();
        let f = fixture(config, DetectionGate::disabled());
        f.context.set_online(true);
        f.frame_source.start_session().await.unwrap();

        f.producer.capture("Scheduled").await.unwrap();
        // Delivered by the opportunistic sync pass
        assert!(f.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_capture_stays_queued_when_offline() {
        let mut config = base_config();
        config.remote.token = "123:abc".to_string();
        config.remote.chat_id = "42".to_string();
        let f = fixture(config, DetectionGate::disabled());
        f.frame_source.start_session().await.unwrap();

        f.producer.capture("Scheduled").await.unwrap();
        assert_eq!(f.queue.len().await.unwrap(), 1);
    }
}
