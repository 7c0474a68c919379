use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::Result;

/// A single raw frame sampled from the camera capability.
///
/// Pixels are tightly packed RGB8, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            timestamp: Utc::now(),
        }
    }

    /// Expected pixel buffer length for the frame dimensions
    pub fn expected_len(&self) -> usize {
        (self.width * self.height * 3) as usize
    }
}

/// Camera capability consumed by the capture pipeline.
///
/// `current_frame` returns `None` while no session is open; attempting a
/// capture before the session starts is an expected state, not an error.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn start_session(&self) -> Result<()>;

    async fn current_frame(&self) -> Result<Option<Frame>>;

    async fn stop_session(&self);
}

/// Flat-field frame source used for wiring the pipeline without camera
/// hardware, and as the test double throughout the crate.
pub struct StubFrameSource {
    width: u32,
    height: u32,
    luma: u8,
    session_open: AtomicBool,
}

impl StubFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            luma: 128,
            session_open: AtomicBool::new(false),
        }
    }

    pub fn with_luma(mut self, luma: u8) -> Self {
        self.luma = luma;
        self
    }
}

impl Default for StubFrameSource {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

#[async_trait]
impl FrameSource for StubFrameSource {
    async fn start_session(&self) -> Result<()> {
        info!(
            "Starting stub frame session ({}x{})",
            self.width, self.height
        );
        self.session_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn current_frame(&self) -> Result<Option<Frame>> {
        if !self.session_open.load(Ordering::SeqCst) {
            debug!("Frame requested with no open session");
            return Ok(None);
        }

        let pixels = vec![self.luma; (self.width * self.height * 3) as usize];
        Ok(Some(Frame::new(self.width, self.height, pixels)))
    }

    async fn stop_session(&self) {
        info!("Stopping stub frame session");
        self.session_open.store(false, Ordering::SeqCst);
    }
}
