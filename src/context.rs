use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::{debug, warn};

use crate::config::SentrycamConfig;
use crate::error::Result;

/// Shared system context owned by the scheduler and passed to every
/// component, replacing process-wide mutable state.
///
/// Config mutations go through `update_config`, which persists the result
/// when a settings path is attached. State fields are independently atomic;
/// readers tolerate eventual consistency between them.
pub struct SystemContext {
    config: RwLock<SentrycamConfig>,
    config_path: Option<PathBuf>,
    armed: AtomicBool,
    online: AtomicBool,
    last_capture_at: RwLock<Option<DateTime<Utc>>>,
    poll_cursor: AtomicI64,
}

impl SystemContext {
    pub fn new(config: SentrycamConfig) -> Self {
        Self {
            config: RwLock::new(config),
            config_path: None,
            armed: AtomicBool::new(false),
            online: AtomicBool::new(false),
            last_capture_at: RwLock::new(None),
            poll_cursor: AtomicI64::new(0),
        }
    }

    /// Attach a settings file that every config mutation is written back to
    pub fn with_persistence<P: Into<PathBuf>>(config: SentrycamConfig, path: P) -> Self {
        let mut context = Self::new(config);
        context.config_path = Some(path.into());
        context
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> SentrycamConfig {
        self.config.read().clone()
    }

    /// Apply an operator edit and persist the result
    pub fn update_config<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut SentrycamConfig),
    {
        let snapshot = {
            let mut config = self.config.write();
            mutate(&mut config);
            config.clone()
        };

        if let Some(path) = &self.config_path {
            snapshot.save_to_file(path)?;
        } else {
            debug!("Config updated without persistence path");
        }

        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn last_capture_at(&self) -> Option<DateTime<Utc>> {
        *self.last_capture_at.read()
    }

    pub fn mark_capture(&self) {
        *self.last_capture_at.write() = Some(Utc::now());
    }

    /// Highest command id already handled this session
    pub fn poll_cursor(&self) -> i64 {
        self.poll_cursor.load(Ordering::SeqCst)
    }

    /// Advance the cursor; it only ever moves forward
    pub fn advance_cursor(&self, to: i64) {
        let previous = self.poll_cursor.fetch_max(to, Ordering::SeqCst);
        if to < previous {
            warn!(
                "Ignored backwards cursor move {} -> {} (cursor is monotonic)",
                previous, to
            );
        }
    }

    /// Start a fresh command session; called on arm
    pub fn reset_cursor(&self) {
        self.poll_cursor.store(0, Ordering::SeqCst);
    }
}
