use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::SystemContext;
use crate::error::Result;
use crate::events::{EventBus, SentrycamEvent};

/// Tracks the online/offline state and publishes transition events.
///
/// The monitor is the single writer of the context's online flag; duplicate
/// reports of the current state publish nothing.
pub struct ConnectivityMonitor {
    context: Arc<SystemContext>,
    event_bus: EventBus,
    online: AtomicBool,
}

impl ConnectivityMonitor {
    /// Create a monitor starting in the offline state
    pub fn new(context: Arc<SystemContext>, event_bus: EventBus) -> Self {
        Self {
            context,
            event_bus,
            online: AtomicBool::new(false),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Report the current connectivity state; publishes only on transitions
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        self.context.set_online(online);
        info!(
            "Connectivity transition: {} -> {}",
            if previous { "online" } else { "offline" },
            if online { "online" } else { "offline" }
        );
        self.event_bus.publish(SentrycamEvent::ConnectivityChanged {
            online,
            timestamp: Utc::now(),
        });
    }

    /// Spawn a background reachability probe against `url`.
    ///
    /// Any HTTP response counts as reachable; only transport-level failures
    /// mark the system offline.
    pub fn spawn_probe(
        self: &Arc<Self>,
        url: String,
        period: Duration,
    ) -> Result<JoinHandle<()>> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        let monitor = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let reachable = match client.head(&url).send().await {
                    Ok(_) => true,
                    Err(e) => {
                        debug!("Reachability probe failed: {}", e);
                        false
                    }
                };
                monitor.set_online(reachable);
            }
        }))
    }
}
