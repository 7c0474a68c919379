use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the sentrycam pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentrycamEvent {
    /// A capture was stored in the offline queue
    CaptureStored {
        record_id: u64,
        byte_size: u64,
        reason: String,
    },
    /// A capture attempt produced nothing (camera not started, gated out)
    CaptureSkipped { reason: String },
    /// A sync pass finished
    SyncCompleted {
        delivered: usize,
        failed: usize,
        batched: bool,
    },
    /// A remote command was received from the pull channel
    CommandReceived { command_id: i64, text: String },
    /// Connectivity changed between online and offline
    ConnectivityChanged {
        online: bool,
        timestamp: DateTime<Utc>,
    },
    /// The scheduler was armed or disarmed
    ArmedChanged { armed: bool },
    /// A component failure that was degraded rather than raised
    ComponentError { component: String, error: String },
}

impl SentrycamEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SentrycamEvent::CaptureStored {
                record_id,
                byte_size,
                reason,
            } => {
                format!(
                    "Capture {} stored ({} bytes, reason: {})",
                    record_id, byte_size, reason
                )
            }
            SentrycamEvent::CaptureSkipped { reason } => {
                format!("Capture skipped: {}", reason)
            }
            SentrycamEvent::SyncCompleted {
                delivered,
                failed,
                batched,
            } => {
                format!(
                    "Sync completed: {} delivered, {} failed{}",
                    delivered,
                    failed,
                    if *batched { " (batched)" } else { "" }
                )
            }
            SentrycamEvent::CommandReceived { command_id, text } => {
                format!("Command {} received: {}", command_id, text)
            }
            SentrycamEvent::ConnectivityChanged { online, .. } => {
                format!("Connectivity: {}", if *online { "online" } else { "offline" })
            }
            SentrycamEvent::ArmedChanged { armed } => {
                format!("System {}", if *armed { "armed" } else { "standby" })
            }
            SentrycamEvent::ComponentError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SentrycamEvent::CaptureStored { .. } => "capture_stored",
            SentrycamEvent::CaptureSkipped { .. } => "capture_skipped",
            SentrycamEvent::SyncCompleted { .. } => "sync_completed",
            SentrycamEvent::CommandReceived { .. } => "command_received",
            SentrycamEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SentrycamEvent::ArmedChanged { .. } => "armed_changed",
            SentrycamEvent::ComponentError { .. } => "component_error",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SentrycamEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SentrycamEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing to a bus with no subscribers is not an error; the event is
    /// simply dropped after logging.
    pub fn publish(&self, event: SentrycamEvent) {
        match &event {
            SentrycamEvent::ConnectivityChanged { online, .. } => {
                if *online {
                    info!("Connectivity restored");
                } else {
                    warn!("Connectivity lost");
                }
            }
            SentrycamEvent::ComponentError { component, error } => {
                error!("Component error in {}: {}", component, error);
            }
            SentrycamEvent::ArmedChanged { armed } => {
                info!("System {}", if *armed { "armed" } else { "standby" });
            }
            _ => {
                debug!("Event [{}]: {}", event.event_type(), event.description());
            }
        }

        if let Err(e) = self.sender.send(event) {
            debug!("Event dropped, no subscribers: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
