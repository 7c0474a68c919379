use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::capture::CaptureProducer;
use crate::context::SystemContext;
use crate::events::{EventBus, SentrycamEvent};
use crate::queue::OfflineQueue;
use crate::remote::RemoteTransport;

/// Trigger reason attached to operator-initiated captures
const REMOTE_TRIGGER_REASON: &str = "Remote Trigger";

/// Recognized operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Take and deliver a snapshot immediately
    Photo,
    /// Report queue occupancy and connectivity
    Status,
}

impl Command {
    /// Parse a command text, case-insensitively. Unknown texts are ignored
    /// by the caller, not errors.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "/photo" => Some(Command::Photo),
            "/status" => Some(Command::Status),
            _ => None,
        }
    }
}

/// Pull-based command channel: fetches commands past the session cursor and
/// dispatches them at most once each.
///
/// The cursor advances to the highest received id before any dispatch, so a
/// command is never re-dispatched even when its handling fails. Both
/// recognized commands are safe to drop on a crash, so the cursor carries no
/// persistence obligation.
pub struct CommandPoller {
    transport: Arc<dyn RemoteTransport>,
    producer: Arc<CaptureProducer>,
    queue: Arc<OfflineQueue>,
    context: Arc<SystemContext>,
    event_bus: EventBus,
}

impl CommandPoller {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        producer: Arc<CaptureProducer>,
        queue: Arc<OfflineQueue>,
        context: Arc<SystemContext>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            transport,
            producer,
            queue,
            context,
            event_bus,
        }
    }

    /// Run one poll pass. Transport failures leave the cursor unchanged and
    /// wait for the next cadence tick.
    pub async fn poll(&self) {
        let config = self.context.config();
        if config.remote.token.is_empty() {
            trace!("Poll skipped: no token configured");
            return;
        }

        let cursor = self.context.poll_cursor();
        let commands = match self
            .transport
            .get_updates(
                &config.remote.token,
                cursor + 1,
                config.remote.poll_timeout_seconds,
            )
            .await
        {
            Ok(commands) => commands,
            Err(e) => {
                debug!("Command poll failed, cursor unchanged: {}", e);
                return;
            }
        };

        if commands.is_empty() {
            return;
        }

        // Advance before dispatch: at-most-once per command id, even if
        // handling below fails
        if let Some(highest) = commands.iter().map(|c| c.id).max() {
            self.context.advance_cursor(highest);
        }

        for command in commands {
            let text = command.text.unwrap_or_default();
            info!("Remote command {}: {}", command.id, text);
            self.event_bus.publish(SentrycamEvent::CommandReceived {
                command_id: command.id,
                text: text.clone(),
            });

            match Command::parse(&text) {
                Some(Command::Photo) => {
                    if let Err(e) = self.producer.capture(REMOTE_TRIGGER_REASON).await {
                        warn!("Remote-triggered capture failed: {}", e);
                    }
                }
                Some(Command::Status) => {
                    self.send_status(&config.remote.token, &config.remote.chat_id)
                        .await;
                }
                None => {
                    trace!("Ignoring unrecognized command: {}", text);
                }
            }
        }
    }

    async fn send_status(&self, token: &str, chat_id: &str) {
        if chat_id.is_empty() {
            debug!("Status report skipped: no chat id configured");
            return;
        }

        let occupied_mb = match self.queue.occupied_mb().await {
            Ok(mb) => mb,
            Err(e) => {
                warn!("Could not compute occupancy for status report: {}", e);
                return;
            }
        };

        let text = format!(
            "SENTRYCAM STATUS:\nStorage: {:.2} MB\nNet: {}",
            occupied_mb,
            if self.context.is_online() { "ON" } else { "OFF" }
        );

        if let Err(e) = self.transport.send_message(token, chat_id, &text).await {
            warn!("Status report delivery failed: {}", e);
        }
    }
}
