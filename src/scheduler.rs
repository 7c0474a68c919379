use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::CaptureProducer;
use crate::context::SystemContext;
use crate::events::{EventBus, SentrycamEvent};
use crate::frame::FrameSource;
use crate::hardware::WakeLock;
use crate::poller::CommandPoller;
use crate::sync::SyncEngine;

/// Trigger reasons for scheduler-initiated captures
const INIT_REASON: &str = "Init";
const SCHEDULED_REASON: &str = "Scheduled";

/// Standby/Armed state machine owning the capture timer, the command-poll
/// timer, and the connectivity-transition reaction.
///
/// Arming acquires the camera and wake-lock (failures are logged, never
/// blocking), fires an immediate capture, then starts both timers. A second
/// arm while armed is a no-op. Disarming stops the timers and releases the
/// capabilities; operations already in flight complete on their own, which
/// is safe because all queue mutations are idempotent.
pub struct Scheduler {
    context: Arc<SystemContext>,
    producer: Arc<CaptureProducer>,
    sync: Arc<SyncEngine>,
    poller: Arc<CommandPoller>,
    frame_source: Arc<dyn FrameSource>,
    wake_lock: Arc<dyn WakeLock>,
    event_bus: EventBus,
    capture_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    connectivity_task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        context: Arc<SystemContext>,
        producer: Arc<CaptureProducer>,
        sync: Arc<SyncEngine>,
        poller: Arc<CommandPoller>,
        frame_source: Arc<dyn FrameSource>,
        wake_lock: Arc<dyn WakeLock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            context,
            producer,
            sync,
            poller,
            frame_source,
            wake_lock,
            event_bus,
            capture_task: None,
            poll_task: None,
            connectivity_task: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.context.is_armed()
    }

    /// Number of currently running scheduler tasks (timers + connectivity
    /// reaction)
    pub fn active_task_count(&self) -> usize {
        [
            &self.capture_task,
            &self.poll_task,
            &self.connectivity_task,
        ]
        .iter()
        .filter(|t| t.is_some())
        .count()
    }

    /// Standby -> Armed transition
    pub async fn arm(&mut self) {
        if self.context.is_armed() {
            warn!("Arm requested while already armed, ignoring");
            return;
        }

        info!("Arming capture pipeline");

        // Capability acquisition failures degrade, they never block arming
        if let Err(e) = self.frame_source.start_session().await {
            warn!("Camera session failed to start: {}", e);
        }
        if let Err(e) = self.wake_lock.acquire().await {
            warn!("Wake lock not acquired: {}", e);
        }

        self.context.reset_cursor();
        self.context.set_armed(true);
        self.event_bus
            .publish(SentrycamEvent::ArmedChanged { armed: true });

        // Immediate capture, then the periodic timer takes over
        if let Err(e) = self.producer.capture(INIT_REASON).await {
            warn!("Initial capture failed: {}", e);
        }

        let config = self.context.config();
        let capture_period = Duration::from_secs(config.capture.interval_minutes as u64 * 60);
        let poll_period = Duration::from_secs(config.remote.poll_interval_seconds);

        self.capture_task = Some({
            let context = Arc::clone(&self.context);
            let producer = Arc::clone(&self.producer);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + capture_period, capture_period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !context.is_armed() {
                        break;
                    }
                    if let Err(e) = producer.capture(SCHEDULED_REASON).await {
                        warn!("Scheduled capture failed: {}", e);
                    }
                }
            })
        });

        self.poll_task = Some({
            let context = Arc::clone(&self.context);
            let poller = Arc::clone(&self.poller);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + poll_period, poll_period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !context.is_armed() {
                        break;
                    }
                    poller.poll().await;
                }
            })
        });

        self.connectivity_task = Some({
            let context = Arc::clone(&self.context);
            let sync = Arc::clone(&self.sync);
            let mut events = self.event_bus.subscribe();
            tokio::spawn(async move {
                loop {
                    let event = match events.recv().await {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Dropped events are tolerable; a transition we
                            // missed resurfaces on the next probe report
                            warn!("Connectivity reaction lagged behind by {} events", n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    if !context.is_armed() {
                        break;
                    }
                    if let SentrycamEvent::ConnectivityChanged { online: true, .. } = event {
                        debug!("Online transition, draining queue");
                        match sync.sync().await {
                            Ok(report) => {
                                debug!(
                                    "Transition sync delivered {}/{}",
                                    report.delivered, report.attempted
                                );
                            }
                            Err(e) => warn!("Transition sync failed: {}", e),
                        }
                    }
                }
            })
        });

        info!(
            "Armed: capture every {} min, poll every {} s",
            config.capture.interval_minutes, config.remote.poll_interval_seconds
        );
    }

    /// Armed -> Standby transition
    pub async fn disarm(&mut self) {
        if !self.context.is_armed() {
            debug!("Disarm requested while in standby, ignoring");
            return;
        }

        info!("Disarming capture pipeline");
        self.context.set_armed(false);

        for task in [
            self.capture_task.take(),
            self.poll_task.take(),
            self.connectivity_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        self.frame_source.stop_session().await;
        self.wake_lock.release().await;

        self.event_bus
            .publish(SentrycamEvent::ArmedChanged { armed: false });
    }
}
