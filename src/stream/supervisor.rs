//! Stream supervisor: reconnect loop, backoff, subscription replay.

use super::SubscriptionSet;
use crate::bus::{EventBus, Topic};
use crate::domain::{InstrumentId, VenueEvent};
use crate::venue::{StreamKind, SubscriptionTopic, VenueConnection, VenueError, VenueStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capped exponential backoff for stream reconnects.
///
/// The delay after `n` consecutive failures is `min(start * 2^n, cap)`.
/// A connection that stays up for at least `grace` resets the counter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub start: Duration,
    pub cap: Duration,
    pub grace: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            grace: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        let start_ms = self.start.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let delay_ms = 2u64
            .checked_pow(consecutive_failures)
            .and_then(|factor| start_ms.checked_mul(factor))
            .unwrap_or(cap_ms);
        Duration::from_millis(delay_ms.min(cap_ms))
    }
}

enum Command {
    Subscribe(SubscriptionTopic, Vec<InstrumentId>),
    Unsubscribe(SubscriptionTopic, Vec<InstrumentId>),
}

/// Why the event pump for one connection ended.
enum Pump {
    Stopped,
    Dropped,
}

/// Owns one logical venue stream: connects, replays the subscription set,
/// publishes every event onto the bus, and reconnects with backoff on any
/// failure. Subscription changes arrive over a command channel and are
/// accepted in every state; while disconnected they only mutate the desired
/// set and take effect at the next replay.
pub struct StreamSupervisor {
    kind: StreamKind,
    topic: Topic,
    venue: Arc<dyn VenueStream>,
    bus: Arc<EventBus>,
    backoff: BackoffPolicy,
    initial: SubscriptionSet,
}

impl StreamSupervisor {
    pub fn new(
        kind: StreamKind,
        topic: Topic,
        venue: Arc<dyn VenueStream>,
        bus: Arc<EventBus>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            kind,
            topic,
            venue,
            bus,
            backoff,
            initial: SubscriptionSet::default(),
        }
    }

    /// Seed the subscription set before the first connect, so the initial
    /// instrument universe is subscribed without racing the command channel.
    pub fn with_initial(mut self, topic: SubscriptionTopic, ids: &[InstrumentId]) -> Self {
        self.initial.add(topic, ids);
        self
    }

    pub fn spawn(self) -> SupervisorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cmd_rx, stop_rx));
        SupervisorHandle {
            cmd_tx,
            stop_tx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>, mut stop_rx: watch::Receiver<bool>) {
        let mut subs = std::mem::take(&mut self.initial);
        let mut failures: u32 = 0;
        loop {
            let connected = tokio::select! {
                _ = wait_stop(&mut stop_rx) => break,
                res = self.venue.connect(self.kind) => res,
            };
            let mut conn = match connected {
                Ok(conn) => conn,
                Err(err) => {
                    let delay = self.backoff.delay_after(failures);
                    failures = failures.saturating_add(1);
                    warn!(stream = %self.kind, error = %err, ?delay, "connect failed, backing off");
                    if !backoff_wait(delay, &mut cmd_rx, &mut stop_rx, &mut subs).await {
                        break;
                    }
                    continue;
                }
            };
            info!(stream = %self.kind, "connected");
            let connected_at = Instant::now();

            // Replay the full desired set before touching the command
            // channel, so pre-drop subscriptions are restored first.
            match replay(conn.as_mut(), &subs).await {
                Err(err) => {
                    warn!(stream = %self.kind, error = %err, "subscription replay failed");
                }
                Ok(()) => match self.pump(conn.as_mut(), &mut cmd_rx, &mut stop_rx, &mut subs).await
                {
                    Pump::Stopped => break,
                    Pump::Dropped => {}
                },
            }

            if connected_at.elapsed() >= self.backoff.grace {
                failures = 0;
            }
            let delay = self.backoff.delay_after(failures);
            failures = failures.saturating_add(1);
            info!(stream = %self.kind, ?delay, "stream dropped, backing off");
            if !backoff_wait(delay, &mut cmd_rx, &mut stop_rx, &mut subs).await {
                break;
            }
        }
        info!(stream = %self.kind, "stream supervisor stopped");
    }

    async fn pump(
        &self,
        conn: &mut dyn VenueConnection,
        cmd_rx: &mut mpsc::Receiver<Command>,
        stop_rx: &mut watch::Receiver<bool>,
        subs: &mut SubscriptionSet,
    ) -> Pump {
        enum Step {
            Stop,
            Cmd(Option<Command>),
            Event(Result<Option<VenueEvent>, VenueError>),
        }
        loop {
            let step = tokio::select! {
                _ = wait_stop(stop_rx) => Step::Stop,
                cmd = cmd_rx.recv() => Step::Cmd(cmd),
                event = conn.next_event() => Step::Event(event),
            };
            match step {
                Step::Stop => return Pump::Stopped,
                // All handles gone; nobody can stop us later, so stop now.
                Step::Cmd(None) => return Pump::Stopped,
                Step::Cmd(Some(cmd)) => {
                    if let Err(err) = apply_command(conn, subs, cmd).await {
                        warn!(stream = %self.kind, error = %err, "subscription change failed");
                        return Pump::Dropped;
                    }
                }
                Step::Event(Ok(Some(event))) => {
                    debug!(stream = %self.kind, kind = event.kind(), "event");
                    self.bus.publish(self.topic, event).await;
                }
                Step::Event(Ok(None)) => {
                    info!(stream = %self.kind, "stream closed by venue");
                    return Pump::Dropped;
                }
                Step::Event(Err(err)) => {
                    warn!(stream = %self.kind, error = %err, "stream error");
                    return Pump::Dropped;
                }
            }
        }
    }
}

/// Control handle for a spawned supervisor. Dropping the last handle without
/// calling [`stop`](Self::stop) also shuts the supervisor down.
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<Command>,
    stop_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    /// Add instruments to the desired subscription set. Already-subscribed
    /// ids are ignored.
    pub async fn subscribe(&self, topic: SubscriptionTopic, instrument_ids: Vec<InstrumentId>) {
        if self
            .cmd_tx
            .send(Command::Subscribe(topic, instrument_ids))
            .await
            .is_err()
        {
            warn!("subscribe command dropped, supervisor is not running");
        }
    }

    /// Remove instruments from the desired subscription set. Ids that were
    /// never subscribed are ignored.
    pub async fn unsubscribe(&self, topic: SubscriptionTopic, instrument_ids: Vec<InstrumentId>) {
        if self
            .cmd_tx
            .send(Command::Unsubscribe(topic, instrument_ids))
            .await
            .is_err()
        {
            warn!("unsubscribe command dropped, supervisor is not running");
        }
    }

    /// Signal shutdown and wait for the supervisor task to finish.
    /// Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if task.await.is_err() {
                warn!("stream supervisor task panicked");
            }
        }
    }
}

async fn wait_stop(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn replay(
    conn: &mut dyn VenueConnection,
    subs: &SubscriptionSet,
) -> Result<(), VenueError> {
    for (topic, ids) in subs.entries() {
        debug!(%topic, count = ids.len(), "replaying subscriptions");
        conn.subscribe(topic, &ids).await?;
    }
    Ok(())
}

async fn apply_command(
    conn: &mut dyn VenueConnection,
    subs: &mut SubscriptionSet,
    cmd: Command,
) -> Result<(), VenueError> {
    match cmd {
        Command::Subscribe(topic, ids) => {
            let added = subs.add(topic, &ids);
            if !added.is_empty() {
                conn.subscribe(topic, &added).await?;
            }
        }
        Command::Unsubscribe(topic, ids) => {
            let removed = subs.remove(topic, &ids);
            if !removed.is_empty() {
                conn.unsubscribe(topic, &removed).await?;
            }
        }
    }
    Ok(())
}

/// Sleep out a backoff delay while still accepting stop and subscription
/// commands. Commands only mutate the desired set here; the wire catches up
/// at the next replay. Returns false when shutdown was requested.
async fn backoff_wait(
    delay: Duration,
    cmd_rx: &mut mpsc::Receiver<Command>,
    stop_rx: &mut watch::Receiver<bool>,
    subs: &mut SubscriptionSet,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = wait_stop(stop_rx) => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Subscribe(topic, ids)) => {
                    subs.add(topic, &ids);
                }
                Some(Command::Unsubscribe(topic, ids)) => {
                    subs.remove(topic, &ids);
                }
                None => return false,
            },
        }
    }
}
