//! The live location feed.
//!
//! A [`LiveLocationFeed`] keeps its consumers supplied with the latest set of
//! valid vehicle positions.  Once started it runs a driver task on the tokio
//! runtime that owns the polling schedule:
//!
//! ```text
//!   interval tick ──┐
//!   refresh_now() ──┼──► driver ──► cycle: probe /health/ ─► fetch locations
//!   link signals ───┘      │                    │                  │
//!                          │               fail: offline      fail: error,
//!                          │                                  backoff retry
//!                          ▼
//!            watch<FeedSnapshot> + broadcast<FeedEvent>
//! ```
//!
//! ## Scheduling rules
//!
//! * At most one cycle is in flight.  A regular tick that finds a cycle still
//!   running (including one waiting out a backoff delay) is skipped.
//! * `refresh_now()` and an online signal supersede the in-flight cycle;
//!   dropping the old cycle cancels its pending retry.
//! * An offline signal cancels the in-flight cycle and marks the feed
//!   offline at once.
//! * Every mutation of observable state is tied to the run that made it and
//!   checked under the generation lock, so nothing changes once
//!   [`LiveLocationFeed::stop`] has returned, even if the feed is restarted.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connectivity::{ConnectivityMonitor, LinkSignal, Registration};
use crate::error::{FeedError, TransportError};
use crate::retry::{self, RetryPolicy};
use crate::source::{normalize, Transport, VehiclePosition};

/// Message used when the server gives no reason for a failed fetch.
const DEFAULT_FETCH_ERROR: &str = "Failed to load bus locations";

// ---------------------------------------------------------------------------
// Observable types
// ---------------------------------------------------------------------------

/// Reachability of the fleet API as seen by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No cycle has completed yet.
    Connecting,
    /// The last round-trip succeeded.
    Online,
    /// The probe failed or the host reported the link down.
    Offline,
    /// The server is reachable but the locations request failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// How prominently a notice should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Notifications pushed to subscribers.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    ConnectionState(ConnectionState),
    Positions {
        positions: Arc<[VehiclePosition]>,
        at: DateTime<Utc>,
    },
    Notice {
        message: String,
        severity: Severity,
    },
}

/// Everything a reader needs, replaced as a whole on every change.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub state: ConnectionState,
    pub positions: Arc<[VehiclePosition]>,
    /// Completion time of the last successful fetch; never moves backwards.
    pub last_fetch: Option<DateTime<Utc>>,
    /// Attempt number of the running cycle (0 when not retrying).
    pub retry_attempt: u32,
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            positions: Arc::from(Vec::new()),
            last_fetch: None,
            retry_attempt: 0,
        }
    }
}

/// Timing parameters for a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10_000),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Feed handle
// ---------------------------------------------------------------------------

/// Handle to a live location feed.  Dropping it stops the feed.
pub struct LiveLocationFeed {
    shared: Arc<Shared>,
    monitor: ConnectivityMonitor,
    poll_interval: Duration,
    running: Option<Running>,
}

struct Running {
    run: Run,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
    // Held for the lifetime of the run; dropping it frees the listener slot.
    _registration: Registration,
}

enum Command {
    Refresh,
}

impl LiveLocationFeed {
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: ConnectivityMonitor,
        config: FeedConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(FeedSnapshot::default());
        let (events, _) = broadcast::channel(256);

        Self {
            shared: Arc::new(Shared {
                transport,
                policy: config.retry,
                generation: Mutex::new(0),
                snapshot,
                events,
            }),
            monitor,
            poll_interval: config.poll_interval,
            running: None,
        }
    }

    /// Start polling: one cycle right away, then one per interval.
    ///
    /// Calling this on a running feed does nothing.  Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> Result<(), FeedError> {
        if self.running.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| FeedError::NoRuntime)?;
        let mut registration = self.monitor.register()?;
        let signals = registration.take_receiver();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let run = self.shared.begin_run();
        let driver = runtime.spawn(drive(run.clone(), self.poll_interval, command_rx, signals));

        tracing::info!(
            generation = run.generation,
            interval_ms = self.poll_interval.as_millis() as u64,
            "live feed started"
        );
        self.running = Some(Running {
            run,
            commands,
            driver,
            _registration: registration,
        });
        Ok(())
    }

    /// Stop polling, cancel any pending retry and release the connectivity
    /// listener.  No observable state changes after this returns.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.shared.end_run();
        running.driver.abort();
        drop(running);
        tracing::info!("live feed stopped");
    }

    /// Run a cycle now, outside the regular schedule.
    ///
    /// Refused with [`FeedError::Offline`] (and a notice) while offline.
    pub fn refresh_now(&self) -> Result<(), FeedError> {
        let Some(running) = &self.running else {
            return Err(FeedError::NotRunning);
        };

        if self.shared.state() == ConnectionState::Offline {
            running
                .run
                .notice("Cannot refresh while offline", Severity::Warning);
            return Err(FeedError::Offline);
        }

        running
            .commands
            .send(Command::Refresh)
            .map_err(|_| FeedError::NotRunning)?;
        running
            .run
            .notice("Refreshing bus locations...", Severity::Info);
        Ok(())
    }

    /// Current observable state.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Subscribe to feed events.  Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for LiveLocationFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    /// Generation of the current run, bumped by every start and stop.  Every
    /// mutation of observable state holds this lock.
    generation: Mutex<u64>,
    snapshot: watch::Sender<FeedSnapshot>,
    events: broadcast::Sender<FeedEvent>,
}

impl Shared {
    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new run.  Anything still holding an older [`Run`] loses the
    /// right to mutate.
    fn begin_run(self: &Arc<Self>) -> Run {
        let mut current = self.lock_generation();
        *current += 1;
        Run {
            shared: Arc::clone(self),
            generation: *current,
        }
    }

    fn end_run(&self) {
        *self.lock_generation() += 1;
    }

    fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    fn emit(&self, event: FeedEvent) {
        // Having no subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn apply_state(&self, state: ConnectionState) {
        let changed = self.snapshot.send_if_modified(|snap| {
            if snap.state == state {
                return false;
            }
            snap.state = state;
            true
        });
        if changed {
            tracing::debug!(%state, "connection state changed");
            self.emit(FeedEvent::ConnectionState(state));
        }
    }

    fn apply_retry_attempt(&self, attempt: u32) {
        self.snapshot.send_if_modified(|snap| {
            let changed = snap.retry_attempt != attempt;
            snap.retry_attempt = attempt;
            changed
        });
    }
}

/// Mutation rights for one run of the feed.  Every write checks that the
/// run is still the current one, so a driver that outlives `stop()` (or a
/// later `start()`) cannot touch the snapshot.
#[derive(Clone)]
struct Run {
    shared: Arc<Shared>,
    generation: u64,
}

impl Run {
    /// The generation guard, or `None` once this run has been superseded.
    fn live(&self) -> Option<MutexGuard<'_, u64>> {
        let guard = self.shared.lock_generation();
        (*guard == self.generation).then_some(guard)
    }

    fn set_state(&self, state: ConnectionState) {
        let Some(_live) = self.live() else { return };
        self.shared.apply_state(state);
    }

    /// Probe succeeded: online, and the retry counter starts over.
    fn mark_reachable(&self) {
        let Some(_live) = self.live() else { return };
        self.shared.apply_retry_attempt(0);
        self.shared.apply_state(ConnectionState::Online);
    }

    /// The host reported the link down.
    fn mark_offline(&self) {
        let Some(_live) = self.live() else { return };
        self.shared.apply_retry_attempt(0);
        self.shared.apply_state(ConnectionState::Offline);
        self.shared.emit(FeedEvent::Notice {
            message: "You are currently offline. Reconnecting...".to_string(),
            severity: Severity::Warning,
        });
    }

    fn set_retry_attempt(&self, attempt: u32) {
        let Some(_live) = self.live() else { return };
        self.shared.apply_retry_attempt(attempt);
    }

    fn notice(&self, message: impl Into<String>, severity: Severity) {
        let Some(_live) = self.live() else { return };
        self.shared.emit(FeedEvent::Notice {
            message: message.into(),
            severity,
        });
    }

    /// Replace the working set after a successful fetch.
    fn publish_positions(&self, positions: Vec<VehiclePosition>) {
        let Some(_live) = self.live() else { return };
        let shared = &self.shared;

        let (previous_fetch, previously_populated) = {
            let snap = shared.snapshot.borrow();
            (snap.last_fetch, !snap.positions.is_empty())
        };
        let now = Utc::now();
        let at = previous_fetch.map_or(now, |prev| prev.max(now));
        let positions: Arc<[VehiclePosition]> = positions.into();
        let now_empty = positions.is_empty();

        shared.snapshot.send_modify(|snap| {
            snap.positions = Arc::clone(&positions);
            snap.last_fetch = Some(at);
            snap.retry_attempt = 0;
        });
        shared.emit(FeedEvent::Positions { positions, at });
        shared.apply_state(ConnectionState::Online);

        if now_empty && (previously_populated || previous_fetch.is_none()) {
            shared.emit(FeedEvent::Notice {
                message: "No buses currently active".to_string(),
                severity: Severity::Info,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type Cycle = Pin<Box<dyn Future<Output = ()> + Send>>;

fn new_cycle(run: &Run) -> Cycle {
    Box::pin(run_cycle(run.clone()))
}

async fn drive(
    run: Run,
    poll_interval: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut signals: Option<broadcast::Receiver<LinkSignal>>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<Cycle> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if in_flight.is_some() {
                    tracing::debug!("previous cycle still running, skipping tick");
                } else {
                    in_flight = Some(new_cycle(&run));
                }
            }
            command = commands.recv() => match command {
                Some(Command::Refresh) => {
                    tracing::debug!("manual refresh");
                    in_flight = Some(new_cycle(&run));
                }
                None => break,
            },
            signal = next_signal(&mut signals) => match signal {
                LinkSignal::Online => {
                    run.set_state(ConnectionState::Online);
                    in_flight = Some(new_cycle(&run));
                }
                LinkSignal::Offline => {
                    in_flight = None;
                    run.mark_offline();
                }
            },
            () = finish(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
            }
        }
    }

    tracing::debug!(generation = run.generation, "feed driver exited");
}

async fn next_signal(signals: &mut Option<broadcast::Receiver<LinkSignal>>) -> LinkSignal {
    loop {
        let Some(rx) = signals.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(signal) => return signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed link signals");
            }
            Err(broadcast::error::RecvError::Closed) => *signals = None,
        }
    }
}

async fn finish(cycle: &mut Option<Cycle>) {
    match cycle {
        Some(cycle) => cycle.await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Fetch cycle
// ---------------------------------------------------------------------------

enum CycleError {
    /// The health probe failed; not retried.
    Connectivity(TransportError),
    /// The locations request failed after a good probe; retried.
    Fetch(TransportError),
}

impl CycleError {
    fn user_message(&self) -> &str {
        match self {
            Self::Connectivity(err) | Self::Fetch(err) => {
                err.message().unwrap_or(DEFAULT_FETCH_ERROR)
            }
        }
    }
}

/// One polling cycle: probe, fetch, and retry the fetch with backoff.
async fn run_cycle(run: Run) {
    let run: &Run = &run;

    let outcome = retry::retry(
        &run.shared.policy,
        move |attempt| attempt_cycle(run, attempt),
        |err: &CycleError| matches!(err, CycleError::Fetch(_)),
        move |err: &CycleError, attempt, delay: Duration| {
            run.set_retry_attempt(attempt + 1);
            run.notice(
                format!(
                    "{}. Retrying in {} seconds...",
                    err.user_message(),
                    delay.as_secs_f64()
                ),
                Severity::Warning,
            );
        },
    )
    .await;

    match outcome {
        Ok(count) => tracing::debug!(count, "cycle complete"),
        Err(CycleError::Connectivity(err)) => {
            tracing::debug!(%err, "server unreachable, cycle abandoned");
            run.set_retry_attempt(0);
        }
        Err(CycleError::Fetch(err)) => {
            tracing::warn!(%err, "giving up on this cycle after retries");
            run.set_retry_attempt(0);
            run.notice(
                "Failed to connect to server. Please check your connection.",
                Severity::Error,
            );
        }
    }
}

async fn attempt_cycle(run: &Run, attempt: u32) -> Result<usize, CycleError> {
    let transport = &run.shared.transport;

    if let Err(err) = transport.health().await {
        tracing::warn!(%err, "connectivity probe failed");
        run.set_state(ConnectionState::Offline);
        return Err(CycleError::Connectivity(err));
    }
    run.mark_reachable();

    match transport.locations().await {
        Ok(body) => {
            let positions = normalize(&body, Utc::now());
            let count = positions.len();
            run.publish_positions(positions);
            Ok(count)
        }
        Err(err) => {
            tracing::warn!(attempt, %err, "location fetch failed");
            run.set_state(ConnectionState::Error);
            Err(CycleError::Fetch(err))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
