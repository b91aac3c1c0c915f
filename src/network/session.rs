//! Session Runtime
//!
//! One tokio task per session owns its [`Simulation`]. Everything outside
//! the task talks to it through a [`SessionHandle`]: requests go into an
//! mpsc inbox and are answered on oneshot channels between ticks.
//!
//! Observers get a snapshot first, then one delta per changed tick and the
//! tick's events. Sends use `try_send`; a full observer buffer never stalls
//! the tick, the observer is resynced with a fresh snapshot instead.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::hash::StateHash;
use crate::game::command::{Command, RejectReason};
use crate::game::replication::DeltaTracker;
use crate::game::state::{PlayerId, SessionPhase};
use crate::game::tick::{Admission, AdmissionError, Simulation, TickResult};
use crate::network::protocol::{ErrorCode, ServerMessage};

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Short printable form of a session id for logs.
pub fn short_id(id: &SessionId) -> String {
    hex::encode(&id[..4])
}

// =============================================================================
// CONFIG
// =============================================================================

/// Runtime settings shared by every session of a manager.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Per-observer outbound buffer (messages).
    pub observer_buffer: usize,
    /// Inbound request buffer.
    pub request_buffer: usize,
    /// Tear down after being empty this long (once someone has joined).
    pub abandon_grace: Duration,
    /// Tear down when a round has been over this long without a rematch.
    pub ended_linger: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            observer_buffer: 256,
            request_buffer: 1024,
            abandon_grace: Duration::from_secs(30),
            ended_linger: Duration::from_secs(120),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Session is full.
    #[error("Session is full")]
    SessionFull,

    /// Variant descriptor failed validation.
    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    /// No such session.
    #[error("Unknown session")]
    UnknownSession,

    /// Identity is seated, pending or has departed.
    #[error("Identity already in use")]
    IdentityInUse,

    /// Blank identity.
    #[error("Identity must not be empty")]
    EmptyIdentity,

    /// Command refused.
    #[error("Command rejected: {0}")]
    Rejected(RejectReason),

    /// Session has been torn down.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::SessionFull => ErrorCode::SessionFull,
            SessionError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            SessionError::UnknownSession => ErrorCode::UnknownSession,
            SessionError::IdentityInUse => ErrorCode::IdentityInUse,
            SessionError::EmptyIdentity | SessionError::Rejected(_) => ErrorCode::InvalidMessage,
            SessionError::Closed => ErrorCode::Closed,
        }
    }
}

impl From<AdmissionError> for SessionError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::SessionFull { .. } => SessionError::SessionFull,
            AdmissionError::IdentityInUse(_) => SessionError::IdentityInUse,
            AdmissionError::EmptyIdentity => SessionError::EmptyIdentity,
        }
    }
}

// =============================================================================
// TEARDOWN
// =============================================================================

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownCause {
    /// Requested by the owner.
    Explicit,
    /// Nobody left for the abandon grace period.
    Abandoned,
    /// Round ended and nobody asked for a rematch in time.
    EndedLinger,
    /// Manager shutting down.
    Shutdown,
}

/// One-shot teardown signal. The first cause recorded wins.
#[derive(Debug, Default)]
pub struct TeardownLatch {
    cause: OnceLock<TeardownCause>,
    notify: Notify,
}

impl TeardownLatch {
    /// Create an untriggered latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cause`. Returns `false` if a cause was already recorded.
    pub fn trigger(&self, cause: TeardownCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        if first {
            self.notify.notify_one();
        }
        first
    }

    /// Recorded cause, if any.
    pub fn cause(&self) -> Option<TeardownCause> {
        self.cause.get().copied()
    }

    /// Wait until a cause is recorded.
    pub async fn wait(&self) -> TeardownCause {
        loop {
            if let Some(cause) = self.cause() {
                return cause;
            }
            self.notify.notified().await;
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Point-in-time summary of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Variant name
    pub variant: String,
    /// Phase
    pub phase: SessionPhase,
    /// Current tick
    pub tick: u64,
    /// Seated occupants
    pub occupants: usize,
    /// Attached observers
    pub observers: usize,
    /// Authoritative state hash
    pub state_hash: StateHash,
}

/// Requests served by the session task.
#[derive(Debug)]
pub enum SessionRequest {
    /// Take or resume a seat.
    Join {
        /// Identity
        player: PlayerId,
        /// Display name
        display_name: String,
        /// Outcome
        reply: oneshot::Sender<Result<Admission, SessionError>>,
    },
    /// Queue a command for the next tick.
    Submit {
        /// Sender
        player: PlayerId,
        /// Command
        command: Command,
        /// Queue sequence or rejection
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    /// Permanent departure.
    Leave {
        /// Identity
        player: PlayerId,
    },
    /// Transport lost; seat held for the grace period.
    Disconnect {
        /// Identity
        player: PlayerId,
    },
    /// Attach an observer stream.
    Observe {
        /// Player the stream belongs to, for rejection notices
        player: Option<PlayerId>,
        /// Outbound channel
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Summary.
    Info {
        /// Summary
        reply: oneshot::Sender<SessionInfo>,
    },
}

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    requests: mpsc::Sender<SessionRequest>,
    latch: Arc<TeardownLatch>,
    observer_buffer: usize,
}

impl SessionHandle {
    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether teardown has been requested.
    pub fn is_closed(&self) -> bool {
        self.latch.cause().is_some() || self.requests.is_closed()
    }

    async fn send(&self, request: SessionRequest) -> Result<(), SessionError> {
        if self.latch.cause().is_some() {
            return Err(SessionError::Closed);
        }
        self.requests.send(request).await.map_err(|_| SessionError::Closed)
    }

    /// Ask for a seat. Takes effect at the next tick.
    pub async fn join(&self, player: PlayerId, display_name: impl Into<String>) -> Result<Admission, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Join { player, display_name: display_name.into(), reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Submit a command. Returns its queue sequence number.
    pub async fn submit(&self, player: PlayerId, command: Command) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Submit { player, command, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Leave permanently.
    pub async fn leave(&self, player: PlayerId) -> Result<(), SessionError> {
        self.send(SessionRequest::Leave { player }).await
    }

    /// Report a lost transport.
    pub async fn disconnect(&self, player: PlayerId) -> Result<(), SessionError> {
        self.send(SessionRequest::Disconnect { player }).await
    }

    /// Attach an observer. The first message is always a snapshot.
    pub async fn observe(&self, player: Option<PlayerId>) -> Result<mpsc::Receiver<ServerMessage>, SessionError> {
        let (sender, rx) = mpsc::channel(self.observer_buffer.max(1));
        self.send(SessionRequest::Observe { player, sender }).await?;
        Ok(rx)
    }

    /// Current summary.
    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Info { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Request teardown. Returns `false` if another cause got there first.
    pub fn teardown(&self, cause: TeardownCause) -> bool {
        self.latch.trigger(cause)
    }
}

// =============================================================================
// RUNNER
// =============================================================================

struct Observer {
    player: Option<PlayerId>,
    sender: mpsc::Sender<ServerMessage>,
    needs_resync: bool,
    closed: bool,
}

impl Observer {
    /// Non-blocking send; a full buffer flags the observer for resync.
    fn push(&mut self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.needs_resync {
                    debug!(player = ?self.player, "Observer buffer full; will resync");
                }
                self.needs_resync = true;
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.closed = true;
                false
            }
        }
    }
}

/// Spawn the task for one session.
pub fn spawn_session(
    id: SessionId,
    sim: Simulation,
    config: RunnerConfig,
) -> (SessionHandle, tokio::task::JoinHandle<TeardownCause>) {
    let (tx, rx) = mpsc::channel(config.request_buffer.max(1));
    let latch = Arc::new(TeardownLatch::new());
    let handle = SessionHandle { id, requests: tx, latch: latch.clone(), observer_buffer: config.observer_buffer };

    info!(session = %short_id(&id), variant = %sim.variant().name, "Session created");
    let task = tokio::spawn(run_session(id, sim, config, rx, latch));
    (handle, task)
}

struct Runner {
    id: SessionId,
    sim: Simulation,
    config: RunnerConfig,
    tracker: DeltaTracker,
    observers: Vec<Observer>,
    had_occupants: bool,
    empty_since: Option<Instant>,
    ended_since: Option<Instant>,
}

/// Session task body. Returns the cause it stopped for.
pub async fn run_session(
    id: SessionId,
    sim: Simulation,
    config: RunnerConfig,
    mut requests: mpsc::Receiver<SessionRequest>,
    latch: Arc<TeardownLatch>,
) -> TeardownCause {
    let tick_duration = Duration::from_secs_f64(sim.variant().dt());
    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let tracker = DeltaTracker::new(sim.state(), sim.variant());
    let mut runner = Runner {
        id,
        sim,
        config,
        tracker,
        observers: Vec::new(),
        had_occupants: false,
        empty_since: None,
        ended_since: None,
    };

    let cause = loop {
        tokio::select! {
            biased;

            cause = latch.wait() => break cause,

            request = requests.recv() => match request {
                Some(request) => runner.handle(request),
                None => {
                    // Every handle dropped.
                    latch.trigger(TeardownCause::Explicit);
                }
            },

            _ = ticker.tick() => {
                let result = runner.sim.tick();
                runner.publish(result);
                if let Some(cause) = runner.idle_cause(Instant::now()) {
                    latch.trigger(cause);
                }
            }
        }
    };

    runner.close(cause, &mut requests);
    cause
}

impl Runner {
    fn handle(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Join { player, display_name, reply } => {
                let outcome = self.sim.admit(player, display_name).map_err(SessionError::from);
                if let Err(err) = &outcome {
                    debug!(session = %short_id(&self.id), %err, "Join refused");
                }
                let _ = reply.send(outcome);
            }
            SessionRequest::Submit { player, command, reply } => {
                let outcome = self.sim.submit(&player, command).map_err(SessionError::Rejected);
                let _ = reply.send(outcome);
            }
            SessionRequest::Leave { player } => self.sim.leave(&player),
            SessionRequest::Disconnect { player } => self.sim.disconnect(&player),
            SessionRequest::Observe { player, sender } => self.attach(player, sender),
            SessionRequest::Info { reply } => {
                let _ = reply.send(self.info());
            }
        }
    }

    /// Register an observer, starting it with the current snapshot.
    fn attach(&mut self, player: Option<PlayerId>, sender: mpsc::Sender<ServerMessage>) {
        let mut observer = Observer { player, sender, needs_resync: false, closed: false };
        let snapshot = Box::new(self.tracker.baseline().clone());
        if !observer.push(ServerMessage::Snapshot { snapshot }) {
            observer.needs_resync = true;
        }
        if !observer.closed {
            self.observers.push(observer);
        }
    }

    fn info(&self) -> SessionInfo {
        let state = self.sim.state();
        SessionInfo {
            id: self.id,
            variant: self.sim.variant().name.clone(),
            phase: state.phase,
            tick: state.tick,
            occupants: state.occupant_count(),
            observers: self.observers.len(),
            state_hash: state.compute_hash(),
        }
    }

    /// Fan the tick's outcome out to observers.
    fn publish(&mut self, result: TickResult) {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(
            session = %short_id(&self.id),
            tick = result.tick,
            events = result.events.len(),
            rejected = result.rejected.len(),
            removed = result.removed.len(),
            "Tick"
        );

        if !result.integrity.is_empty() {
            warn!(session = %short_id(&self.id), repairs = result.integrity.len(), "Integrity repairs applied");
        }

        let delta = self.tracker.update(self.sim.state(), self.sim.variant());
        let baseline = self.tracker.baseline();

        for observer in &mut self.observers {
            if observer.needs_resync {
                let snapshot = Box::new(baseline.clone());
                if observer.sender.try_send(ServerMessage::Snapshot { snapshot }).is_ok() {
                    observer.needs_resync = false;
                }
            } else if let Some(delta) = &delta {
                observer.push(ServerMessage::Delta { delta: Box::new(delta.clone()) });
            }

            for event in &result.events {
                observer.push(ServerMessage::Event { event: event.clone() });
            }

            if let Some(player) = observer.player.clone() {
                for rejection in result.rejected.iter().filter(|r| r.player == player) {
                    observer.push(ServerMessage::rejected(&rejection.command, rejection.reason.clone()));
                }
            }

            if observer.sender.is_closed() {
                observer.closed = true;
            }
        }
        self.observers.retain(|o| !o.closed);
    }

    /// Abandonment and ended-linger checks.
    fn idle_cause(&mut self, now: Instant) -> Option<TeardownCause> {
        let state = self.sim.state();

        if state.occupant_count() > 0 {
            self.had_occupants = true;
            self.empty_since = None;
        } else if self.had_occupants {
            let since = *self.empty_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.abandon_grace {
                return Some(TeardownCause::Abandoned);
            }
        }

        if state.phase == SessionPhase::Ended {
            let since = *self.ended_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.ended_linger {
                return Some(TeardownCause::EndedLinger);
            }
        } else {
            self.ended_since = None;
        }

        None
    }

    /// Cancel timers and tell every observer, once.
    ///
    /// Requests still in the inbox are settled first: observers are
    /// attached so they see the close, joins and submits get `Closed`.
    fn close(&mut self, cause: TeardownCause, requests: &mut mpsc::Receiver<SessionRequest>) {
        requests.close();
        while let Ok(request) = requests.try_recv() {
            match request {
                SessionRequest::Join { reply, .. } => {
                    let _ = reply.send(Err(SessionError::Closed));
                }
                SessionRequest::Submit { reply, .. } => {
                    let _ = reply.send(Err(SessionError::Closed));
                }
                SessionRequest::Observe { player, sender } => self.attach(player, sender),
                SessionRequest::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                SessionRequest::Leave { .. } | SessionRequest::Disconnect { .. } => {}
            }
        }

        let cancelled = self.sim.shutdown();
        for observer in self.observers.drain(..) {
            // A full buffer still gets its close notice once it drains.
            if let Err(TrySendError::Full(message)) = observer.sender.try_send(ServerMessage::SessionClosed { cause }) {
                let sender = observer.sender;
                tokio::spawn(async move {
                    let _ = sender.send(message).await;
                });
            }
        }
        info!(
            session = %short_id(&self.id),
            ?cause,
            tick = self.sim.current_tick(),
            cancelled_timers = cancelled,
            "Session torn down"
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tick::Rejection;
    use crate::game::variant::GameVariant;

    fn pid(name: &str) -> PlayerId {
        PlayerId::new(name)
    }

    fn start(variant: GameVariant, config: RunnerConfig) -> (SessionHandle, tokio::task::JoinHandle<TeardownCause>) {
        let sim = Simulation::new(variant, 11).unwrap();
        spawn_session([7; 16], sim, config)
    }

    async fn wait_for(handle: &SessionHandle, mut done: impl FnMut(&SessionInfo) -> bool) -> SessionInfo {
        loop {
            let info = handle.info().await.unwrap();
            if done(&info) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_latch_first_cause_wins() {
        let latch = TeardownLatch::new();
        assert!(latch.trigger(TeardownCause::Abandoned));
        assert!(!latch.trigger(TeardownCause::Shutdown));
        assert_eq!(latch.cause(), Some(TeardownCause::Abandoned));
    }

    #[tokio::test]
    async fn test_latch_wakes_waiter() {
        let latch = Arc::new(TeardownLatch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::task::yield_now().await;
        latch.trigger(TeardownCause::EndedLinger);
        assert_eq!(waiter.await.unwrap(), TeardownCause::EndedLinger);
    }

    #[tokio::test]
    async fn test_join_and_start() {
        let (handle, _task) = start(GameVariant::racing(), RunnerConfig::default());

        let a = handle.join(pid("a"), "A").await.unwrap();
        assert!(a.entity.is_some());
        handle.join(pid("b"), "B").await.unwrap();

        let info = wait_for(&handle, |i| i.phase == SessionPhase::Playing).await;
        assert_eq!(info.occupants, 2);
        handle.teardown(TeardownCause::Explicit);
    }

    #[tokio::test]
    async fn test_session_full_and_identity() {
        let mut variant = GameVariant::racing();
        variant.rules.max_occupants = 2;
        let (handle, _task) = start(variant, RunnerConfig::default());

        handle.join(pid("a"), "A").await.unwrap();
        assert_eq!(handle.join(pid("a"), "A").await.unwrap_err(), SessionError::IdentityInUse);
        handle.join(pid("b"), "B").await.unwrap();
        assert_eq!(handle.join(pid("c"), "C").await.unwrap_err(), SessionError::SessionFull);
        assert_eq!(handle.join(pid(""), "?").await.unwrap_err(), SessionError::EmptyIdentity);
        handle.teardown(TeardownCause::Explicit);
    }

    #[tokio::test]
    async fn test_submit_rejected_immediately() {
        let (handle, _task) = start(GameVariant::racing(), RunnerConfig::default());
        let err = handle.submit(pid("ghost"), Command::Fire).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
        handle.teardown(TeardownCause::Explicit);
    }

    #[tokio::test]
    async fn test_observer_reconstructs_state() {
        let (handle, _task) = start(GameVariant::slicer(), RunnerConfig::default());
        let mut rx = handle.observe(None).await.unwrap();

        let mut view = match rx.recv().await {
            Some(ServerMessage::Snapshot { snapshot }) => *snapshot,
            other => panic!("expected snapshot first, got {other:?}"),
        };

        handle.join(pid("a"), "A").await.unwrap();
        wait_for(&handle, |i| i.phase == SessionPhase::Playing && i.tick > 40).await;

        let mut saw_join = false;
        while let Ok(message) = rx.try_recv() {
            match message {
                ServerMessage::Delta { delta } => delta.apply(&mut view).unwrap(),
                ServerMessage::Snapshot { snapshot } => view = *snapshot,
                ServerMessage::Event { event } => saw_join |= event.kind() == "occupant_joined",
                _ => {}
            }
        }
        assert!(saw_join);
        assert!(view.players.contains_key(&pid("a")));
        assert_eq!(view.session.phase, SessionPhase::Playing);
        handle.teardown(TeardownCause::Explicit);
    }

    #[tokio::test]
    async fn test_slow_observer_gets_resynced() {
        let config = RunnerConfig { observer_buffer: 2, ..RunnerConfig::default() };
        let (handle, _task) = start(GameVariant::slicer(), config);
        let mut rx = handle.observe(None).await.unwrap();
        handle.join(pid("a"), "A").await.unwrap();

        // Let the buffer overflow while the session keeps ticking
        wait_for(&handle, |i| i.tick > 30).await;
        let mut snapshots = 0;
        for _ in 0..40 {
            while let Ok(message) = rx.try_recv() {
                if matches!(message, ServerMessage::Snapshot { .. }) {
                    snapshots += 1;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            if snapshots >= 2 {
                break;
            }
        }
        assert!(snapshots >= 2, "expected a resync snapshot, saw {snapshots}");
        handle.teardown(TeardownCause::Explicit);
    }

    #[tokio::test]
    async fn test_teardown_notifies_once() {
        let (handle, task) = start(GameVariant::billiards(), RunnerConfig::default());
        let mut rx = handle.observe(None).await.unwrap();

        assert!(handle.teardown(TeardownCause::Explicit));
        assert!(!handle.teardown(TeardownCause::Shutdown));
        assert_eq!(task.await.unwrap(), TeardownCause::Explicit);

        let mut closed = Vec::new();
        while let Some(message) = rx.recv().await {
            if let ServerMessage::SessionClosed { cause } = message {
                closed.push(cause);
            }
        }
        assert_eq!(closed, vec![TeardownCause::Explicit]);
        assert_eq!(handle.join(pid("a"), "A").await.unwrap_err(), SessionError::Closed);
    }

    #[tokio::test]
    async fn test_queued_requests_settled_at_teardown() {
        let sim = Simulation::new(GameVariant::racing(), 3).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let latch = Arc::new(TeardownLatch::new());

        let (observer_tx, mut observer_rx) = mpsc::channel(8);
        tx.send(SessionRequest::Observe { player: None, sender: observer_tx }).await.unwrap();
        let (reply, join_rx) = oneshot::channel();
        tx.send(SessionRequest::Join { player: pid("late"), display_name: "Late".into(), reply }).await.unwrap();
        latch.trigger(TeardownCause::Shutdown);

        let cause = run_session([1; 16], sim, RunnerConfig::default(), rx, latch).await;
        assert_eq!(cause, TeardownCause::Shutdown);
        assert_eq!(join_rx.await.unwrap(), Err(SessionError::Closed));

        let mut messages = Vec::new();
        while let Some(message) = observer_rx.recv().await {
            messages.push(message);
        }
        assert!(matches!(messages.first(), Some(ServerMessage::Snapshot { .. })));
        let closed = messages.iter().filter(|m| matches!(m, ServerMessage::SessionClosed { .. })).count();
        assert_eq!(closed, 1);
        assert_eq!(messages.last(), Some(&ServerMessage::SessionClosed { cause: TeardownCause::Shutdown }));
        assert!(tx.send(SessionRequest::Leave { player: pid("late") }).await.is_err());
    }

    #[test]
    fn test_rejections_routed_to_owner() {
        let sim = Simulation::new(GameVariant::billiards(), 5).unwrap();
        let tracker = DeltaTracker::new(sim.state(), sim.variant());
        let mut runner = Runner {
            id: [2; 16],
            sim,
            config: RunnerConfig::default(),
            tracker,
            observers: Vec::new(),
            had_occupants: false,
            empty_since: None,
            ended_since: None,
        };
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        runner.attach(Some(pid("a")), a_tx);
        runner.attach(Some(pid("b")), b_tx);

        runner.publish(TickResult {
            tick: 1,
            rejected: vec![Rejection { player: pid("a"), command: Command::Fire, reason: RejectReason::NotAnOccupant }],
            ..TickResult::default()
        });

        let to_a: Vec<_> = std::iter::from_fn(|| a_rx.try_recv().ok()).collect();
        let to_b: Vec<_> = std::iter::from_fn(|| b_rx.try_recv().ok()).collect();
        assert!(to_a.iter().any(|m| matches!(m, ServerMessage::Rejected { command, .. } if command == "fire")));
        assert!(!to_b.iter().any(|m| matches!(m, ServerMessage::Rejected { .. })));
    }

    #[test]
    fn test_error_codes_follow_errors() {
        assert_eq!(SessionError::SessionFull.code(), ErrorCode::SessionFull);
        assert_eq!(SessionError::InvalidConfig("x".into()).code(), ErrorCode::InvalidConfig);
        assert_eq!(SessionError::EmptyIdentity.code(), ErrorCode::InvalidMessage);
        assert_eq!(SessionError::Closed.code(), ErrorCode::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_after_last_departure() {
        let config = RunnerConfig { abandon_grace: Duration::from_millis(50), ..RunnerConfig::default() };
        let (handle, task) = start(GameVariant::racing(), config);

        handle.join(pid("a"), "A").await.unwrap();
        wait_for(&handle, |i| i.occupants == 1).await;
        handle.leave(pid("a")).await.unwrap();

        assert_eq!(task.await.unwrap(), TeardownCause::Abandoned);
    }

    #[tokio::test]
    async fn test_ended_linger() {
        let mut variant = GameVariant::slicer();
        variant.rules.round_ticks = Some(3);
        let config = RunnerConfig { ended_linger: Duration::from_millis(50), ..RunnerConfig::default() };
        let (handle, task) = start(variant, config);

        handle.join(pid("a"), "A").await.unwrap();
        assert_eq!(task.await.unwrap(), TeardownCause::EndedLinger);
    }

    #[tokio::test]
    async fn test_observer_starts_with_snapshot() {
        let (handle, _task) = start(GameVariant::billiards(), RunnerConfig::default());
        let info = handle.info().await.unwrap();
        assert_eq!(info.variant, "billiards");

        let mut rx = handle.observe(None).await.unwrap();
        let first = rx.recv().await;
        assert!(matches!(first, Some(ServerMessage::Snapshot { snapshot }) if snapshot.session.variant == "billiards"));
        handle.teardown(TeardownCause::Explicit);
    }
}
