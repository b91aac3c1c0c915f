//! Session Manager
//!
//! Creates sessions, routes requests to them by id and tears them down.
//! Sessions share nothing; the manager only holds their handles.

use std::collections::BTreeMap;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::rng::derive_session_seed;
use crate::game::command::Command;
use crate::game::entity::ObjectId;
use crate::game::state::PlayerId;
use crate::game::tick::{Admission, Simulation};
use crate::game::variant::GameVariant;
use crate::network::protocol::ServerMessage;
use crate::network::session::{
    short_id, spawn_session, RunnerConfig, SessionError, SessionHandle, SessionId, SessionInfo, TeardownCause,
};

/// Where an accepted join landed.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReceipt {
    /// Session the occupant is seated in
    pub session: SessionId,
    /// Entity the occupant controls, if the variant assigns one
    pub entity: Option<ObjectId>,
    /// Resumed a disconnected seat
    pub reconnected: bool,
}

struct SessionEntry {
    handle: SessionHandle,
    task: JoinHandle<TeardownCause>,
}

/// Manages all active sessions.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<SessionId, SessionEntry>>,
    /// Runtime settings for new sessions.
    config: RunnerConfig,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new(config: RunnerConfig) -> Self {
        Self { sessions: RwLock::new(BTreeMap::new()), config }
    }

    /// Create a session with a seed derived from its id.
    pub async fn create_session(&self, variant: GameVariant) -> Result<SessionId, SessionError> {
        let id = uuid::Uuid::new_v4().into_bytes();
        let seed = derive_session_seed(&id, &variant.name);
        self.create_with_id(id, variant, seed).await
    }

    /// Create a session with an explicit seed (replays, tests).
    pub async fn create_seeded(&self, variant: GameVariant, seed: u64) -> Result<SessionId, SessionError> {
        let id = uuid::Uuid::new_v4().into_bytes();
        self.create_with_id(id, variant, seed).await
    }

    async fn create_with_id(&self, id: SessionId, variant: GameVariant, seed: u64) -> Result<SessionId, SessionError> {
        let sim = Simulation::new(variant, seed).map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        let (handle, task) = spawn_session(id, sim, self.config.clone());

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, SessionEntry { handle, task });
        Ok(id)
    }

    /// Handle for a session.
    pub async fn handle(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|e| e.handle.clone()).ok_or(SessionError::UnknownSession)
    }

    /// Seat `player` somewhere.
    ///
    /// With a variant, a new session is created for it. Without one, the
    /// first running session (in id order) with room takes the player.
    pub async fn join(
        &self,
        player: PlayerId,
        display_name: &str,
        variant: Option<GameVariant>,
    ) -> Result<JoinReceipt, SessionError> {
        if let Some(variant) = variant {
            let id = self.create_session(variant).await?;
            return match self.join_session(&id, player, display_name).await {
                Ok(admission) => Ok(receipt(id, admission)),
                Err(err) => {
                    // Nobody will ever sit in it.
                    let _ = self.teardown(&id).await;
                    Err(err)
                }
            };
        }

        let open: Vec<SessionHandle> = {
            let sessions = self.sessions.read().await;
            sessions.values().filter(|e| !e.handle.is_closed()).map(|e| e.handle.clone()).collect()
        };
        for handle in open {
            match handle.join(player.clone(), display_name).await {
                Ok(admission) => return Ok(receipt(handle.id(), admission)),
                Err(SessionError::SessionFull | SessionError::Closed) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(SessionError::SessionFull)
    }

    /// Join a specific session.
    pub async fn join_session(&self, id: &SessionId, player: PlayerId, display_name: &str) -> Result<Admission, SessionError> {
        let admission = self.handle(id).await?.join(player, display_name).await?;
        info!(session = %short_id(id), player = %admission.player, reconnected = admission.reconnected, "Seat assigned");
        Ok(admission)
    }

    /// Submit a command to a session.
    pub async fn submit(&self, id: &SessionId, player: PlayerId, command: Command) -> Result<u64, SessionError> {
        self.handle(id).await?.submit(player, command).await
    }

    /// Leave a session permanently.
    pub async fn leave(&self, id: &SessionId, player: PlayerId) -> Result<(), SessionError> {
        self.handle(id).await?.leave(player).await
    }

    /// Report a lost transport.
    pub async fn disconnect(&self, id: &SessionId, player: PlayerId) -> Result<(), SessionError> {
        self.handle(id).await?.disconnect(player).await
    }

    /// Attach an observer stream.
    pub async fn observe(
        &self,
        id: &SessionId,
        player: Option<PlayerId>,
    ) -> Result<mpsc::Receiver<ServerMessage>, SessionError> {
        self.handle(id).await?.observe(player).await
    }

    /// Session summary.
    pub async fn info(&self, id: &SessionId) -> Result<SessionInfo, SessionError> {
        self.handle(id).await?.info().await
    }

    /// Tear a session down and wait for it to stop.
    pub async fn teardown(&self, id: &SessionId) -> Result<TeardownCause, SessionError> {
        let entry = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id).ok_or(SessionError::UnknownSession)?
        };
        entry.handle.teardown(TeardownCause::Explicit);
        entry.task.await.map_err(|_| SessionError::Closed)
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Drop sessions whose task has finished. Returns how many.
    pub async fn cleanup(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.task.is_finished());
        before - sessions.len()
    }

    /// Stop every session and wait for them.
    pub async fn shutdown(&self) -> Vec<(SessionId, TeardownCause)> {
        let entries: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            std::mem::take(&mut *sessions).into_iter().collect()
        };

        for (_, entry) in &entries {
            entry.handle.teardown(TeardownCause::Shutdown);
        }

        let mut stopped = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            if let Ok(cause) = entry.task.await {
                stopped.push((id, cause));
            }
        }
        info!(sessions = stopped.len(), "Session manager shut down");
        stopped
    }
}

fn receipt(session: SessionId, admission: Admission) -> JoinReceipt {
    JoinReceipt { session, entity: admission.entity, reconnected: admission.reconnected }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::game::state::SessionPhase;

    fn pid(name: &str) -> PlayerId {
        PlayerId::new(name)
    }

    #[tokio::test]
    async fn test_session_manager() {
        let manager = SessionManager::default();
        let a = manager.create_session(GameVariant::racing()).await.unwrap();
        let b = manager.create_session(GameVariant::slicer()).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(manager.session_count().await, 2);
        assert_eq!(manager.info(&b).await.unwrap().variant, "slicer");

        manager.shutdown().await;
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_variant_refused() {
        let manager = SessionManager::default();
        let mut variant = GameVariant::racing();
        variant.rules.min_occupants = 9;

        let err = manager.create_session(variant).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = SessionManager::default();
        let err = manager.join_session(&[9; 16], pid("a"), "A").await.unwrap_err();
        assert_eq!(err, SessionError::UnknownSession);
        assert_eq!(manager.teardown(&[9; 16]).await.unwrap_err(), SessionError::UnknownSession);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::default();
        let a = manager.create_seeded(GameVariant::racing(), 1).await.unwrap();
        let b = manager.create_seeded(GameVariant::racing(), 1).await.unwrap();

        manager.join_session(&a, pid("p"), "P").await.unwrap();
        manager.join_session(&b, pid("p"), "P").await.unwrap();
        manager.join_session(&a, pid("q"), "Q").await.unwrap();

        loop {
            let info = manager.info(&a).await.unwrap();
            if info.phase == SessionPhase::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let other = manager.info(&b).await.unwrap();
        assert_eq!(other.phase, SessionPhase::Waiting);
        assert_eq!(other.occupants, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_teardown_and_cleanup() {
        let manager = SessionManager::new(RunnerConfig {
            ended_linger: Duration::from_millis(30),
            ..RunnerConfig::default()
        });
        let explicit = manager.create_session(GameVariant::billiards()).await.unwrap();
        assert_eq!(manager.teardown(&explicit).await.unwrap(), TeardownCause::Explicit);
        assert_eq!(manager.session_count().await, 0);

        let mut variant = GameVariant::slicer();
        variant.rules.round_ticks = Some(2);
        let lingering = manager.create_session(variant).await.unwrap();
        manager.join_session(&lingering, pid("a"), "A").await.unwrap();

        let mut removed = 0;
        for _ in 0..200 {
            removed = manager.cleanup().await;
            if removed > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(removed, 1);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_with_config_creates_session() {
        let manager = SessionManager::default();
        let first = manager.join(pid("a"), "A", Some(GameVariant::racing())).await.unwrap();
        assert!(first.entity.is_some());
        assert!(!first.reconnected);
        assert_eq!(manager.session_count().await, 1);
        assert_eq!(manager.info(&first.session).await.unwrap().variant, "racing");

        // No config: seated in the running session
        let second = manager.join(pid("b"), "B", None).await.unwrap();
        assert_eq!(second.session, first.session);
        assert_ne!(second.entity, first.entity);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_join_with_malformed_config() {
        let manager = SessionManager::default();
        let mut variant = GameVariant::billiards();
        variant.tick_rate = 0;

        let err = manager.join(pid("a"), "A", Some(variant)).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_without_room() {
        let manager = SessionManager::default();
        assert_eq!(manager.join(pid("a"), "A", None).await.unwrap_err(), SessionError::SessionFull);

        let mut variant = GameVariant::slicer();
        variant.rules.max_occupants = 1;
        manager.join(pid("a"), "A", Some(variant)).await.unwrap();
        assert_eq!(manager.join(pid("b"), "B", None).await.unwrap_err(), SessionError::SessionFull);

        // A failed seat does not leave an empty session behind
        let err = manager.join(pid(""), "?", Some(GameVariant::racing())).await.unwrap_err();
        assert_eq!(err, SessionError::EmptyIdentity);
        assert_eq!(manager.session_count().await, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_reports_causes() {
        let manager = SessionManager::default();
        manager.create_session(GameVariant::racing()).await.unwrap();
        manager.create_session(GameVariant::billiards()).await.unwrap();

        let stopped = manager.shutdown().await;
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|(_, cause)| *cause == TeardownCause::Shutdown));
    }
}
