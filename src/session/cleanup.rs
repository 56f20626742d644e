//! Cleanup scheduler — deferred, identity-guarded deletion of finished rooms.
//!
//! Each armed cleanup carries a copy of what it expects to delete: the space
//! identity and the session id that was current when the session completed.
//! At fire time both are re-checked, so a reset, a rename or a recreated
//! room turns an old timer into a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::{SpaceIdentity, Transport};
use crate::store::SessionStore;

/// What an armed cleanup is allowed to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTarget {
    pub user_id: String,
    pub space: SpaceIdentity,
    pub session_id: Uuid,
}

/// Result of one cleanup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    /// The space was already gone.
    AlreadyGone,
    /// The identity guard failed; nothing was touched.
    Skipped(&'static str),
    /// The transport refused the deletion; swallowed.
    Failed,
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Arms one deferred cleanup per user.
#[derive(Clone)]
pub struct CleanupScheduler {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    armed: Arc<Mutex<HashMap<String, Armed>>>,
    generations: Arc<AtomicU64>,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn SessionStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            armed: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fire `target` after `delay`. A cleanup already armed for the same
    /// user is replaced.
    pub fn arm(&self, target: CleanupTarget, delay: Duration) {
        let user_id = target.user_id.clone();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(&target).await;
            scheduler.disarm(&target.user_id, generation);
        });

        debug!(user_id = %user_id, delay_secs = delay.as_secs(), "Cleanup armed");
        if let Ok(mut armed) = self.armed.lock() {
            if let Some(previous) = armed.insert(user_id, Armed { generation, handle }) {
                previous.handle.abort();
            }
            armed.retain(|_, entry| !entry.handle.is_finished());
        }
    }

    /// Forget the entry for `user_id` if it is still the one from `generation`.
    fn disarm(&self, user_id: &str, generation: u64) {
        if let Ok(mut armed) = self.armed.lock() {
            if armed.get(user_id).is_some_and(|entry| entry.generation == generation) {
                armed.remove(user_id);
            }
        }
    }

    /// Whether a cleanup for `user_id` is still waiting to fire.
    pub fn is_armed(&self, user_id: &str) -> bool {
        self.armed
            .lock()
            .map(|armed| armed.get(user_id).is_some_and(|e| !e.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Number of tracked cleanup tasks.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().map(|armed| armed.len()).unwrap_or(0)
    }

    /// Run the identity check and delete now. Never returns an error:
    /// every failure is logged and swallowed.
    pub async fn fire(&self, target: &CleanupTarget) -> CleanupOutcome {
        let user_id = target.user_id.as_str();
        let space_id = target.space.space_id.as_str();

        match self.store.get_session(user_id).await {
            Ok(Some(session)) if session.session_id == target.session_id => {}
            Ok(_) => {
                debug!(user_id, space_id, "Session changed since cleanup was armed, skipping");
                return CleanupOutcome::Skipped("session reset");
            }
            Err(e) => {
                warn!(user_id, error = %e, "Cleanup could not read session, skipping");
                return CleanupOutcome::Skipped("session unreadable");
            }
        }

        let outcome = match self.transport.fetch_space(space_id).await {
            Ok(None) => CleanupOutcome::AlreadyGone,
            Ok(Some(current)) if !current.belongs_to(user_id) => {
                debug!(user_id, space_id, name = %current.name, "Space no longer bound to user, skipping");
                return CleanupOutcome::Skipped("space rebound");
            }
            Ok(Some(_)) => match self.transport.delete_space(space_id).await {
                Ok(()) => CleanupOutcome::Deleted,
                Err(e) if e.is_not_found() => CleanupOutcome::AlreadyGone,
                Err(e) => {
                    warn!(user_id, space_id, error = %e, "Cleanup deletion failed");
                    return CleanupOutcome::Failed;
                }
            },
            Err(e) => {
                warn!(user_id, space_id, error = %e, "Cleanup could not fetch space");
                return CleanupOutcome::Failed;
            }
        };

        self.forget_space(user_id, space_id).await;
        info!(user_id, space_id, outcome = ?outcome, "Cleanup fired");
        outcome
    }

    /// Drop the room binding and message handle if they still point at
    /// `space_id`.
    async fn forget_space(&self, user_id: &str, space_id: &str) {
        match self.store.get_room(user_id).await {
            Ok(Some(room)) if room.space_id == space_id => {
                if let Err(e) = self.store.clear_room(user_id).await {
                    warn!(user_id, error = %e, "Failed to clear room binding");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to read room binding"),
        }
        match self.store.get_message_handle(user_id).await {
            Ok(Some(handle)) if handle.space_id == space_id => {
                if let Err(e) = self.store.clear_message_handle(user_id).await {
                    warn!(user_id, error = %e, "Failed to clear message handle");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to read message handle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryTransport;
    use crate::store::LibSqlBackend;

    async fn scheduler() -> CleanupScheduler {
        let store: Arc<dyn SessionStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        CleanupScheduler::new(store, Arc::new(MemoryTransport::new()))
    }

    fn target(user_id: &str) -> CleanupTarget {
        CleanupTarget {
            user_id: user_id.to_string(),
            space: SpaceIdentity {
                space_id: format!("space-{user_id}"),
                name: SpaceIdentity::room_name(user_id),
                topic: SpaceIdentity::room_topic(user_id),
            },
            session_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn fired_cleanups_are_forgotten() {
        let scheduler = scheduler().await;
        scheduler.arm(target("u1"), Duration::from_millis(10));
        scheduler.arm(target("u2"), Duration::from_millis(10));
        assert_eq!(scheduler.armed_count(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduler.armed_count(), 0);
        assert!(!scheduler.is_armed("u1"));
    }

    #[tokio::test]
    async fn rearming_replaces_previous_entry() {
        let scheduler = scheduler().await;
        scheduler.arm(target("u1"), Duration::from_secs(3600));
        scheduler.arm(target("u1"), Duration::from_secs(3600));
        assert_eq!(scheduler.armed_count(), 1);
        assert!(scheduler.is_armed("u1"));
    }

    #[tokio::test]
    async fn stale_generation_does_not_disarm_replacement() {
        let scheduler = scheduler().await;
        scheduler.arm(target("u1"), Duration::from_secs(3600));
        scheduler.arm(target("u1"), Duration::from_secs(3600));

        scheduler.disarm("u1", 0);
        assert!(scheduler.is_armed("u1"));
    }

    #[tokio::test]
    async fn fire_without_session_skips() {
        let scheduler = scheduler().await;
        let outcome = scheduler.fire(&target("ghost")).await;
        assert_eq!(outcome, CleanupOutcome::Skipped("session reset"));
    }
}
