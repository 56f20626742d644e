//! SessionEngine — drives each user through their questionnaire.
//!
//! Every state transition for a user runs under that user's lock, and every
//! answer goes through the store's compare-and-set `record_answer`, so a
//! duplicated or replayed button press can never advance a session twice.
//! The user's single prompt message is edited in place on each transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::channels::{MessageHandle, OutgoingPrompt, SpaceIdentity, Transport};
use crate::error::{Result, SessionError};
use crate::matching::{Profile, RankedMatch, build_profile, rank_top};
use crate::store::{SessionCounts, SessionRecord, SessionStore};

use super::cleanup::{CleanupScheduler, CleanupTarget};
use super::order::OrderGenerator;
use super::render;
use super::state::{SessionPhase, SessionStatus};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay before a completed room is deleted.
    pub auto_close: Duration,
    /// Matches returned by a ranking request.
    pub top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_close: Duration::from_secs(300),
            top_k: 3,
        }
    }
}

/// Why a submission changed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The event answers a question other than the current one.
    StaleIndex { claimed: usize, current: usize },
    AlreadyComplete,
}

/// Result of an answer submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Answer recorded; `index` is the new progress.
    Advanced { index: usize },
    /// Answer recorded and the session just completed.
    Completed { profile: Profile },
    /// Duplicate or stale event, absorbed.
    Ignored { reason: IgnoreReason },
}

/// Result of a room request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOutcome {
    pub space: SpaceIdentity,
    /// `false` when an existing room was reused.
    pub created: bool,
}

/// Operator summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    #[serde(flatten)]
    pub sessions: SessionCounts,
    pub rooms: usize,
}

type UserLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Holds one user's lock; the map entry goes away with the last holder.
struct UserGuard<'a> {
    locks: &'a UserLocks,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(self.guard.take());
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// The session state machine.
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    catalog: Arc<Catalog>,
    orders: OrderGenerator,
    cleanup: CleanupScheduler,
    config: EngineConfig,
    locks: UserLocks,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn Transport>,
        catalog: Arc<Catalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            orders: OrderGenerator::new(Arc::clone(&store)),
            cleanup: CleanupScheduler::new(Arc::clone(&store), Arc::clone(&transport)),
            store,
            transport,
            catalog,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    /// Serialize all transitions for one user. Other users never wait.
    async fn lock_user(&self, user_id: &str) -> UserGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        UserGuard {
            locks: &self.locks,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    // ── Answers ─────────────────────────────────────────────────────

    /// Apply one answer event.
    ///
    /// The persisted progress is authoritative: an event whose
    /// `claimed_index` differs from it is a duplicate or stale delivery and
    /// is absorbed, after re-publishing the current view so a retry after a
    /// failed publish still heals the chat surface.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        claimed_index: usize,
        letter: &str,
    ) -> Result<SubmitOutcome> {
        let _guard = self.lock_user(user_id).await;

        let order = self
            .orders
            .get_or_create_order(user_id, &self.catalog.ids())
            .await?;
        let session = self.store.ensure_session(user_id).await?;
        let current = session.progress;

        if current >= order.len() {
            if session.completion_pending {
                let profile = self.complete(user_id, &session).await?;
                return Ok(SubmitOutcome::Completed { profile });
            }
            debug!(user_id, "Answer after completion ignored");
            self.refresh(user_id, &order, current).await?;
            return Ok(SubmitOutcome::Ignored {
                reason: IgnoreReason::AlreadyComplete,
            });
        }
        if claimed_index != current {
            debug!(user_id, claimed_index, current, "Stale answer ignored");
            self.refresh(user_id, &order, current).await?;
            return Ok(SubmitOutcome::Ignored {
                reason: IgnoreReason::StaleIndex {
                    claimed: claimed_index,
                    current,
                },
            });
        }

        let question_id = order[current];
        let question = self.catalog.by_id(question_id)?;
        if !question.has_choice(letter) {
            return Err(SessionError::InvalidChoice {
                question_id,
                letter: letter.to_string(),
            }
            .into());
        }

        let next = current + 1;
        let completes = next >= order.len();
        if !self
            .store
            .record_answer(user_id, current, question_id, letter, completes)
            .await?
        {
            // Another writer advanced the row between our read and the CAS.
            let now = self.store.get_progress(user_id).await?;
            return Ok(SubmitOutcome::Ignored {
                reason: IgnoreReason::StaleIndex {
                    claimed: claimed_index,
                    current: now,
                },
            });
        }

        if completes {
            let profile = self.complete(user_id, &session).await?;
            return Ok(SubmitOutcome::Completed { profile });
        }

        self.publish_question(user_id, &order, next).await?;
        Ok(SubmitOutcome::Advanced { index: next })
    }

    /// The COMPLETE transition: arm cleanup, unlock the room and replace
    /// the prompt with the summary.
    ///
    /// Runs while the session's `completion_pending` flag is set and clears
    /// it only after every effect succeeded, so a failed attempt is finished
    /// by the next retry or resume.
    async fn complete(&self, user_id: &str, session: &SessionRecord) -> Result<Profile> {
        let profile = build_profile(self.store.as_ref(), &self.catalog, user_id).await?;

        if let Some(room) = self.live_room(user_id).await? {
            self.cleanup.arm(
                CleanupTarget {
                    user_id: user_id.to_string(),
                    space: room.clone(),
                    session_id: session.session_id,
                },
                self.config.auto_close,
            );
            self.transport.unlock_space(&room.space_id, user_id).await?;
            self.show_summary(user_id, &room, &profile).await?;
        } else {
            debug!(user_id, "No room bound, completion effects skipped");
        }

        self.store.clear_completion_pending(user_id).await?;
        info!(user_id, session_id = %session.session_id, "Session completed");
        Ok(profile)
    }

    async fn show_summary(&self, user_id: &str, room: &SpaceIdentity, profile: &Profile) -> Result<()> {
        let summary =
            render::completion_summary(&self.catalog, profile, Some(self.config.auto_close));
        self.publish(user_id, &room.space_id, &summary).await?;
        Ok(())
    }

    /// Re-publish whatever the session should currently show.
    async fn refresh(&self, user_id: &str, order: &[u32], index: usize) -> Result<()> {
        if index < order.len() {
            return self.publish_question(user_id, order, index).await;
        }
        let Some(room) = self.store.get_room(user_id).await? else {
            return Ok(());
        };
        let profile = build_profile(self.store.as_ref(), &self.catalog, user_id).await?;
        self.show_summary(user_id, &room, &profile).await
    }

    async fn publish_question(&self, user_id: &str, order: &[u32], index: usize) -> Result<()> {
        let Some(room) = self.store.get_room(user_id).await? else {
            debug!(user_id, index, "No room bound, prompt not published");
            return Ok(());
        };
        let question = self.catalog.by_id(order[index])?;
        let prompt = render::question_prompt(question, index, order.len());
        self.publish(user_id, &room.space_id, &prompt).await?;
        Ok(())
    }

    /// Single-message protocol: edit the tracked message, or create one and
    /// track it.
    async fn publish(
        &self,
        user_id: &str,
        space_id: &str,
        prompt: &OutgoingPrompt,
    ) -> Result<MessageHandle> {
        let current = self.store.get_message_handle(user_id).await?;
        let handle = self
            .transport
            .publish_or_edit(space_id, current.as_ref(), prompt)
            .await?;
        if current.as_ref() != Some(&handle) {
            self.store.set_message_handle(user_id, &handle).await?;
            debug!(user_id, space_id, message_id = %handle.message_id, "Tracking new prompt message");
        }
        Ok(handle)
    }

    // ── Status and ranking ──────────────────────────────────────────

    /// Read-only snapshot; does not create any state.
    pub async fn request_status(&self, user_id: &str) -> Result<SessionStatus> {
        let progress = self
            .store
            .get_session(user_id)
            .await?
            .map_or(0, |s| s.progress);
        let order = self.store.get_order(user_id).await?;
        let total = order.as_ref().map_or(self.catalog.len(), Vec::len);

        Ok(SessionStatus {
            user_id: user_id.to_string(),
            phase: SessionPhase::derive(progress, order.as_ref().map(Vec::len)),
            answered: progress.min(total),
            total,
        })
    }

    /// Top matches among completed users. The requester must be complete.
    pub async fn request_ranking(&self, user_id: &str) -> Result<Vec<RankedMatch>> {
        let total = self.catalog.len();
        let answered = self
            .store
            .get_session(user_id)
            .await?
            .map_or(0, |s| s.progress);
        if answered < total {
            return Err(SessionError::Incomplete {
                user_id: user_id.to_string(),
                answered,
                total,
            }
            .into());
        }

        let candidates = self.store.completed_users(total).await?;
        let ranked = rank_top(
            self.store.as_ref(),
            &self.catalog,
            user_id,
            &candidates,
            self.config.top_k,
        )
        .await?;
        Ok(ranked)
    }

    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            sessions: self.store.count_sessions(self.catalog.len()).await?,
            rooms: self.store.count_rooms().await?,
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Wipe progress, answers, order and message handle. If the user has a
    /// room, the old prompt loses its buttons and a fresh first question
    /// is published.
    pub async fn reset_session(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock_user(user_id).await;
        self.reset_locked(user_id).await?;

        if self.store.get_room(user_id).await?.is_some() {
            let order = self
                .orders
                .get_or_create_order(user_id, &self.catalog.ids())
                .await?;
            self.store.ensure_session(user_id).await?;
            self.publish_question(user_id, &order, 0).await?;
        }
        Ok(())
    }

    async fn reset_locked(&self, user_id: &str) -> Result<()> {
        if let Some(handle) = self.store.get_message_handle(user_id).await? {
            let note = OutgoingPrompt::text("This session was reset.");
            if let Err(e) = self.transport.edit_message(&handle, &note).await {
                debug!(user_id, error = %e, "Could not retire old prompt");
            }
        }
        self.store.reset(user_id).await?;
        self.orders.reset_order(user_id).await?;
        self.store.clear_message_handle(user_id).await?;
        info!(user_id, "Session reset");
        Ok(())
    }

    /// Find or create the user's room. A new room starts a fresh session
    /// with its first question; an existing one is only reported.
    pub async fn open_room(&self, user_id: &str) -> Result<RoomOutcome> {
        let _guard = self.lock_user(user_id).await;

        if let Some(space) = self.live_room(user_id).await? {
            debug!(user_id, space_id = %space.space_id, "Room already open");
            return Ok(RoomOutcome {
                space,
                created: false,
            });
        }

        let space = self.transport.create_space(user_id).await?;
        self.store.set_room(user_id, &space).await?;
        info!(user_id, space_id = %space.space_id, "Room opened");

        if let Err(e) = self
            .transport
            .send_message(&space.space_id, &OutgoingPrompt::text(render::WELCOME))
            .await
        {
            warn!(user_id, error = %e, "Failed to post welcome message");
        }

        self.reset_locked(user_id).await?;
        let order = self
            .orders
            .get_or_create_order(user_id, &self.catalog.ids())
            .await?;
        self.store.ensure_session(user_id).await?;
        self.publish_question(user_id, &order, 0).await?;

        Ok(RoomOutcome {
            space,
            created: true,
        })
    }

    /// Re-publish the current question, or the summary when complete.
    pub async fn resume(&self, user_id: &str) -> Result<SessionStatus> {
        {
            let _guard = self.lock_user(user_id).await;
            if self.live_room(user_id).await?.is_none() {
                return Err(SessionError::NoRoom {
                    user_id: user_id.to_string(),
                }
                .into());
            }
            let order = self
                .orders
                .get_or_create_order(user_id, &self.catalog.ids())
                .await?;
            let session = self.store.ensure_session(user_id).await?;
            if session.completion_pending && session.progress >= order.len() {
                self.complete(user_id, &session).await?;
            } else {
                self.refresh(user_id, &order, session.progress).await?;
            }
        }
        self.request_status(user_id).await
    }

    /// Delete the user's room now.
    pub async fn close_room(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock_user(user_id).await;

        let Some(space) = self.live_room(user_id).await? else {
            return Err(SessionError::NoRoom {
                user_id: user_id.to_string(),
            }
            .into());
        };

        match self.transport.delete_space(&space.space_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.store.clear_room(user_id).await?;
        self.store.clear_message_handle(user_id).await?;
        info!(user_id, space_id = %space.space_id, "Room closed");
        Ok(())
    }

    /// The user's room as it exists on the platform right now.
    ///
    /// The stored binding is checked against the platform first; a stale
    /// binding is dropped and the platform is searched instead.
    async fn live_room(&self, user_id: &str) -> Result<Option<SpaceIdentity>> {
        if let Some(bound) = self.store.get_room(user_id).await? {
            match self.transport.fetch_space(&bound.space_id).await? {
                Some(space) if space.belongs_to(user_id) => return Ok(Some(space)),
                _ => {
                    self.store.clear_room(user_id).await?;
                }
            }
        }

        let found = self.transport.find_space(user_id).await?;
        if let Some(space) = &found {
            self.store.set_room(user_id, space).await?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, Choice, Question};
    use crate::channels::MemoryTransport;
    use crate::store::LibSqlBackend;

    fn small_catalog() -> Catalog {
        let choices: Vec<Choice> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|l| Choice::new(l, l))
            .collect();
        let questions = (1..=3)
            .map(|id| Question {
                id,
                category: "cat1".into(),
                text: format!("question {id}"),
                choices: choices.clone(),
            })
            .collect();
        Catalog::new(
            questions,
            vec![Category {
                key: "cat1".into(),
                label: "Category one".into(),
            }],
        )
    }

    async fn engine() -> (SessionEngine, Arc<dyn SessionStore>, Arc<MemoryTransport>) {
        let store: Arc<dyn SessionStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let engine = SessionEngine::new(
            Arc::clone(&store),
            transport.clone(),
            Arc::new(small_catalog()),
            EngineConfig {
                auto_close: Duration::from_secs(3600),
                top_k: 3,
            },
        );
        (engine, store, transport)
    }

    #[tokio::test]
    async fn duplicate_submission_advances_once() {
        let (engine, store, _) = engine().await;

        let first = engine.submit_answer("u1", 0, "A").await.unwrap();
        let second = engine.submit_answer("u1", 0, "A").await.unwrap();

        assert_eq!(first, SubmitOutcome::Advanced { index: 1 });
        assert_eq!(
            second,
            SubmitOutcome::Ignored {
                reason: IgnoreReason::StaleIndex {
                    claimed: 0,
                    current: 1
                }
            }
        );
        assert_eq!(store.get_progress("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn completes_once_with_profile() {
        let (engine, _, _) = engine().await;
        engine.submit_answer("u1", 0, "C").await.unwrap();
        engine.submit_answer("u1", 1, "C").await.unwrap();
        let done = engine.submit_answer("u1", 2, "E").await.unwrap();

        let SubmitOutcome::Completed { profile } = done else {
            panic!("expected completion, got {done:?}");
        };
        assert_eq!(profile.picks["cat1"], "C");
        assert_eq!(profile.meters["cat1"], 67);

        let after = engine.submit_answer("u1", 3, "A").await.unwrap();
        assert_eq!(
            after,
            SubmitOutcome::Ignored {
                reason: IgnoreReason::AlreadyComplete
            }
        );
    }

    #[tokio::test]
    async fn invalid_letter_changes_nothing() {
        let (engine, store, _) = engine().await;
        let err = engine.submit_answer("u1", 0, "Z").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::InvalidChoice { .. })
        ));
        assert_eq!(store.get_progress("u1").await.unwrap(), 0);
        assert!(store.load_answers("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_reports_phase_without_creating_state() {
        let (engine, store, _) = engine().await;
        let status = engine.request_status("u1").await.unwrap();
        assert_eq!(status.phase, SessionPhase::NotStarted);
        assert_eq!(status.total, 3);
        assert!(store.get_session("u1").await.unwrap().is_none());

        engine.submit_answer("u1", 0, "B").await.unwrap();
        let status = engine.request_status("u1").await.unwrap();
        assert_eq!(status.phase, SessionPhase::InProgress);
        assert_eq!(status.answered, 1);
    }

    #[tokio::test]
    async fn ranking_requires_completion() {
        let (engine, _, _) = engine().await;
        engine.submit_answer("u1", 0, "B").await.unwrap();
        let err = engine.request_ranking("u1").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::Incomplete { answered: 1, total: 3, .. })
        ));
    }

    #[tokio::test]
    async fn open_room_publishes_first_question_and_reuses_room() {
        let (engine, store, transport) = engine().await;

        let opened = engine.open_room("u1").await.unwrap();
        assert!(opened.created);
        let handle = store.get_message_handle("u1").await.unwrap().unwrap();
        let prompt = transport.message(&handle).unwrap();
        assert!(prompt.content.ends_with("(1/3)"));
        assert_eq!(prompt.buttons.len(), 5);

        let again = engine.open_room("u1").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.space, opened.space);
        assert_eq!(transport.space_count(), 1);
    }

    #[tokio::test]
    async fn close_room_without_room_is_no_room() {
        let (engine, _, _) = engine().await;
        let err = engine.close_room("u1").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Session(SessionError::NoRoom { .. })
        ));
    }

    #[tokio::test]
    async fn stats_counts_sessions_and_rooms() {
        let (engine, _, _) = engine().await;
        engine.open_room("u1").await.unwrap();
        engine.submit_answer("u2", 0, "A").await.unwrap();
        engine.submit_answer("u2", 1, "A").await.unwrap();
        engine.submit_answer("u2", 2, "A").await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.sessions.total, 2);
        assert_eq!(stats.sessions.completed, 1);
        assert_eq!(stats.sessions.in_progress, 1);
        assert_eq!(stats.rooms, 1);
    }

    fn lock_entries(engine: &SessionEngine) -> usize {
        engine.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn user_locks_are_released_after_each_call() {
        let (engine, _, _) = engine().await;
        engine.open_room("u1").await.unwrap();
        engine.submit_answer("u1", 0, "A").await.unwrap();
        engine.submit_answer("u2", 0, "B").await.unwrap();
        engine.reset_session("u2").await.unwrap();
        assert_eq!(lock_entries(&engine), 0);
    }

    #[tokio::test]
    async fn user_locks_survive_contention_and_then_drain() {
        let (engine, store, _) = engine().await;
        let engine = Arc::new(engine);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let user = format!("u{}", i % 2);
                tokio::spawn(async move { engine.submit_answer(&user, 0, "A").await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(store.get_progress("u0").await.unwrap(), 1);
        assert_eq!(store.get_progress("u1").await.unwrap(), 1);
        assert_eq!(lock_entries(&engine), 0);
    }

    #[tokio::test]
    async fn final_answer_clears_completion_flag() {
        let (engine, store, transport) = engine().await;
        let room = engine.open_room("u1").await.unwrap().space;
        for (i, letter) in ["A", "B", "C"].iter().enumerate() {
            engine.submit_answer("u1", i, letter).await.unwrap();
        }

        assert!(!store.get_session("u1").await.unwrap().unwrap().completion_pending);
        assert!(transport.is_unlocked(&room.space_id, "u1"));
        assert!(engine.cleanup().is_armed("u1"));
    }
}
