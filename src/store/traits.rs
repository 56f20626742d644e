//! `SessionStore` trait — single async interface for all session persistence.
//!
//! Four record kinds are kept per user: progress (the session row), the
//! question order, per-question answers and the live prompt's message handle.
//! Room bindings ride alongside so the engine knows where to publish.
//! Each kind is independently readable, writable and resettable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::channels::{MessageHandle, SpaceIdentity};
use crate::error::DatabaseError;

/// The persisted session row for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    /// Minted fresh every time the row is created; a reset therefore always
    /// yields a new session id.
    pub session_id: Uuid,
    /// Number of questions answered so far.
    pub progress: usize,
    /// Set together with the final answer and cleared once the completion
    /// effects (unlock, cleanup, summary) have all run.
    pub completion_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only aggregate over all session rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
}

/// Backend-agnostic session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    /// Read the session row without creating it.
    async fn get_session(&self, user_id: &str) -> Result<Option<SessionRecord>, DatabaseError>;

    /// Read the session row, creating it at progress 0 if absent.
    async fn ensure_session(&self, user_id: &str) -> Result<SessionRecord, DatabaseError>;

    /// Current progress index; absent sessions are created at 0.
    async fn get_progress(&self, user_id: &str) -> Result<usize, DatabaseError> {
        Ok(self.ensure_session(user_id).await?.progress)
    }

    /// Upsert the progress index.
    async fn set_progress(&self, user_id: &str, index: usize) -> Result<(), DatabaseError>;

    // ── Answers ─────────────────────────────────────────────────────

    /// Upsert one answer keyed by (user, question); last write wins.
    async fn save_answer(
        &self,
        user_id: &str,
        question_id: u32,
        letter: &str,
    ) -> Result<(), DatabaseError>;

    /// All answers for a user, ordered by question id ascending.
    async fn load_answers(&self, user_id: &str) -> Result<Vec<(u32, String)>, DatabaseError>;

    /// Atomically upsert an answer and advance progress from `expected_index`
    /// to `expected_index + 1`.
    ///
    /// Applied only if the persisted progress still equals `expected_index`;
    /// returns `false` (and writes nothing) otherwise. `completes` marks the
    /// final answer and sets `completion_pending` in the same transaction.
    async fn record_answer(
        &self,
        user_id: &str,
        expected_index: usize,
        question_id: u32,
        letter: &str,
        completes: bool,
    ) -> Result<bool, DatabaseError>;

    /// Clear `completion_pending`. Returns whether the flag was set.
    async fn clear_completion_pending(&self, user_id: &str) -> Result<bool, DatabaseError>;

    /// Delete all answers and the progress row. Order and message handle are
    /// left alone.
    async fn reset(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Order ───────────────────────────────────────────────────────

    async fn get_order(&self, user_id: &str) -> Result<Option<Vec<u32>>, DatabaseError>;

    /// Persist `order` unless one already exists. Returns whichever order is
    /// persisted afterwards, so a concurrent first writer always wins.
    async fn insert_order_if_absent(
        &self,
        user_id: &str,
        order: &[u32],
    ) -> Result<Vec<u32>, DatabaseError>;

    /// Returns whether an order was deleted.
    async fn delete_order(&self, user_id: &str) -> Result<bool, DatabaseError>;

    // ── Message handle ──────────────────────────────────────────────

    async fn get_message_handle(
        &self,
        user_id: &str,
    ) -> Result<Option<MessageHandle>, DatabaseError>;

    async fn set_message_handle(
        &self,
        user_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), DatabaseError>;

    async fn clear_message_handle(&self, user_id: &str) -> Result<bool, DatabaseError>;

    // ── Rooms ───────────────────────────────────────────────────────

    async fn get_room(&self, user_id: &str) -> Result<Option<SpaceIdentity>, DatabaseError>;

    async fn set_room(&self, user_id: &str, room: &SpaceIdentity) -> Result<(), DatabaseError>;

    async fn clear_room(&self, user_id: &str) -> Result<bool, DatabaseError>;

    async fn count_rooms(&self) -> Result<usize, DatabaseError>;

    // ── Aggregates ──────────────────────────────────────────────────

    /// Session counts given the questionnaire length.
    async fn count_sessions(&self, total_questions: usize)
    -> Result<SessionCounts, DatabaseError>;

    /// Users whose progress has reached `total_questions`, ascending by id.
    async fn completed_users(&self, total_questions: usize)
    -> Result<Vec<String>, DatabaseError>;
}
