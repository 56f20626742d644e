//! libSQL backend — async `SessionStore` implementation.
//!
//! Supports local file and in-memory databases. A libSQL connection carries
//! its own transaction state, so the single connection sits behind an async
//! mutex: a multi-statement write holds it from `BEGIN` to `COMMIT` and no
//! unrelated statement can slip into the transaction.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::{MessageHandle, SpaceIdentity};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{SessionCounts, SessionRecord, SessionStore};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: LibSqlDatabase,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db,
            conn: Mutex::new(conn),
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a SessionRecord.
///
/// Column order matches SESSION_COLUMNS:
/// 0:user_id, 1:session_id, 2:progress, 3:created_at, 4:updated_at,
/// 5:completion_pending
fn row_to_session(row: &libsql::Row) -> Result<SessionRecord, DatabaseError> {
    let user_id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("session row user_id: {e}")))?;
    let session_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("session row session_id: {e}")))?;
    let progress: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("session row progress: {e}")))?;
    let created_str: String = row.get(3).unwrap_or_default();
    let updated_str: String = row.get(4).unwrap_or_default();
    let pending: i64 = row.get(5).unwrap_or(0);

    let session_id = Uuid::parse_str(&session_str)
        .map_err(|e| DatabaseError::Serialization(format!("session_id {session_str}: {e}")))?;

    Ok(SessionRecord {
        user_id,
        session_id,
        progress: usize::try_from(progress).unwrap_or(0),
        completion_pending: pending != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn parse_order(json: &str) -> Result<Vec<u32>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::Serialization(format!("order_json: {e}")))
}

async fn select_session(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<SessionRecord>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1"),
            params![user_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
    }
}

async fn select_order(conn: &Connection, user_id: &str) -> Result<Option<Vec<u32>>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT order_json FROM question_orders WHERE user_id = ?1",
            params![user_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_order: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let json: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("get_order row: {e}")))?;
            Ok(Some(parse_order(&json)?))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_order: {e}"))),
    }
}

/// Run a single `COUNT(*)`-style query returning one integer.
async fn query_count(conn: &Connection, sql: &str, op: &str) -> Result<usize, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as usize),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Trait implementation ────────────────────────────────────────────

const SESSION_COLUMNS: &str =
    "user_id, session_id, progress, created_at, updated_at, completion_pending";

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        migrations::run_migrations(&conn).await
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn get_session(&self, user_id: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_session(&conn, user_id).await
    }

    async fn ensure_session(&self, user_id: &str) -> Result<SessionRecord, DatabaseError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sessions (user_id, session_id, progress, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![user_id, Uuid::new_v4().to_string(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_session: {e}")))?;
        if inserted > 0 {
            debug!(user_id, "Session row created");
        }

        select_session(&conn, user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "session".into(),
                id: user_id.to_string(),
            })
    }

    async fn set_progress(&self, user_id: &str, index: usize) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (user_id, session_id, progress, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (user_id) DO UPDATE SET progress = ?3, updated_at = ?4",
            params![user_id, Uuid::new_v4().to_string(), index as i64, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_progress: {e}")))?;

        debug!(user_id, progress = index, "Progress updated");
        Ok(())
    }

    // ── Answers ─────────────────────────────────────────────────────

    async fn save_answer(
        &self,
        user_id: &str,
        question_id: u32,
        letter: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO answers (user_id, question_id, letter, answered_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, question_id) DO UPDATE SET letter = ?3, answered_at = ?4",
            params![user_id, question_id as i64, letter, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_answer: {e}")))?;
        Ok(())
    }

    async fn load_answers(&self, user_id: &str) -> Result<Vec<(u32, String)>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT question_id, letter FROM answers WHERE user_id = ?1 ORDER BY question_id",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_answers: {e}")))?;

        let mut answers = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_answers: {e}")))?
        {
            let question_id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_answers row: {e}")))?;
            let letter: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("load_answers row: {e}")))?;
            answers.push((question_id as u32, letter));
        }
        Ok(answers)
    }

    async fn record_answer(
        &self,
        user_id: &str,
        expected_index: usize,
        question_id: u32,
        letter: &str,
        completes: bool,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_answer begin: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let applied = async {
            let advanced = tx
                .execute(
                    "UPDATE sessions SET progress = ?3, updated_at = ?4, completion_pending = ?5
                     WHERE user_id = ?1 AND progress = ?2",
                    params![
                        user_id,
                        expected_index as i64,
                        (expected_index + 1) as i64,
                        now.clone(),
                        completes as i64
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("record_answer advance: {e}")))?;
            if advanced == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO answers (user_id, question_id, letter, answered_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, question_id) DO UPDATE SET letter = ?3, answered_at = ?4",
                params![user_id, question_id as i64, letter, now.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_answer upsert: {e}")))?;
            Ok::<bool, DatabaseError>(true)
        }
        .await;

        match applied {
            Ok(true) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("record_answer commit: {e}")))?;
                debug!(user_id, question_id, progress = expected_index + 1, "Answer recorded");
                Ok(true)
            }
            Ok(false) => {
                let _ = tx.rollback().await;
                debug!(user_id, expected_index, "Progress moved on, answer not recorded");
                Ok(false)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn clear_completion_pending(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let cleared = conn
            .execute(
                "UPDATE sessions SET completion_pending = 0
                 WHERE user_id = ?1 AND completion_pending != 0",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_completion_pending: {e}")))?;
        Ok(cleared > 0)
    }

    async fn reset(&self, user_id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("reset begin: {e}")))?;

        let deleted = async {
            tx.execute("DELETE FROM answers WHERE user_id = ?1", params![user_id])
                .await?;
            tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
                .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;

        match deleted {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("reset commit: {e}")))?;
                debug!(user_id, "Session progress and answers reset");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(DatabaseError::Query(format!("reset: {e}")))
            }
        }
    }

    // ── Order ───────────────────────────────────────────────────────

    async fn get_order(&self, user_id: &str) -> Result<Option<Vec<u32>>, DatabaseError> {
        let conn = self.conn.lock().await;
        select_order(&conn, user_id).await
    }

    async fn insert_order_if_absent(
        &self,
        user_id: &str,
        order: &[u32],
    ) -> Result<Vec<u32>, DatabaseError> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(order)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO question_orders (user_id, order_json, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, json, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_order: {e}")))?;

        select_order(&conn, user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "question_order".into(),
                id: user_id.to_string(),
            })
    }

    async fn delete_order(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let count = conn
            .execute(
                "DELETE FROM question_orders WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_order: {e}")))?;
        Ok(count > 0)
    }

    // ── Message handle ──────────────────────────────────────────────

    async fn get_message_handle(
        &self,
        user_id: &str,
    ) -> Result<Option<MessageHandle>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT space_id, message_id FROM message_handles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message_handle: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let space_id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_message_handle row: {e}")))?;
                let message_id: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_message_handle row: {e}")))?;
                Ok(Some(MessageHandle {
                    space_id,
                    message_id,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message_handle: {e}"))),
        }
    }

    async fn set_message_handle(
        &self,
        user_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO message_handles (user_id, space_id, message_id, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id) DO UPDATE SET space_id = ?2, message_id = ?3, updated_at = ?4",
            params![
                user_id,
                handle.space_id.as_str(),
                handle.message_id.as_str(),
                Utc::now().to_rfc3339()
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_message_handle: {e}")))?;
        Ok(())
    }

    async fn clear_message_handle(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let count = conn
            .execute(
                "DELETE FROM message_handles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_message_handle: {e}")))?;
        Ok(count > 0)
    }

    // ── Rooms ───────────────────────────────────────────────────────

    async fn get_room(&self, user_id: &str) -> Result<Option<SpaceIdentity>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT space_id, name, topic FROM rooms WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_room: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let field = |idx: i32| {
                    row.get::<String>(idx)
                        .map_err(|e| DatabaseError::Query(format!("get_room row: {e}")))
                };
                Ok(Some(SpaceIdentity {
                    space_id: field(0)?,
                    name: field(1)?,
                    topic: field(2)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_room: {e}"))),
        }
    }

    async fn set_room(&self, user_id: &str, room: &SpaceIdentity) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rooms (user_id, space_id, name, topic, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id) DO UPDATE SET space_id = ?2, name = ?3, topic = ?4",
            params![
                user_id,
                room.space_id.as_str(),
                room.name.as_str(),
                room.topic.as_str(),
                Utc::now().to_rfc3339()
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_room: {e}")))?;
        Ok(())
    }

    async fn clear_room(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().await;
        let count = conn
            .execute("DELETE FROM rooms WHERE user_id = ?1", params![user_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_room: {e}")))?;
        Ok(count > 0)
    }

    async fn count_rooms(&self) -> Result<usize, DatabaseError> {
        let conn = self.conn.lock().await;
        query_count(&conn, "SELECT COUNT(*) FROM rooms", "count_rooms").await
    }

    // ── Aggregates ──────────────────────────────────────────────────

    async fn count_sessions(
        &self,
        total_questions: usize,
    ) -> Result<SessionCounts, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN progress >= ?1 THEN 1 ELSE 0 END), 0)
                 FROM sessions",
                params![total_questions as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_sessions: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let total = row.get::<i64>(0).unwrap_or(0).max(0) as usize;
                let completed = row.get::<i64>(1).unwrap_or(0).max(0) as usize;
                Ok(SessionCounts {
                    total,
                    completed,
                    in_progress: total.saturating_sub(completed),
                })
            }
            Ok(None) => Ok(SessionCounts::default()),
            Err(e) => Err(DatabaseError::Query(format!("count_sessions: {e}"))),
        }
    }

    async fn completed_users(
        &self,
        total_questions: usize,
    ) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT user_id FROM sessions WHERE progress >= ?1 ORDER BY user_id",
                params![total_questions as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("completed_users: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("completed_users: {e}")))?
        {
            users.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("completed_users row: {e}")))?,
            );
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn room(user_id: &str, space_id: &str) -> SpaceIdentity {
        SpaceIdentity {
            space_id: space_id.into(),
            name: SpaceIdentity::room_name(user_id),
            topic: SpaceIdentity::room_topic(user_id),
        }
    }

    // ── Progress tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn get_progress_creates_row_at_zero() {
        let db = test_db().await;
        assert!(db.get_session("u1").await.unwrap().is_none());

        assert_eq!(db.get_progress("u1").await.unwrap(), 0);

        let session = db.get_session("u1").await.unwrap().unwrap();
        assert_eq!(session.progress, 0);
        assert_eq!(session.user_id, "u1");
    }

    #[tokio::test]
    async fn ensure_session_keeps_existing_session_id() {
        let db = test_db().await;
        let first = db.ensure_session("u1").await.unwrap();
        let second = db.ensure_session("u1").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn set_progress_upserts() {
        let db = test_db().await;
        db.set_progress("u1", 3).await.unwrap();
        assert_eq!(db.get_progress("u1").await.unwrap(), 3);
        db.set_progress("u1", 4).await.unwrap();
        assert_eq!(db.get_progress("u1").await.unwrap(), 4);
    }

    // ── Answer tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn save_answer_last_write_wins() {
        let db = test_db().await;
        db.save_answer("u1", 7, "A").await.unwrap();
        db.save_answer("u1", 7, "D").await.unwrap();

        let answers = db.load_answers("u1").await.unwrap();
        assert_eq!(answers, vec![(7, "D".to_string())]);
    }

    #[tokio::test]
    async fn load_answers_ordered_by_question_id() {
        let db = test_db().await;
        db.save_answer("u1", 12, "B").await.unwrap();
        db.save_answer("u1", 3, "E").await.unwrap();
        db.save_answer("u1", 8, "C").await.unwrap();
        db.save_answer("u2", 1, "A").await.unwrap();

        let ids: Vec<u32> = db
            .load_answers("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![3, 8, 12]);
    }

    #[tokio::test]
    async fn record_answer_advances_exactly_once() {
        let db = test_db().await;
        db.ensure_session("u1").await.unwrap();

        assert!(db.record_answer("u1", 0, 5, "C", false).await.unwrap());
        assert!(!db.record_answer("u1", 0, 5, "C", false).await.unwrap());

        assert_eq!(db.get_progress("u1").await.unwrap(), 1);
        assert_eq!(db.load_answers("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_answer_stale_index_writes_nothing() {
        let db = test_db().await;
        db.set_progress("u1", 2).await.unwrap();

        assert!(!db.record_answer("u1", 1, 9, "A", false).await.unwrap());
        assert!(db.load_answers("u1").await.unwrap().is_empty());
        assert_eq!(db.get_progress("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn final_answer_sets_completion_pending_until_cleared() {
        let db = test_db().await;
        db.ensure_session("u1").await.unwrap();
        db.record_answer("u1", 0, 1, "A", false).await.unwrap();
        assert!(!db.get_session("u1").await.unwrap().unwrap().completion_pending);

        assert!(db.record_answer("u1", 1, 2, "B", true).await.unwrap());
        let session = db.get_session("u1").await.unwrap().unwrap();
        assert_eq!(session.progress, 2);
        assert!(session.completion_pending);

        assert!(db.clear_completion_pending("u1").await.unwrap());
        assert!(!db.clear_completion_pending("u1").await.unwrap());
        assert!(!db.get_session("u1").await.unwrap().unwrap().completion_pending);
    }

    #[tokio::test]
    async fn rejected_final_answer_leaves_flag_unset() {
        let db = test_db().await;
        db.set_progress("u1", 1).await.unwrap();

        assert!(!db.record_answer("u1", 0, 2, "B", true).await.unwrap());
        assert!(!db.get_session("u1").await.unwrap().unwrap().completion_pending);
    }

    #[tokio::test]
    async fn record_answer_without_session_is_rejected() {
        let db = test_db().await;
        assert!(!db.record_answer("ghost", 0, 1, "A", false).await.unwrap());
        assert!(db.load_answers("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_purges_answers_and_progress_only() {
        let db = test_db().await;
        let before = db.ensure_session("u1").await.unwrap();
        db.record_answer("u1", 0, 1, "A", false).await.unwrap();
        db.insert_order_if_absent("u1", &[1, 2]).await.unwrap();
        let handle = MessageHandle {
            space_id: "c1".into(),
            message_id: "m1".into(),
        };
        db.set_message_handle("u1", &handle).await.unwrap();

        db.reset("u1").await.unwrap();

        assert!(db.get_session("u1").await.unwrap().is_none());
        assert!(db.load_answers("u1").await.unwrap().is_empty());
        assert_eq!(db.get_order("u1").await.unwrap(), Some(vec![1, 2]));
        assert_eq!(db.get_message_handle("u1").await.unwrap(), Some(handle));

        let after = db.ensure_session("u1").await.unwrap();
        assert_ne!(before.session_id, after.session_id);
        assert_eq!(after.progress, 0);
    }

    // ── Order tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn first_order_wins() {
        let db = test_db().await;
        let first = db.insert_order_if_absent("u1", &[3, 1, 2]).await.unwrap();
        let second = db.insert_order_if_absent("u1", &[1, 2, 3]).await.unwrap();
        assert_eq!(first, vec![3, 1, 2]);
        assert_eq!(second, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn delete_order_is_idempotent() {
        let db = test_db().await;
        db.insert_order_if_absent("u1", &[1]).await.unwrap();
        assert!(db.delete_order("u1").await.unwrap());
        assert!(!db.delete_order("u1").await.unwrap());
        assert!(db.get_order("u1").await.unwrap().is_none());
    }

    // ── Message handle / room tests ─────────────────────────────────

    #[tokio::test]
    async fn message_handle_crud() {
        let db = test_db().await;
        assert!(db.get_message_handle("u1").await.unwrap().is_none());

        let h1 = MessageHandle {
            space_id: "c1".into(),
            message_id: "m1".into(),
        };
        db.set_message_handle("u1", &h1).await.unwrap();
        let h2 = MessageHandle {
            space_id: "c1".into(),
            message_id: "m2".into(),
        };
        db.set_message_handle("u1", &h2).await.unwrap();
        assert_eq!(db.get_message_handle("u1").await.unwrap(), Some(h2));

        assert!(db.clear_message_handle("u1").await.unwrap());
        assert!(!db.clear_message_handle("u1").await.unwrap());
    }

    #[tokio::test]
    async fn room_crud_and_count() {
        let db = test_db().await;
        db.set_room("u1", &room("u1", "c1")).await.unwrap();
        db.set_room("u2", &room("u2", "c2")).await.unwrap();
        assert_eq!(db.count_rooms().await.unwrap(), 2);

        let fetched = db.get_room("u1").await.unwrap().unwrap();
        assert_eq!(fetched.space_id, "c1");
        assert!(fetched.belongs_to("u1"));

        assert!(db.clear_room("u1").await.unwrap());
        assert!(db.get_room("u1").await.unwrap().is_none());
        assert_eq!(db.count_rooms().await.unwrap(), 1);
    }

    // ── Aggregate tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn count_sessions_splits_completed_and_in_progress() {
        let db = test_db().await;
        assert_eq!(db.count_sessions(3).await.unwrap(), SessionCounts::default());

        db.set_progress("a", 3).await.unwrap();
        db.set_progress("b", 1).await.unwrap();
        db.set_progress("c", 0).await.unwrap();

        let counts = db.count_sessions(3).await.unwrap();
        assert_eq!(
            counts,
            SessionCounts {
                total: 3,
                completed: 1,
                in_progress: 2,
            }
        );
        assert_eq!(db.completed_users(3).await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("matchroom.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.ensure_session("u1").await.unwrap();
            db.record_answer("u1", 0, 4, "B", false).await.unwrap();
            db.insert_order_if_absent("u1", &[4, 5]).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.get_progress("u1").await.unwrap(), 1);
        assert_eq!(db.load_answers("u1").await.unwrap(), vec![(4, "B".to_string())]);
        assert_eq!(db.get_order("u1").await.unwrap(), Some(vec![4, 5]));
    }
}
