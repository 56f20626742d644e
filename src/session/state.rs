//! Session state machine — which phase a user's questionnaire is in.

use serde::{Deserialize, Serialize};

/// The phases of a questionnaire session.
///
/// Progresses linearly: NotStarted → InProgress → Complete. The only way
/// back is a reset, which drops the session row entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NotStarted,
    InProgress,
    Complete,
}

impl SessionPhase {
    /// Derive the phase from persisted progress and the order length.
    ///
    /// `order_len` is `None` when no order has been generated yet.
    pub fn derive(progress: usize, order_len: Option<usize>) -> Self {
        match order_len {
            None if progress == 0 => Self::NotStarted,
            Some(len) if progress >= len => Self::Complete,
            _ => Self::InProgress,
        }
    }

    /// Whether this phase is terminal (every question answered).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of one user's session, as reported by status requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub phase: SessionPhase,
    pub answered: usize,
    pub total: usize,
}
