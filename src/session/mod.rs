//! Questionnaire sessions: order, state machine, rendering and cleanup.

pub mod cleanup;
pub mod engine;
pub mod order;
pub mod render;
pub mod state;

pub use cleanup::{CleanupOutcome, CleanupScheduler, CleanupTarget};
pub use engine::{EngineConfig, IgnoreReason, RoomOutcome, SessionEngine, Stats, SubmitOutcome};
pub use order::OrderGenerator;
pub use render::parse_answer_payload;
pub use state::{SessionPhase, SessionStatus};
