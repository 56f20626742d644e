//! Plain-text rendering of prompts, summaries and status lines.
//!
//! Formatting is deliberately minimal; the transport decides how text and
//! buttons look on the platform.

use std::time::Duration;

use crate::catalog::{Catalog, Question};
use crate::channels::{Button, OutgoingPrompt};
use crate::matching::{Profile, RankedMatch};

use super::state::{SessionPhase, SessionStatus};

const ANSWER_PREFIX: &str = "answer";

/// First message posted into a freshly created room.
pub const WELCOME: &str = "This room is for your questionnaire only. Answer with the buttons below.";

/// Button payload for answering the question at `index` with `letter`.
pub fn answer_payload(index: usize, letter: &str) -> String {
    format!("{ANSWER_PREFIX}:{index}:{letter}")
}

/// Decode an `answer:{index}:{letter}` payload into `(index, letter)`.
pub fn parse_answer_payload(payload: &str) -> Option<(usize, String)> {
    let mut parts = payload.splitn(3, ':');
    if parts.next()? != ANSWER_PREFIX {
        return None;
    }
    let index = parts.next()?.parse().ok()?;
    let letter = parts.next()?;
    if letter.is_empty() {
        return None;
    }
    Some((index, letter.to_string()))
}

/// The prompt for the question at position `index` of a `total`-long order.
pub fn question_prompt(question: &Question, index: usize, total: usize) -> OutgoingPrompt {
    let buttons = question
        .choices
        .iter()
        .map(|c| Button {
            label: format!("{}: {}", c.letter, c.label),
            payload: answer_payload(index, &c.letter),
        })
        .collect();

    OutgoingPrompt::text(format!(
        "Q{}. {}\n({}/{})",
        question.id,
        question.text,
        index + 1,
        total
    ))
    .with_buttons(buttons)
}

/// Completion summary. Carries no buttons, so publishing it strips the
/// answer controls from the live message.
pub fn completion_summary(
    catalog: &Catalog,
    profile: &Profile,
    auto_close: Option<Duration>,
) -> OutgoingPrompt {
    let mut out = String::from("Questionnaire complete!\n");
    for category in catalog.categories() {
        let (Some(pick), Some(meter)) = (
            profile.picks.get(&category.key),
            profile.meters.get(&category.key),
        ) else {
            continue;
        };
        out.push_str(&format!("\n{}: {pick} ({meter}/100)", category.label));
    }

    if let Some(delay) = auto_close {
        out.push_str(&format!(
            "\n\nThis room closes automatically in {}. Close it sooner with /close.",
            format_delay(delay)
        ));
    }
    OutgoingPrompt::text(out)
}

pub fn ranking_text(user_id: &str, matches: &[RankedMatch]) -> String {
    if matches.is_empty() {
        return format!("No completed matches for {user_id} yet.");
    }
    let mut out = format!("Top matches for {user_id}:");
    for (rank, m) in matches.iter().enumerate() {
        out.push_str(&format!("\n{}. {} ({}%)", rank + 1, m.user_id, m.score));
    }
    out
}

pub fn status_text(status: &SessionStatus) -> String {
    match status.phase {
        SessionPhase::NotStarted => "Not started yet. Use /room to begin.".to_string(),
        SessionPhase::InProgress => {
            format!("In progress: {}/{} answered.", status.answered, status.total)
        }
        SessionPhase::Complete => format!("Complete: {}/{} answered.", status.total, status.total),
    }
}

fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        format!("{mins} minute{}", if mins == 1 { "" } else { "s" })
    } else {
        format!("{secs} second{}", if secs == 1 { "" } else { "s" })
    }
}
