//! Profile aggregator — per-category summary of a user's answers.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::catalog::Catalog;
use crate::error::DatabaseError;
use crate::store::SessionStore;

/// Derived per-category summary. Never persisted.
///
/// Categories without answers are absent from both maps, never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Most frequent letter per category.
    pub picks: BTreeMap<String, String>,
    /// Rounded mean meter value (0..=100) per category.
    pub meters: BTreeMap<String, u32>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }
}

#[derive(Default)]
struct CategoryTally {
    /// (letter, count) in first-seen order.
    letters: Vec<(String, usize)>,
    meter_sum: f64,
    answered: usize,
}

impl CategoryTally {
    fn add(&mut self, letter: &str, meter: f64) {
        match self.letters.iter_mut().find(|(l, _)| l == letter) {
            Some((_, count)) => *count += 1,
            None => self.letters.push((letter.to_string(), 1)),
        }
        self.meter_sum += meter;
        self.answered += 1;
    }

    /// Mode letter; the earliest-seen letter wins a tie.
    fn pick(&self) -> Option<&str> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.letters {
            if best.is_none_or(|b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(l, _)| l.as_str())
    }

    fn meter(&self) -> u32 {
        (self.meter_sum / self.answered as f64).round() as u32
    }
}

/// Aggregate answers (ordered by question id) into a profile.
///
/// Answers whose question or letter is unknown to the catalog are skipped.
pub fn aggregate(catalog: &Catalog, answers: &[(u32, String)]) -> Profile {
    let mut tallies: BTreeMap<String, CategoryTally> = BTreeMap::new();

    for (question_id, letter) in answers {
        let Ok(question) = catalog.by_id(*question_id) else {
            warn!(question_id, "Stored answer for unknown question, skipping");
            continue;
        };
        let Some(meter) = question.meter_value(letter) else {
            warn!(question_id, letter = %letter, "Stored answer with unknown letter, skipping");
            continue;
        };
        tallies
            .entry(question.category.clone())
            .or_default()
            .add(letter, meter);
    }

    let mut profile = Profile::default();
    for (category, tally) in tallies {
        if let Some(pick) = tally.pick() {
            profile.picks.insert(category.clone(), pick.to_string());
            profile.meters.insert(category, tally.meter());
        }
    }
    profile
}

/// Load a user's answers and aggregate them.
pub async fn build_profile(
    store: &dyn SessionStore,
    catalog: &Catalog,
    user_id: &str,
) -> Result<Profile, DatabaseError> {
    let answers = store.load_answers(user_id).await?;
    Ok(aggregate(catalog, &answers))
}
