//! Question catalog — the fixed, immutable question bank.
//!
//! Loaded once at startup and shared read-only for the process lifetime.
//! Every question carries a category key and an ordered set of lettered
//! choices; the position of a letter within that set defines its meter value.

mod builtin;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// One lettered answer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub letter: String,
    pub label: String,
}

impl Choice {
    pub fn new(letter: &str, label: &str) -> Self {
        Self {
            letter: letter.to_string(),
            label: label.to_string(),
        }
    }
}

/// A single catalog question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub category: String,
    pub text: String,
    pub choices: Vec<Choice>,
}

impl Question {
    /// Whether `letter` is one of this question's choices.
    pub fn has_choice(&self, letter: &str) -> bool {
        self.choices.iter().any(|c| c.letter == letter)
    }

    /// Map a letter onto the 0..=100 meter scale.
    ///
    /// Choices are spread evenly: on a five-point scale A..E become
    /// 0, 25, 50, 75, 100. Returns `None` for letters outside the choice set.
    pub fn meter_value(&self, letter: &str) -> Option<f64> {
        let pos = self.choices.iter().position(|c| c.letter == letter)?;
        let steps = self.choices.len().saturating_sub(1);
        if steps == 0 {
            return Some(0.0);
        }
        Some(pos as f64 * 100.0 / steps as f64)
    }
}

/// Display metadata for a category key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    pub label: String,
}

/// The question bank.
#[derive(Debug, Clone)]
pub struct Catalog {
    questions: Vec<Question>,
    categories: Vec<Category>,
    by_id: HashMap<u32, usize>,
}

impl Catalog {
    /// Build a catalog from questions and category labels.
    ///
    /// Categories referenced by questions but missing from `categories` are
    /// appended with their key as label, so `categories()` is always complete.
    pub fn new(questions: Vec<Question>, mut categories: Vec<Category>) -> Self {
        let by_id = questions
            .iter()
            .enumerate()
            .map(|(idx, q)| (q.id, idx))
            .collect();

        for q in &questions {
            if !categories.iter().any(|c| c.key == q.category) {
                categories.push(Category {
                    key: q.category.clone(),
                    label: q.category.clone(),
                });
            }
        }

        Self {
            questions,
            categories,
            by_id,
        }
    }

    /// The built-in 30-question bank (six categories, five questions each).
    pub fn builtin() -> Self {
        builtin::catalog()
    }

    /// All questions in catalog order.
    pub fn all(&self) -> &[Question] {
        &self.questions
    }

    /// Look up a question by id.
    pub fn by_id(&self, id: u32) -> Result<&Question, SessionError> {
        self.by_id
            .get(&id)
            .map(|&idx| &self.questions[idx])
            .ok_or(SessionError::QuestionNotFound(id))
    }

    /// Question ids in catalog order.
    pub fn ids(&self) -> Vec<u32> {
        self.questions.iter().map(|q| q.id).collect()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Categories in first-appearance order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Category keys in first-appearance order; the default comparison list
    /// for compatibility scoring.
    pub fn category_keys(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.key.clone()).collect()
    }

    pub fn category_label<'a>(&'a self, key: &'a str) -> &'a str {
        self.categories
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.label.as_str())
            .unwrap_or(key)
    }
}
