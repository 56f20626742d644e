//! Compatibility ranker — exact-match similarity between profiles.

use serde::Serialize;

use crate::catalog::Catalog;
use crate::error::DatabaseError;
use crate::store::SessionStore;

use super::profile::{Profile, build_profile};

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedMatch {
    pub user_id: String,
    pub score: u32,
}

/// Symmetric 0..=100 score over the categories both profiles have a pick for.
///
/// Only exact letter matches count; "D" vs "E" is as much a miss as "A" vs "E".
/// No usable category scores 0.
pub fn score(a: &Profile, b: &Profile, categories: &[String]) -> u32 {
    let mut usable = 0u32;
    let mut matches = 0u32;
    for category in categories {
        if let (Some(pa), Some(pb)) = (a.picks.get(category), b.picks.get(category)) {
            usable += 1;
            if pa == pb {
                matches += 1;
            }
        }
    }
    if usable == 0 {
        return 0;
    }
    (100.0 * f64::from(matches) / f64::from(usable)).round() as u32
}

/// Sort by score descending then id ascending, and keep the top `k`.
pub fn top_k(mut ranked: Vec<RankedMatch>, k: usize) -> Vec<RankedMatch> {
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));
    ranked.truncate(k);
    ranked
}

/// Rank `user_id` against every complete candidate other than itself.
///
/// `candidate_ids` is filtered against the store's completed sessions, so
/// callers may pass any superset.
pub async fn rank_top(
    store: &dyn SessionStore,
    catalog: &Catalog,
    user_id: &str,
    candidate_ids: &[String],
    k: usize,
) -> Result<Vec<RankedMatch>, DatabaseError> {
    let completed = store.completed_users(catalog.len()).await?;
    let categories = catalog.category_keys();
    let me = build_profile(store, catalog, user_id).await?;

    let mut ranked = Vec::new();
    for candidate in candidate_ids {
        if candidate == user_id || completed.binary_search(candidate).is_err() {
            continue;
        }
        let other = build_profile(store, catalog, candidate).await?;
        ranked.push(RankedMatch {
            user_id: candidate.clone(),
            score: score(&me, &other, &categories),
        });
    }
    Ok(top_k(ranked, k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    fn profile(picks: &[(&str, &str)]) -> Profile {
        Profile {
            picks: picks
                .iter()
                .map(|(c, l)| (c.to_string(), l.to_string()))
                .collect(),
            meters: Default::default(),
        }
    }

    fn cats(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn half_match_scores_fifty() {
        let a = profile(&[("cat1", "D"), ("cat2", "B")]);
        let b = profile(&[("cat1", "D"), ("cat2", "E")]);
        assert_eq!(score(&a, &b, &cats(&["cat1", "cat2"])), 50);
        assert_eq!(score(&b, &a, &cats(&["cat1", "cat2"])), 50);
    }

    #[test]
    fn self_similarity_is_maximal() {
        let a = profile(&[("cat1", "A")]);
        assert_eq!(score(&a, &a, &cats(&["cat1", "cat2"])), 100);
    }

    #[test]
    fn no_usable_categories_scores_zero() {
        let a = profile(&[("cat1", "A")]);
        let b = profile(&[("cat2", "A")]);
        assert_eq!(score(&a, &b, &cats(&["cat1", "cat2"])), 0);
        assert_eq!(score(&Profile::default(), &Profile::default(), &cats(&["cat1"])), 0);
    }

    #[test]
    fn adjacent_letters_are_a_plain_miss() {
        let a = profile(&[("cat1", "D"), ("cat2", "A"), ("cat3", "A")]);
        let b = profile(&[("cat1", "E"), ("cat2", "A"), ("cat3", "A")]);
        assert_eq!(score(&a, &b, &cats(&["cat1", "cat2", "cat3"])), 67);
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let ranked = top_k(
            vec![
                RankedMatch { user_id: "c".into(), score: 50 },
                RankedMatch { user_id: "a".into(), score: 50 },
                RankedMatch { user_id: "b".into(), score: 80 },
            ],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn rank_top_skips_self_and_incomplete() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let catalog = Catalog::builtin();
        let total = catalog.len();

        for user in ["me", "done"] {
            for q in catalog.all() {
                store.save_answer(user, q.id, "B").await.unwrap();
            }
            store.set_progress(user, total).await.unwrap();
        }
        store.save_answer("halfway", 1, "B").await.unwrap();
        store.set_progress("halfway", 1).await.unwrap();

        let candidates = vec!["me".to_string(), "done".into(), "halfway".into()];
        let ranked = rank_top(&store, &catalog, "me", &candidates, 5).await.unwrap();

        assert_eq!(
            ranked,
            vec![RankedMatch {
                user_id: "done".into(),
                score: 100,
            }]
        );
    }
}
