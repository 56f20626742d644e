//! Order generator — one randomized, replay-stable question order per session.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::SessionStore;

/// Produces and persists per-user question orders.
///
/// The only writer of the order record, and only on first creation.
pub struct OrderGenerator {
    store: Arc<dyn SessionStore>,
}

impl OrderGenerator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Return the persisted order for `user_id`, creating it if absent.
    ///
    /// A fresh order is a uniformly random permutation of `catalog_ids`.
    /// Creation goes through `insert_order_if_absent`, so two racing first
    /// calls still agree on a single order.
    pub async fn get_or_create_order(
        &self,
        user_id: &str,
        catalog_ids: &[u32],
    ) -> Result<Vec<u32>, DatabaseError> {
        if let Some(order) = self.store.get_order(user_id).await? {
            return Ok(order);
        }

        let shuffled = shuffle(catalog_ids);
        let order = self.store.insert_order_if_absent(user_id, &shuffled).await?;
        debug!(user_id, len = order.len(), "Question order created");
        Ok(order)
    }

    /// Drop the persisted order. Absence is not an error.
    pub async fn reset_order(&self, user_id: &str) -> Result<(), DatabaseError> {
        if self.store.delete_order(user_id).await? {
            debug!(user_id, "Question order reset");
        }
        Ok(())
    }
}

fn shuffle(ids: &[u32]) -> Vec<u32> {
    let mut order = ids.to_vec();
    order.shuffle(&mut rand::thread_rng());
    order
}
