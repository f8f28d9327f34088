use std::collections::HashMap;
use std::sync::Mutex;

use crate::driver::Offer;
use crate::resources::ResourceQuantity;

/// Offers retained between rounds, at most one per node.
///
/// Owned by one scheduler instance. All access happens inside the serialized
/// consumer except one narrow fast path: removing a single node's offer on
/// node loss, which is why the map sits behind a mutex.
pub struct OfferStock {
    max_size: usize,
    offers: Mutex<HashMap<String, Offer>>,
}

impl OfferStock {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            offers: Mutex::new(HashMap::new()),
        }
    }

    /// Clear the stock and hand every held offer to the caller. Every round
    /// starts here; the stock is repopulated only from the plan's residue.
    pub fn drain(&self) -> Vec<Offer> {
        let mut offers = self.offers.lock().unwrap();
        offers.drain().map(|(_, offer)| offer).collect()
    }

    /// Keep offers for the next round, up to the configured bound. Offers
    /// that do not fit are returned so the caller can decline them.
    pub fn restock(&self, incoming: Vec<Offer>) -> Vec<Offer> {
        let mut offers = self.offers.lock().unwrap();
        let mut overflow = Vec::new();
        for offer in incoming {
            if offers.len() >= self.max_size {
                overflow.push(offer);
            } else {
                offers.insert(offer.node_id.clone(), offer);
            }
        }
        overflow
    }

    /// Node-loss fast path: pull the lost node's offer out of stock, if any.
    pub fn remove_node(&self, node_id: &str) -> Option<Offer> {
        self.offers.lock().unwrap().remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.offers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.lock().unwrap().is_empty()
    }

    /// Aggregate capacity currently in stock.
    pub fn total(&self) -> ResourceQuantity {
        let offers = self.offers.lock().unwrap();
        let mut total = ResourceQuantity::default();
        for offer in offers.values() {
            total += offer.resources.to_quantity();
        }
        total.set_nodes(offers.len() as u32);
        total
    }
}

/// Result of merging stocked and fresh offers for one round.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Exactly one offer per node, entering the round
    pub available: Vec<Offer>,
    /// Every offer of a multiply-offered node; decline immediately
    pub declined: Vec<Offer>,
}

/// Combine stocked offers with freshly delivered ones, one candidate per
/// node. The resource manager frequently re-sends an offer for a node whose
/// previous offer is still in stock; holding both would double-count the
/// node's capacity, so the most recent delivery becomes the round's
/// candidate and every other offer for that node is declined.
pub fn merge_round(stocked: Vec<Offer>, fresh: Vec<Offer>) -> MergeOutcome {
    let mut by_node: HashMap<String, Vec<Offer>> = HashMap::new();
    for offer in stocked.into_iter().chain(fresh) {
        by_node.entry(offer.node_id.clone()).or_default().push(offer);
    }

    let mut outcome = MergeOutcome::default();
    for (_, mut offers) in by_node {
        let keep = offers.pop().unwrap();
        outcome.declined.append(&mut offers);
        outcome.available.push(keep);
    }
    outcome
}
