use crate::internal::common::ids::OfferId;
use crate::internal::records::Offer;

/// Offers available in the current cycle. Matched offers are removed
/// immediately; ids of the remaining offers stay valid.
#[derive(Debug, Default)]
pub struct OfferPool {
    slots: Vec<Option<Offer>>,
    live: usize,
}

impl OfferPool {
    pub fn new(offers: Vec<Offer>) -> Self {
        OfferPool {
            live: offers.len(),
            slots: offers.into_iter().map(Some).collect(),
        }
    }

    pub fn get(&self, id: OfferId) -> Option<&Offer> {
        self.slots.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn contains(&self, id: OfferId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: OfferId) -> Option<Offer> {
        let offer = self.slots.get_mut(id.index())?.take();
        if offer.is_some() {
            self.live -= 1;
        }
        offer
    }

    pub fn iter(&self) -> impl Iterator<Item = (OfferId, &Offer)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|o| (OfferId::new(index as u32), o)))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn total_weight(&self, use_slot_weights: bool) -> f64 {
        self.iter().map(|(_, o)| o.pool_weight(use_slot_weights)).sum()
    }

    /// Smallest slot weight of any offer; zero for an empty pool.
    pub fn min_slot_weight(&self) -> f64 {
        self.iter()
            .map(|(_, o)| o.slot_weight)
            .min_by(|a, b| a.total_cmp(b))
            .unwrap_or(0.0)
    }
}
