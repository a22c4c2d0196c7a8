//! Offer tracker
//!
//! Holds outstanding offers only. Resolving an offer sets its terminal
//! disposition and drops it from tracking, so a second resolution of the same
//! id (a timer racing an accept, a duplicate decline) finds nothing.

use corral_types::{AgentId, FrameworkId, Offer, OfferDisposition, OfferId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a launch batch's offers were rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidOffers {
    Empty,
    Duplicate(OfferId),
    Unknown(OfferId),
    ForeignFramework(OfferId),
    MultipleAgents,
}

impl fmt::Display for InvalidOffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOffers::Empty => write!(f, "No offers supplied"),
            InvalidOffers::Duplicate(id) => write!(f, "Duplicate {}", id),
            InvalidOffers::Unknown(id) => write!(f, "{} is no longer valid", id),
            InvalidOffers::ForeignFramework(id) => write!(f, "{} belongs to another framework", id),
            InvalidOffers::MultipleAgents => write!(f, "Offers span more than one agent"),
        }
    }
}

#[derive(Debug, Default)]
pub struct OfferTracker {
    offers: BTreeMap<OfferId, Offer>,
    by_agent: BTreeMap<AgentId, BTreeSet<OfferId>>,
    by_framework: BTreeMap<FrameworkId, BTreeSet<OfferId>>,
}

impl OfferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offer: Offer) {
        self.by_agent
            .entry(offer.agent_id.clone())
            .or_default()
            .insert(offer.id);
        self.by_framework
            .entry(offer.framework_id.clone())
            .or_default()
            .insert(offer.id);
        self.offers.insert(offer.id, offer);
    }

    pub fn get(&self, id: &OfferId) -> Option<&Offer> {
        self.offers.get(id)
    }

    pub fn is_outstanding(&self, id: &OfferId) -> bool {
        self.offers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    pub fn for_agent(&self, agent_id: &AgentId) -> Vec<OfferId> {
        self.by_agent
            .get(agent_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn for_framework(&self, framework_id: &FrameworkId) -> Vec<OfferId> {
        self.by_framework
            .get(framework_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check a launch batch: ids pairwise distinct, all outstanding, all made
    /// to `framework_id`, all on one agent. Returns that agent.
    pub fn validate(
        &self,
        framework_id: &FrameworkId,
        offer_ids: &[OfferId],
    ) -> Result<AgentId, InvalidOffers> {
        let mut seen = BTreeSet::new();
        let mut agent: Option<&AgentId> = None;

        for id in offer_ids {
            if !seen.insert(*id) {
                return Err(InvalidOffers::Duplicate(*id));
            }
            let offer = self.offers.get(id).ok_or(InvalidOffers::Unknown(*id))?;
            if &offer.framework_id != framework_id {
                return Err(InvalidOffers::ForeignFramework(*id));
            }
            match agent {
                Some(a) if a != &offer.agent_id => return Err(InvalidOffers::MultipleAgents),
                _ => agent = Some(&offer.agent_id),
            }
        }

        agent.cloned().ok_or(InvalidOffers::Empty)
    }

    /// Give an outstanding offer its terminal disposition and stop tracking
    /// it. `None` if the offer is not outstanding.
    pub fn resolve(&mut self, id: &OfferId, disposition: OfferDisposition) -> Option<Offer> {
        let mut offer = self.offers.remove(id)?;

        if let Some(ids) = self.by_agent.get_mut(&offer.agent_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_agent.remove(&offer.agent_id);
            }
        }
        if let Some(ids) = self.by_framework.get_mut(&offer.framework_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_framework.remove(&offer.framework_id);
            }
        }

        match offer.disposition.transition(disposition) {
            Ok(()) => Some(offer),
            Err(_) => None,
        }
    }
}
