//! Pluggable promotion/attention matching seam.
//!
//! The pairing heuristic is deliberately outside this crate's contract; the
//! pipeline only needs a capability interface and one naive reference
//! implementation for tests and local runs.

use anyhow::Result;

use crate::{
    event::Event,
    kinds,
    store::{Filter, StorageContract},
};

/// Proposes (promotion, attention) pairings over the currently stored
/// offers. Implementations must not mutate storage.
pub trait Matcher: Send + Sync {
    fn find_matches(&self, store: &dyn StorageContract) -> Result<Vec<(Event, Event)>>;
}

/// First-come pairing of offers that share a marketplace.
pub struct FifoMatcher;

impl Matcher for FifoMatcher {
    fn find_matches(&self, store: &dyn StorageContract) -> Result<Vec<(Event, Event)>> {
        let mut promotions = store.query(&Filter {
            kinds: Some(vec![kinds::PROMOTION]),
            ..Filter::default()
        })?;
        let mut attentions = store.query(&Filter {
            kinds: Some(vec![kinds::ATTENTION]),
            ..Filter::default()
        })?;
        // Queries return newest-first; pair oldest offers first.
        promotions.reverse();
        attentions.reverse();

        let mut pairs = Vec::new();
        let mut taken = vec![false; attentions.len()];
        for promotion in promotions {
            let Some(marketplace) = promotion.reference_of_kind(kinds::MARKETPLACE) else {
                continue;
            };
            let candidate = attentions.iter().enumerate().find(|(i, offer)| {
                !taken[*i]
                    && offer
                        .reference_of_kind(kinds::MARKETPLACE)
                        .is_some_and(|m| m == marketplace)
            });
            if let Some((i, offer)) = candidate {
                taken[i] = true;
                pairs.push((promotion, offer.clone()));
            }
        }
        Ok(pairs)
    }
}
