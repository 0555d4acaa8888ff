//! Read-side reconstruction of the promotion→match→confirmation→payment
//! audit trail.
//!
//! The event log is append-only and multi-writer with no global write order,
//! so the chain is never a write-time state machine: referential checks are
//! a read concern. A confirmation referencing a match that has not arrived
//! yet is stored normally and only reported as orphaned here.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::{
    event::{Coordinate, Event},
    kinds,
    store::{Filter, StorageContract},
};

/// Logical progress of one match through the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainState {
    /// The match exists but neither side has confirmed.
    Matched,
    /// Only the billboard operator has confirmed display.
    BillboardConfirmed,
    /// Only the viewer has confirmed viewing.
    ViewerConfirmed,
    /// Both display and viewing are confirmed, settlement pending.
    Delivered,
    /// The marketplace has attested settlement.
    MarketplaceConfirmed,
    /// The attention owner has independently attested payment receipt.
    PaymentConfirmed,
}

/// Upstream identity a complete trail must resolve to a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    Marketplace,
    Promotion,
    Attention,
    BillboardConfirmation,
    ViewerConfirmation,
}

/// Outcome of reconstructing the trail for one match identity.
#[derive(Debug, Serialize)]
pub struct ChainReport {
    /// Coordinate the reconstruction was asked about.
    pub match_coordinate: String,
    /// Whether the match itself is stored.
    pub match_found: bool,
    /// Progress reached; `None` when the match is missing.
    pub state: Option<ChainState>,
    /// Reference slots that did not resolve to stored events.
    pub missing: Vec<Slot>,
    /// All five slots resolved plus a stored marketplace confirmation.
    pub complete: bool,
    /// Sats attested by the marketplace confirmation, when present.
    pub settled_sats: Option<u64>,
    /// Whether the attention owner independently attested receipt.
    pub payment_attested: bool,
}

/// A stored confirmation whose referenced match is absent.
#[derive(Debug, Serialize)]
pub struct Orphan {
    pub id: String,
    pub kind: u32,
    pub match_coordinate: String,
}

/// Look up the latest event at a coordinate.
fn resolve(store: &dyn StorageContract, coord: &Coordinate) -> Result<Option<Event>> {
    let found = store.query(&Filter {
        kinds: Some(vec![coord.kind]),
        authors: Some(vec![coord.pubkey.clone()]),
        d: Some(coord.d.clone()),
        limit: Some(1),
        ..Filter::default()
    })?;
    Ok(found.into_iter().next())
}

/// Stored events of `kind` whose `a` tags reference `target`.
fn referencing(
    store: &dyn StorageContract,
    kind: u32,
    target: &Coordinate,
) -> Result<Vec<Event>> {
    let candidates = store.query(&Filter {
        kinds: Some(vec![kind]),
        ..Filter::default()
    })?;
    Ok(candidates
        .into_iter()
        .filter(|ev| ev.references().iter().any(|c| c == target))
        .collect())
}

/// Reconstruct the audit trail for one match identity.
pub fn reconstruct(store: &dyn StorageContract, match_coord: &Coordinate) -> Result<ChainReport> {
    let mut report = ChainReport {
        match_coordinate: match_coord.to_string(),
        match_found: false,
        state: None,
        missing: vec![
            Slot::Marketplace,
            Slot::Promotion,
            Slot::Attention,
            Slot::BillboardConfirmation,
            Slot::ViewerConfirmation,
        ],
        complete: false,
        settled_sats: None,
        payment_attested: false,
    };

    let Some(matched) = resolve(store, match_coord)? else {
        return Ok(report);
    };
    report.match_found = true;
    report.missing.clear();

    // Offer slots resolve through the match's own references.
    let promotion = match matched.reference_of_kind(kinds::PROMOTION) {
        Some(coord) => resolve(store, &coord)?,
        None => None,
    };
    if promotion.is_none() {
        report.missing.push(Slot::Promotion);
    }
    let attention = match matched.reference_of_kind(kinds::ATTENTION) {
        Some(coord) => resolve(store, &coord)?,
        None => None,
    };
    if attention.is_none() {
        report.missing.push(Slot::Attention);
    }

    // The marketplace resolves from the match directly or through the
    // promotion's own marketplace reference.
    let marketplace_coord = matched
        .reference_of_kind(kinds::MARKETPLACE)
        .or_else(|| promotion.as_ref().and_then(|p| p.reference_of_kind(kinds::MARKETPLACE)));
    let marketplace = match marketplace_coord {
        Some(coord) => resolve(store, &coord)?,
        None => None,
    };
    if marketplace.is_none() {
        report.missing.push(Slot::Marketplace);
    }

    let billboard_conf = referencing(store, kinds::BILLBOARD_CONFIRMATION, match_coord)?
        .into_iter()
        .next();
    if billboard_conf.is_none() {
        report.missing.push(Slot::BillboardConfirmation);
    }
    let viewer_conf = referencing(store, kinds::ATTENTION_CONFIRMATION, match_coord)?
        .into_iter()
        .next();
    if viewer_conf.is_none() {
        report.missing.push(Slot::ViewerConfirmation);
    }

    let settlement = referencing(store, kinds::MARKETPLACE_CONFIRMATION, match_coord)?
        .into_iter()
        .next();
    if let Some(settlement) = &settlement {
        report.settled_sats = serde_json::from_str::<Value>(&settlement.content)
            .ok()
            .as_ref()
            .and_then(|v| v.get("sats_settled"))
            .and_then(Value::as_u64);
    }

    let payment = referencing(store, kinds::ATTENTION_PAYMENT_CONFIRMATION, match_coord)?
        .into_iter()
        .next();
    report.payment_attested = payment.is_some();

    report.state = Some(match (&billboard_conf, &viewer_conf) {
        _ if payment.is_some() => ChainState::PaymentConfirmed,
        _ if settlement.is_some() => ChainState::MarketplaceConfirmed,
        (Some(_), Some(_)) => ChainState::Delivered,
        (Some(_), None) => ChainState::BillboardConfirmed,
        (None, Some(_)) => ChainState::ViewerConfirmed,
        (None, None) => ChainState::Matched,
    });

    report.complete = report.missing.is_empty() && settlement.is_some();
    Ok(report)
}

/// Stored confirmations whose referenced match does not exist. Such events
/// were admitted legitimately; the match may simply not have propagated
/// across the relay set yet.
pub fn orphans(store: &dyn StorageContract) -> Result<Vec<Orphan>> {
    let confirmation_kinds = [
        kinds::BILLBOARD_CONFIRMATION,
        kinds::ATTENTION_CONFIRMATION,
        kinds::MARKETPLACE_CONFIRMATION,
        kinds::ATTENTION_PAYMENT_CONFIRMATION,
    ];
    let mut found = Vec::new();
    for kind in confirmation_kinds {
        let confirmations = store.query(&Filter {
            kinds: Some(vec![kind]),
            ..Filter::default()
        })?;
        for ev in confirmations {
            let Some(match_coord) = ev.reference_of_kind(kinds::MATCH) else {
                continue;
            };
            if resolve(store, &match_coord)?.is_none() {
                found.push(Orphan {
                    id: ev.id.clone(),
                    kind: ev.kind,
                    match_coordinate: match_coord.to_string(),
                });
            }
        }
    }
    Ok(found)
}
