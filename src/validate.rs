//! Per-kind event schema validation.
//!
//! Validation is pure: it never touches storage and never mutates the event,
//! so every rule here is exercised by table-driven tests. Deletion events and
//! kinds outside the marketplace numbering only get the generic envelope
//! check; the pipeline never fails closed on a kind it does not recognize.

use serde_json::Value;

use crate::{
    event::{Coordinate, Event},
    kinds,
};

/// Check an event against its kind schema. Returns the rejection reason on
/// failure.
pub fn validate(ev: &Event) -> Result<(), String> {
    envelope(ev)?;
    match ev.kind {
        kinds::MARKETPLACE => marketplace(ev),
        kinds::BILLBOARD => billboard(ev),
        kinds::PROMOTION => promotion(ev),
        kinds::ATTENTION => attention(ev),
        kinds::MATCH => match_event(ev),
        kinds::BILLBOARD_CONFIRMATION => billboard_confirmation(ev),
        kinds::ATTENTION_CONFIRMATION => attention_confirmation(ev),
        kinds::MARKETPLACE_CONFIRMATION => marketplace_confirmation(ev),
        kinds::ATTENTION_PAYMENT_CONFIRMATION => payment_confirmation(ev),
        kinds::BLOCK => block(ev),
        kinds::DELETION => deletion(ev),
        _ => Ok(()),
    }
}

/// Well-formed envelope: non-empty id and pubkey, a nonzero timestamp, and
/// coordinate-shaped `a` tags wherever they appear.
fn envelope(ev: &Event) -> Result<(), String> {
    if ev.id.is_empty() {
        return Err("missing event id".into());
    }
    if ev.pubkey.is_empty() {
        return Err("missing pubkey".into());
    }
    if ev.created_at == 0 {
        return Err("missing created_at".into());
    }
    for value in ev.tag_values("a") {
        Coordinate::parse(value).map_err(|e| format!("malformed a tag: {e}"))?;
    }
    Ok(())
}

fn marketplace(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    let content = content_json(ev)?;
    require_str(&content, "name")?;
    optional_u64(&content, "fee_sats")?;
    Ok(())
}

fn billboard(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MARKETPLACE, "marketplace")?;
    let content = content_json(ev)?;
    require_str(&content, "name")?;
    optional_u64(&content, "width")?;
    optional_u64(&content, "height")?;
    Ok(())
}

fn promotion(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MARKETPLACE, "marketplace")?;
    let content = content_json(ev)?;
    require_u64(&content, "bid_sats")?;
    require_u64(&content, "duration_secs")?;
    Ok(())
}

fn attention(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MARKETPLACE, "marketplace")?;
    let content = content_json(ev)?;
    require_u64(&content, "rate_sats")?;
    require_u64(&content, "duration_secs")?;
    Ok(())
}

fn match_event(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::PROMOTION, "promotion")?;
    require_ref(ev, kinds::ATTENTION, "attention")?;
    let content = content_json(ev)?;
    require_u64(&content, "sats")?;
    Ok(())
}

fn billboard_confirmation(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MATCH, "match")?;
    let content = content_json(ev)?;
    require_u64(&content, "displayed_at")?;
    Ok(())
}

fn attention_confirmation(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MATCH, "match")?;
    let content = content_json(ev)?;
    require_u64(&content, "viewed_at")?;
    Ok(())
}

fn marketplace_confirmation(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MATCH, "match")?;
    require_ref(ev, kinds::BILLBOARD_CONFIRMATION, "billboard-confirmation")?;
    require_ref(ev, kinds::ATTENTION_CONFIRMATION, "attention-confirmation")?;
    let content = content_json(ev)?;
    require_u64(&content, "sats_settled")?;
    Ok(())
}

fn payment_confirmation(ev: &Event) -> Result<(), String> {
    require_d(ev)?;
    require_ref(ev, kinds::MATCH, "match")?;
    let content = content_json(ev)?;
    require_u64(&content, "sats_received")?;
    Ok(())
}

fn block(ev: &Event) -> Result<(), String> {
    let content = content_json(ev)?;
    require_u64(&content, "height")?;
    require_str(&content, "hash")?;
    Ok(())
}

fn deletion(ev: &Event) -> Result<(), String> {
    if ev.tag_values("e").next().is_none() {
        return Err("deletion carries no e tags".into());
    }
    Ok(())
}

/// Parse the content payload as a JSON object.
fn content_json(ev: &Event) -> Result<Value, String> {
    let value: Value = serde_json::from_str(&ev.content)
        .map_err(|_| format!("{} content is not valid JSON", kinds::name(ev.kind)))?;
    if !value.is_object() {
        return Err(format!("{} content is not a JSON object", kinds::name(ev.kind)));
    }
    Ok(value)
}

fn require_d(ev: &Event) -> Result<(), String> {
    match ev.d_tag() {
        Some(d) if !d.is_empty() => Ok(()),
        _ => Err(format!("{} requires a d tag", kinds::name(ev.kind))),
    }
}

/// An `a` tag referencing a coordinate of the given kind must be present.
fn require_ref(ev: &Event, kind: u32, label: &str) -> Result<Coordinate, String> {
    ev.reference_of_kind(kind)
        .ok_or_else(|| format!("{} requires an a tag referencing a {label}", kinds::name(ev.kind)))
}

/// Field must be present and a non-negative integer. JSON numbers that are
/// negative or fractional fail `as_u64` and are rejected.
fn require_u64(content: &Value, field: &str) -> Result<u64, String> {
    content
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("content field {field} must be a non-negative integer"))
}

fn require_str(content: &Value, field: &str) -> Result<(), String> {
    match content.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(format!("content field {field} must be a non-empty string")),
    }
}

/// Field may be absent, but when present must be a non-negative integer.
fn optional_u64(content: &Value, field: &str) -> Result<(), String> {
    match content.get(field) {
        None => Ok(()),
        Some(v) if v.as_u64().is_some() => Ok(()),
        Some(_) => Err(format!("content field {field} must be a non-negative integer")),
    }
}
