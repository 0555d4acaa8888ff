//! Storage contract and the in-memory reference implementation.
//!
//! The pipeline is storage-agnostic: it talks to a narrow `StorageContract`
//! and relies on the implementation's own consistency guarantees for
//! serializing conflicting writes to the same replaceable identity. The
//! `MemoryStore` shipped here backs the tests and the default binary.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::Value;

use crate::event::Event;

/// Result cap applied when a query specifies no limit.
pub const DEFAULT_QUERY_LIMIT: usize = 500;

/// Narrow persistence capability consumed by the pipeline.
pub trait StorageContract: Send + Sync {
    /// Persist one event. Idempotent per event id.
    fn store(&self, ev: &Event) -> Result<()>;
    /// Return events matching the filter, `created_at` descending, with
    /// replaceable identities collapsed to their latest version.
    fn query(&self, filter: &Filter) -> Result<Vec<Event>>;
    /// Remove an event by id, failing if the id is unknown.
    fn delete(&self, id: &str) -> Result<()>;
}

/// Query parameters shared by the HTTP and WebSocket interfaces.
///
/// Fields combine with AND; multiple values within one field combine with OR.
#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    /// Single `#d` tag value.
    pub d: Option<String>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Build a `Filter` from a subscription filter JSON object.
    pub fn from_value(val: &Value) -> Self {
        let ids = val.get("ids").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        let authors = val.get("authors").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        let kinds = val.get("kinds").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_u64().map(|u| u as u32))
                .collect()
        });
        // Tag-based queries use a one-element array for `#d`.
        let d = val
            .get("#d")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let since = val.get("since").and_then(|v| v.as_u64());
        let until = val.get("until").and_then(|v| v.as_u64());
        let limit = val
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        Filter {
            ids,
            authors,
            kinds,
            d,
            since,
            until,
            limit,
        }
    }

    /// Whether a single event satisfies every populated field.
    fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false;
            }
        }
        if let Some(d) = &self.d {
            if ev.d_tag() != Some(d.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|s| ev.created_at < s) {
            return false;
        }
        if self.until.is_some_and(|u| ev.created_at > u) {
            return false;
        }
        true
    }
}

/// Append-only in-memory store with replaceable-read semantics.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageContract for MemoryStore {
    fn store(&self, ev: &Event) -> Result<()> {
        let mut events = self.events.write();
        // Storing the same id twice is a no-op, matching at-most-once
        // admission per identity-version.
        if events.iter().any(|e| e.id == ev.id) {
            return Ok(());
        }
        events.push(ev.clone());
        Ok(())
    }

    fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let events = self.events.read();
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|ev| filter.matches(ev))
            .cloned()
            .collect();
        // Sort newest-first so replaceable events keep the most recent
        // version after the dedup below.
        matched.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        let mut seen = HashSet::new();
        matched.retain(|ev| match ev.coordinate() {
            Some(coord) => seen.insert(coord),
            None => true,
        });
        matched.truncate(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT));
        Ok(matched)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|ev| ev.id != id);
        if events.len() == before {
            return Err(anyhow!("unknown event id: {id}"));
        }
        Ok(())
    }
}
