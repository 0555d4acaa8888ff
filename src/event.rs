//! Marketplace event model: events, tags, and coordinates.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::kinds;

/// Wrapper for an event tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. The marketplace protocol uses:
///
/// - `d` – stable identifier for replaceable events
/// - `a` – coordinate reference to another event's logical identity
/// - `e` – reference to another event ID (deletions)
/// - `p` – reference to another participant's public key
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

/// Core event admitted by the pipeline and served to clients.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b0a1...",
///   "kind": 30422,
///   "created_at": 1700000000,
///   "tags": [["d", "promo1"], ["a", "30420:b0a1...:main"]],
///   "content": "{\"bid_sats\":100,\"duration_secs\":30}",
///   "sig": "deadbeef"
/// }
/// ```
///
/// Signature validity is checked by an upstream collaborator before events
/// reach this pipeline; `sig` is carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 over the canonical serialization).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Protocol-assigned kind number, e.g. `30422`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Tags such as `d` (identifier) or `a` (coordinate reference).
    pub tags: Vec<Tag>,
    /// Kind-specific content payload, usually JSON.
    pub content: String,
    /// Schnorr signature over the event hash, verified upstream.
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|Tag(fields)| match fields.as_slice() {
                [t, val, ..] if t == name => Some(val.as_str()),
                _ => None,
            })
    }

    /// All values carried by tags named `name`, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter_map(move |Tag(fields)| match fields.as_slice() {
                [t, val, ..] if t == name => Some(val.as_str()),
                _ => None,
            })
    }

    /// The `d` tag value giving this event its replaceable identity.
    pub fn d_tag(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Logical identity of a parameterized-replaceable event.
    ///
    /// `None` for kinds outside the replaceable range or events missing a
    /// `d` tag.
    pub fn coordinate(&self) -> Option<Coordinate> {
        if !kinds::is_parameterized_replaceable(self.kind) {
            return None;
        }
        Some(Coordinate {
            kind: self.kind,
            pubkey: self.pubkey.clone(),
            d: self.d_tag()?.to_string(),
        })
    }

    /// Coordinates referenced by this event's `a` tags, skipping malformed
    /// values.
    pub fn references(&self) -> Vec<Coordinate> {
        self.tag_values("a")
            .filter_map(|v| Coordinate::parse(v).ok())
            .collect()
    }

    /// First referenced coordinate of the given kind, if any.
    pub fn reference_of_kind(&self, kind: u32) -> Option<Coordinate> {
        self.references().into_iter().find(|c| c.kind == kind)
    }
}

/// Reference to a replaceable event's logical identity rather than its
/// content hash: `"<kind>:<pubkey>:<d-tag>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub kind: u32,
    pub pubkey: String,
    pub d: String,
}

impl Coordinate {
    /// Parse a coordinate string. The d-tag portion may itself contain
    /// colons, so only the first two separators split.
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<u32>().ok())
            .ok_or_else(|| format!("coordinate has no numeric kind: {s}"))?;
        let pubkey = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("coordinate has no pubkey: {s}"))?
            .to_string();
        let d = parts
            .next()
            .ok_or_else(|| format!("coordinate has no d-tag: {s}"))?
            .to_string();
        Ok(Self { kind, pubkey, d })
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.d)
    }
}

/// Recompute the event hash from its fields.
pub fn event_hash(ev: &Event) -> anyhow::Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}
