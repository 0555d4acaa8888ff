//! Protocol kind numbering and per-kind rate quotas.
//!
//! Kind numbers are a fixed external contract shared with every other
//! marketplace participant and must never be renumbered. Unrecognized kinds
//! fall back to generic handling rather than being rejected.

/// Generic deletion event (NIP-09), honored outside the kind-hook table.
pub const DELETION: u32 = 5;
/// Block header republished by the chain bridge.
pub const BLOCK: u32 = 2121;
/// Marketplace descriptor.
pub const MARKETPLACE: u32 = 30420;
/// Display surface offered inside a marketplace.
pub const BILLBOARD: u32 = 30421;
/// Promotion offer bidding for attention.
pub const PROMOTION: u32 = 30422;
/// Attention offer from a viewer.
pub const ATTENTION: u32 = 30423;
/// Pairing of one promotion with one attention offer.
pub const MATCH: u32 = 30424;
/// Billboard operator attests the promotion was displayed.
pub const BILLBOARD_CONFIRMATION: u32 = 30425;
/// Viewer attests the promotion was seen.
pub const ATTENTION_CONFIRMATION: u32 = 30426;
/// Marketplace attests settlement of a match.
pub const MARKETPLACE_CONFIRMATION: u32 = 30427;
/// Attention owner independently attests payment receipt.
pub const ATTENTION_PAYMENT_CONFIRMATION: u32 = 30428;

/// Per-window quota for kinds without an explicit entry.
pub const DEFAULT_LIMIT: u32 = 100;

/// Whether a kind carries parameterized-replaceable identity
/// (kind, pubkey, d-tag).
pub fn is_parameterized_replaceable(kind: u32) -> bool {
    (30000..40000).contains(&kind)
}

/// Default per-window quota for a kind.
///
/// High-frequency kinds (matches, block headers) get larger quotas than
/// low-frequency, high-value kinds (offers, descriptors) where spam does the
/// most damage.
pub fn default_limit(kind: u32) -> u32 {
    match kind {
        MATCH => 480,
        BLOCK => 300,
        BILLBOARD_CONFIRMATION | ATTENTION_CONFIRMATION => 240,
        MARKETPLACE_CONFIRMATION | ATTENTION_PAYMENT_CONFIRMATION => 120,
        DELETION | PROMOTION => 60,
        ATTENTION => 30,
        BILLBOARD => 24,
        MARKETPLACE => 12,
        _ => DEFAULT_LIMIT,
    }
}

/// Human-readable name for logs and the quota table.
pub fn name(kind: u32) -> &'static str {
    match kind {
        DELETION => "deletion",
        BLOCK => "block",
        MARKETPLACE => "marketplace",
        BILLBOARD => "billboard",
        PROMOTION => "promotion",
        ATTENTION => "attention",
        MATCH => "match",
        BILLBOARD_CONFIRMATION => "billboard-confirmation",
        ATTENTION_CONFIRMATION => "attention-confirmation",
        MARKETPLACE_CONFIRMATION => "marketplace-confirmation",
        ATTENTION_PAYMENT_CONFIRMATION => "attention-payment-confirmation",
        _ => "other",
    }
}

/// All marketplace-protocol kinds, in chain order.
pub fn protocol_kinds() -> [u32; 11] {
    [
        DELETION,
        BLOCK,
        MARKETPLACE,
        BILLBOARD,
        PROMOTION,
        ATTENTION,
        MATCH,
        BILLBOARD_CONFIRMATION,
        ATTENTION_CONFIRMATION,
        MARKETPLACE_CONFIRMATION,
        ATTENTION_PAYMENT_CONFIRMATION,
    ]
}
