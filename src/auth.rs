//! Pluggable connection- and event-level authorization.
//!
//! The gate is consulted before rate limiting and validation: a rejection
//! here short-circuits the whole pipeline with no quota consumed and no
//! schema checked.

use dashmap::DashSet;

use crate::{event::Event, store::Filter};

/// Authorization decisions around connections, subscriptions, and events.
///
/// Every method has an accept-all default so implementations override only
/// the decisions they care about.
pub trait AuthGate: Send + Sync {
    /// A transport connection arrived. `Err(reason)` refuses it outright.
    fn on_connection(&self, remote: &str) -> Result<(), String> {
        let _ = remote;
        Ok(())
    }

    /// The connection completed its handshake.
    fn on_connect(&self, remote: &str) {
        let _ = remote;
    }

    /// A client proved control of `pubkey` (NIP-42 handled upstream).
    fn on_auth(&self, pubkey: &str) {
        let _ = pubkey;
    }

    /// Veto a subscription request.
    fn reject_req(&self, filters: &[Filter]) -> Option<String> {
        let _ = filters;
        None
    }

    /// Veto an event before any quota or schema work happens.
    fn reject_event(&self, ev: &Event) -> Option<String> {
        let _ = ev;
        None
    }

    /// Whether `pubkey` bypasses rate limiting unconditionally.
    fn is_authorized(&self, pubkey: &str) -> bool {
        let _ = pubkey;
        false
    }
}

/// Open relay: accepts everything, authorizes nobody.
pub struct OpenGate;

impl AuthGate for OpenGate {}

/// Gate with a configured bypass allow-list and ban-list.
pub struct AllowListGate {
    authorized: DashSet<String>,
    banned: DashSet<String>,
}

impl AllowListGate {
    pub fn new(
        authorized: impl IntoIterator<Item = String>,
        banned: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            authorized: authorized.into_iter().collect(),
            banned: banned.into_iter().collect(),
        }
    }
}

impl AuthGate for AllowListGate {
    fn on_auth(&self, pubkey: &str) {
        // An authenticated identity earns the rate-limit bypass.
        self.authorized.insert(pubkey.to_string());
    }

    fn reject_event(&self, ev: &Event) -> Option<String> {
        if self.banned.contains(&ev.pubkey) {
            Some(format!("author {} is banned", ev.pubkey))
        } else {
            None
        }
    }

    fn is_authorized(&self, pubkey: &str) -> bool {
        self.authorized.contains(pubkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pubkey: &str) -> Event {
        Event {
            id: "aa11".into(),
            pubkey: pubkey.into(),
            kind: 1,
            created_at: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn open_gate_accepts_everything() {
        let gate = OpenGate;
        assert!(gate.on_connection("127.0.0.1").is_ok());
        assert!(gate.reject_event(&event("p1")).is_none());
        assert!(gate.reject_req(&[Filter::default()]).is_none());
        assert!(!gate.is_authorized("p1"));
    }

    #[test]
    fn allow_list_authorizes_configured_and_authenticated() {
        let gate = AllowListGate::new(["vip".to_string()], []);
        assert!(gate.is_authorized("vip"));
        assert!(!gate.is_authorized("p1"));
        gate.on_auth("p1");
        assert!(gate.is_authorized("p1"));
    }

    #[test]
    fn bans_reject_events_with_a_reason() {
        let gate = AllowListGate::new([], ["spammer".to_string()]);
        let reason = gate.reject_event(&event("spammer")).unwrap();
        assert!(reason.contains("spammer"));
        assert!(gate.reject_event(&event("p1")).is_none());
    }
}
