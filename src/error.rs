//! Error taxonomy for the admission pipeline.

use thiserror::Error;

/// Per-event and per-connection failures surfaced by the pipeline.
///
/// Everything up through `HookTimeout` is returned synchronously to the
/// publishing client with a human-readable reason; none of these tear down
/// the connection or the process.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection refused before any authentication took place.
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),
    /// The auth gate refused the event before rate limiting or validation.
    #[error("blocked: {0}")]
    AuthRejected(String),
    /// The auth gate refused a subscription request.
    #[error("query rejected: {0}")]
    QueryRejected(String),
    /// The author exhausted its per-kind quota for the current window.
    #[error("rate-limited: {0}")]
    RateLimited(String),
    /// The event failed its kind schema.
    #[error("invalid: {0}")]
    ValidationFailed(String),
    /// A before-hook vetoed admission; carries the vetoing handler's reason.
    #[error("blocked: {0}")]
    HookAborted(String),
    /// The before-hook phase exceeded its per-event deadline.
    #[error("error: before-hook deadline exceeded")]
    HookTimeout,
    /// The storage collaborator failed or timed out committing the event.
    #[error("error: storage failure: {0}")]
    StorageFailure(String),
}

impl RelayError {
    /// Reason string sent to the client in an `["OK", …, false, reason]`
    /// frame. The display form already carries the machine-readable prefix.
    pub fn ok_reason(&self) -> String {
        self.to_string()
    }
}

/// Non-fatal after-hook failure. The event is already committed, so these
/// are logged and aggregated for observability instead of being returned as
/// errors.
#[derive(Debug, Clone, PartialEq)]
pub struct HookWarning {
    /// Kind the handler was registered for.
    pub kind: u32,
    /// The failing handler's reason, or a deadline note.
    pub reason: String,
}

impl std::fmt::Display for HookWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "after-hook for kind {}: {}", self.kind, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reasons_carry_machine_prefixes() {
        assert!(RelayError::ValidationFailed("missing d tag".into())
            .ok_reason()
            .starts_with("invalid:"));
        assert!(RelayError::RateLimited("slow down".into())
            .ok_reason()
            .starts_with("rate-limited:"));
        assert!(RelayError::AuthRejected("banned".into())
            .ok_reason()
            .starts_with("blocked:"));
        assert!(RelayError::StorageFailure("disk full".into())
            .ok_reason()
            .starts_with("error:"));
    }

    #[test]
    fn warning_display_names_kind() {
        let w = HookWarning {
            kind: 30424,
            reason: "notify failed".into(),
        };
        assert_eq!(w.to_string(), "after-hook for kind 30424: notify failed");
    }
}
