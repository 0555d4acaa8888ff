//! The admission pipeline: auth gate, rate limiter, validator, dispatcher.
//!
//! Order matters and is the protocol contract: an auth rejection consumes no
//! quota and skips validation entirely; a rate-limited author never reaches
//! the validator; only a fully admitted event touches hooks and storage.

use std::sync::Arc;

use crate::{
    auth::AuthGate,
    error::{HookWarning, RelayError},
    event::Event,
    hooks::HookDispatcher,
    limiter::RateLimiter,
    store::{Filter, StorageContract},
    validate,
};

pub struct Pipeline {
    auth: Arc<dyn AuthGate>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<HookDispatcher>,
}

impl Pipeline {
    pub fn new(
        auth: Arc<dyn AuthGate>,
        limiter: Arc<RateLimiter>,
        dispatcher: Arc<HookDispatcher>,
    ) -> Self {
        Self {
            auth,
            limiter,
            dispatcher,
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthGate> {
        &self.auth
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> Arc<dyn StorageContract> {
        self.dispatcher.store()
    }

    /// Decide one event's admission and, on success, run it through hooks
    /// and storage. Returns the aggregated after-hook warnings.
    pub async fn admit(&self, ev: Event) -> Result<Vec<HookWarning>, RelayError> {
        if let Some(reason) = self.auth.reject_event(&ev) {
            return Err(RelayError::AuthRejected(reason));
        }
        if !self.auth.is_authorized(&ev.pubkey) && !self.limiter.allow(&ev.pubkey, ev.kind) {
            let limit = self.limiter.limit_for(ev.kind);
            return Err(RelayError::RateLimited(format!(
                "at most {limit} events of kind {} per window",
                ev.kind
            )));
        }
        validate::validate(&ev).map_err(RelayError::ValidationFailed)?;
        let warnings = self.dispatcher.dispatch(ev).await?;
        for warning in &warnings {
            tracing::warn!(%warning, "admission completed with warning");
        }
        Ok(warnings)
    }

    /// Run a subscription's filters past the auth gate and storage.
    pub fn run_query(&self, filters: &[Filter]) -> Result<Vec<Event>, RelayError> {
        if let Some(reason) = self.auth.reject_req(filters) {
            return Err(RelayError::QueryRejected(reason));
        }
        let store = self.store();
        let mut events = Vec::new();
        for filter in filters {
            let found = store
                .query(filter)
                .map_err(|e| RelayError::StorageFailure(e.to_string()))?;
            events.extend(found);
        }
        Ok(events)
    }
}
