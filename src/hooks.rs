//! Before/after lifecycle hooks around the single storage call.
//!
//! A Before handler can veto admission; an After handler cannot undo it.
//! Storage commit is the only externally observable side effect worth
//! protecting, so everything after the commit is notification, not
//! gatekeeping.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use crate::{
    error::{HookWarning, RelayError},
    event::Event,
    kinds,
    store::{Filter, StorageContract},
};

/// A lifecycle handler. Before handlers return `Err(reason)` to veto.
pub type HookFn = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Wrap an async closure as a [`HookFn`].
pub fn hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |ev| Box::pin(f(ev)))
}

struct Registration {
    id: u64,
    hook: HookFn,
}

#[derive(Default)]
struct KindHooks {
    before: Vec<Registration>,
    after: Vec<Registration>,
}

type Registry = RwLock<HashMap<u32, KindHooks>>;

#[derive(Clone, Copy)]
enum Phase {
    Before,
    After,
}

/// Removes exactly the registration that produced it.
pub struct HookHandle {
    registry: Weak<Registry>,
    kind: u32,
    id: u64,
    phase: Phase,
}

impl HookHandle {
    pub fn unregister(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.write();
        if let Some(hooks) = registry.get_mut(&self.kind) {
            let list = match self.phase {
                Phase::Before => &mut hooks.before,
                Phase::After => &mut hooks.after,
            };
            list.retain(|reg| reg.id != self.id);
        }
    }
}

/// Kind-indexed registry of ordered Before/After handlers around one storage
/// call. Registrations happen at wiring time, so the registry is read-mostly
/// and a plain reader/writer lock suffices.
pub struct HookDispatcher {
    registry: Arc<Registry>,
    store: Arc<dyn StorageContract>,
    /// Per-event-total ceiling applied separately to the Before phase, the
    /// storage call, and the After phase.
    timeout: Duration,
    next_id: AtomicU64,
}

impl HookDispatcher {
    pub fn new(store: Arc<dyn StorageContract>, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            store,
            timeout,
            next_id: AtomicU64::new(0),
        }
    }

    /// The storage collaborator this dispatcher commits to.
    pub fn store(&self) -> Arc<dyn StorageContract> {
        Arc::clone(&self.store)
    }

    pub fn register_before(&self, kind: u32, hook: HookFn) -> HookHandle {
        self.register(kind, hook, Phase::Before)
    }

    pub fn register_after(&self, kind: u32, hook: HookFn) -> HookHandle {
        self.register(kind, hook, Phase::After)
    }

    fn register(&self, kind: u32, hook: HookFn, phase: Phase) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.write();
        let hooks = registry.entry(kind).or_default();
        let list = match phase {
            Phase::Before => &mut hooks.before,
            Phase::After => &mut hooks.after,
        };
        list.push(Registration { id, hook });
        HookHandle {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            phase,
        }
    }

    /// Snapshot one phase's handlers so no lock is held across awaits.
    fn handlers(&self, kind: u32, phase: Phase) -> Vec<HookFn> {
        let registry = self.registry.read();
        let Some(hooks) = registry.get(&kind) else {
            return vec![];
        };
        let list = match phase {
            Phase::Before => &hooks.before,
            Phase::After => &hooks.after,
        };
        list.iter().map(|reg| Arc::clone(&reg.hook)).collect()
    }

    /// Run an admitted event through Before handlers, storage, and After
    /// handlers. Returns the aggregated After warnings on success.
    pub async fn dispatch(&self, ev: Event) -> Result<Vec<HookWarning>, RelayError> {
        if ev.kind == kinds::DELETION {
            return self.dispatch_deletion(ev).await;
        }

        let before = self.handlers(ev.kind, Phase::Before);
        let vetoed = tokio::time::timeout(self.timeout, async {
            for hook in before {
                hook(ev.clone()).await.map_err(RelayError::HookAborted)?;
            }
            Ok::<(), RelayError>(())
        })
        .await;
        match vetoed {
            Err(_) => return Err(RelayError::HookTimeout),
            Ok(result) => result?,
        }

        self.commit(ev.clone()).await?;

        let after = self.handlers(ev.kind, Phase::After);
        let mut warnings = Vec::new();
        let finished = tokio::time::timeout(self.timeout, async {
            for hook in after {
                if let Err(reason) = hook(ev.clone()).await {
                    tracing::warn!(kind = ev.kind, %reason, "after-hook failed");
                    warnings.push(HookWarning {
                        kind: ev.kind,
                        reason,
                    });
                }
            }
        })
        .await;
        if finished.is_err() {
            let warning = HookWarning {
                kind: ev.kind,
                reason: "after-hook deadline exceeded".into(),
            };
            tracing::warn!(kind = ev.kind, "after-hook deadline exceeded");
            warnings.push(warning);
        }
        Ok(warnings)
    }

    /// Store the event on a blocking thread, bounded by the hook ceiling.
    async fn commit(&self, ev: Event) -> Result<(), RelayError> {
        let store = Arc::clone(&self.store);
        let stored = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || store.store(&ev)),
        )
        .await;
        match stored {
            Err(_) => Err(RelayError::StorageFailure("store call timed out".into())),
            Ok(Err(join)) => Err(RelayError::StorageFailure(join.to_string())),
            Ok(Ok(Err(e))) => Err(RelayError::StorageFailure(e.to_string())),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    /// Deletions bypass the kind table. Only targets authored by the
    /// deletion's own pubkey are removed; foreign or unknown ids are skipped.
    /// The deletion event itself is stored for downstream relays.
    async fn dispatch_deletion(&self, ev: Event) -> Result<Vec<HookWarning>, RelayError> {
        let store = Arc::clone(&self.store);
        let deleted = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
                let mut skipped = Vec::new();
                for id in ev.tag_values("e") {
                    let found = store.query(&Filter {
                        ids: Some(vec![id.to_string()]),
                        ..Filter::default()
                    })?;
                    match found.first() {
                        Some(target) if target.pubkey == ev.pubkey => store.delete(id)?,
                        _ => skipped.push(id.to_string()),
                    }
                }
                store.store(&ev)?;
                Ok(skipped)
            }),
        )
        .await;
        match deleted {
            Err(_) => Err(RelayError::StorageFailure("delete call timed out".into())),
            Ok(Err(join)) => Err(RelayError::StorageFailure(join.to_string())),
            Ok(Ok(Err(e))) => Err(RelayError::StorageFailure(e.to_string())),
            Ok(Ok(Ok(skipped))) => {
                for id in skipped {
                    tracing::warn!(%id, "deletion target skipped");
                }
                Ok(vec![])
            }
        }
    }
}
