//! Type-safe observer channel (C10, §4.10).
//!
//! Listeners are registered per-vault or globally; dispatch snapshots the
//! listener set before iterating so a handler may subscribe/unsubscribe
//! during its own invocation without corrupting the in-flight dispatch
//! (§5, §9 design note). Handler panics/errors are caught and routed to the
//! `Error` event instead of propagating into the emitter, and `Error` event
//! dispatch never re-enters itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Events the core publishes to observers (§4.10).
#[derive(Debug, Clone)]
pub enum Event {
    VaultAdded { vault_id: String },
    VaultRemoved { vault_id: String },
    ChainAdded { vault_id: String, chain: String },
    ChainRemoved { vault_id: String, chain: String },
    TokenAdded { vault_id: String, chain: String, token_id: String },
    TokenRemoved { vault_id: String, chain: String, token_id: String },
    BalanceUpdated { vault_id: String, chain: String, balance: String },
    SigningProgress { session_id: String, step: String, percent: u8 },
    QrCodeReady { session_id: String, payload: String },
    DeviceJoined { session_id: String, party_id: String, joined: usize, required: usize },
    TransactionBroadcast { chain: String, tx_hash: String },
    Error { detail: String },
}

impl Event {
    /// Vault this event pertains to, if any (used for per-vault listener filtering).
    pub fn vault_id(&self) -> Option<&str> {
        match self {
            Event::VaultAdded { vault_id }
            | Event::VaultRemoved { vault_id }
            | Event::ChainAdded { vault_id, .. }
            | Event::ChainRemoved { vault_id, .. }
            | Event::TokenAdded { vault_id, .. }
            | Event::TokenRemoved { vault_id, .. }
            | Event::BalanceUpdated { vault_id, .. } => Some(vault_id.as_str()),
            _ => None,
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Registration {
    id: u64,
    vault_scope: Option<String>,
    listener: Listener,
}

/// Handle returned from `subscribe`; dropping it does not unsubscribe —
/// call `unsubscribe()` explicitly, mirroring an explicit unsubscribe handle
/// rather than RAII (listeners commonly outlive the registration call site).
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    bus: EventBus,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.bus.remove(self.id);
    }
}

/// Synchronous, snapshot-iterating event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
    dispatching_error: Arc<std::sync::atomic::AtomicBool>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            dispatching_error: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Register a listener for every event.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, listener)
    }

    /// Register a listener scoped to a single vault id.
    pub fn subscribe_vault<F>(&self, vault_id: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(vault_id.into()), listener)
    }

    fn register<F>(&self, vault_scope: Option<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.lock().expect("event bus mutex poisoned");
        guard.push(Registration {
            id,
            vault_scope,
            listener: Arc::new(listener),
        });
        Subscription {
            id,
            bus: self.clone(),
        }
    }

    fn remove(&self, id: u64) {
        let mut guard = self.inner.lock().expect("event bus mutex poisoned");
        guard.retain(|r| r.id != id);
    }

    /// Dispatch an event synchronously from the caller's task. Handlers must
    /// be non-blocking (§5).
    pub fn emit(&self, event: Event) {
        if matches!(event, Event::Error { .. })
            && self.dispatching_error.load(Ordering::SeqCst)
        {
            // Suppress error-event recursion (§9 design note).
            return;
        }

        let snapshot: Vec<Registration> = {
            let guard = self.inner.lock().expect("event bus mutex poisoned");
            guard
                .iter()
                .map(|r| Registration {
                    id: r.id,
                    vault_scope: r.vault_scope.clone(),
                    listener: r.listener.clone(),
                })
                .collect()
        };

        let is_error = matches!(event, Event::Error { .. });
        if is_error {
            self.dispatching_error.store(true, Ordering::SeqCst);
        }

        for reg in &snapshot {
            if let Some(scope) = &reg.vault_scope {
                if event.vault_id() != Some(scope.as_str()) {
                    continue;
                }
            }
            let listener = reg.listener.clone();
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| (listener)(event_ref)));
            if result.is_err() && !is_error {
                self.emit(Event::Error {
                    detail: "event listener panicked".to_string(),
                });
            }
        }

        if is_error {
            self.dispatching_error.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn snapshot_iteration_tolerates_unsubscribe_during_dispatch() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let sub2_holder: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let sub2_holder_clone = sub2_holder.clone();

        let _sub1 = bus.subscribe_all(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            if let Some(sub2) = sub2_holder_clone.lock().unwrap().take() {
                sub2.unsubscribe();
            }
        });
        let sub2 = bus.subscribe_all(|_| {});
        *sub2_holder.lock().unwrap() = Some(sub2);

        bus.emit(Event::VaultAdded {
            vault_id: "v1".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.emit(Event::VaultAdded {
            vault_id: "v1".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn vault_scoped_listener_ignores_other_vaults() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let _sub = bus.subscribe_vault("v1", move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::VaultAdded {
            vault_id: "v2".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bus.emit(Event::VaultAdded {
            vault_id: "v1".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_listener_panic_does_not_recurse() {
        let bus = EventBus::new();
        let error_calls = Arc::new(AtomicUsize::new(0));
        let error_calls2 = error_calls.clone();
        let _sub = bus.subscribe_all(move |event| {
            if let Event::Error { .. } = event {
                error_calls2.fetch_add(1, Ordering::SeqCst);
            } else {
                panic!("boom");
            }
        });

        bus.emit(Event::VaultAdded {
            vault_id: "v1".into(),
        });
        assert_eq!(error_calls.load(Ordering::SeqCst), 1);
    }
}
