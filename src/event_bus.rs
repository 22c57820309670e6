//! In-process event bus
//!
//! Named events are delivered synchronously to every handler registered for
//! that name, in registration order. A failing handler never stops delivery
//! to the handlers after it.

#[cfg(test)]
mod proptests;

use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use thiserror::Error;

/// Well-known event names
pub mod events {
    pub const PERSONA_SWITCHED: &str = "persona:switched";
    pub const STATE_UPDATED: &str = "state:updated";
    pub const STATE_RESET: &str = "state:reset";
    pub const MODE_CHANGED: &str = "mode:changed";
    pub const TURN_COMPLETED: &str = "turn:completed";
    pub const ERROR_OCCURRED: &str = "error:occurred";
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Event handler. Returning `Err` is logged and does not affect other handlers.
pub type Handler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Invalid event name: {0:?}")]
    InvalidEventName(String),
}

/// Anything that can receive named events.
///
/// Components take an `Arc<dyn EventSink>` instead of reaching for a global
/// bus; pass [`NoopSink`] when nobody is listening.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: &Value);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &str, _payload: &Value) {}
}

struct Listener {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<String, Vec<Listener>>,
}

impl Registry {
    fn insert(&mut self, event: &str, handler: Handler) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, handler });
        id
    }

    fn remove_where(&mut self, event: &str, pred: impl Fn(&Listener) -> bool) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let Some(pos) = list.iter().position(pred) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.listeners.remove(event);
        }
        true
    }

    fn snapshot(&self, event: &str) -> Vec<(u64, Handler)> {
        self.listeners
            .get(event)
            .map(|list| {
                list.iter()
                    .map(|l| (l.id, Arc::clone(&l.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_event_name(event: &str) -> Result<(), BusError> {
    if event.trim().is_empty() {
        tracing::warn!(event = %event, "Rejected subscription with empty event name");
        return Err(BusError::InvalidEventName(event.to_string()));
    }
    Ok(())
}

/// Publish/subscribe registry. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_handler(event, Arc::new(handler))
    }

    /// Register an already shared handler. Keep a clone of the `Arc` to
    /// remove it later with [`EventBus::unsubscribe`].
    pub fn subscribe_handler(&self, event: &str, handler: Handler) -> Result<Subscription, BusError> {
        validate_event_name(event)?;
        let id = lock(&self.registry).insert(event, handler);
        tracing::trace!(event = %event, listener = id, "Handler subscribed");
        Ok(Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_string(),
            id,
        })
    }

    /// Register a handler that removes itself after its first invocation.
    pub fn subscribe_once<F>(&self, event: &str, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        validate_event_name(event)?;

        let own_id: Arc<OnceLock<u64>> = Arc::new(OnceLock::new());
        let fired = AtomicBool::new(false);
        let registry = Arc::downgrade(&self.registry);
        let event_name = event.to_string();
        let id_slot = Arc::clone(&own_id);

        let wrapper: Handler = Arc::new(move |payload: &Value| {
            if fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if let (Some(registry), Some(id)) = (registry.upgrade(), id_slot.get()) {
                lock(&registry).remove_where(&event_name, |l| l.id == *id);
            }
            handler(payload)
        });

        let subscription = self.subscribe_handler(event, wrapper)?;
        let _ = own_id.set(subscription.id);
        Ok(subscription)
    }

    /// Remove the first registration of `handler` for `event`.
    ///
    /// Returns false when the handler was not registered.
    pub fn unsubscribe(&self, event: &str, handler: &Handler) -> bool {
        lock(&self.registry).remove_where(event, |l| Arc::ptr_eq(&l.handler, handler))
    }

    /// Deliver `payload` to every handler currently registered for `event`.
    ///
    /// Returns the number of handlers invoked. Handlers run without the
    /// registry lock held, so they may subscribe, unsubscribe or publish.
    pub fn publish(&self, event: &str, payload: &Value) -> usize {
        let handlers = lock(&self.registry).snapshot(event);

        for (id, handler) in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(event = %event, listener = id, error = %e, "Event handler failed");
                }
                Err(_) => {
                    tracing::error!(event = %event, listener = id, "Event handler panicked");
                }
            }
        }

        tracing::trace!(event = %event, delivered = handlers.len(), "Event published");
        handlers.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.registry)
            .listeners
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Names with at least one handler, sorted
    pub fn event_names(&self) -> Vec<String> {
        lock(&self.registry).listeners.keys().cloned().collect()
    }

    /// Remove every handler for `event`, or for all events when `None`.
    pub fn clear(&self, event: Option<&str>) {
        let mut registry = lock(&self.registry);
        match event {
            Some(name) => {
                registry.listeners.remove(name);
            }
            None => registry.listeners.clear(),
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &str, payload: &Value) {
        self.publish(event, payload);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Whether the handler is still registered on a live bus
    pub fn is_active(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let registered = lock(&registry)
            .listeners
            .get(&self.event)
            .is_some_and(|list| list.iter().any(|l| l.id == self.id));
        registered
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = lock(&registry).remove_where(&self.event, |l| l.id == self.id);
        removed
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
