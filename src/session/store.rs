//! The session store: one record, observers, and persistence

use super::state::{ModeTransition, PersistedSession, SessionState, StateChange, StateUpdate, Turn};
use super::storage::{KeyValueStore, MemoryStorage, StorageError};
use crate::emotion::Mode;
use crate::event_bus::{events, EventSink, NoopSink};
use crate::persona::{Persona, StateSink};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Key under which the session snapshot is persisted
pub const STORAGE_KEY: &str = "whispers-of-the-wave:session";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Malformed state update: {0}")]
    MalformedUpdate(String),
}

type Observer = Arc<dyn Fn(&SessionState, &StateChange) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(u64, Observer)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`SessionStore::subscribe`]
pub struct ObserverHandle {
    observers: Weak<Mutex<ObserverList>>,
    id: u64,
}

impl ObserverHandle {
    /// Stop observing. Returns false if already removed or the store is gone.
    pub fn unsubscribe(self) -> bool {
        let Some(observers) = self.observers.upgrade() else {
            return false;
        };
        let mut list = lock(&observers);
        let before = list.entries.len();
        list.entries.retain(|(id, _)| *id != self.id);
        list.entries.len() != before
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").field("id", &self.id).finish()
    }
}

pub struct SessionStore {
    state: Mutex<SessionState>,
    observers: Arc<Mutex<ObserverList>>,
    storage: Arc<dyn KeyValueStore>,
    events: Arc<dyn EventSink>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
            observers: Arc::new(Mutex::new(ObserverList::default())),
            storage,
            events,
        }
    }

    /// Store backed by process memory with no event sink
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(NoopSink))
    }

    pub fn get_state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    /// Apply a partial update. Only fields whose value actually changes are
    /// written and reported.
    pub fn set_state(&self, update: StateUpdate) -> StateChange {
        self.commit(|_| update)
    }

    /// Apply a partial update given as a JSON object with camelCase keys.
    /// Unknown keys are ignored.
    pub fn set_state_json(&self, update: &Value) -> Result<StateChange, StateError> {
        if !update.is_object() {
            tracing::warn!(kind = json_kind(update), "Rejected non-object state update");
            return Err(StateError::MalformedUpdate(format!(
                "expected an object, got {}",
                json_kind(update)
            )));
        }
        let update: StateUpdate = serde_json::from_value(update.clone()).map_err(|e| {
            tracing::warn!(error = %e, "Rejected malformed state update");
            StateError::MalformedUpdate(e.to_string())
        })?;
        Ok(self.set_state(update))
    }

    /// Append a completed turn
    pub fn record_turn(&self, turn: Turn) -> StateChange {
        self.commit(|state| {
            let mut history = state.conversation_history.clone();
            history.push(turn);
            StateUpdate {
                conversation_history: Some(history),
                ..Default::default()
            }
        })
    }

    /// Change mode and spec, recording a transition when either differs
    pub fn set_mode(&self, mode: Mode, spec: Option<String>) -> StateChange {
        let mut transition = None;
        let change = self.commit(|state| {
            if state.current_mode == mode && state.current_spec == spec {
                return StateUpdate::default();
            }
            let entry = ModeTransition {
                from_mode: state.current_mode,
                to_mode: mode,
                spec: spec.clone(),
                at: Utc::now(),
            };
            let mut history = state.mode_history.clone();
            history.push(entry.clone());
            transition = Some(entry);
            StateUpdate {
                current_mode: Some(mode),
                current_spec: Some(spec),
                mode_history: Some(history),
                ..Default::default()
            }
        });

        if let Some(t) = transition {
            tracing::info!(from = %t.from_mode, to = %t.to_mode, spec = ?t.spec, "Mode changed");
            self.events.emit(
                events::MODE_CHANGED,
                &json!({ "from": t.from_mode, "to": t.to_mode, "spec": t.spec }),
            );
        }
        change
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SessionState, &StateChange) + Send + Sync + 'static,
    {
        let mut list = lock(&self.observers);
        list.next_id += 1;
        let id = list.next_id;
        list.entries.push((id, Arc::new(observer)));
        ObserverHandle {
            observers: Arc::downgrade(&self.observers),
            id,
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).entries.len()
    }

    /// Overlay the persisted snapshot onto the current state.
    ///
    /// Returns false when nothing usable is stored. Malformed data is logged
    /// and treated as absent.
    pub fn load_from_storage(&self) -> bool {
        let raw = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stored session");
                return false;
            }
        };

        let persisted: PersistedSession = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed stored session");
                return false;
            }
        };

        let mut state = lock(&self.state);
        persisted.apply_to(&mut state);
        tracing::info!(
            session_id = %state.session_id,
            turns = state.turn_count,
            persona = %state.current_persona,
            "Restored session from storage"
        );
        true
    }

    /// Remove the persisted snapshot. Returns false if storage failed.
    pub fn clear_storage(&self) -> bool {
        match self.storage.remove(STORAGE_KEY) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear stored session");
                false
            }
        }
    }

    /// Restore defaults under a fresh session id
    pub fn reset(&self) {
        let snapshot = {
            let mut state = lock(&self.state);
            *state = SessionState::new();
            state.clone()
        };
        tracing::info!(session_id = %snapshot.session_id, "Session reset");

        let change = StateChange::Reset;
        self.notify(&snapshot, &change);
        self.events.emit(
            events::STATE_RESET,
            &json!({ "sessionId": snapshot.session_id }),
        );
        self.persist(&snapshot);
    }

    pub fn new_session(&self) {
        self.clear_storage();
        self.reset();
    }

    /// Build an update from the current state and apply it atomically
    fn commit<F>(&self, build: F) -> StateChange
    where
        F: FnOnce(&SessionState) -> StateUpdate,
    {
        let (snapshot, fields) = {
            let mut state = lock(&self.state);
            let update = build(&state);
            let fields = apply_update(&mut state, update);
            state.last_update = Utc::now();
            (state.clone(), fields)
        };

        let change = StateChange::Updated(fields);
        if change.is_empty() {
            return change;
        }

        self.notify(&snapshot, &change);
        self.events.emit(events::STATE_UPDATED, &change.to_payload());
        self.persist(&snapshot);
        change
    }

    fn notify(&self, state: &SessionState, change: &StateChange) {
        let observers: Vec<Observer> = lock(&self.observers)
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(state, change))).is_err() {
                tracing::error!("State observer panicked");
            }
        }
    }

    fn persist(&self, state: &SessionState) {
        let result = serde_json::to_string(&PersistedSession::from(state))
            .map_err(StorageError::from)
            .and_then(|raw| self.storage.set(STORAGE_KEY, &raw));
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to persist session");
        }
    }
}

impl StateSink for SessionStore {
    fn record_persona(&self, persona: Persona) {
        self.set_state(StateUpdate::persona(persona));
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn write_if_changed<T>(slot: &mut T, next: Option<T>, key: &str, changed: &mut Map<String, Value>)
where
    T: PartialEq + Serialize,
{
    let Some(next) = next else {
        return;
    };
    if *slot == next {
        return;
    }
    match serde_json::to_value(&next) {
        Ok(value) => {
            changed.insert(key.to_string(), value);
        }
        Err(e) => tracing::warn!(key, error = %e, "Changed field is not serializable"),
    }
    *slot = next;
}

#[allow(clippy::cast_possible_truncation)] // history never approaches u32::MAX
fn apply_update(state: &mut SessionState, update: StateUpdate) -> Map<String, Value> {
    let mut changed = Map::new();

    let history_changed = update
        .conversation_history
        .as_ref()
        .is_some_and(|h| *h != state.conversation_history);
    write_if_changed(
        &mut state.conversation_history,
        update.conversation_history,
        "conversationHistory",
        &mut changed,
    );
    if history_changed {
        let count = state.conversation_history.len() as u32;
        write_if_changed(&mut state.turn_count, Some(count), "turnCount", &mut changed);
    }

    write_if_changed(
        &mut state.current_persona,
        update.current_persona,
        "currentPersona",
        &mut changed,
    );
    write_if_changed(
        &mut state.current_mode,
        update.current_mode,
        "currentMode",
        &mut changed,
    );
    write_if_changed(
        &mut state.current_spec,
        update.current_spec,
        "currentSpec",
        &mut changed,
    );
    write_if_changed(
        &mut state.is_processing,
        update.is_processing,
        "isProcessing",
        &mut changed,
    );
    write_if_changed(
        &mut state.audio_enabled,
        update.audio_enabled,
        "audioEnabled",
        &mut changed,
    );
    write_if_changed(
        &mut state.last_emotional_context,
        update.last_emotional_context,
        "lastEmotionalContext",
        &mut changed,
    );
    write_if_changed(
        &mut state.mode_history,
        update.mode_history,
        "modeHistory",
        &mut changed,
    );

    changed
}
