//! The journaling loop
//!
//! [`Journal`] owns every component of a session and runs one exchange at a
//! time: classify the entry, pick a mode, ask the backend in the active
//! persona's voice, record the turn, hand the word to the other persona.

use crate::backend::{AiBackend, BackendError, LoggingBackend};
use crate::config::WaveConfig;
use crate::emotion;
use crate::event_bus::{events, EventBus};
use crate::persona::{PersonaController, StateSink};
use crate::prompt::{build_prompt, PromptContext};
use crate::reply::parse_for_persona;
use crate::session::{KeyValueStore, SessionStore, StateUpdate, Turn};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Nothing to submit")]
    EmptyInput,
    #[error("A reply is already being generated")]
    Busy,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub struct Journal {
    config: WaveConfig,
    bus: EventBus,
    store: Arc<SessionStore>,
    persona: PersonaController,
    backend: Arc<dyn AiBackend>,
}

impl Journal {
    pub fn new(
        config: WaveConfig,
        backend: Arc<dyn AiBackend>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let bus = EventBus::new();
        let store = Arc::new(SessionStore::new(storage, Arc::new(bus.clone())));
        let persona = PersonaController::new(
            Arc::new(bus.clone()),
            Some(Arc::clone(&store) as Arc<dyn StateSink>),
        );
        let backend: Arc<dyn AiBackend> = Arc::new(LoggingBackend::new(backend));

        Self {
            config,
            bus,
            store,
            persona,
            backend,
        }
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn persona(&self) -> &PersonaController {
        &self.persona
    }

    /// Seed a fresh session with configured values. Never called on a
    /// restored session.
    fn apply_config_defaults(&self) {
        if self.config.audio_enabled {
            self.store.set_state(StateUpdate {
                audio_enabled: Some(true),
                ..Default::default()
            });
        }
    }

    /// Resume the persisted session, if any. Without one, the fresh
    /// session takes its defaults from the config.
    pub fn restore(&self) -> bool {
        if !self.store.load_from_storage() {
            self.apply_config_defaults();
            return false;
        }
        let state = self.store.get_state();
        self.persona.restore(state.current_persona, state.turn_count);
        true
    }

    /// Drop the current session and start over
    pub fn new_session(&self) {
        self.store.new_session();
        self.persona.reset();
        self.apply_config_defaults();
        tracing::info!(session_id = %self.store.get_state().session_id, "Started new session");
    }

    /// Run one exchange for a journal entry.
    ///
    /// Only one exchange runs at a time; a second call while one is in
    /// flight fails with [`JournalError::Busy`]. Backend failures are
    /// published as `error:occurred` and leave the persona unchanged.
    pub async fn submit(&self, text: &str) -> Result<Turn, JournalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(JournalError::EmptyInput);
        }

        let claimed = self.store.set_state(StateUpdate::processing(true));
        if !claimed.contains("isProcessing") {
            tracing::warn!("Rejected entry while a reply is in flight");
            return Err(JournalError::Busy);
        }

        let claim = ProcessingClaim { store: &self.store };
        let result = self.exchange(text).await;
        drop(claim);

        match result {
            Ok(turn) => {
                match serde_json::to_value(&turn) {
                    Ok(payload) => {
                        self.bus.publish(events::TURN_COMPLETED, &payload);
                    }
                    Err(e) => tracing::warn!(error = %e, "Turn is not serializable"),
                }
                Ok(turn)
            }
            Err(e) => {
                let retry_after_ms = e
                    .retry_after
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                self.bus.publish(
                    events::ERROR_OCCURRED,
                    &json!({
                        "kind": e.kind.as_str(),
                        "message": e.message,
                        "retryable": e.kind.is_retryable(),
                        "retryAfterMs": retry_after_ms,
                    }),
                );
                Err(e.into())
            }
        }
    }

    async fn exchange(&self, text: &str) -> Result<Turn, BackendError> {
        let analysis = emotion::analyze(text);
        let mode = emotion::suggest_mode(&analysis);
        let spec = self.store.get_state().current_spec;
        self.store.set_mode(mode, spec);
        self.store.set_state(StateUpdate {
            last_emotional_context: Some(Some(analysis.clone())),
            ..Default::default()
        });

        let persona = self.persona.current();
        let state = self.store.get_state();
        let request = build_prompt(&PromptContext {
            persona,
            mode,
            spec: state.current_spec.as_deref(),
            user_text: text,
            emotion: &analysis,
            history: &state.conversation_history,
            history_window: self.config.history_window,
        });

        tracing::debug!(%persona, %mode, tone = %analysis.tone, "Requesting reply");
        let raw = tokio::time::timeout(self.config.backend_timeout, self.backend.generate(&request))
            .await
            .map_err(|_| {
                BackendError::network(format!(
                    "No reply within {}s",
                    self.config.backend_timeout.as_secs_f64()
                ))
            })??;

        let reply = parse_for_persona(&raw, persona);
        let turn = Turn::new(text, reply, analysis, persona, mode);
        self.store.record_turn(turn.clone());

        let turns = self.persona.increment_turn();
        if self.persona.should_alternate() {
            self.persona.switch_persona();
        }
        tracing::info!(
            turn = turns,
            %persona,
            fallback = turn.reply.is_fallback,
            "Exchange completed"
        );
        Ok(turn)
    }
}

/// Releases the processing flag however `submit` exits, including when its
/// future is dropped mid-exchange.
struct ProcessingClaim<'a> {
    store: &'a SessionStore,
}

impl Drop for ProcessingClaim<'_> {
    fn drop(&mut self) {
        self.store.set_state(StateUpdate::processing(false));
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::emotion::{Mode, Tone};
    use crate::persona::Persona;
    use crate::session::MemoryStorage;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    const NARRADOR_REPLY: &str = r#"```json
{"scene":"La niebla envuelve el muelle.","invitation":"¿Qué sientes al mirarla?","instructionForKiro":"Acoge su tristeza con ternura"}
```"#;
    const KIRO_REPLY: &str = r#"{"whisper":"Estoy contigo.","reflection":"¿Qué necesitarías ahora?"}"#;

    fn journal_with(mock: &Arc<MockBackend>, storage: Arc<dyn KeyValueStore>) -> Journal {
        Journal::new(WaveConfig::default(), mock.clone(), storage)
    }

    fn journal(mock: &Arc<MockBackend>) -> Journal {
        journal_with(mock, Arc::new(MemoryStorage::new()))
    }

    fn record(journal: &Journal, event: &'static str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        journal
            .bus()
            .subscribe(event, move |payload| {
                s.lock().unwrap().push(payload.clone());
                Ok(())
            })
            .unwrap();
        seen
    }

    #[tokio::test]
    async fn test_exchange_records_turn_and_alternates() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply(NARRADOR_REPLY);
        let journal = journal(&mock);
        let completed = record(&journal, events::TURN_COMPLETED);
        let switched = record(&journal, events::PERSONA_SWITCHED);

        let turn = journal.submit("me siento muy solo y triste!!").await.unwrap();

        assert_eq!(turn.persona, Persona::Narrador);
        assert_eq!(turn.mode, Mode::Exploration);
        assert_eq!(turn.emotion.tone, Tone::Lonely);
        assert!(!turn.reply.is_fallback);
        assert_eq!(
            turn.reply.as_narrador().unwrap().scene,
            "La niebla envuelve el muelle."
        );

        let state = journal.store().get_state();
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.current_persona, Persona::Kiro);
        assert_eq!(state.current_mode, Mode::Exploration);
        assert!(!state.is_processing);
        assert_eq!(state.mode_history.len(), 1);
        assert_eq!(journal.persona().current(), Persona::Kiro);
        assert_eq!(journal.persona().turn_count(), 1);

        assert_eq!(completed.lock().unwrap().len(), 1);
        assert_eq!(completed.lock().unwrap()[0]["id"], turn.id);
        assert_eq!(switched.lock().unwrap()[0]["to"], "kiro");
    }

    #[tokio::test]
    async fn test_kiro_prompt_carries_handoff() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply(NARRADOR_REPLY);
        mock.queue_reply(KIRO_REPLY);
        let journal = journal(&mock);

        journal.submit("estoy triste").await.unwrap();
        let turn = journal.submit("no sé qué hacer").await.unwrap();

        assert_eq!(turn.persona, Persona::Kiro);
        assert_eq!(turn.reply.as_kiro().unwrap().whisper, "Estoy contigo.");
        assert_eq!(turn.mode, Mode::Clarity);

        let requests = mock.recorded_requests();
        assert_eq!(requests[0].persona, Persona::Narrador);
        assert_eq!(requests[1].persona, Persona::Kiro);
        assert!(requests[1].prompt.contains("Acoge su tristeza con ternura"));
        assert!(requests[1].prompt.contains("estoy triste"));
        assert_eq!(journal.persona().current(), Persona::Narrador);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let mock = Arc::new(MockBackend::new());
        let journal = journal(&mock);
        let err = journal.submit("   ").await.unwrap_err();
        assert!(matches!(err, JournalError::EmptyInput));
        assert!(mock.recorded_requests().is_empty());
        assert!(!journal.store().get_state().is_processing);
    }

    #[tokio::test]
    async fn test_backend_failure_publishes_error() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_error(BackendError::server_error("sin servicio"));
        let journal = journal(&mock);
        let errors = record(&journal, events::ERROR_OCCURRED);

        let err = journal.submit("hola").await.unwrap_err();
        assert!(matches!(err, JournalError::Backend(ref e) if e.message == "sin servicio"));

        let state = journal.store().get_state();
        assert!(!state.is_processing);
        assert_eq!(state.turn_count, 0);
        assert_eq!(state.current_persona, Persona::Narrador);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![json!({
                "kind": "server_error",
                "message": "sin servicio",
                "retryable": true,
                "retryAfterMs": null,
            })]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_error(
            BackendError::from_status(429, "demasiadas peticiones")
                .with_retry_after(Duration::from_secs(3)),
        );
        let journal = journal(&mock);
        let errors = record(&journal, events::ERROR_OCCURRED);

        journal.submit("hola").await.unwrap_err();
        let errors = errors.lock().unwrap();
        assert_eq!(errors[0]["kind"], "rate_limited");
        assert_eq!(errors[0]["retryable"], true);
        assert_eq!(errors[0]["retryAfterMs"], 3000);
    }

    #[tokio::test]
    async fn test_unparseable_reply_becomes_fallback_turn() {
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply("Lo siento, no puedo responder en JSON.");
        let journal = journal(&mock);

        let turn = journal.submit("hola").await.unwrap();
        assert!(turn.reply.is_fallback);
        assert_eq!(
            turn.reply.as_narrador().unwrap().scene,
            "Lo siento, no puedo responder en JSON."
        );
        assert_eq!(journal.store().get_state().turn_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_submit_is_busy() {
        let mock = Arc::new(MockBackend::new().with_delay(Duration::from_millis(50)));
        mock.queue_reply(NARRADOR_REPLY);
        let journal = journal(&mock);

        let (first, second) = tokio::join!(journal.submit("uno"), journal.submit("dos"));
        assert!(first.is_ok());
        assert!(matches!(second, Err(JournalError::Busy)));
        assert_eq!(mock.recorded_requests().len(), 1);
        assert!(!journal.store().get_state().is_processing);
    }

    #[tokio::test]
    async fn test_backend_timeout() {
        let mock = Arc::new(MockBackend::new().with_delay(Duration::from_millis(200)));
        mock.queue_reply(NARRADOR_REPLY);
        let config = WaveConfig {
            backend_timeout: Duration::from_millis(20),
            ..WaveConfig::default()
        };
        let journal = Journal::new(config, mock.clone(), Arc::new(MemoryStorage::new()));

        let err = journal.submit("hola").await.unwrap_err();
        let JournalError::Backend(e) = err else {
            panic!("expected a backend error");
        };
        assert_eq!(e.kind, crate::backend::BackendErrorKind::Network);
        assert!(!journal.store().get_state().is_processing);
    }

    #[tokio::test]
    async fn test_restore_resumes_persona_and_turns() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply(NARRADOR_REPLY);
        let first = journal_with(&mock, Arc::clone(&storage));
        let turn = first.submit("siento calma y paz").await.unwrap();
        assert_eq!(turn.mode, Mode::Poetic);

        let second = journal_with(&mock, storage);
        assert!(second.restore());
        let state = second.store().get_state();
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.current_persona, Persona::Kiro);
        assert_eq!(state.current_mode, Mode::Poetic);
        assert_eq!(second.persona().current(), Persona::Kiro);
        assert_eq!(second.persona().turn_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_with_audio_config_keeps_saved_session() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply(NARRADOR_REPLY);
        let first = journal_with(&mock, Arc::clone(&storage));
        let turn = first.submit("hola").await.unwrap();

        let config = WaveConfig {
            audio_enabled: true,
            ..WaveConfig::default()
        };
        let second = Journal::new(config, mock.clone(), storage);
        assert!(second.restore());
        let state = second.store().get_state();
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.conversation_history[0].id, turn.id);
        assert_eq!(state.current_persona, Persona::Kiro);
        // the saved flag wins over the config
        assert!(!state.audio_enabled);
    }

    #[tokio::test]
    async fn test_dropped_submit_releases_claim() {
        let mock = Arc::new(MockBackend::new().with_delay(Duration::from_millis(200)));
        mock.queue_reply(NARRADOR_REPLY);
        mock.queue_reply(NARRADOR_REPLY);
        let journal = journal(&mock);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), journal.submit("uno")).await;
        assert!(abandoned.is_err());
        assert!(!journal.store().get_state().is_processing);

        let turn = journal.submit("dos").await.unwrap();
        assert_eq!(turn.user_text, "dos");
        assert_eq!(journal.store().get_state().turn_count, 1);
        assert!(!journal.store().get_state().is_processing);
    }

    #[tokio::test]
    async fn test_new_session_starts_over() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
        let mock = Arc::new(MockBackend::new());
        mock.queue_reply(NARRADOR_REPLY);
        let journal = journal_with(&mock, Arc::clone(&storage));
        journal.submit("hola").await.unwrap();
        let old_id = journal.store().get_state().session_id;

        journal.new_session();
        let state = journal.store().get_state();
        assert_ne!(state.session_id, old_id);
        assert_eq!(state.turn_count, 0);
        assert_eq!(journal.persona().current(), Persona::Narrador);

        let fresh = journal_with(&mock, storage);
        assert!(fresh.restore());
        assert_eq!(fresh.store().get_state().session_id, state.session_id);
        assert_eq!(fresh.store().get_state().turn_count, 0);
    }

    #[test]
    fn test_audio_default_from_config() {
        let mock = Arc::new(MockBackend::new());
        let config = WaveConfig {
            audio_enabled: true,
            ..WaveConfig::default()
        };
        let journal = Journal::new(config, mock, Arc::new(MemoryStorage::new()));
        assert!(!journal.store().get_state().audio_enabled);

        assert!(!journal.restore());
        assert!(journal.store().get_state().audio_enabled);

        journal.new_session();
        assert!(journal.store().get_state().audio_enabled);
    }
}
