//! Whispers of the Wave
//!
//! Coordination core for a two-voice emotional journal. A narrador paints a
//! seaside scene, kiro whispers back; each entry is classified for tone, the
//! reply is parsed from the model's JSON, and the whole session is kept in
//! one observable, persisted record.

pub mod backend;
pub mod config;
pub mod emotion;
pub mod event_bus;
pub mod journal;
pub mod persona;
pub mod prompt;
pub mod reply;
pub mod session;

pub use backend::{AiBackend, BackendError, BackendErrorKind, LoggingBackend, OfflineBackend};
pub use config::{ConfigError, WaveConfig};
pub use emotion::{analyze, suggest_mode, EmotionAnalysis, Mode, Tone};
pub use event_bus::{events, BusError, EventBus, EventSink, NoopSink, Subscription};
pub use journal::{Journal, JournalError};
pub use persona::{Persona, PersonaController, PersonaError, StateSink};
pub use reply::{parse_auto, parse_for_persona, strip_formatting_fences, ParsedReply};
pub use session::{
    KeyValueStore, MemoryStorage, SessionState, SessionStore, SqliteStorage, StateChange,
    StateUpdate, StorageError, Turn,
};
