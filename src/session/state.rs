//! Session state types

use crate::emotion::{EmotionAnalysis, Mode};
use crate::persona::Persona;
use crate::reply::ParsedReply;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One completed exchange. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub user_text: String,
    pub reply: ParsedReply,
    pub emotion: EmotionAnalysis,
    /// Persona that answered
    pub persona: Persona,
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        user_text: impl Into<String>,
        reply: ParsedReply,
        emotion: EmotionAnalysis,
        persona: Persona,
        mode: Mode,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_text: user_text.into(),
            reply,
            emotion,
            persona,
            mode,
            timestamp: Utc::now(),
        }
    }
}

/// A change of response mode or spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTransition {
    pub from_mode: Mode,
    pub to_mode: Mode,
    pub spec: Option<String>,
    pub at: DateTime<Utc>,
}

/// The session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
    pub current_persona: Persona,
    pub current_mode: Mode,
    pub current_spec: Option<String>,
    pub is_processing: bool,
    pub audio_enabled: bool,
    pub last_emotional_context: Option<EmotionAnalysis>,
    /// Always equal to `conversation_history.len()`
    pub turn_count: u32,
    pub mode_history: Vec<ModeTransition>,
    pub last_update: DateTime<Utc>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation_history: Vec::new(),
            current_persona: Persona::default(),
            current_mode: Mode::default(),
            current_spec: None,
            is_processing: false,
            audio_enabled: false,
            last_emotional_context: None,
            turn_count: 0,
            mode_history: Vec::new(),
            last_update: Utc::now(),
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.conversation_history.last()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinguishes "field absent" from "field set to null"
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. `None` leaves a field untouched.
///
/// `turn_count` is not settable; it follows `conversation_history`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub conversation_history: Option<Vec<Turn>>,
    pub current_persona: Option<Persona>,
    pub current_mode: Option<Mode>,
    #[serde(default, deserialize_with = "double_option")]
    pub current_spec: Option<Option<String>>,
    pub is_processing: Option<bool>,
    pub audio_enabled: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_emotional_context: Option<Option<EmotionAnalysis>>,
    pub mode_history: Option<Vec<ModeTransition>>,
}

impl StateUpdate {
    pub fn persona(persona: Persona) -> Self {
        Self {
            current_persona: Some(persona),
            ..Default::default()
        }
    }

    pub fn processing(is_processing: bool) -> Self {
        Self {
            is_processing: Some(is_processing),
            ..Default::default()
        }
    }
}

/// What an update did, as delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// Changed fields keyed by their camelCase name, with new values
    Updated(Map<String, Value>),
    /// The record was restored to defaults
    Reset,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        match self {
            StateChange::Updated(fields) => fields.is_empty(),
            StateChange::Reset => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            StateChange::Updated(fields) => fields.contains_key(key),
            StateChange::Reset => true,
        }
    }

    pub fn to_payload(&self) -> Value {
        match self {
            StateChange::Updated(fields) => Value::Object(fields.clone()),
            StateChange::Reset => serde_json::json!({ "reset": true }),
        }
    }
}

/// Current on-disk layout version
const PERSISTED_VERSION: u32 = 1;

/// The persisted subset of [`SessionState`]. The processing flag is never
/// stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default = "persisted_version")]
    pub version: u32,
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
    pub current_persona: Persona,
    pub current_mode: Mode,
    #[serde(default)]
    pub current_spec: Option<String>,
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub last_emotional_context: Option<EmotionAnalysis>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub mode_history: Vec<ModeTransition>,
    pub last_update: DateTime<Utc>,
}

fn persisted_version() -> u32 {
    PERSISTED_VERSION
}

impl From<&SessionState> for PersistedSession {
    fn from(state: &SessionState) -> Self {
        Self {
            version: PERSISTED_VERSION,
            session_id: state.session_id.clone(),
            conversation_history: state.conversation_history.clone(),
            current_persona: state.current_persona,
            current_mode: state.current_mode,
            current_spec: state.current_spec.clone(),
            audio_enabled: state.audio_enabled,
            last_emotional_context: state.last_emotional_context.clone(),
            turn_count: state.turn_count,
            mode_history: state.mode_history.clone(),
            last_update: state.last_update,
        }
    }
}

impl PersistedSession {
    /// Overlay onto `state`. The processing flag is cleared.
    #[allow(clippy::cast_possible_truncation)] // history never approaches u32::MAX
    pub fn apply_to(self, state: &mut SessionState) {
        let turns = self.conversation_history.len() as u32;
        if turns != self.turn_count {
            tracing::warn!(
                stored = self.turn_count,
                turns,
                "Stored turn count disagrees with history, using history length"
            );
        }

        state.session_id = self.session_id;
        state.conversation_history = self.conversation_history;
        state.current_persona = self.current_persona;
        state.current_mode = self.current_mode;
        state.current_spec = self.current_spec;
        state.audio_enabled = self.audio_enabled;
        state.last_emotional_context = self.last_emotional_context;
        state.turn_count = turns;
        state.mode_history = self.mode_history;
        state.last_update = self.last_update;
        state.is_processing = false;
    }
}
