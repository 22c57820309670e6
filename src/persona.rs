//! Persona alternation
//!
//! Two fixed voices take turns: the narrador paints a scene and hands off,
//! kiro whispers back a reflection. The controller flips between them after
//! every completed exchange.

use crate::event_bus::{events, EventSink, NoopSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Conversational voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Narrador,
    Kiro,
}

impl Persona {
    pub const ALL: [Persona; 2] = [Persona::Narrador, Persona::Kiro];

    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Narrador => "narrador",
            Persona::Kiro => "kiro",
        }
    }

    /// The voice that speaks next
    pub fn other(self) -> Self {
        match self {
            Persona::Narrador => Persona::Kiro,
            Persona::Kiro => Persona::Narrador,
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "narrador" => Ok(Persona::Narrador),
            "kiro" => Ok(Persona::Kiro),
            _ => Err(PersonaError::UnknownPersona(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PersonaError {
    #[error("Unknown persona: {0:?}")]
    UnknownPersona(String),
}

/// Receives the active persona whenever it changes
pub trait StateSink: Send + Sync {
    fn record_persona(&self, persona: Persona);
}

#[derive(Debug, Clone)]
struct ControllerState {
    current: Persona,
    turn_count: u32,
    last_switch: Option<DateTime<Utc>>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            current: Persona::default(),
            turn_count: 0,
            last_switch: None,
        }
    }
}

/// Tracks whose turn it is
pub struct PersonaController {
    state: Mutex<ControllerState>,
    events: Arc<dyn EventSink>,
    state_sink: Option<Arc<dyn StateSink>>,
}

impl PersonaController {
    pub fn new(events: Arc<dyn EventSink>, state_sink: Option<Arc<dyn StateSink>>) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            events,
            state_sink,
        }
    }

    /// Controller with no listeners and no state relay
    pub fn detached() -> Self {
        Self::new(Arc::new(NoopSink), None)
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Persona {
        self.lock().current
    }

    /// Flip to the other persona unconditionally
    pub fn switch_persona(&self) -> Persona {
        let (_, to) = self.transition(|current| Some(current.other()));
        to
    }

    /// Switch to a named persona.
    ///
    /// Returns `Ok(false)` when `target` is already active; nothing is
    /// emitted in that case.
    pub fn set_persona(&self, target: &str) -> Result<bool, PersonaError> {
        let target = target.parse::<Persona>().inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected persona change");
        })?;
        let (switched, _) = self.transition(|current| (current != target).then_some(target));
        Ok(switched)
    }

    /// Pick the next persona from the current one under a single lock, so
    /// concurrent callers each see the result of the previous switch.
    /// Returns whether a switch happened and the persona now active.
    fn transition(&self, pick: impl FnOnce(Persona) -> Option<Persona>) -> (bool, Persona) {
        let (from, to, turn_count) = {
            let mut state = self.lock();
            let from = state.current;
            let Some(to) = pick(from).filter(|to| *to != from) else {
                return (false, from);
            };
            state.current = to;
            state.last_switch = Some(Utc::now());
            (from, to, state.turn_count)
        };

        tracing::debug!(%from, %to, turn_count, "Persona switched");
        self.events.emit(
            events::PERSONA_SWITCHED,
            &json!({ "from": from, "to": to, "turnCount": turn_count }),
        );
        if let Some(sink) = &self.state_sink {
            sink.record_persona(to);
        }
        (true, to)
    }

    /// Whether the persona flips after the exchange that just completed.
    ///
    /// Alternation is unconditional. Conditional alternation belongs here,
    /// not in callers.
    pub fn should_alternate(&self) -> bool {
        true
    }

    pub fn increment_turn(&self) -> u32 {
        let mut state = self.lock();
        state.turn_count += 1;
        state.turn_count
    }

    pub fn turn_count(&self) -> u32 {
        self.lock().turn_count
    }

    pub fn last_switch(&self) -> Option<DateTime<Utc>> {
        self.lock().last_switch
    }

    /// Adopt a persona and turn count loaded from storage without emitting
    pub fn restore(&self, persona: Persona, turn_count: u32) {
        let mut state = self.lock();
        state.current = persona;
        state.turn_count = turn_count;
    }

    pub fn reset(&self) {
        *self.lock() = ControllerState::default();
    }
}

/// Coarse tone carried in the narrador's hand-off to kiro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandoffTone {
    #[default]
    Neutral,
    Melancholic,
    Anxious,
    Hopeful,
    Calm,
    Curious,
    Gentle,
}

const HANDOFF_GROUPS: [(HandoffTone, &[&str]); 6] = [
    (HandoffTone::Melancholic, &["melancol", "nostalg", "triste", "duelo"]),
    (HandoffTone::Anxious, &["ansi", "inquiet", "nervio", "miedo", "tensi"]),
    (HandoffTone::Hopeful, &["esperanza", "luz", "renac", "amanecer", "ilusi"]),
    (HandoffTone::Calm, &["calma", "sereni", "paz", "tranquil", "quietud"]),
    (HandoffTone::Curious, &["curios", "pregunt", "explora", "descubr", "misterio"]),
    (HandoffTone::Gentle, &["suave", "delicad", "ternura", "cuidado", "gentil"]),
];

/// Instruction the narrador leaves for kiro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffInstruction {
    pub emotional_tone: HandoffTone,
    pub guidance: String,
}

/// Derive a tone from free text. The first matching group wins; the text
/// itself is passed through as guidance.
pub fn parse_handoff_instruction(text: &str) -> HandoffInstruction {
    let lowered = text.to_lowercase();
    let emotional_tone = HANDOFF_GROUPS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lowered.contains(m)))
        .map(|(tone, _)| *tone)
        .unwrap_or_default();

    HandoffInstruction {
        emotional_tone,
        guidance: text.to_string(),
    }
}
