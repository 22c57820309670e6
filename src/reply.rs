//! Parsing of model replies into persona-shaped structures
//!
//! Models are asked for JSON but routinely wrap it in Markdown fences or
//! prose. Parsing never fails: anything unusable becomes a deterministic
//! fallback reply that carries the raw text.

use crate::persona::Persona;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?i:json)?").expect("fence pattern is valid"));

/// Second line of a narrador fallback
pub const NARRADOR_FALLBACK_INVITATION: &str =
    "Cierra los ojos un momento. ¿Qué trae hoy la marea hasta tu orilla?";
/// Hand-off used when the narrador reply could not be read
pub const NARRADOR_FALLBACK_INSTRUCTION: &str =
    "Acompaña con suavidad lo que la persona comparta.";
/// Reflection used when a kiro reply could not be read
pub const KIRO_FALLBACK_REFLECTION: &str =
    "Deja que las palabras descansen un instante. ¿Qué eco queda en ti?";
/// Reflection used when no persona shape matched at all
pub const GENERIC_REFLECTION: &str =
    "¿Qué sientes ahora mismo, al escuchar el rumor de las olas?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarradorReply {
    pub scene: String,
    pub invitation: String,
    #[serde(alias = "instruction_for_kiro")]
    pub instruction_for_kiro: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KiroReply {
    pub whisper: String,
    pub reflection: String,
}

/// Reply content, tagged with the persona whose shape it has
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "persona", rename_all = "lowercase")]
pub enum ReplyBody {
    Narrador(NarradorReply),
    Kiro(KiroReply),
}

impl ReplyBody {
    pub fn persona(&self) -> Persona {
        match self {
            ReplyBody::Narrador(_) => Persona::Narrador,
            ReplyBody::Kiro(_) => Persona::Kiro,
        }
    }

    /// Text shown first to the user (`scene` or `whisper`)
    pub fn primary_text(&self) -> &str {
        match self {
            ReplyBody::Narrador(r) => &r.scene,
            ReplyBody::Kiro(r) => &r.whisper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReply {
    pub content: ReplyBody,
    /// True when the content was synthesized instead of parsed
    #[serde(default)]
    pub is_fallback: bool,
}

impl ParsedReply {
    pub fn persona(&self) -> Persona {
        self.content.persona()
    }

    pub fn as_narrador(&self) -> Option<&NarradorReply> {
        match &self.content {
            ReplyBody::Narrador(r) => Some(r),
            ReplyBody::Kiro(_) => None,
        }
    }

    pub fn as_kiro(&self) -> Option<&KiroReply> {
        match &self.content {
            ReplyBody::Kiro(r) => Some(r),
            ReplyBody::Narrador(_) => None,
        }
    }

    fn parsed(content: ReplyBody) -> Self {
        Self {
            content,
            is_fallback: false,
        }
    }

    /// Fallback for `persona` carrying `raw` in its primary field
    pub fn fallback(persona: Persona, raw: &str) -> Self {
        let content = match persona {
            Persona::Narrador => ReplyBody::Narrador(NarradorReply {
                scene: raw.to_string(),
                invitation: NARRADOR_FALLBACK_INVITATION.to_string(),
                instruction_for_kiro: NARRADOR_FALLBACK_INSTRUCTION.to_string(),
            }),
            Persona::Kiro => ReplyBody::Kiro(KiroReply {
                whisper: raw.to_string(),
                reflection: KIRO_FALLBACK_REFLECTION.to_string(),
            }),
        };
        Self {
            content,
            is_fallback: true,
        }
    }
}

/// Remove Markdown code-fence markers (with or without a `json` tag)
/// wherever they appear, then trim.
pub fn strip_formatting_fences(text: &str) -> String {
    FENCE.replace_all(text, "").trim().to_string()
}

/// Parse `raw` as a reply for `persona`, falling back when it is not valid
/// JSON or misses a required field.
pub fn parse_for_persona(raw: &str, persona: Persona) -> ParsedReply {
    match parse_object(raw).and_then(|value| shape_for(&value, persona)) {
        Some(content) => ParsedReply::parsed(content),
        None => {
            tracing::warn!(%persona, raw_len = raw.len(), "Unusable model reply, using fallback");
            ParsedReply::fallback(persona, raw)
        }
    }
}

/// Parse `raw` without knowing which persona produced it.
///
/// With a kiro hint the kiro shape is tried first, otherwise the narrador
/// shape. When neither matches the result is a kiro-shaped fallback with a
/// generic reflection.
pub fn parse_auto(raw: &str, hint: Option<Persona>) -> ParsedReply {
    let order = match hint {
        Some(Persona::Kiro) => [Persona::Kiro, Persona::Narrador],
        _ => [Persona::Narrador, Persona::Kiro],
    };

    if let Some(value) = parse_object(raw) {
        if let Some(content) = order.iter().find_map(|p| shape_for(&value, *p)) {
            tracing::debug!(persona = %content.persona(), "Auto-detected reply shape");
            return ParsedReply::parsed(content);
        }
    }

    tracing::warn!(raw_len = raw.len(), "Reply matched no persona shape");
    ParsedReply {
        content: ReplyBody::Kiro(KiroReply {
            whisper: raw.to_string(),
            reflection: GENERIC_REFLECTION.to_string(),
        }),
        is_fallback: true,
    }
}

/// Find a JSON object in `raw`: the whole fence-stripped text first, then
/// the outermost `{ ... }` span.
fn parse_object(raw: &str) -> Option<Value> {
    let cleaned = strip_formatting_fences(raw);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(cleaned.get(start..=end)?)
        .ok()
        .filter(Value::is_object)
}

fn shape_for(value: &Value, persona: Persona) -> Option<ReplyBody> {
    match persona {
        Persona::Narrador => serde_json::from_value::<NarradorReply>(value.clone())
            .ok()
            .filter(|r| all_present(&[&r.scene, &r.invitation, &r.instruction_for_kiro]))
            .map(ReplyBody::Narrador),
        Persona::Kiro => serde_json::from_value::<KiroReply>(value.clone())
            .ok()
            .filter(|r| all_present(&[&r.whisper, &r.reflection]))
            .map(ReplyBody::Kiro),
    }
}

fn all_present(fields: &[&String]) -> bool {
    fields.iter().all(|f| !f.trim().is_empty())
}
