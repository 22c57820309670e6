//! Prompt construction for the generative backend
//!
//! Each persona has a fixed voice and a fixed JSON reply shape. The mode
//! adds guidance on pacing; a narrador hand-off steers kiro's next reply.

use crate::emotion::{EmotionAnalysis, Mode};
use crate::persona::{parse_handoff_instruction, HandoffTone, Persona};
use crate::session::Turn;
use serde::Serialize;
use std::fmt::Write;

const NARRADOR_PROMPT: &str = r#"Eres el Narrador de "Susurros de la Ola", un diario emocional junto al mar. Describes escenas breves y sensoriales de la costa que reflejan lo que la persona siente, sin juzgar ni aconsejar.

Responde solo con un objeto JSON con esta forma exacta:
{"scene": "...", "invitation": "...", "instructionForKiro": "..."}

- scene: dos o tres frases que pintan el lugar y el momento
- invitation: una pregunta suave que invite a escribir
- instructionForKiro: una indicación breve del tono con el que Kiro debe responder"#;

const KIRO_PROMPT: &str = r#"Eres Kiro, una presencia tranquila que susurra desde la orilla en "Susurros de la Ola". Escuchas con atención y devuelves lo que la persona dijo con calidez y pocas palabras.

Responde solo con un objeto JSON con esta forma exacta:
{"whisper": "...", "reflection": "..."}

- whisper: una frase corta y cercana que acoge lo que se ha compartido
- reflection: una pregunta abierta que ayude a mirar un poco más adentro"#;

const MODE_DEFAULT: &str = "Mantén un tono cálido y natural.";
const MODE_POETIC: &str =
    "Usa imágenes poéticas del mar, la luz y el viento. Prioriza la belleza sobre la explicación.";
const MODE_EXPLORATION: &str = "La emoción es intensa. Ve despacio, nombra lo que aparece y acompaña sin apresurar ninguna salida.";
const MODE_CLARITY: &str =
    "La persona está confundida. Usa frases cortas y concretas que ayuden a ordenar lo que siente.";

/// Default number of past turns included in a prompt
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Everything needed to address the backend for one exchange
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub persona: Persona,
    pub mode: Mode,
    pub spec: Option<&'a str>,
    pub user_text: &'a str,
    pub emotion: &'a EmotionAnalysis,
    pub history: &'a [Turn],
    pub history_window: usize,
}

/// A rendered prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Persona whose JSON shape is expected back
    pub persona: Persona,
    pub mode: Mode,
    pub system: String,
    pub prompt: String,
}

pub fn mode_guidance(mode: Mode) -> &'static str {
    match mode {
        Mode::Default => MODE_DEFAULT,
        Mode::Poetic => MODE_POETIC,
        Mode::Exploration => MODE_EXPLORATION,
        Mode::Clarity => MODE_CLARITY,
    }
}

fn persona_prompt(persona: Persona) -> &'static str {
    match persona {
        Persona::Narrador => NARRADOR_PROMPT,
        Persona::Kiro => KIRO_PROMPT,
    }
}

fn handoff_hint(tone: HandoffTone) -> &'static str {
    match tone {
        HandoffTone::Neutral => "neutro",
        HandoffTone::Melancholic => "melancólico",
        HandoffTone::Anxious => "inquieto",
        HandoffTone::Hopeful => "esperanzado",
        HandoffTone::Calm => "sereno",
        HandoffTone::Curious => "curioso",
        HandoffTone::Gentle => "delicado",
    }
}

/// Render the system and user prompt for the active persona
pub fn build_prompt(ctx: &PromptContext<'_>) -> PromptRequest {
    let mut system = String::from(persona_prompt(ctx.persona));
    let _ = write!(system, "\n\nModo {}: {}", ctx.mode, mode_guidance(ctx.mode));
    if let Some(spec) = ctx.spec.filter(|s| !s.trim().is_empty()) {
        let _ = write!(system, "\nEnfoque: {spec}");
    }

    let mut prompt = String::new();

    let start = ctx.history.len().saturating_sub(ctx.history_window);
    let recent = &ctx.history[start..];
    if !recent.is_empty() {
        prompt.push_str("Conversación reciente:\n");
        for turn in recent {
            let _ = writeln!(prompt, "Persona: {}", turn.user_text);
            let _ = writeln!(prompt, "{}: {}", turn.persona, turn.reply.content.primary_text());
        }
        prompt.push('\n');
    }

    if ctx.persona == Persona::Kiro {
        let handoff = ctx
            .history
            .last()
            .and_then(|turn| turn.reply.as_narrador())
            .map(|narrador| parse_handoff_instruction(&narrador.instruction_for_kiro));
        if let Some(handoff) = handoff {
            let _ = writeln!(
                prompt,
                "Indicación del Narrador (tono {}): {}\n",
                handoff_hint(handoff.emotional_tone),
                handoff.guidance
            );
        }
    }

    if !ctx.emotion.emotions.is_empty() {
        let tones: Vec<&str> = ctx.emotion.emotions.iter().map(|t| t.as_str()).collect();
        let _ = writeln!(
            prompt,
            "Emociones detectadas: {} (intensidad {:.1})\n",
            tones.join(", "),
            ctx.emotion.intensity
        );
    }

    let _ = write!(prompt, "La persona escribe:\n{}", ctx.user_text.trim());

    PromptRequest {
        persona: ctx.persona,
        mode: ctx.mode,
        system,
        prompt,
    }
}
