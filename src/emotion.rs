//! Keyword-based emotional classifier
//!
//! Scores Spanish free text against fixed marker lists. The weights are
//! heuristic constants and are kept exactly as they are so that scores stay
//! comparable across releases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Detected emotional tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Lonely,
    Sad,
    Anxious,
    Angry,
    Confused,
    Calm,
    Curious,
    Hopeful,
    Joyful,
    Grateful,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Lonely => "lonely",
            Tone::Sad => "sad",
            Tone::Anxious => "anxious",
            Tone::Angry => "angry",
            Tone::Confused => "confused",
            Tone::Calm => "calm",
            Tone::Curious => "curious",
            Tone::Hopeful => "hopeful",
            Tone::Joyful => "joyful",
            Tone::Grateful => "grateful",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response strategy selected from an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Poetic, image-led replies
    #[serde(rename = "modoA")]
    Poetic,
    /// Slow, deeper exploration of a strong feeling
    #[serde(rename = "modoB")]
    Exploration,
    /// Short, grounding replies that restore clarity
    #[serde(rename = "modoC")]
    Clarity,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Poetic => "modoA",
            Mode::Exploration => "modoB",
            Mode::Clarity => "modoC",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmotionAnalysis {
    /// First detected category, or neutral
    pub tone: Tone,
    /// Heuristic strength in `[0, 1]`
    pub intensity: f64,
    /// Every detected category, in lexicon order
    pub emotions: Vec<Tone>,
    /// Every marker found, duplicates across categories included
    pub keywords: Vec<String>,
}

impl EmotionAnalysis {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn has(&self, tone: Tone) -> bool {
        self.emotions.contains(&tone)
    }
}

/// Marker lists, checked in this order. The first detected category becomes
/// the primary tone.
const LEXICON: &[(Tone, &[&str])] = &[
    (
        Tone::Lonely,
        &["solo", "sola", "soledad", "aislado", "aislada", "abandonado", "abandonada", "nadie me"],
    ),
    (
        Tone::Sad,
        &["triste", "tristeza", "llorar", "lloro", "deprimido", "deprimida", "melancolía", "vacío"],
    ),
    (
        Tone::Anxious,
        &["ansiedad", "ansioso", "ansiosa", "nervioso", "nerviosa", "preocupado", "preocupada", "miedo", "angustia"],
    ),
    (
        Tone::Angry,
        &["enojado", "enojada", "furioso", "furiosa", "rabia", "irritado", "irritada", "molesto", "molesta"],
    ),
    (
        Tone::Confused,
        &["confundido", "confundida", "confusión", "perdido", "perdida", "no entiendo", "no sé qué"],
    ),
    (
        Tone::Calm,
        &["calma", "tranquilo", "tranquila", "paz", "sereno", "serena", "relajado", "relajada"],
    ),
    (
        Tone::Curious,
        &["curioso", "curiosa", "curiosidad", "me pregunto", "interesante", "descubrir", "explorar"],
    ),
    (
        Tone::Hopeful,
        &["esperanza", "ilusión", "ilusionado", "ilusionada", "optimista", "espero"],
    ),
    (
        Tone::Joyful,
        &["feliz", "alegre", "alegría", "contento", "contenta", "emocionado", "emocionada"],
    ),
    (
        Tone::Grateful,
        &["gracias", "agradecido", "agradecida", "gratitud", "afortunado", "afortunada"],
    ),
];

const INTENSIFIERS: [&str; 5] = ["muy", "demasiado", "totalmente", "extremadamente", "mucho"];
const DIMINISHERS: [&str; 4] = ["un poco", "algo", "apenas", "ligeramente"];

const CATEGORY_WEIGHT: f64 = 0.2;
const INTENSIFIER_WEIGHT: f64 = 0.2;
const DIMINISHER_WEIGHT: f64 = 0.1;
const EXCLAMATION_WEIGHT: f64 = 0.1;
const QUESTION_WEIGHT: f64 = 0.05;

/// Intensity above which strong tones switch to exploration
const EXPLORATION_THRESHOLD: f64 = 0.6;

/// Classify `text`. Empty or whitespace-only input is neutral.
pub fn analyze(text: &str) -> EmotionAnalysis {
    if text.trim().is_empty() {
        return EmotionAnalysis::neutral();
    }

    let lowered = text.to_lowercase();
    let mut emotions = Vec::new();
    let mut keywords = Vec::new();

    for (tone, markers) in LEXICON {
        let mut detected = false;
        for marker in *markers {
            if lowered.contains(marker) {
                keywords.push((*marker).to_string());
                detected = true;
            }
        }
        if detected {
            emotions.push(*tone);
        }
    }

    let tone = emotions.first().copied().unwrap_or_default();
    let intensity = score_intensity(&lowered, emotions.len());

    EmotionAnalysis {
        tone,
        intensity,
        emotions,
        keywords,
    }
}

fn count_present(lowered: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| lowered.contains(**p)).count()
}

#[allow(clippy::cast_precision_loss)] // counts are tiny
fn score_intensity(lowered: &str, categories: usize) -> f64 {
    let exclamations = lowered.matches('!').count();
    let questions = lowered.matches('?').count();

    let raw = categories as f64 * CATEGORY_WEIGHT
        + count_present(lowered, &INTENSIFIERS) as f64 * INTENSIFIER_WEIGHT
        - count_present(lowered, &DIMINISHERS) as f64 * DIMINISHER_WEIGHT
        + exclamations as f64 * EXCLAMATION_WEIGHT
        + questions as f64 * QUESTION_WEIGHT;

    raw.clamp(0.0, 1.0)
}

/// Pick a response mode. Rules are checked in priority order.
pub fn suggest_mode(analysis: &EmotionAnalysis) -> Mode {
    if analysis.tone == Tone::Confused || analysis.has(Tone::Confused) {
        return Mode::Clarity;
    }

    let strong_tone = matches!(analysis.tone, Tone::Lonely | Tone::Sad | Tone::Anxious);
    if analysis.intensity > EXPLORATION_THRESHOLD && (strong_tone || analysis.emotions.len() >= 2) {
        return Mode::Exploration;
    }

    if matches!(analysis.tone, Tone::Calm | Tone::Curious | Tone::Hopeful) {
        return Mode::Poetic;
    }

    Mode::Default
}
