//! Deterministic backend that needs no network

use super::{AiBackend, BackendError};
use crate::emotion::Mode;
use crate::persona::Persona;
use crate::prompt::PromptRequest;
use async_trait::async_trait;
use serde_json::json;

const SCENES: [&str; 4] = [
    "La marea baja despacio y deja la arena brillante, llena de pequeñas conchas.",
    "Una bruma ligera cubre el muelle; a lo lejos, un faro parpadea con paciencia.",
    "El viento trae olor a sal y las olas rompen suaves contra las rocas.",
    "El sol se hunde en el horizonte y tiñe el agua de tonos cobrizos.",
];

const WHISPERS: [&str; 4] = [
    "Te escucho. Lo que cuentas tiene su lugar aquí.",
    "Gracias por dejar estas palabras en la orilla.",
    "No hay prisa; las olas saben esperar.",
    "Lo que sientes merece ser mirado con cuidado.",
];

/// Answers every prompt with a canned persona-shaped reply.
///
/// The choice of text depends only on the request, so the same prompt
/// always yields the same reply.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

impl OfflineBackend {
    pub fn new() -> Self {
        Self
    }

    fn pick<'a>(options: &'a [&'a str], request: &PromptRequest) -> &'a str {
        let seed = request.prompt.chars().count() + request.system.len();
        options[seed % options.len()]
    }

    fn invitation(mode: Mode) -> &'static str {
        match mode {
            Mode::Default => "¿Qué te gustaría dejar escrito hoy?",
            Mode::Poetic => "Si esta sensación fuera un paisaje, ¿cómo sería?",
            Mode::Exploration => "¿Dónde sientes esto en tu cuerpo ahora mismo?",
            Mode::Clarity => "¿Cuál es la parte más pequeña de esto que puedes nombrar?",
        }
    }

    fn instruction(mode: Mode) -> &'static str {
        match mode {
            Mode::Default => "Acompaña con calma y sencillez.",
            Mode::Poetic => "Responde con delicadeza, usando imágenes del mar.",
            Mode::Exploration => "Acoge su tristeza con ternura y sin prisa.",
            Mode::Clarity => "Ayuda a ordenar sus ideas con preguntas sencillas.",
        }
    }
}

#[async_trait]
impl AiBackend for OfflineBackend {
    async fn generate(&self, request: &PromptRequest) -> Result<String, BackendError> {
        let reply = match request.persona {
            Persona::Narrador => json!({
                "scene": Self::pick(&SCENES, request),
                "invitation": Self::invitation(request.mode),
                "instructionForKiro": Self::instruction(request.mode),
            }),
            Persona::Kiro => json!({
                "whisper": Self::pick(&WHISPERS, request),
                "reflection": Self::invitation(request.mode),
            }),
        };
        Ok(reply.to_string())
    }

    fn name(&self) -> &str {
        "offline"
    }
}
