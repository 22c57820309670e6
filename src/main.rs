//! `wave`: journal from the terminal
//!
//! Reads entries from stdin, one per line, and prints each reply. Logs go to
//! stderr as JSON.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whispers_wave::reply::ReplyBody;
use whispers_wave::{events, Journal, OfflineBackend, SqliteStorage, Turn, WaveConfig};

const HELP: &str = "Escribe y pulsa Enter. Comandos: /nueva (nueva sesión), /estado, /salir";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whispers_wave=info,wave=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = WaveConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening session storage");
    let storage = Arc::new(SqliteStorage::open(&config.db_path)?);

    let journal = Journal::new(config, Arc::new(OfflineBackend::new()), storage);
    if journal.restore() {
        let state = journal.store().get_state();
        println!(
            "Sesión recuperada: {} entradas, habla {}.",
            state.turn_count, state.current_persona
        );
    }

    let _errors = journal.bus().subscribe(events::ERROR_OCCURRED, |payload| {
        eprintln!(
            "No hubo respuesta: {}",
            payload["message"].as_str().unwrap_or("error desconocido")
        );
        if let Some(ms) = payload["retryAfterMs"].as_u64() {
            eprintln!("Vuelve a intentarlo en {}s.", ms.div_ceil(1000));
        } else if payload["retryable"].as_bool() == Some(true) {
            eprintln!("Puedes volver a intentarlo.");
        }
        Ok(())
    })?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/salir" => break,
            "/nueva" => {
                journal.new_session();
                println!("Nueva sesión.");
            }
            "/estado" => {
                let state = journal.store().get_state();
                println!("{}", serde_json::to_string_pretty(&state)?);
            }
            entry => {
                if let Ok(turn) = journal.submit(entry).await {
                    print_turn(&turn);
                }
            }
        }
    }

    Ok(())
}

fn print_turn(turn: &Turn) {
    match &turn.reply.content {
        ReplyBody::Narrador(reply) => {
            println!("\n[narrador] {}", reply.scene);
            println!("{}\n", reply.invitation);
        }
        ReplyBody::Kiro(reply) => {
            println!("\n[kiro] {}", reply.whisper);
            println!("{}\n", reply.reflection);
        }
    }
}
