//! Companion chat - terminal client
//!
//! Reads messages and slash commands from stdin and streams replies from a
//! local Ollama server.

use companion_chat::config::ChatSettings;
use companion_chat::llm::{LoggingService, OllamaService};
use companion_chat::persistence::{
    HttpStateSync, LocalStore, MemoryLocalStore, PersistenceMirror, SqliteLocalStore,
};
use companion_chat::render::TerminalRenderer;
use companion_chat::runtime::{ChatResult, TurnOrchestrator, TurnOutcome};
use companion_chat::signal::{self, LogSignalSink};
use crossterm::style::Stylize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Orchestrator = TurnOrchestrator<LoggingService, Arc<TerminalRenderer<std::io::Stdout>>>;

const HELP: &str = "\
/stop             stop the current reply
/delete N         delete turn N
/rewind N         delete turn N and everything after it
/refresh N        regenerate assistant turn N
/edit N TEXT      replace the text of turn N
/save [PATH]      export the conversation as a transcript
/load PATH        replace the conversation with a transcript
/clear            forget the conversation
/quit             exit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Stop,
    Delete(u64),
    Rewind(u64),
    Refresh(u64),
    Edit(u64, String),
    Save(PathBuf),
    Load(PathBuf),
    Clear,
    Help,
    Quit,
}

fn parse_index(arg: Option<&str>) -> Result<u64, String> {
    let arg = arg.ok_or_else(|| "missing turn index".to_string())?;
    arg.parse()
        .map_err(|_| format!("not a turn index: {arg}"))
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let command = match name {
        "stop" => Command::Stop,
        "delete" => Command::Delete(parse_index(rest.split_whitespace().next())?),
        "rewind" => Command::Rewind(parse_index(rest.split_whitespace().next())?),
        "refresh" => Command::Refresh(parse_index(rest.split_whitespace().next())?),
        "edit" => {
            let (index, text) = rest.split_once(' ').unwrap_or((rest, ""));
            let index = parse_index(Some(index).filter(|s| !s.is_empty()))?;
            if text.trim().is_empty() {
                return Err("missing text".to_string());
            }
            Command::Edit(index, text.trim().to_string())
        }
        "save" if rest.is_empty() => Command::Save(PathBuf::from("transcript.txt")),
        "save" => Command::Save(PathBuf::from(rest)),
        "load" if rest.is_empty() => return Err("missing transcript path".to_string()),
        "load" => Command::Load(PathBuf::from(rest)),
        "clear" => Command::Clear,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: /{other} (try /help)")),
    };
    Ok(Some(command))
}

fn report_error(message: &str) {
    println!("{}", message.red());
}

fn report_turn(renderer: &TerminalRenderer<std::io::Stdout>, result: ChatResult<TurnOutcome>) {
    renderer.finish_line();
    if let Err(e) = result {
        report_error(&e.to_string());
    }
}

/// Returns `false` when the client should exit.
async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    renderer: &Arc<TerminalRenderer<std::io::Stdout>>,
    command: Command,
) -> bool {
    let result = match command {
        Command::Send(text) => {
            let orchestrator = orchestrator.clone();
            let renderer = renderer.clone();
            tokio::spawn(async move {
                let result = orchestrator.submit(&text).await;
                report_turn(&renderer, result);
            });
            Ok(())
        }
        Command::Refresh(index) => {
            let orchestrator = orchestrator.clone();
            let renderer = renderer.clone();
            tokio::spawn(async move {
                let result = orchestrator.refresh_from(index).await;
                report_turn(&renderer, result);
            });
            Ok(())
        }
        Command::Stop => {
            if orchestrator.stop().is_none() {
                report_error("nothing to stop");
            }
            Ok(())
        }
        Command::Delete(index) => orchestrator.delete(index).map(|removed| {
            if !removed {
                report_error(&format!("no turn {index}"));
            }
        }),
        Command::Rewind(index) => orchestrator.rewind_to(index).map(|_| ()),
        Command::Edit(index, text) => orchestrator.edit_turn(index, &text),
        Command::Save(path) => orchestrator.export_transcript(&path).await,
        Command::Load(path) => orchestrator.import_transcript(&path).await.map(|name| {
            renderer.finish_line();
            println!("{}", format!("loaded {name}").dark_grey());
        }),
        Command::Clear => orchestrator.clear(),
        Command::Help => {
            renderer.finish_line();
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return false,
    };
    if let Err(e) = result {
        renderer.finish_line();
        report_error(&e.to_string());
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ephemeral = std::env::args().skip(1).any(|arg| arg == "--ephemeral");

    let mut settings = ChatSettings::from_env();
    settings.load_persona_files()?;

    let local: Arc<dyn LocalStore> = if ephemeral {
        tracing::info!("Using in-memory store");
        Arc::new(MemoryLocalStore::new())
    } else {
        if let Some(parent) = settings.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %settings.db_path.display(), "Opening local store");
        Arc::new(SqliteLocalStore::open(&settings.db_path)?)
    };

    let mirror = Arc::new(match &settings.sync_url {
        Some(url) => {
            tracing::info!(url = %url, "Mirroring state to sync backend");
            PersistenceMirror::with_remote(local, Arc::new(HttpStateSync::new(url.as_str())?))
        }
        None => PersistenceMirror::local_only(local),
    });

    let hydrated = mirror.hydrate().await;
    settings.overlay_stored(&mirror, &hydrated.remote_state);
    tracing::info!(
        source = ?hydrated.source,
        turns = hydrated.turns.len(),
        model = %settings.model,
        endpoint = %settings.endpoint(),
        "Conversation hydrated"
    );

    let service = Arc::new(LoggingService::new(Arc::new(OllamaService::new(
        settings.endpoint(),
        settings.model.clone(),
    ))));
    let renderer = Arc::new(TerminalRenderer::stdout());

    let mut orchestrator = TurnOrchestrator::new(service, renderer.clone(), mirror.clone(), &settings)
        .with_signal_sink(Arc::new(LogSignalSink));
    if let Some(sink) = signal::sink_for_device(&settings.signal_device, settings.signal_baud) {
        tracing::info!(sink = %sink.name(), "Forwarding replies to signal device");
        orchestrator = orchestrator.with_signal_sink(sink);
    }
    let orchestrator = Arc::new(orchestrator);
    orchestrator.restore(hydrated.turns);

    if let Err(e) = settings.save(&mirror) {
        tracing::warn!(error = %e, "Failed to save settings");
    }

    renderer.finish_line();
    println!("{}", "Type a message, or /help for commands.".dark_grey());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Some(command)) => {
                if !dispatch(&orchestrator, &renderer, command).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => report_error(&message),
        }
    }

    orchestrator.stop();
    mirror.flush().await;
    Ok(())
}
