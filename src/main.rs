//! Application entry point for promptdj.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] and the prompt palette from disk (defaults on first
//!    run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Open the cpal output device (playback is refused if this fails).
//! 5. Spawn the engine, a notice printer and a state watcher on the runtime.
//! 6. Read commands from stdin on the main thread until `quit` or EOF.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use promptdj::{
    audio::{AudioOutput, CpalOutput},
    config::{AppConfig, PromptStore},
    control::{GenerationPatch, PromptSet, SystemClock, WeightedPrompt},
    pipeline::{Engine, EngineHandle, EngineSettings, PlaybackState, SharedState},
    session::WebSocketTransport,
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

const HELP: &str = "\
commands:
  play | pause | stop | toggle | reset
  weight <id> <0..2>      change a prompt's weight
  text <id> <text>        change a prompt's text
  add <text>              add a prompt at weight 0
  set <field> <value|auto>
  list | status | help | quit";

#[derive(Debug, PartialEq)]
enum Command {
    Play,
    Pause,
    Stop,
    Toggle,
    Reset,
    Weight { id: String, weight: f32 },
    Text { id: String, text: String },
    Add(String),
    Set(GenerationPatch),
    List,
    Status,
    Help,
    Quit,
}

/// Parse one input line.  `Ok(None)` for a blank line.
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "play" => Command::Play,
        "pause" => Command::Pause,
        "stop" => Command::Stop,
        "toggle" | "p" => Command::Toggle,
        "reset" => Command::Reset,
        "list" | "ls" => Command::List,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "weight" | "w" => {
            let (id, weight) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: weight <id> <weight>")?;
            let weight = weight
                .trim()
                .parse::<f32>()
                .map_err(|_| format!("not a number: {}", weight.trim()))?;
            Command::Weight {
                id: id.to_string(),
                weight,
            }
        }
        "text" => {
            let (id, text) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: text <id> <text>")?;
            Command::Text {
                id: id.to_string(),
                text: text.trim().to_string(),
            }
        }
        "add" if !rest.is_empty() => Command::Add(rest.to_string()),
        "add" => return Err("usage: add <text>".into()),
        "set" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: set <field> <value|auto>")?;
            Command::Set(GenerationPatch::parse(field, value.trim()).map_err(|e| e.to_string())?)
        }
        other => return Err(format!("unknown command {other:?}, try `help`")),
    };
    Ok(Some(command))
}

fn print_prompts(prompts: &PromptSet) {
    for p in prompts.iter() {
        let marker = if p.is_active() { '*' } else { ' ' };
        println!("{marker} {:<10} {:>4.2}  {}", p.id, p.weight, p.text);
    }
}

fn print_status(state: &SharedState) {
    let st = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    println!(
        "{} | {} | under-runs: {}",
        st.playback.label(),
        if st.connected { "connected" } else { "disconnected" },
        st.underruns
    );
    if !st.filtered.is_empty() {
        println!("filtered: {}", st.filtered.join(", "));
    }
}

/// Apply one prompt edit, persist it and hand it to the engine.
fn edit_prompts(
    prompts: &mut PromptSet,
    store: &PromptStore,
    engine: &EngineHandle,
    edit: impl FnOnce(&mut PromptSet) -> bool,
) {
    if !edit(prompts) {
        println!("no such prompt, try `list`");
        return;
    }
    if let Err(e) = store.save(prompts) {
        log::warn!("Failed to save prompts: {e}");
    }
    engine.update_prompts(prompts.clone());
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("promptdj starting up");

    // 2. Configuration and prompts
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if config.api_key().is_none() {
        log::warn!("No API key configured; set API_KEY or session.api_key in settings.toml");
    }
    let store = PromptStore::open_default();
    let mut prompts = store.load_or_default();

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    // 4. Output device; `_stream` must stay on this thread
    let (output, _stream) = match CpalOutput::open(config.fade()) {
        Ok((output, stream)) => (Some(Arc::new(output) as Arc<dyn AudioOutput>), Some(stream)),
        Err(e) => {
            log::error!("Audio output unavailable: {e}");
            (None, None)
        }
    };

    // 5. Engine + notice printer
    let (notice_tx, mut notice_rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Engine::new(
        EngineSettings::from_config(&config),
        Arc::new(WebSocketTransport::new()),
        output,
        Arc::new(SystemClock),
        notice_tx,
    )
    .with_prompts(prompts.clone())
    .with_config(config.generation.clone());

    let handle = engine.handle();
    let state = engine.shared_state();
    let engine_task = rt.spawn(engine.run());

    rt.spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            println!("! {notice}");
        }
    });

    // Poll the shared snapshot the way a UI frame would.
    let watched = Arc::clone(&state);
    rt.spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(100));
        let mut last = PlaybackState::default();
        loop {
            tick.tick().await;
            let now = watched
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .playback;
            if now != last {
                println!("[{}]", now.label());
                last = now;
            }
        }
    });

    // 6. Command loop
    println!("{HELP}");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            Command::Play => {
                handle.play();
            }
            Command::Pause => {
                handle.pause();
            }
            Command::Stop => {
                handle.stop();
            }
            Command::Toggle => {
                handle.toggle();
            }
            Command::Reset => {
                handle.reset();
            }
            Command::Weight { id, weight } => {
                edit_prompts(&mut prompts, &store, &handle, |p| p.set_weight(&id, weight));
            }
            Command::Text { id, text } => {
                edit_prompts(&mut prompts, &store, &handle, |p| p.set_text(&id, text));
            }
            Command::Add(text) => {
                edit_prompts(&mut prompts, &store, &handle, |p| {
                    let id = p.next_id();
                    p.upsert(WeightedPrompt::new(id, text, 0.0));
                    true
                });
            }
            Command::Set(patch) => {
                handle.update_config(patch);
            }
            Command::List => print_prompts(&prompts),
            Command::Status => print_status(&state),
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    handle.shutdown();
    if let Err(e) = rt.block_on(engine_task) {
        log::warn!("Engine task ended abnormally: {e}");
    }
    log::info!("promptdj shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
