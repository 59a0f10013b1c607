//! Arcanar Terminal Client
//!
//! Plays one session from the terminal. Each new state and request is
//! printed; every stdin line is parsed as JSON and sent as the answer to the
//! pending request. `quit` leaves the game.

use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arcanar_client::{
    game::ids,
    session::{RequestView, SessionPhase, Snapshot},
    ClientConfig, Controller, GameState, SessionEnd, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = std::env::args().nth(1) {
        config.server_url = url;
    }
    info!("Arcanar client v{}", VERSION);
    info!("Server: {}", config.server_url);

    let controller = Arc::new(Controller::new(config));
    let server = controller
        .init()
        .await
        .context("Failed to start session")?;
    info!("Connected to server v{}", server.server_version);

    tokio::spawn(print_updates(Arc::clone(&controller)));
    tokio::spawn(read_answers(Arc::clone(&controller)));

    match controller.finished().await {
        Ok(SessionEnd::Shutdown) => info!("Server closed the session"),
        Ok(SessionEnd::Left) => info!("Left the session"),
        Err(e) => bail!("Session failed: {}", e),
    }
    Ok(())
}

/// Print every snapshot change.
async fn print_updates(controller: Arc<Controller>) {
    let mut rx = controller.store().subscribe();
    let mut last: Option<Snapshot> = None;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        let previous = last.as_ref();

        if previous.map(|p| &p.state) != Some(&snapshot.state) {
            if let Some(state) = &snapshot.state {
                print_state(state);
            }
        }
        if previous.map(|p| &p.request) != Some(&snapshot.request) {
            if let Some(request) = &snapshot.request {
                print_request(request);
            }
        }
        if snapshot.phase == SessionPhase::Finished {
            if let Some(winners) = &snapshot.winners {
                println!("Game over. Winners: {:?}", winners);
            }
        }
        last = Some(snapshot);
    }
}

fn print_state(state: &GameState) {
    println!(
        "-- round {} turn {} (player {} to move) --",
        state.round_num, state.turn_num, state.curr_player_idx
    );
    for player in &state.players {
        let resources: Vec<String> = player
            .resources
            .iter()
            .filter(|(_, n)| **n != 0)
            .map(|(r, n)| format!("{}={}", ids::resource_name(*r).unwrap_or("?"), n))
            .collect();
        let hand = player.cards_in(ids::HAND).count();
        println!(
            "  player {}: {} | {} in hand",
            player.idx,
            resources.join(" "),
            hand
        );
    }
}

fn print_request(request: &RequestView) {
    let fields = serde_json::to_string(&request.fields).unwrap_or_default();
    println!("?? {} (thread {}) {}", request.kind, request.thread, fields);
    if request.kind.allows_decline() {
        println!("   answer with JSON, or `null` to decline");
    } else {
        println!("   answer with JSON");
    }
}

/// Turn stdin lines into answers.
async fn read_answers(controller: Arc<Controller>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            if let Err(e) = controller.leave() {
                warn!("Failed to leave: {}", e);
            }
            return;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                println!("Not valid JSON: {}", e);
                continue;
            }
        };
        let store = controller.store();
        let Some(thread) = store.current_thread() else {
            println!("Nothing to answer right now");
            continue;
        };
        if let Err(e) = store.respond(thread, value) {
            println!("Answer rejected: {}", e);
        }
    }
}
