//! revoice binary: wires the transport and session together and drives
//! them from a line-based terminal control loop.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use revoice::config::SessionConfig;
use revoice::events::UiCommand;
use revoice::session::{ConnectionPhase, SessionState, VoiceSession};
use revoice::transport::SessionTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = SessionConfig::from_env();
    info!(url = %cfg.server_url, "starting revoice");

    let transport = SessionTransport::new(cfg.server_url.clone(), cfg.reconnect_delay());
    let (handle, transport_rx) = transport.start();

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (session, mut state_rx) = VoiceSession::new(cfg, handle);

    // Status line: a read-only projection of the session machines.
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            println!("* {}", describe(&state));
        }
    });

    // Terminal controls standing in for the mic/mute buttons.
    let stdin_tx = ui_tx.clone();
    tokio::spawn(async move {
        println!("commands: mic | mute | quit");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = match line.trim() {
                "m" | "mic" => UiCommand::MicPressed,
                "mute" => UiCommand::MutePressed,
                "q" | "quit" => UiCommand::Shutdown,
                "" => continue,
                other => {
                    println!("unknown command: {other} (try mic | mute | quit)");
                    continue;
                }
            };
            let quitting = command == UiCommand::Shutdown;
            if stdin_tx.send(command).is_err() || quitting {
                break;
            }
        }
    });

    let signal_tx = ui_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_tx.send(UiCommand::Shutdown);
        }
    });

    session.run(transport_rx, ui_rx).await;
    info!("stopped");
    Ok(())
}

fn describe(state: &SessionState) -> String {
    let mut line = match state.phase {
        ConnectionPhase::Disconnected => "disconnected".to_string(),
        ConnectionPhase::Connecting => "connecting...".to_string(),
        ConnectionPhase::Connected => "connected".to_string(),
        ConnectionPhase::Ready if state.speaking => "assistant speaking...".to_string(),
        ConnectionPhase::Ready if state.recording => "recording your voice...".to_string(),
        ConnectionPhase::Ready if state.active_listening => {
            if state.voice_activity {
                "listening...".to_string()
            } else {
                "waiting for voice...".to_string()
            }
        }
        ConnectionPhase::Ready => "ready (type `mic` to start listening)".to_string(),
        ConnectionPhase::Error => "server error".to_string(),
        ConnectionPhase::Ended => "session ended".to_string(),
    };
    if state.muted {
        line.push_str(" [muted]");
    }
    line
}
