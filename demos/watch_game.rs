//! # Watch Game Example
//!
//! Joins a Fairmocracy game over Server-Sent Events and prints every screen
//! change, game-state update and connection event until Ctrl-C.
//!
//! ## Running
//!
//! ```sh
//! FAIRMOCRACY_BACKEND_URL=http://localhost:8000 \
//! FAIRMOCRACY_GAME_ID=12 FAIRMOCRACY_GAME_CODE=ABCD \
//! FAIRMOCRACY_USER_ID=3 FAIRMOCRACY_USER_NAME=Ann \
//! cargo run --example watch_game
//! ```
//!
//! The profile is persisted under `.fairmocracy/`, so later runs pick up
//! where the previous one stopped and the game variables can be omitted.

use fairmocracy_client::{
    ClientConfig, FileStorage, GameSyncClient, HttpInfoApi, ProfileUpdate, SseConnector,
    SyncEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    tracing::info!("Streaming from {}", config.stream_url());

    let connector = SseConnector::from_config(&config)?;
    let api = HttpInfoApi::new(&config.base_url)?;
    let (mut client, mut events) =
        GameSyncClient::start(connector, api, FileStorage::new(".fairmocracy"), config);

    // ── Apply whatever the environment says about the player ────────
    if let (Ok(game_id), Ok(code)) = (
        std::env::var("FAIRMOCRACY_GAME_ID"),
        std::env::var("FAIRMOCRACY_GAME_CODE"),
    ) {
        client.set_user_data(ProfileUpdate::join_game(game_id, code))?;
    }
    if let (Ok(user_id), Ok(name)) = (
        std::env::var("FAIRMOCRACY_USER_ID"),
        std::env::var("FAIRMOCRACY_USER_NAME"),
    ) {
        client.set_user_data(ProfileUpdate::register(name, user_id))?;
    }

    client.init_connection()?;
    client.refresh_voting_state()?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SyncEvent::Connected => tracing::info!("Connected"),
                    SyncEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("clean"));
                    }
                    SyncEvent::Reconnecting { attempt, delay } => {
                        tracing::info!("Reconnecting (attempt {attempt}) in {delay:?}");
                    }
                    SyncEvent::ReconnectFailed { attempts } => {
                        tracing::error!("Gave up after {attempts} reconnect attempt(s)");
                        break;
                    }
                    SyncEvent::ScreenChanged(screen) => tracing::info!("Screen: {screen}"),
                    SyncEvent::GameStateChanged(state) => tracing::info!(
                        round = state.frontend_round_n,
                        event = state.frontend_event_n,
                        status = ?state.status,
                        "Game state updated"
                    ),
                    SyncEvent::ProfileChanged(profile) => tracing::info!(
                        name = %profile.name,
                        votes = profile.votes.len(),
                        "Profile updated"
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
