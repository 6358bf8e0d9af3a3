//! # Scripted Stream Example
//!
//! Drives a [`GameSyncClient`] through a whole game without a server: an
//! in-process channel stands in for the push stream and a fixed in-memory
//! [`InfoApi`] answers the info requests. Useful as a template for testing
//! game UIs against scripted game states.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_stream
//! ```

use std::time::Duration;

use async_trait::async_trait;
use fairmocracy_client::protocol::{PartyInfo, UserInfo, VotingState};
use fairmocracy_client::{
    Affiliation, ClientConfig, Connector, GameSnapshot, GameStatus, GameSyncClient, Id, InfoApi,
    MemoryStorage, ProfileUpdate, Screen, SyncError, SyncEvent, Transport,
};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-backed push stream
// ─────────────────────────────────────────────────────────────────────

struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    /// Cancel-safe because `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.rx.close();
        Ok(())
    }
}

/// Hands out the single scripted stream once. Boxing the transport lets a
/// connector mix transport types behind one `Connector` impl.
struct ScriptConnector {
    stream: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

#[async_trait]
impl Connector for ScriptConnector {
    type Transport = Box<dyn Transport>;

    async fn connect(&self) -> Result<Box<dyn Transport>, SyncError> {
        match self.stream.lock().await.take() {
            Some(rx) => Ok(Box::new(ChannelTransport { rx })),
            None => Err(SyncError::TransportConnect("script already consumed".into())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A fixed info API
// ─────────────────────────────────────────────────────────────────────

struct FixedApi;

#[async_trait]
impl InfoApi for FixedApi {
    async fn user_info(&self, _user_id: &Id) -> Result<UserInfo, SyncError> {
        Ok(UserInfo {
            extra_info: json!({"role": "baker"}),
        })
    }

    async fn parties(&self, _game_id: &Id) -> Result<Vec<PartyInfo>, SyncError> {
        Ok(vec![PartyInfo {
            id: Id::from("7"),
            extra_info: json!({"motto": "bread for all"}),
            other: serde_json::Map::new(),
        }])
    }

    async fn voting_state(&self, _game_id: &Id) -> Result<VotingState, SyncError> {
        Ok(VotingState::default())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Play the script
// ─────────────────────────────────────────────────────────────────────

async fn wait_for(events: &mut mpsc::Receiver<SyncEvent>, wanted: Screen) -> Option<()> {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::ScreenChanged(screen) => {
                tracing::info!("Screen: {screen}");
                if screen == wanted {
                    return Some(());
                }
            }
            SyncEvent::ProfileChanged(profile) => {
                tracing::info!(rewards = ?profile.event_rewards, "Profile updated");
            }
            other => tracing::debug!("Event: {other:?}"),
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (server, rx) = mpsc::unbounded_channel();
    let connector = ScriptConnector {
        stream: Mutex::new(Some(rx)),
    };
    let config = ClientConfig::new("http://localhost");
    let (mut client, mut events) =
        GameSyncClient::start(connector, FixedApi, MemoryStorage::new(), config);

    client.set_user_data(ProfileUpdate::join_game("12", "ABCD"))?;
    client.set_user_data(ProfileUpdate::register("Ann", "3"))?;
    client.record_affiliation(
        "40",
        Affiliation {
            affiliation_id: Id::from("90"),
            party_id: Id::from("7"),
        },
    )?;
    client.init_connection()?;

    let snapshot = |status: GameStatus, event: Option<&str>| {
        let snapshot = GameSnapshot::for_game("12")
            .with_status(status)
            .with_round(Some(Id::from("40")))
            .with_event(event.map(Id::from))
            .with_voting_system("MAJORITY")
            .with_extra_info(
                [(
                    "MAJORITY".to_string(),
                    json!({
                        "ACCEPTED": {"voters": {"3": 2}, "parties": {"7": 5}},
                        "REJECTED": {"voters": {"3": 0}, "parties": {"7": 1}}
                    }),
                )]
                .into(),
            );
        serde_json::to_string(&snapshot)
    };

    server.send(snapshot(GameStatus::Waiting, None)?)?;
    wait_for(&mut events, Screen::Welcome).await.ok_or("stream ended")?;

    server.send(snapshot(GameStatus::Started, Some("100"))?)?;
    wait_for(&mut events, Screen::Info).await.ok_or("stream ended")?;

    client.acknowledge_info()?;
    wait_for(&mut events, Screen::Vote).await.ok_or("stream ended")?;

    client.record_vote("100", "ACCEPTED")?;
    wait_for(&mut events, Screen::Wait).await.ok_or("stream ended")?;

    server.send(snapshot(GameStatus::Ended, None)?)?;
    wait_for(&mut events, Screen::End).await.ok_or("stream ended")?;

    let state = client.game_state().await;
    tracing::info!(
        rounds = state.frontend_round_n,
        events = state.frontend_event_n,
        "Game over"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.shutdown().await;
    Ok(())
}
