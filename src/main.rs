//! Duel Session demo
//!
//! Plays a two-player match between two in-process peers over the local
//! relay and in-memory directory, or a single-player run when that mode is
//! the stored preference.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use duel_session::{
    lobby::{InMemoryDirectory, LobbyCoordinator, ModeTag, PlayerId},
    network::{GameOverReason, LocalRelay, Role, SessionTransport},
    session::{
        resolve_game_mode, GameMode, MatchCommand, MatchDriver, MatchHandle, NoopGameplay,
        PreferenceStore, SessionContext, SessionEvent, SinglePlayerTally,
    },
    LobbyConfig, SessionConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Duel Session v{}", VERSION);

    let config = SessionConfig::from_env();
    let lobby_config = LobbyConfig::from_env();
    let preferences = PreferenceStore::new(std::env::temp_dir().join("duel-session").join("preferences.json"));

    match resolve_game_mode(None, &preferences) {
        GameMode::SinglePlayer => demo_single_player(config).await,
        GameMode::Multiplayer | GameMode::None => demo_duel(config, lobby_config).await,
    }
}

/// Two peers in one process: host creates, guest joins, scores decide.
async fn demo_duel(config: SessionConfig, lobby_config: LobbyConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Duel ===");

    let directory = Arc::new(InMemoryDirectory::new());
    let relay = LocalRelay::new();
    let mode = ModeTag::new("Hiragana");

    let (host_endpoint, host_events) = relay.endpoint();
    let host_transport = SessionTransport::new(host_endpoint);
    let host_lobby = LobbyCoordinator::new(
        directory.clone(),
        host_transport.clone(),
        PlayerId::generate(),
        lobby_config.clone(),
    );

    let record = host_lobby.create_public_session(&mode).await?;
    info!("Host created {} ({})", record.name, record.id);

    let (guest_endpoint, guest_events) = relay.endpoint();
    let guest_transport = SessionTransport::new(guest_endpoint);
    let guest_lobby = LobbyCoordinator::new(
        directory.clone(),
        guest_transport.clone(),
        PlayerId::generate(),
        lobby_config,
    );

    let open = guest_lobby.refresh_session_list(&mode).await;
    info!("Guest sees {} open session(s)", open.len());
    let target = open.first().map(|r| r.id.clone()).unwrap_or(record.id);
    guest_lobby.join_by_id(&target).await?;

    let host_ctx = SessionContext::multiplayer(Role::Host, config.clone(), host_transport, Arc::new(NoopGameplay));
    let (host_driver, host) = MatchDriver::new(host_ctx, Some(host_lobby), Some(host_events));
    let guest_ctx = SessionContext::multiplayer(Role::Client, config, guest_transport, Arc::new(NoopGameplay));
    let (guest_driver, guest) = MatchDriver::new(guest_ctx, Some(guest_lobby), Some(guest_events));

    let mut host_started = host.subscribe();
    let mut guest_started = guest.subscribe();
    let host_task = host_driver.spawn();
    let guest_task = guest_driver.spawn();

    wait_started(&mut host_started).await?;
    wait_started(&mut guest_started).await?;

    play(&host, &[1200, 2600, 4100, 5000]).await;
    play(&guest, &[900, 3300, 6100, 7000]).await;
    guest.send(MatchCommand::AttackSent);
    host.send(MatchCommand::AttackEnemyDefeated);

    tokio::time::sleep(Duration::from_secs(2)).await;
    host.report_game_over(GameOverReason::ScoreQuota);

    for (who, task) in [("Host", host_task), ("Guest", guest_task)] {
        match task.await? {
            Some(report) => info!(
                "{}: {:?} ({} vs {})",
                who, report.outcome, report.my_score, report.opponent_score
            ),
            None => warn!("{}: no result", who),
        }
    }

    info!("Sessions left in directory: {}", directory.session_count());
    info!("=== Demo Duel Complete ===");
    Ok(())
}

/// Local run graded from its tally.
async fn demo_single_player(config: SessionConfig) -> anyhow::Result<()> {
    info!("=== Starting Single-Player Run ===");

    let ctx = SessionContext::single_player(config, Arc::new(NoopGameplay));
    let (driver, handle) = MatchDriver::new(ctx, None, None);
    let mut started = handle.subscribe();
    let task = driver.spawn();
    wait_started(&mut started).await?;

    play(&handle, &[500, 1500, 3000]).await;
    handle.send(MatchCommand::Tally(SinglePlayerTally {
        correct_answers: 18,
        total_answers: 20,
        defeated_enemies: 20,
        total_enemies: 20,
    }));
    handle.report_game_over(GameOverReason::ScoreQuota);

    if let Some(report) = task.await? {
        info!("Run finished: {:?} with {}", report.outcome, report.my_score);
    }
    Ok(())
}

async fn wait_started(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> anyhow::Result<()> {
    let wait = async {
        while let Ok(event) = events.recv().await {
            if event == SessionEvent::MatchStarted {
                return true;
            }
        }
        false
    };
    match tokio::time::timeout(Duration::from_secs(30), wait).await {
        Ok(true) => Ok(()),
        Ok(false) => anyhow::bail!("event stream closed before the match started"),
        Err(_) => anyhow::bail!("match did not start within 30s"),
    }
}

async fn play(handle: &MatchHandle, scores: &[i32]) {
    for score in scores {
        handle.set_score(*score);
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
