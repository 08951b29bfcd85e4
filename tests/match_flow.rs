//! End-to-end matches over the in-process relay and directory.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use duel_session::core::config::{LobbyConfig, SessionConfig};
use duel_session::lobby::{InMemoryDirectory, LobbyCoordinator, MatchmakingDirectory, ModeTag, PlayerId};
use duel_session::network::{GameOverReason, LocalRelay, LocalTransport, Role, SessionTransport};
use duel_session::session::{
    LocalOutcome, MatchCommand, MatchDriver, MatchHandle, MatchReport, NoopGameplay, SessionContext,
    SessionEvent,
};

struct Peer {
    lobby: LobbyCoordinator,
    endpoint: Arc<LocalTransport>,
    handle: MatchHandle,
    events: broadcast::Receiver<SessionEvent>,
    task: JoinHandle<Option<MatchReport>>,
}

fn mode() -> ModeTag {
    ModeTag::new("Hiragana")
}

fn start_peer(
    name: &str,
    role: Role,
    directory: Arc<dyn MatchmakingDirectory>,
    relay: &LocalRelay,
) -> (LobbyCoordinator, impl FnOnce() -> Peer) {
    let (endpoint, transport_events) = relay.endpoint();
    let transport = SessionTransport::new(endpoint.clone());
    let lobby = LobbyCoordinator::new(directory, transport.clone(), PlayerId::new(name), LobbyConfig::default());

    let driver_lobby = lobby.clone();
    let spawn = move || {
        let ctx = SessionContext::multiplayer(role, SessionConfig::default(), transport, Arc::new(NoopGameplay));
        let (driver, handle) = MatchDriver::new(ctx, Some(driver_lobby.clone()), Some(transport_events));
        let events = handle.subscribe();
        let task = driver.spawn();
        Peer { lobby: driver_lobby, endpoint, handle, events, task }
    };
    (lobby, spawn)
}

/// Host creates a public session, guest joins it, both drivers run.
async fn connect_pair(directory: Arc<InMemoryDirectory>) -> (Peer, Peer) {
    let relay = LocalRelay::new();

    let (host_lobby, spawn_host) = start_peer("host", Role::Host, directory.clone(), &relay);
    let record = host_lobby.create_public_session(&mode()).await.unwrap();
    let host = spawn_host();

    let (guest_lobby, spawn_guest) = start_peer("guest", Role::Client, directory.clone(), &relay);
    guest_lobby.join_by_id(&record.id).await.unwrap();
    let guest = spawn_guest();

    (host, guest)
}

async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, wanted: &SessionEvent) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if &event == wanted => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Event stream closed before {:?}", wanted),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {:?}", wanted));
}

async fn result(peer: Peer) -> MatchReport {
    tokio::time::timeout(Duration::from_secs(60), peer.task)
        .await
        .expect("driver did not finish")
        .expect("driver panicked")
        .expect("no result shown")
}

async fn both_active(host: &mut Peer, guest: &mut Peer) {
    wait_for(&mut host.events, &SessionEvent::MatchStarted).await;
    wait_for(&mut guest.events, &SessionEvent::MatchStarted).await;
}

#[tokio::test(start_paused = true)]
async fn test_health_loss_decides_match() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (mut host, mut guest) = connect_pair(directory.clone()).await;
    both_active(&mut host, &mut guest).await;

    // Start locked the session.
    let record = host.lobby.current_session().await.unwrap();
    assert!(directory.session(&record.id).unwrap().is_locked);

    host.handle.set_score(5000);
    guest.handle.set_score(7000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    guest.handle.send(MatchCommand::SetHealth { current: 30, max: 60 });
    guest.handle.send(MatchCommand::SetHealth { current: 0, max: 60 });

    let host_report = result(host).await;
    let guest_report = result(guest).await;

    assert_eq!(
        host_report,
        MatchReport { outcome: LocalOutcome::Win, my_score: 5000, opponent_score: 7000 }
    );
    assert_eq!(
        guest_report,
        MatchReport { outcome: LocalOutcome::Lose, my_score: 7000, opponent_score: 5000 }
    );

    // Host left by removing the session.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_equal_scores_draw() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (mut host, mut guest) = connect_pair(directory).await;
    both_active(&mut host, &mut guest).await;

    host.handle.set_score(8000);
    guest.handle.set_score(8000);
    tokio::time::sleep(Duration::from_secs(2)).await;
    host.handle.report_game_over(GameOverReason::ScoreQuota);

    assert_eq!(result(host).await.outcome, LocalOutcome::Draw);
    assert_eq!(result(guest).await.outcome, LocalOutcome::Draw);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_client_reports_single_outcome() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (mut host, mut guest) = connect_pair(directory).await;
    both_active(&mut host, &mut guest).await;

    guest.handle.set_score(300);
    for _ in 0..3 {
        guest.handle.report_game_over(GameOverReason::ScoreQuota);
    }

    let mut host_events = host.handle.subscribe();
    let host_report = result(host).await;
    assert_eq!(host_report.outcome, LocalOutcome::Lose);

    let mut flags = 0;
    let mut endings = 0;
    while let Ok(event) = host_events.try_recv() {
        match event {
            SessionEvent::GameOverFlagRaised => flags += 1,
            SessionEvent::MatchEnded(_) => endings += 1,
            _ => {}
        }
    }
    assert_eq!((flags, endings), (1, 1));
    assert_eq!(result(guest).await.outcome, LocalOutcome::Win);
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_disconnects_both_sides() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (mut host, mut guest) = connect_pair(directory).await;
    both_active(&mut host, &mut guest).await;

    let muted_at = tokio::time::Instant::now();
    guest.endpoint.set_muted(true);

    wait_for(
        &mut host.events,
        &SessionEvent::PeerSilenceEscalated(duel_session::session::SilenceStage::FirstWarning),
    )
    .await;

    let host_report = result(host).await;
    assert_eq!(host_report.outcome, LocalOutcome::Disconnected);
    assert!(muted_at.elapsed() >= Duration::from_secs(19));

    // Host shut the relay down; the guest sees it leave mid-match.
    assert_eq!(result(guest).await.outcome, LocalOutcome::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_special_attack_reaches_opponent() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (mut host, mut guest) = connect_pair(directory).await;
    both_active(&mut host, &mut guest).await;

    host.handle.send(MatchCommand::SetHealth { current: 50, max: 50 });
    guest.handle.send(MatchCommand::ArmSpecialAttack);
    guest.handle.send(MatchCommand::UseSpecialAttack);

    wait_for(&mut host.events, &SessionEvent::SpecialAttackReceived { damage: 10, hp_after: 40 }).await;

    guest.handle.leave();
    host.handle.leave();
    assert_eq!(tokio::time::timeout(Duration::from_secs(5), guest.task).await.unwrap().unwrap(), None);
    let host_result = tokio::time::timeout(Duration::from_secs(5), host.task).await.unwrap().unwrap();
    assert!(host_result.is_none() || host_result.is_some_and(|r| r.outcome == LocalOutcome::Disconnected));
}
