//! Integration tests for the mega-contest tournament service
//!
//! These tests drive the whole system through the orchestrator:
//! - Complete tournaments from first join to completion
//! - Cancellation of under-filled rooms
//! - Join rejections and fee compensation
//! - Rooms shared between processes over one store
//! - Join counter broadcasting

mod fixtures;

use fixtures::{contest_json, seed_contest, TestSystem};
use mega_contest::contest::RoomState;
use mega_contest::error::ContestError;
use mega_contest::facade::{ApiResponse, ErrorCode};
use mega_contest::store::keys;
use mega_contest::store::StoreGateway;
use mega_contest::types::{ContestEvent, GamePriority, TicketMetadata, User};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn contest_error<T: std::fmt::Debug>(result: mega_contest::Result<T>) -> ContestError {
    result
        .unwrap_err()
        .downcast::<ContestError>()
        .expect("typed contest error")
}

#[tokio::test(start_paused = true)]
async fn test_complete_tournament_workflow() {
    let system = TestSystem::new();
    let contest = seed_contest(&system, contest_json("mega", Duration::from_secs(5), 4, 2)).await;
    let slot = contest.game_start_ms;

    // Step 1: four players fill the room
    let users = system.subscribe_players("mega", 4).await;
    let room = system.registry.find_room("mega", slot).await.unwrap().unwrap();
    assert_eq!(room.state, RoomState::AcceptJoining);
    assert_eq!(system.scheduler.armed_count(), 1);
    assert_eq!(system.wallet.charges().len(), 4);

    // Presence before the start is refused
    assert!(matches!(
        contest_error(system.orchestrator.mark_presence("mega", slot, &users[0]).await),
        ContestError::EarlyPresence { .. }
    ));

    // Step 2: pre-start fires and round 1 is matched
    tokio::time::sleep(Duration::from_secs(10)).await;
    let room = system.registry.find_room("mega", slot).await.unwrap().unwrap();
    assert_eq!(room.state, RoomState::GameStart);
    assert_eq!(room.current_round, 1);

    let round_one = system.users.joins_for_round(1);
    assert_eq!(round_one.len(), 4);
    let games: HashSet<_> = round_one.iter().map(|(_, t)| t.game_id).collect();
    assert_eq!(games.len(), 2);
    for (_, ticket) in &round_one {
        let seats = round_one
            .iter()
            .filter(|(_, other)| other.game_id == ticket.game_id)
            .collect::<Vec<_>>();
        assert_eq!(seats.len(), 2);
        assert!(seats
            .iter()
            .all(|(_, other)| other.server_address == ticket.server_address));
    }

    // Step 3: presence hands out the stored ticket, repeat calls return the same one
    let ticket = system
        .orchestrator
        .mark_presence("mega", slot, &users[0])
        .await
        .unwrap();
    assert_eq!(ticket.round, 1);
    let again = system
        .orchestrator
        .mark_presence("mega", slot, &users[0])
        .await
        .unwrap();
    assert_eq!(ticket, again);

    // Step 4: winners of round 1 advance
    for winner in ["p0", "p2"] {
        system
            .store
            .set_add(&keys::round_winners(1, "mega", slot), winner)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(95)).await;

    let room = system.registry.find_room("mega", slot).await.unwrap().unwrap();
    assert_eq!(room.state, RoomState::GameStart);
    assert_eq!(room.current_round, 2);
    let round_two = system.users.joins_for_round(2);
    let advanced: HashSet<_> = round_two.iter().map(|(u, _)| u.as_str()).collect();
    assert_eq!(advanced, HashSet::from(["p0", "p2"]));

    let ticket = system
        .orchestrator
        .mark_presence("mega", slot, &users[2])
        .await
        .unwrap();
    assert_eq!(ticket.round, 2);

    // Step 5: the last round ends the tournament
    tokio::time::sleep(Duration::from_secs(95)).await;
    let room = system.registry.find_room("mega", slot).await.unwrap().unwrap();
    assert_eq!(room.state, RoomState::Completed);
    assert_eq!(system.scheduler.armed_count(), 0);
    assert!(system.scheduler.deadlines().pending().await.unwrap().is_empty());
    assert!(matches!(
        contest_error(system.orchestrator.mark_presence("mega", slot, &users[1]).await),
        ContestError::TournamentCompleted { .. }
    ));

    let transitions: Vec<(RoomState, RoomState)> = system
        .publisher
        .get_published_events()
        .into_iter()
        .filter_map(|event| match event {
            ContestEvent::RoomStateChanged(change) => Some((change.from, change.to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (RoomState::AcceptJoining, RoomState::PreStartingConfig),
            (RoomState::PreStartingConfig, RoomState::GameStart),
            (RoomState::GameStart, RoomState::GameStart),
            (RoomState::GameStart, RoomState::Completed),
        ]
    );
    assert_eq!(system.metrics.rooms().rooms_completed_total.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_under_filled_room_is_cancelled() {
    let system = TestSystem::new();
    let contest = seed_contest(&system, contest_json("small", Duration::from_secs(5), 10, 3)).await;
    let slot = contest.game_start_ms;

    let users = system.subscribe_players("small", 4).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let room = system.registry.find_room("small", slot).await.unwrap().unwrap();
    assert_eq!(room.state, RoomState::Cancelled);
    assert!(system.users.joins().is_empty());
    assert!(system.scheduler.deadlines().pending().await.unwrap().is_empty());

    let response =
        ApiResponse::from_result(system.orchestrator.mark_presence("small", slot, &users[0]).await);
    assert_eq!(response.code, ErrorCode::Default);
    assert_eq!(response.message.as_deref(), Some("Tournament Cancelled"));
}

#[tokio::test]
async fn test_join_rejections() {
    let system = TestSystem::new();
    seed_contest(&system, contest_json("mega", Duration::from_secs(600), 100, 1)).await;

    // Blocked users are refused outright
    system.users.block("cheater");
    system.wallet.fund("cheater", 100.0);
    assert!(matches!(
        contest_error(system.orchestrator.subscribe("mega", &User::new("cheater")).await),
        ContestError::UserBlocked { .. }
    ));

    // A failed charge leaves no trace of the join, so a retry can succeed
    let broke = User::new("broke");
    assert!(matches!(
        contest_error(system.orchestrator.subscribe("mega", &broke).await),
        ContestError::InsufficientBalance { .. }
    ));
    system.wallet.fund("broke", 10.0);
    system.orchestrator.subscribe("mega", &broke).await.unwrap();
    assert_eq!(system.wallet.balance("broke"), 0.0);

    // Second join of the same user is rejected without a second charge
    assert!(matches!(
        contest_error(system.orchestrator.subscribe("mega", &broke).await),
        ContestError::AlreadyJoined { .. }
    ));
    assert_eq!(system.wallet.charges().len(), 1);

    // Unknown contests are unavailable
    assert!(matches!(
        contest_error(system.orchestrator.subscribe("nope", &broke).await),
        ContestError::ContestNotAvailable { .. }
    ));

    system.scheduler.shutdown();
}

#[tokio::test]
async fn test_maintenance_admits_only_testers() {
    let system = TestSystem::new();
    seed_contest(&system, contest_json("mega", Duration::from_secs(600), 100, 1)).await;
    system.orchestrator.set_joining_enabled(false);
    system.users.add_tester("qa");
    system.wallet.fund("qa", 100.0);
    system.wallet.fund("player", 100.0);

    let response =
        ApiResponse::from_result(system.orchestrator.subscribe("mega", &User::new("player")).await);
    assert_eq!(response.code, ErrorCode::ServerMaintenance);

    let view = system
        .orchestrator
        .subscribe("mega", &User::new("qa"))
        .await
        .unwrap();
    assert_eq!(view.room.contest_id, "mega");

    system.scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_preferred_opponent_tickets() {
    let system = TestSystem::new();
    // Four of six seats filled: the two open seats size the preferred tier
    let mut contest = contest_json("duel", Duration::from_secs(5), 6, 1);
    contest["IsXFac"] = serde_json::json!(true);
    let contest = seed_contest(&system, contest).await;

    system.users.link_opponent("p0", "rival");
    system.subscribe_players("duel", 4).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let joins = system.users.joins_for_round(1);
    assert_eq!(joins.len(), 4);
    let (_, ticket) = joins.iter().find(|(user, _)| user == "p0").unwrap();
    match &ticket.metadata {
        TicketMetadata::PreferredOpponentAssignment {
            opponent,
            opponent_seat,
            ..
        } => {
            assert_eq!(opponent.opponent_id, "rival");
            assert_eq!(*opponent_seat, ticket.player_pos + 1);
        }
        other => panic!("expected preferred assignment, got {:?}", other),
    }
    assert!(joins
        .iter()
        .filter(|(user, _)| user != "p0")
        .all(|(_, t)| matches!(t.metadata, TicketMetadata::PlainAssignment { .. })));

    // p1 is the unmatched rest of the preferred tier; p2 and p3 are plain
    let tier_of = |user: &str| {
        joins
            .iter()
            .find(|(id, _)| id == user)
            .map(|(_, t)| t.metadata.priority())
    };
    assert_eq!(tier_of("p1"), Some(GamePriority::PreferredOpponentFirst));
    assert_eq!(tier_of("p2"), Some(GamePriority::Plain));
    assert_eq!(tier_of("p3"), Some(GamePriority::Plain));

    let room = system
        .registry
        .find_room("duel", contest.game_start_ms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(room.state, RoomState::GameStart);
    system.scheduler.shutdown();
}

#[tokio::test]
async fn test_processes_share_one_room() {
    let store = Arc::new(mega_contest::store::InMemoryStore::new());
    let first = TestSystem::on_store(store.clone());
    let second = TestSystem::on_store(store);
    let contest = seed_contest(&first, contest_json("mega", Duration::from_secs(600), 100, 1)).await;

    first.wallet.fund("a", 100.0);
    second.wallet.fund("b", 100.0);
    let (user_a, user_b) = (User::new("a"), User::new("b"));
    let (a, b) = tokio::join!(
        first.orchestrator.subscribe("mega", &user_a),
        second.orchestrator.subscribe("mega", &user_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.room.room_id, b.room.room_id);

    // Exactly one process created the room and armed its pre-start
    assert_eq!(
        first.scheduler.armed_count() + second.scheduler.armed_count(),
        1
    );
    let joined = first
        .registry
        .joined_players("mega", contest.game_start_ms)
        .await
        .unwrap();
    assert_eq!(joined.len(), 2);

    first.scheduler.shutdown();
    second.scheduler.shutdown();
}

#[tokio::test]
async fn test_join_counter_broadcast() {
    let system = TestSystem::new();
    seed_contest(&system, contest_json("mega", Duration::from_secs(600), 100, 1)).await;
    let mut receiver = system.broadcaster.subscribe();

    // Nobody joined yet
    assert!(system.broadcaster.tick().await.unwrap().is_none());

    system.subscribe_players("mega", 3).await;
    let update = system.broadcaster.tick().await.unwrap().unwrap();
    assert_eq!(update.deltas.len(), 1);
    assert_eq!(update.deltas[0].contest_id, "mega");
    assert_eq!(update.deltas[0].player_joined, 3);
    assert_eq!(receiver.recv().await.unwrap().deltas, update.deltas);

    // Nothing changed since the last tick
    assert!(system.broadcaster.tick().await.unwrap().is_none());

    let late = User::new("late");
    system.wallet.fund(&late.id, 100.0);
    system.orchestrator.subscribe("mega", &late).await.unwrap();
    let update = system.broadcaster.tick().await.unwrap().unwrap();
    assert_eq!(update.deltas[0].player_joined, 4);
    assert_eq!(system.publisher.counter_updates().len(), 2);

    system.scheduler.shutdown();
}

#[tokio::test]
async fn test_contest_list_and_prize_breakup() {
    let system = TestSystem::new();
    seed_contest(&system, contest_json("mega", Duration::from_secs(600), 100, 1)).await;

    let list = system.orchestrator.contest_list("p0").await.unwrap();
    assert_eq!(list.match_contests.len(), 1);
    assert_eq!(list.match_contests[0].id, "mega");

    // No cached breakup and none in the relational source
    let response = ApiResponse::from_result(system.orchestrator.prize_breakup("mega").await);
    assert_eq!(response.code, ErrorCode::Default);

    let unknown = system.orchestrator.prize_breakup("missing").await.unwrap();
    assert!(unknown.contest.is_none());
    assert!(unknown.breakup.is_empty());
}
