//! End-to-end scenarios over real UDP sockets on localhost.
//!
//! Multicast routing is unavailable on most CI networks, so each peer gets
//! its own group port and announcements are delivered by sending the
//! datagram straight to that port. Everything after discovery (join, state
//! replication, steering, failover) runs over the peers' real unicast
//! sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use peer::{Coord, Direction, NodeRole, Peer, PeerError};
use shared::{encode, Body, GameAnnouncement, Message, PlayerInfo};
use tokio::net::UdpSocket;
use tokio::time::sleep;

fn group(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 33, 8, 1)), port)
}

fn local(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
}

/// Stands in for multicast routing: hands one announcement of `host`'s game
/// to the peer listening on `group_port`.
async fn advertise(group_port: u16, host: &Peer, game_name: &str, state_delay_ms: u64) {
    let msg = Message {
        msg_seq: 1,
        sender_id: 0,
        receiver_id: 0,
        body: Body::Announcement(GameAnnouncement {
            game_name: game_name.to_string(),
            width: 20,
            height: 20,
            food_static: 1,
            state_delay_ms,
            players: vec![PlayerInfo {
                id: 1,
                name: "host".to_string(),
                role: NodeRole::Master,
                score: 0,
                addr: Some(local(host.unicast_addr())),
            }],
        }),
    };
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    socket
        .send_to(&encode(&msg).unwrap(), (Ipv4Addr::LOCALHOST, group_port))
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
}

fn perpendicular(direction: Direction) -> Direction {
    match direction {
        Direction::Up | Direction::Down => Direction::Left,
        Direction::Left | Direction::Right => Direction::Up,
    }
}

#[tokio::test]
async fn solo_game_ticks_and_keeps_food_topped_up() {
    let alice = Peer::start(group(47301)).await.unwrap();
    alice
        .create_game("solo", 20, 20, 2, 200, "alice")
        .await
        .unwrap();

    let before = alice.get_state().await.unwrap();
    assert_eq!(before.state_order, 0);
    assert_eq!(before.self_id, 1);
    assert_eq!(before.self_role, NodeRole::Master);
    assert_eq!(before.snakes.len(), 1);
    let head = before.snakes[0].cells[0];
    let heading = before.snakes[0].direction;

    sleep(Duration::from_millis(1100)).await;

    let after = alice.get_state().await.unwrap();
    assert!(
        after.state_order >= 4,
        "expected several ticks, got {}",
        after.state_order
    );
    // food_static + one player, replenished every tick.
    assert_eq!(after.foods.len(), 3);

    // Nobody steered, so the snake advanced straight along its heading.
    let (dx, dy) = heading.offset();
    let order = after.state_order;
    let expected = Coord::new(
        (head.x + dx * order).rem_euclid(20),
        (head.y + dy * order).rem_euclid(20),
    );
    assert_eq!(after.snakes[0].cells[0], expected);
    assert_eq!(after.snakes[0].direction, heading);

    alice.close().await;
}

#[tokio::test]
async fn second_peer_discovers_and_joins() {
    let alice = Peer::start(group(47302)).await.unwrap();
    alice
        .create_game("duo", 20, 20, 1, 1000, "alice")
        .await
        .unwrap();

    let bob = Peer::start(group(47303)).await.unwrap();
    advertise(47303, &alice, "duo", 1000).await;

    let games = bob.discover_games().await;
    let game = games.iter().find(|g| g.game_name == "duo").unwrap();
    assert_eq!((game.width, game.height), (20, 20));
    assert_eq!(game.player_count, 1);

    bob.join_game("duo", "bob", true).await.unwrap();

    // Straight after admission, before any deputy upkeep ran, the host
    // lists the newcomer as a plain player with a fresh id.
    let host_view = alice.get_state().await.unwrap();
    assert_eq!(host_view.players.len(), 2);
    let bob_entry = host_view
        .players
        .iter()
        .find(|p| p.name == "bob")
        .expect("bob in the host roster");
    assert_eq!(bob_entry.role, NodeRole::Normal);
    assert_ne!(bob_entry.id, 1);
    assert_eq!(host_view.snakes.len(), 2);

    // The first published state fills in the joiner's view.
    sleep(Duration::from_millis(1400)).await;
    let joiner_view = bob.get_state().await.unwrap();
    assert!(joiner_view.state_order >= 1);
    assert_eq!(joiner_view.players.len(), 2);
    assert_eq!(joiner_view.self_id, bob_entry.id);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn duplicate_name_is_rejected_with_the_masters_reason() {
    let alice = Peer::start(group(47304)).await.unwrap();
    alice
        .create_game("dup", 20, 20, 1, 1000, "alice")
        .await
        .unwrap();

    let bob = Peer::start(group(47305)).await.unwrap();
    advertise(47305, &alice, "dup", 1000).await;

    let err = bob.join_game("dup", "alice", true).await.unwrap_err();
    match err {
        PeerError::Rejected(message) => {
            assert_eq!(message, "player with such name already exists")
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(bob.get_state().await.is_err());

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn steer_is_forwarded_and_applied_on_the_next_tick() {
    let alice = Peer::start(group(47306)).await.unwrap();
    alice
        .create_game("steer", 20, 20, 1, 400, "alice")
        .await
        .unwrap();

    let bob = Peer::start(group(47307)).await.unwrap();
    advertise(47307, &alice, "steer", 400).await;
    bob.join_game("steer", "bob", true).await.unwrap();

    let host_view = alice.get_state().await.unwrap();
    let bob_id = host_view
        .players
        .iter()
        .find(|p| p.name == "bob")
        .unwrap()
        .id;
    let bob_snake = host_view
        .snakes
        .iter()
        .find(|s| s.player_id == bob_id)
        .unwrap();
    let turn = perpendicular(bob_snake.direction);

    bob.add_move(turn).await.unwrap();

    sleep(Duration::from_millis(900)).await;
    let after = alice.get_state().await.unwrap();
    let bob_snake = after
        .snakes
        .iter()
        .find(|s| s.player_id == bob_id)
        .expect("bob's snake is alive");
    assert_eq!(bob_snake.direction, turn);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn reversed_steer_keeps_the_heading() {
    let alice = Peer::start(group(47308)).await.unwrap();
    alice
        .create_game("reverse", 20, 20, 1, 200, "alice")
        .await
        .unwrap();

    let heading = alice.get_state().await.unwrap().snakes[0].direction;
    alice.add_move(heading.opposite()).await.unwrap();

    sleep(Duration::from_millis(500)).await;
    let after = alice.get_state().await.unwrap();
    assert_eq!(after.snakes[0].direction, heading);

    alice.close().await;
}

#[tokio::test]
async fn master_appoints_exactly_one_deputy() {
    let alice = Peer::start(group(47309)).await.unwrap();
    alice
        .create_game("trio", 20, 20, 1, 300, "alice")
        .await
        .unwrap();

    let bob = Peer::start(group(47310)).await.unwrap();
    advertise(47310, &alice, "trio", 300).await;
    bob.join_game("trio", "bob", true).await.unwrap();

    let carol = Peer::start(group(47311)).await.unwrap();
    advertise(47311, &alice, "trio", 300).await;
    carol.join_game("trio", "carol", true).await.unwrap();

    sleep(Duration::from_millis(1200)).await;

    let host_view = alice.get_state().await.unwrap();
    let followers: Vec<_> = host_view.players.iter().filter(|p| p.id != 1).collect();
    assert_eq!(followers.len(), 2);
    let deputies = followers
        .iter()
        .filter(|p| p.role == NodeRole::Deputy)
        .count();
    let normals = followers
        .iter()
        .filter(|p| p.role == NodeRole::Normal)
        .count();
    assert_eq!((deputies, normals), (1, 1));

    alice.close().await;
    bob.close().await;
    carol.close().await;
}

#[tokio::test]
async fn deputy_takes_over_when_the_master_dies() {
    let alice = Peer::start(group(47312)).await.unwrap();
    alice
        .create_game("fail", 20, 20, 1, 200, "alice")
        .await
        .unwrap();

    let bob = Peer::start(group(47313)).await.unwrap();
    advertise(47313, &alice, "fail", 200).await;
    bob.join_game("fail", "bob", true).await.unwrap();

    let carol = Peer::start(group(47314)).await.unwrap();
    advertise(47314, &alice, "fail", 200).await;
    carol.join_game("fail", "carol", true).await.unwrap();

    // Let the deputy appointment and a few state publications settle.
    sleep(Duration::from_millis(900)).await;
    let host_view = alice.get_state().await.unwrap();
    let deputy_id = host_view
        .players
        .iter()
        .find(|p| p.role == NodeRole::Deputy)
        .expect("a deputy was appointed")
        .id;

    let bob_id = bob.get_state().await.unwrap().self_id;
    let (successor, bystander) = if deputy_id == bob_id {
        (&bob, &carol)
    } else {
        (&carol, &bob)
    };

    // Abrupt death of the master.
    alice.close().await;

    sleep(Duration::from_millis(1500)).await;

    let successor_view = successor.get_state().await.unwrap();
    assert_eq!(successor_view.self_role, NodeRole::Master);

    let bystander_view = bystander.get_state().await.unwrap();
    let master = bystander_view
        .players
        .iter()
        .find(|p| p.role == NodeRole::Master)
        .expect("bystander recognized a master");
    assert_eq!(master.id, deputy_id);
    assert!(bystander_view.players.iter().all(|p| p.id != 1));

    // The new master keeps the game ticking.
    let order = successor_view.state_order;
    sleep(Duration::from_millis(600)).await;
    assert!(successor.get_state().await.unwrap().state_order > order);

    bob.close().await;
    carol.close().await;
}
