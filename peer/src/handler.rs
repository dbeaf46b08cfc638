//! Inbound message handling.
//!
//! One receive loop per socket; every decoded datagram is dispatched on its
//! own task, so handlers treat the game state as shared and take the lock
//! themselves. Malformed datagrams are logged and dropped, never answered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use shared::{decode, Body, Message, NodeRole, MAX_DATAGRAM};
use tokio::sync::watch;
use tokio::time;

use crate::peer::PeerInner;

const GAME_NAME_MISMATCH: &str = "game name does not match";
const RECEIVER_NOT_IN_GAME: &str = "receiver is not in any game";
const RECEIVER_IS_MASTER: &str = "receiver is master for this game";
const RECEIVER_NOT_MASTER: &str = "receiver is not master for this game";
const SENDER_NOT_IN_GAME: &str = "sender is not in this game";
const SENDER_IS_VIEWER: &str = "sender is viewer";
const DUPLICATE_PLAYER_NAME: &str = "player with such name already exists";
const DUPLICATE_PLAYER_ADDR: &str = "player with such address already exists";

/// What a role-change payload asks of the receiver, decoded from the
/// dual-optional wire form.
#[derive(Debug, PartialEq, Eq)]
enum RoleDirective {
    /// The receiver takes on a new role (deputy appointment, demotion to
    /// viewer after death).
    PromoteSelf(NodeRole),
    /// The sender states its own role; master claims are ignored because
    /// failover is decided locally, not by whoever shouts first.
    AnnounceSenderRole(NodeRole),
}

fn role_directives(
    sender_role: Option<NodeRole>,
    receiver_role: Option<NodeRole>,
) -> Vec<RoleDirective> {
    let mut directives = Vec::new();
    if let Some(role) = sender_role {
        directives.push(RoleDirective::AnnounceSenderRole(role));
    }
    if let Some(role) = receiver_role {
        directives.push(RoleDirective::PromoteSelf(role));
    }
    directives
}

/// How a handler answers once the game lock has been released.
enum Reply {
    Ack { sender_id: i32, receiver_id: i32 },
    Error {
        sender_id: i32,
        receiver_id: i32,
        message: String,
    },
    Silent,
}

/// Reads the unicast socket until shutdown, spawning one task per message.
pub(crate) async fn run_unicast_listener(
    inner: Arc<PeerInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("unicast listener running");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.unicast.recv_from(&mut buf) => match received {
                Ok((len, addr)) => match decode(&buf[..len]) {
                    Ok(msg) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move { inner.handle_unicast(msg, addr).await });
                    }
                    Err(e) => warn!("dropping malformed datagram from {addr}: {e}"),
                },
                Err(e) => {
                    error!("unicast receive error: {e}");
                    time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
    debug!("unicast listener stopped");
}

/// Reads the multicast socket until shutdown. Only announcements and
/// discovery probes are expected here; anything else is ignored.
pub(crate) async fn run_multicast_listener(
    inner: Arc<PeerInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("multicast listener running");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.multicast.recv_from(&mut buf) => match received {
                Ok((len, addr)) => match decode(&buf[..len]) {
                    Ok(msg) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move { inner.handle_multicast(msg, addr).await });
                    }
                    Err(e) => warn!("dropping malformed datagram from {addr}: {e}"),
                },
                Err(e) => {
                    error!("multicast receive error: {e}");
                    time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
    debug!("multicast listener stopped");
}

impl PeerInner {
    pub(crate) async fn handle_multicast(&self, msg: Message, src: SocketAddr) {
        match msg.body {
            Body::Announcement(announcement) => {
                // Self-echo: the group loops our own announcements back.
                {
                    let game = self.game.read().await;
                    if let Some(game) = game.as_ref() {
                        if game.name() == announcement.game_name {
                            return;
                        }
                    }
                }
                self.announcements.upsert(announcement, src).await;
            }
            Body::Discover => {
                let announcement = {
                    let game = self.game.read().await;
                    game.as_ref()
                        .filter(|g| g.is_master())
                        .map(|g| g.announcement())
                };
                if let Some(announcement) = announcement {
                    self.send_announcement(announcement).await;
                }
            }
            other => debug!("ignoring unicast-only message on multicast: {other:?}"),
        }
    }

    pub(crate) async fn handle_unicast(&self, msg: Message, src: SocketAddr) {
        match &msg.body {
            Body::Ack | Body::Error { .. } => self.handle_reply(msg).await,
            Body::Ping => self.handle_ping(msg).await,
            Body::Join { .. } => self.handle_join(msg, src).await,
            Body::Steer { .. } => self.handle_steer(msg, src).await,
            Body::RoleChange { .. } => self.handle_role_change(msg, src).await,
            Body::State(_) => self.handle_state(msg, src).await,
            Body::Announcement(_) | Body::Discover => {
                debug!("ignoring multicast-only message on unicast from {src}")
            }
        }
    }

    /// `Ack` and `Error` complete a pending request and count as liveness.
    async fn handle_reply(&self, msg: Message) {
        {
            let game = self.game.read().await;
            if let Some(game) = game.as_ref() {
                if game.self_id() != msg.receiver_id {
                    return;
                }
            }
        }
        self.fulfill(&msg).await;
        if let Some(game) = self.game.write().await.as_mut() {
            game.touch(msg.sender_id);
        }
    }

    async fn handle_ping(&self, msg: Message) {
        let mut game = self.game.write().await;
        let Some(game) = game.as_mut() else { return };
        if game.self_id() != msg.receiver_id {
            return;
        }
        game.touch(msg.sender_id);
    }

    /// Join admission, master side. On success the ack's receiver field
    /// carries the newly assigned id; that is how the joiner learns it.
    async fn handle_join(&self, msg: Message, src: SocketAddr) {
        let Body::Join {
            game_name,
            player_name,
            requested_role,
        } = &msg.body
        else {
            return;
        };

        let error = |message: &str| Reply::Error {
            sender_id: msg.receiver_id,
            receiver_id: msg.sender_id,
            message: message.to_string(),
        };

        let reply = {
            let mut guard = self.game.write().await;
            match guard.as_mut() {
                None => error(RECEIVER_NOT_IN_GAME),
                Some(game) if !game.is_master() => error(RECEIVER_NOT_MASTER),
                Some(game) if game.name() != game_name.as_str() => error(GAME_NAME_MISMATCH),
                Some(game) if game.exists_player_name(player_name) => {
                    error(DUPLICATE_PLAYER_NAME)
                }
                Some(game) if game.exists_node_addr(src) => error(DUPLICATE_PLAYER_ADDR),
                Some(game) => {
                    let role = if *requested_role == NodeRole::Viewer {
                        NodeRole::Viewer
                    } else {
                        NodeRole::Normal
                    };
                    match game.add_player(player_name, role, Some(src)) {
                        Ok(new_id) => Reply::Ack {
                            sender_id: game.self_id(),
                            receiver_id: new_id,
                        },
                        Err(e) => error(&e.to_string()),
                    }
                }
            }
        };

        self.answer(msg.msg_seq, reply, src).await;
    }

    /// Steer recording, master side; latest direction per player wins
    /// within a tick.
    async fn handle_steer(&self, msg: Message, src: SocketAddr) {
        let Body::Steer { direction } = msg.body else { return };

        let error = |message: &str| Reply::Error {
            sender_id: msg.receiver_id,
            receiver_id: msg.sender_id,
            message: message.to_string(),
        };

        let reply = {
            let mut guard = self.game.write().await;
            match guard.as_mut() {
                None => error(RECEIVER_NOT_IN_GAME),
                Some(game) if game.self_id() != msg.receiver_id => Reply::Silent,
                Some(game) if !game.is_master() => error(RECEIVER_NOT_MASTER),
                Some(game) => {
                    let sender_role = game.node(msg.sender_id).map(|node| node.role);
                    match sender_role {
                        None => error(SENDER_NOT_IN_GAME),
                        Some(NodeRole::Viewer) => error(SENDER_IS_VIEWER),
                        Some(_) => {
                            game.add_move(msg.sender_id, direction);
                            game.touch(msg.sender_id);
                            Reply::Ack {
                                sender_id: game.self_id(),
                                receiver_id: msg.sender_id,
                            }
                        }
                    }
                }
            }
        };

        self.answer(msg.msg_seq, reply, src).await;
    }

    async fn handle_role_change(&self, msg: Message, src: SocketAddr) {
        let Body::RoleChange {
            sender_role,
            receiver_role,
        } = msg.body
        else {
            return;
        };

        let reply = {
            let mut guard = self.game.write().await;
            match guard.as_mut() {
                None => Reply::Error {
                    sender_id: msg.receiver_id,
                    receiver_id: msg.sender_id,
                    message: RECEIVER_NOT_IN_GAME.to_string(),
                },
                Some(game) if game.self_id() != msg.receiver_id => Reply::Silent,
                Some(game) => {
                    for directive in role_directives(sender_role, receiver_role) {
                        match directive {
                            RoleDirective::AnnounceSenderRole(role) => {
                                if role != NodeRole::Master {
                                    game.set_role(msg.sender_id, role);
                                }
                            }
                            RoleDirective::PromoteSelf(role) => {
                                let self_id = game.self_id();
                                game.set_role(self_id, role);
                            }
                        }
                    }
                    game.touch(msg.sender_id);
                    Reply::Ack {
                        sender_id: game.self_id(),
                        receiver_id: msg.sender_id,
                    }
                }
            }
        };

        self.answer(msg.msg_seq, reply, src).await;
    }

    /// Replicated state, follower side: always acknowledge, apply only when
    /// strictly newer than what we hold.
    async fn handle_state(&self, msg: Message, src: SocketAddr) {
        let Body::State(state) = msg.body else { return };

        let reply = {
            let mut guard = self.game.write().await;
            match guard.as_mut() {
                None => Reply::Error {
                    sender_id: msg.receiver_id,
                    receiver_id: msg.sender_id,
                    message: RECEIVER_NOT_IN_GAME.to_string(),
                },
                Some(game) if game.self_id() != msg.receiver_id => Reply::Silent,
                Some(game) if game.is_master() => Reply::Error {
                    sender_id: msg.receiver_id,
                    receiver_id: msg.sender_id,
                    message: RECEIVER_IS_MASTER.to_string(),
                },
                Some(game) => {
                    if state.state_order > game.state_order() {
                        game.install_state(state, src);
                    }
                    game.touch(msg.sender_id);
                    Reply::Ack {
                        sender_id: game.self_id(),
                        receiver_id: msg.sender_id,
                    }
                }
            }
        };

        self.answer(msg.msg_seq, reply, src).await;
    }

    async fn answer(&self, msg_seq: u64, reply: Reply, src: SocketAddr) {
        match reply {
            Reply::Ack {
                sender_id,
                receiver_id,
            } => self.send_ack(msg_seq, sender_id, receiver_id, src).await,
            Reply::Error {
                sender_id,
                receiver_id,
                message,
            } => {
                self.send_error(msg_seq, sender_id, receiver_id, message, src)
                    .await
            }
            Reply::Silent => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_change_decodes_into_precise_directives() {
        assert_eq!(
            role_directives(Some(NodeRole::Master), None),
            vec![RoleDirective::AnnounceSenderRole(NodeRole::Master)]
        );
        assert_eq!(
            role_directives(None, Some(NodeRole::Deputy)),
            vec![RoleDirective::PromoteSelf(NodeRole::Deputy)]
        );
        assert_eq!(
            role_directives(Some(NodeRole::Viewer), Some(NodeRole::Viewer)),
            vec![
                RoleDirective::AnnounceSenderRole(NodeRole::Viewer),
                RoleDirective::PromoteSelf(NodeRole::Viewer)
            ]
        );
        assert!(role_directives(None, None).is_empty());
    }
}
