//! Outbound messaging: fire-and-forget sends and the request/response
//! correlator.
//!
//! Everything leaves through the unicast socket, including datagrams
//! addressed to the multicast group, so remote peers always see the node's
//! unicast endpoint as the source.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{debug, error};
use shared::{encode, Body, Direction, GameAnnouncement, GameStateData, Message, NodeRole};
use tokio::sync::oneshot;
use tokio::time;

use crate::peer::PeerInner;

/// Reply deadline for a join request.
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Reply deadline for steer, state and role-change requests, and the
/// silence threshold after which a node counts as gone.
pub(crate) fn ack_deadline(state_delay: Duration) -> Duration {
    state_delay * 4 / 5
}

impl PeerInner {
    pub(crate) fn next_seq(&self) -> u64 {
        self.msg_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Encodes and transmits one datagram. Transport failures are logged and
    /// swallowed; an unreachable peer is detected by silence, not by send
    /// errors.
    pub(crate) async fn send(&self, msg: Message, addr: SocketAddr) {
        match encode(&msg) {
            Ok(bytes) => {
                if let Err(e) = self.unicast.send_to(&bytes, addr).await {
                    debug!("sending to {addr} failed: {e}");
                }
            }
            Err(e) => error!("encoding outbound message failed: {e}"),
        }
    }

    /// Sends a sequenced request and waits for its `Ack`/`Error` reply.
    ///
    /// The correlator slot is removed whether the wait was fulfilled or
    /// timed out, so a late reply finds no slot and is dropped.
    pub(crate) async fn send_with_response(
        &self,
        msg: Message,
        deadline: Duration,
        addr: SocketAddr,
    ) -> Option<Message> {
        let seq = msg.msg_seq;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        self.send(msg, addr).await;

        let reply = time::timeout(deadline, rx).await;
        self.pending.lock().await.remove(&seq);
        match reply {
            Ok(Ok(msg)) => Some(msg),
            _ => None,
        }
    }

    /// Completes the correlator slot for `msg.msg_seq`, if one is waiting.
    pub(crate) async fn fulfill(&self, msg: &Message) {
        if let Some(slot) = self.pending.lock().await.remove(&msg.msg_seq) {
            let _ = slot.send(msg.clone());
        }
    }

    pub(crate) async fn send_ack(
        &self,
        msg_seq: u64,
        sender_id: i32,
        receiver_id: i32,
        addr: SocketAddr,
    ) {
        self.send(
            Message {
                msg_seq,
                sender_id,
                receiver_id,
                body: Body::Ack,
            },
            addr,
        )
        .await;
    }

    pub(crate) async fn send_error(
        &self,
        msg_seq: u64,
        sender_id: i32,
        receiver_id: i32,
        message: String,
        addr: SocketAddr,
    ) {
        self.send(
            Message {
                msg_seq,
                sender_id,
                receiver_id,
                body: Body::Error { message },
            },
            addr,
        )
        .await;
    }

    pub(crate) async fn send_ping(&self, sender_id: i32, receiver_id: i32, addr: SocketAddr) {
        self.send(
            Message {
                msg_seq: self.next_seq(),
                sender_id,
                receiver_id,
                body: Body::Ping,
            },
            addr,
        )
        .await;
    }

    pub(crate) async fn send_discover(&self) {
        self.send(
            Message {
                msg_seq: self.next_seq(),
                sender_id: 0,
                receiver_id: 0,
                body: Body::Discover,
            },
            self.multicast_addr,
        )
        .await;
    }

    pub(crate) async fn send_announcement(&self, announcement: GameAnnouncement) {
        self.send(
            Message {
                msg_seq: self.next_seq(),
                sender_id: 0,
                receiver_id: 0,
                body: Body::Announcement(announcement),
            },
            self.multicast_addr,
        )
        .await;
    }

    pub(crate) async fn send_join(
        &self,
        game_name: &str,
        player_name: &str,
        requested_role: NodeRole,
        addr: SocketAddr,
    ) -> Option<Message> {
        self.send_with_response(
            Message {
                msg_seq: self.next_seq(),
                sender_id: 0,
                receiver_id: 0,
                body: Body::Join {
                    game_name: game_name.to_string(),
                    player_name: player_name.to_string(),
                    requested_role,
                },
            },
            JOIN_TIMEOUT,
            addr,
        )
        .await
    }

    pub(crate) async fn send_steer(
        &self,
        sender_id: i32,
        receiver_id: i32,
        direction: Direction,
        deadline: Duration,
        addr: SocketAddr,
    ) -> Option<Message> {
        self.send_with_response(
            Message {
                msg_seq: self.next_seq(),
                sender_id,
                receiver_id,
                body: Body::Steer { direction },
            },
            deadline,
            addr,
        )
        .await
    }

    pub(crate) async fn send_state(
        &self,
        sender_id: i32,
        receiver_id: i32,
        state: GameStateData,
        deadline: Duration,
        addr: SocketAddr,
    ) -> Option<Message> {
        self.send_with_response(
            Message {
                msg_seq: self.next_seq(),
                sender_id,
                receiver_id,
                body: Body::State(state),
            },
            deadline,
            addr,
        )
        .await
    }

    pub(crate) async fn send_role_change(
        &self,
        sender_id: i32,
        receiver_id: i32,
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
        deadline: Duration,
        addr: SocketAddr,
    ) -> Option<Message> {
        self.send_with_response(
            Message {
                msg_seq: self.next_seq(),
                sender_id,
                receiver_id,
                body: Body::RoleChange {
                    sender_role,
                    receiver_role,
                },
            },
            deadline,
            addr,
        )
        .await
    }
}
