//! Wire protocol for the peer-to-peer session.
//!
//! Every datagram is one bincode-encoded [`Message`]. Multicast traffic is
//! limited to [`Body::Announcement`] and [`Body::Discover`]; everything else
//! travels over unicast and is addressed through the `sender_id` /
//! `receiver_id` pair (zero until an id has been assigned, e.g. in a join
//! request). `msg_seq` is monotonic per sender and correlates a sequenced
//! request with its `Ack` / `Error` reply.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::snake::{Coord, Direction, Snake};

/// Upper bound for an encoded datagram, matching the receive buffer size on
/// every node.
pub const MAX_DATAGRAM: usize = 9192;

/// Role of a node within one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// The authoritative simulator; the only node whose tick is canonical.
    Master,
    /// Standby successor, promoted when the master goes silent.
    Deputy,
    /// A playing participant controlled by a remote peer.
    Normal,
    /// A spectator; owns no snake and cannot steer.
    Viewer,
}

/// One roster entry as published in announcements and state snapshots.
///
/// The address is absent for the publishing node itself (peers reach it at
/// the datagram's source address) and for entries whose address the
/// publisher never learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: i32,
    pub name: String,
    pub role: NodeRole,
    pub score: i32,
    pub addr: Option<SocketAddr>,
}

/// Multicast advertisement of a joinable game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameAnnouncement {
    pub game_name: String,
    pub width: i32,
    pub height: i32,
    pub food_static: i32,
    pub state_delay_ms: u64,
    pub players: Vec<PlayerInfo>,
}

/// Full replicated game state, published by the master every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateData {
    /// Strictly monotonic tick counter; receivers ignore anything not newer
    /// than what they already hold.
    pub state_order: i32,
    pub snakes: Vec<Snake>,
    pub foods: Vec<Coord>,
    pub players: Vec<PlayerInfo>,
}

/// Message payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    // Multicast
    Announcement(GameAnnouncement),
    Discover,

    // Unicast
    Join {
        game_name: String,
        player_name: String,
        requested_role: NodeRole,
    },
    State(GameStateData),
    Steer {
        direction: Direction,
    },
    /// Kept as a dual-optional pair for wire compatibility; receivers decode
    /// it into the precise directives before acting.
    RoleChange {
        sender_role: Option<NodeRole>,
        receiver_role: Option<NodeRole>,
    },
    Ping,
    Ack,
    Error {
        message: String,
    },
}

/// Envelope shared by every datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub msg_seq: u64,
    pub sender_id: i32,
    pub receiver_id: i32,
    pub body: Body,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("datagram of {0} bytes exceeds the {MAX_DATAGRAM} byte limit")]
    Oversize(usize),
}

/// Encodes a message, refusing datagrams the receive buffers could not hold.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(msg)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(CodecError::Oversize(bytes.len()));
    }
    Ok(bytes)
}

/// Decodes one datagram into a message.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}
