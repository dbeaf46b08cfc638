//! Error type for the peer facade and message handlers.

use shared::PlacementError;

/// Everything a public verb or a join/steer validation can fail with.
///
/// The `Display` strings double as the wire payload of `Error` replies, so a
/// rejected joiner sees the same text the master logged.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("player is already in game")]
    AlreadyInGame,
    #[error("game with same name already exists")]
    GameAlreadyExists,
    #[error("game with same name not found")]
    GameNotFound,
    #[error("master node is not responding")]
    MasterNotResponding,
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("node does not participate in game")]
    NotInGame,

    #[error("width should be from 10 to 100")]
    InvalidWidth,
    #[error("height should be from 10 to 100")]
    InvalidHeight,
    #[error("initial amount of foods should be from 0 to 100")]
    InvalidFoodStatic,
    #[error("state delay should be from 100 to 3000")]
    InvalidStateDelay,

    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// Error message relayed from a remote node.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
