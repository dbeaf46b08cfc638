//! # P2P Snake Peer
//!
//! A node of a serverless multiplayer snake session. Peers find each other
//! through multicast announcements, one of them simulates the game as
//! MASTER, a DEPUTY stands by to take over, and everyone else follows the
//! replicated state. All coordination runs over unreliable UDP datagrams
//! with sequence-numbered request/response correlation; failure detection
//! is silence-based, with every timeout derived from the game's tick period.
//!
//! The [`Peer`] facade exposes the verbs a local control surface drives:
//! create, discover, join, steer, snapshot and exit.

mod announcements;
mod error;
mod game_info;
mod handler;
mod net;
mod peer;
mod tasks;

pub use announcements::DiscoveredGame;
pub use error::PeerError;
pub use game_info::{GameSnapshot, PlayerView, SnakeView};
pub use peer::Peer;

pub use shared::{Coord, Direction, NodeRole};
