//! # Shared Game Library
//!
//! This library contains everything that every role of a peer-to-peer snake
//! session agrees on: the torus-wrapped grid model, the keyframe snake
//! representation, the deterministic simulation step run by the authoritative
//! node, and the binary wire protocol exchanged over UDP.
//!
//! ## Core Components
//!
//! ### Grid Model (`snake`)
//! Coordinates, the four-way [`Direction`] algebra, and the [`Snake`] body
//! stored as a keyframe polyline: an absolute head cell followed by signed
//! axis-aligned segment offsets. Bodies expand to explicit cells only on
//! demand (collision checks, rendering, wire export).
//!
//! ### Board Placement (`field`)
//! A scratch occupancy grid built from the live game, used to find spawn
//! sites for new snakes and empty cells for food.
//!
//! ### Simulation (`game`)
//! The pure tick function: resolve queued direction changes, advance every
//! living snake one cell, consume food, run all-pairs collision detection and
//! replenish food up to the configured target. Identical inputs produce
//! identical outcomes on every node, which is what makes deputy takeover
//! seamless.
//!
//! ### Wire Protocol (`protocol`)
//! The [`Message`] envelope (sequence number, sender/receiver ids) and the
//! typed message bodies, serialized with `bincode`. Datagrams are capped at
//! [`MAX_DATAGRAM`] bytes.

pub mod field;
pub mod game;
pub mod protocol;
pub mod snake;

pub use field::PlacementError;
pub use game::{Game, Player};
pub use protocol::{
    decode, encode, Body, CodecError, GameAnnouncement, GameStateData, Message, NodeRole,
    PlayerInfo, MAX_DATAGRAM,
};
pub use snake::{compress_cells, Coord, Direction, Snake};
