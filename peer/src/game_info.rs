//! The active game as one node sees it: board, roster, roles, queued moves
//! and the replication counter.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use log::info;
use shared::{
    Coord, Direction, Game, GameAnnouncement, GameStateData, NodeRole, Player, PlayerInfo,
};

use crate::announcements::Announcement;
use crate::error::PeerError;

/// One known node of the game mesh.
///
/// `addr` is `None` for the local node. `last_seen` drives failure
/// detection; granting a grace period simply moves it into the future, which
/// [`silence`](NodeInfo::silence) saturates back to zero.
#[derive(Debug, Clone)]
pub(crate) struct NodeInfo {
    pub player_id: i32,
    pub role: NodeRole,
    pub addr: Option<SocketAddr>,
    pub last_seen: Instant,
}

impl NodeInfo {
    pub(crate) fn new(player_id: i32, role: NodeRole, addr: Option<SocketAddr>) -> Self {
        Self {
            player_id,
            role,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub(crate) fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// How long this node has been quiet. Zero while a grace period holds.
    pub(crate) fn silence(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen)
    }

    pub(crate) fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub(crate) fn grant_grace(&mut self, grace: Duration) {
        self.last_seen = Instant::now() + grace;
    }
}

/// Snapshot handed to the local control surface.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub food_static: i32,
    pub state_delay: Duration,
    pub state_order: i32,
    pub self_id: i32,
    pub self_role: NodeRole,
    pub players: Vec<PlayerView>,
    pub snakes: Vec<SnakeView>,
    pub foods: Vec<Coord>,
}

#[derive(Debug, Clone)]
pub struct PlayerView {
    pub id: i32,
    pub name: String,
    pub score: i32,
    pub role: NodeRole,
}

/// A snake expanded to explicit cells, ready for rendering.
#[derive(Debug, Clone)]
pub struct SnakeView {
    pub player_id: i32,
    pub cells: Vec<Coord>,
    pub direction: Direction,
    pub zombie: bool,
}

pub(crate) struct GameInfo {
    game: Game,
    state_delay: Duration,
    state_order: AtomicI32,
    /// Monotonic id source, scoped to this game.
    next_player_id: i32,
    self_id: i32,
    nodes: HashMap<i32, NodeInfo>,
    /// Direction changes accumulated since the last tick, latest wins.
    moves: HashMap<i32, Direction>,
}

impl GameInfo {
    /// Creates an empty game after validating the configuration ranges.
    pub(crate) fn create(
        name: &str,
        width: i32,
        height: i32,
        food_static: i32,
        state_delay_ms: u64,
    ) -> Result<Self, PeerError> {
        if !(10..=100).contains(&width) {
            return Err(PeerError::InvalidWidth);
        }
        if !(10..=100).contains(&height) {
            return Err(PeerError::InvalidHeight);
        }
        if !(0..=100).contains(&food_static) {
            return Err(PeerError::InvalidFoodStatic);
        }
        if !(100..=3000).contains(&state_delay_ms) {
            return Err(PeerError::InvalidStateDelay);
        }

        Ok(Self {
            game: Game::new(name, width, height, food_static),
            state_delay: Duration::from_millis(state_delay_ms),
            state_order: AtomicI32::new(0),
            next_player_id: 1,
            self_id: 0,
            nodes: HashMap::new(),
            moves: HashMap::new(),
        })
    }

    /// Builds the local view of a game just joined through `announcement`.
    ///
    /// The roster starts with the local node (id assigned by the master) and
    /// the master itself; everything else arrives with the first state
    /// message.
    pub(crate) fn join(
        announcement: &Announcement,
        self_id: i32,
        self_role: NodeRole,
        master_id: i32,
    ) -> Result<Self, PeerError> {
        let mut info = Self::create(
            &announcement.game_name,
            announcement.width,
            announcement.height,
            announcement.food_static,
            announcement.state_delay_ms,
        )?;
        info.self_id = self_id;
        info.next_player_id = self_id + 1;
        info.nodes
            .insert(self_id, NodeInfo::new(self_id, self_role, None));
        info.nodes.insert(
            master_id,
            NodeInfo::new(master_id, NodeRole::Master, Some(announcement.addr)),
        );
        Ok(info)
    }

    pub(crate) fn name(&self) -> &str {
        &self.game.name
    }

    pub(crate) fn state_delay(&self) -> Duration {
        self.state_delay
    }

    pub(crate) fn state_order(&self) -> i32 {
        self.state_order.load(Ordering::SeqCst)
    }

    pub(crate) fn self_id(&self) -> i32 {
        self.self_id
    }

    pub(crate) fn self_role(&self) -> NodeRole {
        self.nodes
            .get(&self.self_id)
            .map(|node| node.role)
            .unwrap_or(NodeRole::Viewer)
    }

    pub(crate) fn is_master(&self) -> bool {
        self.self_role() == NodeRole::Master
    }

    fn node_with_role(&self, role: NodeRole) -> Option<&NodeInfo> {
        self.nodes.values().find(|node| node.role == role)
    }

    pub(crate) fn master(&self) -> Option<&NodeInfo> {
        self.node_with_role(NodeRole::Master)
    }

    pub(crate) fn deputy(&self) -> Option<&NodeInfo> {
        self.node_with_role(NodeRole::Deputy)
    }

    /// Normal nodes with a known address, candidates for deputy promotion.
    pub(crate) fn normal_peers(&self) -> Vec<(i32, SocketAddr)> {
        self.nodes
            .values()
            .filter(|node| node.role == NodeRole::Normal)
            .filter_map(|node| node.addr.map(|addr| (node.player_id, addr)))
            .collect()
    }

    /// Every reachable node except the local one.
    pub(crate) fn peers(&self) -> Vec<(i32, SocketAddr)> {
        self.nodes
            .values()
            .filter(|node| node.player_id != self.self_id)
            .filter_map(|node| node.addr.map(|addr| (node.player_id, addr)))
            .collect()
    }

    pub(crate) fn node(&self, player_id: i32) -> Option<&NodeInfo> {
        self.nodes.get(&player_id)
    }

    pub(crate) fn touch(&mut self, player_id: i32) {
        if let Some(node) = self.nodes.get_mut(&player_id) {
            node.touch();
        }
    }

    pub(crate) fn set_role(&mut self, player_id: i32, role: NodeRole) {
        if let Some(node) = self.nodes.get_mut(&player_id) {
            node.role = role;
        }
    }

    pub(crate) fn grant_grace(&mut self, player_id: i32, grace: Duration) {
        if let Some(node) = self.nodes.get_mut(&player_id) {
            node.grant_grace(grace);
        }
    }

    /// Nodes other than the master that have gone quiet for longer than
    /// `threshold`.
    pub(crate) fn expired_followers(&self, threshold: Duration) -> Vec<i32> {
        self.nodes
            .values()
            .filter(|node| !node.is_master() && node.silence() > threshold)
            .map(|node| node.player_id)
            .collect()
    }

    pub(crate) fn exists_player_name(&self, name: &str) -> bool {
        self.game.players.values().any(|player| player.name == name)
    }

    pub(crate) fn exists_node_addr(&self, addr: SocketAddr) -> bool {
        self.nodes.values().any(|node| node.addr == Some(addr))
    }

    /// Admits a new participant, assigning the next monotonic id. Non-viewer
    /// roles get a snake; placement failure rejects the whole join.
    pub(crate) fn add_player(
        &mut self,
        player_name: &str,
        role: NodeRole,
        addr: Option<SocketAddr>,
    ) -> Result<i32, PeerError> {
        let player_id = self.next_player_id;
        self.game
            .add_player(player_id, player_name, role != NodeRole::Viewer)?;
        self.nodes
            .insert(player_id, NodeInfo::new(player_id, role, addr));
        self.next_player_id += 1;
        if self.self_id == 0 {
            self.self_id = player_id;
        }
        info!("player \"{player_name}\" joined as {role:?} with id {player_id}");
        Ok(player_id)
    }

    /// Drops a node from the roster; its snake keeps wandering as a zombie.
    pub(crate) fn remove_player(&mut self, player_id: i32) {
        self.nodes.remove(&player_id);
        self.game.remove_player(player_id);
        self.moves.remove(&player_id);
        info!("player {player_id} removed from the roster");
    }

    pub(crate) fn add_move(&mut self, player_id: i32, direction: Direction) {
        self.moves.insert(player_id, direction);
    }

    /// Runs one authoritative simulation step and bumps the state order.
    pub(crate) fn tick(&mut self) -> Vec<i32> {
        let moves = std::mem::take(&mut self.moves);
        let dead = self.game.tick(&moves);
        self.state_order.fetch_add(1, Ordering::SeqCst);
        dead
    }

    /// Roster as it goes on the wire. Our own entry carries no address;
    /// peers reach us at the datagram source.
    fn players_wire(&self) -> Vec<PlayerInfo> {
        self.game
            .players
            .values()
            .map(|player| {
                let node = self.nodes.get(&player.id);
                let addr = if player.id == self.self_id {
                    None
                } else {
                    node.and_then(|n| n.addr)
                };
                PlayerInfo {
                    id: player.id,
                    name: player.name.clone(),
                    role: node.map(|n| n.role).unwrap_or(NodeRole::Viewer),
                    score: player.score,
                    addr,
                }
            })
            .collect()
    }

    pub(crate) fn announcement(&self) -> GameAnnouncement {
        GameAnnouncement {
            game_name: self.game.name.clone(),
            width: self.game.width,
            height: self.game.height,
            food_static: self.game.food_static,
            state_delay_ms: self.state_delay.as_millis() as u64,
            players: self.players_wire(),
        }
    }

    pub(crate) fn state_data(&self) -> GameStateData {
        GameStateData {
            state_order: self.state_order(),
            snakes: self.game.snakes.values().cloned().collect(),
            foods: self.game.foods.clone(),
            players: self.players_wire(),
        }
    }

    /// Overwrites the replicated part of the game with a newer snapshot.
    ///
    /// The roster is reconciled rather than replaced: known nodes keep their
    /// `last_seen` (and any running grace), new nodes start fresh, departed
    /// nodes are dropped. The master's address is taken from the datagram
    /// source; the id source is bumped past every id seen so a later
    /// promotion never reuses one.
    pub(crate) fn install_state(&mut self, state: GameStateData, src: SocketAddr) {
        self.state_order.store(state.state_order, Ordering::SeqCst);
        self.game.snakes = state
            .snakes
            .into_iter()
            .map(|snake| (snake.player_id, snake))
            .collect();
        self.game.foods = state.foods;
        self.game.players = state
            .players
            .iter()
            .map(|p| {
                (
                    p.id,
                    Player {
                        id: p.id,
                        name: p.name.clone(),
                        score: p.score,
                    },
                )
            })
            .collect();

        let mut roster = HashMap::new();
        for p in &state.players {
            let mut node = self
                .nodes
                .remove(&p.id)
                .unwrap_or_else(|| NodeInfo::new(p.id, p.role, p.addr));
            node.role = p.role;
            if p.id != self.self_id {
                if let Some(addr) = p.addr {
                    node.addr = Some(addr);
                }
            }
            if p.id >= self.next_player_id {
                self.next_player_id = p.id + 1;
            }
            roster.insert(p.id, node);
        }
        // The local entry outlives any roster the master publishes.
        if let Some(own) = self.nodes.remove(&self.self_id) {
            roster.entry(self.self_id).or_insert(own);
        }
        self.nodes = roster;

        if self.master().is_none() {
            if let Some(deputy_id) = self.deputy().map(|n| n.player_id) {
                self.set_role(deputy_id, NodeRole::Master);
            }
        }
        if let Some(master_id) = self.master().map(|n| n.player_id) {
            if master_id != self.self_id {
                if let Some(node) = self.nodes.get_mut(&master_id) {
                    node.addr = Some(src);
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            name: self.game.name.clone(),
            width: self.game.width,
            height: self.game.height,
            food_static: self.game.food_static,
            state_delay: self.state_delay,
            state_order: self.state_order(),
            self_id: self.self_id,
            self_role: self.self_role(),
            players: self
                .game
                .players
                .values()
                .map(|player| PlayerView {
                    id: player.id,
                    name: player.name.clone(),
                    score: player.score,
                    role: self
                        .nodes
                        .get(&player.id)
                        .map(|n| n.role)
                        .unwrap_or(NodeRole::Viewer),
                })
                .collect(),
            snakes: self
                .game
                .snakes
                .values()
                .map(|snake| SnakeView {
                    player_id: snake.player_id,
                    cells: snake.cells(self.game.width, self.game.height),
                    direction: snake.head_direction,
                    zombie: snake.zombie,
                })
                .collect(),
            foods: self.game.foods.clone(),
        }
    }
}
