//! TTL cache of remote games seen on the multicast group.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::debug;
use shared::{GameAnnouncement, NodeRole};
use tokio::sync::Mutex;

/// An announcement is dropped after this long without a refresh.
pub(crate) const ANNOUNCEMENT_TTL: Duration = Duration::from_secs(1);

/// A remote game descriptor, keyed by game name in the collector.
#[derive(Debug, Clone)]
pub(crate) struct Announcement {
    /// Where join requests for this game go: the master's address as named
    /// in the announcement, or the datagram source when it names none.
    pub addr: SocketAddr,
    pub game_name: String,
    pub width: i32,
    pub height: i32,
    pub food_static: i32,
    pub state_delay_ms: u64,
    pub player_count: usize,
    pub last_seen: Instant,
}

/// What `DiscoverGames` hands to the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGame {
    pub game_name: String,
    pub width: i32,
    pub height: i32,
    pub state_delay_ms: u64,
    pub player_count: usize,
}

#[derive(Default)]
pub(crate) struct AnnouncementCollector {
    games: Mutex<HashMap<String, Announcement>>,
}

impl AnnouncementCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly heard announcement or refreshes its TTL.
    pub(crate) async fn upsert(&self, announcement: GameAnnouncement, src: SocketAddr) {
        let addr = announcement
            .players
            .iter()
            .find(|p| p.role == NodeRole::Master)
            .and_then(|p| p.addr)
            .unwrap_or(src);
        let mut games = self.games.lock().await;
        let entry = Announcement {
            addr,
            game_name: announcement.game_name.clone(),
            width: announcement.width,
            height: announcement.height,
            food_static: announcement.food_static,
            state_delay_ms: announcement.state_delay_ms,
            player_count: announcement.players.len(),
            last_seen: Instant::now(),
        };
        if games.insert(announcement.game_name.clone(), entry).is_some() {
            debug!("announcement \"{}\" refreshed", announcement.game_name);
        } else {
            debug!("announcement \"{}\" added", announcement.game_name);
        }
    }

    /// Evicts entries that have not been refreshed within the TTL.
    pub(crate) async fn sweep(&self) {
        let mut games = self.games.lock().await;
        games.retain(|name, announcement| {
            let alive = announcement.last_seen.elapsed() <= ANNOUNCEMENT_TTL;
            if !alive {
                debug!("announcement \"{name}\" expired");
            }
            alive
        });
    }

    pub(crate) async fn contains(&self, game_name: &str) -> bool {
        self.games.lock().await.contains_key(game_name)
    }

    pub(crate) async fn find(&self, game_name: &str) -> Option<Announcement> {
        self.games.lock().await.get(game_name).cloned()
    }

    pub(crate) async fn snapshot(&self) -> Vec<DiscoveredGame> {
        self.games
            .lock()
            .await
            .values()
            .map(|a| DiscoveredGame {
                game_name: a.game_name.clone(),
                width: a.width,
                height: a.height,
                state_delay_ms: a.state_delay_ms,
                player_count: a.player_count,
            })
            .collect()
    }
}
