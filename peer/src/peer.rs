//! The peer node and its public verbs.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use log::{info, warn};
use shared::{Body, Direction, Message, NodeRole};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::time;

use crate::announcements::{AnnouncementCollector, DiscoveredGame, ANNOUNCEMENT_TTL};
use crate::error::PeerError;
use crate::game_info::{GameInfo, GameSnapshot};
use crate::handler::{run_multicast_listener, run_unicast_listener};
use crate::net::ack_deadline;

/// Shared core of one peer node. The facade, the listeners and every
/// periodic task hold it behind an `Arc`.
pub(crate) struct PeerInner {
    /// Group address announcements and discovery probes are sent to.
    pub(crate) multicast_addr: SocketAddr,
    /// Receive-only group membership socket.
    pub(crate) multicast: UdpSocket,
    /// All outbound traffic and all addressed inbound traffic.
    pub(crate) unicast: UdpSocket,
    pub(crate) unicast_addr: SocketAddr,
    pub(crate) msg_seq: AtomicU64,
    /// Correlator: sequenced requests waiting for their ack or error.
    pub(crate) pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    /// The active game, if any.
    pub(crate) game: RwLock<Option<GameInfo>>,
    /// Cancel channel of the running game task set.
    pub(crate) game_cancel: Mutex<Option<watch::Sender<bool>>>,
    pub(crate) announcements: AnnouncementCollector,
}

impl PeerInner {
    /// Cancels the game tasks and forgets the game. Errors with
    /// `NotInGame` when there is nothing to leave.
    pub(crate) async fn exit_game(&self) -> Result<(), PeerError> {
        {
            let mut guard = self.game.write().await;
            if guard.is_none() {
                return Err(PeerError::NotInGame);
            }
            *guard = None;
        }
        self.cancel_game_tasks().await;
        info!("left the game");
        Ok(())
    }
}

/// A participant of the snake mesh: binds the sockets, collects
/// announcements and exposes the verbs the local control surface drives.
pub struct Peer {
    inner: Arc<PeerInner>,
    shutdown: watch::Sender<bool>,
    listeners: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Peer {
    /// Binds the multicast and unicast sockets and starts the listeners and
    /// the announcement sweeper. Socket setup failures are fatal.
    pub async fn start(multicast_addr: SocketAddr) -> Result<Self, PeerError> {
        let multicast = bind_multicast(multicast_addr)?;
        let unicast = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let unicast_addr = unicast.local_addr()?;
        info!("peer listening on multicast {multicast_addr}");
        info!("peer listening on unicast {unicast_addr}");

        let inner = Arc::new(PeerInner {
            multicast_addr,
            multicast,
            unicast,
            unicast_addr,
            msg_seq: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            game: RwLock::new(None),
            game_cancel: Mutex::new(None),
            announcements: AnnouncementCollector::new(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let listeners = vec![
            tokio::spawn(run_unicast_listener(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(run_multicast_listener(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(sweep_announcements(Arc::clone(&inner), shutdown_rx)),
        ];

        Ok(Self {
            inner,
            shutdown,
            listeners: Mutex::new(listeners),
        })
    }

    /// Local address of the unicast socket, where other peers reach us.
    pub fn unicast_addr(&self) -> SocketAddr {
        self.inner.unicast_addr
    }

    /// Orderly shutdown: game tasks first, then collector and listeners,
    /// joined before returning. The sockets close when the last handler
    /// task releases them.
    pub async fn close(&self) {
        let _ = self.inner.exit_game().await;
        let _ = self.shutdown.send(true);
        for listener in self.listeners.lock().await.drain(..) {
            let _ = listener.await;
        }
        info!("peer shut down");
    }

    /// Hosts a new game and becomes its master with player id 1.
    pub async fn create_game(
        &self,
        game_name: &str,
        width: i32,
        height: i32,
        food_static: i32,
        state_delay_ms: u64,
        player_name: &str,
    ) -> Result<(), PeerError> {
        if self.inner.game.read().await.is_some() {
            return Err(PeerError::AlreadyInGame);
        }
        if self.inner.announcements.contains(game_name).await {
            return Err(PeerError::GameAlreadyExists);
        }

        let mut game = GameInfo::create(game_name, width, height, food_static, state_delay_ms)?;
        game.add_player(player_name, NodeRole::Master, None)?;

        {
            let mut guard = self.inner.game.write().await;
            if guard.is_some() {
                return Err(PeerError::AlreadyInGame);
            }
            *guard = Some(game);
        }
        self.inner.start_master_tasks().await;

        info!("created game \"{game_name}\" ({width}x{height}, {state_delay_ms}ms)");
        Ok(())
    }

    /// Joins an announced game, as a player or a viewer.
    pub async fn join_game(
        &self,
        game_name: &str,
        player_name: &str,
        is_player: bool,
    ) -> Result<(), PeerError> {
        if self.inner.game.read().await.is_some() {
            return Err(PeerError::AlreadyInGame);
        }
        let announcement = self
            .inner
            .announcements
            .find(game_name)
            .await
            .ok_or(PeerError::GameNotFound)?;

        let role = if is_player {
            NodeRole::Normal
        } else {
            NodeRole::Viewer
        };

        let reply = self
            .inner
            .send_join(game_name, player_name, role, announcement.addr)
            .await
            .ok_or(PeerError::MasterNotResponding)?;

        match reply.body {
            Body::Ack => {
                let game = GameInfo::join(&announcement, reply.receiver_id, role, reply.sender_id)?;
                {
                    let mut guard = self.inner.game.write().await;
                    if guard.is_some() {
                        return Err(PeerError::AlreadyInGame);
                    }
                    *guard = Some(game);
                }
                self.inner.start_follower_tasks().await;
                info!(
                    "joined game \"{game_name}\" ({}x{}, {}ms) with id {}",
                    announcement.width,
                    announcement.height,
                    announcement.state_delay_ms,
                    reply.receiver_id
                );
                Ok(())
            }
            Body::Error { message } => Err(PeerError::Rejected(message)),
            _ => Err(PeerError::UnexpectedResponse),
        }
    }

    /// Probes the group for games and returns what the collector currently
    /// holds. Responses to the probe show up on later calls.
    pub async fn discover_games(&self) -> Vec<DiscoveredGame> {
        self.inner.send_discover().await;
        self.inner.announcements.snapshot().await
    }

    /// Queues a direction change for our snake: locally when we are the
    /// master, through a steer request otherwise.
    pub async fn add_move(&self, direction: Direction) -> Result<(), PeerError> {
        let routed = {
            let mut guard = self.inner.game.write().await;
            let Some(game) = guard.as_mut() else {
                return Err(PeerError::NotInGame);
            };
            if game.is_master() {
                let self_id = game.self_id();
                game.add_move(self_id, direction);
                return Ok(());
            }
            game.master().and_then(|master| {
                master
                    .addr
                    .map(|addr| (game.self_id(), master.player_id, addr, game.state_delay()))
            })
        };

        // Without a known master there is nobody to tell; the move is lost.
        let Some((self_id, master_id, addr, delay)) = routed else {
            return Ok(());
        };

        let reply = self
            .inner
            .send_steer(self_id, master_id, direction, ack_deadline(delay), addr)
            .await
            .ok_or(PeerError::MasterNotResponding)?;
        match reply.body {
            Body::Ack => Ok(()),
            Body::Error { message } => Err(PeerError::Rejected(message)),
            _ => Err(PeerError::UnexpectedResponse),
        }
    }

    /// Leaves the current game. A second call reports `NotInGame`.
    pub async fn exit_game(&self) -> Result<(), PeerError> {
        self.inner.exit_game().await
    }

    /// Snapshot of the current game for the control surface.
    pub async fn get_state(&self) -> Result<GameSnapshot, PeerError> {
        let game = self.inner.game.read().await;
        game.as_ref()
            .map(|g| g.snapshot())
            .ok_or(PeerError::NotInGame)
    }
}

/// Periodically evicts stale announcements until shutdown.
async fn sweep_announcements(inner: Arc<PeerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = time::interval_at(
        time::Instant::now() + ANNOUNCEMENT_TTL,
        ANNOUNCEMENT_TTL,
    );
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => inner.announcements.sweep().await,
        }
    }
}

/// Binds the group port with address reuse and joins the multicast group,
/// the way every peer on one LAN segment must to hear each other.
fn bind_multicast(addr: SocketAddr) -> Result<UdpSocket, PeerError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port());
    socket.bind(&bind_addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    if let IpAddr::V4(group) = addr.ip() {
        if group.is_multicast() {
            // Group membership can be unavailable (no multicast route); the
            // port is still bound, so directly addressed datagrams arrive.
            if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                warn!("joining multicast group {group} failed: {e}");
            }
        }
    }
    Ok(socket)
}
