//! Periodic tasks of the role controller.
//!
//! A master runs four loops: announce, tick-and-publish, ping followers and
//! expire silent followers. Everyone else runs two: ping the master and
//! watch for its disappearance, taking over (or leaving) when it does. All
//! loops of one game share a watch channel and stop as soon as it fires or
//! the game is gone.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use shared::NodeRole;
use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::net::ack_deadline;
use crate::peer::PeerInner;

const ANNOUNCE_PERIOD: Duration = Duration::from_secs(1);

fn interval_after(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    // A long tick body (awaited acks) must not cause a burst of catch-up
    // ticks afterwards.
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    interval
}

impl PeerInner {
    /// Replaces the game's cancel channel, stopping any previous task set.
    async fn arm_game_tasks(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        if let Some(old) = self.game_cancel.lock().await.replace(tx) {
            let _ = old.send(true);
        }
        rx
    }

    /// Stops whatever game tasks are running.
    pub(crate) async fn cancel_game_tasks(&self) {
        if let Some(cancel) = self.game_cancel.lock().await.take() {
            let _ = cancel.send(true);
        }
    }

    pub(crate) async fn start_master_tasks(self: &Arc<Self>) {
        let cancel = self.arm_game_tasks().await;
        tokio::spawn(announce_loop(Arc::clone(self), cancel.clone()));
        tokio::spawn(tick_loop(Arc::clone(self), cancel.clone()));
        tokio::spawn(ping_followers_loop(Arc::clone(self), cancel.clone()));
        tokio::spawn(expire_followers_loop(Arc::clone(self), cancel));
    }

    pub(crate) async fn start_follower_tasks(self: &Arc<Self>) {
        let cancel = self.arm_game_tasks().await;
        tokio::spawn(ping_master_loop(Arc::clone(self), cancel.clone()));
        tokio::spawn(watch_master_loop(Arc::clone(self), cancel));
    }

    async fn state_delay(&self) -> Option<Duration> {
        self.game.read().await.as_ref().map(|g| g.state_delay())
    }
}

/// Master: multicast an announcement every second.
async fn announce_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("announce task running");
    let mut interval = interval_after(ANNOUNCE_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                let announcement = {
                    let game = inner.game.read().await;
                    game.as_ref().map(|g| g.announcement())
                };
                match announcement {
                    Some(announcement) => inner.send_announcement(announcement).await,
                    None => break,
                }
            }
        }
    }
    debug!("announce task stopped");
}

/// Master: run the simulation every state delay, publish the result, then
/// handle deaths and deputy upkeep.
async fn tick_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("tick task running");
    let Some(delay) = inner.state_delay().await else {
        return;
    };
    let mut interval = interval_after(delay);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                if !run_tick(&inner).await {
                    break;
                }
            }
        }
    }
    debug!("tick task stopped");
}

/// One master tick: simulate, publish, demote the dead, keep a deputy.
/// Returns false once the game is gone (including our own death).
async fn run_tick(inner: &Arc<PeerInner>) -> bool {
    let (dead, peers, state, self_id, delay) = {
        let mut guard = inner.game.write().await;
        let Some(game) = guard.as_mut() else {
            return false;
        };
        let dead = game.tick();
        (
            dead,
            game.peers(),
            game.state_data(),
            game.self_id(),
            game.state_delay(),
        )
    };
    let deadline = ack_deadline(delay);

    // Publish concurrently; acks refresh liveness through the reply handler.
    for (peer_id, addr) in &peers {
        let inner = Arc::clone(inner);
        let state = state.clone();
        let (peer_id, addr) = (*peer_id, *addr);
        tokio::spawn(async move {
            inner.send_state(self_id, peer_id, state, deadline, addr).await;
        });
    }

    for player_id in dead {
        if player_id == self_id {
            info!("own snake died, leaving the game");
            let _ = inner.exit_game().await;
            return false;
        }
        let addr = {
            let game = inner.game.read().await;
            game.as_ref().and_then(|g| g.node(player_id).and_then(|n| n.addr))
        };
        if let Some(addr) = addr {
            let inner_clone = Arc::clone(inner);
            tokio::spawn(async move {
                inner_clone
                    .send_role_change(self_id, player_id, None, Some(NodeRole::Viewer), deadline, addr)
                    .await;
            });
        }
        if let Some(game) = inner.game.write().await.as_mut() {
            game.set_role(player_id, NodeRole::Viewer);
        }
    }

    // Deputy upkeep: first normal node that acks the appointment gets it.
    let needs_deputy = {
        let game = inner.game.read().await;
        match game.as_ref() {
            Some(game) => game.deputy().is_none(),
            None => return false,
        }
    };
    if needs_deputy {
        let candidates = {
            let game = inner.game.read().await;
            game.as_ref().map(|g| g.normal_peers()).unwrap_or_default()
        };
        for (candidate_id, addr) in candidates {
            let reply = inner
                .send_role_change(self_id, candidate_id, None, Some(NodeRole::Deputy), deadline, addr)
                .await;
            if matches!(reply.map(|m| m.body), Some(shared::Body::Ack)) {
                if let Some(game) = inner.game.write().await.as_mut() {
                    game.set_role(candidate_id, NodeRole::Deputy);
                    info!("player {candidate_id} appointed deputy");
                }
                break;
            }
        }
    }

    true
}

/// Master: ping every follower so they see a live master even between
/// state publications.
async fn ping_followers_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("follower ping task running");
    let Some(delay) = inner.state_delay().await else {
        return;
    };
    let mut interval = interval_after(delay / 5);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                let (self_id, peers) = {
                    let game = inner.game.read().await;
                    match game.as_ref() {
                        Some(game) => (game.self_id(), game.peers()),
                        None => break,
                    }
                };
                for (peer_id, addr) in peers {
                    inner.send_ping(self_id, peer_id, addr).await;
                }
            }
        }
    }
    debug!("follower ping task stopped");
}

/// Master: drop followers that have gone silent.
async fn expire_followers_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("follower expiry task running");
    let Some(delay) = inner.state_delay().await else {
        return;
    };
    let threshold = ack_deadline(delay);
    let mut interval = interval_after(delay / 2);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                let mut guard = inner.game.write().await;
                let Some(game) = guard.as_mut() else { break };
                for player_id in game.expired_followers(threshold) {
                    warn!("player {player_id} timed out");
                    game.remove_player(player_id);
                }
            }
        }
    }
    debug!("follower expiry task stopped");
}

/// Follower: keep the master aware of us.
async fn ping_master_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("master ping task running");
    let Some(delay) = inner.state_delay().await else {
        return;
    };
    let mut interval = interval_after(delay / 5);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                let target = {
                    let game = inner.game.read().await;
                    match game.as_ref() {
                        Some(game) => game
                            .master()
                            .and_then(|m| m.addr.map(|addr| (game.self_id(), m.player_id, addr))),
                        None => break,
                    }
                };
                if let Some((self_id, master_id, addr)) = target {
                    inner.send_ping(self_id, master_id, addr).await;
                }
            }
        }
    }
    debug!("master ping task stopped");
}

/// Follower: detect master loss and fail over to the deputy.
async fn watch_master_loop(inner: Arc<PeerInner>, mut cancel: watch::Receiver<bool>) {
    debug!("master watch task running");
    let Some(delay) = inner.state_delay().await else {
        return;
    };
    let threshold = ack_deadline(delay);
    let grace = delay * 2;
    let mut interval = interval_after(delay / 2);
    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = interval.tick() => {
                match check_master(&inner, threshold, grace).await {
                    MasterCheck::Alive => {}
                    MasterCheck::GameOver => break,
                    MasterCheck::PromotedSelf => break,
                }
            }
        }
    }
    debug!("master watch task stopped");
}

enum MasterCheck {
    Alive,
    GameOver,
    PromotedSelf,
}

/// Applies the failover rules once the master has been silent too long.
async fn check_master(inner: &Arc<PeerInner>, threshold: Duration, grace: Duration) -> MasterCheck {
    let takeover = {
        let mut guard = inner.game.write().await;
        let Some(game) = guard.as_mut() else {
            return MasterCheck::GameOver;
        };
        let Some(master) = game.master() else {
            return MasterCheck::Alive;
        };
        if master.player_id == game.self_id() || master.silence() <= threshold {
            return MasterCheck::Alive;
        }

        let master_id = master.player_id;
        warn!("master {master_id} went silent, starting failover");
        game.remove_player(master_id);

        let Some(deputy_id) = game.deputy().map(|n| n.player_id) else {
            // Nobody to take over: the game dies with its master.
            drop(guard);
            let _ = inner.exit_game().await;
            return MasterCheck::GameOver;
        };

        game.set_role(deputy_id, NodeRole::Master);
        if deputy_id != game.self_id() {
            // Somebody else takes over; give them room to start ticking.
            game.grant_grace(deputy_id, grace);
            info!("recognized player {deputy_id} as the new master");
            return MasterCheck::Alive;
        }

        let peers = game.peers();
        for (peer_id, _) in &peers {
            game.grant_grace(*peer_id, grace);
        }
        (game.self_id(), game.state_delay(), peers)
    };

    // We are the deputy: switch task sets and tell everyone who is master now.
    let (self_id, delay, peers) = takeover;
    info!("promoted to master, taking over the simulation");
    inner.start_master_tasks().await;
    let deadline = ack_deadline(delay);
    for (peer_id, addr) in peers {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            inner
                .send_role_change(self_id, peer_id, Some(NodeRole::Master), None, deadline, addr)
                .await;
        });
    }
    MasterCheck::PromotedSelf
}
