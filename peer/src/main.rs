//! Headless peer binary: host or join a game from the command line and log
//! a one-line status while it runs.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use log::info;
use peer::Peer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Multicast group address used for discovery
    #[clap(long, default_value = "239.192.0.4")]
    group: String,

    /// Multicast group port
    #[clap(long, default_value = "9192")]
    port: u16,

    /// Host a new game with this name
    #[clap(long, conflicts_with = "join")]
    create: Option<String>,

    /// Join an announced game with this name
    #[clap(long)]
    join: Option<String>,

    /// Player display name
    #[clap(long, default_value = "player")]
    name: String,

    /// Board width (hosting only)
    #[clap(long, default_value = "40")]
    width: i32,

    /// Board height (hosting only)
    #[clap(long, default_value = "30")]
    height: i32,

    /// Amount of food independent of the player count (hosting only)
    #[clap(long, default_value = "3")]
    food: i32,

    /// Tick period in milliseconds (hosting only)
    #[clap(long, default_value = "300")]
    delay: u64,

    /// Join as a spectator instead of a player
    #[clap(long)]
    viewer: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let group: SocketAddr = format!("{}:{}", args.group, args.port).parse()?;

    let peer = Peer::start(group).await?;

    if let Some(game_name) = &args.create {
        peer.create_game(
            game_name,
            args.width,
            args.height,
            args.food,
            args.delay,
            &args.name,
        )
        .await?;
    } else if let Some(game_name) = &args.join {
        // Let a round of announcements arrive before resolving the name.
        peer.discover_games().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let games = peer.discover_games().await;
        info!("discovered {} game(s)", games.len());
        peer.join_game(game_name, &args.name, !args.viewer).await?;
    } else {
        info!("idle peer; use --create or --join to enter a game");
    }

    info!("to quit press Ctrl+C");
    let mut status = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                if let Ok(snapshot) = peer.get_state().await {
                    info!(
                        "game \"{}\": order={} players={} snakes={} as {:?}",
                        snapshot.name,
                        snapshot.state_order,
                        snapshot.players.len(),
                        snapshot.snakes.len(),
                        snapshot.self_role,
                    );
                }
            }
        }
    }

    peer.close().await;
    info!("peer has completed");
    Ok(())
}
