use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use client::config::{SyncConfig, TransportConfig};
use client::event_bus::EventBus;
use client::powerups::PowerupManager;
use client::store::{GameEventChannel, MemoryBackend, PositionStore};
use client::sync::SyncManager;
use client::transport::TransportClient;
use client::world::{HeadlessWorld, RemotePlayers, World};
use log::{info, warn};
use shared::{
    GameEvent, Position, PowerupType, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_RELAY_URL, DEFAULT_THROTTLE_MS,
};
use tokio::time::{interval, MissedTickBehavior};

const TICK: Duration = Duration::from_millis(16);
const WALK_SPEED: f32 = 2.0;
const WALK_RANGE: f32 = 100.0;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Player id; a random one is generated when omitted
    #[arg(long)]
    player_id: Option<String>,

    /// Relay WebSocket URL
    #[arg(short = 'u', long, default_value = DEFAULT_RELAY_URL)]
    url: String,

    /// Do not reconnect when the socket drops
    #[arg(long)]
    no_reconnect: bool,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, default_value_t = DEFAULT_RECONNECT_INTERVAL_MS)]
    reconnect_interval_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,

    /// Outbound movement throttle window in milliseconds
    #[arg(long, default_value_t = DEFAULT_THROTTLE_MS)]
    throttle_ms: u64,

    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    spawn_x: f32,

    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    spawn_y: f32,

    /// Stop after this many ticks instead of waiting for Ctrl+C
    #[arg(long)]
    ticks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let player_id = args
        .player_id
        .unwrap_or_else(|| format!("player-{:04x}", rand::random::<u16>()));

    let transport_config = TransportConfig {
        url: args.url,
        auto_reconnect: !args.no_reconnect,
        reconnect_interval: Duration::from_millis(args.reconnect_interval_ms),
        max_reconnect_attempts: args.max_reconnect_attempts,
    };
    transport_config.validate()?;
    let sync_config = SyncConfig {
        throttle_window: Duration::from_millis(args.throttle_ms),
        ..SyncConfig::default()
    };

    info!("Starting client as {}", player_id);

    let spawn = Position::new(args.spawn_x, args.spawn_y);
    let backend = Arc::new(MemoryBackend::new());
    let bus = EventBus::new();
    let world = Arc::new(HeadlessWorld::new(spawn));

    // Each demo process keeps its own in-memory tables, so other players are
    // only ever seen through their socket frames.
    let remote_players = RemotePlayers::spawn_on_first_move(&bus, &player_id, world.clone());
    let powerups = PowerupManager::new(bus.clone(), player_id.clone(), world.clone());

    let transport = TransportClient::new(transport_config);
    info!(
        "Relay: {} (reconnect: {}, up to {} attempt(s))",
        transport.config().url,
        transport.config().auto_reconnect,
        transport.config().max_reconnect_attempts
    );
    let connection_log = transport.on_connection_change(|connected| {
        if *connected {
            info!("Relay connection is up");
        } else {
            warn!("Relay connection is down");
        }
    });
    transport.connect()?;

    let manager = SyncManager::join(
        bus.clone(),
        player_id.clone(),
        spawn,
        PositionStore::new(backend.clone()),
        GameEventChannel::new(backend.clone()),
        Some(transport.clone()),
        sync_config,
    )
    .await?;
    manager.setup();
    if let Err(e) = manager.emit_existing_positions().await {
        warn!("Could not replay existing players: {}", e);
    }

    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut position = spawn;
    let mut direction = 1.0;
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick += 1;

                position.x += WALK_SPEED * direction;
                if (position.x - spawn.x).abs() >= WALK_RANGE {
                    direction = -direction;
                }
                world.set_local_position(position);
                bus.emit(GameEvent::PlayerMoved {
                    player_id: player_id.clone(),
                    position,
                });

                // Exercise the powerup flow once early in the session.
                if tick == 120 {
                    bus.emit(GameEvent::PowerupCollected {
                        emit_by: player_id.clone(),
                        kind: PowerupType::RickRoll,
                    });
                } else if tick == 180 {
                    powerups.use_powerup();
                }

                if tick % 60 == 0 {
                    info!(
                        "Tick {}: at ({:.1}, {:.1}), {} remote player(s), relay {:?}",
                        tick,
                        position.x,
                        position.y,
                        world.remote_positions().len(),
                        transport.state()
                    );
                }

                if args.ticks.is_some_and(|limit| tick >= limit) {
                    info!("Reached {} ticks", tick);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    manager.shutdown().await;
    powerups.unbind();
    remote_players.unbind();
    connection_log.cancel();
    transport.disconnect();

    info!("Client stopped");
    Ok(())
}
