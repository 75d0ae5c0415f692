use clap::Parser;
use log::{debug, info, warn};
use server::client_manager::ClientManager;
use server::tick_runner::{TickHooks, TickRunner};
use shared::cuboid::CuboidData;
use shared::protocol::{self, SuspendedCuboid};
use shared::{BlockType, CuboidAddress, EntityChange, EntityLocation, Environment, WorldConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Main-method of the application.
/// Parses command-line arguments, loads a flat world and drives the tick runner at a fixed rate.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// JSON world configuration; defaults are used when omitted
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Worker threads processing each tick
        #[clap(short, long, default_value = "4")]
        threads: usize,
        /// Overrides the configured tick length in milliseconds
        #[clap(short, long)]
        millis_per_tick: Option<u64>,
        /// Cuboids loaded in each horizontal direction around the origin
        #[clap(short, long, default_value = "2")]
        radius: i16,
        /// Simulated clients walking around the spawn point
        #[clap(short, long, default_value = "0")]
        bots: usize,
        /// Stop after this many ticks; 0 runs until interrupted
        #[clap(short = 'n', long, default_value = "0")]
        ticks: u64,
        /// Log tick statistics every this many ticks
        #[clap(short, long, default_value = "20")]
        stats_every: u64,
        /// Log at debug level unless RUST_LOG says otherwise
        #[clap(short, long)]
        verbose: bool,
    }

    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = match &args.config {
        Some(path) => WorldConfig::from_json_file(path)?,
        None => WorldConfig::default(),
    };
    if let Some(millis) = args.millis_per_tick {
        config.millis_per_tick = millis;
        config.validate()?;
    }
    let millis_per_tick = config.millis_per_tick;

    let mut runner = TickRunner::new(
        args.threads.max(1),
        config.clone(),
        Arc::new(Environment::standard()),
        TickHooks::default(),
    );
    load_flat_world(&runner, args.radius);
    runner.start()?;

    let mut clients = ClientManager::new(args.bots);
    let mut bots = Vec::new();
    for _ in 0..args.bots {
        if let Some(id) = clients.add_client(&runner, config.spawn_location) {
            bots.push(id);
        }
    }
    info!(
        "Serving {} cuboids and {} bots at {} ms per tick",
        (2 * args.radius as usize).pow(2) * 2,
        bots.len(),
        millis_per_tick
    );

    let mut interval_timer = interval(Duration::from_millis(millis_per_tick));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_commit = vec![1i64; bots.len()];

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }

        // Blocks only if the previous tick is still running.
        let snapshot = tokio::task::block_in_place(|| runner.start_next_tick());
        let tick = snapshot.tick_number;

        let mut update_bytes = 0;
        for (index, client_id) in bots.iter().enumerate() {
            if let Some(update) = clients.build_update(*client_id, &snapshot) {
                match protocol::encode(&update) {
                    Ok(bytes) => update_bytes += bytes.len(),
                    Err(e) => warn!("Failed to encode update for client {}: {}", client_id, e),
                }
            }
            let angle = tick as f32 * 0.05 + index as f32;
            let step = 2.0 * millis_per_tick as f32 / 1000.0;
            let change = EntityChange::Move {
                delta: EntityLocation::new(angle.cos() * step, angle.sin() * step, 0.0),
                millis: millis_per_tick,
            };
            if clients.add_change(*client_id, next_commit[index], change) {
                next_commit[index] += 1;
            }
        }
        clients.forward_changes(&runner);

        if args.stats_every > 0 && tick > 0 && tick % args.stats_every == 0 {
            let stats = &snapshot.stats;
            debug!(
                "Tick {}: {:?} total ({:?} crowd, {:?} world), {} changes, {} mutations, {} update bytes",
                tick,
                stats.total_time,
                stats.crowd_time,
                stats.world_time,
                stats.changes_applied,
                stats.mutations_applied,
                update_bytes
            );
        }
        if args.ticks > 0 && tick >= args.ticks {
            info!("Ran {} ticks, stopping", tick);
            break;
        }
    }

    runner.shutdown();
    Ok(())
}

/// Loads a stone floor with open air above it around the origin.
fn load_flat_world(runner: &TickRunner, radius: i16) {
    for x in -radius..radius {
        for y in -radius..radius {
            let ground = CuboidAddress::new(x, y, -1);
            let air = CuboidAddress::new(x, y, 0);
            runner.cuboid_was_loaded(SuspendedCuboid::new(CuboidData::filled(ground, BlockType::STONE)));
            runner.cuboid_was_loaded(SuspendedCuboid::new(CuboidData::filled(air, BlockType::AIR)));
        }
    }
}
