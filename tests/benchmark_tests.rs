//! Performance benchmarks for critical simulation paths

use client::projection::{IgnoreProjection, SpeculativeProjection};
use server::tick_runner::{TickHooks, TickRunner};
use shared::cuboid::CuboidData;
use shared::protocol::{self, ServerTickUpdate, SuspendedCuboid, SuspendedEntity};
use shared::{
    AbsoluteLocation, BlockAddress, BlockType, CuboidAddress, Entity, EntityChange, EntityLocation, Environment,
    Mutation, WorldConfig,
};
use std::sync::Arc;
use std::time::Instant;

fn quiet_config() -> WorldConfig {
    WorldConfig {
        creature_actions: false,
        ..WorldConfig::default()
    }
}

/// Benchmarks scattered block writes into one cuboid
#[test]
fn benchmark_cuboid_writes() {
    let mut cuboid = CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR);
    let iterations = 20_000u32;
    let start = Instant::now();

    for i in 0..iterations {
        let address = BlockAddress::new((i % 32) as u8, ((i / 32) % 32) as u8, ((i * 7) % 32) as u8);
        let block = if i % 2 == 0 { BlockType::STONE } else { BlockType::DIRT };
        cuboid.set_block_type(address, block);
    }

    let duration = start.elapsed();
    println!(
        "Cuboid writes: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks full ticks with many mutations spread over many cuboids
#[test]
fn benchmark_tick_throughput() {
    let mut runner = TickRunner::new(4, quiet_config(), Arc::new(Environment::standard()), TickHooks::default());
    for x in 0..4 {
        for y in 0..4 {
            runner.cuboid_was_loaded(SuspendedCuboid::new(CuboidData::filled(
                CuboidAddress::new(x, y, 0),
                BlockType::AIR,
            )));
        }
    }
    runner.start().unwrap();
    runner.run_tick();

    let ticks = 20;
    let per_tick = 500;
    let start = Instant::now();

    for tick in 0..ticks {
        for i in 0..per_tick {
            runner.enqueue_mutation(Mutation::ReplaceBlock {
                location: AbsoluteLocation::new((i * 13 + tick) % 128, (i * 7) % 128, tick % 32),
                expected: BlockType::AIR,
                replacement: BlockType::STONE,
            });
        }
        runner.run_tick();
    }

    let duration = start.elapsed();
    let snapshot = runner.snapshot();
    println!(
        "Tick throughput: {} ticks × {} mutations in {:?} ({:.2} ms/tick, last tick {:?})",
        ticks,
        per_tick,
        duration,
        duration.as_millis() as f64 / ticks as f64,
        snapshot.stats.total_time
    );
    runner.shutdown();

    assert!(duration.as_millis() < 20_000);
}

/// Benchmarks encoding and decoding a full-state client update
#[test]
fn benchmark_update_serialization() {
    let mut cuboids = Vec::new();
    for x in 0..4 {
        let mut cuboid = CuboidData::filled(CuboidAddress::new(x, 0, 0), BlockType::AIR);
        for i in 0..32u8 {
            cuboid.set_block_type(BlockAddress::new(i, i, 0), BlockType::STONE);
        }
        cuboids.push(cuboid);
    }
    let update = ServerTickUpdate {
        tick_number: 12345,
        full_state: true,
        loaded_cuboids: cuboids,
        joined_entities: (1..=50)
            .map(|id| Entity::new(id, EntityLocation::new(id as f32, 4.0, 0.0)))
            .collect(),
        latest_local_commit: 77,
        ..ServerTickUpdate::default()
    };

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = protocol::encode(&update).unwrap();
        let _decoded: ServerTickUpdate = protocol::decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Update serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks rebuilding a projection with a long list of unconfirmed changes
#[test]
fn benchmark_projection_rebuild() {
    let mut projection = SpeculativeProjection::new(
        1,
        quiet_config(),
        Arc::new(Environment::standard()),
        Box::new(IgnoreProjection),
    );
    projection.apply_changes_for_server_tick(
        &ServerTickUpdate {
            tick_number: 1,
            full_state: true,
            loaded_cuboids: vec![
                CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR),
                CuboidData::filled(CuboidAddress::new(0, 0, -1), BlockType::STONE),
            ],
            joined_entities: vec![Entity::new(1, EntityLocation::new(16.0, 16.0, 0.0))],
            ..ServerTickUpdate::default()
        },
        0,
    );
    for i in 0..40 {
        let dx = if i % 2 == 0 { 0.2 } else { -0.2 };
        let change = EntityChange::Move {
            delta: EntityLocation::new(dx, 0.0, 0.0),
            millis: 50,
        };
        assert!(projection.apply_local_change(change, i * 50) > 0);
        projection.seal_last_local_change();
    }

    let iterations = 200u64;
    let start = Instant::now();

    for i in 0..iterations {
        let update = ServerTickUpdate {
            tick_number: i + 2,
            ..ServerTickUpdate::default()
        };
        assert_eq!(projection.apply_changes_for_server_tick(&update, 2000 + i * 50), 40);
    }

    let duration = start.elapsed();
    println!(
        "Projection rebuild: 40 changes × {} ticks in {:?} ({:.2} μs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 10_000);
}

/// Stress tests players joining and leaving across many ticks
#[test]
fn stress_test_join_and_leave() {
    let mut runner = TickRunner::new(2, quiet_config(), Arc::new(Environment::standard()), TickHooks::default());
    runner.cuboid_was_loaded(SuspendedCuboid::new(CuboidData::filled(
        CuboidAddress::new(0, 0, 0),
        BlockType::AIR,
    )));
    runner.start().unwrap();
    let start = Instant::now();

    for round in 0..50 {
        for id in 1..=20 {
            let location = EntityLocation::new(id as f32, (round % 20) as f32, 4.0);
            runner.entity_did_join(SuspendedEntity::new(Entity::new(id, location)));
        }
        let joined = runner.run_tick();
        assert_eq!(joined.state.players.len(), 20);
        for id in 1..=20 {
            runner.entity_did_leave(id);
        }
        let left = runner.run_tick();
        assert!(left.state.players.is_empty());
        assert_eq!(left.left_entities.len(), 20);
    }

    let duration = start.elapsed();
    println!("Join and leave: 50 rounds in {:?}", duration);
    runner.shutdown();

    assert!(duration.as_millis() < 10_000);
}
