//! Headless streaming demo: flies an observer across the world and reports
//! what the chunk manager loads, meshes and sees each frame.
//!
//! Usage: cargo run --release --bin stream_world -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>    JSON engine config (default: built-in defaults)
//!   --frames <N>       Frames to simulate (default: 600)
//!   --seed <SEED>      Override the terrain seed
//!   --speed <B/F>      Observer speed in blocks per frame (default: 2.0)
//!   --log-every <N>    Print stats every N frames (default: 60)
//!   --jobs <N>         Worker threads for generation and meshing (default: rayon's choice)

use std::time::Instant;

use glam::Vec3;

use voxstream::core::camera::Camera;
use voxstream::core::logging;
use voxstream::core::{EngineConfig, Result};
use voxstream::render::CullingContext;
use voxstream::streaming::ChunkManager;

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let frames = parse_usize_arg(&args, "--frames").unwrap_or(600);
    let speed = parse_f32_arg(&args, "--speed").unwrap_or(2.0);
    let log_every = parse_usize_arg(&args, "--log-every").unwrap_or(60).max(1);

    if let Some(jobs) = parse_usize_arg(&args, "--jobs") {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global() {
            log::warn!("Could not configure thread pool: {}", e);
        }
    }

    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(seed) = parse_u64_arg(&args, "--seed") {
        config.terrain.seed = seed;
    }
    config.validate()?;

    println!("=== voxstream ===");
    println!("Seed:      {}", config.terrain.seed);
    println!("Radius:    load {}, unload {}", config.streaming.load_radius, config.streaming.unload_radius);
    println!("Frames:    {}", frames);
    println!("Speed:     {} blocks/frame", speed);
    println!();

    let mut manager = ChunkManager::from_config(&config)?;
    let start = Instant::now();
    let mut total_visible = 0usize;

    for frame in 0..frames {
        let position = observer_position(frame, speed);
        let frame_start = Instant::now();
        manager.update(position);

        let heading = observer_position(frame + 1, speed) - position;
        let mut camera = Camera::new(position, 70.0, 16.0 / 9.0);
        camera.face(heading - Vec3::Y * heading.length() * 0.3);
        let visible = manager.visible_chunks(&CullingContext::from_camera(&camera));
        total_visible += visible.len();

        if frame % log_every == 0 || frame + 1 == frames {
            let stats = manager.stats();
            log::info!(
                "frame {} at ({:.0}, {:.0}): {} visible, update {:.2}ms",
                frame,
                position.x,
                position.z,
                visible.len(),
                frame_start.elapsed().as_secs_f64() * 1000.0
            );
            match serde_json::to_string(&stats) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("Could not serialize stats: {}", e),
            }
        }
    }

    let elapsed = start.elapsed();
    let stats = manager.stats();
    println!();
    println!("=== Summary ===");
    println!("Frames:         {}", frames);
    println!("Total time:     {:.2}s", elapsed.as_secs_f64());
    println!("Avg frame:      {:.2}ms", elapsed.as_secs_f64() * 1000.0 / frames.max(1) as f64);
    println!("Loaded chunks:  {}", stats.loaded);
    println!("Avg visible:    {:.1}", total_visible as f64 / frames.max(1) as f64);
    println!("Failures:       {} generation, {} meshing", stats.generation_failures, stats.meshing_failures);
    println!("Pool:           {} free / {} allocated", stats.pool_free, stats.pool_allocated);

    Ok(())
}

/// Observer path: a straight run along +X with a slow sideways drift
fn observer_position(frame: usize, speed: f32) -> Vec3 {
    let t = frame as f32 * speed;
    Vec3::new(t, 120.0, (t * 0.01).sin() * 64.0)
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
