//! Standalone CLI that drives a [`SyncController`] against synthetic
//! per-frame timing, for exercising the leader/follower protocol without a
//! surrounding image pipeline.

use clap::{Parser, ValueEnum};
use log::info;

use braid_frame_sync::{Mode, SyncConfig, SyncController, SyncParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliMode {
    Leader,
    Follower,
}

#[derive(Debug, Parser)]
#[command(name = "sync-demo")]
#[command(about = "Run the frame sync control loop as a leader or follower")]
struct Opt {
    /// Role to play on the shared multicast channel.
    #[arg(long, value_enum)]
    mode: CliMode,

    /// IPv4 multicast group shared by leader and followers.
    #[arg(long)]
    group: Option<String>,

    /// UDP port shared by leader and followers.
    #[arg(long)]
    port: Option<u16>,

    /// Frames between beacons.
    #[arg(long)]
    sync_period: Option<u32>,

    /// Leader-chosen countdown at which `sync_ready` latches.
    #[arg(long)]
    ready_frame: Option<u32>,

    /// Estimator window capacity.
    #[arg(long)]
    line_fitting: Option<u32>,

    /// Synthetic frame rate used to generate timestamps.
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Number of synthetic frames to run before exiting.
    #[arg(long, default_value = "3000")]
    frames: u64,

    /// Path to a TOML config file; CLI flags above override matching keys.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let mut config = match &opt.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(group) = &opt.group {
        config.group = group.clone();
    }
    if let Some(port) = opt.port {
        config.port = port;
    }
    if let Some(sync_period) = opt.sync_period {
        config.sync_period = sync_period;
    }
    if let Some(ready_frame) = opt.ready_frame {
        config.ready_frame = ready_frame;
    }
    if let Some(line_fitting) = opt.line_fitting {
        config.line_fitting = line_fitting;
    }

    info!(
        "sync-demo starting: mode={:?} group={} port={} sync_period={} ready_frame={} line_fitting={}",
        opt.mode, config.group, config.port, config.sync_period, config.ready_frame, config.line_fitting
    );

    let frame_duration_us = (1_000_000.0 / opt.fps).round() as i64;

    let mut controller = SyncController::new(config);
    controller.set_mode(match opt.mode {
        CliMode::Leader => Mode::Leader,
        CliMode::Follower => Mode::Follower,
    });
    controller.set_frame_duration(frame_duration_us);

    let start_wall_clock_us: i64 = 1_000_000;
    let mut last_printed_ready = false;

    for sequence in 0..opt.frames {
        let wall_clock_us = start_wall_clock_us + sequence as i64 * frame_duration_us;
        let sensor_timestamp_ns = sequence * frame_duration_us as u64 * 1000;

        let params = SyncParams {
            wall_clock_us,
            sensor_timestamp_ns,
            sequence,
        };

        if let Some(status) = controller.process(Some(params)) {
            if status.ready != last_printed_ready || status.frame_duration_offset_us != 0 {
                println!(
                    "frame {sequence}: offset_us={} lag_us={} ready={}",
                    status.frame_duration_offset_us, status.sync_lag_us, status.ready
                );
                last_printed_ready = status.ready;
            }
        }

        std::thread::sleep(std::time::Duration::from_micros(
            frame_duration_us.max(0) as u64
        ));
    }

    Ok(())
}
