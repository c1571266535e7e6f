//! carry - Project a shot from launch conditions.
//!
//! Prints the trajectory result as JSON. With `--path` the sampled flight
//! path is printed as well, one `[side, forward, height]` triple per step.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use launch_monitor_core::config::LaunchMonitorConfig;
use launch_monitor_core::trajectory::{TrajectoryCalculator, TrajectoryInput, TIME_STEP};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute carry distance for a golf shot")]
struct Args {
    /// Ball speed in mph.
    #[arg(long)]
    speed: f64,

    /// Vertical launch angle in degrees.
    #[arg(long, allow_negative_numbers = true)]
    launch_angle: f64,

    /// Horizontal launch angle in degrees; positive is right.
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    side_angle: f64,

    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    backspin: f64,

    /// Positive curves right.
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    sidespin: f64,

    #[arg(long, allow_negative_numbers = true)]
    temperature_f: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    elevation_ft: Option<f64>,

    #[arg(long)]
    wind_speed_mph: Option<f64>,

    /// 0 is a tailwind, 90 blows left to right.
    #[arg(long)]
    wind_direction_deg: Option<f64>,

    #[arg(long)]
    humidity_percent: Option<f64>,

    #[arg(long)]
    pressure_inhg: Option<f64>,

    /// Include the full sampled flight path.
    #[arg(long)]
    path: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = LaunchMonitorConfig::load()?;
    let calculator = TrajectoryCalculator::new(cfg.trajectory);

    let input = TrajectoryInput {
        temperature_f: args.temperature_f,
        elevation_ft: args.elevation_ft,
        wind_speed_mph: args.wind_speed_mph,
        wind_direction_deg: args.wind_direction_deg,
        humidity_percent: args.humidity_percent,
        pressure_inhg: args.pressure_inhg,
        ..TrajectoryInput::new(
            args.speed,
            args.launch_angle,
            args.side_angle,
            args.backspin,
            args.sidespin,
        )
    };

    let result = calculator.calculate_carry(&input);
    let output = if args.path {
        json!({
            "result": result,
            "time_step_seconds": TIME_STEP,
            "path": calculator.calculate_full_trajectory(&input),
        })
    } else {
        json!({ "result": result })
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("serialize trajectory")?
    );

    if !result.calculation_successful {
        std::process::exit(1);
    }
    Ok(())
}
