use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use runtrack::ble::simulated::SimGattCentral;
use runtrack::location::ReplayLocationSource;
use runtrack::summary::{self, RunSummary};
use runtrack::{LocalRunStore, PositionFix, RunStore, SessionController, TrackerConfig};

const SIM_SENSOR_ADDRESS: &str = "A0:9E:1A:00:00:01";
/// Meters per degree of latitude, close enough for a synthetic route.
const METERS_PER_DEGREE: f64 = 111_195.0;

#[derive(Parser)]
#[command(name = "runtrack", version, about = "Record and inspect runs")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run directory, overrides the config file and RUNTRACK_DATA_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List saved runs, newest first
    List,
    /// Show one run with its summary figures
    Show {
        id: String,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a saved run
    Delete { id: String },
    /// Record a run from a synthetic route and heart-rate sensor, then save it
    Simulate {
        /// Number of position fixes to replay
        #[arg(long, default_value_t = 10)]
        points: usize,
        /// Time between fixes in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Running speed in m/s
        #[arg(long, default_value_t = 3.0)]
        speed: f64,
        /// Resting point of the simulated heart rate
        #[arg(long, default_value_t = 135)]
        bpm: u8,
        /// Record without a heart-rate sensor
        #[arg(long)]
        no_sensor: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::from_env(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let store = Arc::new(LocalRunStore::new(&config.data_dir));

    match cli.cmd {
        Commands::List => {
            let runs = store.list().context("listing runs")?;
            if runs.is_empty() {
                println!("No runs in {}", store.base_dir().display());
            }
            for run in runs {
                println!("{}  {}", run.id, summary::list_line(&run));
            }
        }
        Commands::Show { id, json } => {
            let Some(run) = store.get_by_id(&id)? else {
                bail!("run {} not found", id);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_summary(&RunSummary::from_record(&run));
            }
        }
        Commands::Delete { id } => {
            store.delete(&id)?;
            println!("Deleted {}", id);
        }
        Commands::Simulate {
            points,
            interval_ms,
            speed,
            bpm,
            no_sensor,
        } => {
            config.location.interval_ms = interval_ms;
            config.location.min_interval_ms = interval_ms;
            simulate(config, store, points, speed, bpm, no_sensor).await?;
        }
    }
    Ok(())
}

async fn simulate(
    config: TrackerConfig,
    store: Arc<LocalRunStore>,
    points: usize,
    speed: f64,
    base_bpm: u8,
    no_sensor: bool,
) -> anyhow::Result<()> {
    if points == 0 {
        bail!("--points must be at least 1");
    }

    let interval = config.location.interval();
    let step = speed * interval.as_secs_f64() / METERS_PER_DEGREE;
    let route: Vec<PositionFix> = (0..points)
        .map(|i| PositionFix::new(i as f64 * step, 0.0).with_speed(speed))
        .collect();

    let central = SimGattCentral::new();
    let sensor = central.add_sensor(SIM_SENSOR_ADDRESS.parse()?);
    let pulse = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut beat: u8 = 0;
        loop {
            ticker.tick().await;
            sensor.notify_bpm(base_bpm.saturating_add(beat % 8));
            beat = beat.wrapping_add(1);
        }
    });

    let handle = SessionController::new(
        config,
        store.clone(),
        Arc::new(ReplayLocationSource::new(route)),
        central,
    )
    .spawn();

    handle
        .start(Some(if no_sensor { "" } else { SIM_SENSOR_ADDRESS }))
        .await?;
    handle.wait_for(|s| s.running).await?;
    tokio::time::sleep(interval * points as u32 + Duration::from_millis(500)).await;

    let saved = handle.finish_and_wait().await;
    handle.shutdown().await;
    pulse.abort();

    let id = saved.context("saving simulated run")?;
    let run = store
        .get_by_id(&id)?
        .with_context(|| format!("run {} missing after save", id))?;
    println!("{}", RunSummary::from_record(&run).completion_text());
    println!("Saved as {} in {}", id, store.base_dir().display());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} ({})", summary.id, summary.start_time);
    println!("Distance: {:.2} m", summary.distance_m);
    println!("Duration: {}", summary::format_duration(summary.duration_secs));
    if let (Some(avg), Some(max)) = (summary.avg_bpm, summary.max_bpm) {
        println!("Heart rate: avg {:.0} bpm, max {} bpm", avg, max);
    }
    if let (Some(avg), Some(max)) = (summary.avg_speed_kmh, summary.max_speed_kmh) {
        println!("Speed: avg {:.1} km/h, max {:.1} km/h", avg, max);
    }
    if let Some(overall) = summary.overall_speed_kmh {
        println!("Overall: {:.1} km/h", overall);
    }
}
