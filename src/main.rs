mod align;
mod checkpoint;
mod config;
mod data;
mod inference;
mod models;
mod timefeatures;
mod train;

use align::Series;
use chrono_tz::Tz;
use clap::Parser;
use config::ForecastConfig;
use std::io;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Tempocast: time-series forecasting harness with inference-time window alignment",
    after_help = "EXAMPLES:
    # Train on a JSON series and keep the best checkpoint
    cargo run --release -- --train --data series.json

    # Forecast past the end of a (possibly ragged) series
    cargo run --release -- --infer --data recent.json --timezone Asia/Shanghai

    # Quick smoke run on synthetic data
    cargo run --release -- --train --epochs 2"
)]
struct Args {
    /// Train a model on the input series
    #[arg(long)]
    train: bool,

    /// Run inference: align the series, forecast, reconstruct the output axis
    #[arg(long)]
    infer: bool,

    /// JSON file with raw records (epoch-ms timestamps + feature columns).
    /// A synthetic series is generated when omitted.
    #[arg(long)]
    data: Option<std::path::PathBuf>,

    /// Model identifier; selects the checkpoint file under checkpoints/
    #[arg(long, default_value_t = 1)]
    model_id: u64,

    /// Model input window length L (default: 96)
    #[arg(long)]
    seq_len: Option<usize>,

    /// Forecast horizon length H (default: 96)
    #[arg(long)]
    pred_len: Option<usize>,

    /// Timezone the series' calendar features are computed in (IANA name)
    #[arg(long, default_value = "UTC")]
    timezone: String,

    /// Number of epochs for training. Ignored if --train is not set.
    #[arg(long)]
    epochs: Option<usize>,

    /// Batch size for training. Ignored if --train is not set.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Learning rate for training. Ignored if --train is not set.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Early stopping patience in epochs. Ignored if --train is not set.
    #[arg(long)]
    patience: Option<usize>,

    /// Use CUDA GPU acceleration (requires --features cuda at compile time)
    #[arg(long)]
    cuda: bool,
}

fn load_series(args: &Args, zone: Tz) -> anyhow::Result<Series> {
    let records = match &args.data {
        Some(path) => data::load_records(path)?,
        None => {
            warn!("No --data file given; generating a synthetic minute-sampled series.");
            data::mock_records(500, 3, 60_000)
        }
    };
    let series = data::records_to_series(&records, zone)?;
    info!(
        "Series ready: {} observations, {} channels, zone {}",
        series.len(),
        series.channels(),
        zone
    );
    Ok(series)
}

#[tokio::main]
async fn main() -> io::Result<()> {
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tempocast=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    if args.cuda && !cfg!(feature = "cuda") {
        error!(
            "--cuda was requested, but this binary was compiled without CUDA support. Re-run with: cargo run --release --features cuda -- --cuda"
        );
        return Ok(());
    }

    let zone: Tz = match args.timezone.parse() {
        Ok(zone) => zone,
        Err(e) => {
            error!("Unknown timezone '{}': {}", args.timezone, e);
            return Ok(());
        }
    };

    let series = match load_series(&args, zone) {
        Ok(series) => series,
        Err(e) => {
            error!("Failed to load input series: {}", e);
            return Ok(());
        }
    };

    let mut cfg = ForecastConfig::new(series.channels());
    cfg.zone = zone;
    if let Some(seq_len) = args.seq_len {
        cfg.seq_len = seq_len;
    }
    if let Some(pred_len) = args.pred_len {
        cfg.pred_len = pred_len;
    }
    if let Err(e) = cfg.validate() {
        error!("Invalid configuration: {}", e);
        return Ok(());
    }

    let checkpoint_path = checkpoint::checkpoint_path(args.model_id);

    if args.train {
        match train::train_model(
            &series,
            &cfg,
            &checkpoint_path,
            args.epochs,
            args.batch_size,
            args.learning_rate,
            args.patience,
            args.cuda,
            None,
        )
        .await
        {
            Ok(best) => info!("Training completed successfully. Best val loss: {:.6}", best),
            Err(e) => error!("Training failed: {}", e),
        }
        return Ok(());
    }

    if args.infer {
        match inference::run_inference(&series, &cfg, &checkpoint_path, args.cuda).await {
            Ok(forecast) => {
                info!(
                    "Forecast of {} steps starting at {}",
                    forecast.len(),
                    forecast.timestamps[0].to_rfc3339()
                );
                for (ts, row) in forecast.timestamps.iter().zip(&forecast.values) {
                    let cells: Vec<String> = row.iter().map(|v| format!("{:.6}", v)).collect();
                    println!("{}\t{}", ts.to_rfc3339(), cells.join("\t"));
                }
            }
            Err(e) => error!("Inference failed: {}", e),
        }
        return Ok(());
    }

    error!("Nothing to do: pass --train or --infer (see --help).");
    Ok(())
}
