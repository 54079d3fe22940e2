use crate::align::{AlignError, AlignResult};
use candle_core::Device;
use chrono_tz::Tz;
use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

pub fn get_device(use_cuda: bool) -> Device {
    if use_cuda {
        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA device 0");
                    return device;
                }
                Err(e) => {
                    warn!("Failed to initialize CUDA: {}. Falling back to CPU.", e);
                }
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("--cuda flag set but binary was compiled without the 'cuda' feature. Falling back to CPU.");
        }
    }

    #[cfg(feature = "mkl")]
    info!("Using CPU device with Intel MKL BLAS acceleration");

    #[cfg(not(feature = "mkl"))]
    info!("Using CPU device (tip: compile with --features mkl for faster matrix ops)");

    Device::Cpu
}

pub fn project_root_path() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn project_file_path(file_name: &str) -> std::path::PathBuf {
    project_root_path().join(file_name)
}

/// Model input window length (observations fed to the encoder).
pub const SEQ_LEN: usize = 96;
/// Forecast horizon length (observations predicted past the window).
pub const PRED_LEN: usize = 96;
pub const BATCH_SIZE: usize = 32;
pub const EPOCHS: usize = 10;
pub const LEARNING_RATE: f64 = 1e-4;
pub const WEIGHT_DECAY: f64 = 0.01;
/// Early stopping patience in epochs without validation improvement.
pub const PATIENCE: usize = 10;
/// Kernel width of the moving-average trend extraction in the model.
pub const MOVING_AVG_WINDOW: usize = 25;
/// Emit training progress every N batches.
pub const TRAIN_LOG_INTERVAL_BATCHES: usize = 50;
/// Fraction of windows used for training; the rest validate.
pub const TRAIN_SPLIT: f64 = 0.8;

/// Per-request forecasting configuration. Passed explicitly into training and
/// inference calls so concurrent requests against different models never
/// share process-global state.
#[derive(Clone, Debug)]
pub struct ForecastConfig {
    /// Required model input window length `L`.
    pub seq_len: usize,
    /// Forecast horizon length `H`.
    pub pred_len: usize,
    /// Feature channel count `C` of the series.
    pub channels: usize,
    /// Moving-average kernel width for trend decomposition.
    pub moving_avg: usize,
    /// Timezone the series' calendar features are computed in.
    pub zone: Tz,
}

impl ForecastConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            seq_len: SEQ_LEN,
            pred_len: PRED_LEN,
            channels,
            moving_avg: MOVING_AVG_WINDOW,
            zone: chrono_tz::UTC,
        }
    }

    /// Rejects non-positive dimensions before any computation begins.
    pub fn validate(&self) -> AlignResult<()> {
        if self.seq_len == 0 {
            return Err(AlignError::InvalidConfiguration(
                "seq_len must be >= 1".to_string(),
            ));
        }
        if self.pred_len == 0 {
            return Err(AlignError::InvalidConfiguration(
                "pred_len must be >= 1".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(AlignError::InvalidConfiguration(
                "channels must be >= 1".to_string(),
            ));
        }
        if self.moving_avg < 2 {
            return Err(AlignError::InvalidConfiguration(
                "moving_avg kernel must be >= 2".to_string(),
            ));
        }
        Ok(())
    }
}
