use crate::checkpoint;
use crate::config::{
    get_device, ForecastConfig, BATCH_SIZE, EPOCHS, LEARNING_RATE, PATIENCE,
    TRAIN_LOG_INTERVAL_BATCHES, TRAIN_SPLIT, WEIGHT_DECAY,
};
use crate::data::{prepare_training_windows, TrainingDataset};
use crate::models::dlinear::{self, DLinear};
use crate::align::Series;
use crate::timefeatures::TIME_FEATURES;
use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// Progress events for callers that watch a training run.
#[derive(Clone, Debug)]
pub enum TrainMessage {
    Log(String),
    Epoch {
        epoch: usize,
        train_loss: f64,
        val_loss: f64,
    },
}

#[derive(Serialize)]
struct EpochLogEntry {
    epoch: usize,
    train_loss: f64,
    val_loss: f64,
}

#[derive(Serialize)]
struct TrainingRunLog {
    started_at: String,
    finished_at: String,
    use_cuda: bool,
    seq_len: usize,
    pred_len: usize,
    channels: usize,
    epochs_requested: usize,
    epochs_completed: usize,
    batch_size: usize,
    learning_rate: f64,
    patience: usize,
    best_val_loss: f64,
    stop_reason: Option<String>,
    epoch_metrics: Vec<EpochLogEntry>,
}

fn persist_training_log(run_log: &TrainingRunLog) -> Result<std::path::PathBuf> {
    let log_dir = std::path::Path::new("log");
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let file_name = format!(
        "training_{}_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S"),
        std::process::id()
    );
    let file_path = log_dir.join(file_name);

    let file = std::fs::File::create(&file_path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, run_log)?;
    writer.flush()?;

    Ok(file_path)
}

async fn send(tx: &Option<mpsc::Sender<TrainMessage>>, msg: TrainMessage) {
    if let Some(tx) = tx {
        let _ = tx.send(msg).await;
    }
}

/// Trains a forecaster on one series and keeps the best-validation weights at
/// `checkpoint_path`. Returns the best validation loss.
pub async fn train_model(
    series: &Series,
    cfg: &ForecastConfig,
    checkpoint_path: &Path,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    patience: Option<usize>,
    use_cuda: bool,
    tx: Option<mpsc::Sender<TrainMessage>>,
) -> Result<f64> {
    info!("Training mode started...");
    cfg.validate()?;

    info!(
        "Configuration: Epochs={}, Batch Size={}, LR={}",
        epochs.unwrap_or(EPOCHS),
        batch_size.unwrap_or(BATCH_SIZE),
        learning_rate.unwrap_or(LEARNING_RATE)
    );

    let dataset = prepare_training_windows(series, cfg);
    if dataset.is_empty() {
        return Err(anyhow::anyhow!(
            "series too short for training: {} observations, need at least {}",
            series.len(),
            cfg.seq_len + cfg.pred_len
        ));
    }
    let (train_data, val_data) = dataset.split(TRAIN_SPLIT);
    info!(
        "Data ready: {} train / {} val windows",
        train_data.len(),
        val_data.len()
    );

    train_model_with_data(
        train_data,
        val_data,
        cfg,
        checkpoint_path,
        epochs,
        batch_size,
        learning_rate,
        patience,
        use_cuda,
        tx,
    )
    .await
}

/// Core epoch loop over pre-cut windows.
pub async fn train_model_with_data(
    train_data: TrainingDataset,
    val_data: TrainingDataset,
    cfg: &ForecastConfig,
    checkpoint_path: &Path,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    patience: Option<usize>,
    use_cuda: bool,
    tx: Option<mpsc::Sender<TrainMessage>>,
) -> Result<f64> {
    let started_at = Utc::now();
    let device = get_device(use_cuda);
    let epochs = epochs.unwrap_or(EPOCHS);
    let batch_size = batch_size.unwrap_or(BATCH_SIZE);
    let learning_rate = learning_rate.unwrap_or(LEARNING_RATE);
    let patience = patience.unwrap_or(PATIENCE);
    let channels = cfg.channels;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = DLinear::new(
        cfg.seq_len,
        cfg.pred_len,
        cfg.moving_avg,
        vb.pp(dlinear::VAR_PREFIX),
    )?;

    let params = candle_nn::ParamsAdamW {
        lr: learning_rate,
        weight_decay: WEIGHT_DECAY,
        ..Default::default()
    };
    let mut opt = candle_nn::AdamW::new(varmap.all_vars(), params)?;

    let num_train_samples = train_data.len();
    let num_train_batches = num_train_samples / batch_size;
    let num_val_samples = val_data.len();
    let num_val_batches = if num_val_samples > 0 {
        num_val_samples / batch_size
    } else {
        0
    };

    if num_train_batches == 0 {
        return Err(anyhow::anyhow!(
            "not enough training windows ({}) for batch size {}",
            num_train_samples,
            batch_size
        ));
    }

    let mut best_val_loss = f64::INFINITY;
    let mut epochs_without_improvement: usize = 0;
    let mut epoch_metrics: Vec<EpochLogEntry> = Vec::with_capacity(epochs);
    let mut stop_reason: Option<String> = None;

    send(
        &tx,
        TrainMessage::Log(format!(
            "Model initialized. {} train batches, {} val batches per epoch.",
            num_train_batches, num_val_batches
        )),
    )
    .await;

    for epoch in 0..epochs {
        let epoch_start = Instant::now();

        // Halve the learning rate each epoch after the first.
        if epoch > 0 {
            let epoch_lr = learning_rate * 0.5f64.powi(epoch as i32);
            opt.set_learning_rate(epoch_lr);
            send(&tx, TrainMessage::Log(format!("LR adjusted to {:.6e}", epoch_lr))).await;
        }

        let mut total_train_loss = 0.0;
        let mut indices: Vec<usize> = (0..num_train_samples).collect();
        indices.shuffle(&mut rand::thread_rng());

        for batch_idx in 0..num_train_batches {
            let start = batch_idx * batch_size;
            let batch_indices = &indices[start..start + batch_size];

            let (x, x_mark, y, y_mark) =
                stack_batch(&train_data, batch_indices, cfg, &device)?;
            let dec_inp = Tensor::zeros((batch_size, cfg.pred_len, channels), DType::F32, &device)?;

            let outputs = model.forward(&x, &x_mark, &dec_inp, &y_mark)?;
            let loss = candle_nn::loss::mse(&outputs, &y)?;
            opt.backward_step(&loss)?;
            total_train_loss += loss.to_scalar::<f32>()? as f64;

            let batch_no = batch_idx + 1;
            if batch_no % TRAIN_LOG_INTERVAL_BATCHES == 0 || batch_no == num_train_batches {
                info!(
                    "Epoch {}/{} progress: {}/{} batches, elapsed: {:.1}s",
                    epoch + 1,
                    epochs,
                    batch_no,
                    num_train_batches,
                    epoch_start.elapsed().as_secs_f64()
                );
            }
        }

        let avg_train_loss = total_train_loss / num_train_batches as f64;

        let mut total_val_loss = 0.0;
        for batch_idx in 0..num_val_batches {
            let start = batch_idx * batch_size;
            let batch_indices: Vec<usize> = (start..start + batch_size).collect();

            let (x, x_mark, y, y_mark) =
                stack_batch(&val_data, &batch_indices, cfg, &device)?;
            let dec_inp = Tensor::zeros((batch_size, cfg.pred_len, channels), DType::F32, &device)?;

            let outputs = model.forward(&x, &x_mark, &dec_inp, &y_mark)?;
            let loss = candle_nn::loss::mse(&outputs, &y)?;
            total_val_loss += loss.to_scalar::<f32>()? as f64;
        }

        let avg_val_loss = if num_val_batches > 0 {
            total_val_loss / num_val_batches as f64
        } else {
            avg_train_loss
        };

        info!(
            "Epoch {}: cost time: {:.1}s | Train Loss: {:.7} Val Loss: {:.7}",
            epoch + 1,
            epoch_start.elapsed().as_secs_f64(),
            avg_train_loss,
            avg_val_loss
        );
        epoch_metrics.push(EpochLogEntry {
            epoch: epoch + 1,
            train_loss: avg_train_loss,
            val_loss: avg_val_loss,
        });
        send(
            &tx,
            TrainMessage::Epoch {
                epoch: epoch + 1,
                train_loss: avg_train_loss,
                val_loss: avg_val_loss,
            },
        )
        .await;

        if avg_val_loss < best_val_loss {
            best_val_loss = avg_val_loss;
            epochs_without_improvement = 0;
            send(
                &tx,
                TrainMessage::Log(format!(
                    "Epoch {}: new best model, val loss {:.6}. Saving weights...",
                    epoch + 1,
                    best_val_loss
                )),
            )
            .await;
            checkpoint::save_checkpoint(&varmap, checkpoint_path)?;
        } else {
            epochs_without_improvement += 1;
            if epochs_without_improvement >= patience {
                info!(
                    "Early stopping at epoch {}. Best val loss: {:.6}",
                    epoch + 1,
                    best_val_loss
                );
                stop_reason = Some(format!(
                    "early_stopping_after_{}_epochs_without_improvement",
                    patience
                ));
                break;
            }
        }
    }

    info!("Training complete. Best val loss: {:.6}", best_val_loss);
    send(
        &tx,
        TrainMessage::Log(format!("Training complete. Best val loss: {:.6}", best_val_loss)),
    )
    .await;

    let run_log = TrainingRunLog {
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        use_cuda,
        seq_len: cfg.seq_len,
        pred_len: cfg.pred_len,
        channels,
        epochs_requested: epochs,
        epochs_completed: epoch_metrics.len(),
        batch_size,
        learning_rate,
        patience,
        best_val_loss,
        stop_reason,
        epoch_metrics,
    };
    match persist_training_log(&run_log) {
        Ok(path) => info!("Training run log: {}", path.display()),
        Err(e) => tracing::warn!("Failed to persist training run log: {}", e),
    }

    Ok(best_val_loss)
}

/// Stacks selected windows into `(x, x_mark, y, y_mark)` batch tensors.
fn stack_batch(
    data: &TrainingDataset,
    indices: &[usize],
    cfg: &ForecastConfig,
    device: &candle_core::Device,
) -> Result<(Tensor, Tensor, Tensor, Tensor)> {
    let mut xs = Vec::with_capacity(indices.len());
    let mut x_marks = Vec::with_capacity(indices.len());
    let mut ys = Vec::with_capacity(indices.len());
    let mut y_marks = Vec::with_capacity(indices.len());

    for &idx in indices {
        xs.push(Tensor::from_slice(
            &data.inputs[idx],
            (cfg.seq_len, cfg.channels),
            device,
        )?);
        x_marks.push(Tensor::from_slice(
            &data.input_marks[idx],
            (cfg.seq_len, TIME_FEATURES),
            device,
        )?);
        ys.push(Tensor::from_slice(
            &data.targets[idx],
            (cfg.pred_len, cfg.channels),
            device,
        )?);
        y_marks.push(Tensor::from_slice(
            &data.target_marks[idx],
            (cfg.pred_len, TIME_FEATURES),
            device,
        )?);
    }

    Ok((
        Tensor::stack(&xs, 0)?,
        Tensor::stack(&x_marks, 0)?,
        Tensor::stack(&ys, 0)?,
        Tensor::stack(&y_marks, 0)?,
    ))
}
