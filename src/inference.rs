use crate::align::{self, Series};
use crate::checkpoint;
use crate::config::{get_device, ForecastConfig};
use crate::models::dlinear::DLinear;
use crate::timefeatures;
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

/// A completed forecast: one feature row per synthesized output timestamp.
#[derive(Clone, Debug)]
pub struct ForecastOutput {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<Vec<f64>>,
}

impl ForecastOutput {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Runs the alignment pipeline for one inference request and materializes the
/// tensors the forward pass consumes, in order: cadence, window alignment,
/// output axis synthesis, calendar encoding of both axes.
///
/// Returns `(x, x_mark, dec_inp, y_mark, output_timestamps)` where `x` is
/// `[1, L, C]`, the marks are `[1, len, F]` and `dec_inp` is the
/// zero-initialized `[1, H, C]` decoder placeholder.
pub fn prepare_inference_inputs(
    series: &Series,
    cfg: &ForecastConfig,
    device: &Device,
) -> Result<(Tensor, Tensor, Tensor, Tensor, Vec<DateTime<Utc>>)> {
    cfg.validate()?;
    if series.channels() != cfg.channels {
        anyhow::bail!(
            "series has {} feature channels but the model expects {}",
            series.channels(),
            cfg.channels
        );
    }

    let cadence = series.cadence()?;
    let window = align::align_window(series, cfg.seq_len)?;
    let out_timestamps =
        align::build_forecast_horizon(window.timestamps(), cadence, cfg.pred_len)?;

    let zone = series.zone();
    let x = window.to_tensor(device)?;
    let x_mark = timefeatures::axis_tensor(window.timestamps(), zone, device)?;
    let y_mark = timefeatures::axis_tensor(&out_timestamps, zone, device)?;
    let dec_inp = Tensor::zeros((1, cfg.pred_len, cfg.channels), DType::F32, device)?;

    Ok((x, x_mark, dec_inp, y_mark, out_timestamps))
}

/// Forward pass over prepared inputs with an already-loaded forecaster.
pub fn run_inference_with_model(
    series: &Series,
    cfg: &ForecastConfig,
    model: &DLinear,
    device: &Device,
) -> Result<ForecastOutput> {
    let (x, x_mark, dec_inp, y_mark, out_timestamps) =
        prepare_inference_inputs(series, cfg, device)?;

    let output = model.forward(&x, &x_mark, &dec_inp, &y_mark)?;
    let rows = output.squeeze(0)?.to_vec2::<f32>()?;
    let values: Vec<Vec<f64>> = rows
        .into_iter()
        .map(|row| row.into_iter().map(f64::from).collect())
        .collect();

    info!("Inference finished: {} forecast steps", out_timestamps.len());
    Ok(ForecastOutput {
        timestamps: out_timestamps,
        values,
    })
}

/// One complete inference request: load the checkpointed model, align the
/// series, forward, reconstruct the output axis.
pub async fn run_inference(
    series: &Series,
    cfg: &ForecastConfig,
    checkpoint_path: &Path,
    use_cuda: bool,
) -> Result<ForecastOutput> {
    let device = get_device(use_cuda);
    let model = checkpoint::load_model(checkpoint_path, cfg, &device)?;
    run_inference_with_model(series, cfg, &model, &device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignError;
    use crate::data::{mock_records, records_to_series};
    use crate::models::dlinear::{self, DLinear};
    use crate::timefeatures::TIME_FEATURES;
    use candle_nn::VarBuilder;
    use chrono::Duration;
    use chrono_tz::UTC;

    fn zeros_model(cfg: &ForecastConfig, device: &Device) -> DLinear {
        let vb = VarBuilder::zeros(DType::F32, device);
        DLinear::new(
            cfg.seq_len,
            cfg.pred_len,
            cfg.moving_avg,
            vb.pp(dlinear::VAR_PREFIX),
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_inputs_pads_short_minute_series() {
        // 50 one-minute observations against L = H = 96.
        let records = mock_records(50, 3, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let cfg = ForecastConfig::new(3);
        let device = Device::Cpu;

        let (x, x_mark, dec_inp, y_mark, out_ts) =
            prepare_inference_inputs(&series, &cfg, &device).unwrap();

        assert_eq!(x.dims(), &[1, 96, 3]);
        assert_eq!(x_mark.dims(), &[1, 96, TIME_FEATURES]);
        assert_eq!(dec_inp.dims(), &[1, 96, 3]);
        assert_eq!(y_mark.dims(), &[1, 96, TIME_FEATURES]);

        assert_eq!(out_ts.len(), 96);
        assert_eq!(out_ts[0], *series.timestamps().last().unwrap() + Duration::minutes(1));
        for pair in out_ts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::minutes(1));
        }
    }

    #[test]
    fn test_inference_with_untrained_weights() {
        let records = mock_records(200, 2, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let cfg = ForecastConfig::new(2);
        let device = Device::Cpu;
        let model = zeros_model(&cfg, &device);

        let forecast = run_inference_with_model(&series, &cfg, &model, &device).unwrap();
        assert_eq!(forecast.len(), cfg.pred_len);
        for row in &forecast.values {
            assert_eq!(row.len(), 2);
        }
        for pair in forecast.timestamps.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let records = mock_records(200, 2, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let cfg = ForecastConfig::new(5);
        let device = Device::Cpu;

        assert!(prepare_inference_inputs(&series, &cfg, &device).is_err());
    }

    #[test]
    fn test_single_observation_surfaces_insufficient_data() {
        let records = mock_records(1, 3, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let cfg = ForecastConfig::new(3);
        let device = Device::Cpu;

        let err = prepare_inference_inputs(&series, &cfg, &device).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AlignError>(),
            Some(AlignError::InsufficientData { .. })
        ));
    }
}
