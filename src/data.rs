use crate::align::{AlignResult, Series};
use crate::config::ForecastConfig;
use crate::timefeatures;
use anyhow::Result;
use chrono_tz::Tz;
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One raw observation as supplied by an ingest source: column 0 is the
/// epoch-millisecond timestamp, the remaining columns are numeric features.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawRecord {
    pub timestamp_ms: i64,
    pub values: Vec<f64>,
}

/// Loads raw records from a JSON file (an array of `RawRecord`).
pub fn load_records(path: &std::path::Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let records: Vec<RawRecord> = serde_json::from_reader(reader)?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Converts raw records into a validated series. This is the single boundary
/// where epoch milliseconds become typed timestamps.
pub fn records_to_series(records: &[RawRecord], zone: Tz) -> AlignResult<Series> {
    let rows = records
        .iter()
        .map(|r| (r.timestamp_ms, r.values.clone()))
        .collect();
    Series::from_millis(rows, zone)
}

/// Generates a synthetic uniformly-sampled series: per-channel sinusoids with
/// a mild trend and Gaussian noise. Used for development runs and tests.
pub fn mock_records(n: usize, channels: usize, step_ms: i64) -> Vec<RawRecord> {
    let mut rng = rand::thread_rng();
    let noise = Normal::new(0.0, 0.1).expect("valid stddev");
    let start_ms: i64 = 1_700_000_000_000;

    (0..n)
        .map(|i| {
            let values = (0..channels)
                .map(|c| {
                    let phase = i as f64 / (24.0 + c as f64 * 8.0);
                    (phase * std::f64::consts::TAU).sin()
                        + i as f64 * 1e-3
                        + noise.sample(&mut rng)
                })
                .collect();
            RawRecord {
                timestamp_ms: start_ms + i as i64 * step_ms,
                values,
            }
        })
        .collect()
}

/// Supervised windows cut from a series: encoder inputs, decoder targets and
/// the calendar-feature marks for both timestamp axes. All rows are flattened
/// row-major, f32, ready for `Tensor::from_slice`.
pub struct TrainingDataset {
    pub inputs: Vec<Vec<f32>>,       // [seq_len * C]
    pub targets: Vec<Vec<f32>>,      // [pred_len * C]
    pub input_marks: Vec<Vec<f32>>,  // [seq_len * TIME_FEATURES]
    pub target_marks: Vec<Vec<f32>>, // [pred_len * TIME_FEATURES]
    pub channels: usize,
}

impl TrainingDataset {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn split(self, train_ratio: f64) -> (Self, Self) {
        let n = self.inputs.len();
        let train_size = (n as f64 * train_ratio) as usize;

        let (train_inputs, val_inputs) = self.inputs.split_at(train_size);
        let (train_targets, val_targets) = self.targets.split_at(train_size);
        let (train_in_marks, val_in_marks) = self.input_marks.split_at(train_size);
        let (train_out_marks, val_out_marks) = self.target_marks.split_at(train_size);

        (
            Self {
                inputs: train_inputs.to_vec(),
                targets: train_targets.to_vec(),
                input_marks: train_in_marks.to_vec(),
                target_marks: train_out_marks.to_vec(),
                channels: self.channels,
            },
            Self {
                inputs: val_inputs.to_vec(),
                targets: val_targets.to_vec(),
                input_marks: val_in_marks.to_vec(),
                target_marks: val_out_marks.to_vec(),
                channels: self.channels,
            },
        )
    }
}

/// Cuts sliding supervised windows out of a series: each window pairs
/// `seq_len` input observations with the `pred_len` observations that follow.
/// Returns an empty dataset when the series is too short to cut one window.
pub fn prepare_training_windows(series: &Series, cfg: &ForecastConfig) -> TrainingDataset {
    let n = series.len();
    let seq_len = cfg.seq_len;
    let pred_len = cfg.pred_len;
    let channels = series.channels();

    if n < seq_len + pred_len {
        return TrainingDataset {
            inputs: Vec::new(),
            targets: Vec::new(),
            input_marks: Vec::new(),
            target_marks: Vec::new(),
            channels,
        };
    }

    let count = n - seq_len - pred_len + 1;
    let zone = series.zone();

    let windows: Vec<_> = (0..count)
        .into_par_iter()
        .map(|j| {
            let input: Vec<f32> = series.values()[j..j + seq_len]
                .iter()
                .flat_map(|row| row.iter().map(|v| *v as f32))
                .collect();
            let target: Vec<f32> = series.values()[j + seq_len..j + seq_len + pred_len]
                .iter()
                .flat_map(|row| row.iter().map(|v| *v as f32))
                .collect();
            let input_mark =
                timefeatures::encode_axis(&series.timestamps()[j..j + seq_len], zone);
            let target_mark = timefeatures::encode_axis(
                &series.timestamps()[j + seq_len..j + seq_len + pred_len],
                zone,
            );
            (input, target, input_mark, target_mark)
        })
        .collect();

    let mut dataset = TrainingDataset {
        inputs: Vec::with_capacity(count),
        targets: Vec::with_capacity(count),
        input_marks: Vec::with_capacity(count),
        target_marks: Vec::with_capacity(count),
        channels,
    };
    for (input, target, input_mark, target_mark) in windows {
        dataset.inputs.push(input);
        dataset.targets.push(target);
        dataset.input_marks.push(input_mark);
        dataset.target_marks.push(target_mark);
    }
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timefeatures::TIME_FEATURES;
    use chrono_tz::UTC;

    #[test]
    fn test_record_json_roundtrip() {
        let records = mock_records(4, 2, 60_000);
        let json = serde_json::to_string(&records).unwrap();
        let parsed: Vec<RawRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0].timestamp_ms, records[0].timestamp_ms);
        assert_eq!(parsed[3].values.len(), 2);
    }

    #[test]
    fn test_mock_records_are_uniformly_stamped() {
        let records = mock_records(10, 3, 60_000);
        for pair in records.windows(2) {
            assert_eq!(pair[1].timestamp_ms - pair[0].timestamp_ms, 60_000);
        }
        let series = records_to_series(&records, UTC).unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.channels(), 3);
    }

    #[test]
    fn test_prepare_training_windows() {
        let records = mock_records(50, 2, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let mut cfg = ForecastConfig::new(2);
        cfg.seq_len = 10;
        cfg.pred_len = 5;

        let dataset = prepare_training_windows(&series, &cfg);
        assert_eq!(dataset.len(), 50 - 10 - 5 + 1);
        assert_eq!(dataset.inputs[0].len(), 10 * 2);
        assert_eq!(dataset.targets[0].len(), 5 * 2);
        assert_eq!(dataset.input_marks[0].len(), 10 * TIME_FEATURES);
        assert_eq!(dataset.target_marks[0].len(), 5 * TIME_FEATURES);

        // First target row is the observation right after the first window.
        assert_eq!(dataset.targets[0][0], series.values()[10][0] as f32);
    }

    #[test]
    fn test_short_series_yields_empty_dataset() {
        let records = mock_records(8, 1, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let mut cfg = ForecastConfig::new(1);
        cfg.seq_len = 10;
        cfg.pred_len = 5;

        let dataset = prepare_training_windows(&series, &cfg);
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_split_ratio() {
        let records = mock_records(60, 1, 60_000);
        let series = records_to_series(&records, UTC).unwrap();
        let mut cfg = ForecastConfig::new(1);
        cfg.seq_len = 10;
        cfg.pred_len = 5;

        let dataset = prepare_training_windows(&series, &cfg);
        let total = dataset.len();
        let (train, val) = dataset.split(0.8);
        assert_eq!(train.len() + val.len(), total);
        assert_eq!(train.len(), (total as f64 * 0.8) as usize);
    }
}
