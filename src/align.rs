use candle_core::{Device, Tensor};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Errors raised by the alignment engine. None of these are recovered from
/// locally: a failed alignment is fatal to the current request and must be
/// surfaced to the caller.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("insufficient data: {got} observation(s), need at least {need} ({context})")]
    InsufficientData {
        got: usize,
        need: usize,
        context: &'static str,
    },

    #[error("malformed series: {0}")]
    MalformedSeries(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type AlignResult<T> = Result<T, AlignError>;

/// An ordered multivariate time series: one timestamp plus a fixed-width
/// feature vector per observation.
///
/// Construction validates the invariants the alignment math relies on:
/// non-empty input, monotonically non-decreasing timestamps, and a constant
/// channel width. Raw epoch-millisecond input is converted to `DateTime<Utc>`
/// exactly once, here at the boundary; the carried timezone is only applied
/// later, when timestamps are encoded into model features.
#[derive(Clone, Debug)]
pub struct Series {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<Vec<f64>>,
    channels: usize,
    zone: Tz,
}

impl Series {
    /// Builds a series from raw rows of (epoch milliseconds, feature vector).
    pub fn from_millis(rows: Vec<(i64, Vec<f64>)>, zone: Tz) -> AlignResult<Self> {
        if rows.is_empty() {
            return Err(AlignError::MalformedSeries("empty input".to_string()));
        }

        let channels = rows[0].1.len();
        if channels == 0 {
            return Err(AlignError::MalformedSeries(
                "observations carry no feature channels".to_string(),
            ));
        }

        let mut timestamps = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());

        for (idx, (ts_ms, row)) in rows.into_iter().enumerate() {
            if row.len() != channels {
                return Err(AlignError::MalformedSeries(format!(
                    "inconsistent channel width at row {}: expected {}, got {}",
                    idx,
                    channels,
                    row.len()
                )));
            }

            let ts = DateTime::<Utc>::from_timestamp_millis(ts_ms).ok_or_else(|| {
                AlignError::MalformedSeries(format!(
                    "timestamp {} ms at row {} is out of range",
                    ts_ms, idx
                ))
            })?;

            if let Some(prev) = timestamps.last() {
                if ts < *prev {
                    return Err(AlignError::MalformedSeries(format!(
                        "timestamps not monotonically non-decreasing at row {}",
                        idx
                    )));
                }
            }

            timestamps.push(ts);
            values.push(row);
        }

        Ok(Self {
            timestamps,
            values,
            channels,
            zone,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Mean spacing between consecutive observations, as a single duration.
    ///
    /// The leading (undefined) delta is excluded; the remaining deltas are
    /// averaged in milliseconds and rounded to the nearest millisecond. A
    /// single-observation series has no cadence, and a series whose mean
    /// spacing is not strictly positive is degenerate.
    pub fn cadence(&self) -> AlignResult<Duration> {
        if self.len() < 2 {
            return Err(AlignError::InsufficientData {
                got: self.len(),
                need: 2,
                context: "cadence requires at least two observations",
            });
        }

        let total_ms: i64 = self
            .timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds())
            .sum();
        let mean_ms = (total_ms as f64 / (self.len() - 1) as f64).round() as i64;

        if mean_ms <= 0 {
            return Err(AlignError::MalformedSeries(
                "cadence is not strictly positive (all timestamps coincide)".to_string(),
            ));
        }

        Ok(Duration::milliseconds(mean_ms))
    }
}

/// A fixed-length window ready for model consumption: exactly `required_len`
/// observations at the series' cadence, with a leading batch dimension of 1
/// on the tensor view.
#[derive(Clone, Debug)]
pub struct AlignedWindow {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<Vec<f64>>,
    channels: usize,
    padded: usize,
}

impl AlignedWindow {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Number of leading synthetic observations introduced by padding.
    pub fn padded(&self) -> usize {
        self.padded
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        *self
            .timestamps
            .last()
            .expect("aligned window is never empty")
    }

    /// Materializes the window as a `[1, L, C]` f32 tensor.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        let flat: Vec<f32> = self
            .values
            .iter()
            .flat_map(|row| row.iter().map(|v| *v as f32))
            .collect();
        Tensor::from_slice(&flat, (1, self.len(), self.channels), device)
    }
}

/// Reconciles a series of length `N` with the model's required input length.
///
/// For `N >= L` the most recent `L` observations are kept with their original
/// timestamps. For `N < L` the window is left-padded: the first observation's
/// feature vector is repeated `L - N` times, and `L - N` synthetic timestamps
/// are generated at the series' cadence, ascending, ending exactly one
/// cadence before the first real timestamp. Padding needs a cadence, so a
/// single-observation series that needs padding fails with
/// [`AlignError::InsufficientData`].
pub fn align_window(series: &Series, required_len: usize) -> AlignResult<AlignedWindow> {
    if required_len == 0 {
        return Err(AlignError::InvalidConfiguration(
            "required window length must be >= 1".to_string(),
        ));
    }

    let n = series.len();

    if n < required_len {
        let cadence = series.cadence()?;
        let extra = required_len - n;
        let first_real = series.timestamps()[0];

        let mut timestamps = Vec::with_capacity(required_len);
        for i in 0..extra {
            // extra - i steps back from the first real timestamp; the last
            // synthetic one lands exactly one cadence before it.
            timestamps.push(first_real - cadence * (extra - i) as i32);
        }
        timestamps.extend_from_slice(series.timestamps());

        let mut values = Vec::with_capacity(required_len);
        for _ in 0..extra {
            values.push(series.values()[0].clone());
        }
        values.extend_from_slice(series.values());

        Ok(AlignedWindow {
            timestamps,
            values,
            channels: series.channels(),
            padded: extra,
        })
    } else {
        let start = n - required_len;
        Ok(AlignedWindow {
            timestamps: series.timestamps()[start..].to_vec(),
            values: series.values()[start..].to_vec(),
            channels: series.channels(),
            padded: 0,
        })
    }
}

/// Synthesizes the output timestamp axis: `horizon` timestamps starting one
/// cadence after the last aligned timestamp, uniformly spaced by the cadence.
pub fn build_forecast_horizon(
    aligned_timestamps: &[DateTime<Utc>],
    cadence: Duration,
    horizon: usize,
) -> AlignResult<Vec<DateTime<Utc>>> {
    if horizon == 0 {
        return Err(AlignError::InvalidConfiguration(
            "forecast horizon must be >= 1".to_string(),
        ));
    }
    if cadence <= Duration::zero() {
        return Err(AlignError::MalformedSeries(
            "cadence is not strictly positive".to_string(),
        ));
    }
    let last = *aligned_timestamps.last().ok_or_else(|| {
        AlignError::MalformedSeries("aligned timestamp axis is empty".to_string())
    })?;

    Ok((1..=horizon).map(|i| last + cadence * i as i32).collect())
}
