use candle_core::{Device, Tensor};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

/// Width of the calendar encoding produced per timestamp.
pub const TIME_FEATURES: usize = 5;

/// Encodes one timestamp into the fixed-width calendar features the model
/// consumes: minute-of-hour, hour-of-day, day-of-week, day-of-month and
/// day-of-year, each normalized to `[-0.5, 0.5]`.
///
/// This is the single place the series' timezone is applied; alignment math
/// upstream stays in UTC.
pub fn encode_timestamp(ts: DateTime<Utc>, zone: Tz) -> [f32; TIME_FEATURES] {
    let local = ts.with_timezone(&zone);
    [
        local.minute() as f32 / 59.0 - 0.5,
        local.hour() as f32 / 23.0 - 0.5,
        local.weekday().num_days_from_monday() as f32 / 6.0 - 0.5,
        (local.day() - 1) as f32 / 30.0 - 0.5,
        (local.ordinal() - 1) as f32 / 365.0 - 0.5,
    ]
}

/// Encodes a whole timestamp axis, row-major, `len * TIME_FEATURES` values.
pub fn encode_axis(timestamps: &[DateTime<Utc>], zone: Tz) -> Vec<f32> {
    let mut out = Vec::with_capacity(timestamps.len() * TIME_FEATURES);
    for ts in timestamps {
        out.extend_from_slice(&encode_timestamp(*ts, zone));
    }
    out
}

/// Encodes a timestamp axis as a `[1, len, TIME_FEATURES]` tensor, the mark
/// input shape the forward pass expects.
pub fn axis_tensor(
    timestamps: &[DateTime<Utc>],
    zone: Tz,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let flat = encode_axis(timestamps, zone);
    Tensor::from_slice(&flat, (1, timestamps.len(), TIME_FEATURES), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::{Asia::Shanghai, UTC};

    #[test]
    fn test_known_timestamp_encoding() {
        // Monday 2024-01-01 00:00:00 UTC.
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feats = encode_timestamp(ts, UTC);

        assert_eq!(feats[0], -0.5); // minute 0
        assert_eq!(feats[1], -0.5); // hour 0
        assert_eq!(feats[2], -0.5); // Monday
        assert_eq!(feats[3], -0.5); // day 1
        assert_eq!(feats[4], -0.5); // ordinal 1
    }

    #[test]
    fn test_encoding_stays_in_range() {
        let start = Utc.with_ymd_and_hms(2023, 12, 28, 17, 41, 3).unwrap();
        for i in 0..500 {
            let ts = start + chrono::Duration::minutes(i * 97);
            for v in encode_timestamp(ts, UTC) {
                assert!((-0.5..=0.5).contains(&v), "feature {} out of range", v);
            }
        }
    }

    #[test]
    fn test_zone_shifts_hour_component() {
        // 16:00 UTC is midnight in Shanghai (UTC+8).
        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 16, 0, 0).unwrap();
        let utc_feats = encode_timestamp(ts, UTC);
        let cst_feats = encode_timestamp(ts, Shanghai);

        assert_eq!(utc_feats[1], 16.0 / 23.0 - 0.5);
        assert_eq!(cst_feats[1], -0.5);
    }

    #[test]
    fn test_axis_tensor_shape() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap();
        let axis: Vec<_> = (0..12).map(|i| start + chrono::Duration::hours(i)).collect();
        let tensor = axis_tensor(&axis, UTC, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 12, TIME_FEATURES]);
    }
}
