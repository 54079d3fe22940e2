use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Variable prefix the forecaster registers its parameters under.
pub const VAR_PREFIX: &str = "dlinear";

/// Tensor keys a checkpoint must contain for this forecaster.
pub fn tensor_names() -> Vec<String> {
    ["seasonal", "trend"]
        .iter()
        .flat_map(|layer| {
            ["weight", "bias"]
                .iter()
                .map(move |p| format!("{}.{}.{}", VAR_PREFIX, layer, p))
        })
        .collect()
}

/// Decomposition-linear forecaster.
///
/// The input window is split into a moving-average trend and the seasonal
/// remainder; each part is projected from the input length to the horizon by
/// one per-channel linear layer and the two projections are summed. The
/// forward signature carries the calendar-mark and decoder-input tensors of
/// the harness contract even though this architecture does not consume them.
pub struct DLinear {
    seasonal: Linear,
    trend: Linear,
    kernel: usize,
    pred_len: usize,
}

impl DLinear {
    pub fn new(seq_len: usize, pred_len: usize, kernel: usize, vb: VarBuilder) -> Result<Self> {
        let seasonal = candle_nn::linear(seq_len, pred_len, vb.pp("seasonal"))?;
        let trend = candle_nn::linear(seq_len, pred_len, vb.pp("trend"))?;
        Ok(Self {
            seasonal,
            trend,
            kernel,
            pred_len,
        })
    }

    #[allow(dead_code)]
    pub fn pred_len(&self) -> usize {
        self.pred_len
    }

    /// Moving average over the time axis with replicate padding at both ends,
    /// so the trend has the same length as the input.
    fn moving_average(&self, x: &Tensor) -> Result<Tensor> {
        // x: [batch, time, channels]
        let l = x.dim(1)?;
        let front_len = (self.kernel - 1) / 2;
        let back_len = self.kernel - 1 - front_len;

        let mut parts: Vec<Tensor> = Vec::with_capacity(3);
        if front_len > 0 {
            parts.push(x.narrow(1, 0, 1)?.repeat((1, front_len, 1))?);
        }
        parts.push(x.clone());
        if back_len > 0 {
            parts.push(x.narrow(1, l - 1, 1)?.repeat((1, back_len, 1))?);
        }
        let padded = Tensor::cat(&parts, 1)?;

        let mut means = Vec::with_capacity(l);
        for t in 0..l {
            means.push(padded.narrow(1, t, self.kernel)?.mean_keepdim(1)?);
        }
        Tensor::cat(&means, 1)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Aligned input window `[batch, seq_len, channels]`.
    /// * `_x_mark` - Calendar features of the input axis `[batch, seq_len, F]`.
    /// * `_dec_inp` - Zero-initialized decoder input `[batch, pred_len, channels]`.
    /// * `_y_mark` - Calendar features of the output axis `[batch, pred_len, F]`.
    ///
    /// Returns `[batch, pred_len, channels]`.
    pub fn forward(
        &self,
        x: &Tensor,
        _x_mark: &Tensor,
        _dec_inp: &Tensor,
        _y_mark: &Tensor,
    ) -> Result<Tensor> {
        let trend_part = self.moving_average(x)?;
        let seasonal_part = (x - &trend_part)?;

        // Project along the time axis per channel: [B, T, C] -> [B, C, T],
        // linear T -> H, back to [B, H, C].
        let trend_out = self.trend.forward(&trend_part.transpose(1, 2)?)?;
        let seasonal_out = self.seasonal.forward(&seasonal_part.transpose(1, 2)?)?;
        (trend_out + seasonal_out)?.transpose(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn zeros_model(seq_len: usize, pred_len: usize, kernel: usize) -> DLinear {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        DLinear::new(seq_len, pred_len, kernel, vb.pp(VAR_PREFIX)).unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let model = zeros_model(16, 8, 5);
        let device = Device::Cpu;
        let x = Tensor::randn(0.0f32, 1.0f32, (1, 16, 3), &device).unwrap();
        let x_mark = Tensor::zeros((1, 16, 5), DType::F32, &device).unwrap();
        let dec_inp = Tensor::zeros((1, 8, 3), DType::F32, &device).unwrap();
        let y_mark = Tensor::zeros((1, 8, 5), DType::F32, &device).unwrap();

        let out = model.forward(&x, &x_mark, &dec_inp, &y_mark).unwrap();
        assert_eq!(out.dims(), &[1, 8, 3]);
    }

    #[test]
    fn test_moving_average_of_constant_is_constant() {
        let model = zeros_model(12, 4, 5);
        let x = Tensor::full(3.5f32, (1, 12, 2), &Device::Cpu).unwrap();
        let trend = model.moving_average(&x).unwrap();
        assert_eq!(trend.dims(), &[1, 12, 2]);

        let values = trend.to_vec3::<f32>().unwrap();
        for row in &values[0] {
            for v in row {
                assert!((v - 3.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_tensor_names_cover_both_layers() {
        let names = tensor_names();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"dlinear.seasonal.weight".to_string()));
        assert!(names.contains(&"dlinear.trend.bias".to_string()));
    }
}
