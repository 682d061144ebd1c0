// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Tensor primitives for the action recognition network.
//!
//! Feature maps are `(batch, channels, time, nodes)` arrays. Convolutions are
//! expressed as matrix products per batch entry so the whole forward pass
//! runs on plain `ndarray` without a BLAS backend.

use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix4, s};

use crate::error::{ActionError, Result};

/// Default epsilon for batch normalization.
pub const DEFAULT_EPS: f32 = 1e-5;

/// Coerce a dynamic-rank parameter to a vector.
///
/// # Errors
///
/// Returns an error naming the parameter if the rank is not 1.
pub fn rank1(name: &str, value: ArrayD<f32>) -> Result<Array1<f32>> {
    value
        .into_dimensionality::<Ix1>()
        .map_err(|e| ActionError::ShapeError(format!("parameter {name} is not rank 1: {e}")))
}

/// Coerce a dynamic-rank parameter to a rank-4 tensor.
///
/// # Errors
///
/// Returns an error naming the parameter if the rank is not 4.
pub fn rank4(name: &str, value: ArrayD<f32>) -> Result<Array4<f32>> {
    value
        .into_dimensionality::<Ix4>()
        .map_err(|e| ActionError::ShapeError(format!("parameter {name} is not rank 4: {e}")))
}

/// Frozen batch normalization statistics with per-feature affine.
#[derive(Debug, Clone)]
pub struct NormStats {
    weight: Array1<f32>,
    bias: Array1<f32>,
    mean: Array1<f32>,
    var: Array1<f32>,
    eps: f32,
}

impl NormStats {
    /// Create statistics from trained parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the four parameter vectors differ in length.
    pub fn new(
        weight: Array1<f32>,
        bias: Array1<f32>,
        mean: Array1<f32>,
        var: Array1<f32>,
    ) -> Result<Self> {
        let len = weight.len();
        if bias.len() != len || mean.len() != len || var.len() != len {
            return Err(ActionError::ShapeError(format!(
                "batch norm parameter lengths differ: weight={}, bias={}, mean={}, var={}",
                weight.len(),
                bias.len(),
                mean.len(),
                var.len()
            )));
        }
        Ok(Self {
            weight,
            bias,
            mean,
            var,
            eps: DEFAULT_EPS,
        })
    }

    /// Identity statistics: unit weight and variance, zero bias and mean.
    #[must_use]
    pub fn identity(len: usize) -> Self {
        Self {
            weight: Array1::ones(len),
            bias: Array1::zeros(len),
            mean: Array1::zeros(len),
            var: Array1::ones(len),
            eps: DEFAULT_EPS,
        }
    }

    /// Number of normalized features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weight.len()
    }

    /// Whether the statistics cover zero features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    /// Fold the statistics into a per-feature `(scale, shift)` pair so the
    /// normalization becomes a single fused multiply-add per element.
    fn folded(&self) -> (Array1<f32>, Array1<f32>) {
        let scale = &self.weight / (&self.var + self.eps).mapv(f32::sqrt);
        let shift = &self.bias - &(&self.mean * &scale);
        (scale, shift)
    }

    fn checked(&self, field: &str, value: &Array1<f32>) -> Result<()> {
        if value.len() != self.len() {
            return Err(ActionError::ShapeError(format!(
                "batch norm {field} has length {}, expected {}",
                value.len(),
                self.len()
            )));
        }
        Ok(())
    }

    /// Install a trained affine weight.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match.
    pub fn set_weight(&mut self, value: Array1<f32>) -> Result<()> {
        self.checked("weight", &value)?;
        self.weight = value;
        Ok(())
    }

    /// Install a trained affine bias.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match.
    pub fn set_bias(&mut self, value: Array1<f32>) -> Result<()> {
        self.checked("bias", &value)?;
        self.bias = value;
        Ok(())
    }

    /// Install a trained running mean.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match.
    pub fn set_mean(&mut self, value: Array1<f32>) -> Result<()> {
        self.checked("running mean", &value)?;
        self.mean = value;
        Ok(())
    }

    /// Install a trained running variance.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match.
    pub fn set_var(&mut self, value: Array1<f32>) -> Result<()> {
        self.checked("running variance", &value)?;
        self.var = value;
        Ok(())
    }

    /// Mutable access to the affine weight, for tests and hand-built models.
    pub fn weight_mut(&mut self) -> &mut Array1<f32> {
        &mut self.weight
    }

    /// Mutable access to the affine bias, for tests and hand-built models.
    pub fn bias_mut(&mut self) -> &mut Array1<f32> {
        &mut self.bias
    }
}

/// Apply a 1x1 convolution over the channel axis.
///
/// `weight` is `(out_channels, in_channels)`; the spatial extent of the
/// kernel is implicit. Output shape is `(batch, out_channels, time, nodes)`.
///
/// # Errors
///
/// Returns an error if the weight or bias shapes do not match the input.
pub fn pointwise_conv(
    x: &Array4<f32>,
    weight: &Array2<f32>,
    bias: Option<&Array1<f32>>,
) -> Result<Array4<f32>> {
    let (n, c, t, v) = x.dim();
    let (c_out, c_in) = weight.dim();
    if c_in != c {
        return Err(ActionError::ShapeError(format!(
            "pointwise conv expects {c_in} input channels, got {c}"
        )));
    }
    if let Some(b) = bias
        && b.len() != c_out
    {
        return Err(ActionError::ShapeError(format!(
            "pointwise conv bias has length {}, expected {c_out}",
            b.len()
        )));
    }

    let mut out = Array4::<f32>::zeros((n, c_out, t, v));
    for batch in 0..n {
        let xm = x.index_axis(Axis(0), batch);
        let xm = xm.to_shape((c, t * v))?;
        let mut y = weight.dot(&xm);
        if let Some(b) = bias {
            y += &b.view().insert_axis(Axis(1));
        }
        out.index_axis_mut(Axis(0), batch)
            .assign(&y.into_shape_with_order((c_out, t, v))?);
    }
    Ok(out)
}

/// Apply a temporal convolution with kernel `(k, 1)` and stride `(stride, 1)`.
///
/// The time axis is zero-padded by `k / 2` on both sides, so a stride of 1
/// preserves the input length and a stride of 2 halves it (rounding up).
/// `weight` is `(out_channels, in_channels, k, 1)`.
///
/// # Errors
///
/// Returns an error if the weight shape does not match the input, the stride
/// is zero, or the padded time axis is shorter than the kernel.
pub fn temporal_conv(
    x: &Array4<f32>,
    weight: &Array4<f32>,
    bias: Option<&Array1<f32>>,
    stride: usize,
) -> Result<Array4<f32>> {
    let (n, c, t, v) = x.dim();
    let (c_out, c_in, kernel, kw) = weight.dim();
    if kw != 1 {
        return Err(ActionError::ShapeError(format!(
            "temporal conv kernel must have node extent 1, got {kw}"
        )));
    }
    if c_in != c {
        return Err(ActionError::ShapeError(format!(
            "temporal conv expects {c_in} input channels, got {c}"
        )));
    }
    if stride == 0 {
        return Err(ActionError::ShapeError(
            "temporal conv stride must be positive".to_string(),
        ));
    }
    if let Some(b) = bias
        && b.len() != c_out
    {
        return Err(ActionError::ShapeError(format!(
            "temporal conv bias has length {}, expected {c_out}",
            b.len()
        )));
    }

    let pad = kernel / 2;
    let padded_len = t + 2 * pad;
    if padded_len < kernel {
        return Err(ActionError::ShapeError(format!(
            "time axis of length {t} too short for kernel {kernel}"
        )));
    }
    let t_out = (padded_len - kernel) / stride + 1;

    let mut padded = Array4::<f32>::zeros((n, c, padded_len, v));
    padded.slice_mut(s![.., .., pad..pad + t, ..]).assign(x);

    let mut out = Array4::<f32>::zeros((n, c_out, t_out, v));
    #[allow(clippy::cast_possible_wrap)]
    let step = stride as isize;
    for batch in 0..n {
        let mut acc = Array2::<f32>::zeros((c_out, t_out * v));
        for k in 0..kernel {
            let wk: ArrayView2<f32> = weight.slice(s![.., .., k, 0]);
            let window = padded.slice(s![
                batch,
                ..,
                k..k + (t_out - 1) * stride + 1;step,
                ..
            ]);
            let window = window.as_standard_layout();
            let window = window.to_shape((c, t_out * v))?;
            acc += &wk.dot(&window);
        }
        if let Some(b) = bias {
            acc += &b.view().insert_axis(Axis(1));
        }
        out.index_axis_mut(Axis(0), batch)
            .assign(&acc.into_shape_with_order((c_out, t_out, v))?);
    }
    Ok(out)
}

/// Normalize the channel axis of a feature map in place.
///
/// # Errors
///
/// Returns an error if the statistics do not cover the channel axis.
pub fn batch_norm(x: &mut Array4<f32>, stats: &NormStats) -> Result<()> {
    let channels = x.dim().1;
    if stats.len() != channels {
        return Err(ActionError::ShapeError(format!(
            "batch norm covers {} features, input has {channels} channels",
            stats.len()
        )));
    }
    let (scale, shift) = stats.folded();
    for c in 0..channels {
        let (sc, sh) = (scale[c], shift[c]);
        x.index_axis_mut(Axis(1), c)
            .mapv_inplace(|val| val.mul_add(sc, sh));
    }
    Ok(())
}

/// Normalize axis 1 of a rank-3 array in place, one statistic per feature.
///
/// Used for the input normalization where node and channel are flattened
/// into a single feature axis.
///
/// # Errors
///
/// Returns an error if the statistics do not cover axis 1.
pub fn batch_norm_flat(x: &mut ndarray::Array3<f32>, stats: &NormStats) -> Result<()> {
    let features = x.dim().1;
    if stats.len() != features {
        return Err(ActionError::ShapeError(format!(
            "batch norm covers {} features, input has {features}",
            stats.len()
        )));
    }
    let (scale, shift) = stats.folded();
    for f in 0..features {
        let (sc, sh) = (scale[f], shift[f]);
        x.index_axis_mut(Axis(1), f)
            .mapv_inplace(|val| val.mul_add(sc, sh));
    }
    Ok(())
}

/// Rectified linear unit, applied in place.
pub fn relu(x: &mut Array4<f32>) {
    x.mapv_inplace(|val| val.max(0.0));
}

/// Average over the time and node axes, collapsing `(n, c, t, v)` to `(n, c)`.
///
/// # Errors
///
/// Returns an error if the time or node axis is empty.
pub fn global_avg_pool(x: &Array4<f32>) -> Result<Array2<f32>> {
    let (n, c, t, v) = x.dim();
    if t == 0 || v == 0 {
        return Err(ActionError::ShapeError(format!(
            "cannot pool over empty axes (time={t}, nodes={v})"
        )));
    }
    let mut out = Array2::<f32>::zeros((n, c));
    #[allow(clippy::cast_precision_loss)]
    let norm = 1.0 / (t * v) as f32;
    for batch in 0..n {
        for channel in 0..c {
            let sum: f32 = x.slice(s![batch, channel, .., ..]).sum();
            out[[batch, channel]] = sum * norm;
        }
    }
    Ok(out)
}

/// Numerically stable softmax over a score vector.
#[must_use]
pub fn softmax(scores: ArrayView1<f32>) -> Array1<f32> {
    if scores.is_empty() {
        return Array1::zeros(0);
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = scores.mapv(|val| (val - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, arr1, arr2};

    #[test]
    fn test_pointwise_conv_known_values() {
        let mut x = Array4::<f32>::zeros((1, 2, 1, 2));
        x[[0, 0, 0, 0]] = 1.0;
        x[[0, 0, 0, 1]] = 2.0;
        x[[0, 1, 0, 0]] = 3.0;
        x[[0, 1, 0, 1]] = 4.0;
        let weight = arr2(&[[0.5, 1.0]]);
        let bias = arr1(&[0.25]);

        let out = pointwise_conv(&x, &weight, Some(&bias)).unwrap();
        assert_eq!(out.dim(), (1, 1, 1, 2));
        assert!((out[[0, 0, 0, 0]] - 3.75).abs() < 1e-6);
        assert!((out[[0, 0, 0, 1]] - 5.25).abs() < 1e-6);
    }

    #[test]
    fn test_pointwise_conv_rejects_channel_mismatch() {
        let x = Array4::<f32>::zeros((1, 3, 1, 2));
        let weight = arr2(&[[0.5, 1.0]]);
        assert!(matches!(
            pointwise_conv(&x, &weight, None),
            Err(ActionError::ShapeError(_))
        ));
    }

    #[test]
    fn test_temporal_conv_moving_sum() {
        let mut x = Array4::<f32>::zeros((1, 1, 4, 1));
        for (i, val) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            x[[0, 0, i, 0]] = *val;
        }
        let weight = Array4::<f32>::ones((1, 1, 3, 1));

        let out = temporal_conv(&x, &weight, None, 1).unwrap();
        assert_eq!(out.dim(), (1, 1, 4, 1));
        let got: Vec<f32> = out.iter().copied().collect();
        assert_eq!(got, vec![3.0, 6.0, 9.0, 7.0]);

        let strided = temporal_conv(&x, &weight, None, 2).unwrap();
        assert_eq!(strided.dim(), (1, 1, 2, 1));
        let got: Vec<f32> = strided.iter().copied().collect();
        assert_eq!(got, vec![3.0, 9.0]);
    }

    #[test]
    fn test_temporal_conv_output_length() {
        // Kernel 9 with pad 4: stride 1 preserves, stride 2 halves rounding up.
        let x = Array4::<f32>::zeros((1, 1, 8, 3));
        let weight = Array4::<f32>::zeros((1, 1, 9, 1));
        assert_eq!(temporal_conv(&x, &weight, None, 1).unwrap().dim().2, 8);
        assert_eq!(temporal_conv(&x, &weight, None, 2).unwrap().dim().2, 4);

        let x = Array4::<f32>::zeros((1, 1, 1, 3));
        assert_eq!(temporal_conv(&x, &weight, None, 2).unwrap().dim().2, 1);
    }

    #[test]
    fn test_temporal_conv_rejects_zero_stride() {
        let x = Array4::<f32>::zeros((1, 1, 4, 1));
        let weight = Array4::<f32>::zeros((1, 1, 3, 1));
        assert!(temporal_conv(&x, &weight, None, 0).is_err());
    }

    #[test]
    fn test_batch_norm_identity_is_noop() {
        let mut x = Array4::<f32>::from_elem((1, 2, 2, 2), 1.5);
        let stats = NormStats::identity(2);
        batch_norm(&mut x, &stats).unwrap();
        for val in &x {
            assert!((val - 1.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_batch_norm_known_values() {
        let mut x = Array4::<f32>::from_elem((1, 1, 1, 1), 7.0);
        let stats = NormStats::new(
            arr1(&[2.0]),
            arr1(&[0.5]),
            arr1(&[1.0]),
            arr1(&[3.0]),
        )
        .unwrap();
        batch_norm(&mut x, &stats).unwrap();
        let expected = 2.0 * (7.0 - 1.0) / (3.0f32 + DEFAULT_EPS).sqrt() + 0.5;
        assert!((x[[0, 0, 0, 0]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_batch_norm_rejects_length_mismatch() {
        let mut x = Array4::<f32>::zeros((1, 3, 1, 1));
        let stats = NormStats::identity(2);
        assert!(batch_norm(&mut x, &stats).is_err());
        assert!(NormStats::new(arr1(&[1.0]), arr1(&[0.0, 0.0]), arr1(&[0.0]), arr1(&[1.0])).is_err());
    }

    #[test]
    fn test_batch_norm_flat() {
        let mut x = Array3::<f32>::from_elem((1, 2, 3), 4.0);
        let mut stats = NormStats::identity(2);
        stats.weight_mut()[1] = 2.0;
        batch_norm_flat(&mut x, &stats).unwrap();
        assert!((x[[0, 0, 0]] - 4.0).abs() < 1e-5);
        assert!((x[[0, 1, 0]] - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_relu_clamps_negatives() {
        let mut x = Array4::<f32>::from_elem((1, 1, 1, 2), -3.0);
        x[[0, 0, 0, 1]] = 2.0;
        relu(&mut x);
        assert_eq!(x[[0, 0, 0, 0]], 0.0);
        assert_eq!(x[[0, 0, 0, 1]], 2.0);
    }

    #[test]
    fn test_global_avg_pool() {
        let mut x = Array4::<f32>::zeros((1, 2, 2, 2));
        x.index_axis_mut(Axis(1), 0).fill(2.0);
        x[[0, 1, 0, 0]] = 4.0;
        let pooled = global_avg_pool(&x).unwrap();
        assert_eq!(pooled.dim(), (1, 2));
        assert!((pooled[[0, 0]] - 2.0).abs() < 1e-6);
        assert!((pooled[[0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_global_avg_pool_rejects_empty_axes() {
        let x = Array4::<f32>::zeros((1, 2, 0, 2));
        assert!(global_avg_pool(&x).is_err());
    }

    #[test]
    fn test_softmax_normalizes() {
        let scores = arr1(&[1.0, 2.0, 3.0]);
        let probs = softmax(scores.view());
        let sum: f32 = probs.sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_scores() {
        let scores = arr1(&[1000.0, 999.0]);
        let probs = softmax(scores.view());
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs.sum() - 1.0).abs() < 1e-6);
    }
}
