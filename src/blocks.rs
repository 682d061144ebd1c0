// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Spatial-temporal graph convolution blocks.
//!
//! Each block chains a partition-wise graph convolution with a temporal
//! convolution unit and a residual connection. Parameters are created at
//! zero (norms at identity) and filled in from a checkpoint afterwards, so a
//! partially covered checkpoint still yields a runnable network.

use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, s};

use crate::error::{ActionError, Result};
use crate::ops::{self, NormStats, rank1, rank4};

/// Partition-wise graph convolution.
///
/// A single 1x1 convolution expands the input to `partitions * out_channels`
/// channels; each partition's slice is then propagated over the matching
/// adjacency matrix and the partitions are summed.
#[derive(Debug, Clone)]
pub struct GraphConv {
    weight: Array2<f32>,
    bias: Array1<f32>,
    out_channels: usize,
    partitions: usize,
}

impl GraphConv {
    /// Create a zero-initialized graph convolution.
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, partitions: usize) -> Self {
        Self {
            weight: Array2::zeros((partitions * out_channels, in_channels)),
            bias: Array1::zeros(partitions * out_channels),
            out_channels,
            partitions,
        }
    }

    /// Install the expansion weight, shaped
    /// `(partitions * out_channels, in_channels, 1, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape does not match the layer.
    pub fn set_weight(&mut self, weight: Array4<f32>) -> Result<()> {
        let expected = (self.weight.nrows(), self.weight.ncols(), 1, 1);
        if weight.dim() != expected {
            return Err(ActionError::ShapeError(format!(
                "graph conv weight has shape {:?}, expected {expected:?}",
                weight.dim()
            )));
        }
        self.weight = weight.into_shape_with_order((expected.0, expected.1))?;
        Ok(())
    }

    /// Install the expansion bias.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match the layer.
    pub fn set_bias(&mut self, bias: Array1<f32>) -> Result<()> {
        if bias.len() != self.bias.len() {
            return Err(ActionError::ShapeError(format!(
                "graph conv bias has length {}, expected {}",
                bias.len(),
                self.bias.len()
            )));
        }
        self.bias = bias;
        Ok(())
    }

    /// Run the convolution over an `(n, c, t, v)` feature map with a
    /// `(partitions, v, v)` adjacency stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the input or adjacency shapes do not match.
    pub fn forward(&self, x: &Array4<f32>, adjacency: &Array3<f32>) -> Result<Array4<f32>> {
        let (k_adj, v_adj, w_adj) = adjacency.dim();
        if k_adj != self.partitions || v_adj != w_adj {
            return Err(ActionError::ShapeError(format!(
                "adjacency stack has shape {:?}, expected ({}, v, v)",
                adjacency.dim(),
                self.partitions
            )));
        }
        let (n, _, t, v) = x.dim();
        if v != v_adj {
            return Err(ActionError::ShapeError(format!(
                "input has {v} nodes, adjacency covers {v_adj}"
            )));
        }

        let expanded = ops::pointwise_conv(x, &self.weight, Some(&self.bias))?;
        let co = self.out_channels;
        let mut out = Array4::<f32>::zeros((n, co, t, v));
        for batch in 0..n {
            let mut acc = Array2::<f32>::zeros((co * t, v));
            for k in 0..self.partitions {
                let slice = expanded.slice(s![batch, k * co..(k + 1) * co, .., ..]);
                let slice = slice.to_shape((co * t, v))?;
                acc += &slice.dot(&adjacency.index_axis(Axis(0), k));
            }
            out.index_axis_mut(Axis(0), batch)
                .assign(&acc.into_shape_with_order((co, t, v))?);
        }
        Ok(out)
    }
}

/// Temporal convolution unit: batch norm, ReLU, strided temporal
/// convolution, batch norm. The trained dropout stage is identity at
/// inference time and carries no parameters.
#[derive(Debug, Clone)]
pub struct TemporalUnit {
    norm_in: NormStats,
    conv_weight: Array4<f32>,
    conv_bias: Array1<f32>,
    norm_out: NormStats,
    stride: usize,
}

impl TemporalUnit {
    /// Create a zero-initialized unit over `channels` channels.
    #[must_use]
    pub fn new(channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            norm_in: NormStats::identity(channels),
            conv_weight: Array4::zeros((channels, channels, kernel, 1)),
            conv_bias: Array1::zeros(channels),
            norm_out: NormStats::identity(channels),
            stride,
        }
    }

    /// Run the unit, consuming the input feature map.
    ///
    /// # Errors
    ///
    /// Returns an error if the input channel count does not match.
    pub fn forward(&self, mut x: Array4<f32>) -> Result<Array4<f32>> {
        ops::batch_norm(&mut x, &self.norm_in)?;
        ops::relu(&mut x);
        let mut out = ops::temporal_conv(&x, &self.conv_weight, Some(&self.conv_bias), self.stride)?;
        ops::batch_norm(&mut out, &self.norm_out)?;
        Ok(out)
    }
}

/// Residual connection of a block.
#[derive(Debug, Clone)]
pub enum Residual {
    /// No residual; the block output is the main path alone.
    None,
    /// Pass the input through unchanged.
    Identity,
    /// Project with a strided 1x1 convolution and batch norm to match the
    /// main path's channels and temporal length.
    Projected {
        weight: Array2<f32>,
        bias: Array1<f32>,
        norm: NormStats,
        stride: usize,
    },
}

impl Residual {
    /// Compute the residual branch for the given input, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a projection is configured with mismatched shapes.
    pub fn apply(&self, x: &Array4<f32>) -> Result<Option<Array4<f32>>> {
        match self {
            Self::None => Ok(None),
            Self::Identity => Ok(Some(x.clone())),
            Self::Projected {
                weight,
                bias,
                norm,
                stride,
            } => {
                #[allow(clippy::cast_possible_wrap)]
                let step = *stride as isize;
                let sliced = x.slice(s![.., .., ..;step, ..]).to_owned();
                let mut out = ops::pointwise_conv(&sliced, weight, Some(bias))?;
                ops::batch_norm(&mut out, norm)?;
                Ok(Some(out))
            }
        }
    }
}

/// One spatial-temporal graph convolution block.
#[derive(Debug, Clone)]
pub struct StGcnBlock {
    gcn: GraphConv,
    tcn: TemporalUnit,
    residual: Residual,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

impl StGcnBlock {
    /// Create a zero-initialized block.
    ///
    /// The residual branch is the identity when channel counts and stride
    /// allow it, a projection otherwise, or absent when `residual` is false.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporal kernel size is even or zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        partitions: usize,
        kernel: usize,
        stride: usize,
        residual: bool,
    ) -> Result<Self> {
        if kernel == 0 || kernel % 2 == 0 {
            return Err(ActionError::ConfigError(format!(
                "temporal kernel size must be odd, got {kernel}"
            )));
        }
        if stride == 0 {
            return Err(ActionError::ConfigError(
                "block stride must be positive".to_string(),
            ));
        }
        let residual = if !residual {
            Residual::None
        } else if in_channels == out_channels && stride == 1 {
            Residual::Identity
        } else {
            Residual::Projected {
                weight: Array2::zeros((out_channels, in_channels)),
                bias: Array1::zeros(out_channels),
                norm: NormStats::identity(out_channels),
                stride,
            }
        };
        Ok(Self {
            gcn: GraphConv::new(in_channels, out_channels, partitions),
            tcn: TemporalUnit::new(out_channels, kernel, stride),
            residual,
            in_channels,
            out_channels,
            stride,
        })
    }

    /// Input channel count.
    #[must_use]
    pub const fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Output channel count.
    #[must_use]
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Temporal stride.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Whether the block carries a projected residual with its own
    /// parameters.
    #[must_use]
    pub const fn has_projected_residual(&self) -> bool {
        matches!(self.residual, Residual::Projected { .. })
    }

    /// Run the block over an `(n, c, t, v)` feature map.
    ///
    /// # Errors
    ///
    /// Returns an error if shapes do not match the block configuration.
    pub fn forward(&self, x: &Array4<f32>, adjacency: &Array3<f32>) -> Result<Array4<f32>> {
        let residual = self.residual.apply(x)?;
        let main = self.gcn.forward(x, adjacency)?;
        let mut out = self.tcn.forward(main)?;
        if let Some(res) = residual {
            if res.dim() != out.dim() {
                return Err(ActionError::ShapeError(format!(
                    "residual shape {:?} does not match main path {:?}",
                    res.dim(),
                    out.dim()
                )));
            }
            out += &res;
        }
        ops::relu(&mut out);
        Ok(out)
    }

    /// Install one named parameter, using the block-relative names of the
    /// trained model (`gcn.conv.weight`, `tcn.0.running_mean`,
    /// `residual.1.bias`, ...).
    ///
    /// Returns `Ok(true)` if the parameter was consumed and `Ok(false)` if
    /// the name has no slot in this block, so callers can skip leftovers.
    ///
    /// # Errors
    ///
    /// Returns an error if a known parameter arrives with the wrong shape.
    pub fn load_parameter(&mut self, name: &str, value: ArrayD<f32>) -> Result<bool> {
        match name {
            "gcn.conv.weight" => self.gcn.set_weight(rank4(name, value)?)?,
            "gcn.conv.bias" => self.gcn.set_bias(rank1(name, value)?)?,
            "tcn.0.weight" => self.tcn.norm_in.set_weight(rank1(name, value)?)?,
            "tcn.0.bias" => self.tcn.norm_in.set_bias(rank1(name, value)?)?,
            "tcn.0.running_mean" => self.tcn.norm_in.set_mean(rank1(name, value)?)?,
            "tcn.0.running_var" => self.tcn.norm_in.set_var(rank1(name, value)?)?,
            "tcn.2.weight" => {
                let weight = rank4(name, value)?;
                if weight.dim() != self.tcn.conv_weight.dim() {
                    return Err(ActionError::ShapeError(format!(
                        "temporal conv weight has shape {:?}, expected {:?}",
                        weight.dim(),
                        self.tcn.conv_weight.dim()
                    )));
                }
                self.tcn.conv_weight = weight;
            }
            "tcn.2.bias" => {
                let bias = rank1(name, value)?;
                if bias.len() != self.tcn.conv_bias.len() {
                    return Err(ActionError::ShapeError(format!(
                        "temporal conv bias has length {}, expected {}",
                        bias.len(),
                        self.tcn.conv_bias.len()
                    )));
                }
                self.tcn.conv_bias = bias;
            }
            "tcn.3.weight" => self.tcn.norm_out.set_weight(rank1(name, value)?)?,
            "tcn.3.bias" => self.tcn.norm_out.set_bias(rank1(name, value)?)?,
            "tcn.3.running_mean" => self.tcn.norm_out.set_mean(rank1(name, value)?)?,
            "tcn.3.running_var" => self.tcn.norm_out.set_var(rank1(name, value)?)?,
            "residual.0.weight" | "residual.0.bias" | "residual.1.weight" | "residual.1.bias"
            | "residual.1.running_mean" | "residual.1.running_var" => {
                let Residual::Projected {
                    weight,
                    bias,
                    norm,
                    stride: _,
                } = &mut self.residual
                else {
                    return Ok(false);
                };
                match name {
                    "residual.0.weight" => {
                        let value = rank4(name, value)?;
                        let expected = (weight.nrows(), weight.ncols(), 1, 1);
                        if value.dim() != expected {
                            return Err(ActionError::ShapeError(format!(
                                "residual weight has shape {:?}, expected {expected:?}",
                                value.dim()
                            )));
                        }
                        *weight = value.into_shape_with_order((expected.0, expected.1))?;
                    }
                    "residual.0.bias" => {
                        let value = rank1(name, value)?;
                        if value.len() != bias.len() {
                            return Err(ActionError::ShapeError(format!(
                                "residual bias has length {}, expected {}",
                                value.len(),
                                bias.len()
                            )));
                        }
                        *bias = value;
                    }
                    "residual.1.weight" => norm.set_weight(rank1(name, value)?)?,
                    "residual.1.bias" => norm.set_bias(rank1(name, value)?)?,
                    "residual.1.running_mean" => norm.set_mean(rank1(name, value)?)?,
                    "residual.1.running_var" => norm.set_var(rank1(name, value)?)?,
                    _ => return Ok(false),
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SkeletonGraph;

    fn ramp(n: usize, c: usize, t: usize, v: usize) -> Array4<f32> {
        let len = n * c * t * v;
        Array4::from_shape_vec((n, c, t, v), (0..len).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn test_zero_block_with_identity_residual_passes_input_through() {
        // Zero convolutions and identity norms leave only the residual, so a
        // non-negative input survives the final ReLU unchanged.
        let graph = SkeletonGraph::coco17().unwrap();
        let block = StGcnBlock::new(3, 3, 3, 9, 1, true).unwrap();
        let x = ramp(1, 3, 4, 17);
        let out = block.forward(&x, graph.adjacency()).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn test_block_without_residual_outputs_bias_only() {
        let graph = SkeletonGraph::coco17().unwrap();
        let block = StGcnBlock::new(3, 8, 3, 9, 1, false).unwrap();
        let x = ramp(1, 3, 2, 17);
        let out = block.forward(&x, graph.adjacency()).unwrap();
        assert_eq!(out.dim(), (1, 8, 2, 17));
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_strided_block_halves_time_axis() {
        let graph = SkeletonGraph::coco17().unwrap();
        let block = StGcnBlock::new(4, 8, 3, 9, 2, true).unwrap();
        assert!(block.has_projected_residual());
        let x = ramp(2, 4, 7, 17);
        let out = block.forward(&x, graph.adjacency()).unwrap();
        assert_eq!(out.dim(), (2, 8, 4, 17));
    }

    #[test]
    fn test_even_kernel_rejected() {
        assert!(matches!(
            StGcnBlock::new(3, 3, 3, 8, 1, true),
            Err(ActionError::ConfigError(_))
        ));
        assert!(StGcnBlock::new(3, 3, 3, 0, 1, true).is_err());
    }

    #[test]
    fn test_graph_conv_propagates_over_adjacency() {
        // One partition, identity expansion: the output is x * A.
        let mut gcn = GraphConv::new(1, 1, 1);
        gcn.set_weight(Array4::ones((1, 1, 1, 1))).unwrap();
        let mut adjacency = Array3::<f32>::zeros((1, 2, 2));
        adjacency[[0, 0, 1]] = 1.0;
        adjacency[[0, 1, 0]] = 1.0;

        let mut x = Array4::<f32>::zeros((1, 1, 1, 2));
        x[[0, 0, 0, 0]] = 3.0;
        x[[0, 0, 0, 1]] = 5.0;
        let out = gcn.forward(&x, &adjacency).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 5.0);
        assert_eq!(out[[0, 0, 0, 1]], 3.0);
    }

    #[test]
    fn test_load_parameter_unknown_name_skipped() {
        let mut block = StGcnBlock::new(3, 3, 3, 9, 1, true).unwrap();
        let consumed = block
            .load_parameter("tcn.1.weight", ArrayD::zeros(vec![3]))
            .unwrap();
        assert!(!consumed);
    }

    #[test]
    fn test_load_parameter_residual_slot_missing() {
        // Identity residual carries no parameters; checkpoint leftovers for
        // it are reported as unconsumed rather than an error.
        let mut block = StGcnBlock::new(3, 3, 3, 9, 1, true).unwrap();
        let consumed = block
            .load_parameter("residual.0.weight", ArrayD::zeros(vec![3, 3, 1, 1]))
            .unwrap();
        assert!(!consumed);
    }

    #[test]
    fn test_load_parameter_shape_mismatch_is_fatal() {
        let mut block = StGcnBlock::new(3, 4, 3, 9, 1, true).unwrap();
        let result = block.load_parameter("gcn.conv.weight", ArrayD::zeros(vec![12, 5, 1, 1]));
        assert!(matches!(result, Err(ActionError::ShapeError(_))));
    }

    #[test]
    fn test_load_parameter_fills_gcn() {
        let mut block = StGcnBlock::new(1, 1, 1, 9, 1, false).unwrap();
        block
            .load_parameter("gcn.conv.weight", ArrayD::ones(vec![1, 1, 1, 1]))
            .unwrap();
        block
            .load_parameter("gcn.conv.bias", ArrayD::zeros(vec![1]))
            .unwrap();
        let mut adjacency = Array3::<f32>::zeros((1, 1, 1));
        adjacency[[0, 0, 0]] = 1.0;
        let x = Array4::<f32>::from_elem((1, 1, 1, 1), 2.0);
        let out = block.gcn.forward(&x, &adjacency).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 2.0);
    }
}
