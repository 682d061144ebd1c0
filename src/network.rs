// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! The spatial-temporal graph convolution network.
//!
//! Ten blocks over the skeleton graph, widening 3 -> 64 -> 128 -> 256
//! channels with two stride-2 temporal reductions, followed by global
//! pooling, a per-person average and a linear classification head. Every
//! block gets its own learned edge importance mask multiplied into the
//! shared adjacency stack.
//!
//! Input is a `(batch, channels, time, nodes, persons)` tensor; output is a
//! `(batch, classes)` score matrix. A batch entry with `time == 1` is the
//! deployed single-frame path, but longer clips run through the same code.

use ndarray::{Array1, Array2, Array3, Array4, Array5, ArrayD, Axis, Ix3};

use crate::blocks::StGcnBlock;
use crate::error::{ActionError, Result};
use crate::graph::SkeletonGraph;
use crate::ops::{self, NormStats, rank1, rank4};

/// Input channels per node: x, y and detection confidence.
pub const IN_CHANNELS: usize = 3;

/// Temporal kernel size shared by every block.
pub const TEMPORAL_KERNEL: usize = 9;

/// Channel width after the final block, feeding the classification head.
pub const FEATURE_CHANNELS: usize = 256;

/// Per-block `(in, out, stride, residual)` configuration of the trained
/// architecture.
const BLOCK_TABLE: [(usize, usize, usize, bool); 10] = [
    (IN_CHANNELS, 64, 1, false),
    (64, 64, 1, true),
    (64, 64, 1, true),
    (64, 64, 1, true),
    (64, 128, 2, true),
    (128, 128, 1, true),
    (128, 128, 1, true),
    (128, 256, 2, true),
    (256, 256, 1, true),
    (256, 256, 1, true),
];

/// Summary of a checkpoint application.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Number of parameters written into the network.
    pub loaded: usize,
    /// Checkpoint entries with no matching slot, left untouched.
    pub skipped: Vec<String>,
}

/// Complete recognition network with frozen inference parameters.
///
/// Construction zero-initializes all weights (norms at identity, edge
/// importance at one); [`StGcnNetwork::load_state`] fills them in from a
/// checkpoint. Parameters the checkpoint does not mention keep their
/// constructed values, mirroring the non-strict loading of the training
/// framework.
#[derive(Debug, Clone)]
pub struct StGcnNetwork {
    graph: SkeletonGraph,
    data_norm: NormStats,
    blocks: Vec<StGcnBlock>,
    edge_importance: Vec<Array3<f32>>,
    head_weight: Array2<f32>,
    head_bias: Array1<f32>,
    num_classes: usize,
}

impl StGcnNetwork {
    /// Build a zero-initialized network over the given skeleton graph.
    ///
    /// # Errors
    ///
    /// Returns an error if `num_classes` is zero.
    pub fn new(graph: SkeletonGraph, num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(ActionError::ConfigError(
                "network needs at least one output class".to_string(),
            ));
        }
        let partitions = graph.adjacency().dim().0;
        let nodes = graph.node_count();

        let mut blocks = Vec::with_capacity(BLOCK_TABLE.len());
        for &(c_in, c_out, stride, residual) in &BLOCK_TABLE {
            blocks.push(StGcnBlock::new(
                c_in,
                c_out,
                partitions,
                TEMPORAL_KERNEL,
                stride,
                residual,
            )?);
        }
        let edge_importance = (0..blocks.len())
            .map(|_| Array3::ones((partitions, nodes, nodes)))
            .collect();

        Ok(Self {
            data_norm: NormStats::identity(IN_CHANNELS * nodes),
            graph,
            blocks,
            edge_importance,
            head_weight: Array2::zeros((num_classes, FEATURE_CHANNELS)),
            head_bias: Array1::zeros(num_classes),
            num_classes,
        })
    }

    /// Number of output classes.
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Number of stacked blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The skeleton graph the network runs over.
    #[must_use]
    pub const fn graph(&self) -> &SkeletonGraph {
        &self.graph
    }

    /// Normalize the raw input and collapse batch and person axes.
    ///
    /// The input normalization is node-major: channel statistics are laid
    /// out as `node * channels + channel`, matching the trained model.
    fn normalize(&self, input: &Array5<f32>) -> Result<Array4<f32>> {
        let (n, c, t, v, m) = input.dim();
        if c != IN_CHANNELS {
            return Err(ActionError::ShapeError(format!(
                "input has {c} channels, expected {IN_CHANNELS}"
            )));
        }
        if v != self.graph.node_count() {
            return Err(ActionError::ShapeError(format!(
                "input has {v} nodes, graph has {}",
                self.graph.node_count()
            )));
        }
        if t == 0 || m == 0 {
            return Err(ActionError::ShapeError(format!(
                "time and person axes must be non-empty (time={t}, persons={m})"
            )));
        }

        let permuted = input.view().permuted_axes([0, 4, 3, 1, 2]);
        let mut flat = permuted
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n * m, v * c, t))?;
        ops::batch_norm_flat(&mut flat, &self.data_norm)?;

        let restored = flat.into_shape_with_order((n, m, v, c, t))?;
        let arranged = restored.view().permuted_axes([0, 1, 3, 4, 2]);
        Ok(arranged
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n * m, c, t, v))?)
    }

    /// Run the network over a `(batch, channels, time, nodes, persons)`
    /// tensor, returning raw class scores per batch entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the input shape does not match the network.
    pub fn forward(&self, input: &Array5<f32>) -> Result<Array2<f32>> {
        let (n, _, _, _, m) = input.dim();
        let mut x = self.normalize(input)?;

        for (block, importance) in self.blocks.iter().zip(&self.edge_importance) {
            let adjacency = self.graph.adjacency() * importance;
            x = block.forward(&x, &adjacency)?;
        }

        let pooled = ops::global_avg_pool(&x)?;
        let features = pooled
            .into_shape_with_order((n, m, FEATURE_CHANNELS))?
            .mean_axis(Axis(1))
            .ok_or_else(|| {
                ActionError::ShapeError("no person axis to average over".to_string())
            })?;

        let mut scores = features.dot(&self.head_weight.t());
        scores += &self.head_bias;
        Ok(scores)
    }

    /// Apply checkpoint parameters by their trained names.
    ///
    /// Entries without a matching slot are collected in the report rather
    /// than rejected; a matching entry with the wrong shape is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized parameter has the wrong shape.
    pub fn load_state<I>(&mut self, params: I) -> Result<LoadReport>
    where
        I: IntoIterator<Item = (String, ArrayD<f32>)>,
    {
        let mut report = LoadReport::default();
        for (name, value) in params {
            if self.load_parameter(&name, value)? {
                report.loaded += 1;
            } else {
                report.skipped.push(name);
            }
        }
        Ok(report)
    }

    fn load_parameter(&mut self, name: &str, value: ArrayD<f32>) -> Result<bool> {
        if let Some(rest) = name.strip_prefix("st_gcn_networks.") {
            let Some((index, sub)) = rest.split_once('.') else {
                return Ok(false);
            };
            let Ok(index) = index.parse::<usize>() else {
                return Ok(false);
            };
            let Some(block) = self.blocks.get_mut(index) else {
                return Ok(false);
            };
            return block.load_parameter(sub, value);
        }

        if let Some(index) = name.strip_prefix("edge_importance.") {
            let Ok(index) = index.parse::<usize>() else {
                return Ok(false);
            };
            let Some(slot) = self.edge_importance.get_mut(index) else {
                return Ok(false);
            };
            let value = value.into_dimensionality::<Ix3>().map_err(|e| {
                ActionError::ShapeError(format!("parameter {name} is not rank 3: {e}"))
            })?;
            if value.dim() != slot.dim() {
                return Err(ActionError::ShapeError(format!(
                    "edge importance has shape {:?}, expected {:?}",
                    value.dim(),
                    slot.dim()
                )));
            }
            *slot = value;
            return Ok(true);
        }

        match name {
            "data_bn.weight" => self.data_norm.set_weight(rank1(name, value)?)?,
            "data_bn.bias" => self.data_norm.set_bias(rank1(name, value)?)?,
            "data_bn.running_mean" => self.data_norm.set_mean(rank1(name, value)?)?,
            "data_bn.running_var" => self.data_norm.set_var(rank1(name, value)?)?,
            "fcn.weight" => {
                let weight = rank4(name, value)?;
                let expected = (self.num_classes, FEATURE_CHANNELS, 1, 1);
                if weight.dim() != expected {
                    return Err(ActionError::ShapeError(format!(
                        "head weight has shape {:?}, expected {expected:?}",
                        weight.dim()
                    )));
                }
                self.head_weight =
                    weight.into_shape_with_order((self.num_classes, FEATURE_CHANNELS))?;
            }
            "fcn.bias" => {
                let bias = rank1(name, value)?;
                if bias.len() != self.num_classes {
                    return Err(ActionError::ShapeError(format!(
                        "head bias has length {}, expected {}",
                        bias.len(),
                        self.num_classes
                    )));
                }
                self.head_bias = bias;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(entries: Vec<(&str, ArrayD<f32>)>) -> BTreeMap<String, ArrayD<f32>> {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    #[test]
    fn test_block_table_layout() {
        let network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        assert_eq!(network.block_count(), 10);
        assert_eq!(network.num_classes(), 12);
        assert_eq!(network.blocks[0].in_channels(), IN_CHANNELS);
        assert_eq!(network.blocks[9].out_channels(), FEATURE_CHANNELS);
        assert_eq!(network.blocks[4].stride(), 2);
        assert_eq!(network.blocks[7].stride(), 2);
        assert!(network.blocks[4].has_projected_residual());
        assert!(network.blocks[7].has_projected_residual());
        assert!(!network.blocks[1].has_projected_residual());
    }

    #[test]
    fn test_zero_network_scores_equal_head_bias() {
        let mut network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        let mut bias = Array1::<f32>::zeros(12);
        bias[7] = 1.0;
        network
            .load_state(params(vec![("fcn.bias", bias.into_dyn())]))
            .unwrap();

        let input = Array5::<f32>::zeros((2, 3, 4, 17, 3));
        let scores = network.forward(&input).unwrap();
        assert_eq!(scores.dim(), (2, 12));
        for row in scores.rows() {
            assert_eq!(row[7], 1.0);
            assert_eq!(row.iter().filter(|v| **v == 0.0).count(), 11);
        }
    }

    #[test]
    fn test_forward_rejects_bad_shapes() {
        let network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        assert!(network.forward(&Array5::zeros((1, 2, 4, 17, 1))).is_err());
        assert!(network.forward(&Array5::zeros((1, 3, 4, 16, 1))).is_err());
        assert!(network.forward(&Array5::zeros((1, 3, 0, 17, 1))).is_err());
        assert!(network.forward(&Array5::zeros((1, 3, 4, 17, 0))).is_err());
    }

    #[test]
    fn test_zero_classes_rejected() {
        assert!(matches!(
            StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 0),
            Err(ActionError::ConfigError(_))
        ));
    }

    #[test]
    fn test_normalization_is_node_major() {
        let graph = SkeletonGraph::build(2, &[(0, 0), (1, 1)], &[(0, 1)], 0, &[]).unwrap();
        let mut network = StGcnNetwork::new(graph, 4).unwrap();
        // Feature index is node * channels + channel, so doubling feature 3
        // must hit node 1, channel 0.
        let mut weight = Array1::<f32>::ones(6);
        weight[3] = 2.0;
        network
            .load_state(params(vec![("data_bn.weight", weight.into_dyn())]))
            .unwrap();

        let mut input = Array5::<f32>::zeros((1, 3, 1, 2, 1));
        for c in 0..3 {
            for v in 0..2 {
                input[[0, c, 0, v, 0]] = (c * 10 + v) as f32;
            }
        }
        let normalized = network.normalize(&input).unwrap();
        assert_eq!(normalized.dim(), (1, 3, 1, 2));
        assert!((normalized[[0, 0, 0, 1]] - 2.0).abs() < 1e-5);
        assert!((normalized[[0, 0, 0, 0]] - 0.0).abs() < 1e-5);
        assert!((normalized[[0, 1, 0, 1]] - 11.0).abs() < 1e-4);
        assert!((normalized[[0, 2, 0, 0]] - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_load_state_skips_unknown_names() {
        let mut network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        let report = network
            .load_state(params(vec![
                ("fcn.bias", Array1::<f32>::zeros(12).into_dyn()),
                ("data_bn.num_batches_tracked", ArrayD::zeros(vec![1])),
                ("st_gcn_networks.12.gcn.conv.bias", ArrayD::zeros(vec![192])),
            ]))
            .unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(
            report
                .skipped
                .contains(&"data_bn.num_batches_tracked".to_string())
        );
    }

    #[test]
    fn test_load_state_dispatches_to_blocks() {
        let mut network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        let report = network
            .load_state(params(vec![(
                "st_gcn_networks.0.gcn.conv.bias",
                ArrayD::zeros(vec![192]),
            )]))
            .unwrap();
        assert_eq!(report.loaded, 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_load_state_shape_mismatch_is_fatal() {
        let mut network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        let result = network.load_state(params(vec![(
            "fcn.weight",
            ArrayD::zeros(vec![12, 128, 1, 1]),
        )]));
        assert!(matches!(result, Err(ActionError::ShapeError(_))));

        let result = network.load_state(params(vec![(
            "edge_importance.0",
            ArrayD::zeros(vec![3, 16, 16]),
        )]));
        assert!(matches!(result, Err(ActionError::ShapeError(_))));
    }

    #[test]
    fn test_edge_importance_accepted() {
        let mut network = StGcnNetwork::new(SkeletonGraph::coco17().unwrap(), 12).unwrap();
        let report = network
            .load_state(params(vec![(
                "edge_importance.3",
                Array3::<f32>::ones((3, 17, 17)).into_dyn(),
            )]))
            .unwrap();
        assert_eq!(report.loaded, 1);
    }
}
