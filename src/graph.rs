// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Skeleton graph topology.
//!
//! Builds the fixed 3-partition adjacency representation used by every
//! graph-convolution block: partition 0 holds the full edge set (self-loops
//! included), partition 1 the edges touching the center node, partition 2 the
//! edges internal to the torso. All partitions are binary and symmetric.

use ndarray::{Array3, ArrayView2, Axis};

use crate::error::{ActionError, Result};

/// Number of skeleton nodes in the COCO keypoint layout.
pub const COCO_NODE_COUNT: usize = 17;

/// Anatomical connections between COCO keypoints (nose, eyes, ears,
/// shoulders, elbows, wrists, hips, knees, ankles).
pub const COCO_NEIGHBOR_EDGES: [(usize, usize); 16] = [
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (3, 5),
    (4, 6),
    (5, 7),
    (6, 8),
    (5, 11),
    (6, 12),
    (11, 13),
    (12, 14),
    (13, 15),
    (14, 16),
    (5, 6),
    (11, 12),
];

/// Center node of the COCO layout (left eye, standing in for the neck).
pub const COCO_CENTER: usize = 1;

/// Torso nodes of the COCO layout (shoulders, elbows, wrists).
pub const COCO_TORSO: [usize; 6] = [5, 6, 7, 8, 9, 10];

/// One partition of the skeleton edge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// All edges, self-loops included.
    Full,
    /// Edges with at least one endpoint on the center node.
    Center,
    /// Edges with both endpoints inside the torso set.
    Torso,
}

impl Partition {
    /// Number of partitions in the spatial strategy.
    pub const COUNT: usize = 3;

    /// Index of this partition in the adjacency stack.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Full => 0,
            Self::Center => 1,
            Self::Torso => 2,
        }
    }

    /// Partition name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Center => "center",
            Self::Torso => "torso",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable skeleton graph shared by every block of the network.
#[derive(Debug, Clone)]
pub struct SkeletonGraph {
    node_count: usize,
    center: usize,
    adjacency: Array3<f32>,
}

impl SkeletonGraph {
    /// Build a skeleton graph from explicit edge lists.
    ///
    /// Partition 0 is the symmetric closure of `self_loops` and
    /// `neighbor_edges`. Each neighbor edge is then assigned to partition 1
    /// if it touches `center`, otherwise to partition 2 if both endpoints lie
    /// in `torso`. The center test is exclusive: an edge touching the center
    /// never lands in the torso partition.
    ///
    /// # Errors
    ///
    /// Returns an error if any node index is outside `[0, node_count)`.
    pub fn build(
        node_count: usize,
        self_loops: &[(usize, usize)],
        neighbor_edges: &[(usize, usize)],
        center: usize,
        torso: &[usize],
    ) -> Result<Self> {
        if node_count == 0 {
            return Err(ActionError::GraphError(
                "node count must be positive".to_string(),
            ));
        }
        if center >= node_count {
            return Err(ActionError::GraphError(format!(
                "center node {center} out of range for {node_count} nodes"
            )));
        }
        for &t in torso {
            if t >= node_count {
                return Err(ActionError::GraphError(format!(
                    "torso node {t} out of range for {node_count} nodes"
                )));
            }
        }

        let mut adjacency = Array3::<f32>::zeros((Partition::COUNT, node_count, node_count));

        for &(i, j) in self_loops.iter().chain(neighbor_edges.iter()) {
            if i >= node_count || j >= node_count {
                return Err(ActionError::GraphError(format!(
                    "edge ({i}, {j}) out of range for {node_count} nodes"
                )));
            }
            adjacency[[0, i, j]] = 1.0;
            adjacency[[0, j, i]] = 1.0;
        }

        for &(i, j) in neighbor_edges {
            if i == center || j == center {
                adjacency[[1, i, j]] = 1.0;
                adjacency[[1, j, i]] = 1.0;
            } else if torso.contains(&i) && torso.contains(&j) {
                adjacency[[2, i, j]] = 1.0;
                adjacency[[2, j, i]] = 1.0;
            }
        }

        Ok(Self {
            node_count,
            center,
            adjacency,
        })
    }

    /// Build the deployed COCO-17 skeleton graph.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in constants; the `Result` mirrors
    /// [`SkeletonGraph::build`].
    pub fn coco17() -> Result<Self> {
        let self_loops: Vec<(usize, usize)> = (0..COCO_NODE_COUNT).map(|i| (i, i)).collect();
        Self::build(
            COCO_NODE_COUNT,
            &self_loops,
            &COCO_NEIGHBOR_EDGES,
            COCO_CENTER,
            &COCO_TORSO,
        )
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.node_count
    }

    /// Index of the designated center node.
    #[must_use]
    pub const fn center(&self) -> usize {
        self.center
    }

    /// The full adjacency stack, shaped (3, nodes, nodes).
    #[must_use]
    pub const fn adjacency(&self) -> &Array3<f32> {
        &self.adjacency
    }

    /// View of a single partition's adjacency matrix.
    #[must_use]
    pub fn partition(&self, partition: Partition) -> ArrayView2<'_, f32> {
        self.adjacency.index_axis(Axis(0), partition.index())
    }
}
