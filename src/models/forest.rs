//! Random Forest regressor built from CART regression trees.

use log::debug;
use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Random Forest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees in the forest
    pub n_estimators: usize,
    /// Maximum depth of each tree (None = grow until leaves are pure)
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node
    pub min_samples_split: usize,
    /// Minimum samples in a leaf
    pub min_samples_leaf: usize,
    /// Features considered per split (None = all)
    pub max_features: Option<usize>,
    /// Fit each tree on a bootstrap sample
    pub bootstrap: bool,
    /// Random seed
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        n_samples: usize,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Reduction of summed squared error
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Single regression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
    feature_importances: Vec<f64>,
}

impl RegressionTree {
    /// Grows a tree over the rows listed in `indices` (duplicates allowed).
    fn grow(
        x: &Array2<f64>,
        y: &[f64],
        indices: Vec<usize>,
        config: &ForestConfig,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut feature_importances = vec![0.0; x.ncols()];
        let root = build_node(x, y, indices, 0, config, rng, &mut feature_importances);
        Self {
            root,
            feature_importances,
        }
    }

    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        self.root.predict(row)
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

fn build_node(
    x: &Array2<f64>,
    y: &[f64],
    indices: Vec<usize>,
    depth: usize,
    config: &ForestConfig,
    rng: &mut ChaCha8Rng,
    importances: &mut [f64],
) -> TreeNode {
    let n = indices.len();
    let (sum, sum_sq) = indices
        .iter()
        .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]));
    let mean = sum / n as f64;
    let sse = sum_sq - sum * sum / n as f64;

    let depth_reached = config.max_depth.map_or(false, |max| depth >= max);
    if depth_reached || n < config.min_samples_split || n < 2 * config.min_samples_leaf || sse <= 1e-12 {
        return TreeNode::Leaf {
            value: mean,
            n_samples: n,
        };
    }

    match best_split(x, y, &indices, sse, config, rng) {
        Some(split) => {
            importances[split.feature] += split.gain;
            let left = build_node(x, y, split.left, depth + 1, config, rng, importances);
            let right = build_node(x, y, split.right, depth + 1, config, rng, importances);
            TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                n_samples: n,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        None => TreeNode::Leaf {
            value: mean,
            n_samples: n,
        },
    }
}

/// Sorted sweep over each candidate feature, tracking running sums.
fn best_split(
    x: &Array2<f64>,
    y: &[f64],
    indices: &[usize],
    parent_sse: f64,
    config: &ForestConfig,
    rng: &mut ChaCha8Rng,
) -> Option<SplitCandidate> {
    let n_features = x.ncols();
    let max_features = config.max_features.unwrap_or(n_features).clamp(1, n_features);

    let mut features: Vec<usize> = (0..n_features).collect();
    features.shuffle(rng);
    features.truncate(max_features);

    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let min_leaf = config.min_samples_leaf.max(1);

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = indices.to_vec();

    for &feature in &features {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 0..n - 1 {
            let yi = y[order[pos]];
            left_sum += yi;
            left_sq += yi * yi;

            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let current = x[[order[pos], feature]];
            let next = x[[order[pos + 1], feature]];
            if next <= current {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let left_sse = left_sq - left_sum * left_sum / n_left as f64;
            let right_sse = right_sq - right_sum * right_sum / n_right as f64;
            let gain = parent_sse - (left_sse + right_sse);

            if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                let mut threshold = (current + next) / 2.0;
                // midpoint can round up to `next` for adjacent floats
                if threshold >= next {
                    threshold = current;
                }
                best = Some((feature, threshold, gain));
            }
        }
    }

    best.map(|(feature, threshold, gain)| {
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] <= threshold);
        SplitCandidate {
            feature,
            threshold,
            gain,
            left,
            right,
        }
    })
}

/// Random Forest model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Train the forest; tree `i` draws from its own RNG seeded with `seed + i`.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(AnalysisError::EmptyDataset("random forest training data".to_string()));
        }
        if x.nrows() != y.len() {
            return Err(AnalysisError::ShapeMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }

        let n = x.nrows();
        let config = &self.config;
        let trees: Vec<RegressionTree> = (0..config.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let indices: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let tree = RegressionTree::grow(x, y, indices, config, &mut rng);
                debug!(
                    "Tree {}: depth {}, {} leaves",
                    i,
                    tree.root.depth(),
                    tree.root.n_leaves()
                );
                tree
            })
            .collect();

        let mut importances = vec![0.0; x.ncols()];
        for tree in &trees {
            let total: f64 = tree.feature_importances.iter().sum();
            if total > 0.0 {
                for (acc, imp) in importances.iter_mut().zip(&tree.feature_importances) {
                    *acc += imp / total;
                }
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            for imp in &mut importances {
                *imp /= sum;
            }
        }

        self.trees = trees;
        self.n_features = x.ncols();
        self.feature_importances = importances;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            return Err(AnalysisError::NotFitted("RandomForest"));
        }
        if x.ncols() != self.n_features {
            return Err(AnalysisError::ShapeMismatch {
                expected: self.n_features,
                found: x.ncols(),
            });
        }

        let rows: Vec<ArrayView1<f64>> = x.rows().into_iter().collect();
        Ok(rows
            .par_iter()
            .map(|row| {
                self.trees.iter().map(|t| t.predict_one(row.view())).sum::<f64>()
                    / self.trees.len() as f64
            })
            .collect())
    }

    /// Normalized impurity decrease per feature
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data(n: usize) -> (Array2<f64>, Vec<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                i as f64 / n as f64
            } else {
                ((i * 7) % 11) as f64
            }
        });
        let y = (0..n).map(|i| if i < n / 2 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_forest_learns_step() {
        let (x, y) = step_data(100);
        let mut forest = RandomForest::new(ForestConfig {
            n_estimators: 20,
            ..Default::default()
        });
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 20);

        let predictions = forest.predict(&x).unwrap();
        let mae: f64 = predictions
            .iter()
            .zip(&y)
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / y.len() as f64;
        assert!(mae < 0.2, "mae {}", mae);

        // the informative feature dominates
        let importances = forest.feature_importances();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forest_is_deterministic() {
        let (x, y) = step_data(60);
        let config = ForestConfig {
            n_estimators: 8,
            ..Default::default()
        };

        let mut a = RandomForest::new(config.clone());
        let mut b = RandomForest::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let (x, y) = step_data(50);
        let mut forest = RandomForest::new(ForestConfig {
            n_estimators: 3,
            max_depth: Some(1),
            bootstrap: false,
            ..Default::default()
        });
        forest.fit(&x, &y).unwrap();
        for tree in forest.trees() {
            assert!(tree.root().depth() <= 2);
        }
    }

    fn leaf_sizes(node: &TreeNode, sizes: &mut Vec<usize>) {
        match node {
            TreeNode::Leaf { n_samples, .. } => sizes.push(*n_samples),
            TreeNode::Split { left, right, .. } => {
                leaf_sizes(left, sizes);
                leaf_sizes(right, sizes);
            }
        }
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let (x, y) = step_data(80);
        let y: Vec<f64> = y.iter().enumerate().map(|(i, v)| v + (i % 5) as f64 * 0.1).collect();
        let mut forest = RandomForest::new(ForestConfig {
            n_estimators: 4,
            min_samples_leaf: 7,
            ..Default::default()
        });
        forest.fit(&x, &y).unwrap();

        for tree in forest.trees() {
            let mut sizes = Vec::new();
            leaf_sizes(tree.root(), &mut sizes);
            assert!(sizes.len() > 1);
            assert!(sizes.iter().all(|&s| s >= 7), "leaf sizes {:?}", sizes);
        }
    }

    #[test]
    fn test_max_features_is_deterministic() {
        let (x, y) = step_data(60);
        let config = ForestConfig {
            n_estimators: 6,
            max_features: Some(1),
            ..Default::default()
        };

        let mut a = RandomForest::new(config.clone());
        let mut b = RandomForest::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        let predictions = a.predict(&x).unwrap();
        assert_eq!(predictions, b.predict(&x).unwrap());
        assert!(predictions.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = vec![3.0; 10];
        let mut forest = RandomForest::new(ForestConfig {
            n_estimators: 2,
            ..Default::default()
        });
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.trees()[0].root().n_leaves(), 1);
        assert_eq!(forest.predict(&x).unwrap(), vec![3.0; 10]);
    }

    #[test]
    fn test_errors() {
        let forest = RandomForest::new(ForestConfig::default());
        let x = Array2::zeros((3, 2));
        assert!(matches!(forest.predict(&x), Err(AnalysisError::NotFitted(_))));

        let mut forest = RandomForest::new(ForestConfig {
            n_estimators: 2,
            ..Default::default()
        });
        assert!(matches!(
            forest.fit(&x, &[1.0, 2.0]),
            Err(AnalysisError::ShapeMismatch { expected: 3, found: 2 })
        ));
        assert!(forest.fit(&Array2::zeros((0, 2)), &[]).is_err());

        forest.fit(&x, &[1.0, 2.0, 3.0]).unwrap();
        assert!(forest.predict(&Array2::zeros((1, 3))).is_err());
    }
}
