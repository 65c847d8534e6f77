//! Bagged regression trees over engineered features
//!
//! Each tree learns the change from the anchor value to the next value, so
//! the ensemble can carry a trend past the range of the training targets.
//! Multi-step forecasts feed each prediction back into the history and
//! recompute the features.

use crate::cancel::CancellationFlag;
use crate::config::{ModelKind, TreeEnsembleConfig};
use crate::error::{ForecastError, Result};
use crate::features::FeatureEngine;
use crate::models::{ModelInput, Projection};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree stored as a node arena
#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeParams {
    max_depth: usize,
    min_samples_leaf: usize,
    features_per_split: usize,
}

struct Split {
    feature: usize,
    threshold: f64,
    sse: f64,
}

fn sum_squared_error(sum: f64, sum_sq: f64, n: usize) -> f64 {
    (sum_sq - sum * sum / n as f64).max(0.0)
}

impl RegressionTree {
    fn grow(x: &[Vec<f64>], y: &[f64], sample: &[usize], params: &TreeParams, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, y, sample, 0, params, rng);
        tree
    }

    fn build(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        idx: &[usize],
        depth: usize,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> usize {
        let n = idx.len();
        let sum: f64 = idx.iter().map(|&i| y[i]).sum();
        let sum_sq: f64 = idx.iter().map(|&i| y[i] * y[i]).sum();
        let mean = sum / n as f64;

        let node = self.nodes.len();
        self.nodes.push(Node::Leaf(mean));

        if depth >= params.max_depth || n < 2 * params.min_samples_leaf {
            return node;
        }

        let parent_sse = sum_squared_error(sum, sum_sq, n);
        let n_features = x[idx[0]].len();
        let candidates = sample(rng, n_features, params.features_per_split.min(n_features));

        let mut best: Option<Split> = None;
        for feature in candidates.iter() {
            let mut order = idx.to_vec();
            order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let prev = order[pos - 1];
                left_sum += y[prev];
                left_sq += y[prev] * y[prev];

                if pos < params.min_samples_leaf || n - pos < params.min_samples_leaf {
                    continue;
                }
                let (lo, hi) = (x[prev][feature], x[order[pos]][feature]);
                if hi <= lo {
                    continue;
                }

                let sse = sum_squared_error(left_sum, left_sq, pos)
                    + sum_squared_error(sum - left_sum, sum_sq - left_sq, n - pos);
                if best.as_ref().map_or(true, |b| sse < b.sse) {
                    best = Some(Split {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        sse,
                    });
                }
            }
        }

        let split = match best {
            Some(split) if split.sse < parent_sse - 1e-12 => split,
            _ => return node,
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .iter()
            .partition(|&&i| x[i][split.feature] <= split.threshold);

        let left = self.build(x, y, &left_idx, depth + 1, params, rng);
        let right = self.build(x, y, &right_idx, depth + 1, params, rng);
        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Seeded bagging regressor trained on feature rows
#[derive(Debug, Clone)]
pub struct TreeEnsembleAdapter {
    config: TreeEnsembleConfig,
}

/// Fitted forest plus the history it extends
#[derive(Debug, Clone)]
pub struct FittedTreeEnsemble {
    trees: Vec<RegressionTree>,
    column_means: Vec<f64>,
    engine: FeatureEngine,
    history: Vec<f64>,
    residual_variance: f64,
}

impl TreeEnsembleAdapter {
    pub const MIN_DATA_POINTS: usize = 12;
    /// Feature rows with an anchor and a known next value needed to train
    pub const MIN_TRAINING_ROWS: usize = 4;

    pub fn new(config: TreeEnsembleConfig) -> Self {
        Self { config }
    }

    pub(crate) fn fit(&self, input: &ModelInput, cancel: &CancellationFlag) -> Result<FittedTreeEnsemble> {
        let names = input.engine.feature_names();
        let values = input.series.values();

        // rows need an anchor and a next value; missing features are
        // imputed with the column mean over present values
        let mut raw: Vec<Vec<Option<f64>>> = Vec::new();
        let mut y: Vec<f64> = Vec::new();
        for row in &input.rows {
            let next = values.get(row.index + 1).copied().flatten();
            if let (Some(next), Some(anchor)) = (next, row.get("value")) {
                y.push(next - anchor);
                raw.push(names.iter().map(|n| row.get(n)).collect());
            }
        }

        if raw.len() < Self::MIN_TRAINING_ROWS {
            return Err(ForecastError::InsufficientTrainingRows {
                model: ModelKind::TreeEnsemble.to_string(),
                required: Self::MIN_TRAINING_ROWS,
                available: raw.len(),
            });
        }

        let n = raw.len();
        let p = names.len();
        let column_means: Vec<f64> = (0..p)
            .map(|j| {
                let present: Vec<f64> = raw.iter().filter_map(|row| row[j]).collect();
                if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            })
            .collect();
        let x: Vec<Vec<f64>> = raw
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&column_means)
                    .map(|(v, mean)| v.unwrap_or(*mean))
                    .collect()
            })
            .collect();

        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_leaf: self.config.min_samples_leaf,
            features_per_split: ((p + 2) / 3).max(1),
        };

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut trees = Vec::with_capacity(self.config.n_trees);
        let mut oob_sum = vec![0.0; n];
        let mut oob_count = vec![0usize; n];

        for _ in 0..self.config.n_trees {
            cancel.check()?;

            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let tree = RegressionTree::grow(&x, &y, &bootstrap, &params, &mut rng);

            let mut in_bag = vec![false; n];
            for &i in &bootstrap {
                in_bag[i] = true;
            }
            for i in (0..n).filter(|&i| !in_bag[i]) {
                oob_sum[i] += tree.predict(&x[i]);
                oob_count[i] += 1;
            }
            trees.push(tree);
        }

        // out-of-bag error where available, in-sample otherwise
        let oob_errors: Vec<f64> = (0..n)
            .filter(|&i| oob_count[i] > 0)
            .map(|i| (oob_sum[i] / oob_count[i] as f64 - y[i]).powi(2))
            .collect();
        let residual_variance = if oob_errors.is_empty() {
            (0..n)
                .map(|i| {
                    let pred = trees.iter().map(|t| t.predict(&x[i])).sum::<f64>() / trees.len() as f64;
                    (pred - y[i]).powi(2)
                })
                .sum::<f64>()
                / n as f64
        } else {
            oob_errors.iter().sum::<f64>() / oob_errors.len() as f64
        };

        Ok(FittedTreeEnsemble {
            trees,
            column_means,
            engine: input.engine.clone(),
            history: input.view.values.clone(),
            residual_variance,
        })
    }
}

impl Projection for FittedTreeEnsemble {
    fn project(&self, steps: usize) -> Result<Vec<(f64, f64)>> {
        let mut history: Vec<Option<f64>> = self.history.iter().copied().map(Some).collect();
        let mut out = Vec::with_capacity(steps);

        for h in 1..=steps {
            let (last, anchor) = match history.last() {
                Some(Some(v)) => (history.len() - 1, *v),
                _ => {
                    return Err(ForecastError::DataError(
                        "tree ensemble history is empty".to_string(),
                    ))
                }
            };

            let row: Vec<f64> = self
                .engine
                .vector_at(&history, last)?
                .into_iter()
                .zip(&self.column_means)
                .map(|(v, mean)| v.unwrap_or(*mean))
                .collect();

            let predictions: Vec<f64> = self.trees.iter().map(|t| anchor + t.predict(&row)).collect();
            let k = predictions.len() as f64;
            let mean = predictions.iter().sum::<f64>() / k;
            let spread = predictions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / k;

            out.push((mean, spread + self.residual_variance * h as f64));
            history.push(Some(mean));
        }

        Ok(out)
    }

    fn residual_variance(&self) -> f64 {
        self.residual_variance
    }
}
