use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};

/// growth limits for one regression tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64, // x <= threshold goes left
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// best split found for a single feature
#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

/// least-squares regression tree (CART, friedman improvement)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
    importances: Vec<f64>, // raw squared-error decrease per feature
}

impl RegressionTree {
    /// fit `targets` on the given `rows` of `x`
    pub fn fit(
        x: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        rows: &[usize],
        params: &TreeParams,
    ) -> Result<Self> {
        if x.nrows() != targets.len() {
            return Err(AttritionError::data(format!(
                "feature rows ({}) != targets ({})",
                x.nrows(),
                targets.len()
            )));
        }
        if rows.is_empty() {
            return Err(AttritionError::data("cannot grow a tree on zero rows"));
        }

        let mut tree = Self {
            nodes: Vec::new(),
            n_features: x.ncols(),
            importances: vec![0.0; x.ncols()],
        };
        let mut builder = Builder { x: x.view(), y: targets.view(), params };
        builder.grow(&mut tree, rows.to_vec(), 0);
        Ok(tree)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    /// longest root-to-leaf path, 0 for a lone leaf
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    /// raw impurity decrease per feature
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    at = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

struct Builder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'a TreeParams,
}

impl Builder<'_> {
    /// grow the subtree for `rows`, returns its node index
    fn grow(&mut self, tree: &mut RegressionTree, rows: Vec<usize>, depth: usize) -> usize {
        let (sum, sum_sq) = rows.iter().fold((0.0, 0.0), |(s, q), &i| (s + self.y[i], q + self.y[i] * self.y[i]));
        let n = rows.len();
        let mean = sum / n as f64;
        let sse = (sum_sq - sum * sum / n as f64).max(0.0);

        let at = tree.nodes.len();
        tree.nodes.push(Node::Leaf { value: mean });

        let splittable = depth < self.params.max_depth
            && n >= self.params.min_samples_split
            && n >= 2 * self.params.min_samples_leaf
            && sse > 1e-12;
        if !splittable {
            return at;
        }

        let Some(best) = self.best_split(&rows) else {
            return at;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);

        let child_sse = |part: &[usize]| {
            let (s, q) = part.iter().fold((0.0, 0.0), |(s, q), &i| (s + self.y[i], q + self.y[i] * self.y[i]));
            (q - s * s / part.len() as f64).max(0.0)
        };
        let decrease = sse - child_sse(&left_rows) - child_sse(&right_rows);
        tree.importances[best.feature] += decrease.max(0.0);

        let left = self.grow(tree, left_rows, depth + 1);
        let right = self.grow(tree, right_rows, depth + 1);
        tree.nodes[at] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        at
    }

    /// scan every feature in parallel, reduce in feature order
    fn best_split(&self, rows: &[usize]) -> Option<Candidate> {
        let candidates: Vec<Option<Candidate>> = (0..self.x.ncols())
            .into_par_iter()
            .map(|feature| self.best_split_on(rows, feature))
            .collect();

        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<Candidate>, c| match best {
                Some(b) if b.improvement >= c.improvement => Some(b),
                _ => Some(c),
            })
    }

    fn best_split_on(&self, rows: &[usize], feature: usize) -> Option<Candidate> {
        let mut sorted: Vec<usize> = rows.to_vec();
        sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]).then(a.cmp(&b)));

        let n = sorted.len();
        let total: f64 = sorted.iter().map(|&i| self.y[i]).sum();
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<Candidate> = None;
        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += self.y[sorted[k - 1]];
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lo = self.x[[sorted[k - 1], feature]];
            let hi = self.x[[sorted[k], feature]];
            if lo >= hi {
                continue;
            }

            let (n_left, n_right) = (k as f64, (n - k) as f64);
            let diff = left_sum / n_left - (total - left_sum) / n_right;
            let improvement = n_left * n_right / n as f64 * diff * diff;

            if best.map_or(true, |b| improvement > b.improvement) {
                let mid = lo + (hi - lo) / 2.0;
                let threshold = if mid < hi { mid } else { lo };
                best = Some(Candidate { feature, threshold, improvement });
            }
        }

        best.filter(|b| b.improvement > 0.0)
    }
}
