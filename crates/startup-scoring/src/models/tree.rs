//! Regression trees and the histogram-based grower that builds them.
use serde::{Deserialize, Serialize};

use crate::models::quantize::{BinCuts, QuantizedMatrix};

/// One node of a flat tree. Children are indices into [`Tree::nodes`].
///
/// Rows with `x[feature] < threshold` go left. Leaf values already include
/// the learning rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub leaf: bool,
    pub feature: usize,
    pub threshold: f32,
    pub left: usize,
    pub right: usize,
    pub value: f64,
    /// Sum of hessians (sample weights under squared loss) reaching this node.
    pub cover: f64,
    pub gain: f64,
}

impl Node {
    fn leaf(value: f64, cover: f64) -> Self {
        Self {
            leaf: true,
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            cover,
            gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f32]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.leaf {
                return node.value;
            }
            idx = if row[node.feature] < node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    /// Cover-weighted mean output, i.e. the tree's prediction with no feature known.
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, idx: usize) -> f64 {
        let node = &self.nodes[idx];
        if node.leaf {
            return node.value;
        }
        let left = &self.nodes[node.left];
        let right = &self.nodes[node.right];
        let total = left.cover + right.cover;
        if total <= 0.0 {
            return 0.5 * (self.expected_from(node.left) + self.expected_from(node.right));
        }
        (left.cover * self.expected_from(node.left) + right.cover * self.expected_from(node.right))
            / total
    }

    pub fn depth(&self) -> usize {
        fn walk(tree: &Tree, idx: usize) -> usize {
            let node = &tree.nodes[idx];
            if node.leaf {
                0
            } else {
                1 + walk(tree, node.left).max(walk(tree, node.right))
            }
        }
        walk(self, 0)
    }
}

/// Growth limits and regularisation for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub min_child_weight: f64,
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Optimal leaf weight for gradient sum `g` and hessian sum `h`.
pub fn leaf_weight(g: f64, h: f64, params: &TreeParams) -> f64 {
    -soft_threshold(g, params.reg_alpha) / (h + params.reg_lambda)
}

fn leaf_score(g: f64, h: f64, params: &TreeParams) -> f64 {
    let g = soft_threshold(g, params.reg_alpha);
    g * g / (h + params.reg_lambda)
}

struct Split {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Builds one tree from gradients over a quantized sample.
pub struct TreeGrower<'a> {
    pub cuts: &'a BinCuts,
    pub bins: &'a QuantizedMatrix,
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    /// Features this tree may split on.
    pub features: &'a [usize],
    pub params: TreeParams,
}

impl<'a> TreeGrower<'a> {
    /// Grow a tree over `rows`. `gains` accumulates split gain per feature.
    pub fn grow(&self, rows: Vec<usize>, gains: &mut [f64]) -> Tree {
        let mut nodes = Vec::new();
        self.build(rows, 0, &mut nodes, gains);
        Tree { nodes }
    }

    fn build(&self, rows: Vec<usize>, depth: usize, nodes: &mut Vec<Node>, gains: &mut [f64]) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let idx = nodes.len();
        nodes.push(Node::leaf(
            leaf_weight(g, h, &self.params) * self.params.learning_rate,
            h,
        ));

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let split = match self.best_split(&rows, g, h) {
            Some(split) => split,
            None => return idx,
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.bins.get(r, split.feature) <= split.bin);
        gains[split.feature] += split.gain;

        let left = self.build(left_rows, depth + 1, nodes, gains);
        let right = self.build(right_rows, depth + 1, nodes, gains);
        let node = &mut nodes[idx];
        node.leaf = false;
        node.feature = split.feature;
        node.threshold = self.cuts.threshold(split.feature, split.bin);
        node.left = left;
        node.right = right;
        node.gain = split.gain;
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<Split> {
        let parent = leaf_score(g, h, &self.params);
        let mut best: Option<Split> = None;

        for &feature in self.features {
            let n_bins = self.cuts.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64); n_bins];
            for &r in rows {
                let slot = &mut hist[self.bins.get(r, feature)];
                slot.0 += self.grad[r];
                slot.1 += self.hess[r];
            }

            let (mut gl, mut hl) = (0.0, 0.0);
            for (bin, &(bg, bh)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += bg;
                hl += bh;
                let (gr, hr) = (g - gl, h - hl);
                if hl <= 0.0 || hr <= 0.0 {
                    continue;
                }
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain = leaf_score(gl, hl, &self.params) + leaf_score(gr, hr, &self.params) - parent;
                if gain > 1e-10 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split { feature, bin, gain });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Array2;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 3,
            learning_rate: 1.0,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            min_child_weight: 0.0,
        }
    }

    #[test]
    fn single_split_recovers_step_function() {
        let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = [1.0, 1.0, 5.0, 5.0];
        let grad: Vec<f64> = y.iter().map(|v| 0.0 - v).collect();
        let hess = vec![1.0; 4];
        let cuts = BinCuts::from_matrix(&x, 256);
        let bins = cuts.quantize(&x);
        let mut gains = vec![0.0];
        let grower = TreeGrower {
            cuts: &cuts,
            bins: &bins,
            grad: &grad,
            hess: &hess,
            features: &[0],
            params: params(),
        };
        let tree = grower.grow((0..4).collect(), &mut gains);
        assert_eq!(tree.predict(&[1.5]), 1.0);
        assert_eq!(tree.predict(&[3.5]), 5.0);
        assert!((tree.expected_value() - 3.0).abs() < 1e-12);
        assert_eq!(tree.depth(), 1);
        assert!(gains[0] > 0.0);
    }
}
