//! Exact TreeSHAP attributions for [`GbdtRegressor`].
//!
//! Implements the polynomial-time path algorithm of Lundberg et al. (2018,
//! "Consistent Individualized Feature Attribution for Tree Ensembles",
//! Algorithm 2). Node covers play the role of the background distribution,
//! so for every row `expected_value + sum(shap_values) == predict_row`.
use std::sync::Arc;

use crate::models::gbdt::GbdtRegressor;
use crate::models::tree::Tree;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Per-model explainer. Building it computes the expected output once.
#[derive(Debug, Clone)]
pub struct TreeExplainer {
    model: Arc<GbdtRegressor>,
    expected_value: f64,
}

impl TreeExplainer {
    pub fn new(model: Arc<GbdtRegressor>) -> Self {
        let expected_value =
            model.base_score() + model.trees().iter().map(Tree::expected_value).sum::<f64>();
        Self {
            model,
            expected_value,
        }
    }

    /// Model output when no feature is known.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    /// One signed contribution per feature for `row`.
    pub fn shap_values(&self, row: &[f32]) -> Vec<f64> {
        let mut phi = vec![0.0; self.model.n_features().max(row.len())];
        for tree in self.model.trees() {
            if tree.nodes.is_empty() {
                continue;
            }
            let mut path = Vec::with_capacity(tree.depth() + 2);
            recurse(tree, row, &mut phi, 0, &mut path, 1.0, 1.0, None);
        }
        phi
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    row: &[f32],
    phi: &mut [f64],
    node_idx: usize,
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend_path(path, zero_fraction, one_fraction, feature);
    let node = &tree.nodes[node_idx];

    if node.leaf {
        for i in 1..path.len() {
            let w = unwound_path_sum(path, i);
            let el = path[i];
            if let Some(f) = el.feature {
                phi[f] += w * (el.one_fraction - el.zero_fraction) * node.value;
            }
        }
        return;
    }

    let (hot, cold) = if row[node.feature] < node.threshold {
        (node.left, node.right)
    } else {
        (node.right, node.left)
    };

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(node.feature)) {
        incoming_zero = path[k].zero_fraction;
        incoming_one = path[k].one_fraction;
        unwind_path(path, k);
    }

    let cover = node.cover;
    let fraction = |child: usize| {
        if cover > 0.0 {
            tree.nodes[child].cover / cover
        } else {
            0.5
        }
    };
    let hot_zero = fraction(hot);
    let cold_zero = fraction(cold);

    let mut hot_path = path.clone();
    recurse(
        tree,
        row,
        phi,
        hot,
        &mut hot_path,
        hot_zero * incoming_zero,
        incoming_one,
        Some(node.feature),
    );
    let mut cold_path = path.clone();
    recurse(
        tree,
        row,
        phi,
        cold,
        &mut cold_path,
        cold_zero * incoming_zero,
        0.0,
        Some(node.feature),
    );
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / denom;
        } else if zero_fraction != 0.0 {
            total += path[i].pweight / zero_fraction / ((depth - i) as f64 / denom);
        }
    }
    total
}
