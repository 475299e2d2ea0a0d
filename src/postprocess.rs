use ndarray::{Array1, ArrayView1};
use ordered_float::OrderedFloat;

use crate::{Error, Result};

/// Applies softmax to a 1D array and returns a new Array1<f32>.
pub fn softmax(slice: ArrayView1<f32>) -> Array1<f32> {
    let max_val = slice.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Array1<f32> = slice.mapv(|x| (x - max_val).exp());
    let sum_exp: f32 = exp_vals.sum();
    exp_vals.mapv(|v| v / sum_exp)
}

/// Index and value of the maximum. The first maximum wins, so ties go to
/// the lowest index. NaN entries never win.
pub fn argmax_and_max(scores: ArrayView1<f32>) -> (usize, f32) {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(max_idx, max_val), (i, &val)| {
            if val > max_val { (i, val) } else { (max_idx, max_val) }
        })
}

/// Winning class of one probability row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub index: usize,
    pub confidence: f32,
}

pub fn decide(probabilities: ArrayView1<f32>) -> Result<Decision> {
    if probabilities.is_empty() {
        return Err(Error::EmptyOutput);
    }
    let (index, confidence) = argmax_and_max(probabilities);
    if !confidence.is_finite() {
        return Err(Error::NonFiniteOutput);
    }
    Ok(Decision {
        index,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// The `k` highest entries, descending, ties by lower index.
pub fn top_k(probabilities: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .map(|(i, &p)| (i, p))
        .collect();
    indexed.sort_by_key(|&(i, p)| (std::cmp::Reverse(OrderedFloat(p)), i));
    indexed.truncate(k);
    indexed
}
