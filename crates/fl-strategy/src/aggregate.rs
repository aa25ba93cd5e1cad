//! Federated averaging: each client's contribution is weighted by its
//! `num_examples`, over the layered `Parameters` representation.

use fl_common::Parameters;

/// `Σ (w_i * params_i) / Σ w_i`, weighted by each client's `num_examples`.
/// Returns `None` if there are no contributions or every weight is
/// non-positive (callers are expected to have already clamped
/// non-positive `num_examples` to 1 before calling this).
///
/// All contributions are assumed to share the same layer shapes; that
/// invariant is the Client Manager's responsibility to uphold.
pub fn federated_average(contributions: &[(Parameters, f64)]) -> Option<Parameters> {
    let total_weight: f64 = contributions.iter().map(|(_, w)| w).sum();
    if contributions.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let layer_count = contributions[0].0.len();
    let mut aggregated = Vec::with_capacity(layer_count);

    for layer_idx in 0..layer_count {
        let layer_len = contributions[0].0[layer_idx].len();
        let mut sums = vec![0.0f64; layer_len];
        for (parameters, weight) in contributions {
            let layer = &parameters[layer_idx];
            for (i, value) in layer.iter().enumerate() {
                sums[i] += (*value as f64) * weight;
            }
        }
        aggregated.push(sums.into_iter().map(|s| (s / total_weight) as f32).collect());
    }

    Some(aggregated)
}

/// True iff every value in `parameters` is finite. A non-finite aggregated
/// parameter aborts the round.
pub fn all_finite(parameters: &Parameters) -> bool {
    parameters
        .iter()
        .all(|layer| layer.iter().all(|v| v.is_finite()))
}

/// Size in bytes of the serialized parameter tensor, stored on the round
/// record as `model_size_bytes`.
pub fn size_bytes(parameters: &Parameters) -> u64 {
    let elements: usize = parameters.iter().map(|layer| layer.len()).sum();
    (elements * std::mem::size_of::<f32>()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_weighted_by_num_examples() {
        let a = vec![vec![1.0, 2.0]];
        let b = vec![vec![3.0, 4.0]];
        let result = federated_average(&[(a, 1.0), (b, 3.0)]).unwrap();
        // (1*1 + 3*3) / 4 = 2.5, (2*1 + 4*3) / 4 = 3.5
        assert_eq!(result, vec![vec![2.5, 3.5]]);
    }

    #[test]
    fn equal_weights_average_evenly() {
        let a = vec![vec![0.0]];
        let b = vec![vec![2.0]];
        let result = federated_average(&[(a, 1.0), (b, 1.0)]).unwrap();
        assert_eq!(result, vec![vec![1.0]]);
    }

    #[test]
    fn empty_contributions_yield_none() {
        assert!(federated_average(&[]).is_none());
    }

    #[test]
    fn zero_total_weight_yields_none() {
        let a = vec![vec![1.0]];
        assert!(federated_average(&[(a, 0.0)]).is_none());
    }

    #[test]
    fn detects_non_finite_values() {
        assert!(all_finite(&vec![vec![1.0, 2.0]]));
        assert!(!all_finite(&vec![vec![1.0, f32::NAN]]));
        assert!(!all_finite(&vec![vec![f32::INFINITY]]));
    }

    #[test]
    fn size_bytes_counts_all_elements() {
        let parameters = vec![vec![0.0; 10], vec![0.0; 5]];
        assert_eq!(size_bytes(&parameters), 15 * 4);
    }
}
