/// Gini index of `values`.
///
/// Negative inputs are shifted so the minimum is zero and every value is
/// nudged by `1e-7`, so a constant series gives 0 instead of NaN. `None` for
/// an empty input.
pub fn gini(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let shift = if min < 0.0 { -min } else { 0.0 };

    let mut sorted: Vec<f64> = values.iter().map(|v| v + shift + 1e-7).collect();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let total: f64 = sorted.iter().sum();
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n - 1.0) * v)
        .sum();
    Some(weighted / (n * total))
}
