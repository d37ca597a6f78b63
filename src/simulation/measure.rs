use crate::signal_processing::angle_diff;

/// Signed shortest-arc error of a measured heading
pub fn angle_error(measured: f64, expected: f64) -> f64 {
    angle_diff(expected, measured)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorStats {
    pub count: usize,
    pub mean_abs: f64,
    pub max_abs: f64,
    pub rms: f64,
}

impl ErrorStats {
    pub fn from_errors(errors: &[f64]) -> Self {
        if errors.is_empty() {
            return Self::default();
        }
        let n = errors.len() as f64;
        Self {
            count: errors.len(),
            mean_abs: errors.iter().map(|e| e.abs()).sum::<f64>() / n,
            max_abs: errors.iter().fold(0.0, |max, e| e.abs().max(max)),
            rms: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
        }
    }
}

/// True heading in effect at `t_ms`, from a `(t_ms, heading)` series
pub fn truth_at(truth: &[(u64, f64)], t_ms: u64) -> Option<f64> {
    let idx = truth.partition_point(|&(t, _)| t <= t_ms);
    idx.checked_sub(1).map(|i| truth[i].1)
}
