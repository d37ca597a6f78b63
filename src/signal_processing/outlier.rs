use super::math::angle_diff;

/// Median-referenced outlier rejection over a heading history
///
/// The reference is the numeric median of the raw degree values (the upper
/// median for even lengths). It is not wrap aware: a history split across
/// north, such as `[358, 359, 1, 2]`, yields a reference on one side of the
/// split and can reject the other side.
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    threshold_degrees: f64,
}

impl OutlierFilter {
    /// Histories shorter than this are returned unchanged
    pub const MIN_SAMPLES: usize = 3;

    pub fn new(threshold_degrees: f64) -> Self {
        Self { threshold_degrees }
    }

    /// Numeric median used as the consensus reference
    pub fn reference(headings: &[f64]) -> Option<f64> {
        if headings.is_empty() {
            return None;
        }
        let mut sorted = headings.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(sorted[sorted.len() / 2])
    }

    /// Keep headings within the threshold of the reference, preserving order
    ///
    /// May return an empty vector; callers fall back to the newest raw
    /// heading in that case.
    pub fn filter(&self, headings: &[f64]) -> Vec<f64> {
        if headings.len() < Self::MIN_SAMPLES {
            return headings.to_vec();
        }
        let Some(reference) = Self::reference(headings) else {
            return Vec::new();
        };

        headings
            .iter()
            .copied()
            .filter(|&h| angle_diff(reference, h).abs() < self.threshold_degrees)
            .collect()
    }
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(45.0)
    }
}
