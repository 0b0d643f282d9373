//! Order statistics over heart-rate series
//!
//! - Median for the per-tick aggregate
//! - Linearly interpolated percentile for the representative episode heart rate

/// Percentile used for the representative heart rate of an episode
pub const REPRESENTATIVE_PERCENTILE: f64 = 0.95;

/// Median of a slice. Even-sized inputs average the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Percentile `pct` (0.0 - 1.0) with linear interpolation between the
/// closest order statistics.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !pct.is_finite() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let p = pct.clamp(0.0, 1.0);
    let pos = p * ((sorted.len() - 1) as f64);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - (lo as f64);

    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Representative heart rate of an episode: ceiling of the 95th percentile.
pub fn representative_heart_rate(values: &[f64]) -> Option<u16> {
    percentile(values, REPRESENTATIVE_PERCENTILE)
        .map(|p| p.ceil().clamp(0.0, u16::MAX as f64) as u16)
}
