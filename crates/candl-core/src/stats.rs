//! Return statistics over closing-price windows.

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Compute sample standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

fn is_valid_close(close: f64) -> bool {
    close.is_finite() && close > 0.0
}

/// Day-over-day fractional returns. Only pairs where both closes are valid
/// (finite, positive) contribute, so a bad print never produces an
/// infinite or negative-base return.
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| is_valid_close(w[0]) && is_valid_close(w[1]))
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
