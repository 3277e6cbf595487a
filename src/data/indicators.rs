//! Rolling indicator math for the quote store
//! Implements SMA, sample volatility, and Wilder's RSI over daily closes

/// Window for the short moving average and volatility.
pub const SMA_WINDOW: usize = 5;

/// Lookback for Wilder's RSI.
pub const RSI_PERIOD: usize = 14;

/// Simple moving average of the last `window` values.
/// Returns None when fewer than `window` values are available.
pub fn sma(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window || window == 0 {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Corrected (n-1) sample standard deviation of the last `window` values.
/// Returns None when fewer than `window` values are available.
pub fn volatility(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window || window < 2 {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let variance =
        tail.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    Some(variance.sqrt())
}

/// Wilder's RSI over `period` price changes.
///
/// Seeds with the simple average of the first `period` gains/losses, then
/// applies Wilder smoothing for the remainder. Needs `period + 1` closes,
/// otherwise returns None.
pub fn rsi_wilder(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 || period == 0 {
        return None;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains.iter().take(period).sum::<f64>() / period as f64;
    let mut avg_loss = losses.iter().take(period).sum::<f64>() / period as f64;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_requires_full_window() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 5), None);
        let closes = [10.0, 11.0, 12.0, 13.0, 14.0];
        assert!((sma(&closes, 5).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma_uses_most_recent_values() {
        let closes = [100.0, 10.0, 11.0, 12.0, 13.0, 14.0];
        assert!((sma(&closes, 5).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_sample_stddev() {
        // stddev of [2,4,4,4,6] with n-1 correction = sqrt(8/4) ~= 1.414
        let closes = [2.0, 4.0, 4.0, 4.0, 6.0];
        let vol = volatility(&closes, 5).unwrap();
        assert!((vol - (2.0f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_flat_series_is_zero() {
        let closes = [5.0; 5];
        assert!(volatility(&closes, 5).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi_wilder(&closes, 14), None);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..=14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi_wilder(&closes, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_bounded_and_bullish() {
        let closes = [
            44.0, 44.25, 44.5, 43.75, 44.0, 44.25, 44.5, 44.75, 45.0, 45.25, 45.5, 45.75, 46.0,
            45.75, 45.5,
        ];
        let rsi = rsi_wilder(&closes, 14).unwrap();
        assert!(rsi > 50.0 && rsi < 100.0);
    }
}
