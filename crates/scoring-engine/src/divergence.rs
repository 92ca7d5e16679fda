/// Divergence between price and a confirming indicator over a lookback
/// window: price makes a lower low while the indicator makes a higher low
/// (bullish), or a higher high against a lower high (bearish).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    Bullish,
    Bearish,
    None,
}

/// Local minima with one-bar confirmation on each side.
fn troughs(data: &[f64]) -> Vec<(usize, f64)> {
    let mut out = Vec::new();
    for i in 1..data.len().saturating_sub(1) {
        if data[i] < data[i - 1] && data[i] < data[i + 1] {
            out.push((i, data[i]));
        }
    }
    out
}

fn peaks(data: &[f64]) -> Vec<(usize, f64)> {
    let mut out = Vec::new();
    for i in 1..data.len().saturating_sub(1) {
        if data[i] > data[i - 1] && data[i] > data[i + 1] {
            out.push((i, data[i]));
        }
    }
    out
}

/// Detect divergence between aligned price and indicator series. Both slices
/// must cover the same bars (tail-aligned by the caller). Bullish divergence
/// wins when both patterns are present.
pub fn detect(price: &[f64], indicator: &[f64]) -> Divergence {
    let n = price.len().min(indicator.len());
    if n < 5 {
        return Divergence::None;
    }
    let price = &price[price.len() - n..];
    let indicator = &indicator[indicator.len() - n..];

    let price_troughs = troughs(price);
    let ind_troughs = troughs(indicator);
    if price_troughs.len() >= 2 && ind_troughs.len() >= 2 {
        let pt = &price_troughs[price_troughs.len() - 2..];
        let it = &ind_troughs[ind_troughs.len() - 2..];
        if pt[1].1 < pt[0].1 && it[1].1 > it[0].1 {
            return Divergence::Bullish;
        }
    }

    let price_peaks = peaks(price);
    let ind_peaks = peaks(indicator);
    if price_peaks.len() >= 2 && ind_peaks.len() >= 2 {
        let pp = &price_peaks[price_peaks.len() - 2..];
        let ip = &ind_peaks[ind_peaks.len() - 2..];
        if pp[1].1 > pp[0].1 && ip[1].1 < ip[0].1 {
            return Divergence::Bearish;
        }
    }

    Divergence::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullish_divergence() {
        // Price: trough at 90, then a lower trough at 85
        let price = vec![100.0, 90.0, 96.0, 95.0, 85.0, 92.0];
        // Indicator: trough at 30, then a higher trough at 35
        let indicator = vec![50.0, 30.0, 45.0, 44.0, 35.0, 48.0];
        assert_eq!(detect(&price, &indicator), Divergence::Bullish);
    }

    #[test]
    fn test_bearish_divergence() {
        let price = vec![100.0, 110.0, 104.0, 105.0, 115.0, 108.0];
        let indicator = vec![50.0, 70.0, 55.0, 56.0, 65.0, 52.0];
        assert_eq!(detect(&price, &indicator), Divergence::Bearish);
    }

    #[test]
    fn test_confirming_series_has_no_divergence() {
        let price = vec![100.0, 90.0, 96.0, 95.0, 85.0, 92.0];
        // Indicator confirms price: lower lows in both
        let indicator = vec![50.0, 40.0, 46.0, 45.0, 35.0, 42.0];
        assert_eq!(detect(&price, &indicator), Divergence::None);
    }

    #[test]
    fn test_short_series_has_no_divergence() {
        assert_eq!(detect(&[1.0, 2.0], &[1.0, 2.0]), Divergence::None);
    }
}
