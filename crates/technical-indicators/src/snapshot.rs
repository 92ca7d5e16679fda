use serde::{Deserialize, Serialize};
use signal_core::Bar;

use crate::indicators::*;

/// Point-in-time indicator values for the last bar of a series. A pure
/// function of the preceding bars; fields are None while the series is too
/// short for the indicator to be defined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_20: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub adx_14: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub atr_14: Option<f64>,
    pub obv: Option<f64>,
    pub vwap: Option<f64>,
    pub mfi_14: Option<f64>,
    pub roc_30: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
}

impl IndicatorSet {
    pub fn from_series(bars: &[Bar]) -> Self {
        if bars.is_empty() {
            return Self::default();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let macd_result = macd(&closes, 12, 26, 9);
        let adx_result = adx(bars, 14);
        let bb = bollinger_bands(&closes, 20, 2.0);

        Self {
            close: closes.last().copied(),
            sma_20: sma(&closes, 20).last().copied(),
            sma_50: sma(&closes, 50).last().copied(),
            sma_200: sma(&closes, 200).last().copied(),
            ema_20: ema(&closes, 20).last().copied(),
            rsi_14: rsi(&closes, 14).last().copied(),
            macd: macd_result.macd_line.last().copied(),
            macd_signal: macd_result.signal_line.last().copied(),
            macd_histogram: macd_result.histogram.last().copied(),
            adx_14: adx_result.adx.last().copied(),
            plus_di: adx_result.plus_di.last().copied(),
            minus_di: adx_result.minus_di.last().copied(),
            atr_14: atr(bars, 14).last().copied(),
            obv: obv(bars).last().copied(),
            vwap: vwap(bars).last().copied(),
            mfi_14: mfi(bars, 14).last().copied(),
            roc_30: roc(&closes, 30).last().copied(),
            bollinger_upper: bb.upper.last().copied(),
            bollinger_middle: bb.middle.last().copied(),
            bollinger_lower: bb.lower.last().copied(),
        }
    }
}
