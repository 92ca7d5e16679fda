use chrono::{DateTime, Duration, Utc};
use sentiment_engine::SentimentEngine;
use signal_core::{
    validate_series, Article, Bar, ComponentScores, Conviction, MonthlyScore, Recommendation,
    SignalError, SocialPost, Symbol,
};
use technical_indicators::{macd, obv, rsi, IndicatorSet};

pub mod components;
pub mod divergence;

use components::{momentum_score, sentiment_score, trend_score, volume_score, SOCIAL_WINDOW_DAYS};
use divergence::Divergence;

/// Minimum daily bars for a scored signal; below this the engine returns a
/// low-confidence HOLD instead of raising.
pub const MIN_BARS: usize = 60;
/// Bars at which indicator confidence saturates.
pub const FULL_HISTORY_BARS: usize = 200;
/// Articles at which sentiment confidence saturates.
pub const FULL_ARTICLE_COUNT: usize = 30;

const DIVERGENCE_LOOKBACK: usize = 40;

/// Composite monthly-signal scorer. Pure: identical inputs produce identical
/// outputs (the lexicons are static and `as_of` is supplied by the caller).
pub struct ScoringEngine {
    sentiment: SentimentEngine,
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self {
            sentiment: SentimentEngine::new(),
        }
    }

    /// Score a symbol from its daily series, recent articles and optional
    /// social mentions.
    pub fn score(
        &self,
        symbol: &Symbol,
        bars: &[Bar],
        articles: &[Article],
        posts: &[SocialPost],
        as_of: DateTime<Utc>,
    ) -> Result<MonthlyScore, SignalError> {
        if bars.is_empty() {
            return Err(SignalError::InsufficientHistory(format!(
                "no daily bars for {}",
                symbol
            )));
        }
        validate_series(bars)?;

        if bars.len() < MIN_BARS {
            return Ok(self.insufficient_history(symbol, bars, as_of));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let ind = IndicatorSet::from_series(bars);

        let macd_result = macd(&closes, 12, 26, 9);
        let prev_histogram = macd_result
            .histogram
            .len()
            .checked_sub(2)
            .and_then(|i| macd_result.histogram.get(i))
            .copied();

        let trend = trend_score(&ind, &closes);
        let momentum = momentum_score(&ind, prev_histogram);

        let social_cutoff = as_of - Duration::days(SOCIAL_WINDOW_DAYS);
        let recent_posts: Vec<SocialPost> = posts
            .iter()
            .filter(|p| p.posted_at >= social_cutoff && p.posted_at <= as_of)
            .cloned()
            .collect();
        let social_polarity = self.sentiment.social_polarity(&recent_posts);
        let sentiment = sentiment_score(articles, social_polarity, as_of);

        let divergence = self.divergence_score(&closes, bars);
        let volume = volume_score(&ind, &volumes);

        let component_scores = ComponentScores {
            trend: trend.score.clamp(0.0, 100.0),
            momentum: momentum.score.clamp(0.0, 100.0),
            sentiment: sentiment.score.clamp(0.0, 100.0),
            divergence: divergence.score.clamp(0.0, 100.0),
            volume: volume.score.clamp(0.0, 100.0),
        };
        let total = component_scores.weighted_total().clamp(0.0, 100.0);

        let mut reasons = Vec::new();
        reasons.extend(trend.reasons);
        reasons.extend(momentum.reasons);
        reasons.extend(sentiment.reasons);
        reasons.extend(divergence.reasons);
        reasons.extend(volume.reasons);

        let mut recommendation = Recommendation::from_total(total);
        let conviction = Conviction::from_total(total);

        let last_close = closes[closes.len() - 1];
        let mut entry = None;
        let mut stop = None;
        let mut target = None;
        let mut risk_reward = None;
        if total >= 60.0 {
            match trade_parameters(total, last_close) {
                Some(params) => {
                    entry = Some(params.entry);
                    stop = Some(params.stop);
                    target = Some(params.target);
                    risk_reward = Some(params.risk_reward);
                }
                None => {
                    // Risk/reward under 2.0 downgrades to HOLD with no levels
                    recommendation = Recommendation::Hold;
                    reasons.push("risk/reward below 2.0".to_string());
                }
            }
        }

        let indicator_confidence = (bars.len() as f64 / FULL_HISTORY_BARS as f64).min(1.0);
        let sentiment_confidence =
            (sentiment.article_count as f64 / FULL_ARTICLE_COUNT as f64).min(1.0);
        let confidence = 0.75 * indicator_confidence + 0.25 * sentiment_confidence;

        Ok(MonthlyScore {
            symbol: symbol.clone(),
            as_of,
            total,
            components: component_scores,
            recommendation,
            conviction,
            entry,
            stop,
            target,
            risk_reward,
            confidence,
            reasons,
        })
    }

    fn insufficient_history(
        &self,
        symbol: &Symbol,
        bars: &[Bar],
        as_of: DateTime<Utc>,
    ) -> MonthlyScore {
        let neutral = ComponentScores {
            trend: 50.0,
            momentum: 50.0,
            sentiment: 50.0,
            divergence: 50.0,
            volume: 50.0,
        };
        MonthlyScore {
            symbol: symbol.clone(),
            as_of,
            total: neutral.weighted_total(),
            components: neutral,
            recommendation: Recommendation::Hold,
            conviction: Conviction::Low,
            entry: None,
            stop: None,
            target: None,
            risk_reward: None,
            confidence: (bars.len() as f64 / FULL_HISTORY_BARS as f64).min(0.29),
            reasons: vec!["INSUFFICIENT_HISTORY".to_string()],
        }
    }

    /// Divergence component (100 pts): price vs RSI (40), MACD histogram
    /// (30) and OBV (30) over the last 40 bars. Confirmation (no divergence)
    /// earns partial credit; bearish divergence earns none.
    fn divergence_score(&self, closes: &[f64], bars: &[Bar]) -> components::ComponentResult {
        let lookback = DIVERGENCE_LOOKBACK.min(closes.len());
        let price_tail = &closes[closes.len() - lookback..];

        let rsi_series = rsi(closes, 14);
        let macd_series = macd(closes, 12, 26, 9).histogram;
        let obv_series = obv(bars);

        let mut score = 0.0;
        let mut reasons = Vec::new();

        let checks: [(&str, &[f64], f64, f64); 3] = [
            ("RSI", &rsi_series, 40.0, 25.0),
            ("MACD", &macd_series, 30.0, 20.0),
            ("OBV", &obv_series, 30.0, 20.0),
        ];
        for (name, series, full, partial) in checks {
            let tail_len = lookback.min(series.len());
            if tail_len < 5 {
                score += partial;
                continue;
            }
            let series_tail = &series[series.len() - tail_len..];
            match divergence::detect(price_tail, series_tail) {
                Divergence::Bullish => {
                    score += full;
                    reasons.push(format!("bullish {} divergence", name));
                }
                Divergence::None => score += partial,
                Divergence::Bearish => {
                    reasons.push(format!("bearish {} divergence", name));
                }
            }
        }

        components::ComponentResult { score, reasons }
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Risk-managed trade levels for a qualifying score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeParameters {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
}

/// Stop/target percentages tighten as the score strengthens. Returns None
/// when the resulting risk/reward falls under 2.0 (the caller holds instead).
pub fn trade_parameters(total: f64, last_close: f64) -> Option<TradeParameters> {
    if last_close <= 0.0 {
        return None;
    }

    let (stop_pct, target_pct) = if total >= 90.0 {
        (0.06, 0.25)
    } else if total >= 85.0 {
        (0.08, 0.20)
    } else {
        (0.10, 0.15)
    };

    let entry = last_close;
    let stop = entry * (1.0 - stop_pct);
    let target = entry * (1.0 + target_pct);
    let risk_reward = ((target - entry) / (entry - stop) * 100.0).round() / 100.0;

    if risk_reward < 2.0 {
        return None;
    }
    Some(TradeParameters {
        entry,
        stop,
        target,
        risk_reward,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn symbol() -> Symbol {
        Symbol::new("ACME").unwrap()
    }

    fn daily_series(count: usize, drift: f64) -> Vec<Bar> {
        let symbol = symbol();
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 20, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let base = 80.0 + drift * i as f64 + ((i % 7) as f64 - 3.0) * 0.4;
                Bar {
                    symbol: symbol.clone(),
                    ts: start + Duration::days(i as i64),
                    open: base - 0.2,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base,
                    volume: 1_000_000.0 + (i % 11) as f64 * 40_000.0,
                }
            })
            .collect()
    }

    fn as_of(bars: &[Bar]) -> DateTime<Utc> {
        bars.last().unwrap().ts
    }

    #[test]
    fn test_scoring_is_pure() {
        let engine = ScoringEngine::new();
        let bars = daily_series(220, 0.2);
        let at = as_of(&bars);

        let a = engine.score(&symbol(), &bars, &[], &[], at).unwrap();
        let b = engine.score(&symbol(), &bars, &[], &[], at).unwrap();
        assert_eq!(a.total, b.total);
        assert_eq!(a.components.trend, b.components.trend);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_total_matches_weighted_components() {
        let engine = ScoringEngine::new();
        let bars = daily_series(220, 0.2);
        let score = engine.score(&symbol(), &bars, &[], &[], as_of(&bars)).unwrap();

        assert_eq!(score.total, score.components.weighted_total());
        for value in [
            score.total,
            score.components.trend,
            score.components.momentum,
            score.components.sentiment,
            score.components.divergence,
            score.components.volume,
        ] {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_insufficient_history_holds() {
        let engine = ScoringEngine::new();
        let bars = daily_series(40, 0.2);
        let score = engine.score(&symbol(), &bars, &[], &[], as_of(&bars)).unwrap();

        assert_eq!(score.recommendation, Recommendation::Hold);
        assert!(score.confidence < 0.3);
        assert!(score.entry.is_none());
        assert!(score.stop.is_none());
        assert!(score.target.is_none());
        assert!(score.reasons.contains(&"INSUFFICIENT_HISTORY".to_string()));
    }

    #[test]
    fn test_history_boundary_59_vs_60() {
        let engine = ScoringEngine::new();

        let short = daily_series(59, 0.2);
        let score = engine.score(&symbol(), &short, &[], &[], as_of(&short)).unwrap();
        assert!(score.reasons.contains(&"INSUFFICIENT_HISTORY".to_string()));

        let enough = daily_series(60, 0.2);
        let score = engine.score(&symbol(), &enough, &[], &[], as_of(&enough)).unwrap();
        assert!(!score.reasons.contains(&"INSUFFICIENT_HISTORY".to_string()));
        assert!(score.confidence < 1.0);
    }

    #[test]
    fn test_no_news_annotated() {
        let engine = ScoringEngine::new();
        let bars = daily_series(220, 0.2);
        let score = engine.score(&symbol(), &bars, &[], &[], as_of(&bars)).unwrap();

        assert_eq!(score.components.sentiment, 50.0);
        assert!(score.reasons.contains(&"NO_NEWS".to_string()));
    }

    #[test]
    fn test_invalid_series_raises() {
        let engine = ScoringEngine::new();
        let mut bars = daily_series(80, 0.2);
        bars[10].ts = bars[9].ts; // duplicate timestamp

        let err = engine
            .score(&symbol(), &bars, &[], &[], Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_SERIES");
    }

    #[test]
    fn test_empty_series_raises() {
        let engine = ScoringEngine::new();
        let err = engine
            .score(&symbol(), &[], &[], &[], Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), "INSUFFICIENT_HISTORY");
    }

    #[test]
    fn test_trade_parameter_bands() {
        // Score 92: 6% stop, 25% target
        let p = trade_parameters(92.0, 100.0).unwrap();
        assert!((p.stop - 94.0).abs() < 1e-9);
        assert!((p.target - 125.0).abs() < 1e-9);
        assert!((p.risk_reward - 4.17).abs() < 1e-9);

        // Score 87: 8% stop, 20% target, rr exactly 2.5
        let p = trade_parameters(87.0, 100.0).unwrap();
        assert!((p.stop - 92.0).abs() < 1e-9);
        assert!((p.target - 120.0).abs() < 1e-9);
        assert!((p.risk_reward - 2.5).abs() < 1e-9);

        // Score 70: 10% stop, 15% target -> rr 1.5, withheld
        assert!(trade_parameters(70.0, 100.0).is_none());
    }

    #[test]
    fn test_strong_buy_scenario_aggregation() {
        // A textbook strong setup: full trend alignment with ADX 32, perfect
        // momentum, 10 bullish articles at 0.6 polarity, no divergences,
        // strong volume
        let components = ComponentScores {
            trend: 90.0,
            momentum: 100.0,
            sentiment: 81.04,
            divergence: 65.0,
            volume: 100.0,
        };
        let total = components.weighted_total();
        assert_eq!(total, 87.0);
        assert_eq!(Recommendation::from_total(total), Recommendation::Buy);

        let p = trade_parameters(total, 100.0).unwrap();
        assert!((p.entry - 100.0).abs() < 1e-9);
        assert!((p.stop - 92.0).abs() < 1e-9);
        assert!((p.target - 120.0).abs() < 1e-9);
        assert!((p.risk_reward - 2.5).abs() < 1e-9);
    }
}
