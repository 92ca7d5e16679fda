use chrono::{DateTime, Duration, Utc};
use signal_core::Article;
use technical_indicators::{regression_slope, IndicatorSet};

/// Component score plus the human-readable notes it contributed.
#[derive(Debug, Clone)]
pub struct ComponentResult {
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Trend component (100 pts): MA alignment 40, ADX strength 30, monthly
/// regression direction 30. When -DI dominates, the alignment check runs on
/// the mirrored (bearish) condition.
pub fn trend_score(ind: &IndicatorSet, closes: &[f64]) -> ComponentResult {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let bearish_direction = matches!(
        (ind.plus_di, ind.minus_di),
        (Some(pdi), Some(mdi)) if mdi > pdi
    );

    // MA alignment (40 pts)
    if let (Some(close), Some(sma20), Some(sma50)) = (ind.close, ind.sma_20, ind.sma_50) {
        let orderings: Vec<bool> = match (ind.sma_200, bearish_direction) {
            (Some(sma200), false) => vec![
                close > sma20,
                sma20 > sma50,
                sma50 > sma200,
                close > sma200,
            ],
            (Some(sma200), true) => vec![
                close < sma20,
                sma20 < sma50,
                sma50 < sma200,
                close < sma200,
            ],
            // Short history: judge on the available averages
            (None, false) => vec![close > sma20, sma20 > sma50],
            (None, true) => vec![close < sma20, sma20 < sma50],
        };
        let holding = orderings.iter().filter(|&&b| b).count();
        let all = orderings.len();

        let ma_points = if holding == all {
            40.0
        } else if all == 4 && holding == 3 {
            25.0
        } else if (sma20 > sma50) != bearish_direction {
            15.0
        } else {
            0.0
        };
        score += ma_points;
        if ma_points >= 40.0 {
            reasons.push(if bearish_direction {
                "full bearish MA alignment".to_string()
            } else {
                "full bullish MA alignment".to_string()
            });
        }
    }

    // ADX strength (30 pts)
    if let Some(adx) = ind.adx_14 {
        let adx_points = if adx >= 50.0 {
            30.0
        } else if adx >= 25.0 {
            20.0
        } else if adx >= 15.0 {
            10.0
        } else {
            0.0
        };
        score += adx_points;
        if adx >= 25.0 {
            reasons.push(format!("trending (ADX {:.0})", adx));
        }
    }

    // Monthly direction (30 pts): regression slope over the last 21 closes
    if closes.len() >= 21 {
        let window = &closes[closes.len() - 21..];
        if let Some(fit) = regression_slope(window) {
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let rel = if mean > 0.0 { fit.slope / mean } else { 0.0 };
            let significant = fit.slope.abs() > 2.0 * fit.stderr;

            let direction_points = if rel > 0.0005 && significant {
                reasons.push("rising monthly trend".to_string());
                30.0
            } else if rel > 0.0005 {
                15.0
            } else if rel.abs() <= 0.0005 {
                10.0
            } else {
                0.0
            };
            score += direction_points;
        }
    }

    ComponentResult { score, reasons }
}

/// Momentum component (100 pts): RSI band 35, MACD histogram state 35,
/// ROC(30) 30. Healthy momentum beats extremes.
pub fn momentum_score(ind: &IndicatorSet, prev_macd_histogram: Option<f64>) -> ComponentResult {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if let Some(rsi) = ind.rsi_14 {
        let rsi_points = if (40.0..=60.0).contains(&rsi) {
            35.0
        } else if (rsi > 30.0 && rsi < 40.0) || (rsi > 60.0 && rsi < 70.0) {
            25.0
        } else if (25.0..=30.0).contains(&rsi) || (70.0..=75.0).contains(&rsi) {
            15.0
        } else {
            0.0
        };
        score += rsi_points;
        if rsi_points >= 35.0 {
            reasons.push(format!("healthy RSI {:.0}", rsi));
        } else if rsi >= 70.0 {
            reasons.push(format!("overbought RSI {:.0}", rsi));
        } else if rsi <= 30.0 {
            reasons.push(format!("oversold RSI {:.0}", rsi));
        }
    }

    if let Some(hist) = ind.macd_histogram {
        let rising = prev_macd_histogram.map(|prev| hist > prev).unwrap_or(false);
        let macd_points = match (hist > 0.0, rising) {
            (true, true) => 35.0,
            (true, false) => 25.0,
            (false, true) => 15.0,
            (false, false) => 0.0,
        };
        score += macd_points;
        if macd_points >= 35.0 {
            reasons.push("MACD histogram rising above zero".to_string());
        }
    }

    if let Some(roc) = ind.roc_30 {
        let roc_points = if roc >= 15.0 {
            30.0
        } else if roc >= 5.0 {
            20.0
        } else if roc >= -5.0 {
            10.0
        } else {
            0.0
        };
        score += roc_points;
        if roc >= 15.0 {
            reasons.push(format!("30-day momentum {:+.1}%", roc));
        }
    }

    ComponentResult { score, reasons }
}

pub const NEWS_WINDOW_DAYS: i64 = 30;
pub const SOCIAL_WINDOW_DAYS: i64 = 7;

/// Sentiment inputs after windowing, for the confidence calculation.
pub struct SentimentResult {
    pub score: f64,
    pub article_count: usize,
    pub no_news: bool,
    pub reasons: Vec<String>,
}

/// Sentiment component (100 pts): recency/length-weighted news polarity
/// blended 60/40 with the engagement-weighted social polarity, mapped onto
/// [0,100] with a small article-volume boost. Weights renormalize when one
/// side is absent; no data at all scores neutral 50 with a NO_NEWS note.
pub fn sentiment_score(
    articles: &[Article],
    social_polarity: Option<f64>,
    as_of: DateTime<Utc>,
) -> SentimentResult {
    let news_cutoff = as_of - Duration::days(NEWS_WINDOW_DAYS);

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut article_count = 0usize;
    for article in articles {
        if article.published_at < news_cutoff || article.published_at > as_of {
            continue;
        }
        let Some(sentiment) = article.sentiment else {
            continue;
        };
        article_count += 1;

        let age_days = (as_of - article.published_at).num_seconds() as f64 / 86_400.0;
        let recency = (1.0 - age_days / NEWS_WINDOW_DAYS as f64).max(0.0);
        let length_factor = (article.body.len() as f64 / 500.0).min(1.0);
        let weight = recency * length_factor;
        if weight > 0.0 {
            weighted += sentiment.polarity * weight;
            total_weight += weight;
        }
    }
    let news_polarity = if total_weight > 0.0 {
        Some(weighted / total_weight)
    } else {
        None
    };

    let polarity = match (news_polarity, social_polarity) {
        (Some(n), Some(s)) => Some(0.6 * n + 0.4 * s),
        (Some(n), None) => Some(n),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    };

    match polarity {
        Some(p) => {
            let base = 50.0 * (p + 1.0);
            let boost = (1.0 + article_count as f64).log10().min(10.0);
            let score = (base + boost).clamp(0.0, 100.0);
            let reasons = if p >= 0.15 {
                vec![format!("bullish news flow ({} articles)", article_count)]
            } else if p <= -0.15 {
                vec![format!("bearish news flow ({} articles)", article_count)]
            } else {
                vec![]
            };
            SentimentResult {
                score,
                article_count,
                no_news: false,
                reasons,
            }
        }
        None => SentimentResult {
            score: 50.0,
            article_count: 0,
            no_news: true,
            reasons: vec!["NO_NEWS".to_string()],
        },
    }
}

/// Volume component (100 pts): 5-vs-20 day volume trend 40, VWAP position
/// 30, MFI band 30.
pub fn volume_score(ind: &IndicatorSet, volumes: &[f64]) -> ComponentResult {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if volumes.len() >= 20 {
        let last5: f64 = volumes[volumes.len() - 5..].iter().sum::<f64>() / 5.0;
        let last20: f64 = volumes[volumes.len() - 20..].iter().sum::<f64>() / 20.0;
        if last20 > 0.0 {
            let ratio = last5 / last20;
            let trend_points = if ratio >= 1.5 {
                40.0
            } else if ratio >= 1.2 {
                25.0
            } else if ratio >= 0.9 {
                10.0
            } else {
                0.0
            };
            score += trend_points;
            if ratio >= 1.5 {
                reasons.push(format!("volume expanding {:.1}x", ratio));
            }
        }
    }

    if let (Some(close), Some(vwap)) = (ind.close, ind.vwap) {
        if close > vwap {
            let distance = (close - vwap) / vwap * 100.0;
            score += if distance > 1.0 { 30.0 } else { 20.0 };
        }
    }

    if let Some(mfi) = ind.mfi_14 {
        let mfi_points = if (40.0..=60.0).contains(&mfi) {
            30.0
        } else if (30.0..40.0).contains(&mfi) || (60.0..=70.0).contains(&mfi) {
            15.0
        } else {
            0.0
        };
        score += mfi_points;
    }

    ComponentResult { score, reasons }
}
