use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::SignalError;

/// Uppercase 1-6 character ticker. Identity for everything in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Result<Self, SignalError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() || normalized.len() > 6 {
            return Err(SignalError::SymbolUnknown(format!(
                "'{}' is not a valid ticker (1-6 characters)",
                raw
            )));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphabetic() || c == '.') {
            return Err(SignalError::SymbolUnknown(format!(
                "'{}' contains non-ticker characters",
                raw
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Symbol {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// OHLCV bar. `ts` sits on the bar boundary in exchange time
/// (16:00 ET for daily bars, minute boundaries intraday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// OHLC ordering and non-negative volume.
    pub fn validate(&self) -> Result<(), SignalError> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if !(self.low <= body_low && body_high <= self.high) {
            return Err(SignalError::InvalidSeries(format!(
                "{} bar at {} violates OHLC ordering",
                self.symbol, self.ts
            )));
        }
        if self.volume < 0.0 {
            return Err(SignalError::InvalidSeries(format!(
                "{} bar at {} has negative volume",
                self.symbol, self.ts
            )));
        }
        Ok(())
    }
}

/// Validate an ordered bar series: each bar well-formed, timestamps strictly
/// increasing, no duplicates.
pub fn validate_series(bars: &[Bar]) -> Result<(), SignalError> {
    for bar in bars {
        bar.validate()?;
    }
    for pair in bars.windows(2) {
        if pair[1].ts <= pair[0].ts {
            return Err(SignalError::InvalidSeries(format!(
                "series not strictly increasing at {}",
                pair[1].ts
            )));
        }
    }
    Ok(())
}

/// Catalyst priority tiers, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CatalystPriority {
    Medium,
    High,
    Critical,
}

impl CatalystPriority {
    /// Rank used in premarket scoring (CRITICAL=3, HIGH=2, MEDIUM=1).
    pub fn rank(&self) -> u32 {
        match self {
            CatalystPriority::Critical => 3,
            CatalystPriority::High => 2,
            CatalystPriority::Medium => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalystPriority::Critical => "CRITICAL",
            CatalystPriority::High => "HIGH",
            CatalystPriority::Medium => "MEDIUM",
        }
    }
}

/// A catalyst keyword hit on an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalystTag {
    pub keyword: String,
    pub priority: CatalystPriority,
}

/// Normalized news/social article. `symbol` is None for general-market
/// pieces; the aggregator fills it where a ticker can be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub symbol: Option<Symbol>,
    pub title: String,
    pub body: String,
    pub source: String,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub sentiment: Option<SentimentScore>,
    pub catalyst_tags: Vec<CatalystTag>,
}

impl Article {
    /// Dedup identity: sha256 of the URL when present, otherwise of
    /// source|title|published_at.
    pub fn compute_id(
        url: Option<&str>,
        source: &str,
        title: &str,
        published_at: DateTime<Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        match url {
            Some(u) if !u.is_empty() => hasher.update(u.as_bytes()),
            _ => {
                hasher.update(source.as_bytes());
                hasher.update(b"|");
                hasher.update(title.as_bytes());
                hasher.update(b"|");
                hasher.update(published_at.to_rfc3339().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Highest catalyst priority on this article, if any keyword hit.
    pub fn catalyst_priority(&self) -> Option<CatalystPriority> {
        self.catalyst_tags.iter().map(|t| t.priority).max()
    }
}

/// A social post with engagement, used by the sentiment aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: String,
    pub symbol: Option<Symbol>,
    pub text: String,
    pub source: String,
    pub engagement: f64,
    pub posted_at: DateTime<Utc>,
}

/// Sentiment label from polarity: >= +0.15 bullish, <= -0.15 bearish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Bullish,
    Neutral,
    Bearish,
}

impl SentimentLabel {
    pub fn from_polarity(polarity: f64) -> Self {
        if polarity >= 0.15 {
            SentimentLabel::Bullish
        } else if polarity <= -0.15 {
            SentimentLabel::Bearish
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Bullish => "bullish",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Bearish => "bearish",
        }
    }
}

/// Scored sentiment for a body of text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// [-1, +1]
    pub polarity: f64,
    /// [0, 1]
    pub confidence: f64,
    pub label: SentimentLabel,
}

impl SentimentScore {
    pub fn new(polarity: f64, confidence: f64) -> Self {
        let polarity = polarity.clamp(-1.0, 1.0);
        Self {
            polarity,
            confidence: confidence.clamp(0.0, 1.0),
            label: SentimentLabel::from_polarity(polarity),
        }
    }

    pub fn neutral() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Categorical recommendation from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    ModerateBuy,
    Hold,
    ModerateSell,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn from_total(total: f64) -> Self {
        match total.round() as i64 {
            90..=100 => Recommendation::StrongBuy,
            75..=89 => Recommendation::Buy,
            60..=74 => Recommendation::ModerateBuy,
            40..=59 => Recommendation::Hold,
            26..=39 => Recommendation::ModerateSell,
            11..=25 => Recommendation::Sell,
            _ => Recommendation::StrongSell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::ModerateBuy => "MODERATE_BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::ModerateSell => "MODERATE_SELL",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG_SELL",
        }
    }

    /// Advisory position size band for the tier.
    pub fn position_advice(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "5-10%",
            Recommendation::Buy => "3-5%",
            Recommendation::ModerateBuy => "1-3%",
            Recommendation::Hold => "0%",
            Recommendation::ModerateSell => "reduce 25-50%",
            Recommendation::Sell => "reduce 50-75%",
            Recommendation::StrongSell => "exit fully",
        }
    }
}

/// Conviction tier derived from the same score bands as the recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conviction {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl Conviction {
    pub fn from_total(total: f64) -> Self {
        match total.round() as i64 {
            90..=100 | 0..=10 => Conviction::VeryHigh,
            75..=89 | 11..=25 => Conviction::High,
            60..=74 | 26..=39 => Conviction::Medium,
            _ => Conviction::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Conviction::VeryHigh => "VERY_HIGH",
            Conviction::High => "HIGH",
            Conviction::Medium => "MEDIUM",
            Conviction::Low => "LOW",
        }
    }
}

/// The five component scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub trend: f64,
    pub momentum: f64,
    pub sentiment: f64,
    pub divergence: f64,
    pub volume: f64,
}

impl ComponentScores {
    /// Fixed component weights: 30/20/25/15/10.
    pub fn weighted_total(&self) -> f64 {
        (0.30 * self.trend
            + 0.20 * self.momentum
            + 0.25 * self.sentiment
            + 0.15 * self.divergence
            + 0.10 * self.volume)
            .round()
    }
}

/// Which scan produced a stored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanKind {
    Monthly,
    Premarket,
    Intraday,
    Opportunity,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Monthly => "MONTHLY",
            ScanKind::Premarket => "PREMARKET",
            ScanKind::Intraday => "INTRADAY",
            ScanKind::Opportunity => "OPPORTUNITY",
        }
    }
}

/// Composite monthly signal: total score, components, recommendation and
/// risk-managed trade parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyScore {
    pub symbol: Symbol,
    pub as_of: DateTime<Utc>,
    pub total: f64,
    pub components: ComponentScores,
    pub recommendation: Recommendation,
    pub conviction: Conviction,
    pub entry: Option<f64>,
    pub stop: Option<f64>,
    pub target: Option<f64>,
    pub risk_reward: Option<f64>,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Scanner output kind; drives payload interpretation and alert routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    PremarketCatalyst,
    IntradayPump,
    IntradayExit,
    Opportunity,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::PremarketCatalyst => "PREMARKET_CATALYST",
            CandidateKind::IntradayPump => "INTRADAY_PUMP",
            CandidateKind::IntradayExit => "INTRADAY_EXIT",
            CandidateKind::Opportunity => "OPPORTUNITY",
        }
    }
}

/// Kind-specific candidate payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CandidatePayload {
    Premarket {
        catalyst: CatalystPriority,
        headline: String,
        volume_ratio: f64,
        sentiment: f64,
    },
    Intraday {
        setup: String,
        price: f64,
        volume_ratio: f64,
        entry: f64,
        stop: f64,
        target: f64,
    },
    Exit {
        entry: f64,
        last_price: f64,
        reason: String,
    },
    Opportunity(Box<MonthlyScore>),
}

/// Pre-dispatch signal emitted by a scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: Symbol,
    pub kind: CandidateKind,
    pub score: f64,
    pub reasons: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub payload: CandidatePayload,
}

impl Candidate {
    /// Delivery priority for the dispatcher routing table.
    pub fn priority(&self) -> AlertPriority {
        match (&self.kind, &self.payload) {
            (CandidateKind::PremarketCatalyst, CandidatePayload::Premarket { catalyst, .. }) => {
                match catalyst {
                    CatalystPriority::Critical => AlertPriority::Critical,
                    CatalystPriority::High => AlertPriority::High,
                    CatalystPriority::Medium => AlertPriority::Medium,
                }
            }
            (CandidateKind::IntradayPump, _) => {
                if self.score >= 90.0 {
                    AlertPriority::Critical
                } else {
                    AlertPriority::High
                }
            }
            (CandidateKind::IntradayExit, _) => AlertPriority::High,
            (CandidateKind::Opportunity, _) => AlertPriority::Medium,
            _ => AlertPriority::Low,
        }
    }
}

/// Alert delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Critical => "CRITICAL",
            AlertPriority::High => "HIGH",
            AlertPriority::Medium => "MEDIUM",
            AlertPriority::Low => "LOW",
        }
    }
}

/// A dispatched (or dispatch-pending) alert row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub symbol: Symbol,
    pub kind: CandidateKind,
    pub priority: AlertPriority,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub channels_attempted: Vec<String>,
    pub channels_succeeded: Vec<String>,
    pub ack_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Cooldown-bucketed dedup id: two alerts for the same (symbol, kind)
    /// inside one cooldown bucket hash to the same id.
    pub fn dedup_id(
        symbol: &Symbol,
        kind: CandidateKind,
        created_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> String {
        let cooldown_s = cooldown.num_seconds().max(1);
        let bucket = created_at.timestamp().div_euclid(cooldown_s);
        let mut hasher = Sha256::new();
        hasher.update(symbol.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symbol_normalization() {
        let s = Symbol::new(" tsla ").unwrap();
        assert_eq!(s.as_str(), "TSLA");
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("TOOLONGX").is_err());
        assert!(Symbol::new("AB12").is_err());
    }

    #[test]
    fn test_bar_validation() {
        let mut bar = Bar {
            symbol: Symbol::new("AAPL").unwrap(),
            ts: Utc::now(),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 1000.0,
        };
        assert!(bar.validate().is_ok());

        bar.low = 100.5; // above the open
        assert!(bar.validate().is_err());
    }

    #[test]
    fn test_series_must_be_strictly_increasing() {
        let symbol = Symbol::new("AAPL").unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        let bar = |ts| Bar {
            symbol: symbol.clone(),
            ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        };
        let ok = vec![bar(ts), bar(ts + Duration::days(1))];
        assert!(validate_series(&ok).is_ok());

        let dup = vec![bar(ts), bar(ts)];
        assert!(validate_series(&dup).is_err());
    }

    #[test]
    fn test_article_id_prefers_url() {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let a = Article::compute_id(Some("https://example.com/x"), "feed-a", "Title", at);
        let b = Article::compute_id(Some("https://example.com/x"), "feed-b", "Other", at);
        assert_eq!(a, b);

        let c = Article::compute_id(None, "feed-a", "Title", at);
        let d = Article::compute_id(None, "feed-a", "Title", at + Duration::seconds(1));
        assert_ne!(c, d);
    }

    #[test]
    fn test_sentiment_label_thresholds() {
        assert_eq!(SentimentLabel::from_polarity(0.15), SentimentLabel::Bullish);
        assert_eq!(SentimentLabel::from_polarity(-0.15), SentimentLabel::Bearish);
        assert_eq!(SentimentLabel::from_polarity(0.1), SentimentLabel::Neutral);
    }

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(Recommendation::from_total(95.0), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_total(89.0), Recommendation::Buy);
        assert_eq!(Recommendation::from_total(60.0), Recommendation::ModerateBuy);
        assert_eq!(Recommendation::from_total(59.0), Recommendation::Hold);
        assert_eq!(Recommendation::from_total(30.0), Recommendation::ModerateSell);
        assert_eq!(Recommendation::from_total(11.0), Recommendation::Sell);
        assert_eq!(Recommendation::from_total(5.0), Recommendation::StrongSell);
    }

    #[test]
    fn test_weighted_total() {
        let c = ComponentScores {
            trend: 80.0,
            momentum: 70.0,
            sentiment: 60.0,
            divergence: 50.0,
            volume: 40.0,
        };
        // 24 + 14 + 15 + 7.5 + 4 = 64.5 -> 65 after rounding
        assert_eq!(c.weighted_total(), 65.0);
    }

    #[test]
    fn test_dedup_id_bucketing() {
        let symbol = Symbol::new("TSLA").unwrap();
        let cooldown = Duration::seconds(300);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();

        // 90 seconds apart, same bucket
        let a = Alert::dedup_id(&symbol, CandidateKind::IntradayPump, t0, cooldown);
        let b = Alert::dedup_id(
            &symbol,
            CandidateKind::IntradayPump,
            t0 + Duration::seconds(90),
            cooldown,
        );
        assert_eq!(a, b);

        // Next bucket differs
        let c = Alert::dedup_id(
            &symbol,
            CandidateKind::IntradayPump,
            t0 + Duration::seconds(300),
            cooldown,
        );
        assert_ne!(a, c);

        // Kind is part of the key
        let d = Alert::dedup_id(&symbol, CandidateKind::Opportunity, t0, cooldown);
        assert_ne!(a, d);
    }
}
