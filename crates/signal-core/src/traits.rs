use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Article, Bar, SignalError, SocialPost, Symbol};

/// Source of OHLCV bars.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_daily(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError>;

    async fn fetch_intraday(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError>;
}

/// One configured news adapter (an RSS URL, an HTML feed, ...). Failures are
/// isolated per source by the aggregator.
#[async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    /// Articles published since `since` (best effort; the aggregator dedups).
    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<Article>, SignalError>;
}

/// Source of social posts with engagement counts.
#[async_trait]
pub trait SocialSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<SocialPost>, SignalError>;
}
