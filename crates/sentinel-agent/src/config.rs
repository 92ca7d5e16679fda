use chrono::NaiveDate;
use scanner_runtime::ScanProfile;
use signal_core::SignalError;
use std::env;

/// Exchange timezone is fixed; anything else is a configuration error.
const EXCHANGE_TIMEZONE: &str = "America/New_York";

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    // Watchlist and scan cadence. The Option fields have different standard
    // and aggressive defaults: None means "use the mode default", Some means
    // the operator set the key explicitly and it wins in either mode.
    pub watchlist: Vec<String>,
    pub premarket_interval_s: Option<u64>,
    pub intraday_interval_s: Option<u64>,
    pub opportunity_interval_s: u64,
    pub intraday_price_threshold_pct: Option<f64>,
    pub intraday_volume_threshold_x: Option<f64>,
    pub intraday_cooldown_s: i64,
    pub intraday_max_positions: usize,
    pub opportunity_min_score: f64,
    pub opportunity_min_rr: f64,

    // Alerting
    pub telegram_enabled: bool,
    pub email_enabled: bool,
    pub desktop_enabled: bool,
    pub audio_enabled: bool,
    pub cooldown_premarket_s: i64,
    pub cooldown_intraday_s: i64,
    pub cooldown_opportunity_s: i64,

    // Market calendar
    pub holidays: Vec<NaiveDate>,

    // Data sources
    pub price_api_url: String,
    pub price_api_key: String,
    pub news_rss_feeds: Vec<(String, String)>,
    pub social_feed_url: Option<String>,

    // Persistence
    pub database_url: String,
    pub retention_days: i64,
}

impl SentinelConfig {
    /// Load from environment with validated defaults. Every failure names
    /// the offending key; the binary exits 2 on any of them.
    pub fn from_env() -> Result<Self, SignalError> {
        let timezone =
            env::var("MARKET_TIMEZONE").unwrap_or_else(|_| EXCHANGE_TIMEZONE.to_string());
        if timezone != EXCHANGE_TIMEZONE {
            return Err(SignalError::ConfigInvalid(format!(
                "MARKET_TIMEZONE must be {} (got '{}')",
                EXCHANGE_TIMEZONE, timezone
            )));
        }

        let watchlist: Vec<String> = env::var("WATCHLIST")
            .unwrap_or_else(|_| "AAPL,MSFT,GOOGL,AMZN,NVDA,TSLA,META,AMD,NFLX,SPY".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let holidays = parse_holidays(&env::var("MARKET_HOLIDAYS").unwrap_or_default())?;

        let news_rss_feeds = env::var("NEWS_RSS_FEEDS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, url)| (format!("rss-{}", i + 1), url.trim().to_string()))
            .collect();

        let config = Self {
            watchlist,
            premarket_interval_s: parse_env_opt("PREMARKET_SCAN_INTERVAL")?,
            intraday_interval_s: parse_env_opt("INTRADAY_SCAN_INTERVAL")?,
            opportunity_interval_s: parse_env("OPPORTUNITY_SCAN_INTERVAL", 3600)?,
            intraday_price_threshold_pct: parse_env_opt("INTRADAY_PRICE_THRESHOLD_PCT")?,
            intraday_volume_threshold_x: parse_env_opt("INTRADAY_VOLUME_THRESHOLD_X")?,
            intraday_cooldown_s: parse_env("INTRADAY_COOLDOWN_SECONDS", 300)?,
            intraday_max_positions: parse_env("INTRADAY_MAX_POSITIONS", 3)?,
            opportunity_min_score: parse_env("OPPORTUNITY_MIN_SCORE", 85.0)?,
            opportunity_min_rr: parse_env("OPPORTUNITY_MIN_RR", 2.5)?,

            telegram_enabled: parse_env("CHANNEL_TELEGRAM_ENABLED", true)?,
            email_enabled: parse_env("CHANNEL_EMAIL_ENABLED", true)?,
            desktop_enabled: parse_env("CHANNEL_DESKTOP_ENABLED", true)?,
            audio_enabled: parse_env("CHANNEL_AUDIO_ENABLED", true)?,
            cooldown_premarket_s: parse_env("ALERT_COOLDOWN_PREMARKET", 600)?,
            cooldown_intraday_s: parse_env("ALERT_COOLDOWN_INTRADAY", 300)?,
            cooldown_opportunity_s: parse_env("ALERT_COOLDOWN_OPPORTUNITY", 3600)?,

            holidays,

            price_api_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| "https://api.polygon.io".to_string()),
            price_api_key: env::var("PRICE_API_KEY").unwrap_or_default(),
            news_rss_feeds,
            social_feed_url: env::var("SOCIAL_FEED_URL").ok().filter(|s| !s.is_empty()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:sentinel.db".to_string()),
            retention_days: parse_env("RETENTION_DAYS", 90)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SignalError> {
        if self.watchlist.is_empty() {
            return Err(SignalError::ConfigInvalid(
                "WATCHLIST must contain at least one symbol".to_string(),
            ));
        }
        if self.premarket_interval_s == Some(0) || self.intraday_interval_s == Some(0) {
            return Err(SignalError::ConfigInvalid(
                "scan intervals must be positive (PREMARKET_SCAN_INTERVAL / INTRADAY_SCAN_INTERVAL)"
                    .to_string(),
            ));
        }
        if matches!(self.intraday_price_threshold_pct, Some(v) if v <= 0.0) {
            return Err(SignalError::ConfigInvalid(
                "INTRADAY_PRICE_THRESHOLD_PCT must be positive".to_string(),
            ));
        }
        if matches!(self.intraday_volume_threshold_x, Some(v) if v <= 0.0) {
            return Err(SignalError::ConfigInvalid(
                "INTRADAY_VOLUME_THRESHOLD_X must be positive".to_string(),
            ));
        }
        if self.intraday_max_positions == 0 {
            return Err(SignalError::ConfigInvalid(
                "INTRADAY_MAX_POSITIONS must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.opportunity_min_score) {
            return Err(SignalError::ConfigInvalid(
                "OPPORTUNITY_MIN_SCORE must be in [0, 100]".to_string(),
            ));
        }
        if self.opportunity_min_rr <= 0.0 {
            return Err(SignalError::ConfigInvalid(
                "OPPORTUNITY_MIN_RR must be positive".to_string(),
            ));
        }
        if self.retention_days <= 0 {
            return Err(SignalError::ConfigInvalid(
                "RETENTION_DAYS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Scan profile with config-level overrides applied on top of the mode
    /// defaults. Explicitly-set keys win in both modes; unset keys fall back
    /// to the selected mode's own values.
    pub fn scan_profile(&self, aggressive: bool) -> ScanProfile {
        let mut profile = if aggressive {
            ScanProfile::aggressive()
        } else {
            ScanProfile::standard()
        };
        if let Some(v) = self.premarket_interval_s {
            profile.premarket_interval_s = v;
        }
        if let Some(v) = self.intraday_interval_s {
            profile.intraday_interval_s = v;
        }
        if let Some(v) = self.intraday_price_threshold_pct {
            profile.intraday_price_threshold_pct = v;
        }
        if let Some(v) = self.intraday_volume_threshold_x {
            profile.intraday_volume_threshold_x = v;
        }
        profile.intraday_cooldown_s = self.intraday_cooldown_s;
        profile.intraday_max_positions = self.intraday_max_positions;
        profile.opportunity_min_score = self.opportunity_min_score;
        profile.opportunity_min_rr = self.opportunity_min_rr;
        profile
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, SignalError> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|_| {
            SignalError::ConfigInvalid(format!("{} has invalid value '{}'", key, raw))
        }),
        _ => Ok(default),
    }
}

/// Like `parse_env` but with no default: None when the key is unset.
fn parse_env_opt<T: std::str::FromStr>(key: &str) -> Result<Option<T>, SignalError> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|_| SignalError::ConfigInvalid(format!("{} has invalid value '{}'", key, raw))),
        _ => Ok(None),
    }
}

fn parse_holidays(raw: &str) -> Result<Vec<NaiveDate>, SignalError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
                SignalError::ConfigInvalid(format!("MARKET_HOLIDAYS entry '{}' is not YYYY-MM-DD", s))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holiday_parsing() {
        let dates = parse_holidays("2025-01-01, 2025-07-04").unwrap();
        assert_eq!(dates.len(), 2);
        assert!(parse_holidays("July 4th").is_err());
        assert!(parse_holidays("").unwrap().is_empty());
    }

    fn base_config() -> SentinelConfig {
        SentinelConfig {
            watchlist: vec!["AAPL".to_string()],
            premarket_interval_s: None,
            intraday_interval_s: None,
            opportunity_interval_s: 3600,
            intraday_price_threshold_pct: None,
            intraday_volume_threshold_x: None,
            intraday_cooldown_s: 240,
            intraday_max_positions: 5,
            opportunity_min_score: 80.0,
            opportunity_min_rr: 2.0,
            telegram_enabled: true,
            email_enabled: true,
            desktop_enabled: true,
            audio_enabled: true,
            cooldown_premarket_s: 600,
            cooldown_intraday_s: 300,
            cooldown_opportunity_s: 3600,
            holidays: vec![],
            price_api_url: "http://x".to_string(),
            price_api_key: "k".to_string(),
            news_rss_feeds: vec![],
            social_feed_url: None,
            database_url: "sqlite::memory:".to_string(),
            retention_days: 90,
        }
    }

    #[test]
    fn test_unset_keys_fall_back_to_mode_defaults() {
        let config = base_config();
        config.validate().unwrap();

        let standard = config.scan_profile(false);
        assert_eq!(standard.premarket_interval_s, 300);
        assert_eq!(standard.intraday_interval_s, 30);
        assert_eq!(standard.intraday_price_threshold_pct, 3.0);
        assert_eq!(standard.intraday_volume_threshold_x, 5.0);
        assert_eq!(standard.intraday_max_positions, 5);

        let aggressive = config.scan_profile(true);
        assert!(aggressive.aggressive);
        assert_eq!(aggressive.premarket_interval_s, 120);
        assert_eq!(aggressive.intraday_interval_s, 15);
        assert_eq!(aggressive.intraday_price_threshold_pct, 2.0);
        assert_eq!(aggressive.intraday_volume_threshold_x, 3.0);
    }

    #[test]
    fn test_explicit_overrides_win_in_both_modes() {
        let mut config = base_config();
        config.premarket_interval_s = Some(90);
        config.intraday_price_threshold_pct = Some(2.5);
        config.intraday_volume_threshold_x = Some(4.0);
        config.validate().unwrap();

        let standard = config.scan_profile(false);
        assert_eq!(standard.premarket_interval_s, 90);
        assert_eq!(standard.intraday_price_threshold_pct, 2.5);
        assert_eq!(standard.intraday_volume_threshold_x, 4.0);

        let aggressive = config.scan_profile(true);
        assert_eq!(aggressive.premarket_interval_s, 90);
        assert_eq!(aggressive.intraday_price_threshold_pct, 2.5);
        assert_eq!(aggressive.intraday_volume_threshold_x, 4.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = base_config();
        config.intraday_price_threshold_pct = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.intraday_interval_s = Some(0);
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.intraday_max_positions = 0;
        assert!(config.validate().is_err());
    }
}
