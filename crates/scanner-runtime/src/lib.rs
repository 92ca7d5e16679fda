use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use signal_core::{AlertPriority, Candidate, Symbol};
use tokio::sync::mpsc;

pub mod intraday;
pub mod opportunity;
pub mod premarket;

pub use intraday::IntradayScanner;
pub use opportunity::OpportunityScanner;
pub use premarket::PremarketScanner;

/// Candidate channel capacity shared by all scanners.
pub const CANDIDATE_CHANNEL_CAPACITY: usize = 1024;

/// Consecutive failures before a symbol is quarantined for the session.
pub const QUARANTINE_THRESHOLD: u32 = 5;

/// Tunable scan thresholds; `aggressive` trades selectivity for latency.
#[derive(Debug, Clone)]
pub struct ScanProfile {
    pub aggressive: bool,
    pub premarket_interval_s: u64,
    pub intraday_interval_s: u64,
    /// Momentum breakout: minimum 10-minute move, percent.
    pub intraday_price_threshold_pct: f64,
    /// Momentum breakout: minimum volume ratio.
    pub intraday_volume_threshold_x: f64,
    /// Minimum intraday candidate score.
    pub intraday_min_score: f64,
    /// Per-symbol re-alert cooldown, seconds.
    pub intraday_cooldown_s: i64,
    /// Concurrent intraday position cap.
    pub intraday_max_positions: usize,
    /// VWAP reversal band in ATRs.
    pub vwap_touch_atr: f64,
    pub opportunity_min_score: f64,
    pub opportunity_min_rr: f64,
    pub opportunity_min_component: f64,
    pub opportunity_min_volume_ratio: f64,
    pub opportunity_volatility_range: (f64, f64),
    pub opportunity_pool_size: usize,
}

impl ScanProfile {
    pub fn standard() -> Self {
        Self {
            aggressive: false,
            premarket_interval_s: 300,
            intraday_interval_s: 30,
            intraday_price_threshold_pct: 3.0,
            intraday_volume_threshold_x: 5.0,
            intraday_min_score: 75.0,
            intraday_cooldown_s: 300,
            intraday_max_positions: 3,
            vwap_touch_atr: 0.25,
            opportunity_min_score: 85.0,
            opportunity_min_rr: 2.5,
            opportunity_min_component: 70.0,
            opportunity_min_volume_ratio: 1.3,
            opportunity_volatility_range: (15.0, 80.0),
            opportunity_pool_size: 10,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            aggressive: true,
            premarket_interval_s: 120,
            intraday_interval_s: 15,
            intraday_price_threshold_pct: 2.0,
            intraday_volume_threshold_x: 3.0,
            intraday_min_score: 70.0,
            ..Self::standard()
        }
    }
}

/// Sending side of the bounded candidate channel. When the dispatcher falls
/// behind, CRITICAL candidates block until space frees; everything else is
/// dropped by policy and counted.
#[derive(Clone)]
pub struct CandidateTx {
    tx: mpsc::Sender<Candidate>,
    dropped: Arc<AtomicU64>,
}

impl CandidateTx {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Candidate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub async fn send(&self, candidate: Candidate) {
        match self.tx.try_send(candidate) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(candidate)) => {
                if candidate.priority() == AlertPriority::Critical {
                    // CRITICAL is never dropped; wait for space
                    if self.tx.send(candidate).await.is_err() {
                        tracing::warn!("Candidate channel closed; CRITICAL candidate lost");
                    }
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Candidate channel full: dropped {} candidate by policy",
                        candidate.kind.as_str()
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Candidate channel closed; candidate discarded");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-symbol failure accounting: consecutive errors quarantine a symbol for
/// the rest of the session.
#[derive(Default)]
pub struct SymbolHealth {
    failures: DashMap<Symbol, u32>,
    quarantined: DashSet<Symbol>,
}

impl SymbolHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&self, symbol: &Symbol) {
        self.failures.remove(symbol);
    }

    pub fn record_error(&self, symbol: &Symbol, kind: &str) {
        let mut count = self.failures.entry(symbol.clone()).or_insert(0);
        *count += 1;
        if *count >= QUARANTINE_THRESHOLD {
            drop(count);
            self.failures.remove(symbol);
            if self.quarantined.insert(symbol.clone()) {
                tracing::warn!(
                    "Quarantined {} after {} consecutive failures (last: {})",
                    symbol,
                    QUARANTINE_THRESHOLD,
                    kind
                );
            }
        }
    }

    pub fn is_quarantined(&self, symbol: &Symbol) -> bool {
        self.quarantined.contains(symbol)
    }

    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }
}

/// Counters exposed through `Health()` and the shutdown summary.
#[derive(Default)]
pub struct ScannerMetrics {
    pub ticks: AtomicU64,
    pub candidates: AtomicU64,
    pub errors: AtomicU64,
    pub symbols_scanned: AtomicU64,
}

impl ScannerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "ticks": self.ticks.load(Ordering::Relaxed),
            "candidates": self.candidates.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
            "symbols_scanned": self.symbols_scanned.load(Ordering::Relaxed),
        })
    }
}
