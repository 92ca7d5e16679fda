use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Scheduling seam for the scanner loops. Production uses a wall-clock
/// interval; tests drive ticks by hand for determinism.
#[async_trait]
pub trait Ticker: Send {
    /// Completes when the next tick is due. Returns false when the tick
    /// source is exhausted and the loop should stop.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker. Missed ticks are skipped rather than bursted, so a
/// long-running tick never causes overlapping work.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Test ticker fed from a channel; `tick` resolves once per pushed unit and
/// reports exhaustion when the sender side is dropped.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ManualTicker {
    pub fn new() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_ticker_drains_and_ends() {
        let (tx, mut ticker) = ManualTicker::new();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        drop(tx);

        assert!(ticker.tick().await);
        assert!(ticker.tick().await);
        assert!(!ticker.tick().await);
    }
}
