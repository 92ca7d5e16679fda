use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use signal_core::{Alert, AlertPriority, Candidate, CandidateKind, Quota, RateLimiter, SignalError};
use signal_store::AlertStore;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub mod backoff;
pub mod channels;
pub mod format;

pub use backoff::RetryPolicy;
pub use channels::{AudioChannel, DesktopChannel, EmailChannel, TelegramChannel};

use async_trait::async_trait;

/// Errors a delivery channel can surface.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unconfigured: {0}")]
    Unconfigured(String),
    #[error("transient channel failure: {0}")]
    Transient(String),
    #[error("permanent channel failure: {0}")]
    Permanent(String),
}

impl ChannelError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Unconfigured(_) => "CHANNEL_UNCONFIGURED",
            ChannelError::Transient(_) => "CHANNEL_TRANSIENT",
            ChannelError::Permanent(_) => "CHANNEL_PERMANENT",
        }
    }
}

/// An opaque delivery channel.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError>;
}

/// Dispatcher tuning: per-kind dedup cooldowns and the transient retry
/// policy.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub cooldown_s: HashMap<CandidateKind, i64>,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let mut cooldown_s = HashMap::new();
        cooldown_s.insert(CandidateKind::PremarketCatalyst, 600);
        cooldown_s.insert(CandidateKind::IntradayPump, 300);
        cooldown_s.insert(CandidateKind::IntradayExit, 300);
        cooldown_s.insert(CandidateKind::Opportunity, 3600);
        Self {
            cooldown_s,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn cooldown(&self, kind: CandidateKind) -> chrono::Duration {
        chrono::Duration::seconds(*self.cooldown_s.get(&kind).unwrap_or(&300))
    }
}

/// Priority-routed, deduplicated alert delivery with channel fallback.
///
/// Routing: CRITICAL attempts every enabled channel regardless of earlier
/// success; HIGH walks telegram/desktop/audio and stops at the first clean
/// success; MEDIUM uses desktop only; LOW is logged. A first-attempt
/// transient failure falls through to the next channel immediately and the
/// failed channel is retried with backoff afterwards.
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn Channel>>,
    disabled: DashMap<String, String>,
    store: AlertStore,
    limiter: Arc<RateLimiter>,
    config: DispatcherConfig,
    retries_recorded: AtomicU64,
    delivered: AtomicU64,
    deduplicated: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn Channel>>,
        store: AlertStore,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            channels,
            disabled: DashMap::new(),
            store,
            limiter: Arc::new(RateLimiter::new(Quota { rps: 10.0, burst: 60.0 })),
            config,
            retries_recorded: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
        }
    }

    /// Wire discipline per channel: Telegram 20/min, Email 30/h.
    pub async fn register_channel_quotas(&self) {
        self.limiter
            .register("telegram", Quota::per_minute(20.0))
            .await;
        self.limiter.register("email", Quota::per_hour(30.0)).await;
    }

    /// Consume candidates until the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Candidate>) {
        while let Some(candidate) = rx.recv().await {
            if let Err(e) = self.dispatch(&candidate).await {
                tracing::error!(
                    "Dispatch failed for {} {}: {}",
                    candidate.symbol,
                    candidate.kind.as_str(),
                    e
                );
            }
        }
        tracing::info!("Alert dispatcher stopped (candidate channel closed)");
    }

    /// Dispatch one candidate. Returns None on a dedup drop.
    pub async fn dispatch(&self, candidate: &Candidate) -> Result<Option<Alert>, SignalError> {
        let cooldown = self.config.cooldown(candidate.kind);
        let mut alert = format::alert_from_candidate(candidate, cooldown);

        if !self.store.put_if_absent(&alert).await? {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Deduplicated {} {} alert in cooldown bucket",
                alert.symbol,
                alert.kind.as_str()
            );
            return Ok(None);
        }

        if alert.priority == AlertPriority::Low {
            tracing::info!("[LOW] {} -- {}", alert.title, alert.body.replace('\n', " | "));
            return Ok(Some(alert));
        }

        let route = self.route(alert.priority);
        let mut attempted: Vec<String> = Vec::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut retry_queue: Vec<Arc<dyn Channel>> = Vec::new();

        for channel in route {
            let name = channel.name().to_string();
            if self.disabled.contains_key(&name) {
                continue;
            }

            attempted.push(name.clone());
            match self.try_send(&channel, &alert).await {
                Ok(()) => {
                    succeeded.insert(name);
                    if alert.priority != AlertPriority::Critical {
                        break;
                    }
                }
                Err(ChannelError::Transient(e)) => {
                    tracing::warn!("Channel {} transient failure: {}", name, e);
                    retry_queue.push(channel);
                }
                Err(ChannelError::Permanent(e)) => {
                    tracing::error!("Channel {} disabled permanently: {}", name, e);
                    self.disabled.insert(name, e);
                }
                Err(ChannelError::Unconfigured(e)) => {
                    tracing::info!("Channel {} unconfigured: {}", name, e);
                    self.disabled.insert(name.clone(), e);
                    attempted.retain(|n| n != &name);
                }
            }
        }

        for channel in retry_queue {
            if self.retry_send(&channel, &alert).await {
                succeeded.insert(channel.name().to_string());
            }
        }

        alert.channels_attempted = attempted.clone();
        alert.channels_succeeded = attempted
            .iter()
            .filter(|name| succeeded.contains(*name))
            .cloned()
            .collect();
        self.store
            .record_outcome(&alert.id, &alert.channels_attempted, &alert.channels_succeeded)
            .await?;

        if !alert.channels_succeeded.is_empty() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(
            "Alert {} [{}] delivered via {:?} (attempted {:?})",
            alert.title,
            alert.priority.as_str(),
            alert.channels_succeeded,
            alert.channels_attempted
        );
        Ok(Some(alert))
    }

    /// One rate-limited send attempt. A denied token maps to a transient
    /// failure per the wire discipline.
    async fn try_send(
        &self,
        channel: &Arc<dyn Channel>,
        alert: &Alert,
    ) -> Result<(), ChannelError> {
        if self
            .limiter
            .acquire_until(channel.name(), Instant::now())
            .await
            .is_err()
        {
            return Err(ChannelError::Transient(format!(
                "{} channel rate limit exceeded",
                channel.name()
            )));
        }
        channel.send(alert).await
    }

    /// Exponential-backoff retries after a transient first attempt. After
    /// exhaustion the failure is final for this alert only.
    async fn retry_send(&self, channel: &Arc<dyn Channel>, alert: &Alert) -> bool {
        for attempt in 1..=self.config.retry.max_retries {
            tokio::time::sleep(self.config.retry.delay(attempt)).await;
            self.retries_recorded.fetch_add(1, Ordering::Relaxed);

            match self.try_send(channel, alert).await {
                Ok(()) => return true,
                Err(ChannelError::Transient(e)) => {
                    tracing::warn!(
                        "Channel {} retry {}/{} failed: {}",
                        channel.name(),
                        attempt,
                        self.config.retry.max_retries,
                        e
                    );
                }
                Err(ChannelError::Permanent(e)) => {
                    self.disabled.insert(channel.name().to_string(), e);
                    return false;
                }
                Err(ChannelError::Unconfigured(e)) => {
                    self.disabled.insert(channel.name().to_string(), e);
                    return false;
                }
            }
        }
        false
    }

    /// Routing table by priority.
    fn route(&self, priority: AlertPriority) -> Vec<Arc<dyn Channel>> {
        self.channels
            .iter()
            .filter(|c| match priority {
                AlertPriority::Critical => true,
                AlertPriority::High => c.name() != "email",
                AlertPriority::Medium => c.name() == "desktop",
                AlertPriority::Low => false,
            })
            .cloned()
            .collect()
    }

    pub fn retries_recorded(&self) -> u64 {
        self.retries_recorded.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn deduplicated_count(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    /// Channel name -> disable reason, for health reporting.
    pub fn disabled_channels(&self) -> HashMap<String, String> {
        self.disabled
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
