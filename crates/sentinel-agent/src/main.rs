//! sentinel: opportunity-detection and alerting pipeline for equity markets.
//!
//! Usage:
//!   sentinel run [--aggressive] [--premarket-only|--intraday-only|--opportunity-only]
//!   sentinel score <SYMBOL>
//!   sentinel scan once
//!   sentinel alerts recent --since <duration>
//!   sentinel alerts ack <id>
//!   sentinel health

use std::process::ExitCode;

use signal_core::{SignalError, Symbol};
use tokio::signal::unix::SignalKind;

mod config;
mod coordinator;

use config::SentinelConfig;
use coordinator::{Coordinator, RunMode};

const EXIT_GENERIC: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match SentinelConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let command = args.first().map(|s| s.as_str()).unwrap_or("run");
    let result = match command {
        "run" => cmd_run(config, &args).await,
        "score" => cmd_score(config, &args).await,
        "scan" => cmd_scan(config, &args).await,
        "alerts" => cmd_alerts(config, &args).await,
        "health" => cmd_health(config).await,
        other => {
            eprintln!("Unknown command '{}'", other);
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            match e {
                SignalError::ConfigInvalid(_) => ExitCode::from(EXIT_CONFIG),
                SignalError::Database(_) | SignalError::Internal(_) => {
                    ExitCode::from(EXIT_RUNTIME)
                }
                _ => ExitCode::from(EXIT_GENERIC),
            }
        }
    }
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn cmd_run(config: SentinelConfig, args: &[String]) -> Result<ExitCode, SignalError> {
    let aggressive = args.iter().any(|a| a == "--aggressive");
    let mode = if args.iter().any(|a| a == "--premarket-only") {
        RunMode::PremarketOnly
    } else if args.iter().any(|a| a == "--intraday-only") {
        RunMode::IntradayOnly
    } else if args.iter().any(|a| a == "--opportunity-only") {
        RunMode::OpportunityOnly
    } else {
        RunMode::All
    };

    tracing::info!(
        "Starting sentinel ({:?}, {})",
        mode,
        if aggressive { "aggressive" } else { "standard" }
    );

    let coordinator = Coordinator::new(config, aggressive).await?;
    coordinator.startup_checks().await?;
    coordinator.start(mode).await?;

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .map_err(|e| SignalError::Internal(e.to_string()))?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    coordinator.save_watchlist().await.ok();
    coordinator.stop().await;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_score(config: SentinelConfig, args: &[String]) -> Result<ExitCode, SignalError> {
    let Some(raw) = args.get(1) else {
        eprintln!("Usage: sentinel score <SYMBOL>");
        return Ok(ExitCode::from(EXIT_GENERIC));
    };
    let symbol = Symbol::new(raw)?;

    let coordinator = Coordinator::new(config, false).await?;
    let score = coordinator.score(&symbol).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&score).map_err(|e| SignalError::Internal(e.to_string()))?
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan(config: SentinelConfig, args: &[String]) -> Result<ExitCode, SignalError> {
    if args.get(1).map(|s| s.as_str()) != Some("once") {
        eprintln!("Usage: sentinel scan once");
        return Ok(ExitCode::from(EXIT_GENERIC));
    }

    let coordinator = Coordinator::new(config, false).await?;
    let candidates = coordinator.scan_once().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&candidates)
            .map_err(|e| SignalError::Internal(e.to_string()))?
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_alerts(config: SentinelConfig, args: &[String]) -> Result<ExitCode, SignalError> {
    match args.get(1).map(|s| s.as_str()) {
        Some("recent") => {
            let since = match args.iter().position(|a| a == "--since") {
                Some(i) => {
                    let Some(raw) = args.get(i + 1) else {
                        eprintln!("--since requires a duration (e.g. 15m, 2h, 7d)");
                        return Ok(ExitCode::from(EXIT_GENERIC));
                    };
                    parse_duration(raw)?
                }
                None => chrono::Duration::hours(24),
            };

            let coordinator = Coordinator::new(config, false).await?;
            let alerts = coordinator.recent_alerts(since).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&alerts)
                    .map_err(|e| SignalError::Internal(e.to_string()))?
            );
            Ok(ExitCode::SUCCESS)
        }
        Some("ack") => {
            let Some(id) = args.get(2) else {
                eprintln!("Usage: sentinel alerts ack <id>");
                return Ok(ExitCode::from(EXIT_GENERIC));
            };
            let coordinator = Coordinator::new(config, false).await?;
            if coordinator.ack_alert(id).await? {
                println!("acknowledged {}", id);
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("No unacknowledged alert with id {}", id);
                Ok(ExitCode::from(EXIT_GENERIC))
            }
        }
        _ => {
            eprintln!("Usage: sentinel alerts recent [--since <duration>] | sentinel alerts ack <id>");
            Ok(ExitCode::from(EXIT_GENERIC))
        }
    }
}

async fn cmd_health(config: SentinelConfig) -> Result<ExitCode, SignalError> {
    let coordinator = Coordinator::new(config, false).await?;
    let health = coordinator.health().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&health).map_err(|e| SignalError::Internal(e.to_string()))?
    );
    Ok(ExitCode::SUCCESS)
}

/// Parse durations of the form `90s`, `15m`, `2h`, `7d`.
fn parse_duration(raw: &str) -> Result<chrono::Duration, SignalError> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.len().saturating_sub(1));
    let amount: i64 = value
        .parse()
        .map_err(|_| SignalError::ConfigInvalid(format!("invalid duration '{}'", raw)))?;
    match unit {
        "s" => Ok(chrono::Duration::seconds(amount)),
        "m" => Ok(chrono::Duration::minutes(amount)),
        "h" => Ok(chrono::Duration::hours(amount)),
        "d" => Ok(chrono::Duration::days(amount)),
        _ => Err(SignalError::ConfigInvalid(format!(
            "invalid duration '{}' (expected s/m/h/d suffix)",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), chrono::Duration::seconds(90));
        assert_eq!(parse_duration("15m").unwrap(), chrono::Duration::minutes(15));
        assert_eq!(parse_duration("2h").unwrap(), chrono::Duration::hours(2));
        assert_eq!(parse_duration("7d").unwrap(), chrono::Duration::days(7));
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("").is_err());
    }
}
