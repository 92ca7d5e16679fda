use chrono::Duration;
use signal_core::{Alert, Candidate, CandidatePayload};

/// Build the stored alert for a candidate, with the dedup id derived from
/// the per-kind cooldown bucket.
pub fn alert_from_candidate(candidate: &Candidate, cooldown: Duration) -> Alert {
    let priority = candidate.priority();
    let id = Alert::dedup_id(
        &candidate.symbol,
        candidate.kind,
        candidate.detected_at,
        cooldown,
    );

    let title = format!(
        "{}: {}",
        kind_label(candidate),
        candidate.symbol
    );

    let mut lines = vec![format!("Score: {:.0}", candidate.score)];
    match &candidate.payload {
        CandidatePayload::Premarket {
            catalyst,
            headline,
            volume_ratio,
            ..
        } => {
            lines.push(format!("Catalyst: {} ({})", headline, catalyst.as_str()));
            lines.push(format!("Volume ratio: {:.1}x", volume_ratio));
        }
        CandidatePayload::Intraday {
            setup,
            price,
            volume_ratio,
            entry,
            stop,
            target,
        } => {
            lines.push(format!("Setup: {}", setup));
            lines.push(format!("Price: ${:.2}", price));
            lines.push(format!("Volume ratio: {:.1}x", volume_ratio));
            lines.push(format!(
                "Entry ${:.2} / Stop ${:.2} / Target ${:.2}",
                entry, stop, target
            ));
        }
        CandidatePayload::Exit {
            entry,
            last_price,
            reason,
        } => {
            lines.push(format!("Entered ${:.2}, now ${:.2}", entry, last_price));
            lines.push(format!("Reason: {}", reason));
        }
        CandidatePayload::Opportunity(score) => {
            lines.push(format!(
                "Recommendation: {} ({})",
                score.recommendation.as_str(),
                score.conviction.as_str()
            ));
            if let (Some(entry), Some(stop), Some(target), Some(rr)) =
                (score.entry, score.stop, score.target, score.risk_reward)
            {
                lines.push(format!(
                    "Entry ${:.2} / Stop ${:.2} / Target ${:.2} (R/R {:.2})",
                    entry, stop, target, rr
                ));
            }
        }
    }
    if !candidate.reasons.is_empty() {
        lines.push(format!("Reasons: {}", candidate.reasons.join("; ")));
    }
    lines.push(format!(
        "Detected: {}",
        candidate.detected_at.to_rfc3339()
    ));

    Alert {
        id,
        symbol: candidate.symbol.clone(),
        kind: candidate.kind,
        priority,
        title,
        body: lines.join("\n"),
        created_at: candidate.detected_at,
        channels_attempted: Vec::new(),
        channels_succeeded: Vec::new(),
        ack_at: None,
    }
}

fn kind_label(candidate: &Candidate) -> &'static str {
    match candidate.kind {
        signal_core::CandidateKind::PremarketCatalyst => "Premarket Catalyst",
        signal_core::CandidateKind::IntradayPump => "Intraday Pump",
        signal_core::CandidateKind::IntradayExit => "Intraday Exit",
        signal_core::CandidateKind::Opportunity => "Opportunity",
    }
}

/// Telegram rendering: Markdown subset, emoji by priority.
pub fn telegram_text(alert: &Alert) -> String {
    let emoji = match alert.priority {
        signal_core::AlertPriority::Critical => "\u{1F6A8}",
        signal_core::AlertPriority::High => "\u{26A0}\u{FE0F}",
        signal_core::AlertPriority::Medium => "\u{1F4CA}",
        signal_core::AlertPriority::Low => "\u{2139}\u{FE0F}",
    };
    format!(
        "{} *{}*\n_{}_\n{}",
        emoji,
        alert.title,
        alert.priority.as_str(),
        alert.body
    )
}

/// Email subject: `[PRIORITY] Kind: SYMBOL`.
pub fn email_subject(alert: &Alert) -> String {
    format!("[{}] {}", alert.priority.as_str(), alert.title)
}

/// Email HTML body with the alert fields in a table.
pub fn email_html(alert: &Alert) -> String {
    let rows: String = alert
        .body
        .lines()
        .map(|line| {
            let (key, value) = line.split_once(':').unwrap_or(("", line));
            format!(
                r#"<tr><td style="padding:8px 12px;color:#94a3b8;">{}</td><td style="padding:8px 12px;font-weight:600;">{}</td></tr>"#,
                escape_html(key),
                escape_html(value.trim())
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="margin:0;padding:0;background:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;">
<table width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;overflow:hidden;">
  <tr><td style="background:#1e293b;color:#fff;padding:12px 20px;font-size:18px;font-weight:700;">{}</td></tr>
  <tr><td><table style="width:100%;border-collapse:collapse;">{}</table></td></tr>
  <tr><td style="padding:12px 20px;border-top:1px solid #e2e8f0;color:#94a3b8;font-size:12px;">Sent at {} UTC</td></tr>
</table>
</body>
</html>"#,
        escape_html(&alert.title),
        rows,
        alert.created_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Desktop rendering: title capped at 64 chars, body at 256, plain text.
pub fn desktop_text(alert: &Alert) -> (String, String) {
    let title = truncate(&alert.title, 64);
    let body = truncate(&alert.body.replace('\n', " | "), 256);
    (title, body)
}

fn truncate(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        input.to_string()
    } else {
        let cut: String = input.chars().take(max.saturating_sub(1)).collect();
        format!("{}\u{2026}", cut)
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use signal_core::{CandidateKind, CatalystPriority, Symbol};

    fn candidate() -> Candidate {
        Candidate {
            symbol: Symbol::new("ACME").unwrap(),
            kind: CandidateKind::PremarketCatalyst,
            score: 80.0,
            reasons: vec!["fda approval".to_string()],
            detected_at: Utc.with_ymd_and_hms(2025, 6, 2, 10, 15, 0).unwrap(),
            payload: CandidatePayload::Premarket {
                catalyst: CatalystPriority::Critical,
                headline: "ACME receives FDA approval".to_string(),
                volume_ratio: 4.2,
                sentiment: 0.6,
            },
        }
    }

    #[test]
    fn test_alert_fields() {
        let alert = alert_from_candidate(&candidate(), Duration::seconds(300));
        assert_eq!(alert.title, "Premarket Catalyst: ACME");
        assert_eq!(alert.priority.as_str(), "CRITICAL");
        assert!(alert.body.contains("Volume ratio: 4.2x"));
        assert!(alert.body.contains("Detected: 2025-06-02T10:15:00+00:00"));
    }

    #[test]
    fn test_same_bucket_same_id() {
        let a = alert_from_candidate(&candidate(), Duration::seconds(300));
        let mut later = candidate();
        later.detected_at = later.detected_at + Duration::seconds(90);
        let b = alert_from_candidate(&later, Duration::seconds(300));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_desktop_limits() {
        let mut alert = alert_from_candidate(&candidate(), Duration::seconds(300));
        alert.title = "x".repeat(100);
        alert.body = "y".repeat(500);
        let (title, body) = desktop_text(&alert);
        assert!(title.chars().count() <= 64);
        assert!(body.chars().count() <= 256);
    }

    #[test]
    fn test_telegram_markdown() {
        let alert = alert_from_candidate(&candidate(), Duration::seconds(300));
        let text = telegram_text(&alert);
        assert!(text.contains("*Premarket Catalyst: ACME*"));
        assert!(text.contains("Score: 80"));
    }

    #[test]
    fn test_email_subject() {
        let alert = alert_from_candidate(&candidate(), Duration::seconds(300));
        assert_eq!(email_subject(&alert), "[CRITICAL] Premarket Catalyst: ACME");
    }
}
