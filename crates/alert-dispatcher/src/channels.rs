use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use signal_core::Alert;

use crate::format;
use crate::{Channel, ChannelError};

/// Telegram Bot API channel. Requires TELEGRAM_BOT_TOKEN and
/// TELEGRAM_CHAT_ID.
pub struct TelegramChannel {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramChannel {
    pub fn from_env() -> Result<Self, ChannelError> {
        let token = require_env("TELEGRAM_BOT_TOKEN")?;
        let chat_id = require_env("TELEGRAM_CHAT_ID")?;
        Ok(Self {
            client: reqwest::Client::new(),
            token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format::telegram_text(alert),
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 | 403 | 404 => Err(ChannelError::Permanent(format!(
                "telegram rejected credentials: HTTP {}",
                status
            ))),
            _ => Err(ChannelError::Transient(format!("telegram HTTP {}", status))),
        }
    }
}

/// SMTP channel. Requires SMTP_HOST, SMTP_FROM and SMTP_TO; SMTP_PORT,
/// SMTP_USER and SMTP_PASSWORD are optional.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn from_env() -> Result<Self, ChannelError> {
        let host = require_env("SMTP_HOST")?;
        let from_addr = require_env("SMTP_FROM")?;
        let to_raw = require_env("SMTP_TO")?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587);

        let from: Mailbox = from_addr
            .parse()
            .map_err(|e| ChannelError::Unconfigured(format!("invalid SMTP_FROM: {}", e)))?;
        let to: Vec<Mailbox> = to_raw
            .split(',')
            .filter_map(|addr| addr.trim().parse().ok())
            .collect();
        if to.is_empty() {
            return Err(ChannelError::Unconfigured(
                "no valid SMTP_TO addresses".to_string(),
            ));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
            .map_err(|e| ChannelError::Unconfigured(format!("SMTP transport: {}", e)))?
            .port(port);

        if let (Ok(user), Ok(pass)) = (std::env::var("SMTP_USER"), std::env::var("SMTP_PASSWORD"))
        {
            if !user.is_empty() && !pass.is_empty() {
                builder = builder.credentials(Credentials::new(user, pass));
            }
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let html = format::email_html(alert);
        for recipient in &self.to {
            let email = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(format::email_subject(alert))
                .header(ContentType::TEXT_HTML)
                .body(html.clone())
                .map_err(|e| ChannelError::Permanent(format!("email build: {}", e)))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| ChannelError::Transient(format!("smtp send: {}", e)))?;
        }
        Ok(())
    }
}

/// Desktop notification channel via `notify-send`.
pub struct DesktopChannel;

#[async_trait]
impl Channel for DesktopChannel {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let (title, body) = format::desktop_text(alert);
        let urgency = match alert.priority {
            signal_core::AlertPriority::Critical => "critical",
            signal_core::AlertPriority::High => "normal",
            _ => "low",
        };

        let status = tokio::process::Command::new("notify-send")
            .arg("--urgency")
            .arg(urgency)
            .arg(&title)
            .arg(&body)
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ChannelError::Unconfigured("notify-send not installed".to_string())
                }
                _ => ChannelError::Transient(e.to_string()),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::Transient(format!(
                "notify-send exited with {}",
                status
            )))
        }
    }
}

/// Audio channel: plays the configured sound file via `paplay`. Requires
/// ALERT_SOUND_FILE.
pub struct AudioChannel {
    sound_file: String,
}

impl AudioChannel {
    pub fn from_env() -> Result<Self, ChannelError> {
        let sound_file = require_env("ALERT_SOUND_FILE")?;
        Ok(Self { sound_file })
    }
}

#[async_trait]
impl Channel for AudioChannel {
    fn name(&self) -> &str {
        "audio"
    }

    async fn send(&self, _alert: &Alert) -> Result<(), ChannelError> {
        let status = tokio::process::Command::new("paplay")
            .arg(&self.sound_file)
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ChannelError::Unconfigured("paplay not installed".to_string())
                }
                _ => ChannelError::Transient(e.to_string()),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::Transient(format!(
                "paplay exited with {}",
                status
            )))
        }
    }
}

fn require_env(key: &str) -> Result<String, ChannelError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ChannelError::Unconfigured(format!("{} not set", key)))
}
