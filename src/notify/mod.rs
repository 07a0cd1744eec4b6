pub mod email;
pub mod slack;
pub mod telegram;

use crate::alerts::AlertEvent;
use crate::config::{ChannelConfig, ConfigError};
use email::EmailNotifier;
use slack::SlackNotifier;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use telegram::TelegramNotifier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
    #[error("smtp transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("email build error: {0}")]
    Build(String),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Human-readable rendering of an alert, shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub host: String,
    pub text: String,
}

impl AlertMessage {
    pub fn from_event(event: &AlertEvent) -> Self {
        let measured_at = UNIX_EPOCH + Duration::from_secs(event.reading.timestamp.max(0) as u64);
        Self {
            host: event.host.clone(),
            text: format!(
                "Disk usage alert: host '{}' mount '{}' is at {}% (threshold {}%), measured {}",
                event.host,
                event.reading.mount_point,
                event.reading.used_percent,
                event.threshold,
                format_time(measured_at),
            ),
        }
    }
}

fn format_time(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at).to_string()
}

pub enum Notifier {
    Slack(SlackNotifier),
    Email(EmailNotifier),
    Telegram(TelegramNotifier),
}

impl Notifier {
    /// Builds a channel, resolving its secrets. Failures are fatal at startup.
    pub fn from_config(cfg: &ChannelConfig) -> Result<Self, ConfigError> {
        let label = cfg.label();
        Ok(match cfg {
            ChannelConfig::Slack(c) => Self::Slack(SlackNotifier::new(label, c)?),
            ChannelConfig::Email(c) => Self::Email(EmailNotifier::new(label, c)?),
            ChannelConfig::Telegram(c) => Self::Telegram(TelegramNotifier::new(label, c)?),
        })
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Slack(n) => n.label(),
            Self::Email(n) => n.label(),
            Self::Telegram(n) => n.label(),
        }
    }

    pub async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        match self {
            Self::Slack(n) => n.send(message).await,
            Self::Email(n) => n.send(message).await,
            Self::Telegram(n) => n.send(message).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct WebhookState {
        status: StatusCode,
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    /// Local stand-in for a Slack webhook; records every JSON body it gets.
    pub async fn spawn_webhook(status: StatusCode) -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/hook", post(record))
            .with_state(WebhookState {
                status,
                received: received.clone(),
            });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind webhook");
        let addr = listener.local_addr().expect("webhook addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{addr}/hook"), received)
    }

    /// An URL on a local port nothing listens on.
    pub fn unreachable_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}/hook")
    }

    async fn record(
        State(state): State<WebhookState>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        state.received.lock().await.push(body);
        state.status
    }
}
