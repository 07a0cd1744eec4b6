use super::{AlertMessage, DeliveryError};
use crate::config::{resolve_secret, ConfigError, SlackConfig};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

pub struct SlackNotifier {
    label: String,
    client: Client,
    webhook_url: String,
    channel: Option<String>,
    username: Option<String>,
}

impl SlackNotifier {
    pub fn new(label: String, cfg: &SlackConfig) -> Result<Self, ConfigError> {
        let webhook_url =
            resolve_secret(cfg.webhook_url.as_deref(), cfg.webhook_url_env.as_deref())
                .ok_or_else(|| ConfigError::MissingSecret {
                    context: format!("{label} webhook_url"),
                    env: cfg.webhook_url_env.clone().unwrap_or_default(),
                })?;

        let client = Client::builder()
            .user_agent(concat!("diskwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            label,
            client,
            webhook_url,
            channel: cfg.channel.clone(),
            username: cfg.username.clone(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn payload(&self, message: &AlertMessage) -> serde_json::Value {
        let mut payload = serde_json::json!({ "text": message.text });
        if let Some(channel) = &self.channel {
            payload["channel"] = serde_json::Value::from(channel.as_str());
        }
        if let Some(username) = &self.username {
            payload["username"] = serde_json::Value::from(username.as_str());
        }
        payload
    }

    pub async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(message))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        info!(channel = %self.label, host = %message.host, "slack notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::{spawn_webhook, unreachable_url};
    use axum::http::StatusCode;

    fn config(url: &str) -> SlackConfig {
        SlackConfig {
            name: None,
            webhook_url: Some(url.to_string()),
            webhook_url_env: None,
            channel: None,
            username: None,
            timeout_secs: 5,
        }
    }

    fn message() -> AlertMessage {
        AlertMessage {
            host: "web-1".to_string(),
            text: "Disk usage alert".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_text_payload() {
        let (url, received) = spawn_webhook(StatusCode::OK).await;
        let mut cfg = config(&url);
        cfg.channel = Some("#ops".to_string());
        let notifier = SlackNotifier::new("slack".to_string(), &cfg).expect("notifier");

        notifier.send(&message()).await.expect("delivered");

        let bodies = received.lock().await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["text"], "Disk usage alert");
        assert_eq!(bodies[0]["channel"], "#ops");
        assert!(bodies[0].get("username").is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_a_delivery_error() {
        let (url, _received) = spawn_webhook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = SlackNotifier::new("slack".to_string(), &config(&url)).expect("notifier");

        let err = notifier.send(&message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_delivery_error() {
        let notifier =
            SlackNotifier::new("slack".to_string(), &config(&unreachable_url())).expect("notifier");

        let err = notifier.send(&message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Http(_)));
    }

    #[test]
    fn missing_webhook_url_is_a_config_error() {
        std::env::remove_var("DISKWATCH_TEST_MISSING_SLACK_URL");
        let cfg = SlackConfig {
            webhook_url: None,
            webhook_url_env: Some("DISKWATCH_TEST_MISSING_SLACK_URL".to_string()),
            ..config("unused")
        };
        assert!(matches!(
            SlackNotifier::new("slack".to_string(), &cfg),
            Err(ConfigError::MissingSecret { .. })
        ));
    }
}
