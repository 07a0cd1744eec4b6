use super::{AlertMessage, DeliveryError};
use crate::config::{resolve_secret, ConfigError, TelegramConfig};
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};

pub struct TelegramNotifier {
    label: String,
    bot: Bot,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(label: String, cfg: &TelegramConfig) -> Result<Self, ConfigError> {
        let token = resolve_secret(cfg.bot_token.as_deref(), Some(&cfg.bot_token_env))
            .ok_or_else(|| ConfigError::MissingSecret {
                context: format!("{label} bot token"),
                env: cfg.bot_token_env.clone(),
            })?;

        Ok(Self {
            label,
            bot: Bot::new(token),
            chat_ids: cfg.chat_ids.clone(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Tries every chat. Delivered if any chat got the message; failed chats
    /// are logged.
    pub async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        let mut failures = Vec::new();
        let mut sent = 0_usize;

        for chat_id in &self.chat_ids {
            match self
                .bot
                .send_message(ChatId(*chat_id), message.text.clone())
                .await
            {
                Ok(_) => sent += 1,
                Err(err) => {
                    warn!(channel = %self.label, chat_id = *chat_id, error = %err, "telegram send failed");
                    failures.push(err);
                }
            }
        }

        if sent > 0 {
            info!(
                channel = %self.label,
                host = %message.host,
                chats = sent,
                failed = failures.len(),
                "telegram notification sent"
            );
        }
        chats_outcome(sent, failures).map_err(DeliveryError::from)
    }
}

fn chats_outcome<E>(sent: usize, mut failures: Vec<E>) -> Result<(), E> {
    match failures.pop() {
        Some(err) if sent == 0 => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_a_config_error() {
        std::env::remove_var("DISKWATCH_TEST_MISSING_TG_TOKEN");
        let cfg = TelegramConfig {
            name: None,
            bot_token_env: "DISKWATCH_TEST_MISSING_TG_TOKEN".to_string(),
            bot_token: None,
            chat_ids: vec![1],
        };
        let err = TelegramNotifier::new("telegram".to_string(), &cfg)
            .err()
            .expect("missing token must fail");
        assert!(err.to_string().contains("DISKWATCH_TEST_MISSING_TG_TOKEN"));
    }

    #[test]
    fn inline_token_is_accepted() {
        std::env::remove_var("DISKWATCH_TEST_UNSET_TG_TOKEN");
        let cfg = TelegramConfig {
            name: Some("oncall".to_string()),
            bot_token_env: "DISKWATCH_TEST_UNSET_TG_TOKEN".to_string(),
            bot_token: Some("123:abc".to_string()),
            chat_ids: vec![1, 2],
        };
        let notifier = TelegramNotifier::new("telegram:oncall".to_string(), &cfg).expect("ok");
        assert_eq!(notifier.label(), "telegram:oncall");
        assert_eq!(notifier.chat_ids, vec![1, 2]);
    }

    #[test]
    fn partial_chat_failure_still_counts_as_delivered() {
        assert_eq!(chats_outcome(1, vec!["chat not found"]), Ok(()));
        assert_eq!(chats_outcome::<&str>(2, vec![]), Ok(()));
    }

    #[test]
    fn every_chat_failing_returns_last_error() {
        assert_eq!(
            chats_outcome(0, vec!["blocked", "chat not found"]),
            Err("chat not found")
        );
    }
}
