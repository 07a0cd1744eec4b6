use super::{AlertMessage, DeliveryError};
use crate::config::{resolve_secret, ConfigError, EmailConfig, SmtpSecurity};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::info;

pub struct EmailNotifier {
    label: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
}

impl EmailNotifier {
    pub fn new(label: String, cfg: &EmailConfig) -> Result<Self, ConfigError> {
        let from = parse_mailbox(&label, "from", &cfg.from)?;
        let to = cfg
            .to
            .iter()
            .map(|addr| parse_mailbox(&label, "to", addr))
            .collect::<Result<Vec<_>, _>>()?;

        let relay_error = |err: lettre::transport::smtp::Error| {
            ConfigError::Validation(format!("{label}: invalid smtp_server: {err}"))
        };
        let builder = match cfg.security {
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.smtp_server)
            }
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server)
                    .map_err(relay_error)?
            }
            SmtpSecurity::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_server).map_err(relay_error)?
            }
        };
        let mut builder = builder
            .port(cfg.port.unwrap_or(cfg.security.default_port()))
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)));

        if let Some(username) = &cfg.username {
            let password = resolve_secret(cfg.password.as_deref(), cfg.password_env.as_deref())
                .ok_or_else(|| ConfigError::MissingSecret {
                    context: format!("{label} smtp password"),
                    env: cfg.password_env.clone().unwrap_or_default(),
                })?;
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            label,
            transport: builder.build(),
            from,
            to,
            subject: cfg.subject.clone(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn build_message(&self, message: &AlertMessage) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .body(message.text.clone())
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }

    pub async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        let email = self.build_message(message)?;
        self.transport.send(email).await?;
        info!(
            channel = %self.label,
            host = %message.host,
            recipients = self.to.len(),
            "email notification sent"
        );
        Ok(())
    }
}

fn parse_mailbox(label: &str, field: &str, addr: &str) -> Result<Mailbox, ConfigError> {
    addr.trim().parse::<Mailbox>().map_err(|err| {
        ConfigError::Validation(format!("{label}: invalid {field} address '{addr}': {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            name: None,
            smtp_server: "localhost".to_string(),
            port: Some(2525),
            security: SmtpSecurity::None,
            username: None,
            password: None,
            password_env: None,
            from: "diskwatch@example.com".to_string(),
            to: vec!["ops@example.com".to_string(), "Oncall <oncall@example.com>".to_string()],
            subject: "Disk Usage Alert".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn builds_plain_text_message_for_every_recipient() {
        let notifier = EmailNotifier::new("email".to_string(), &config()).expect("notifier");
        let email = notifier
            .build_message(&AlertMessage {
                host: "web-1".to_string(),
                text: "Disk usage alert: host 'web-1'".to_string(),
            })
            .expect("message builds");

        let raw = String::from_utf8(email.formatted()).expect("utf8");
        assert!(raw.contains("Subject: Disk Usage Alert\r\n"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
        assert!(raw.contains("Disk usage alert: host 'web-1'"));
        assert_eq!(email.envelope().to().len(), 2);
    }

    #[test]
    fn rejects_invalid_addresses() {
        let mut cfg = config();
        cfg.to = vec!["not-an-email".to_string()];
        let err = EmailNotifier::new("email".to_string(), &cfg)
            .err()
            .expect("invalid address must fail");
        assert!(err.to_string().contains("invalid to address"));
    }

    #[test]
    fn username_without_password_is_a_config_error() {
        std::env::remove_var("DISKWATCH_TEST_MISSING_SMTP_PASSWORD");
        let mut cfg = config();
        cfg.username = Some("diskwatch".to_string());
        cfg.password_env = Some("DISKWATCH_TEST_MISSING_SMTP_PASSWORD".to_string());
        assert!(matches!(
            EmailNotifier::new("email".to_string(), &cfg),
            Err(ConfigError::MissingSecret { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_delivery_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let mut cfg = config();
        cfg.smtp_server = "127.0.0.1".to_string();
        cfg.port = Some(port);
        let notifier = EmailNotifier::new("email".to_string(), &cfg).expect("notifier");

        let err = notifier
            .send(&AlertMessage {
                host: "web-1".to_string(),
                text: "alert".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Smtp(_)));
    }
}
