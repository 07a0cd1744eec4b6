use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u8,
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default)]
    pub alert_cooldown_secs: u64,
    #[serde(default)]
    pub ssh: SshConfig,
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub notifications: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_username")]
    pub username: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: Option<SshAuthConfig>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuthConfig {
    Password {
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        password_env: Option<String>,
    },
    Key {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
        #[serde(default)]
        passphrase_env: Option<String>,
    },
    Agent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Ssh,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub auth: Option<SshAuthConfig>,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub threshold_percent: Option<u8>,
    #[serde(default)]
    pub transport: Transport,
}

impl HostConfig {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.address.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Slack(SlackConfig),
    Email(EmailConfig),
    Telegram(TelegramConfig),
}

impl ChannelConfig {
    pub fn label(&self) -> String {
        let (kind, name) = match self {
            Self::Slack(c) => ("slack", c.name.as_deref()),
            Self::Email(c) => ("email", c.name.as_deref()),
            Self::Telegram(c) => ("telegram", c.name.as_deref()),
        };
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("{kind}:{name}"),
            None => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_url_env: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    None,
    #[default]
    Starttls,
    Tls,
}

impl SmtpSecurity {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::Starttls => 587,
            Self::Tls => 465,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub smtp_server: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_email_subject")]
    pub subject: String,
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: default_ssh_username(),
            port: default_ssh_port(),
            auth: None,
            known_hosts: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// A host with every default applied and its secrets resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
    pub mount: String,
    pub threshold_percent: u8,
    pub transport: Transport,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
    #[error("secret for {context} not found: set '{env}' in the environment or provide it inline")]
    MissingSecret { context: String, env: String },
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml_str(&text, &path_display)
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(
                    "listen must be a valid host:port address".to_string(),
                ));
            }
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.threshold_percent > 100 {
            return Err(ConfigError::Validation(
                "threshold_percent must be in range 0..100".to_string(),
            ));
        }
        validate_mount("mount", &self.mount)?;
        if self.ssh.connect_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "ssh.connect_timeout_secs must be >= 1".to_string(),
            ));
        }

        if let Some(auth) = &self.ssh.auth {
            validate_auth("ssh.auth", auth)?;
        }
        validate_hosts(&self.hosts)?;
        validate_channels(&self.notifications)?;

        Ok(())
    }

    /// Applies defaults to every host and resolves its credentials.
    pub fn resolve_hosts(&self) -> Result<Vec<Host>, ConfigError> {
        self.hosts.iter().map(|h| self.resolve_host(h)).collect()
    }

    fn resolve_host(&self, host: &HostConfig) -> Result<Host, ConfigError> {
        let name = host.label().to_string();
        let credentials = match host.transport {
            Transport::Local => Credentials::Agent,
            Transport::Ssh => match host.auth.as_ref().or(self.ssh.auth.as_ref()) {
                Some(auth) => resolve_credentials(auth, &name)?,
                None => Credentials::Agent,
            },
        };

        Ok(Host {
            address: host.address.trim().to_string(),
            port: host.port.unwrap_or(self.ssh.port),
            username: host
                .username
                .clone()
                .unwrap_or_else(|| self.ssh.username.clone()),
            credentials,
            mount: host.mount.clone().unwrap_or_else(|| self.mount.clone()),
            threshold_percent: host.threshold_percent.unwrap_or(self.threshold_percent),
            transport: host.transport,
            name,
        })
    }

    /// Copy of the config with inline secrets masked, for logging.
    pub fn redacted(&self) -> Self {
        const MASK: &str = "<redacted>";
        let mask = |v: &Option<String>| v.as_ref().map(|_| MASK.to_string());
        let redact_auth = |auth: &SshAuthConfig| match auth {
            SshAuthConfig::Password {
                password,
                password_env,
            } => SshAuthConfig::Password {
                password: mask(password),
                password_env: password_env.clone(),
            },
            SshAuthConfig::Key {
                path,
                passphrase,
                passphrase_env,
            } => SshAuthConfig::Key {
                path: path.clone(),
                passphrase: mask(passphrase),
                passphrase_env: passphrase_env.clone(),
            },
            SshAuthConfig::Agent => SshAuthConfig::Agent,
        };

        let mut out = self.clone();
        out.ssh.auth = self.ssh.auth.as_ref().map(redact_auth);
        for host in &mut out.hosts {
            host.auth = host.auth.as_ref().map(redact_auth);
        }
        for channel in &mut out.notifications {
            match channel {
                ChannelConfig::Slack(c) => c.webhook_url = mask(&c.webhook_url),
                ChannelConfig::Email(c) => c.password = mask(&c.password),
                ChannelConfig::Telegram(c) => c.bot_token = mask(&c.bot_token),
            }
        }
        out
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

/// Environment value wins over the inline one; blank values count as unset.
pub fn resolve_secret(inline: Option<&str>, env_name: Option<&str>) -> Option<String> {
    if let Some(name) = env_name {
        if let Ok(v) = std::env::var(name) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    inline
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

fn resolve_credentials(auth: &SshAuthConfig, host: &str) -> Result<Credentials, ConfigError> {
    match auth {
        SshAuthConfig::Password {
            password,
            password_env,
        } => resolve_secret(password.as_deref(), password_env.as_deref())
            .map(Credentials::Password)
            .ok_or_else(|| ConfigError::MissingSecret {
                context: format!("ssh password of host '{host}'"),
                env: password_env.clone().unwrap_or_default(),
            }),
        SshAuthConfig::Key {
            path,
            passphrase,
            passphrase_env,
        } => Ok(Credentials::Key {
            path: path.clone(),
            passphrase: resolve_secret(passphrase.as_deref(), passphrase_env.as_deref()),
        }),
        SshAuthConfig::Agent => Ok(Credentials::Agent),
    }
}

fn validate_mount(field: &str, mount: &str) -> Result<(), ConfigError> {
    if !mount.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{field} must be an absolute path, got '{mount}'"
        )));
    }
    if mount.contains('\'') || mount.contains('\n') {
        return Err(ConfigError::Validation(format!(
            "{field} must not contain quotes or newlines"
        )));
    }
    Ok(())
}

fn validate_auth(field: &str, auth: &SshAuthConfig) -> Result<(), ConfigError> {
    if let SshAuthConfig::Password {
        password: None,
        password_env: None,
    } = auth
    {
        return Err(ConfigError::Validation(format!(
            "{field}: password auth needs password or password_env"
        )));
    }
    Ok(())
}

fn validate_hosts(hosts: &[HostConfig]) -> Result<(), ConfigError> {
    if hosts.is_empty() {
        return Err(ConfigError::Validation(
            "hosts must contain at least one entry".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for host in hosts {
        if host.address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "hosts[*].address must not be empty".to_string(),
            ));
        }
        let label = host.label();
        if !names.insert(label.to_string()) {
            return Err(ConfigError::Validation(format!(
                "host name '{label}' must be unique"
            )));
        }
        if host.port == Some(0) {
            return Err(ConfigError::Validation(format!(
                "host '{label}' port must be in range 1..65535"
            )));
        }
        if let Some(auth) = &host.auth {
            validate_auth(&format!("host '{label}' auth"), auth)?;
        }
        if let Some(mount) = &host.mount {
            validate_mount(&format!("host '{label}' mount"), mount)?;
        }
        if matches!(host.threshold_percent, Some(t) if t > 100) {
            return Err(ConfigError::Validation(format!(
                "host '{label}' threshold_percent must be in range 0..100"
            )));
        }
    }
    Ok(())
}

fn validate_channels(channels: &[ChannelConfig]) -> Result<(), ConfigError> {
    let mut labels = HashSet::new();
    for channel in channels {
        let label = channel.label();
        if !labels.insert(label.clone()) {
            return Err(ConfigError::Validation(format!(
                "notification channel '{label}' is configured twice, give each a distinct name"
            )));
        }
        match channel {
            ChannelConfig::Slack(c) => {
                if c.webhook_url.is_none() && c.webhook_url_env.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "{label}: webhook_url or webhook_url_env is required"
                    )));
                }
                if c.timeout_secs == 0 {
                    return Err(ConfigError::Validation(format!(
                        "{label}: timeout_secs must be > 0"
                    )));
                }
            }
            ChannelConfig::Email(c) => {
                if c.smtp_server.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{label}: smtp_server must not be empty"
                    )));
                }
                if c.from.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{label}: from must not be empty"
                    )));
                }
                if c.to.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{label}: to must contain at least one recipient"
                    )));
                }
                if c.timeout_secs == 0 {
                    return Err(ConfigError::Validation(format!(
                        "{label}: timeout_secs must be > 0"
                    )));
                }
            }
            ChannelConfig::Telegram(c) => {
                if c.chat_ids.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{label}: chat_ids must contain at least one chat id"
                    )));
                }
            }
        }
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_threshold_percent() -> u8 {
    80
}

fn default_mount() -> String {
    "/".to_string()
}

fn default_ssh_username() -> String {
    "root".to_string()
}

const fn default_ssh_port() -> u16 {
    22
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_delivery_timeout_secs() -> u64 {
    10
}

fn default_email_subject() -> String {
    "Disk Usage Alert".to_string()
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
hosts:
  - address: 192.168.1.10
  - address: 192.168.1.11
    name: db
    mount: /var
    threshold_percent: 90
    auth:
      method: key
      path: /home/ops/.ssh/id_ed25519
"#;

    fn minimal() -> Config {
        Config::from_yaml_str(MINIMAL, "test").expect("minimal config parses")
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = minimal();
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.threshold_percent, 80);
        assert_eq!(cfg.mount, "/");
        assert_eq!(cfg.alert_cooldown_secs, 0);
        assert_eq!(cfg.ssh.port, 22);
        assert!(cfg.listen.is_none());
        assert!(cfg.notifications.is_empty());
    }

    #[test]
    fn hosts_inherit_global_settings_unless_overridden() {
        let hosts = minimal().resolve_hosts().expect("hosts resolve");
        assert_eq!(hosts.len(), 2);

        assert_eq!(hosts[0].name, "192.168.1.10");
        assert_eq!(hosts[0].mount, "/");
        assert_eq!(hosts[0].threshold_percent, 80);
        assert_eq!(hosts[0].username, "root");
        assert_eq!(hosts[0].credentials, Credentials::Agent);

        assert_eq!(hosts[1].name, "db");
        assert_eq!(hosts[1].mount, "/var");
        assert_eq!(hosts[1].threshold_percent, 90);
        assert!(matches!(hosts[1].credentials, Credentials::Key { .. }));
    }

    #[test]
    fn rejects_empty_host_list() {
        let err = Config::from_yaml_str("hosts: []\n", "test").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_threshold_above_hundred() {
        let mut cfg = minimal();
        cfg.threshold_percent = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let mut cfg = minimal();
        cfg.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_relative_or_quoted_mounts() {
        let mut cfg = minimal();
        cfg.mount = "var".to_string();
        assert!(cfg.validate().is_err());

        cfg.mount = "/data'; rm -rf /".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_host_names() {
        let mut cfg = minimal();
        cfg.hosts[1].name = Some("192.168.1.10".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must be unique"));
    }

    #[test]
    fn parses_tagged_notification_channels() {
        let yaml = r#"
hosts:
  - address: web-1
notifications:
  - kind: slack
    webhook_url: https://hooks.slack.com/services/T000/B000/XXXX
  - kind: email
    smtp_server: smtp.example.com
    from: diskwatch@example.com
    to: [ops@example.com]
  - kind: telegram
    chat_ids: [42]
"#;
        let cfg = Config::from_yaml_str(yaml, "test").expect("channels parse");
        assert_eq!(cfg.notifications.len(), 3);
        match &cfg.notifications[1] {
            ChannelConfig::Email(email) => {
                assert_eq!(email.security, SmtpSecurity::Starttls);
                assert_eq!(email.subject, "Disk Usage Alert");
            }
            other => panic!("expected email channel, got {other:?}"),
        }
        assert_eq!(cfg.notifications[2].label(), "telegram");
    }

    #[test]
    fn rejects_email_without_recipients() {
        let yaml = r#"
hosts:
  - address: web-1
notifications:
  - kind: email
    smtp_server: smtp.example.com
    from: diskwatch@example.com
"#;
        let err = Config::from_yaml_str(yaml, "test").unwrap_err();
        assert!(err.to_string().contains("recipient"));
    }

    #[test]
    fn rejects_slack_without_url() {
        let yaml = r#"
hosts:
  - address: web-1
notifications:
  - kind: slack
"#;
        assert!(Config::from_yaml_str(yaml, "test").is_err());
    }

    #[test]
    fn rejects_password_auth_without_source() {
        let mut cfg = minimal();
        cfg.hosts[0].auth = Some(SshAuthConfig::Password {
            password: None,
            password_env: None,
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("password_env"));
    }

    #[test]
    fn missing_password_secret_is_reported() {
        std::env::remove_var("DISKWATCH_TEST_MISSING_SSH_PASSWORD");
        let mut cfg = minimal();
        cfg.ssh.auth = Some(SshAuthConfig::Password {
            password: None,
            password_env: Some("DISKWATCH_TEST_MISSING_SSH_PASSWORD".to_string()),
        });
        let err = cfg.resolve_hosts().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret { .. }));
    }

    #[test]
    fn env_secret_wins_over_inline() {
        std::env::set_var("DISKWATCH_TEST_SECRET_WINS", "from-env");
        let v = resolve_secret(Some("inline"), Some("DISKWATCH_TEST_SECRET_WINS"));
        assert_eq!(v.as_deref(), Some("from-env"));
        std::env::remove_var("DISKWATCH_TEST_SECRET_WINS");

        let v = resolve_secret(Some("  "), Some("DISKWATCH_TEST_SECRET_WINS"));
        assert!(v.is_none());
    }

    #[test]
    fn inline_secret_keeps_surrounding_spaces() {
        let v = resolve_secret(Some(" pass word "), None);
        assert_eq!(v.as_deref(), Some(" pass word "));
    }

    #[test]
    fn redacted_masks_inline_secrets() {
        let mut cfg = minimal();
        cfg.ssh.auth = Some(SshAuthConfig::Password {
            password: Some("hunter2".to_string()),
            password_env: None,
        });
        let text = serde_yaml::to_string(&cfg.redacted()).expect("serializes");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn example_config_is_valid() {
        Config::from_yaml_str(Config::example_yaml(), "config.yaml.example")
            .expect("bundled example must validate");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::Password("hunter2".to_string());
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
