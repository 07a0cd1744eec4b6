pub mod df;
pub mod local;
pub mod ssh;

use crate::alerts::UsageReading;
use crate::config::{Host, Transport};
use df::ParseError;
use local::{LocalProbe, LocalProbeError};
use ssh::{ConnectionError, SshConnector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("local probe error: {0}")]
    Local(#[from] LocalProbeError),
    #[error("check worker failed: {0}")]
    Worker(String),
}

impl CheckError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Parse(_) => "parse",
            Self::Local(_) => "local",
            Self::Worker(_) => "worker",
        }
    }
}

/// Produces one usage reading per call. Implementations may block.
pub trait UsageSource: Send + Sync {
    fn read_usage(&self, host: &Host) -> Result<UsageReading, CheckError>;
}

/// Routes each host to SSH or to the local probe by its transport.
#[derive(Debug, Clone)]
pub struct HostProbe {
    ssh: SshConnector,
    local: LocalProbe,
}

impl HostProbe {
    pub fn new(ssh: SshConnector) -> Self {
        Self {
            ssh,
            local: LocalProbe,
        }
    }
}

impl UsageSource for HostProbe {
    fn read_usage(&self, host: &Host) -> Result<UsageReading, CheckError> {
        let now = crate::now_unix();
        match host.transport {
            Transport::Ssh => {
                let output = self.ssh.query(host)?;
                Ok(df::parse_df_output(&host.name, &host.mount, &output, now)?)
            }
            Transport::Local => Ok(self.local.read(host, now)?),
        }
    }
}
