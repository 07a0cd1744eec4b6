use crate::config::{Credentials, Host};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// LIBSSH2_ERROR_TIMEOUT
const SSH_ERROR_TIMEOUT: i32 = -9;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot resolve {address}: {source}")]
    Resolve { address: String, source: io::Error },
    #[error("{address} did not resolve to any socket address")]
    NoAddress { address: String },
    #[error("cannot connect to {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error("timed out during {stage}")]
    Timeout { stage: &'static str },
    #[error("ssh {stage} failed: {source}")]
    Ssh {
        stage: &'static str,
        source: ssh2::Error,
    },
    #[error("host key of {address} rejected: {reason}")]
    HostKey { address: String, reason: String },
    #[error("authentication as '{username}' failed: {reason}")]
    Auth { username: String, reason: String },
    #[error("remote command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },
    #[error("reading command output failed: {0}")]
    Io(#[source] io::Error),
}

/// Runs the disk usage command on remote hosts over SSH.
#[derive(Debug, Clone)]
pub struct SshConnector {
    timeout: Duration,
    known_hosts: Option<PathBuf>,
}

/// Disconnects the session when dropped, whatever path the check took.
struct SessionGuard(Session);

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(err) = self.0.disconnect(None, "diskwatch check finished", None) {
            debug!(error = %err, "ssh disconnect failed");
        }
    }
}

impl SshConnector {
    pub fn new(timeout: Duration, known_hosts: Option<PathBuf>) -> Self {
        Self {
            timeout,
            known_hosts,
        }
    }

    /// The mount is validated at config load to be absolute and quote-free.
    pub fn disk_usage_command(mount: &str) -> String {
        format!("LC_ALL=C df -P -- '{mount}'")
    }

    /// Returns the raw stdout of the disk usage command on `host`.
    pub fn query(&self, host: &Host) -> Result<String, ConnectionError> {
        let session = self.open(host)?;
        self.run(&session, &Self::disk_usage_command(&host.mount))
    }

    fn open(&self, host: &Host) -> Result<SessionGuard, ConnectionError> {
        let endpoint = format!("{}:{}", host.address, host.port);
        let addrs: Vec<SocketAddr> = (host.address.as_str(), host.port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                address: endpoint.clone(),
                source,
            })?
            .collect();
        let tcp = self.connect_any(&endpoint, &addrs)?;

        let mut session = Session::new().map_err(ssh_error("session init"))?;
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_error("handshake"))?;
        let session = SessionGuard(session);

        self.verify_host_key(&session, host)?;
        authenticate(&session, host)?;
        debug!(host = %host.name, address = %endpoint, "ssh session established");
        Ok(session)
    }

    /// Tries each resolved address in order; the last failure is returned.
    fn connect_any(
        &self,
        endpoint: &str,
        addrs: &[SocketAddr],
    ) -> Result<TcpStream, ConnectionError> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(addr, self.timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(source) => {
                    debug!(address = %addr, error = %source, "tcp connect failed");
                    last_err = Some(source);
                }
            }
        }

        match last_err {
            None => Err(ConnectionError::NoAddress {
                address: endpoint.to_string(),
            }),
            Some(source) if is_io_timeout(&source) => {
                Err(ConnectionError::Timeout { stage: "connect" })
            }
            Some(source) => Err(ConnectionError::Connect {
                address: endpoint.to_string(),
                source,
            }),
        }
    }

    fn verify_host_key(&self, session: &Session, host: &Host) -> Result<(), ConnectionError> {
        let Some(path) = &self.known_hosts else {
            return Ok(());
        };

        let mut known = session
            .known_hosts()
            .map_err(ssh_error("known_hosts init"))?;
        known
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(ssh_error("known_hosts read"))?;

        let rejected = |reason: &str| ConnectionError::HostKey {
            address: host.address.clone(),
            reason: reason.to_string(),
        };
        let (key, _) = session
            .host_key()
            .ok_or_else(|| rejected("server presented no host key"))?;

        match known.check_port(&host.address, host.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(rejected("no entry in known_hosts")),
            CheckResult::Mismatch => Err(rejected("key does not match known_hosts entry")),
            CheckResult::Failure => Err(rejected("known_hosts lookup failed")),
        }
    }

    fn run(&self, session: &Session, command: &str) -> Result<String, ConnectionError> {
        let mut channel = session
            .channel_session()
            .map_err(ssh_error("channel open"))?;
        channel.exec(command).map_err(ssh_error("exec"))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(io_error)?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(io_error)?;

        channel.wait_close().map_err(ssh_error("channel close"))?;
        let status = channel.exit_status().map_err(ssh_error("exit status"))?;
        if status != 0 {
            return Err(ConnectionError::CommandFailed {
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

fn authenticate(session: &Session, host: &Host) -> Result<(), ConnectionError> {
    let username = host.username.as_str();
    let result = match &host.credentials {
        Credentials::Password(password) => session.userauth_password(username, password),
        Credentials::Key { path, passphrase } => {
            session.userauth_pubkey_file(username, None, path, passphrase.as_deref())
        }
        Credentials::Agent => session.userauth_agent(username),
    };

    if let Err(err) = result {
        if is_ssh_timeout(&err) {
            return Err(ConnectionError::Timeout {
                stage: "authentication",
            });
        }
        return Err(ConnectionError::Auth {
            username: username.to_string(),
            reason: err.to_string(),
        });
    }
    if !session.authenticated() {
        return Err(ConnectionError::Auth {
            username: username.to_string(),
            reason: "server did not accept the credentials".to_string(),
        });
    }
    Ok(())
}

fn ssh_error(stage: &'static str) -> impl Fn(ssh2::Error) -> ConnectionError {
    move |source| {
        if is_ssh_timeout(&source) {
            ConnectionError::Timeout { stage }
        } else {
            ConnectionError::Ssh { stage, source }
        }
    }
}

fn io_error(source: io::Error) -> ConnectionError {
    if is_io_timeout(&source) {
        ConnectionError::Timeout { stage: "command" }
    } else {
        ConnectionError::Io(source)
    }
}

fn is_ssh_timeout(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::Session(SSH_ERROR_TIMEOUT))
}

fn is_io_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
