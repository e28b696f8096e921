use crate::constants::limits::MAX_CAPTURE_BYTES;
use crate::errors::ToolError;
use crate::services::remote::{CommandOutput, Connection, Connector};
use base64::Engine;
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct SshProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub passphrase: Option<String>,
    pub ready_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub host_key_fingerprint: Option<String>,
}

impl std::fmt::Debug for SshProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

pub struct SshConnector {
    profile: SshProfile,
}

impl SshConnector {
    pub fn new(profile: SshProfile) -> Self {
        Self { profile }
    }
}

impl Connector for SshConnector {
    fn host_key(&self) -> String {
        format!(
            "{}@{}:{}",
            self.profile.username, self.profile.host, self.profile.port
        )
    }

    fn connect(&self) -> Result<Box<dyn Connection>, ToolError> {
        let session = connect_session(&self.profile)?;
        Ok(Box::new(SshConnection { session }))
    }
}

struct SshConnection {
    session: Session,
}

impl Connection for SshConnection {
    fn is_alive(&mut self) -> bool {
        self.session.set_blocking(true);
        self.session.authenticated() && self.session.keepalive_send().is_ok()
    }

    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ToolError> {
        self.session.set_blocking(true);
        let mut channel = self.session.channel_session().map_err(map_ssh_error)?;
        channel.handle_extended_data(ssh2::ExtendedData::Merge)
            .map_err(map_ssh_error)?;
        channel.exec(command).map_err(map_ssh_error)?;
        self.session.set_blocking(false);

        let started = Instant::now();
        let mut captured: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];
        let read_result = loop {
            let mut progressed = false;
            match channel.read(&mut buf) {
                Ok(n) if n > 0 => {
                    let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
                    captured.extend_from_slice(&buf[..n.min(room)]);
                    progressed = true;
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    break Err(ToolError::connection(format!(
                        "SSH output read failed: {}",
                        err
                    )))
                }
            }
            if channel.eof() {
                break Ok(());
            }
            if started.elapsed() > timeout {
                break Err(ToolError::timeout(format!(
                    "Remote command timed out after {} ms",
                    timeout.as_millis()
                )));
            }
            if !progressed {
                std::thread::sleep(Duration::from_millis(20));
            }
        };

        self.session.set_blocking(true);
        if let Err(err) = read_result {
            let _ = channel.close();
            return Err(err);
        }
        let _ = channel.wait_close();
        let exit_code = channel.exit_status().unwrap_or(-1);
        Ok(CommandOutput {
            output: String::from_utf8_lossy(&captured).to_string(),
            exit_code,
        })
    }
}

fn connect_session(profile: &SshProfile) -> Result<Session, ToolError> {
    let ready = Duration::from_millis(profile.ready_timeout_ms);
    let addr = (profile.host.as_str(), profile.port)
        .to_socket_addrs()
        .map_err(|err| ToolError::connection(format!("Cannot resolve SSH host: {}", err)))?
        .next()
        .ok_or_else(|| ToolError::validation("SSH host resolved to no addresses"))?;
    let tcp = TcpStream::connect_timeout(&addr, ready)
        .map_err(|err| ToolError::connection(format!("Failed to connect SSH: {}", err)))?;
    tcp.set_read_timeout(Some(ready)).ok();
    tcp.set_write_timeout(Some(ready)).ok();

    let mut session =
        Session::new().map_err(|_| ToolError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(map_ssh_error)?;

    if let Some(expected) = profile.host_key_fingerprint.as_ref() {
        let observed = fingerprint_host_key_sha256(&session);
        if observed.as_deref() != Some(expected.as_str()) {
            return Err(ToolError::denied(format!(
                "SSH host key mismatch (expected {}, got {})",
                expected,
                observed.unwrap_or_else(|| "unknown".to_string())
            )));
        }
    }

    if let Some(key_path) = profile.private_key_path.as_ref() {
        session
            .userauth_pubkey_file(
                &profile.username,
                None,
                std::path::Path::new(key_path),
                profile.passphrase.as_deref(),
            )
            .map_err(auth_error)?;
    } else if let Some(password) = profile.password.as_ref() {
        session
            .userauth_password(&profile.username, password)
            .map_err(auth_error)?;
    }
    if !session.authenticated() {
        return Err(ToolError::denied("SSH authentication failed"));
    }

    let interval = std::cmp::max(1, (profile.keepalive_interval_ms / 1000) as u32);
    session.set_keepalive(true, interval);
    Ok(session)
}

pub fn normalize_fingerprint_sha256(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.to_lowercase().starts_with("sha256:") {
        return Some(format!("SHA256:{}", trimmed[7..].trim()));
    }
    Some(format!("SHA256:{}", trimmed))
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn auth_error(err: ssh2::Error) -> ToolError {
    ToolError::denied(format!("SSH authentication failed: {}", err.message()))
}

fn map_ssh_error(err: ssh2::Error) -> ToolError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => ToolError::connection("SSH operation timed out"),
        _ => ToolError::connection(format!("SSH error: {}", io_err)),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_fingerprint_sha256;

    #[test]
    fn fingerprints_are_normalized_to_sha256_prefix() {
        assert_eq!(
            normalize_fingerprint_sha256("sha256:abcd=="),
            Some("SHA256:abcd".to_string())
        );
        assert_eq!(
            normalize_fingerprint_sha256("abcd"),
            Some("SHA256:abcd".to_string())
        );
        assert_eq!(normalize_fingerprint_sha256("  "), None);
    }
}
