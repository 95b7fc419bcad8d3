use super::{with_retry, CommandOutput, SbiError, CONNECT_TIMEOUT, LONG_COMMAND_TIMEOUT};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// CLI-over-SSH driver: one persistent `ssh2` session per device, created
/// lazily. `ssh2` is blocking, so every call runs on a blocking-pool thread
/// via `tokio::task::spawn_blocking` (the idiomatic bridge between a
/// blocking network library and the async worker).
#[derive(Clone)]
pub struct SshCliDriver {
    host: String,
    port: u16,
    user: String,
    password: String,
    session: Arc<Mutex<Option<Session>>>,
}

impl SshCliDriver {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn connect_blocking(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<Session, SbiError> {
        let tcp = TcpStream::connect((host, port))
            .map_err(|e| SbiError::Unreachable(format!("tcp connect {host}:{port}: {e}")))?;
        tcp.set_read_timeout(Some(CONNECT_TIMEOUT)).ok();
        let mut session =
            Session::new().map_err(|e| SbiError::Unreachable(format!("ssh session: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| SbiError::Unreachable(format!("ssh handshake: {e}")))?;
        session
            .userauth_password(user, password)
            .map_err(|e| SbiError::Unauthenticated(format!("ssh auth: {e}")))?;
        if !session.authenticated() {
            return Err(SbiError::Unauthenticated("ssh auth rejected".into()));
        }
        Ok(session)
    }

    fn run_on_session(
        session: &Session,
        command: &str,
    ) -> Result<CommandOutput, SbiError> {
        let mut channel = session
            .channel_session()
            .map_err(|e| SbiError::Unreachable(format!("channel open: {e}")))?;
        channel
            .exec(command)
            .map_err(|e| SbiError::Unreachable(format!("exec: {e}")))?;
        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| SbiError::Unreachable(format!("read stdout: {e}")))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| SbiError::Unreachable(format!("read stderr: {e}")))?;
        channel.wait_close().ok();
        Ok(CommandOutput { stdout, stderr })
    }

    /// §4.1 `send_command`: list of text commands, per-command stdout/stderr.
    pub async fn send_command(
        &self,
        commands: Vec<String>,
        enable: bool,
    ) -> Result<Vec<CommandOutput>, SbiError> {
        let driver = self.clone();
        with_retry(|| {
            let driver = driver.clone();
            let commands = commands.clone();
            async move {
                tokio::task::spawn_blocking(move || driver.send_command_blocking(&commands, enable))
                    .await
                    .map_err(|e| SbiError::Unreachable(format!("join error: {e}")))?
            }
        })
        .await
    }

    fn send_command_blocking(
        &self,
        commands: &[String],
        enable: bool,
    ) -> Result<Vec<CommandOutput>, SbiError> {
        let mut guard = self.session.lock().expect("session mutex poisoned");
        if guard.is_none() {
            *guard = Some(Self::connect_blocking(
                &self.host,
                self.port,
                &self.user,
                &self.password,
            )?);
        }
        let session = guard.as_ref().expect("just populated");
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let full = if enable {
                format!("enable; {command}")
            } else {
                command.clone()
            };
            results.push(Self::run_on_session(session, &full)?);
        }
        Ok(results)
    }

    /// §4.1 `get_info`: a single text command, optionally structured-parsed
    /// by the caller (the driver only returns raw text; the vendor adapter
    /// owns the parse step).
    pub async fn get_info(&self, command: String) -> Result<String, SbiError> {
        let outputs = self.send_command(vec![command], false).await?;
        outputs
            .into_iter()
            .next()
            .map(|o| o.stdout)
            .ok_or_else(|| SbiError::Misconfigured("empty command result".into()))
    }

    pub fn timeout_budget() -> std::time::Duration {
        LONG_COMMAND_TIMEOUT
    }
}

impl std::fmt::Debug for SshCliDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCliDriver")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enable_prefix_is_only_added_when_requested() {
        let driver = SshCliDriver::new("example.invalid", 22, "admin", "x");
        assert_eq!(driver.host, "example.invalid");
        assert_eq!(driver.port, 22);
    }
}
