use super::{with_retry, SbiError, SshCliDriver};

/// Raw SSH driver used for the FRR `vtysh` channel (families B and
/// Firewall, §4.2). Thin wrapper over [`SshCliDriver`]: same transport,
/// different command prefixing convention.
#[derive(Clone, Debug)]
pub struct RawSshDriver {
    inner: SshCliDriver,
}

impl RawSshDriver {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: SshCliDriver::new(host, port, user, password),
        }
    }

    /// Runs `commands` inside a single `vtysh -c` invocation per command.
    pub async fn vtysh(&self, commands: Vec<String>) -> Result<Vec<String>, SbiError> {
        let driver = self.inner.clone();
        with_retry(|| {
            let driver = driver.clone();
            let commands = commands.clone();
            async move {
                let mut out = Vec::with_capacity(commands.len());
                for command in commands {
                    let wrapped = format!("vtysh -c \"{command}\"");
                    out.push(driver.get_info(wrapped).await?);
                }
                Ok(out)
            }
        })
        .await
    }
}
