use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bound on the config-history snapshot list (§3, §8.7).
const MAX_CONFIG_HISTORY: usize = 100;

/// Closed enumeration of device families, mapped to adapter constructors at
/// startup (§9: "no runtime-class discovery").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// CLI-comware-like.
    FamilyA,
    /// CLI-cumulus-like SONiC.
    FamilyB,
    /// REST-only Mellanox-like.
    FamilyC,
    /// REST RouterOS-like.
    FamilyD,
    /// pfSense-like firewall.
    Firewall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Init,
    Reinit,
    Ready,
    ConfigError,
    AuthError,
    NetError,
    Executing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credentials {
    UserSecret { user: String, secret: String },
    ClientKey { client_id: String, key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub taken_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub family: DeviceFamily,
    pub management_address: String,
    pub credentials: Credentials,
    pub state: DeviceState,
    history: Vec<ConfigSnapshot>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        family: DeviceFamily,
        management_address: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            management_address: management_address.into(),
            credentials,
            state: DeviceState::Init,
            history: Vec::new(),
        }
    }

    pub fn last_config(&self) -> Option<&ConfigSnapshot> {
        self.history.last()
    }

    pub fn history(&self) -> &[ConfigSnapshot] {
        &self.history
    }

    /// Append a snapshot if `text` differs from the last one, trimming the
    /// history to `MAX_CONFIG_HISTORY` entries, oldest evicted (§3, §4.2
    /// `store_config`).
    pub fn store_config(&mut self, text: String) {
        if self.history.last().map(|s| s.text.as_str()) == Some(text.as_str()) {
            return;
        }
        self.history.push(ConfigSnapshot {
            taken_at: Utc::now(),
            text,
        });
        if self.history.len() > MAX_CONFIG_HISTORY {
            let overflow = self.history.len() - MAX_CONFIG_HISTORY;
            self.history.drain(0..overflow);
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, DeviceState::Ready)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_device() -> Device {
        Device::new(
            "sw1",
            DeviceFamily::FamilyA,
            "10.0.0.1",
            Credentials::UserSecret {
                user: "admin".into(),
                secret: "secret".into(),
            },
        )
    }

    #[test]
    fn snapshot_monotonicity() {
        let mut device = new_device();
        for i in 0..150 {
            device.store_config(format!("config-{i}"));
        }
        assert_eq!(device.history().len(), MAX_CONFIG_HISTORY);
        assert_eq!(device.last_config().unwrap().text, "config-149");
    }

    #[test]
    fn unchanged_config_is_not_appended() {
        let mut device = new_device();
        device.store_config("same".into());
        device.store_config("same".into());
        assert_eq!(device.history().len(), 1);
    }
}
