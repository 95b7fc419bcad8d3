//! Device registry (§4.3): owns the in-memory set of live devices.

use super::{
    family_a::FamilyADialect, family_b::FamilyBDialect, family_c::FamilyCDialect,
    family_d::FamilyDDialect, firewall::FirewallDialect, BaseDevice, DeviceAdapter, DeviceError,
};
use crate::model::{Credentials, Device, DeviceFamily};
use crate::sbi::{RawSshDriver, RestDriver, SshCliDriver};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device {0} already exists")]
    AlreadyExists(String),
    #[error("device {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Instantiated live device: the model record plus its adapter handle.
pub struct LiveDevice {
    pub model: Device,
    pub adapter: Arc<Mutex<Box<dyn DeviceAdapter>>>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, LiveDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the concrete adapter for a device's family tag. The tag is a
    /// closed enumeration mapped to a constructor here, never runtime
    /// class discovery (§9).
    fn build_adapter(model: &Device) -> Result<Box<dyn DeviceAdapter>, RegistryError> {
        let (user, secret) = match &model.credentials {
            Credentials::UserSecret { user, secret } => (user.clone(), secret.clone()),
            Credentials::ClientKey { client_id, key } => (client_id.clone(), key.clone()),
        };
        let adapter: Box<dyn DeviceAdapter> = match model.family {
            DeviceFamily::FamilyA => {
                let ssh = SshCliDriver::new(model.management_address.clone(), 22, user, secret);
                Box::new(BaseDevice::new(FamilyADialect::new(ssh)))
            }
            DeviceFamily::FamilyB => {
                let rest = RestDriver::new(format!("https://{}/api", model.management_address), &secret, true)
                    .map_err(DeviceError::from)?;
                let frr = RawSshDriver::new(model.management_address.clone(), 22, user, secret);
                Box::new(BaseDevice::new(FamilyBDialect::new(rest, frr)))
            }
            DeviceFamily::FamilyC => {
                let rest = RestDriver::new(format!("https://{}/api", model.management_address), &secret, true)
                    .map_err(DeviceError::from)?;
                Box::new(BaseDevice::new(FamilyCDialect::new(rest)))
            }
            DeviceFamily::FamilyD => {
                let rest = RestDriver::new(format!("https://{}/rest", model.management_address), &secret, true)
                    .map_err(DeviceError::from)?;
                Box::new(BaseDevice::new(FamilyDDialect::new(rest, "bridge1")))
            }
            DeviceFamily::Firewall => {
                let rest = RestDriver::new(format!("https://{}/api/v2", model.management_address), &secret, true)
                    .map_err(DeviceError::from)?;
                let frr = RawSshDriver::new(model.management_address.clone(), 22, user, secret);
                Box::new(BaseDevice::new(FirewallDialect::new(rest, frr)))
            }
        };
        Ok(adapter)
    }

    /// §4.3 create: reject on name collision, instantiate the adapter,
    /// retrieve_info, and land the model's state on ready or the
    /// classified failure state.
    pub async fn create(&mut self, mut model: Device) -> Result<(), RegistryError> {
        if self.devices.contains_key(&model.name) {
            return Err(RegistryError::AlreadyExists(model.name));
        }
        let mut adapter = Self::build_adapter(&model)?;
        match adapter.retrieve_info().await {
            Ok(()) => model.state = adapter.state(),
            Err(err) => {
                model.state = adapter.state();
                self.devices.insert(
                    model.name.clone(),
                    LiveDevice {
                        model,
                        adapter: Arc::new(Mutex::new(adapter)),
                    },
                );
                return Err(err.into());
            }
        }
        let name = model.name.clone();
        self.devices.insert(
            name,
            LiveDevice {
                model,
                adapter: Arc::new(Mutex::new(adapter)),
            },
        );
        Ok(())
    }

    /// §4.3 from_store: reinstantiate the adapter for a persisted device
    /// record, mark it reinit, and return the live handle so the caller
    /// can spawn the background refresh task that's joined before the
    /// fabric claims ready.
    pub async fn from_store(&mut self, mut model: Device) -> Result<Arc<Mutex<Box<dyn DeviceAdapter>>>, RegistryError> {
        model.state = crate::model::DeviceState::Reinit;
        let adapter = Self::build_adapter(&model)?;
        let handle = Arc::new(Mutex::new(adapter));
        let name = model.name.clone();
        self.devices.insert(
            name,
            LiveDevice {
                model,
                adapter: handle.clone(),
            },
        );
        Ok(handle)
    }

    pub fn delete(&mut self, name: &str) -> Result<(), RegistryError> {
        self.devices
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Test-only seam: installs a fixture adapter directly, bypassing
    /// `build_adapter` so tests never dial a real device.
    #[cfg(test)]
    pub(crate) fn insert_fixture(&mut self, model: Device, adapter: Box<dyn DeviceAdapter>) {
        let name = model.name.clone();
        self.devices.insert(
            name,
            LiveDevice {
                model,
                adapter: Arc::new(Mutex::new(adapter)),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&LiveDevice> {
        self.devices.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LiveDevice> {
        self.devices.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{DeviceFamily, DeviceState, L3VlanInterface, LinkMode, LldpNeighbor, PhysicalPort, Vrf};
    use async_trait::async_trait;

    fn family_a_model(name: &str) -> Device {
        Device::new(
            name,
            DeviceFamily::FamilyA,
            "192.0.2.10",
            Credentials::UserSecret {
                user: "admin".into(),
                secret: "secret".into(),
            },
        )
    }

    /// No-network stand-in for tests that only exercise registry
    /// bookkeeping, not a family dialect.
    struct StubAdapter;

    #[async_trait]
    impl DeviceAdapter for StubAdapter {
        fn state(&self) -> DeviceState {
            DeviceState::Ready
        }
        async fn retrieve_info(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn update_info(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn store_config(&mut self, _text: String) {}
        fn ports(&self) -> &[PhysicalPort] {
            &[]
        }
        fn vlans(&self) -> &std::collections::BTreeSet<u16> {
            static EMPTY: std::sync::OnceLock<std::collections::BTreeSet<u16>> = std::sync::OnceLock::new();
            EMPTY.get_or_init(std::collections::BTreeSet::new)
        }
        fn l3_interfaces(&self) -> &[L3VlanInterface] {
            &[]
        }
        fn vrfs(&self) -> &[Vrf] {
            &[]
        }
        fn port_by_name(&self, _name: &str) -> Option<&PhysicalPort> {
            None
        }
        fn neighbor_by_port(&self, _name: &str) -> Option<&LldpNeighbor> {
            None
        }
        fn last_config(&self) -> Option<&str> {
            None
        }
        fn config_history(&self) -> &[crate::model::ConfigSnapshot] {
            &[]
        }
        async fn add_vlan(&mut self, _ids: Vec<u16>) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_vlan(&mut self, _ids: Vec<u16>, _force: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_vlan_to_port(
            &mut self,
            _vid: u16,
            _port_name: &str,
            _mode: LinkMode,
            _pvid: Option<u16>,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_vlan_to_port(&mut self, _ids: Vec<u16>, _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn set_port_mode(&mut self, _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_vlan_to_vrf(&mut self, _vrf: &str, _request: super::super::VlanToVrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_vlan_to_vrf(&mut self, _vrf_name: &str, _vid: u16) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_vrf(&mut self, _request: super::super::VrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_vrf(&mut self, _name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn bind_vrf(&mut self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn unbind_vrf(&mut self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_static_route(&mut self, _vrf: &str, _route: crate::model::StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_static_route(&mut self, _vrf: &str, _route: crate::model::StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_bgp_instance(&mut self, _request: super::super::BgpInstanceRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_bgp_instance(&mut self, _vrf_name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn add_bgp_peer(&mut self, _peer: crate::model::BgpNeighbor, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn del_bgp_peer(&mut self, _peer_ip: std::net::IpAddr, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn commit_and_save(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected_before_any_adapter_is_built() {
        let mut registry = DeviceRegistry::new();
        let mut model = family_a_model("sw1");
        model.state = DeviceState::Ready;
        registry.devices.insert(
            model.name.clone(),
            LiveDevice {
                model,
                adapter: Arc::new(Mutex::new(Box::new(StubAdapter))),
            },
        );
        // create() checks the name collision before touching the network,
        // so this resolves immediately instead of dialing 192.0.2.10.
        let err = registry.create(family_a_model("sw1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[test]
    fn delete_unknown_device_is_reported() {
        let mut registry = DeviceRegistry::new();
        let err = registry.delete("ghost").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn delete_known_device_succeeds() {
        let mut registry = DeviceRegistry::new();
        let model = family_a_model("sw1");
        registry.devices.insert(
            model.name.clone(),
            LiveDevice {
                model,
                adapter: Arc::new(Mutex::new(Box::new(StubAdapter))),
            },
        );
        registry.delete("sw1").unwrap();
        assert!(registry.is_empty());
    }
}
