use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperState {
    Up,
    Down,
    Na,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminState {
    Enabled,
    Disabled,
    Na,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    Access,
    Trunk,
    Hybrid,
    Routed,
    Na,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub remote_device_name: String,
    pub remote_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalPort {
    pub index: u32,
    pub name: String,
    pub oper_state: OperState,
    pub admin_state: AdminState,
    pub speed_mbps: Option<u32>,
    pub duplex: Option<String>,
    pub link_mode: LinkMode,
    pub access_vlan: Option<u16>,
    pub trunk_vlans: BTreeSet<u16>,
    pub lldp_neighbor: Option<LldpNeighbor>,
}

impl PhysicalPort {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            oper_state: OperState::Na,
            admin_state: AdminState::Na,
            speed_mbps: None,
            duplex: None,
            link_mode: LinkMode::Na,
            access_vlan: None,
            trunk_vlans: BTreeSet::new(),
            lldp_neighbor: None,
        }
    }

    /// §8.3 port-mode consistency invariant.
    pub fn mode_is_consistent(&self) -> bool {
        match self.link_mode {
            LinkMode::Access => self.trunk_vlans.is_empty(),
            LinkMode::Trunk => self.access_vlan.is_none(),
            LinkMode::Hybrid | LinkMode::Routed | LinkMode::Na => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn access_port_has_no_trunk_vlans() {
        let mut port = PhysicalPort::new(1, "Eth1");
        port.link_mode = LinkMode::Access;
        port.access_vlan = Some(10);
        assert!(port.mode_is_consistent());
        port.trunk_vlans.insert(20);
        assert!(!port.mode_is_consistent());
    }

    #[test]
    fn trunk_port_has_no_access_vlan() {
        let mut port = PhysicalPort::new(2, "Eth2");
        port.link_mode = LinkMode::Trunk;
        port.trunk_vlans.insert(10);
        assert!(port.mode_is_consistent());
        port.access_vlan = Some(5);
        assert!(!port.mode_is_consistent());
    }
}
