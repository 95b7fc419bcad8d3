use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3Termination {
    pub switch: String,
    pub vlan_interface: String,
}

/// Per-VLAN termination record (§3). The overlay subgraph itself is derived
/// on demand by `topology::Topology::vlan_overlay`, not stored here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VlanTermination {
    pub vlan_id: u16,
    pub l3_termination: Option<L3Termination>,
    /// switch name -> server-facing tagged/untagged port names
    pub server_ports: BTreeMap<String, BTreeSet<String>>,
}

impl VlanTermination {
    pub fn new(vlan_id: u16) -> Self {
        Self {
            vlan_id,
            l3_termination: None,
            server_ports: BTreeMap::new(),
        }
    }

    pub fn switches(&self) -> BTreeSet<String> {
        let mut switches: BTreeSet<String> = self.server_ports.keys().cloned().collect();
        if let Some(l3) = &self.l3_termination {
            switches.insert(l3.switch.clone());
        }
        switches
    }

    pub fn termination_count(&self) -> usize {
        self.switches().len()
    }
}
