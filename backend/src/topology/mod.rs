//! Topology & overlay engine (§4.4). Rebuilt from scratch after every
//! device create/update/delete — negligible cost for tens of devices, and
//! it sidesteps incremental-patch bugs (§9) — then held behind an `Arc` so
//! readers share one snapshot while the next rebuild is in flight, the
//! same discipline as the teacher's `TopologyHolder`/`Topology` split.

pub mod graph;

use crate::model::{PhysicalPort, Vrf};
use graph::{Edge, PhysicalGraph};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One managed device's ports, as seen by the engine.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub name: String,
    pub ready: bool,
    pub ports: Vec<PhysicalPort>,
    pub l3_vlans: BTreeSet<u16>,
}

/// §4.4 VLAN termination record: for one (switch, vlan) pair, whether the
/// switch routes that VLAN and which server-facing ports carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VlanTerminationRecord {
    pub has_l3_interface: bool,
    pub server_ports: BTreeSet<String>,
}

impl VlanTerminationRecord {
    pub fn is_empty(&self) -> bool {
        !self.has_l3_interface && self.server_ports.is_empty()
    }
}

/// A single "add this vlan on this port" action the backbone-plumbing
/// rules request; the intent worker executes these against the device
/// adapters (the engine itself never talks to a device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlumbingAction {
    pub device: String,
    pub port: String,
    pub vlan_id: u16,
    pub add: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FabricGraph {
    pub physical: PhysicalGraph,
    pub terminations: BTreeMap<(String, u16), VlanTerminationRecord>,
    ready: BTreeSet<String>,
}

impl FabricGraph {
    /// Rebuilds the whole graph from a fresh read of every managed
    /// device's ports (§4.4). Adjacency is discovered per the LLDP
    /// neighbor on each port; an edge is only created when the remote
    /// name resolves to another device in `devices`.
    pub fn rebuild(devices: &[DeviceSnapshot]) -> Self {
        let by_name: BTreeMap<&str, &DeviceSnapshot> =
            devices.iter().map(|d| (d.name.as_str(), d)).collect();
        let mut nodes = BTreeSet::new();
        let mut ready = BTreeSet::new();
        for device in devices {
            nodes.insert(device.name.clone());
            if device.ready {
                ready.insert(device.name.clone());
            }
        }

        let mut edges: Vec<Edge> = Vec::new();
        let mut seen_pairs: BTreeSet<(String, String, String, String)> = BTreeSet::new();
        for device in devices {
            for port in &device.ports {
                let Some(neighbor) = &port.lldp_neighbor else {
                    continue;
                };
                if !by_name.contains_key(neighbor.remote_device_name.as_str()) {
                    continue;
                }
                let key = if device.name <= neighbor.remote_device_name {
                    (
                        device.name.clone(),
                        port.name.clone(),
                        neighbor.remote_device_name.clone(),
                        neighbor.remote_port.clone(),
                    )
                } else {
                    (
                        neighbor.remote_device_name.clone(),
                        neighbor.remote_port.clone(),
                        device.name.clone(),
                        port.name.clone(),
                    )
                };
                if !seen_pairs.insert(key.clone()) {
                    continue;
                }
                let mut carried = port.trunk_vlans.clone();
                if let Some(v) = port.access_vlan {
                    carried.insert(v);
                }
                let mut asymmetric = BTreeSet::new();
                let mut remote_speed_mbps = None;
                // Cross-check from the remote side: merge its carried set
                // and flag vlans only the local side reports.
                if let Some(remote_device) = by_name.get(neighbor.remote_device_name.as_str()) {
                    if let Some(remote_port) =
                        remote_device.ports.iter().find(|p| p.name == neighbor.remote_port)
                    {
                        let mut remote_carried = remote_port.trunk_vlans.clone();
                        if let Some(v) = remote_port.access_vlan {
                            remote_carried.insert(v);
                        }
                        asymmetric = carried.difference(&remote_carried).copied().collect();
                        asymmetric.extend(remote_carried.difference(&carried).copied());
                        carried.extend(remote_carried);
                        remote_speed_mbps = remote_port.speed_mbps;
                    }
                }
                // §3 edge weight: 1_000_000 / link speed, default 1000
                // Mbps; the slower of the two endpoints sets the link speed.
                let link_speed_mbps = match (port.speed_mbps, remote_speed_mbps) {
                    (Some(a), Some(b)) => a.min(b),
                    (Some(a), None) | (None, Some(a)) => a,
                    (None, None) => 1000,
                }
                .max(1);
                edges.push(Edge {
                    a: key.0,
                    b: key.2.clone(),
                    port_a: key.1,
                    port_b: key.3,
                    carried_vlans: carried,
                    weight: 1_000_000 / link_speed_mbps,
                    asymmetric_vlans: asymmetric,
                });
            }
        }

        let mut terminations: BTreeMap<(String, u16), VlanTerminationRecord> = BTreeMap::new();
        for device in devices {
            for vid in &device.l3_vlans {
                terminations
                    .entry((device.name.clone(), *vid))
                    .or_default()
                    .has_l3_interface = true;
            }
            for port in &device.ports {
                let is_server_facing = port
                    .lldp_neighbor
                    .as_ref()
                    .map(|n| !by_name.contains_key(n.remote_device_name.as_str()))
                    .unwrap_or(true);
                if !is_server_facing {
                    continue;
                }
                let mut vids: BTreeSet<u16> = port.trunk_vlans.clone();
                if let Some(v) = port.access_vlan {
                    vids.insert(v);
                }
                for vid in vids {
                    terminations
                        .entry((device.name.clone(), vid))
                        .or_default()
                        .server_ports
                        .insert(port.name.clone());
                }
            }
        }

        Self {
            physical: PhysicalGraph { nodes, edges },
            terminations,
            ready,
        }
    }

    pub fn is_ready(&self, device: &str) -> bool {
        self.ready.contains(device)
    }

    /// §4.4 per-VLAN overlay: edges carrying V, plus every node that has
    /// the VLAN's L3 interface or a server-facing termination for it.
    pub fn vlan_overlay(&self, vid: u16) -> PhysicalGraph {
        let edges: Vec<Edge> = self
            .physical
            .edges
            .iter()
            .filter(|e| e.carried_vlans.contains(&vid))
            .cloned()
            .collect();
        let mut nodes: BTreeSet<String> = edges.iter().flat_map(|e| [e.a.clone(), e.b.clone()]).collect();
        for ((device, v), record) in &self.terminations {
            if *v == vid && !record.is_empty() {
                nodes.insert(device.clone());
            }
        }
        PhysicalGraph { nodes, edges }
    }

    /// §4.4 per-VRF overlay: union of the per-VLAN overlays for every VLAN
    /// in the VRF, with each edge's carried set intersected with the VRF's
    /// VLAN set.
    pub fn vrf_overlay(&self, vrf: &Vrf, vrf_vlans: &BTreeSet<u16>) -> PhysicalGraph {
        let _ = vrf;
        let mut nodes = BTreeSet::new();
        let mut edges_by_pair: BTreeMap<(String, String, String, String), Edge> = BTreeMap::new();
        for vid in vrf_vlans {
            let overlay = self.vlan_overlay(*vid);
            nodes.extend(overlay.nodes);
            for edge in overlay.edges {
                let key = (edge.a.clone(), edge.port_a.clone(), edge.b.clone(), edge.port_b.clone());
                edges_by_pair
                    .entry(key)
                    .and_modify(|existing| {
                        existing.carried_vlans = existing
                            .carried_vlans
                            .intersection(&edge.carried_vlans)
                            .copied()
                            .collect();
                    })
                    .or_insert_with(|| {
                        let mut e = edge.clone();
                        e.carried_vlans = e.carried_vlans.intersection(vrf_vlans).copied().collect();
                        e
                    });
            }
        }
        PhysicalGraph {
            nodes,
            edges: edges_by_pair.into_values().collect(),
        }
    }

    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.physical.shortest_path(from, to, |n| self.is_ready(n))
    }

    /// §4.4 backbone rule 1: adding a termination for VLAN V on switch S.
    /// If V already terminates elsewhere, every backbone edge missing V
    /// gets it added on both endpoints.
    pub fn plan_add_termination(&self, switch: &str, vid: u16) -> Vec<PlumbingAction> {
        let has_elsewhere = self
            .terminations
            .iter()
            .any(|((device, v), record)| device != switch && *v == vid && !record.is_empty());
        if !has_elsewhere {
            return Vec::new();
        }
        let mut actions = Vec::new();
        for edge in &self.physical.edges {
            if edge.carried_vlans.contains(&vid) {
                continue;
            }
            actions.push(PlumbingAction {
                device: edge.a.clone(),
                port: edge.port_a.clone(),
                vlan_id: vid,
                add: true,
            });
            actions.push(PlumbingAction {
                device: edge.b.clone(),
                port: edge.port_b.clone(),
                vlan_id: vid,
                add: true,
            });
        }
        actions
    }

    /// §4.4 backbone rule 2: removing the last termination for VLAN V on
    /// switch S. Walk the backbone and drop V from edges whose other
    /// endpoint no longer terminates it (unless that endpoint still needs
    /// it for an L3 interface).
    pub fn plan_remove_termination(&self, switch: &str, vid: u16) -> Vec<PlumbingAction> {
        let still_terminated = |device: &str| {
            self.terminations
                .get(&(device.to_string(), vid))
                .map(|r| !r.is_empty())
                .unwrap_or(false)
        };
        let mut actions = Vec::new();
        for edge in &self.physical.edges {
            if !edge.carried_vlans.contains(&vid) {
                continue;
            }
            if edge.a != switch && edge.b != switch {
                continue;
            }
            let other = edge.other_end(switch).unwrap_or("");
            if still_terminated(other) {
                continue;
            }
            let (device, port) = if edge.a == switch {
                (edge.b.clone(), edge.port_b.clone())
            } else {
                (edge.a.clone(), edge.port_a.clone())
            };
            actions.push(PlumbingAction {
                device,
                port,
                vlan_id: vid,
                add: false,
            });
        }
        actions
    }
}

/// Holds the current snapshot behind an `Arc` so readers never block on a
/// rebuild in progress; mirrors the teacher's `TopologyHolder`.
#[derive(Debug, Clone, Default)]
pub struct TopologyHolder {
    data: Arc<Mutex<Option<Arc<FabricGraph>>>>,
}

impl TopologyHolder {
    pub async fn replace(&self, graph: FabricGraph) {
        *self.data.lock().await = Some(Arc::new(graph));
    }

    pub async fn current(&self) -> Option<Arc<FabricGraph>> {
        self.data.lock().await.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{AdminState, LinkMode, LldpNeighbor, OperState};

    fn port(name: &str, neighbor_device: &str, neighbor_port: &str, vlan: u16) -> PhysicalPort {
        let mut p = PhysicalPort::new(1, name);
        p.oper_state = OperState::Up;
        p.admin_state = AdminState::Enabled;
        p.link_mode = LinkMode::Trunk;
        p.trunk_vlans.insert(vlan);
        p.lldp_neighbor = Some(LldpNeighbor {
            remote_device_name: neighbor_device.into(),
            remote_port: neighbor_port.into(),
        });
        p
    }

    #[test]
    fn builds_one_edge_for_a_symmetric_pair() {
        let sw1 = DeviceSnapshot {
            name: "sw1".into(),
            ready: true,
            ports: vec![port("eth1", "sw2", "eth1", 100)],
            l3_vlans: BTreeSet::new(),
        };
        let sw2 = DeviceSnapshot {
            name: "sw2".into(),
            ready: true,
            ports: vec![port("eth1", "sw1", "eth1", 100)],
            l3_vlans: BTreeSet::new(),
        };
        let graph = FabricGraph::rebuild(&[sw1, sw2]);
        assert_eq!(graph.physical.edges.len(), 1);
        assert!(graph.physical.edges[0].carried_vlans.contains(&100));
    }

    #[test]
    fn edge_weight_is_derived_from_the_slower_endpoint_speed() {
        let mut sw1_port = port("eth1", "sw2", "eth1", 100);
        sw1_port.speed_mbps = Some(10000);
        let mut sw2_port = port("eth1", "sw1", "eth1", 100);
        sw2_port.speed_mbps = Some(1000);
        let sw1 = DeviceSnapshot {
            name: "sw1".into(),
            ready: true,
            ports: vec![sw1_port],
            l3_vlans: BTreeSet::new(),
        };
        let sw2 = DeviceSnapshot {
            name: "sw2".into(),
            ready: true,
            ports: vec![sw2_port],
            l3_vlans: BTreeSet::new(),
        };
        let graph = FabricGraph::rebuild(&[sw1, sw2]);
        assert_eq!(graph.physical.edges[0].weight, 1_000_000 / 1000);
    }

    #[test]
    fn edge_weight_defaults_to_1000_mbps_when_speed_is_unknown() {
        let sw1 = DeviceSnapshot {
            name: "sw1".into(),
            ready: true,
            ports: vec![port("eth1", "sw2", "eth1", 100)],
            l3_vlans: BTreeSet::new(),
        };
        let sw2 = DeviceSnapshot {
            name: "sw2".into(),
            ready: true,
            ports: vec![port("eth1", "sw1", "eth1", 100)],
            l3_vlans: BTreeSet::new(),
        };
        let graph = FabricGraph::rebuild(&[sw1, sw2]);
        assert_eq!(graph.physical.edges[0].weight, 1_000_000 / 1000);
    }

    #[test]
    fn backbone_gets_vlan_added_when_new_termination_appears_elsewhere() {
        let mut server_port = PhysicalPort::new(2, "eth2");
        server_port.link_mode = LinkMode::Access;
        server_port.access_vlan = Some(200);
        let sw1 = DeviceSnapshot {
            name: "sw1".into(),
            ready: true,
            ports: vec![port("eth1", "sw2", "eth1", 100), server_port],
            l3_vlans: BTreeSet::new(),
        };
        let mut sw2_server_port = PhysicalPort::new(2, "eth2");
        sw2_server_port.link_mode = LinkMode::Access;
        sw2_server_port.access_vlan = Some(200);
        let sw2 = DeviceSnapshot {
            name: "sw2".into(),
            ready: true,
            ports: vec![port("eth1", "sw1", "eth1", 100), sw2_server_port],
            l3_vlans: BTreeSet::new(),
        };
        let graph = FabricGraph::rebuild(&[sw1, sw2]);
        let actions = graph.plan_add_termination("sw2", 200);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.vlan_id == 200 && a.add));
    }
}
