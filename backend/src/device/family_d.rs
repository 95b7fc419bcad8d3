//! Family D: a REST RouterOS-like switch. Unlike the other families, VLAN
//! membership is not one row per (port, vlan) — it is a single bridge-vlan
//! table where one row can list several VLAN ids plus tagged/untagged port
//! sets (grounded on the vendor's own `interface/bridge/vlan` resource,
//! keyed by `(bridge, tagged, untagged, vlan_ids)`). Adding or removing a
//! single VLAN on a single port usually means splitting a row that covers
//! several VLANs, or merging two rows whose port sets become identical.

use super::{
    BgpInstanceRequest, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest, VrfRequest,
};
use crate::model::{LinkMode, PhysicalPort, StaticRoute, BgpNeighbor};
use crate::sbi::{JsonTransport, RestDriver, RestMethod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct FamilyDDialect {
    rest: Arc<dyn JsonTransport>,
    bridge: String,
}

impl FamilyDDialect {
    pub fn new(rest: RestDriver, bridge: impl Into<String>) -> Self {
        Self {
            rest: Arc::new(rest),
            bridge: bridge.into(),
        }
    }
}

/// One row of `interface/bridge/vlan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeVlanRow {
    pub bridge: String,
    pub vlan_ids: BTreeSet<u16>,
    pub tagged: BTreeSet<String>,
    pub untagged: BTreeSet<String>,
}

impl BridgeVlanRow {
    fn ports_for(&self, vid: u16) -> (BTreeSet<String>, BTreeSet<String>) {
        if self.vlan_ids.contains(&vid) {
            (self.tagged.clone(), self.untagged.clone())
        } else {
            (BTreeSet::new(), BTreeSet::new())
        }
    }
}

/// Removes `vid` from every row that carries it, splitting a row when the
/// remaining vlan ids keep a distinct port set, and drops rows left empty.
fn split_vlan_out(rows: &mut Vec<BridgeVlanRow>, vid: u16) {
    let mut next = Vec::with_capacity(rows.len());
    for mut row in rows.drain(..) {
        if row.vlan_ids.remove(&vid) {
            if !row.vlan_ids.is_empty() {
                next.push(row);
            }
        } else {
            next.push(row);
        }
    }
    *rows = next;
}

/// Adds `vid` on `port` with the given tag kind, merging into an existing
/// row with the identical port set when one exists, otherwise creating a
/// new single-vlan row.
fn merge_vlan_in(rows: &mut Vec<BridgeVlanRow>, bridge: &str, vid: u16, port: &str, tagged: bool) {
    for row in rows.iter_mut() {
        let matches_port_set = if tagged {
            row.tagged.contains(port) && row.untagged.is_empty()
        } else {
            row.untagged.contains(port) && row.tagged.is_empty()
        };
        if matches_port_set {
            row.vlan_ids.insert(vid);
            return;
        }
    }
    let mut row = BridgeVlanRow {
        bridge: bridge.to_string(),
        vlan_ids: BTreeSet::from([vid]),
        tagged: BTreeSet::new(),
        untagged: BTreeSet::new(),
    };
    if tagged {
        row.tagged.insert(port.to_string());
    } else {
        row.untagged.insert(port.to_string());
    }
    rows.push(row);
}

#[async_trait]
impl FamilyDialect for FamilyDDialect {
    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
        let body = self.rest.get("interface/bridge/vlan").await?;
        let rows: Vec<BridgeVlanRow> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad bridge-vlan table: {e}")))?;
        let mut vlans = BTreeSet::new();
        let mut port_vlans: std::collections::BTreeMap<String, (BTreeSet<u16>, BTreeSet<u16>)> =
            std::collections::BTreeMap::new();
        for row in &rows {
            vlans.extend(row.vlan_ids.iter().copied());
            for port in &row.tagged {
                port_vlans.entry(port.clone()).or_default().0.extend(row.vlan_ids.iter().copied());
            }
            for port in &row.untagged {
                port_vlans.entry(port.clone()).or_default().1.extend(row.vlan_ids.iter().copied());
            }
        }
        let ports = port_vlans
            .into_iter()
            .enumerate()
            .map(|(index, (name, (tagged, untagged)))| {
                let mut port = PhysicalPort::new(index as u32 + 1, name);
                port.trunk_vlans = tagged;
                port.access_vlan = untagged.iter().next().copied();
                port.link_mode = if port.access_vlan.is_some() {
                    LinkMode::Access
                } else {
                    LinkMode::Trunk
                };
                port
            })
            .collect();
        Ok(Inventory {
            ports,
            vlans,
            l3_interfaces: Vec::new(),
            vrfs: Vec::new(),
            raw_config: String::new(),
        })
    }

    async fn apply_add_vlan(&self, ids: &[u16]) -> Result<(), DeviceError> {
        for id in ids {
            self.rest
                .send(RestMethod::Post, "interface/vlan", json!({ "vlan-id": id }))
                .await?;
        }
        Ok(())
    }

    async fn apply_del_vlan(&self, ids: &[u16], _force: bool) -> Result<(), DeviceError> {
        let body = self.rest.get("interface/bridge/vlan").await?;
        let mut rows: Vec<BridgeVlanRow> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad bridge-vlan table: {e}")))?;
        for id in ids {
            split_vlan_out(&mut rows, *id);
        }
        self.rest
            .send(RestMethod::Put, "interface/bridge/vlan", json!(rows))
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        _pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        let tagged = match mode {
            LinkMode::Trunk | LinkMode::Hybrid => true,
            LinkMode::Access => false,
            LinkMode::Routed | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed(
                    "family D cannot assign vlan membership to a routed port".into(),
                ))
            }
        };
        let body = self.rest.get("interface/bridge/vlan").await?;
        let mut rows: Vec<BridgeVlanRow> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad bridge-vlan table: {e}")))?;
        split_vlan_out(&mut rows, vid);
        merge_vlan_in(&mut rows, &self.bridge, vid, port_name, tagged);
        self.rest
            .send(RestMethod::Put, "interface/bridge/vlan", json!(rows))
            .await?;
        Ok(())
    }

    async fn apply_del_vlan_to_port(
        &self,
        ids: &[u16],
        port_name: &str,
        _mode: LinkMode,
    ) -> Result<(), DeviceError> {
        let body = self.rest.get("interface/bridge/vlan").await?;
        let mut rows: Vec<BridgeVlanRow> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad bridge-vlan table: {e}")))?;
        for row in rows.iter_mut() {
            if ids.iter().any(|v| row.vlan_ids.contains(v)) {
                row.tagged.remove(port_name);
                row.untagged.remove(port_name);
            }
        }
        rows.retain(|row| !row.tagged.is_empty() || !row.untagged.is_empty());
        self.rest
            .send(RestMethod::Put, "interface/bridge/vlan", json!(rows))
            .await?;
        Ok(())
    }

    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        if !matches!(mode, LinkMode::Access | LinkMode::Trunk) {
            return Err(DeviceError::PreconditionFailed(
                "family D ports are either access or trunk".into(),
            ));
        }
        self.rest
            .send(
                RestMethod::Patch,
                &format!("interface/bridge/port/{port_name}"),
                json!({ "frame-types": if mode == LinkMode::Access { "admit-only-untagged-and-priority-tagged" } else { "admit-all" } }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_vrf(&self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "interface/vlan",
                json!({ "vlan-id": request.vlan_id, "name": request.interface_name }),
            )
            .await?;
        self.rest
            .send(
                RestMethod::Post,
                "ip/address",
                json!({ "interface": request.interface_name, "address": request.cidr.map(|c| c.to_string()) }),
            )
            .await?;
        self.rest
            .send(
                RestMethod::Post,
                "ip/route/vrf",
                json!({ "interfaces": [request.interface_name], "routing-mark": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_vlan_to_vrf(&self, vrf_name: &str, vid: u16) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                &format!("ip/route/vrf/{vrf_name}"),
                json!({ "vlan_id": vid }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_vrf(&self, request: VrfRequest) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "ip/route/vrf",
                json!({
                    "routing-mark": request.name,
                    "route-distinguisher": request.route_distinguisher,
                    "import-route-targets": request.import_route_targets,
                    "export-route-targets": request.export_route_targets,
                }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_vrf(&self, name: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Delete, &format!("ip/route/vrf/{name}"), json!({}))
            .await?;
        Ok(())
    }

    async fn apply_bind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Patch, &format!("ip/route/vrf/{a}"), json!({ "bind": b }))
            .await?;
        Ok(())
    }

    async fn apply_unbind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Patch, &format!("ip/route/vrf/{a}"), json!({ "unbind": b }))
            .await?;
        Ok(())
    }

    async fn apply_add_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "ip/route",
                json!({ "dst-address": route.destination.to_string(), "gateway": route.next_hop.to_string(), "routing-mark": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                "ip/route",
                json!({ "dst-address": route.destination.to_string(), "gateway": route.next_hop.to_string(), "routing-mark": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_instance(&self, request: BgpInstanceRequest) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "routing/bgp/instance",
                json!({ "as": request.as_number, "router-id": request.router_id.to_string(), "routing-mark": request.vrf_name }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_instance(&self, vrf_name: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Delete, &format!("routing/bgp/instance/{vrf_name}"), json!({}))
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_peer(&self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "routing/bgp/connection",
                json!({ "remote-address": peer.ip.to_string(), "as": peer.remote_as, "routing-mark": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_peer(&self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                "routing/bgp/connection",
                json!({ "remote-address": peer_ip.to_string(), "routing-mark": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn commit_and_save(&self) -> Result<(), DeviceError> {
        self.rest.send(RestMethod::Post, "system/script/run", json!({ "name": "save-config" })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adding_vlan_to_new_port_creates_single_vlan_row() {
        let mut rows = Vec::new();
        merge_vlan_in(&mut rows, "bridge1", 100, "ether2", true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vlan_ids, BTreeSet::from([100]));
        assert!(rows[0].tagged.contains("ether2"));
    }

    #[test]
    fn adding_second_vlan_to_same_port_set_merges_rows() {
        let mut rows = Vec::new();
        merge_vlan_in(&mut rows, "bridge1", 100, "ether2", true);
        merge_vlan_in(&mut rows, "bridge1", 200, "ether2", true);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vlan_ids, BTreeSet::from([100, 200]));
    }

    #[test]
    fn removing_one_vlan_splits_a_multi_vlan_row() {
        let mut rows = vec![BridgeVlanRow {
            bridge: "bridge1".into(),
            vlan_ids: BTreeSet::from([100, 200]),
            tagged: BTreeSet::from(["ether2".to_string()]),
            untagged: BTreeSet::new(),
        }];
        split_vlan_out(&mut rows, 100);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vlan_ids, BTreeSet::from([200]));
    }

    #[test]
    fn removing_last_vlan_drops_the_row() {
        let mut rows = vec![BridgeVlanRow {
            bridge: "bridge1".into(),
            vlan_ids: BTreeSet::from([100]),
            tagged: BTreeSet::from(["ether2".to_string()]),
            untagged: BTreeSet::new(),
        }];
        split_vlan_out(&mut rows, 100);
        assert!(rows.is_empty());
    }
}
