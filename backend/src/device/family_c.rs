//! Family C: a REST-only Mellanox-like switch. The device exposes its
//! whole config as an XML-RPC-style object tree over REST; there are
//! three port VLAN modes (access / trunk / hybrid) and the family has no
//! VRF support at all.

use super::{
    BgpInstanceRequest, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest, VrfRequest,
};
use crate::model::{LinkMode, PhysicalPort, StaticRoute, BgpNeighbor};
use crate::sbi::{JsonTransport, RestDriver, RestMethod};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct FamilyCDialect {
    rest: Arc<dyn JsonTransport>,
}

impl FamilyCDialect {
    pub fn new(rest: RestDriver) -> Self {
        Self { rest: Arc::new(rest) }
    }

    fn no_vrf() -> DeviceError {
        DeviceError::PreconditionFailed("family C has no VRF support".into())
    }
}

#[derive(Deserialize)]
struct NodeInterface {
    name: String,
    #[serde(rename = "switchport-mode")]
    switchport_mode: String,
    #[serde(default)]
    vlans: Vec<u16>,
}

#[derive(Deserialize)]
struct ObjectTree {
    interface: Vec<NodeInterface>,
}

#[async_trait]
impl FamilyDialect for FamilyCDialect {
    fn supports_vrf(&self) -> bool {
        false
    }

    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
        let body = self.rest.get("object-tree").await?;
        let tree: ObjectTree = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad object tree: {e}")))?;
        let mut vlans = std::collections::BTreeSet::new();
        let mut ports = Vec::new();
        for (index, iface) in tree.interface.into_iter().enumerate() {
            vlans.extend(iface.vlans.iter().copied());
            let mut port = PhysicalPort::new(index as u32 + 1, iface.name);
            port.link_mode = match iface.switchport_mode.as_str() {
                "access" => LinkMode::Access,
                "trunk" => LinkMode::Trunk,
                "hybrid" => LinkMode::Hybrid,
                _ => LinkMode::Na,
            };
            port.trunk_vlans = iface.vlans.into_iter().collect();
            ports.push(port);
        }
        Ok(Inventory {
            ports,
            vlans,
            l3_interfaces: Vec::new(),
            vrfs: Vec::new(),
            raw_config: String::new(),
        })
    }

    async fn apply_add_vlan(&self, ids: &[u16]) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Post, "object-tree/vlan", json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn apply_del_vlan(&self, ids: &[u16], force: bool) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                "object-tree/vlan",
                json!({ "ids": ids, "force": force }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        if !matches!(mode, LinkMode::Access | LinkMode::Trunk | LinkMode::Hybrid) {
            return Err(DeviceError::PreconditionFailed(
                "family C ports only support access, trunk or hybrid".into(),
            ));
        }
        self.rest
            .send(
                RestMethod::Patch,
                &format!("object-tree/interface/{port_name}/vlans"),
                json!({ "vlan_id": vid, "pvid": pvid }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_vlan_to_port(
        &self,
        ids: &[u16],
        port_name: &str,
        _mode: LinkMode,
    ) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                &format!("object-tree/interface/{port_name}/vlans"),
                json!({ "ids": ids }),
            )
            .await?;
        Ok(())
    }

    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        let value = match mode {
            LinkMode::Access => "access",
            LinkMode::Trunk => "trunk",
            LinkMode::Hybrid => "hybrid",
            LinkMode::Routed | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed(
                    "family C has no routed/na switchport-mode".into(),
                ))
            }
        };
        self.rest
            .send(
                RestMethod::Patch,
                &format!("object-tree/interface/{port_name}"),
                json!({ "switchport-mode": value }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_vrf(&self, _vrf: &str, _request: VlanToVrfRequest) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, _vid: u16) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_add_vrf(&self, _request: VrfRequest) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_del_vrf(&self, _name: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_bind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_unbind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_add_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_del_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_add_bgp_instance(&self, _request: BgpInstanceRequest) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_del_bgp_instance(&self, _vrf_name: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_add_bgp_peer(&self, _peer: BgpNeighbor, _vrf: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn apply_del_bgp_peer(&self, _peer_ip: std::net::IpAddr, _vrf: &str) -> Result<(), DeviceError> {
        Err(Self::no_vrf())
    }

    async fn commit_and_save(&self) -> Result<(), DeviceError> {
        self.rest.send(RestMethod::Post, "object-tree/save", json!({})).await?;
        Ok(())
    }
}
