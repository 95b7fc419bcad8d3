//! Firewall family: a pfSense-like appliance. L3 interfaces are
//! identified by synthetic keys (not physical port names), ports can be
//! collected into interface groups, and BGP is only meaningful in the
//! device's default VRF — any BGP call naming another VRF is rejected.

use super::{
    BgpInstanceRequest, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest, VrfRequest,
};
use crate::model::{LinkMode, PhysicalPort, StaticRoute, BgpNeighbor};
use crate::sbi::{JsonTransport, RawSshDriver, RestDriver, RestMethod};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_VRF: &str = "default";

pub struct FirewallDialect {
    rest: Arc<dyn JsonTransport>,
    frr: RawSshDriver,
}

impl FirewallDialect {
    pub fn new(rest: RestDriver, frr: RawSshDriver) -> Self {
        Self {
            rest: Arc::new(rest),
            frr,
        }
    }

    fn synthetic_key(vlan_id: u16) -> String {
        format!("opt_vlan{vlan_id}")
    }

    fn require_default_vrf(vrf: &str) -> Result<(), DeviceError> {
        if vrf != DEFAULT_VRF {
            return Err(DeviceError::PreconditionFailed(format!(
                "firewall family only runs bgp in the {DEFAULT_VRF} vrf, not {vrf}"
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct InterfaceGroupDoc {
    name: String,
    members: Vec<String>,
}

#[derive(Deserialize)]
struct InterfaceDoc {
    key: String,
    #[serde(default)]
    vlans: Vec<u16>,
}

#[async_trait]
impl FamilyDialect for FirewallDialect {
    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
        let body = self.rest.get("interface").await?;
        let interfaces: Vec<InterfaceDoc> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad interface document: {e}")))?;
        let groups_body = self.rest.get("interface-group").await?;
        let _groups: Vec<InterfaceGroupDoc> = serde_json::from_value(groups_body).unwrap_or_default();
        let mut vlans = std::collections::BTreeSet::new();
        let mut ports = Vec::new();
        for (index, iface) in interfaces.into_iter().enumerate() {
            vlans.extend(iface.vlans.iter().copied());
            let mut port = PhysicalPort::new(index as u32 + 1, iface.key);
            port.link_mode = LinkMode::Hybrid;
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
        for id in ids {
            self.rest
                .send(
                    RestMethod::Post,
                    "interface",
                    json!({ "key": Self::synthetic_key(*id), "vlan": id }),
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_del_vlan(&self, ids: &[u16], force: bool) -> Result<(), DeviceError> {
        for id in ids {
            self.rest
                .send(
                    RestMethod::Delete,
                    &format!("interface/{}?force={force}", Self::synthetic_key(*id)),
                    json!({}),
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        _mode: LinkMode,
        _pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Patch,
                &format!("interface-group/{port_name}"),
                json!({ "add_vlan": vid }),
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
                RestMethod::Patch,
                &format!("interface-group/{port_name}"),
                json!({ "remove_vlans": ids }),
            )
            .await?;
        Ok(())
    }

    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        if mode != LinkMode::Hybrid {
            return Err(DeviceError::PreconditionFailed(
                "firewall ports are always hybrid (tagged sub-interfaces)".into(),
            ));
        }
        self.rest
            .send(RestMethod::Patch, &format!("interface-group/{port_name}"), json!({}))
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_vrf(&self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError> {
        let key = Self::synthetic_key(request.vlan_id);
        self.rest
            .send(
                RestMethod::Patch,
                &format!("interface/{key}"),
                json!({ "vrf": vrf, "address": request.cidr.map(|c| c.to_string()) }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, vid: u16) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Patch,
                &format!("interface/{}", Self::synthetic_key(vid)),
                json!({ "vrf": serde_json::Value::Null }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_vrf(&self, request: VrfRequest) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "vrf",
                json!({ "name": request.name, "rd": request.route_distinguisher }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_vrf(&self, name: &str) -> Result<(), DeviceError> {
        self.rest.send(RestMethod::Delete, &format!("vrf/{name}"), json!({})).await?;
        Ok(())
    }

    async fn apply_bind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Patch, &format!("vrf/{a}"), json!({ "bind": b }))
            .await?;
        Ok(())
    }

    async fn apply_unbind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.rest
            .send(RestMethod::Patch, &format!("vrf/{a}"), json!({ "unbind": b }))
            .await?;
        Ok(())
    }

    async fn apply_add_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Post,
                "staticroutes",
                json!({ "network": route.destination.to_string(), "gateway": route.next_hop.to_string(), "vrf": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_del_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.rest
            .send(
                RestMethod::Delete,
                "staticroutes",
                json!({ "network": route.destination.to_string(), "gateway": route.next_hop.to_string(), "vrf": vrf }),
            )
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_instance(&self, request: BgpInstanceRequest) -> Result<(), DeviceError> {
        Self::require_default_vrf(&request.vrf_name)?;
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("router bgp {}", request.as_number),
                format!("bgp router-id {}", request.router_id),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_instance(&self, vrf_name: &str) -> Result<(), DeviceError> {
        Self::require_default_vrf(vrf_name)?;
        self.frr
            .vtysh(vec!["configure terminal".into(), "no router bgp".into()])
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_peer(&self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError> {
        Self::require_default_vrf(vrf)?;
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                "router bgp".into(),
                format!("neighbor {} remote-as {}", peer.ip, peer.remote_as),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_peer(&self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError> {
        Self::require_default_vrf(vrf)?;
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                "router bgp".into(),
                format!("no neighbor {peer_ip}"),
            ])
            .await?;
        Ok(())
    }

    async fn commit_and_save(&self) -> Result<(), DeviceError> {
        self.rest.send(RestMethod::Post, "config/save", json!({})).await?;
        self.frr.vtysh(vec!["write memory".into()]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synthetic_key_is_stable_for_a_vlan() {
        assert_eq!(FirewallDialect::synthetic_key(150), "opt_vlan150");
    }

    #[test]
    fn non_default_vrf_is_rejected_for_bgp() {
        assert!(FirewallDialect::require_default_vrf("tenant-1").is_err());
        assert!(FirewallDialect::require_default_vrf("default").is_ok());
    }
}
