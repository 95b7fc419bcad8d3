//! Family B: a CLI-cumulus-like SONiC switch. Inventory and VLAN/port
//! mutations go over the device's REST config API; routing lives
//! entirely in FRR behind a separate `vtysh` channel over raw SSH.

use super::{
    BgpInstanceRequest, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest, VrfRequest,
};
use crate::model::{LinkMode, PhysicalPort, StaticRoute, BgpNeighbor};
use crate::sbi::{JsonTransport, RawSshDriver, RestDriver, RestMethod};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct FamilyBDialect {
    rest: Arc<dyn JsonTransport>,
    frr: RawSshDriver,
}

impl FamilyBDialect {
    pub fn new(rest: RestDriver, frr: RawSshDriver) -> Self {
        Self {
            rest: Arc::new(rest),
            frr,
        }
    }
}

#[derive(Deserialize)]
struct PortDocument {
    name: String,
    mode: String,
    #[serde(default)]
    tagged: Vec<u16>,
    #[serde(default)]
    untagged: Option<u16>,
}

fn mode_from_tag_kind(mode: &str) -> LinkMode {
    match mode {
        "access" => LinkMode::Access,
        "trunk" => LinkMode::Trunk,
        "routed" => LinkMode::Routed,
        _ => LinkMode::Na,
    }
}

#[async_trait]
impl FamilyDialect for FamilyBDialect {
    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
        let body = self.rest.get("ports").await?;
        let docs: Vec<PortDocument> = serde_json::from_value(body)
            .map_err(|e| DeviceError::Inconsistent(format!("bad port document: {e}")))?;
        let mut vlans = std::collections::BTreeSet::new();
        let mut ports = Vec::new();
        for (index, doc) in docs.into_iter().enumerate() {
            vlans.extend(doc.tagged.iter().copied());
            if let Some(v) = doc.untagged {
                vlans.insert(v);
            }
            let mut port = PhysicalPort::new(index as u32 + 1, doc.name);
            port.link_mode = mode_from_tag_kind(&doc.mode);
            port.access_vlan = doc.untagged;
            port.trunk_vlans = doc.tagged.into_iter().collect();
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
                .send(RestMethod::Post, "vlans", json!({ "vlan_id": id }))
                .await?;
        }
        Ok(())
    }

    async fn apply_del_vlan(&self, ids: &[u16], force: bool) -> Result<(), DeviceError> {
        for id in ids {
            self.rest
                .send(RestMethod::Delete, &format!("vlans/{id}?force={force}"), json!({}))
                .await?;
        }
        Ok(())
    }

    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        let tag_kind = match mode {
            LinkMode::Access => "untagged",
            LinkMode::Trunk | LinkMode::Hybrid => "tagged",
            LinkMode::Routed | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed(
                    "family B has no vlan membership on a routed port".into(),
                ))
            }
        };
        self.rest
            .send(
                RestMethod::Patch,
                &format!("ports/{port_name}/vlan-members"),
                json!({ "vlan_id": vid, "tag_mode": tag_kind, "pvid": pvid }),
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
        for id in ids {
            self.rest
                .send(
                    RestMethod::Delete,
                    &format!("ports/{port_name}/vlan-members/{id}"),
                    json!({}),
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        let value = match mode {
            LinkMode::Access => "access",
            LinkMode::Trunk => "trunk",
            LinkMode::Routed => "routed",
            LinkMode::Hybrid | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed("family B has no hybrid/na mode".into()))
            }
        };
        self.rest
            .send(RestMethod::Patch, &format!("ports/{port_name}"), json!({ "mode": value }))
            .await?;
        Ok(())
    }

    async fn apply_add_vlan_to_vrf(&self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("interface Vlan{}", request.vlan_id),
                format!("vrf forwarding {vrf}"),
                request
                    .cidr
                    .map(|c| format!("ip address {c}"))
                    .unwrap_or_default(),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, vid: u16) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec!["configure terminal".into(), format!("no interface Vlan{vid}")])
            .await?;
        Ok(())
    }

    async fn apply_add_vrf(&self, request: VrfRequest) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("vrf {}", request.name),
                format!("rd {}", request.route_distinguisher),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_vrf(&self, name: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec!["configure terminal".into(), format!("no vrf {name}")])
            .await?;
        Ok(())
    }

    async fn apply_bind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec!["configure terminal".into(), format!("vrf {a} bind {b}")])
            .await?;
        Ok(())
    }

    async fn apply_unbind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec!["configure terminal".into(), format!("no vrf {a} bind {b}")])
            .await?;
        Ok(())
    }

    async fn apply_add_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![format!(
                "ip route {} {} vrf {vrf}",
                route.destination, route.next_hop
            )])
            .await?;
        Ok(())
    }

    async fn apply_del_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![format!(
                "no ip route {} {} vrf {vrf}",
                route.destination, route.next_hop
            )])
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_instance(&self, request: BgpInstanceRequest) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("router bgp {} vrf {}", request.as_number, request.vrf_name),
                format!("bgp router-id {}", request.router_id),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_instance(&self, vrf_name: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec!["configure terminal".into(), format!("no router bgp vrf {vrf_name}")])
            .await?;
        Ok(())
    }

    async fn apply_add_bgp_peer(&self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("router bgp vrf {vrf}"),
                format!("neighbor {} remote-as {}", peer.ip, peer.remote_as),
            ])
            .await?;
        Ok(())
    }

    async fn apply_del_bgp_peer(&self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError> {
        self.frr
            .vtysh(vec![
                "configure terminal".into(),
                format!("router bgp vrf {vrf}"),
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
