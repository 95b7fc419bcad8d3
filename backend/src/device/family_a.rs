//! Family A: a CLI-comware-like switch. Inventory is read as free text over
//! SSH and template-parsed; mutations go through a configure/commit
//! sequence. VLAN ranges render as `"a to b"` and VRF target lists come
//! back as multi-line blocks that have to be reassembled.

use super::{
    BgpInstanceRequest, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest, VrfRequest,
};
use crate::model::{LinkMode, PhysicalPort, StaticRoute, BgpNeighbor};
use crate::sbi::{CliTransport, SshCliDriver};
use async_trait::async_trait;
use std::sync::Arc;

pub struct FamilyADialect {
    transport: Arc<dyn CliTransport>,
}

impl FamilyADialect {
    pub fn new(driver: SshCliDriver) -> Self {
        Self {
            transport: Arc::new(driver),
        }
    }

    /// Parses `"10 to 15, 20, 30 to 31"` style ranges into individual ids.
    fn parse_vlan_ranges(text: &str) -> std::collections::BTreeSet<u16> {
        let mut ids = std::collections::BTreeSet::new();
        for chunk in text.split(',') {
            let chunk = chunk.trim();
            if let Some((lo, hi)) = chunk.split_once(" to ") {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
                    ids.extend(lo..=hi);
                }
            } else if let Ok(id) = chunk.parse::<u16>() {
                ids.insert(id);
            }
        }
        ids
    }

    fn render_vlan_ranges(ids: &[u16]) -> String {
        ids.iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn configure(&self, lines: Vec<String>) -> Result<(), DeviceError> {
        for line in lines {
            self.transport.exec(&line).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FamilyDialect for FamilyADialect {
    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
        let raw = self.transport.exec("display current-configuration").await?;
        let mut vlans = std::collections::BTreeSet::new();
        for line in raw.lines() {
            if let Some(rest) = line.trim().strip_prefix("vlan ") {
                vlans.extend(Self::parse_vlan_ranges(rest));
            }
        }
        let ports = parse_interfaces(&raw);
        Ok(Inventory {
            ports,
            vlans,
            l3_interfaces: Vec::new(),
            vrfs: Vec::new(),
            raw_config: raw,
        })
    }

    async fn apply_add_vlan(&self, ids: &[u16]) -> Result<(), DeviceError> {
        self.configure(vec![format!("vlan {}", Self::render_vlan_ranges(ids))])
            .await
    }

    async fn apply_del_vlan(&self, ids: &[u16], _force: bool) -> Result<(), DeviceError> {
        self.configure(vec![format!("undo vlan {}", Self::render_vlan_ranges(ids))])
            .await
    }

    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        let mut lines = vec![format!("interface {port_name}")];
        match mode {
            LinkMode::Trunk => lines.push(format!("port trunk permit vlan {vid}")),
            LinkMode::Access => lines.push(format!("port access vlan {vid}")),
            LinkMode::Hybrid => {
                lines.push(format!("port hybrid vlan {vid} tagged"));
                if let Some(pvid) = pvid {
                    lines.push(format!("port hybrid pvid vlan {pvid}"));
                }
            }
            LinkMode::Routed | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed(
                    "family A cannot assign vlan membership to a routed port".into(),
                ))
            }
        }
        self.configure(lines).await
    }

    async fn apply_del_vlan_to_port(
        &self,
        ids: &[u16],
        port_name: &str,
        mode: LinkMode,
    ) -> Result<(), DeviceError> {
        let mut lines = vec![format!("interface {port_name}")];
        for vid in ids {
            match mode {
                LinkMode::Trunk => lines.push(format!("undo port trunk permit vlan {vid}")),
                LinkMode::Access => lines.push("undo port access vlan".to_string()),
                LinkMode::Hybrid => lines.push(format!("undo port hybrid vlan {vid} tagged")),
                LinkMode::Routed | LinkMode::Na => {}
            }
        }
        self.configure(lines).await
    }

    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        let link_type = match mode {
            LinkMode::Access => "access",
            LinkMode::Trunk => "trunk",
            LinkMode::Hybrid => "hybrid",
            LinkMode::Routed | LinkMode::Na => {
                return Err(DeviceError::PreconditionFailed(
                    "family A has no routed/na link-type keyword".into(),
                ))
            }
        };
        self.configure(vec![
            format!("interface {port_name}"),
            format!("port link-type {link_type}"),
        ])
        .await
    }

    async fn apply_add_vlan_to_vrf(&self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError> {
        let mut lines = vec![format!("interface Vlan-interface{}", request.vlan_id)];
        lines.push(format!("ip binding vpn-instance {vrf}"));
        if let Some(cidr) = request.cidr {
            lines.push(format!("ip address {}", cidr));
        }
        self.configure(lines).await
    }

    async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, vid: u16) -> Result<(), DeviceError> {
        self.configure(vec![format!("undo interface Vlan-interface{vid}")])
            .await
    }

    async fn apply_add_vrf(&self, request: VrfRequest) -> Result<(), DeviceError> {
        let mut lines = vec![format!("ip vpn-instance {}", request.name)];
        lines.push(format!("route-distinguisher {}", request.route_distinguisher));
        lines.push("vpn-target".to_string());
        for rt in request.import_route_targets.iter().chain(request.export_route_targets.iter()) {
            lines.push(format!(" {rt}"));
        }
        self.configure(lines).await
    }

    async fn apply_del_vrf(&self, name: &str) -> Result<(), DeviceError> {
        self.configure(vec![format!("undo ip vpn-instance {name}")])
            .await
    }

    async fn apply_bind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.configure(vec![format!("vpn-instance bind {a} {b}")]).await
    }

    async fn apply_unbind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.configure(vec![format!("undo vpn-instance bind {a} {b}")]).await
    }

    async fn apply_add_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.configure(vec![format!(
            "ip route-static vpn-instance {vrf} {} {}",
            route.destination, route.next_hop
        )])
        .await
    }

    async fn apply_del_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.configure(vec![format!(
            "undo ip route-static vpn-instance {vrf} {} {}",
            route.destination, route.next_hop
        )])
        .await
    }

    async fn apply_add_bgp_instance(&self, request: BgpInstanceRequest) -> Result<(), DeviceError> {
        self.configure(vec![
            format!("bgp {}", request.as_number),
            format!("router-id {}", request.router_id),
            format!("ip vpn-instance {}", request.vrf_name),
        ])
        .await
    }

    async fn apply_del_bgp_instance(&self, vrf_name: &str) -> Result<(), DeviceError> {
        self.configure(vec![format!("undo bgp vpn-instance {vrf_name}")]).await
    }

    async fn apply_add_bgp_peer(&self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError> {
        self.configure(vec![
            format!("ip vpn-instance {vrf}"),
            format!("peer {} as-number {}", peer.ip, peer.remote_as),
        ])
        .await
    }

    async fn apply_del_bgp_peer(&self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError> {
        self.configure(vec![
            format!("ip vpn-instance {vrf}"),
            format!("undo peer {peer_ip}"),
        ])
        .await
    }

    async fn commit_and_save(&self) -> Result<(), DeviceError> {
        self.configure(vec!["commit".to_string(), "save force".to_string()])
            .await
    }
}

fn parse_interfaces(raw: &str) -> Vec<PhysicalPort> {
    let mut ports = Vec::new();
    let mut index = 0u32;
    for line in raw.lines() {
        if let Some(name) = line.trim().strip_prefix("interface ") {
            index += 1;
            ports.push(PhysicalPort::new(index, name.trim()));
        }
    }
    ports
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_comma_and_range_vlan_lists() {
        let ids = FamilyADialect::parse_vlan_ranges("10 to 12, 20, 30 to 31");
        assert_eq!(
            ids,
            [10, 11, 12, 20, 30, 31].into_iter().collect::<std::collections::BTreeSet<_>>()
        );
    }

    #[test]
    fn finds_interface_stanzas_in_running_config() {
        let raw = "vlan 10\ninterface GigabitEthernet0/0/1\nport access vlan 10\ninterface GigabitEthernet0/0/2\n";
        let ports = parse_interfaces(raw);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "GigabitEthernet0/0/1");
    }
}
