use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpNeighbor {
    pub ip: IpAddr,
    pub remote_as: u32,
    pub update_source: Option<String>,
    pub description: Option<String>,
    pub received_routes: u32,
    pub sent_routes: u32,
    pub session_status: SessionStatus,
}

impl BgpNeighbor {
    pub fn new(ip: IpAddr, remote_as: u32) -> Self {
        Self {
            ip,
            remote_as,
            update_source: None,
            description: None,
            received_routes: 0,
            sent_routes: 0,
            session_status: SessionStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedistributeHint {
    Connected,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressFamily {
    pub redistribute: Vec<RedistributeHint>,
    pub vrf_imports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpInstance {
    pub as_number: u32,
    pub router_id: Ipv4Addr,
    pub neighbors: Vec<BgpNeighbor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRoute {
    pub destination: ipnet::Ipv4Net,
    pub next_hop: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vrf {
    pub name: String,
    pub route_distinguisher: String,
    pub description: Option<String>,
    pub export_route_targets: Vec<String>,
    pub import_route_targets: Vec<String>,
    pub l3_interfaces: Vec<String>,
    pub static_routes: Vec<StaticRoute>,
    pub bgp: Option<BgpInstance>,
    pub address_family: Option<AddressFamily>,
}

impl Vrf {
    pub fn new(name: impl Into<String>, route_distinguisher: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route_distinguisher: route_distinguisher.into(),
            description: None,
            export_route_targets: Vec::new(),
            import_route_targets: Vec::new(),
            l3_interfaces: Vec::new(),
            static_routes: Vec::new(),
            bgp: None,
            address_family: None,
        }
    }

    pub fn port_count(&self) -> usize {
        self.l3_interfaces.len()
    }
}
