//! Device abstraction layer (spec §4.2): a single `DeviceAdapter` contract
//! satisfied by one adapter per device family, with shared preconditions
//! living in [`BaseDevice`] (§9: "clear caches -> call family
//! implementation -> re-read -> persist").

mod base;
mod family_a;
mod family_b;
mod family_c;
mod family_d;
mod firewall;
pub mod registry;

pub use base::BaseDevice;
pub use family_a::FamilyADialect;
pub use family_b::FamilyBDialect;
pub use family_c::FamilyCDialect;
pub use family_d::FamilyDDialect;
pub use firewall::FirewallDialect;

use crate::model::{BgpNeighbor, ConfigSnapshot, DeviceState, L3VlanInterface, LinkMode, PhysicalPort, StaticRoute, Vrf};
use crate::sbi::SbiError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Sbi(#[from] SbiError),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("device returned inconsistent state: {0}")]
    Inconsistent(String),
}

impl DeviceError {
    /// Maps to one of the §7 error categories.
    pub fn category(&self) -> &'static str {
        match self {
            DeviceError::Sbi(SbiError::Unreachable(_)) => "transport_unreachable",
            DeviceError::Sbi(SbiError::Unauthenticated(_)) => "transport_unauthenticated",
            DeviceError::Sbi(SbiError::Misconfigured(_)) => "device_config_invalid",
            DeviceError::PreconditionFailed(_) => "precondition_failed",
            DeviceError::Inconsistent(_) => "device_config_invalid",
        }
    }
}

/// Snapshot of everything a full inventory read produces (§4.2
/// `retrieve_info`).
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub ports: Vec<PhysicalPort>,
    pub vlans: std::collections::BTreeSet<u16>,
    pub l3_interfaces: Vec<L3VlanInterface>,
    pub vrfs: Vec<Vrf>,
    pub raw_config: String,
}

#[derive(Debug, Clone)]
pub struct VlanToVrfRequest {
    pub vlan_id: u16,
    pub interface_name: String,
    pub primary_ip: Option<std::net::IpAddr>,
    pub cidr: Option<ipnet::IpNet>,
}

#[derive(Debug, Clone)]
pub struct VrfRequest {
    pub name: String,
    pub route_distinguisher: String,
    pub import_route_targets: Vec<String>,
    pub export_route_targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BgpInstanceRequest {
    pub vrf_name: String,
    pub as_number: u32,
    pub router_id: std::net::Ipv4Addr,
}

/// The uniform Device Contract (§4.2) every family adapter satisfies.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    fn state(&self) -> DeviceState;

    /// Clears all cached state fields, performs a full inventory read, and
    /// persists the result.
    async fn retrieve_info(&mut self) -> Result<(), DeviceError>;

    /// Incremental re-read after a mutating call.
    async fn update_info(&mut self) -> Result<(), DeviceError>;

    fn store_config(&mut self, text: String);

    fn ports(&self) -> &[PhysicalPort];
    fn vlans(&self) -> &std::collections::BTreeSet<u16>;
    fn l3_interfaces(&self) -> &[L3VlanInterface];
    fn vrfs(&self) -> &[Vrf];
    fn port_by_name(&self, name: &str) -> Option<&PhysicalPort>;
    fn neighbor_by_port(&self, name: &str) -> Option<&crate::model::LldpNeighbor>;
    fn last_config(&self) -> Option<&str>;
    /// Full snapshot history, oldest first, trimmed to the last 100 entries
    /// (§3, §8.7 snapshot monotonicity).
    fn config_history(&self) -> &[ConfigSnapshot];

    async fn add_vlan(&mut self, ids: Vec<u16>) -> Result<(), DeviceError>;
    async fn del_vlan(&mut self, ids: Vec<u16>, force: bool) -> Result<(), DeviceError>;
    async fn add_vlan_to_port(
        &mut self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError>;
    async fn del_vlan_to_port(
        &mut self,
        ids: Vec<u16>,
        port_name: &str,
        mode: LinkMode,
    ) -> Result<(), DeviceError>;
    async fn set_port_mode(&mut self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError>;
    async fn add_vlan_to_vrf(&mut self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError>;
    async fn del_vlan_to_vrf(&mut self, vrf_name: &str, vid: u16) -> Result<(), DeviceError>;
    async fn add_vrf(&mut self, request: VrfRequest) -> Result<(), DeviceError>;
    async fn del_vrf(&mut self, name: &str) -> Result<(), DeviceError>;
    async fn bind_vrf(&mut self, a: &str, b: &str) -> Result<(), DeviceError>;
    async fn unbind_vrf(&mut self, a: &str, b: &str) -> Result<(), DeviceError>;
    async fn add_static_route(&mut self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError>;
    async fn del_static_route(&mut self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError>;
    async fn add_bgp_instance(&mut self, request: BgpInstanceRequest) -> Result<(), DeviceError>;
    async fn del_bgp_instance(&mut self, vrf_name: &str) -> Result<(), DeviceError>;
    async fn add_bgp_peer(&mut self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError>;
    async fn del_bgp_peer(&mut self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError>;
    async fn commit_and_save(&mut self) -> Result<(), DeviceError>;
}

/// Narrower, per-family seam `BaseDevice` drives. Each family only needs to
/// know how to translate a request into its own dialect and parse its own
/// output; preconditions, caching and the read-after-write discipline are
/// shared (§9).
#[async_trait]
pub trait FamilyDialect: Send + Sync {
    fn supports_vrf(&self) -> bool {
        true
    }

    async fn fetch_inventory(&self) -> Result<Inventory, DeviceError>;

    async fn apply_add_vlan(&self, ids: &[u16]) -> Result<(), DeviceError>;
    async fn apply_del_vlan(&self, ids: &[u16], force: bool) -> Result<(), DeviceError>;
    async fn apply_add_vlan_to_port(
        &self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError>;
    async fn apply_del_vlan_to_port(
        &self,
        ids: &[u16],
        port_name: &str,
        mode: LinkMode,
    ) -> Result<(), DeviceError>;
    async fn apply_set_port_mode(&self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError>;
    async fn apply_add_vlan_to_vrf(&self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError>;
    async fn apply_del_vlan_to_vrf(&self, vrf_name: &str, vid: u16) -> Result<(), DeviceError>;
    async fn apply_add_vrf(&self, request: VrfRequest) -> Result<(), DeviceError>;
    async fn apply_del_vrf(&self, name: &str) -> Result<(), DeviceError>;
    async fn apply_bind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError>;
    async fn apply_unbind_vrf(&self, a: &str, b: &str) -> Result<(), DeviceError>;
    async fn apply_add_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError>;
    async fn apply_del_static_route(&self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError>;
    async fn apply_add_bgp_instance(&self, request: BgpInstanceRequest) -> Result<(), DeviceError>;
    async fn apply_del_bgp_instance(&self, vrf_name: &str) -> Result<(), DeviceError>;
    async fn apply_add_bgp_peer(&self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError>;
    async fn apply_del_bgp_peer(&self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError>;
    async fn commit_and_save(&self) -> Result<(), DeviceError>;
}
