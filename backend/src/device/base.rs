//! Shared precondition/caching layer every family adapter runs through
//! (§9: "base type holds shared preconditions and post-mutation hooks").

use super::{
    BgpInstanceRequest, DeviceAdapter, DeviceError, FamilyDialect, Inventory, VlanToVrfRequest,
    VrfRequest,
};
use crate::model::{
    is_reserved_vlan, is_valid_vlan, BgpNeighbor, ConfigSnapshot, DeviceState, L3VlanInterface,
    LinkMode, LldpNeighbor, PhysicalPort, StaticRoute, Vrf,
};
use async_trait::async_trait;

/// Bound on the config-history snapshot list (§3, §8.7).
const MAX_CONFIG_HISTORY: usize = 100;

/// Wraps a [`FamilyDialect`] with the state machine, cached inventory and
/// the precondition checks every family shares (VLAN range, port-mode
/// consistency, symmetric VRF binding). Mutations follow the read-after-
/// write discipline from the design notes: clear relevant cache, delegate
/// to the dialect, re-read, persist.
pub struct BaseDevice<D: FamilyDialect> {
    dialect: D,
    state: DeviceState,
    inventory: Inventory,
    history: Vec<ConfigSnapshot>,
}

impl<D: FamilyDialect> BaseDevice<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            state: DeviceState::Init,
            inventory: Inventory::default(),
            history: Vec::new(),
        }
    }

    fn require_ready(&self) -> Result<(), DeviceError> {
        if self.state != DeviceState::Ready {
            return Err(DeviceError::PreconditionFailed(format!(
                "device not ready (state = {:?})",
                self.state
            )));
        }
        Ok(())
    }

    fn require_valid_vlan(vid: u16) -> Result<(), DeviceError> {
        if !is_valid_vlan(vid) {
            return Err(DeviceError::PreconditionFailed(format!(
                "vlan {vid} outside the valid range 1-4094"
            )));
        }
        if is_reserved_vlan(vid) {
            return Err(DeviceError::PreconditionFailed(format!(
                "vlan {vid} is in the reserved range 4000-4020"
            )));
        }
        Ok(())
    }

    fn require_mode_consistency(mode: LinkMode, pvid: Option<u16>) -> Result<(), DeviceError> {
        match mode {
            LinkMode::Access if pvid.is_some() => Err(DeviceError::PreconditionFailed(
                "access ports take no explicit pvid, the tagged vlan is the pvid".into(),
            )),
            LinkMode::Routed | LinkMode::Na => Err(DeviceError::PreconditionFailed(
                "vlan membership cannot be assigned to a routed or unset port".into(),
            )),
            _ => Ok(()),
        }
    }

    /// §4.2 port-mode mismatch precondition: a vlan membership call must
    /// target a port already in the caller's requested mode.
    fn require_port_already_in_mode(port: &PhysicalPort, mode: LinkMode) -> Result<(), DeviceError> {
        if port.link_mode != mode {
            return Err(DeviceError::PreconditionFailed(format!(
                "port {} is in mode {:?}, not {mode:?}",
                port.name, port.link_mode
            )));
        }
        Ok(())
    }

    /// §4.2 symmetric VRF binding: `a` must import `b`'s route target and
    /// vice versa, or neither. Returns whether the pair is currently bound.
    /// An asymmetric state (one direction bound, the other not) is treated
    /// as device corruption, per the ground-truth `check_vrfs_binding`.
    fn check_vrf_binding_symmetric(&self, a: &str, b: &str) -> Result<bool, DeviceError> {
        let a_imports_b = self
            .inventory
            .vrfs
            .iter()
            .find(|v| v.name == a)
            .map(|v| v.import_route_targets.iter().any(|rt| rt == b))
            .unwrap_or(false);
        let b_imports_a = self
            .inventory
            .vrfs
            .iter()
            .find(|v| v.name == b)
            .map(|v| v.import_route_targets.iter().any(|rt| rt == a))
            .unwrap_or(false);
        if a_imports_b != b_imports_a {
            return Err(DeviceError::Inconsistent(format!(
                "vrf binding between {a} and {b} is asymmetric"
            )));
        }
        Ok(a_imports_b)
    }
}

#[async_trait]
impl<D: FamilyDialect> DeviceAdapter for BaseDevice<D> {
    fn state(&self) -> DeviceState {
        self.state
    }

    async fn retrieve_info(&mut self) -> Result<(), DeviceError> {
        self.state = DeviceState::Executing;
        self.inventory = Inventory::default();
        match self.dialect.fetch_inventory().await {
            Ok(inventory) => {
                self.inventory = inventory;
                self.state = DeviceState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = match &err {
                    DeviceError::Sbi(crate::sbi::SbiError::Unauthenticated(_)) => DeviceState::AuthError,
                    DeviceError::Sbi(crate::sbi::SbiError::Unreachable(_)) => DeviceState::NetError,
                    _ => DeviceState::ConfigError,
                };
                Err(err)
            }
        }
    }

    async fn update_info(&mut self) -> Result<(), DeviceError> {
        let inventory = self.dialect.fetch_inventory().await?;
        self.inventory = inventory;
        self.state = DeviceState::Ready;
        Ok(())
    }

    /// §3, §4.2: appends a snapshot if `text` differs from the last one,
    /// trimming the history to `MAX_CONFIG_HISTORY` entries, oldest evicted.
    fn store_config(&mut self, text: String) {
        if self.history.last().map(|s| s.text.as_str()) == Some(text.as_str()) {
            return;
        }
        self.history.push(ConfigSnapshot {
            taken_at: chrono::Utc::now(),
            text,
        });
        if self.history.len() > MAX_CONFIG_HISTORY {
            let overflow = self.history.len() - MAX_CONFIG_HISTORY;
            self.history.drain(0..overflow);
        }
    }

    fn ports(&self) -> &[PhysicalPort] {
        &self.inventory.ports
    }

    fn vlans(&self) -> &std::collections::BTreeSet<u16> {
        &self.inventory.vlans
    }

    fn l3_interfaces(&self) -> &[L3VlanInterface] {
        &self.inventory.l3_interfaces
    }

    fn vrfs(&self) -> &[Vrf] {
        &self.inventory.vrfs
    }

    fn port_by_name(&self, name: &str) -> Option<&PhysicalPort> {
        self.inventory.ports.iter().find(|p| p.name == name)
    }

    fn neighbor_by_port(&self, name: &str) -> Option<&LldpNeighbor> {
        self.port_by_name(name).and_then(|p| p.lldp_neighbor.as_ref())
    }

    fn last_config(&self) -> Option<&str> {
        self.history.last().map(|s| s.text.as_str())
    }

    fn config_history(&self) -> &[ConfigSnapshot] {
        &self.history
    }

    async fn add_vlan(&mut self, ids: Vec<u16>) -> Result<(), DeviceError> {
        self.require_ready()?;
        for id in &ids {
            Self::require_valid_vlan(*id)?;
        }
        self.dialect.apply_add_vlan(&ids).await?;
        self.update_info().await
    }

    async fn del_vlan(&mut self, ids: Vec<u16>, force: bool) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_vlan(&ids, force).await?;
        self.update_info().await
    }

    async fn add_vlan_to_port(
        &mut self,
        vid: u16,
        port_name: &str,
        mode: LinkMode,
        pvid: Option<u16>,
    ) -> Result<(), DeviceError> {
        self.require_ready()?;
        Self::require_valid_vlan(vid)?;
        Self::require_mode_consistency(mode, pvid)?;
        let port = self
            .port_by_name(port_name)
            .ok_or_else(|| DeviceError::PreconditionFailed(format!("unknown port {port_name}")))?;
        Self::require_port_already_in_mode(port, mode)?;
        self.dialect.apply_add_vlan_to_port(vid, port_name, mode, pvid).await?;
        self.update_info().await
    }

    async fn del_vlan_to_port(
        &mut self,
        ids: Vec<u16>,
        port_name: &str,
        mode: LinkMode,
    ) -> Result<(), DeviceError> {
        self.require_ready()?;
        let port = self
            .port_by_name(port_name)
            .ok_or_else(|| DeviceError::PreconditionFailed(format!("unknown port {port_name}")))?;
        Self::require_port_already_in_mode(port, mode)?;
        self.dialect.apply_del_vlan_to_port(&ids, port_name, mode).await?;
        self.update_info().await
    }

    async fn set_port_mode(&mut self, port_name: &str, mode: LinkMode) -> Result<(), DeviceError> {
        self.require_ready()?;
        if self.port_by_name(port_name).is_none() {
            return Err(DeviceError::PreconditionFailed(format!("unknown port {port_name}")));
        }
        self.dialect.apply_set_port_mode(port_name, mode).await?;
        self.update_info().await
    }

    async fn add_vlan_to_vrf(&mut self, vrf: &str, request: VlanToVrfRequest) -> Result<(), DeviceError> {
        self.require_ready()?;
        if !self.dialect.supports_vrf() {
            return Err(DeviceError::PreconditionFailed("device family has no VRF support".into()));
        }
        Self::require_valid_vlan(request.vlan_id)?;
        self.dialect.apply_add_vlan_to_vrf(vrf, request).await?;
        self.update_info().await
    }

    async fn del_vlan_to_vrf(&mut self, vrf_name: &str, vid: u16) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_vlan_to_vrf(vrf_name, vid).await?;
        self.update_info().await
    }

    async fn add_vrf(&mut self, request: VrfRequest) -> Result<(), DeviceError> {
        self.require_ready()?;
        if !self.dialect.supports_vrf() {
            return Err(DeviceError::PreconditionFailed("device family has no VRF support".into()));
        }
        self.dialect.apply_add_vrf(request).await?;
        self.update_info().await
    }

    async fn del_vrf(&mut self, name: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_vrf(name).await?;
        self.update_info().await
    }

    async fn bind_vrf(&mut self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        if self.check_vrf_binding_symmetric(a, b)? {
            return Ok(());
        }
        self.dialect.apply_bind_vrf(a, b).await?;
        self.update_info().await
    }

    async fn unbind_vrf(&mut self, a: &str, b: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        if !self.check_vrf_binding_symmetric(a, b)? {
            return Ok(());
        }
        self.dialect.apply_unbind_vrf(a, b).await?;
        self.update_info().await
    }

    async fn add_static_route(&mut self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_add_static_route(vrf, route).await?;
        self.update_info().await
    }

    async fn del_static_route(&mut self, vrf: &str, route: StaticRoute) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_static_route(vrf, route).await?;
        self.update_info().await
    }

    async fn add_bgp_instance(&mut self, request: BgpInstanceRequest) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_add_bgp_instance(request).await?;
        self.update_info().await
    }

    async fn del_bgp_instance(&mut self, vrf_name: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_bgp_instance(vrf_name).await?;
        self.update_info().await
    }

    async fn add_bgp_peer(&mut self, peer: BgpNeighbor, vrf: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_add_bgp_peer(peer, vrf).await?;
        self.update_info().await
    }

    async fn del_bgp_peer(&mut self, peer_ip: std::net::IpAddr, vrf: &str) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.apply_del_bgp_peer(peer_ip, vrf).await?;
        self.update_info().await
    }

    async fn commit_and_save(&mut self) -> Result<(), DeviceError> {
        self.require_ready()?;
        self.dialect.commit_and_save().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{BgpInstanceRequest, FamilyDialect, Inventory};
    use async_trait::async_trait;

    struct StubDialect;

    #[async_trait]
    impl FamilyDialect for StubDialect {
        async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
            Ok(Inventory::default())
        }
        async fn apply_add_vlan(&self, _ids: &[u16]) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan(&self, _ids: &[u16], _force: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vlan_to_port(
            &self,
            _vid: u16,
            _port_name: &str,
            _mode: LinkMode,
            _pvid: Option<u16>,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan_to_port(&self, _ids: &[u16], _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_set_port_mode(&self, _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vlan_to_vrf(&self, _vrf: &str, _request: VlanToVrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, _vid: u16) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vrf(&self, _request: VrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vrf(&self, _name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_bind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_unbind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_bgp_instance(&self, _request: BgpInstanceRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_bgp_instance(&self, _vrf_name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_bgp_peer(&self, _peer: BgpNeighbor, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_bgp_peer(&self, _peer_ip: std::net::IpAddr, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn commit_and_save(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    /// Same no-op dialect, but `fetch_inventory` returns a fixed snapshot
    /// so tests can exercise checks that read cached ports/vrfs.
    struct InventoryDialect(Inventory);

    #[async_trait]
    impl FamilyDialect for InventoryDialect {
        async fn fetch_inventory(&self) -> Result<Inventory, DeviceError> {
            Ok(self.0.clone())
        }
        async fn apply_add_vlan(&self, _ids: &[u16]) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan(&self, _ids: &[u16], _force: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vlan_to_port(
            &self,
            _vid: u16,
            _port_name: &str,
            _mode: LinkMode,
            _pvid: Option<u16>,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan_to_port(&self, _ids: &[u16], _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_set_port_mode(&self, _port_name: &str, _mode: LinkMode) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vlan_to_vrf(&self, _vrf: &str, _request: VlanToVrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vlan_to_vrf(&self, _vrf_name: &str, _vid: u16) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_vrf(&self, _request: VrfRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_vrf(&self, _name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_bind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_unbind_vrf(&self, _a: &str, _b: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_static_route(&self, _vrf: &str, _route: StaticRoute) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_bgp_instance(&self, _request: BgpInstanceRequest) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_bgp_instance(&self, _vrf_name: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_add_bgp_peer(&self, _peer: BgpNeighbor, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn apply_del_bgp_peer(&self, _peer_ip: std::net::IpAddr, _vrf: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn commit_and_save(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutation_rejected_before_ready() {
        let mut device = BaseDevice::new(StubDialect);
        let err = device.add_vlan(vec![100]).await.unwrap_err();
        assert!(matches!(err, DeviceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn reserved_vlan_rejected_after_ready() {
        let mut device = BaseDevice::new(StubDialect);
        device.retrieve_info().await.unwrap();
        let err = device.add_vlan(vec![4010]).await.unwrap_err();
        assert!(matches!(err, DeviceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn valid_tenant_vlan_accepted_once_ready() {
        let mut device = BaseDevice::new(StubDialect);
        device.retrieve_info().await.unwrap();
        device.add_vlan(vec![150]).await.unwrap();
    }

    #[tokio::test]
    async fn store_config_dedupes_and_trims_to_one_hundred() {
        let mut device = BaseDevice::new(StubDialect);
        device.retrieve_info().await.unwrap();
        for i in 0..150 {
            device.store_config(format!("config-{i}"));
        }
        assert_eq!(device.config_history().len(), MAX_CONFIG_HISTORY);
        assert_eq!(device.last_config(), Some("config-149"));
        let before = device.config_history().len();
        device.store_config("config-149".to_string());
        assert_eq!(device.config_history().len(), before);
    }

    #[tokio::test]
    async fn add_vlan_to_port_rejects_a_port_mode_mismatch() {
        let mut port = PhysicalPort::new(1, "eth1");
        port.link_mode = LinkMode::Access;
        let mut device = BaseDevice::new(InventoryDialect(Inventory {
            ports: vec![port],
            ..Inventory::default()
        }));
        device.retrieve_info().await.unwrap();
        let err = device.add_vlan_to_port(100, "eth1", LinkMode::Trunk, None).await.unwrap_err();
        assert!(matches!(err, DeviceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn bind_vrf_is_a_no_op_once_already_symmetric() {
        let mut vrf_a = Vrf::new("a", "65000:1");
        vrf_a.import_route_targets.push("b".to_string());
        let mut vrf_b = Vrf::new("b", "65000:2");
        vrf_b.import_route_targets.push("a".to_string());
        let mut device = BaseDevice::new(InventoryDialect(Inventory {
            vrfs: vec![vrf_a, vrf_b],
            ..Inventory::default()
        }));
        device.retrieve_info().await.unwrap();
        device.bind_vrf("a", "b").await.unwrap();
    }

    #[tokio::test]
    async fn bind_vrf_rejects_an_asymmetric_device_state() {
        let mut vrf_a = Vrf::new("a", "65000:1");
        vrf_a.import_route_targets.push("b".to_string());
        let vrf_b = Vrf::new("b", "65000:2");
        let mut device = BaseDevice::new(InventoryDialect(Inventory {
            vrfs: vec![vrf_a, vrf_b],
            ..Inventory::default()
        }));
        device.retrieve_info().await.unwrap();
        let err = device.bind_vrf("a", "b").await.unwrap_err();
        assert!(matches!(err, DeviceError::Inconsistent(_)));
    }
}
