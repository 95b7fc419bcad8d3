use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pnf {
    pub name: String,
    pub switch_name: String,
    pub port_name: String,
    pub vlan_id: u16,
    pub interface_ip: IpAddr,
    pub gateway_ip: IpAddr,
    pub bound_groups: Vec<String>,
}

impl Pnf {
    pub fn new(
        name: impl Into<String>,
        switch_name: impl Into<String>,
        port_name: impl Into<String>,
        vlan_id: u16,
        interface_ip: IpAddr,
        gateway_ip: IpAddr,
    ) -> Self {
        Self {
            name: name.into(),
            switch_name: switch_name.into(),
            port_name: port_name.into(),
            vlan_id,
            interface_ip,
            gateway_ip,
            bound_groups: Vec::new(),
        }
    }
}
