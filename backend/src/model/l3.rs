use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3VlanInterface {
    pub name: String,
    pub vlan_id: u16,
    pub primary_ip: Option<IpAddr>,
    pub cidr: Option<IpNet>,
    pub vrf_name: String,
    pub description: Option<String>,
}

impl L3VlanInterface {
    pub fn new(name: impl Into<String>, vlan_id: u16, vrf_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vlan_id,
            primary_ip: None,
            cidr: None,
            vrf_name: vrf_name.into(),
            description: None,
        }
    }
}
