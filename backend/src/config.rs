//! Configuration loader (§6): `config.json` read once at startup, the
//! teacher's `config` crate + `lazy_static` pattern unchanged.

use config::{Config, ConfigError, Environment, File};
use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub network: NetworkSettings,
    server_bind_address: Option<IpAddr>,
    server_port: Option<u16>,
}

#[derive(Deserialize)]
pub struct StoreSettings {
    /// Directory `JsonFileStore` keeps its collections in — named `host`
    /// to match §6's "document-store host/port/db/credentials" key set,
    /// even though the in-process store has no network endpoint.
    pub host: String,
    pub db: Option<String>,
}

#[derive(Deserialize)]
pub struct NetworkSettings {
    pub vrf_switch: String,
    pub firewall_name: String,
    pub firewall_uplink_port: String,
    pub merging_vrf_name: String,
    pub local_as: u32,
    pub uplink_vlan_pool: Vec<u16>,
    pub uplink_subnet_pool: Vec<Ipv4Net>,
    pub pnf_vlan_pool: Vec<u16>,
    pub pnf_subnet_pool: Vec<Ipv4Net>,
}

impl Settings {
    pub fn server_bind_address(&self) -> IpAddr {
        self.server_bind_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn server_port(&self) -> u16 {
        self.server_port.unwrap_or(8080)
    }
}

fn create_settings() -> Result<Settings, ConfigError> {
    let cfg = Config::builder()
        .add_source(File::with_name("config.json"))
        .add_source(Environment::with_prefix("fabric"))
        .build()?;
    cfg.try_deserialize()
}

lazy_static! {
    pub static ref CONFIG: Settings = create_settings().expect("cannot load config.json");
}
