use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub vrf_name: String,
    pub member_vlans: BTreeSet<u16>,
}

impl Group {
    pub fn new(name: impl Into<String>, vrf_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vrf_name: vrf_name.into(),
            member_vlans: BTreeSet::new(),
        }
    }
}
