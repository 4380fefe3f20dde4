//! Network interface inspection.
//!
//! Advisory only: the pipeline works without it, so enumeration faults
//! degrade to an empty snapshot instead of propagating.

use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;
use tracing::debug;

/// One address of an up interface, as seen at snapshot time.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub addr: IpAddr,
    pub is_loopback: bool,
}

/// Fresh snapshot of non-loopback interfaces usable for multicast joins.
/// Re-querying yields a new list, never a resumed one.
pub fn list_active_interfaces() -> Vec<InterfaceInfo> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .map(|i| InterfaceInfo {
                is_loopback: i.is_loopback(),
                addr: i.ip(),
                name: i.name,
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "interface enumeration failed, returning empty snapshot");
            Vec::new()
        }
    }
}

/// IPv4 address of a named interface, used as the multicast join address
/// when the config pins an interface.
pub fn ipv4_for_interface(name: &str) -> Option<Ipv4Addr> {
    if_addrs::get_if_addrs().ok()?.into_iter().find_map(|i| {
        if i.name != name {
            return None;
        }
        match i.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        }
    })
}
