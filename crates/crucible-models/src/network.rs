//! DHCP network objects: subnets, leases, reservations

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Keyed;

/// Render an IPv4 address as the uppercase hex string used to key leases and
/// reservations (`192.168.0.1` → `"C0A80001"`).
pub fn hex_addr(addr: Ipv4Addr) -> String {
    let octets = addr.octets();
    let mut out = String::with_capacity(8);
    for b in octets {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// A DHCP subnet we hand leases out of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    /// Primary key; unique per subnet.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the subnet hands out or renews leases at all.
    #[serde(default)]
    pub enabled: bool,

    /// Proxy subnets answer requests without managing addresses.
    #[serde(default)]
    pub proxy: bool,

    /// Network address in CIDR form.
    pub subnet: String,

    /// PXE next-server handed to booting machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_server: Option<Ipv4Addr>,

    /// First address of the dynamic range.
    pub active_start: Ipv4Addr,

    /// Last address of the dynamic range.
    pub active_end: Ipv4Addr,

    /// Default lease duration in seconds for dynamic leases.
    pub active_lease_time: i32,

    /// Default lease duration in seconds for reserved leases.
    pub reserved_lease_time: i32,

    /// Only hand out leases backed by a reservation.
    #[serde(default)]
    pub only_reservations: bool,

    /// Leasing strategy used to identify clients (e.g. `"MAC"`).
    pub strategy: String,

    /// Address pickers tried in order when allocating (e.g. `"hint"`,
    /// `"nextFree"`, `"mostExpired"`).
    #[serde(default)]
    pub pickers: Vec<String>,
}

impl Subnet {
    /// Validate range and timing invariants before the subnet is stored.
    pub fn validate(&self) -> Result<(), String> {
        if !crate::valid_name(&self.name) {
            return Err(format!("invalid subnet name `{}`", self.name));
        }
        if u32::from(self.active_start) > u32::from(self.active_end) {
            return Err(format!(
                "active range inverted: {} > {}",
                self.active_start, self.active_end
            ));
        }
        if self.active_lease_time < 60 {
            return Err("active lease time must be at least 60 seconds".to_string());
        }
        if self.reserved_lease_time < 7200 {
            return Err("reserved lease time must be at least 7200 seconds".to_string());
        }
        Ok(())
    }

    /// Whether an address falls inside the dynamic range.
    pub fn in_active_range(&self, addr: Ipv4Addr) -> bool {
        let a = u32::from(addr);
        a >= u32::from(self.active_start) && a <= u32::from(self.active_end)
    }
}

impl Keyed for Subnet {
    const PREFIX: &'static str = "subnets";

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// A DHCP lease handed out to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// The address the lease handed out; keys the lease.
    pub addr: Ipv4Addr,

    /// Client token per the subnet's strategy.
    pub token: String,

    /// When the lease stops being valid.
    pub expire_time: DateTime<Utc>,

    /// The strategy that created this lease.
    pub strategy: String,

    /// Informational lease state.
    #[serde(default)]
    pub state: String,
}

impl Lease {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }

    /// DHCP renewal time: half the remaining validity.
    pub fn renew_time(&self, issued: DateTime<Utc>) -> DateTime<Utc> {
        issued + (self.expire_time - issued) / 2
    }

    /// DHCP rebind time: three quarters of the remaining validity.
    pub fn rebind_time(&self, issued: DateTime<Utc>) -> DateTime<Utc> {
        issued + (self.expire_time - issued) * 3 / 4
    }
}

impl Keyed for Lease {
    const PREFIX: &'static str = "leases";

    fn key(&self) -> String {
        hex_addr(self.addr)
    }
}

/// A static address reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// The reserved address; keys the reservation.
    pub addr: Ipv4Addr,

    /// Client token the reservation is pinned to.
    pub token: String,

    /// Strategy the token belongs to.
    pub strategy: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_server: Option<Ipv4Addr>,
}

impl Keyed for Reservation {
    const PREFIX: &'static str = "reservations";

    fn key(&self) -> String {
        hex_addr(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn subnet() -> Subnet {
        Subnet {
            name: "lab".into(),
            description: None,
            enabled: true,
            proxy: false,
            subnet: "192.168.10.0/24".into(),
            next_server: None,
            active_start: Ipv4Addr::new(192, 168, 10, 10),
            active_end: Ipv4Addr::new(192, 168, 10, 200),
            active_lease_time: 3600,
            reserved_lease_time: 7200,
            only_reservations: false,
            strategy: "MAC".into(),
            pickers: vec!["hint".into(), "nextFree".into()],
        }
    }

    #[test]
    fn test_hex_addr() {
        assert_eq!(hex_addr(Ipv4Addr::new(192, 168, 0, 1)), "C0A80001");
        assert_eq!(hex_addr(Ipv4Addr::new(10, 0, 0, 255)), "0A0000FF");
    }

    #[test]
    fn test_subnet_validation() {
        assert!(subnet().validate().is_ok());

        let mut inverted = subnet();
        inverted.active_start = Ipv4Addr::new(192, 168, 10, 201);
        assert!(inverted.validate().is_err());

        let mut short = subnet();
        short.active_lease_time = 30;
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_subnet_active_range() {
        let s = subnet();
        assert!(s.in_active_range(Ipv4Addr::new(192, 168, 10, 10)));
        assert!(s.in_active_range(Ipv4Addr::new(192, 168, 10, 200)));
        assert!(!s.in_active_range(Ipv4Addr::new(192, 168, 10, 9)));
        assert!(!s.in_active_range(Ipv4Addr::new(192, 168, 11, 50)));
    }

    #[test]
    fn test_lease_timing() {
        let issued = Utc::now();
        let lease = Lease {
            addr: Ipv4Addr::new(192, 168, 10, 20),
            token: "aa:bb:cc:dd:ee:ff".into(),
            expire_time: issued + Duration::seconds(3600),
            strategy: "MAC".into(),
            state: "valid".into(),
        };

        assert!(!lease.expired(issued));
        assert!(lease.expired(issued + Duration::seconds(3601)));
        assert_eq!(lease.renew_time(issued), issued + Duration::seconds(1800));
        assert_eq!(lease.rebind_time(issued), issued + Duration::seconds(2700));
        assert_eq!(lease.key(), "C0A80A14");
    }
}
