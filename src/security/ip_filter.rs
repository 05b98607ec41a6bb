//! IP Allow-List Module
//!
//! Exact addresses and CIDR blocks. The IPv6 loopback and IPv4-mapped IPv6
//! addresses are folded onto their IPv4 form before matching.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IpFilterError {
    #[error("Invalid address or CIDR block: {0}")]
    InvalidEntry(String),
}

/// Parse a client address, normalising loopback and mapped forms
pub fn normalize_ip(raw: &str) -> Option<IpAddr> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    Some(match ip {
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    })
}

fn parse_entry(entry: &str) -> Result<IpNet, IpFilterError> {
    let entry = entry.trim();
    if let Ok(net) = entry.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    let host = match normalize_ip(entry) {
        Some(IpAddr::V4(v4)) => Ipv4Net::new(v4, 32).map(IpNet::V4).ok(),
        Some(IpAddr::V6(v6)) => Ipv6Net::new(v6, 128).map(IpNet::V6).ok(),
        None => None,
    };
    host.ok_or_else(|| IpFilterError::InvalidEntry(entry.to_string()))
}

/// Set of allowed networks
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    networks: Vec<IpNet>,
}

impl IpAllowList {
    /// Build from configuration entries, rejecting anything unparsable
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, IpFilterError> {
        let networks = entries
            .iter()
            .map(|e| parse_entry(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether `ip` falls inside any listed network. Unparsable input is never allowed.
    pub fn allows(&self, ip: &str) -> bool {
        match normalize_ip(ip) {
            Some(addr) => self.networks.iter().any(|net| net.contains(&addr)),
            None => false,
        }
    }
}
