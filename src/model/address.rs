//! Network addresses and netmasks
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AtlasError, Result};

/// Canonical network address of a node. This is the identity key of
/// every node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(IpAddr);

impl Address {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        // Bracketed IPv6 shows up in some proxy headers
        let trimmed = trimmed
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or(trimmed);
        trimmed
            .parse::<IpAddr>()
            .map(Self::from_ip)
            .map_err(|_| AtlasError::Validation("addressInvalid".to_string()))
    }

    /// IPv4-mapped IPv6 addresses are folded to IPv4 so that the same
    /// host always compares equal.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Self(IpAddr::V4(v4)),
                None => Self(ip),
            },
            IpAddr::V4(_) => Self(ip),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    pub fn octets(&self) -> Vec<u8> {
        match self.0 {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(|_| serde::de::Error::custom("incorrectly formatted ip address"))
    }
}

/// CIDR network mask, such as `fc00::/8` or `192.168.0.0/16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Netmask {
    network: IpAddr,
    prefix: u8,
}

impl Netmask {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || AtlasError::Config(format!("network mask is invalid: {}", s));
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }

    pub fn contains(&self, address: &Address) -> bool {
        let net = Address(self.network).octets();
        let candidate = address.octets();
        if net.len() != candidate.len() {
            return false;
        }
        let full_bytes = usize::from(self.prefix / 8);
        let rest_bits = self.prefix % 8;
        if net[..full_bytes] != candidate[..full_bytes] {
            return false;
        }
        if rest_bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rest_bits);
        (net[full_bytes] & mask) == (candidate[full_bytes] & mask)
    }
}

impl fmt::Display for Netmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl Serialize for Netmask {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Netmask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Netmask::parse(&s).map_err(serde::de::Error::custom)
    }
}
