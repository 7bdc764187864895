use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::{CoreError, Result};

/// A /30 subnet reserved for a single instance.
///
/// The four addresses are used as network, host side of the tap device,
/// guest interface and broadcast, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalIpv4Subnet {
    network: Ipv4Addr,
}

/// Addressing handed to the runtime driver when preparing an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub host_ip: Ipv4Addr,
    pub guest_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl LocalIpv4Subnet {
    pub const PREFIX_LEN: u8 = 30;

    pub fn new(network: Ipv4Addr) -> Result<Self> {
        if u32::from(network) & 0b11 != 0 {
            return Err(CoreError::InvalidSubnet(format!(
                "{} is not aligned to a /{} boundary",
                network,
                Self::PREFIX_LEN
            )));
        }
        Ok(Self { network })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn host_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 1)
    }

    pub fn guest_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 2)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::MAX << (32 - Self::PREFIX_LEN))
    }

    pub fn local_config(&self) -> LocalConfig {
        LocalConfig {
            host_ip: self.host_ip(),
            guest_ip: self.guest_ip(),
            netmask: self.netmask(),
        }
    }
}

impl fmt::Display for LocalIpv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, Self::PREFIX_LEN)
    }
}

impl FromStr for LocalIpv4Subnet {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidSubnet(format!("missing prefix length in '{s}'")))?;

        if prefix != Self::PREFIX_LEN.to_string() {
            return Err(CoreError::InvalidSubnet(format!(
                "expected a /{} subnet, got '{s}'",
                Self::PREFIX_LEN
            )));
        }

        let network = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| CoreError::InvalidSubnet(format!("'{addr}': {e}")))?;
        Self::new(network)
    }
}

impl TryFrom<String> for LocalIpv4Subnet {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LocalIpv4Subnet> for String {
    fn from(subnet: LocalIpv4Subnet) -> Self {
        subnet.to_string()
    }
}
