//! Vendor command abstraction: maps (vendor, intent) pairs to concrete
//! ipmitool invocations and response parsers. Pure mapping, no I/O.

pub mod adapter;
pub mod parse;

pub use adapter::{CommandAdapter, CommandDescriptor, CommandIntent, FanTarget, VendorError};

use serde::{Deserialize, Serialize};

/// Closed set of supported server vendors. Adding a vendor means a new
/// variant plus its command builder and parser, not a new type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Supermicro,
    Dell,
    Hp,
}

impl Vendor {
    /// Whether the vendor exposes a raw IPMI fan-speed command.
    /// iLO keeps fan control out of the IPMI surface entirely.
    pub fn supports_fan_control(&self) -> bool {
        !matches!(self, Vendor::Hp)
    }
}

impl std::str::FromStr for Vendor {
    type Err = VendorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supermicro" => Ok(Vendor::Supermicro),
            "dell" => Ok(Vendor::Dell),
            "hp" | "hpe" => Ok(Vendor::Hp),
            other => Err(VendorError::Unsupported(other.to_string())),
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Vendor::Supermicro => "supermicro",
            Vendor::Dell => "dell",
            Vendor::Hp => "hp",
        };
        write!(f, "{name}")
    }
}
