//! Scan targets and address ranges
//!
//! A [`Target`] keeps the address exactly as it was discovered or persisted.
//! It is validated when a stage is about to use it, so a hand-edited or
//! stale checkpoint cannot smuggle a malformed value into a tool invocation.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, str::FromStr};

use crate::error::{Result, ScannerError};

/// One IP address under scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Wrap an address string without validating it
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self(address.into())
    }

    /// Parse and validate an address string
    pub fn parse(spec: &str) -> Result<Self> {
        let target = Self::new(spec.trim());
        target.validate()?;
        Ok(target)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the address family and return the parsed address
    pub fn validate(&self) -> Result<IpAddr> {
        IpAddr::from_str(&self.0)
            .map_err(|e| ScannerError::invalid_address(&self.0, e.to_string()))
    }
}

impl From<IpAddr> for Target {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network range handed to host discovery (CIDR, or a bare address)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange(IpNetwork);

impl AddressRange {
    pub fn parse(spec: &str) -> Result<Self> {
        IpNetwork::from_str(spec.trim())
            .map(Self)
            .map_err(|e| ScannerError::invalid_address(spec, e.to_string()))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(ip)
    }
}

impl FromStr for AddressRange {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
