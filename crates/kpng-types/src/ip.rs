//! IP family, prefix and address-set types with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Address family of an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Both families, in the order sinks program them.
    pub const ALL: [IpFamily; 2] = [IpFamily::V4, IpFamily::V6];

    /// Returns the family of `addr`.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Prefix length of a single-host prefix (/32 or /128).
    pub const fn host_prefix_len(self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.5/32 or fd00::5/128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = IpFamily::of(&address).host_prefix_len();

        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    pub const fn address(&self) -> &IpAddr {
        &self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn family(&self) -> IpFamily {
        IpFamily::of(&self.address)
    }

    /// Returns true if this is a host prefix (/32 for IPv4, /128 for IPv6).
    pub const fn is_host(&self) -> bool {
        self.prefix_len == self.family().host_prefix_len()
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

/// Ordered set of addresses, partitioned by family.
///
/// Insertion order is kept within each family so that "the first V4
/// address" is stable; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    v4: Vec<IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    v6: Vec<IpAddr>,
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `addr` to its family's list. Returns false if already present.
    pub fn insert(&mut self, addr: IpAddr) -> bool {
        let list = match IpFamily::of(&addr) {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
        };
        if list.contains(&addr) {
            return false;
        }
        list.push(addr);
        true
    }

    pub fn family(&self, family: IpFamily) -> &[IpAddr] {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    pub fn v4(&self) -> &[IpAddr] {
        &self.v4
    }

    pub fn v6(&self) -> &[IpAddr] {
        &self.v6
    }

    /// First address of `family`, if any.
    pub fn first(&self, family: IpFamily) -> Option<IpAddr> {
        self.family(family).first().copied()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.family(IpFamily::of(addr)).contains(addr)
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// Iterates V4 addresses first, then V6.
    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.v4.iter().chain(self.v6.iter())
    }

    /// Families with at least one address.
    pub fn families(&self) -> Vec<IpFamily> {
        IpFamily::ALL
            .into_iter()
            .filter(|f| !self.family(*f).is_empty())
            .collect()
    }

    /// Union of both sets, `self` first.
    pub fn union(&self, other: &IpSet) -> IpSet {
        let mut out = self.clone();
        out.extend(other.iter().copied());
        out
    }

    /// Returns `(added, removed)`: addresses in `next` but not in `self`,
    /// and addresses in `self` but not in `next`.
    pub fn diff(&self, next: &IpSet) -> (Vec<IpAddr>, Vec<IpAddr>) {
        let added = next.iter().filter(|a| !self.contains(a)).copied().collect();
        let removed = self.iter().filter(|a| !next.contains(a)).copied().collect();
        (added, removed)
    }
}

impl Extend<IpAddr> for IpSet {
    fn extend<T: IntoIterator<Item = IpAddr>>(&mut self, iter: T) {
        for addr in iter {
            self.insert(addr);
        }
    }
}

impl FromIterator<IpAddr> for IpSet {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        let mut set = IpSet::new();
        set.extend(iter);
        set
    }
}
