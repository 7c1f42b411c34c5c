//! Port types with validation and parsing.
//!
//! `Port` is always a valid port number (1-65535). A port specification such
//! as `"22,80-82,443"` is parsed clause by clause into `PortRange`s and
//! expanded into a `PortSet` that keeps first-seen order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A validated network port number (1-65535).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Minimum valid port number.
    pub const MIN: u16 = 1;
    /// Maximum valid port number.
    pub const MAX: u16 = 65535;

    /// Create a new Port from a u16, returning None if invalid.
    #[inline]
    pub const fn new(port: u16) -> Option<Self> {
        if port >= Self::MIN {
            Some(Self(port))
        } else {
            None
        }
    }

    /// Get the raw port number.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Parse a single decimal port, rejecting anything outside 1-65535.
    fn parse_bound(s: &str) -> Result<Self, PortError> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PortError::InvalidFormat(s.to_string()));
        }
        // Parse wide so "70000" reports out-of-range rather than bad format.
        let value: u32 = s
            .parse()
            .map_err(|_| PortError::InvalidFormat(s.to_string()))?;
        u16::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(PortError::OutOfRange(value))
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u16> for Port {
    type Error = PortError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(PortError::OutOfRange(u32::from(value)))
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Error type for port specification parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("port {0} is out of valid range (1-65535)")]
    OutOfRange(u32),
    #[error("invalid port number: '{0}'")]
    InvalidFormat(String),
    #[error("invalid port range: start ({0}) > end ({1})")]
    InvalidRange(u16, u16),
    #[error("empty port clause in '{0}'")]
    EmptyClause(String),
    #[error("empty port specification")]
    Empty,
}

/// One clause of a port specification: a single port or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    low: Port,
    high: Port,
}

impl PortRange {
    /// Create a new port range, failing when `low > high`.
    pub fn new(low: Port, high: Port) -> Result<Self, PortError> {
        if low > high {
            Err(PortError::InvalidRange(low.0, high.0))
        } else {
            Ok(Self { low, high })
        }
    }

    /// Create a range containing a single port.
    pub const fn single(port: Port) -> Self {
        Self {
            low: port,
            high: port,
        }
    }

    /// Number of ports in this range.
    pub fn len(&self) -> usize {
        usize::from(self.high.0 - self.low.0) + 1
    }

    /// A valid range always holds at least one port.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over all ports in this range.
    pub fn iter(&self) -> impl Iterator<Item = Port> {
        (self.low.0..=self.high.0).map(Port)
    }
}

impl FromStr for PortRange {
    type Err = PortError;

    fn from_str(clause: &str) -> Result<Self, Self::Err> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(PortError::EmptyClause(clause.to_string()));
        }

        match clause.split_once('-') {
            Some((low, high)) => {
                if high.contains('-') {
                    return Err(PortError::InvalidFormat(clause.to_string()));
                }
                Self::new(Port::parse_bound(low)?, Port::parse_bound(high)?)
            }
            None => Ok(Self::single(Port::parse_bound(clause)?)),
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// The ordered, duplicate-free list of ports to probe.
///
/// Order is first-seen order across the clauses of the port list:
/// `"22,80-82,22"` yields `[22, 80, 81, 82]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PortSet {
    ports: Vec<Port>,
}

impl PortSet {
    /// Parse a comma-separated port specification.
    pub fn parse(spec: &str) -> Result<Self, PortError> {
        if spec.trim().is_empty() {
            return Err(PortError::Empty);
        }

        let mut set = PortSetBuilder::default();
        for clause in spec.split(',') {
            if clause.trim().is_empty() {
                return Err(PortError::EmptyClause(spec.to_string()));
            }
            let range: PortRange = clause.parse()?;
            set.extend(range.iter());
        }
        Ok(set.finish())
    }

    /// Build a set from already-validated ports, dropping duplicates.
    pub fn from_ports(ports: impl IntoIterator<Item = Port>) -> Self {
        let mut set = PortSetBuilder::default();
        set.extend(ports);
        set.finish()
    }

    /// Number of ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// True when there is nothing to probe.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Ports in traversal order.
    pub fn as_slice(&self) -> &[Port] {
        &self.ports
    }

    /// Iterate in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = Port> + '_ {
        self.ports.iter().copied()
    }
}

impl FromStr for PortSet {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl IntoIterator for PortSet {
    type Item = Port;
    type IntoIter = std::vec::IntoIter<Port>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.into_iter()
    }
}

#[derive(Default)]
struct PortSetBuilder {
    seen: HashSet<Port>,
    ports: Vec<Port>,
}

impl PortSetBuilder {
    fn extend(&mut self, ports: impl IntoIterator<Item = Port>) {
        for port in ports {
            if self.seen.insert(port) {
                self.ports.push(port);
            }
        }
    }

    fn finish(self) -> PortSet {
        PortSet { ports: self.ports }
    }
}
