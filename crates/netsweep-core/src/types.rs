//! Identifiers and the target grammar shared across the netsweep crates.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::NetsweepError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Newtype for scan job identifiers (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(uuid::Uuid);

impl JobId {
    /// Create a new random `JobId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a `JobId` from its string form.
    pub fn parse(s: &str) -> Result<Self, NetsweepError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| NetsweepError::Validation(format!("invalid job ID: '{s}'")))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of scan profiles.
///
/// New profiles are data added to the registry, not new variants of
/// runtime behavior; this enum is the closed identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanProfileId {
    /// Fast scan of the most common ports (`-T4 -F`)
    Quick,
    /// Full TCP port range (`-T4 -p-`)
    Full,
    /// Host discovery only, no port scan (`-sn`)
    Ping,
    /// Service and version detection (`-sV`)
    Service,
    /// OS fingerprinting (`-O`), requires elevation
    OsDetection,
    /// Aggressive scan with OS and service detection (`-T4 -A -v`), requires elevation
    Comprehensive,
}

impl ScanProfileId {
    /// All profile identifiers, in display order.
    pub const ALL: [Self; 6] = [
        Self::Quick,
        Self::Full,
        Self::Ping,
        Self::Service,
        Self::OsDetection,
        Self::Comprehensive,
    ];

    /// Stable machine-readable name for this profile.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
            Self::Ping => "ping",
            Self::Service => "service",
            Self::OsDetection => "os_detection",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for ScanProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanProfileId {
    type Err = NetsweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            "ping" => Ok(Self::Ping),
            "service" => Ok(Self::Service),
            "os_detection" => Ok(Self::OsDetection),
            "comprehensive" => Ok(Self::Comprehensive),
            other => Err(NetsweepError::Validation(format!(
                "unknown scan profile: '{other}'"
            ))),
        }
    }
}

/// A validated scan target: a single address, a hostname, or an IPv4 CIDR block.
///
/// The accepted grammar is:
/// - IPv4 address (`192.168.1.1`)
/// - IPv6 address (`2001:db8::1`)
/// - hostname (`scanme.example.org`; alphanumeric with inner dots and hyphens)
/// - IPv4 CIDR block (`10.0.0.0/24`, prefix 0-32)
///
/// Malformed input is rejected at parse time; no scan is ever attempted
/// against an unvalidated target string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// A single IP address (v4 or v6).
    Address(IpAddr),
    /// A DNS hostname.
    Hostname(String),
    /// An IPv4 CIDR block.
    Cidr {
        /// Network base address.
        network: Ipv4Addr,
        /// Prefix length, 0-32.
        prefix: u8,
    },
}

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([-a-zA-Z0-9.]*[a-zA-Z0-9])?$").expect("valid regex")
});

impl Target {
    /// Parse and validate a target string.
    pub fn parse(s: &str) -> Result<Self, NetsweepError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NetsweepError::Validation("empty target".to_string()));
        }

        if let Some((addr, prefix)) = s.split_once('/') {
            let network: Ipv4Addr = addr.parse().map_err(|_| {
                NetsweepError::Validation(format!("invalid CIDR base address: '{addr}'"))
            })?;
            let prefix: u8 = prefix
                .parse()
                .ok()
                .filter(|p| *p <= 32)
                .ok_or_else(|| {
                    NetsweepError::Validation(format!("invalid CIDR prefix in '{s}' (expected 0-32)"))
                })?;
            return Ok(Self::Cidr { network, prefix });
        }

        if let Ok(v4) = s.parse::<Ipv4Addr>() {
            return Ok(Self::Address(IpAddr::V4(v4)));
        }
        if let Ok(v6) = s.parse::<Ipv6Addr>() {
            return Ok(Self::Address(IpAddr::V6(v6)));
        }

        // Reject all-numeric dotted strings that failed IPv4 parsing
        // (e.g. out-of-range octets) instead of treating them as hostnames.
        if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(NetsweepError::Validation(format!(
                "invalid IPv4 address: '{s}'"
            )));
        }

        if HOSTNAME_RE.is_match(s) && !s.contains("..") {
            return Ok(Self::Hostname(s.to_string()));
        }

        Err(NetsweepError::Validation(format!(
            "invalid target: '{s}' (expected IP address, hostname, or CIDR block)"
        )))
    }

    /// Number of host addresses this target can expand to, when computable.
    ///
    /// A CIDR block yields `2^(32 - prefix)`; a single address or hostname
    /// yields 1. Used by progress heuristics, so the count includes network
    /// and broadcast addresses the tool may skip.
    #[must_use]
    pub fn cardinality(&self) -> u64 {
        match self {
            Self::Address(_) | Self::Hostname(_) => 1,
            Self::Cidr { prefix, .. } => 1u64 << (32 - u32::from(*prefix)).min(63),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Hostname(name) => f.write_str(name),
            Self::Cidr { network, prefix } => write!(f, "{network}/{prefix}"),
        }
    }
}

impl FromStr for Target {
    type Err = NetsweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Target {
    type Error = NetsweepError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// A validated request to run one scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanRequest {
    /// What to scan.
    pub target: Target,
    /// Which profile to scan it with.
    pub profile: ScanProfileId,
}

impl ScanRequest {
    /// Build a request from raw strings, validating both parts.
    pub fn parse(target: &str, profile: &str) -> Result<Self, NetsweepError> {
        Ok(Self {
            target: Target::parse(target)?,
            profile: profile.parse()?,
        })
    }

    /// The `(target, profile)` dedup fingerprint for this request.
    #[must_use]
    pub fn fingerprint(&self) -> (String, ScanProfileId) {
        (self.target.to_string(), self.profile)
    }
}
