//! Normalized scan output records.
//!
//! These are the value objects produced once per completed job. They have
//! no identity outside their owning [`ScanResult`] and are immutable after
//! production; the persistence and visualization collaborators consume
//! them as-is.

use crate::types::JobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Whether a scanned host responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Host responded to probes.
    Up,
    /// Host did not respond.
    Down,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Transport protocol of a scanned port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// SCTP.
    Sctp,
}

impl PortProtocol {
    /// Parse the tool's protocol attribute; unknown values map to None.
    #[must_use]
    pub fn from_tool(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Sctp => f.write_str("sctp"),
        }
    }
}

/// Reported state of a scanned port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    /// Port accepted the probe.
    Open,
    /// Port actively refused the probe.
    Closed,
    /// Probe was dropped by a filter.
    Filtered,
}

impl PortState {
    /// Parse the tool's state attribute; compound states like
    /// `open|filtered` resolve to their first component.
    #[must_use]
    pub fn from_tool(s: &str) -> Option<Self> {
        match s.split('|').next().unwrap_or(s) {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "filtered" | "unfiltered" => Some(Self::Filtered),
            _ => None,
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Filtered => f.write_str("filtered"),
        }
    }
}

/// One port as reported by the tool.
///
/// Ports appear only when the tool explicitly reported them; absence of a
/// port in a host record carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    /// Port number.
    pub number: u16,
    /// Transport protocol.
    pub protocol: PortProtocol,
    /// Reported state.
    pub state: PortState,
    /// Service name, when detected.
    pub service_name: Option<String>,
    /// Service product/version string, when detected.
    pub service_version: Option<String>,
}

/// One OS fingerprint guess with its confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsGuess {
    /// OS name as reported by the tool.
    pub name: String,
    /// Confidence, 0-100.
    pub confidence: u8,
}

/// One scanned host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Primary address of the host.
    pub address: String,
    /// Whether the host responded.
    pub status: HostStatus,
    /// All hostnames reported for this host.
    pub hostnames: BTreeSet<String>,
    /// MAC address, when the tool reported one (local-segment scans).
    pub mac_address: Option<String>,
    /// OS guesses at or above the configured confidence threshold, in the
    /// tool's own descending-confidence order. Never re-sorted: ties keep
    /// the tool's first-listed ordering.
    pub os_guesses: Vec<OsGuess>,
    /// Every OS guess the tool reported, unfiltered, same ordering.
    pub all_os_guesses: Vec<OsGuess>,
    /// Explicitly reported ports, in report order.
    pub ports: Vec<PortRecord>,
}

impl HostRecord {
    /// Best OS guess above the threshold, if any.
    #[must_use]
    pub fn primary_os(&self) -> Option<&OsGuess> {
        self.os_guesses.first()
    }
}

/// The terminal success outcome of one scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Job that produced this result.
    pub job_id: JobId,
    /// All hosts fully parsed from the tool's output, in report order.
    pub hosts: Vec<HostRecord>,
    /// Wall-clock duration of the scan in milliseconds.
    pub duration_ms: u64,
    /// The tool's own run summary, when it reported one.
    pub summary: Option<String>,
    /// True when the output stream ended before the tool's closing run
    /// element (process killed or cancelled mid-scan). A truncated result
    /// contains every host parsed before the cut and nothing synthesized.
    pub truncated: bool,
}

impl ScanResult {
    /// Number of hosts reported up.
    #[must_use]
    pub fn hosts_up(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| h.status == HostStatus::Up)
            .count()
    }
}

/// Classification of a terminal scan failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The external tool binary could not be located.
    ToolNotFound,
    /// The requested profile does not exist in the registry.
    UnknownProfile,
    /// The profile requires elevation and the process lacks it.
    PermissionDenied,
    /// The tool's output could not be parsed.
    Parse,
    /// The tool ran and exited non-zero.
    Process,
    /// The target string failed validation.
    InvalidTarget,
    /// The job was cancelled before completion.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ToolNotFound => "tool_not_found",
            Self::UnknownProfile => "unknown_profile",
            Self::PermissionDenied => "permission_denied",
            Self::Parse => "parse",
            Self::Process => "process",
            Self::InvalidTarget => "invalid_target",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The terminal failure outcome of one scan job.
///
/// Carries enough context for the caller to render a precise message;
/// the engine never reduces a failure to a generic "scan failed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    /// Job that failed.
    pub job_id: JobId,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
    /// The tool's exit code, when it ran at all.
    pub tool_exit_code: Option<i32>,
    /// Hosts salvaged from partial output (always `truncated = true`),
    /// present when the parser completed at least one host before the
    /// job failed or was cancelled.
    pub partial: Option<ScanResult>,
}
