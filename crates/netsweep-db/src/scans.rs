//! Scan history rows and queries.
//!
//! Every job that reaches a terminal state gets one row in `scans`,
//! whether it succeeded or not. Hosts and ports parsed from the tool's
//! output (including hosts salvaged from partial output of a failed or
//! cancelled job) are stored in child tables and cascade-deleted with
//! their scan.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use netsweep_core::{
    FailureKind, HostRecord, HostStatus, JobId, OsGuess, PortProtocol, PortRecord, PortState,
    ScanFailure, ScanProfileId, ScanRequest, ScanResult,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Terminal disposition of a stored scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// The tool ran to completion and its output parsed cleanly.
    Succeeded,
    /// The tool or its output failed.
    Failed,
    /// The scan was cancelled before completion.
    Cancelled,
    /// The scan needed elevation the process did not have.
    PermissionDenied,
}

impl ScanStatus {
    fn from_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Cancelled => Self::Cancelled,
            FailureKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::PermissionDenied => "permission_denied",
        };
        f.write_str(s)
    }
}

impl FromStr for ScanStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "permission_denied" => Ok(Self::PermissionDenied),
            other => Err(DatabaseError::Decode(format!("unknown scan status '{other}'"))),
        }
    }
}

/// One fully loaded historical scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredScan {
    /// The job that produced this scan.
    pub id: JobId,
    /// Target string as submitted.
    pub target: String,
    /// Profile the scan ran with.
    pub profile: ScanProfileId,
    /// Terminal disposition.
    pub status: ScanStatus,
    /// When the scan reached its terminal state.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// The tool's run summary, when it reported one.
    pub summary: Option<String>,
    /// Whether the output stream was cut short.
    pub truncated: bool,
    /// Failure classification, for non-succeeded scans.
    pub failure_kind: Option<String>,
    /// Failure message, for non-succeeded scans.
    pub error_message: Option<String>,
    /// The tool's exit code, when it ran.
    pub tool_exit_code: Option<i32>,
    /// Parsed hosts, in report order.
    pub hosts: Vec<HostRecord>,
}

/// One scan in a history listing, without its hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanListEntry {
    /// The job that produced this scan.
    pub id: JobId,
    /// Target string as submitted.
    pub target: String,
    /// Profile the scan ran with.
    pub profile: ScanProfileId,
    /// Terminal disposition.
    pub status: ScanStatus,
    /// When the scan reached its terminal state.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Number of hosts stored for this scan.
    pub host_count: u32,
}

/// Store a completed scan result.
pub async fn store_result(
    pool: &Pool<Sqlite>,
    request: &ScanRequest,
    result: &ScanResult,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_scan(
        &mut tx,
        result.job_id,
        request,
        ScanStatus::Succeeded,
        result.duration_ms,
        result.summary.as_deref(),
        result.truncated,
        None,
        None,
        None,
    )
    .await?;
    insert_hosts(&mut tx, result.job_id, &result.hosts).await?;
    tx.commit().await?;

    tracing::debug!(job_id = %result.job_id, hosts = result.hosts.len(), "scan result stored");
    Ok(())
}

/// Store a terminal scan failure, with any salvaged partial hosts.
pub async fn store_failure(
    pool: &Pool<Sqlite>,
    request: &ScanRequest,
    failure: &ScanFailure,
) -> Result<()> {
    let (duration_ms, summary, truncated, hosts) = match &failure.partial {
        Some(partial) => (
            partial.duration_ms,
            partial.summary.as_deref(),
            partial.truncated,
            partial.hosts.as_slice(),
        ),
        None => (0, None, true, &[][..]),
    };

    let mut tx = pool.begin().await?;
    insert_scan(
        &mut tx,
        failure.job_id,
        request,
        ScanStatus::from_failure(failure.kind),
        duration_ms,
        summary,
        truncated,
        Some(failure.kind.to_string()),
        Some(failure.message.clone()),
        failure.tool_exit_code,
    )
    .await?;
    insert_hosts(&mut tx, failure.job_id, hosts).await?;
    tx.commit().await?;

    tracing::debug!(job_id = %failure.job_id, kind = %failure.kind, "scan failure stored");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_scan(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: JobId,
    request: &ScanRequest,
    status: ScanStatus,
    duration_ms: u64,
    summary: Option<&str>,
    truncated: bool,
    failure_kind: Option<String>,
    error_message: Option<String>,
    tool_exit_code: Option<i32>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO scans (id, target, profile, status, finished_at, duration_ms, summary,
                            truncated, failure_kind, error_message, tool_exit_code)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(job_id.to_string())
    .bind(request.target.to_string())
    .bind(request.profile.as_str())
    .bind(status.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(i64::try_from(duration_ms).unwrap_or(i64::MAX))
    .bind(summary)
    .bind(i64::from(truncated))
    .bind(failure_kind)
    .bind(error_message)
    .bind(tool_exit_code)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_hosts(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: JobId,
    hosts: &[HostRecord],
) -> Result<()> {
    for host in hosts {
        let host_id: i64 = sqlx::query_scalar(
            "INSERT INTO hosts (scan_id, address, status, hostnames, mac_address,
                                os_guesses, all_os_guesses)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(job_id.to_string())
        .bind(&host.address)
        .bind(host.status.to_string())
        .bind(serde_json::to_string(&host.hostnames)?)
        .bind(host.mac_address.as_deref())
        .bind(serde_json::to_string(&host.os_guesses)?)
        .bind(serde_json::to_string(&host.all_os_guesses)?)
        .fetch_one(&mut **tx)
        .await?;

        for port in &host.ports {
            sqlx::query(
                "INSERT INTO ports (host_id, number, protocol, state, service_name, service_version)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(host_id)
            .bind(i64::from(port.number))
            .bind(port.protocol.to_string())
            .bind(port.state.to_string())
            .bind(port.service_name.as_deref())
            .bind(port.service_version.as_deref())
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

/// Load one scan with all its hosts and ports.
pub async fn get_scan(pool: &Pool<Sqlite>, job_id: JobId) -> Result<StoredScan> {
    let row = sqlx::query(
        "SELECT id, target, profile, status, finished_at, duration_ms, summary, truncated,
                failure_kind, error_message, tool_exit_code
         FROM scans WHERE id = ?",
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::ScanNotFound(job_id.to_string()))?;

    let hosts = load_hosts(pool, job_id).await?;
    scan_from_row(&row, hosts)
}

/// Most recent scans, newest first, without host detail.
pub async fn list_recent(pool: &Pool<Sqlite>, limit: u32) -> Result<Vec<ScanListEntry>> {
    let rows = sqlx::query(
        "SELECT s.id, s.target, s.profile, s.status, s.finished_at, s.duration_ms,
                (SELECT COUNT(*) FROM hosts h WHERE h.scan_id = s.id) AS host_count
         FROM scans s
         ORDER BY s.finished_at DESC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ScanListEntry {
                id: parse_job_id(row)?,
                target: row.try_get("target")?,
                profile: parse_profile(row)?,
                status: row.try_get::<String, _>("status")?.parse()?,
                finished_at: parse_timestamp(row)?,
                duration_ms: u64::try_from(row.try_get::<i64, _>("duration_ms")?).unwrap_or(0),
                host_count: u32::try_from(row.try_get::<i64, _>("host_count")?).unwrap_or(0),
            })
        })
        .collect()
}

/// Delete a scan and its hosts and ports. Returns `false` when no such
/// scan was stored.
pub async fn delete_scan(pool: &Pool<Sqlite>, job_id: JobId) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM scans WHERE id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected() > 0)
}

async fn load_hosts(pool: &Pool<Sqlite>, job_id: JobId) -> Result<Vec<HostRecord>> {
    let host_rows = sqlx::query(
        "SELECT id, address, status, hostnames, mac_address, os_guesses, all_os_guesses
         FROM hosts WHERE scan_id = ? ORDER BY id",
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut hosts = Vec::with_capacity(host_rows.len());
    for row in &host_rows {
        let host_id: i64 = row.try_get("id")?;
        let port_rows = sqlx::query(
            "SELECT number, protocol, state, service_name, service_version
             FROM ports WHERE host_id = ? ORDER BY id",
        )
        .bind(host_id)
        .fetch_all(pool)
        .await?;

        let mut ports = Vec::with_capacity(port_rows.len());
        for port_row in &port_rows {
            ports.push(port_from_row(port_row)?);
        }

        let status = match row.try_get::<String, _>("status")?.as_str() {
            "up" => HostStatus::Up,
            _ => HostStatus::Down,
        };
        let hostnames: BTreeSet<String> =
            serde_json::from_str(&row.try_get::<String, _>("hostnames")?)?;
        let os_guesses: Vec<OsGuess> =
            serde_json::from_str(&row.try_get::<String, _>("os_guesses")?)?;
        let all_os_guesses: Vec<OsGuess> =
            serde_json::from_str(&row.try_get::<String, _>("all_os_guesses")?)?;

        hosts.push(HostRecord {
            address: row.try_get("address")?,
            status,
            hostnames,
            mac_address: row.try_get("mac_address")?,
            os_guesses,
            all_os_guesses,
            ports,
        });
    }
    Ok(hosts)
}

fn port_from_row(row: &SqliteRow) -> Result<PortRecord> {
    let protocol_str: String = row.try_get("protocol")?;
    let protocol = PortProtocol::from_tool(&protocol_str)
        .ok_or_else(|| DatabaseError::Decode(format!("unknown protocol '{protocol_str}'")))?;
    let state_str: String = row.try_get("state")?;
    let state = PortState::from_tool(&state_str)
        .ok_or_else(|| DatabaseError::Decode(format!("unknown port state '{state_str}'")))?;
    Ok(PortRecord {
        number: u16::try_from(row.try_get::<i64, _>("number")?)
            .map_err(|_| DatabaseError::Decode("port number out of range".to_string()))?,
        protocol,
        state,
        service_name: row.try_get("service_name")?,
        service_version: row.try_get("service_version")?,
    })
}

fn scan_from_row(row: &SqliteRow, hosts: Vec<HostRecord>) -> Result<StoredScan> {
    Ok(StoredScan {
        id: parse_job_id(row)?,
        target: row.try_get("target")?,
        profile: parse_profile(row)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        finished_at: parse_timestamp(row)?,
        duration_ms: u64::try_from(row.try_get::<i64, _>("duration_ms")?).unwrap_or(0),
        summary: row.try_get("summary")?,
        truncated: row.try_get::<i64, _>("truncated")? != 0,
        failure_kind: row.try_get("failure_kind")?,
        error_message: row.try_get("error_message")?,
        tool_exit_code: row.try_get("tool_exit_code")?,
        hosts,
    })
}

fn parse_job_id(row: &SqliteRow) -> Result<JobId> {
    let id: String = row.try_get("id")?;
    JobId::parse(&id).map_err(|_| DatabaseError::Decode(format!("invalid job ID '{id}'")))
}

fn parse_profile(row: &SqliteRow) -> Result<ScanProfileId> {
    let profile: String = row.try_get("profile")?;
    profile
        .parse()
        .map_err(|_| DatabaseError::Decode(format!("unknown profile '{profile}'")))
}

fn parse_timestamp(row: &SqliteRow) -> Result<DateTime<Utc>> {
    let finished_at: String = row.try_get("finished_at")?;
    DateTime::parse_from_rfc3339(&finished_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("bad timestamp '{finished_at}': {e}")))
}
