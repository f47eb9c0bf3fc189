//! Streaming parser for the tool's XML output.
//!
//! The tool writes XML to stdout while the scan is still running, so the
//! parser consumes it incrementally: [`ResultParser::feed`] accepts
//! arbitrary byte chunks, holds partial-element state across calls, and
//! surfaces partial-structure observations (host discovered, task
//! progress) long before the stream ends. [`ResultParser::finalize`]
//! produces the normalized result, flagging truncation instead of ever
//! passing a cut-off stream as a complete one.
//!
//! Unknown elements are ignored for forward compatibility. Malformed
//! input stops consumption and is reported with its byte offset; hosts
//! parsed before the fault are preserved.

use crate::error::ParseError;
use netsweep_core::{
    HostRecord, HostStatus, JobId, OsGuess, PortProtocol, PortRecord, PortState, ScanResult,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::time::Duration;

/// A partial-structure observation surfaced while feeding.
///
/// Drained by the executor after each feed and forwarded to the
/// progress aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseObservation {
    /// A host element opened; the tool has started reporting a host.
    HostDiscovered,
    /// A host element closed with all its records parsed.
    HostCompleted {
        /// Whether the host was reported up.
        up: bool,
    },
    /// The tool reported its own completion estimate for a task.
    TaskProgress {
        /// Percent complete, 0-100.
        percent: f32,
        /// The tool's name for the running task.
        task: String,
    },
}

#[derive(Debug, Default)]
struct PortBuilder {
    number: Option<u16>,
    protocol: Option<PortProtocol>,
    state: Option<PortState>,
    service_name: Option<String>,
    service_version: Option<String>,
}

impl PortBuilder {
    fn build(self) -> Option<PortRecord> {
        Some(PortRecord {
            number: self.number?,
            protocol: self.protocol?,
            state: self.state?,
            service_name: self.service_name,
            service_version: self.service_version,
        })
    }
}

#[derive(Debug, Default)]
struct HostBuilder {
    address: Option<String>,
    status: Option<HostStatus>,
    hostnames: BTreeSet<String>,
    mac_address: Option<String>,
    os_guesses: Vec<OsGuess>,
    ports: Vec<PortRecord>,
}

impl HostBuilder {
    fn build(self, min_os_confidence: u8) -> HostRecord {
        let primary = self
            .os_guesses
            .iter()
            .filter(|g| g.confidence >= min_os_confidence)
            .cloned()
            .collect();
        HostRecord {
            address: self.address.unwrap_or_else(|| "unknown".to_string()),
            status: self.status.unwrap_or(HostStatus::Down),
            hostnames: self.hostnames,
            mac_address: self.mac_address,
            os_guesses: primary,
            all_os_guesses: self.os_guesses,
            ports: self.ports,
        }
    }
}

/// Incremental consumer of the tool's XML output stream.
pub struct ResultParser {
    min_os_confidence: u8,
    /// Bytes received but not yet consumed as complete XML events.
    buf: Vec<u8>,
    /// Absolute stream offset of `buf[0]`.
    base_offset: u64,
    hosts: Vec<HostRecord>,
    current_host: Option<HostBuilder>,
    current_port: Option<PortBuilder>,
    summary: Option<String>,
    run_finished: bool,
    fatal: Option<ParseError>,
    observations: Vec<ParseObservation>,
}

impl ResultParser {
    /// New parser; OS guesses below `min_os_confidence` stay out of the
    /// primary guess list.
    #[must_use]
    pub fn new(min_os_confidence: u8) -> Self {
        Self {
            min_os_confidence,
            buf: Vec::new(),
            base_offset: 0,
            hosts: Vec::new(),
            current_host: None,
            current_port: None,
            summary: None,
            run_finished: false,
            fatal: None,
            observations: Vec::new(),
        }
    }

    /// Feed the next chunk of tool output.
    ///
    /// Only complete XML events are consumed; a partial element at the
    /// end of the accumulated input waits for the next feed. After the
    /// first malformed fragment all further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.fatal.is_some() {
            return;
        }
        self.buf.extend_from_slice(chunk);

        // The reader restarts over the unconsumed tail on every feed, so
        // it has no memory of open tags consumed by earlier calls. End
        // tags whose opens are gone must be tolerated, not flagged.
        let mut buf = std::mem::take(&mut self.buf);
        let mut reader = Reader::from_reader(buf.as_slice());
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut consumed = 0usize;
        let mut scratch = Vec::new();
        loop {
            scratch.clear();
            match reader.read_event_into(&mut scratch) {
                Ok(Event::Eof) => {
                    consumed = buf.len();
                    break;
                }
                Ok(event) => {
                    self.handle_event(&event);
                    consumed = usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX);
                }
                Err(err) => {
                    let pos = usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX);
                    if pos >= buf.len() {
                        // Incomplete element at the end of input; wait for
                        // more bytes before judging it malformed.
                        break;
                    }
                    self.fatal = Some(ParseError {
                        offset: self.base_offset + pos as u64,
                        message: err.to_string(),
                    });
                    consumed = buf.len();
                    break;
                }
            }
        }

        let consumed = consumed.min(buf.len());
        self.buf = buf.split_off(consumed);
        self.base_offset += consumed as u64;
    }

    /// Whether a malformed fragment has stopped consumption.
    #[must_use]
    pub fn has_fatal_error(&self) -> bool {
        self.fatal.is_some()
    }

    /// Number of hosts fully parsed so far.
    #[must_use]
    pub fn hosts_completed(&self) -> usize {
        self.hosts.len()
    }

    /// Drain the partial-structure observations collected since the last
    /// call.
    pub fn take_observations(&mut self) -> Vec<ParseObservation> {
        std::mem::take(&mut self.observations)
    }

    /// Finish the stream and produce the normalized result.
    ///
    /// A stream that ended before the closing run element yields a
    /// result with `truncated = true` containing every host fully parsed
    /// before the cut, together with a [`ParseError`] describing the
    /// cut-off point. It is never silently passed off as complete.
    #[must_use]
    pub fn finalize(self, job_id: JobId, duration: Duration) -> (ScanResult, Option<ParseError>) {
        let mut error = self.fatal;
        let truncated = !self.run_finished || error.is_some();
        if truncated && error.is_none() {
            error = Some(ParseError {
                offset: self.base_offset,
                message: "output stream ended before the closing <nmaprun> element".to_string(),
            });
        }

        let result = ScanResult {
            job_id,
            hosts: self.hosts,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            summary: self.summary,
            truncated,
        };
        (result, error)
    }

    fn handle_event(&mut self, event: &Event<'_>) {
        match event {
            Event::Start(e) => self.open_element(e),
            Event::Empty(e) => {
                self.open_element(e);
                self.close_element(e.local_name().as_ref());
            }
            Event::End(e) => self.close_element(e.local_name().as_ref()),
            // Text, CDATA, comments, declarations: nothing we extract
            // lives outside attributes.
            _ => {}
        }
    }

    fn open_element(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"host" => {
                self.current_host = Some(HostBuilder::default());
                self.observations.push(ParseObservation::HostDiscovered);
            }
            b"status" => {
                if let Some(host) = &mut self.current_host {
                    host.status = Some(match attr(e, b"state").as_deref() {
                        Some("up") => HostStatus::Up,
                        _ => HostStatus::Down,
                    });
                }
            }
            b"address" => {
                if let Some(host) = &mut self.current_host {
                    match attr(e, b"addrtype").as_deref() {
                        Some("mac") => host.mac_address = attr(e, b"addr"),
                        Some("ipv4" | "ipv6") => {
                            if host.address.is_none() {
                                host.address = attr(e, b"addr");
                            }
                        }
                        _ => {}
                    }
                }
            }
            b"hostname" => {
                if let Some(host) = &mut self.current_host {
                    if let Some(name) = attr(e, b"name") {
                        host.hostnames.insert(name);
                    }
                }
            }
            b"port" => {
                if self.current_host.is_some() {
                    self.current_port = Some(PortBuilder {
                        number: attr(e, b"portid").and_then(|v| v.parse().ok()),
                        protocol: attr(e, b"protocol")
                            .as_deref()
                            .and_then(PortProtocol::from_tool),
                        ..PortBuilder::default()
                    });
                }
            }
            b"state" => {
                if let Some(port) = &mut self.current_port {
                    port.state = attr(e, b"state").as_deref().and_then(PortState::from_tool);
                }
            }
            b"service" => {
                if let Some(port) = &mut self.current_port {
                    port.service_name = attr(e, b"name");
                    let product = attr(e, b"product");
                    let version = attr(e, b"version");
                    port.service_version = match (product, version) {
                        (Some(p), Some(v)) => Some(format!("{p} {v}")),
                        (Some(p), None) => Some(p),
                        (None, Some(v)) => Some(v),
                        (None, None) => None,
                    };
                }
            }
            b"osmatch" => {
                // The tool lists matches in descending accuracy; the order
                // is preserved as-is so ties keep its ranking.
                if let Some(host) = &mut self.current_host {
                    if let (Some(name), Some(confidence)) = (
                        attr(e, b"name"),
                        attr(e, b"accuracy").and_then(|v| v.parse::<u8>().ok()),
                    ) {
                        host.os_guesses.push(OsGuess { name, confidence });
                    }
                }
            }
            b"finished" => {
                self.summary = attr(e, b"summary");
            }
            b"taskprogress" => {
                if let Some(percent) = attr(e, b"percent").and_then(|v| v.parse::<f32>().ok()) {
                    self.observations.push(ParseObservation::TaskProgress {
                        percent,
                        task: attr(e, b"task").unwrap_or_default(),
                    });
                }
            }
            _ => {}
        }
    }

    fn close_element(&mut self, name: &[u8]) {
        match name {
            b"port" => {
                if let (Some(builder), Some(host)) =
                    (self.current_port.take(), self.current_host.as_mut())
                {
                    if let Some(record) = builder.build() {
                        host.ports.push(record);
                    }
                }
            }
            b"host" => {
                if let Some(builder) = self.current_host.take() {
                    let host = builder.build(self.min_os_confidence);
                    self.observations.push(ParseObservation::HostCompleted {
                        up: host.status == HostStatus::Up,
                    });
                    self.hosts.push(host);
                }
            }
            b"nmaprun" => {
                self.run_finished = true;
            }
            _ => {}
        }
    }
}

/// Fetch a named attribute's unescaped value from an element.
fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
