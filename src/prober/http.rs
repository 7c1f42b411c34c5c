//! HTTP egress prober.
//!
//! Connects to the target on the probed port, sends a plain `GET` for the
//! configured path, and checks the status line (and optionally a marker in
//! the body). A port counts as open for egress only when the endpoint
//! itself answered, not when some middlebox merely completed a handshake.

use super::traits::Prober;
use crate::error::ProbeError;
use crate::types::{Port, ScanTarget};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

/// Maximum bytes read from a response.
const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Read buffer size.
const READ_CHUNK: usize = 4096;

/// What the endpoint has to send back for a port to count as allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedResponse {
    /// Exact status code; any 2xx when unset.
    pub status: Option<u16>,
    /// Substring the body must contain.
    pub body_marker: Option<String>,
}

impl ExpectedResponse {
    fn check_status(&self, status: u16) -> Result<(), ProbeError> {
        let ok = match self.status {
            Some(expected) => status == expected,
            None => (200..300).contains(&status),
        };
        if ok {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedStatus(status))
        }
    }
}

/// Probes a port by completing an HTTP exchange with the target.
///
/// Connect and the request/response exchange are each bounded by `timeout`.
/// A reply that is still open when the exchange deadline passes is judged on
/// what has arrived.
pub struct HttpProber {
    target: ScanTarget,
    path: String,
    timeout: Duration,
    expect: ExpectedResponse,
}

impl HttpProber {
    /// Create a prober for `path` on `target`.
    pub fn new(target: ScanTarget, path: impl Into<String>, timeout: Duration) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            target,
            path,
            timeout,
            expect: ExpectedResponse::default(),
        }
    }

    /// Set the response requirements.
    pub fn with_expected(mut self, expect: ExpectedResponse) -> Self {
        self.expect = expect;
        self
    }

    fn request(&self, port: u16) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: egressor/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            self.path,
            self.target.host_header(port),
            env!("CARGO_PKG_VERSION"),
        )
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ProbeError> {
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProbeError::from_io(&e)),
            Err(_) => Err(ProbeError::Timeout),
        }
    }

    /// Send the request and collect enough of the response to judge it.
    ///
    /// Everything happens before `deadline`. When it passes, whatever has
    /// arrived is judged as is, provided the status line is complete.
    async fn exchange(
        &self,
        stream: &mut TcpStream,
        port: u16,
        deadline: Instant,
    ) -> Result<Vec<u8>, ProbeError> {
        match timeout_at(deadline, stream.write_all(self.request(port).as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProbeError::from_io(&e)),
            Err(_) => return Err(ProbeError::Timeout),
        }

        let mut response = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = match timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(Ok(n)) => n,
                // A reset after some bytes arrived still leaves a judgeable reply.
                Ok(Err(_)) if !response.is_empty() => break,
                Ok(Err(e)) => return Err(ProbeError::from_io(&e)),
                Err(_) if find(&response, b"\n").is_some() => break,
                Err(_) => return Err(ProbeError::Timeout),
            };
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);

            if response.len() >= MAX_RESPONSE_SIZE || self.is_decided(&response) {
                break;
            }
        }

        Ok(response)
    }

    /// Whether the bytes so far are enough for `evaluate` to give a final answer.
    fn is_decided(&self, response: &[u8]) -> bool {
        if find(response, b"\n").is_none() {
            return false;
        }
        let status_ok = parse_status_line(response)
            .and_then(|status| self.expect.check_status(status))
            .is_ok();
        if !status_ok {
            return true;
        }
        match &self.expect.body_marker {
            None => true,
            Some(marker) => body_of(response).is_some_and(|b| find(b, marker.as_bytes()).is_some()),
        }
    }

    fn evaluate(&self, response: &[u8]) -> Result<(), ProbeError> {
        if response.is_empty() {
            return Err(ProbeError::NoResponse);
        }

        let status = parse_status_line(response)?;
        self.expect.check_status(status)?;

        if let Some(marker) = &self.expect.body_marker {
            let found = body_of(response).is_some_and(|b| find(b, marker.as_bytes()).is_some());
            if !found {
                return Err(ProbeError::BodyMismatch);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn attempt(&self, port: Port) -> Result<(), ProbeError> {
        let port_num = port.as_u16();
        let addr = SocketAddr::new(self.target.ip, port_num);

        let mut stream = self.connect(addr).await?;
        let deadline = Instant::now() + self.timeout;
        let response = self.exchange(&mut stream, port_num, deadline).await?;

        self.evaluate(&response)
    }
}

/// Extract the status code from `HTTP/x.y NNN reason`.
fn parse_status_line(response: &[u8]) -> Result<u16, ProbeError> {
    let end = find(response, b"\n").unwrap_or(response.len());
    let line = String::from_utf8_lossy(&response[..end]);
    let line = line.trim_end();

    let mut parts = line.split_whitespace();
    let malformed = || ProbeError::MalformedResponse(truncate(line, 64));

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .ok()
            .filter(|c| (100..600).contains(c))
            .ok_or_else(malformed),
        _ => Err(malformed()),
    }
}

/// Bytes after the header terminator, if the headers are complete.
fn body_of(response: &[u8]) -> Option<&[u8]> {
    find(response, b"\r\n\r\n").map(|i| &response[i + 4..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}
