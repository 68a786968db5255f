//! Geographic vantage points.
//!
//! A vantage point is an egress location the engine can resolve through to
//! look like a client somewhere else. The production implementation drives a
//! locally running Tor daemon: the control port rotates circuits and the SOCKS
//! port resolves names through the current exit relay. The daemon itself is
//! managed elsewhere.

#![allow(clippy::missing_errors_doc)]

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, ResolutionFailure, Result};

/// SOCKS5 command number of Tor's RESOLVE extension.
const SOCKS_CMD_RESOLVE: u8 = 0xF0;

/// Optional geo-diversity capability.
#[async_trait]
pub trait VantagePoint: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Identity of the current egress, stable until the next rotation.
    async fn current_vantage_point_id(&self) -> String;

    async fn resolve_through_vantage_point(
        &self,
        name: &str,
    ) -> std::result::Result<IpAddr, ResolutionFailure>;

    /// Ask for a new egress. Returns `false` when the request was refused.
    async fn rotate_vantage_point(&self) -> bool;
}

/// Tor daemon reached through its control and SOCKS ports.
#[derive(Debug)]
pub struct TorVantage {
    control_addr: SocketAddr,
    socks_addr: SocketAddr,
    password: Option<String>,
    timeout: Duration,
    rotations: AtomicU64,
}

impl TorVantage {
    pub fn new(
        control_addr: SocketAddr,
        socks_addr: SocketAddr,
        password: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            control_addr,
            socks_addr,
            password,
            timeout,
            rotations: AtomicU64::new(0),
        }
    }

    /// Open an authenticated control connection.
    async fn control(&self) -> Result<BufReader<TcpStream>> {
        let stream = timeout(self.timeout, TcpStream::connect(self.control_addr))
            .await
            .map_err(|_| Error::Timeout)??;
        let mut conn = BufReader::new(stream);
        let auth = match &self.password {
            Some(pw) => format!("AUTHENTICATE \"{}\"", pw.replace('"', "\\\"")),
            None => "AUTHENTICATE".to_string(),
        };
        self.command(&mut conn, &auth).await?;
        Ok(conn)
    }

    /// Send one command and collect reply lines up to the final `250 `.
    async fn command(&self, conn: &mut BufReader<TcpStream>, cmd: &str) -> Result<Vec<String>> {
        conn.get_mut()
            .write_all(format!("{cmd}\r\n").as_bytes())
            .await?;
        let mut lines = Vec::new();
        // inside a `250+` data block until a lone "."
        let mut in_data = false;
        loop {
            let mut line = String::new();
            let read = timeout(self.timeout, conn.read_line(&mut line))
                .await
                .map_err(|_| Error::Timeout)??;
            if read == 0 {
                return Err(Error::network("tor control connection closed"));
            }
            let line = line.trim_end().to_string();
            if in_data {
                in_data = line != ".";
                lines.push(line);
                continue;
            }
            if line.starts_with('4') || line.starts_with('5') {
                return Err(Error::network(format!("tor control refused {cmd}: {line}")));
            }
            in_data = line.starts_with("250+");
            let done = line.starts_with("250 ");
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    async fn socks_resolve(&self, name: &str) -> Result<IpAddr> {
        let name = name.trim_end_matches('.');
        let len = u8::try_from(name.len())
            .map_err(|_| Error::parse(format!("name too long for SOCKS: {name}")))?;
        let mut stream = timeout(self.timeout, TcpStream::connect(self.socks_addr))
            .await
            .map_err(|_| Error::Timeout)??;

        stream.write_all(&[0x05, 0x01, 0x00]).await?;
        let mut greeting = [0u8; 2];
        stream.read_exact(&mut greeting).await?;
        if greeting != [0x05, 0x00] {
            return Err(Error::network("SOCKS server rejected no-auth method"));
        }

        let mut request = vec![0x05, SOCKS_CMD_RESOLVE, 0x00, 0x03, len];
        request.extend_from_slice(name.as_bytes());
        request.extend_from_slice(&[0x00, 0x00]);
        stream.write_all(&request).await?;

        let mut header = [0u8; 4];
        timeout(self.timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| Error::Timeout)??;
        if header[1] != 0x00 {
            return Err(Error::network(format!(
                "SOCKS resolve of {name} failed with reply code {}",
                header[1]
            )));
        }
        let ip = match header[3] {
            0x01 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            0x04 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(Error::parse(format!(
                    "unexpected SOCKS address type {other}"
                )))
            }
        };
        Ok(ip)
    }
}

/// Exit relay of the first built general-purpose circuit.
///
/// Lines look like `5 BUILT $FP~guard,$FP~middle,$FP~exit PURPOSE=GENERAL ...`.
#[must_use]
pub fn parse_exit_relay(lines: &[String]) -> Option<String> {
    lines.iter().find_map(|line| {
        let line = line.trim_start_matches("250+circuit-status=");
        let mut fields = line.split_whitespace();
        let _id = fields.next()?;
        if fields.next()? != "BUILT" {
            return None;
        }
        let path = fields.next()?;
        if !line.contains("PURPOSE=GENERAL") {
            return None;
        }
        let exit = path.rsplit(',').next()?;
        let (fingerprint, nickname) = exit.split_once('~').unwrap_or((exit, ""));
        let short_fp: String = fingerprint.trim_start_matches('$').chars().take(8).collect();
        Some(if nickname.is_empty() {
            short_fp
        } else {
            format!("{nickname} ({short_fp})")
        })
    })
}

#[async_trait]
impl VantagePoint for TorVantage {
    async fn is_available(&self) -> bool {
        match self.control().await {
            Ok(_) => timeout(self.timeout, TcpStream::connect(self.socks_addr))
                .await
                .is_ok_and(|r| r.is_ok()),
            Err(e) => {
                tracing::debug!("tor control port unavailable: {e}");
                false
            }
        }
    }

    async fn current_vantage_point_id(&self) -> String {
        let fallback = format!("circuit-{}", self.rotations.load(Ordering::SeqCst));
        let mut conn = match self.control().await {
            Ok(conn) => conn,
            Err(_) => return fallback,
        };
        match self.command(&mut conn, "GETINFO circuit-status").await {
            Ok(lines) => parse_exit_relay(&lines).unwrap_or(fallback),
            Err(e) => {
                tracing::debug!("circuit-status failed: {e}");
                fallback
            }
        }
    }

    async fn resolve_through_vantage_point(
        &self,
        name: &str,
    ) -> std::result::Result<IpAddr, ResolutionFailure> {
        self.socks_resolve(name).await.map_err(|e| match e {
            Error::Timeout => ResolutionFailure::Timeout(self.timeout.as_millis() as u64),
            other => ResolutionFailure::Lookup(other.to_string()),
        })
    }

    async fn rotate_vantage_point(&self) -> bool {
        let result = async {
            let mut conn = self.control().await?;
            self.command(&mut conn, "SIGNAL NEWNYM").await
        }
        .await;
        match result {
            Ok(_) => {
                self.rotations.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::warn!("vantage point rotation failed: {e}");
                false
            }
        }
    }
}
