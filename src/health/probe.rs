//! HTTPS reachability probe.
//!
//! # Responsibilities
//! - Open a TCP connection directly or through the local SOCKS5 proxy
//! - Complete a verified TLS handshake against the requested host
//! - Send a `HEAD /` request and judge the status line
//!
//! # Design Decisions
//! - Certificate chain and hostname are always verified (webpki roots)
//! - Only the status line is read; the body is never consumed
//! - Every failure collapses to "unreachable" at the trait boundary

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const MAX_STATUS_LINE: u64 = 1024;
const USER_AGENT: &str = concat!("torkeeper/", env!("CARGO_PKG_VERSION"));

/// How a probe reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// Through a SOCKS5 proxy on the loopback interface.
    Socks(u16),
}

impl Route {
    pub fn is_proxied(&self) -> bool {
        matches!(self, Route::Socks(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    #[error("SOCKS5 proxy error: {0}")]
    Socks(String),
    #[error("invalid server name: {0}")]
    ServerName(String),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),
    #[error("server presented no certificate")]
    NoCertificate,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed status line: {0:?}")]
    StatusLine(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("probe timed out")]
    Timeout,
}

/// Checks whether an HTTPS endpoint answers.
#[async_trait]
pub trait Prober: Send + Sync {
    /// One bounded attempt. Returns the HTTP status on success.
    async fn check(&self, host: &str, port: u16, route: Route, timeout: Duration) -> Result<u16, ProbeError>;

    /// `true` when the endpoint answered with an acceptable status within
    /// `timeout`; `false` on any failure.
    async fn probe(&self, host: &str, port: u16, route: Route, timeout: Duration) -> bool {
        match self.check(host, port, route, timeout).await {
            Ok(status) => {
                tracing::debug!(host, port, ?route, status, "Probe succeeded");
                true
            }
            Err(e) => {
                tracing::debug!(host, port, ?route, error = %e, "Probe failed");
                false
            }
        }
    }
}

/// [`Prober`] over rustls.
#[derive(Clone)]
pub struct TlsProber {
    connector: TlsConnector,
}

impl TlsProber {
    /// Prober trusting the bundled Mozilla root set.
    pub fn new() -> Result<Self, rustls::Error> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: RootCertStore) -> Result<Self, rustls::Error> {
        let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn attempt(&self, host: &str, port: u16, route: Route) -> Result<u16, ProbeError> {
        let server_name =
            ServerName::try_from(host.to_owned()).map_err(|_| ProbeError::ServerName(host.to_owned()))?;

        let stream = match route {
            Route::Direct => TcpStream::connect((host, port)).await.map_err(ProbeError::Connect)?,
            Route::Socks(proxy_port) => {
                let proxy = SocketAddr::from((Ipv4Addr::LOCALHOST, proxy_port));
                let mut stream = TcpStream::connect(proxy).await.map_err(ProbeError::Connect)?;
                socks5_connect(&mut stream, host, port).await?;
                stream
            }
        };
        stream.set_nodelay(true)?;

        let mut tls = self.connector.connect(server_name, stream).await.map_err(ProbeError::Tls)?;

        let (_, session) = tls.get_ref();
        if session.peer_certificates().map_or(true, |chain| chain.is_empty()) {
            return Err(ProbeError::NoCertificate);
        }

        let request = format!(
            "HEAD / HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nCache-Control: no-cache\r\nPragma: no-cache\r\nConnection: close\r\n\r\n"
        );
        tls.write_all(request.as_bytes()).await?;
        tls.flush().await?;

        read_status(tls).await
    }
}

#[async_trait]
impl Prober for TlsProber {
    async fn check(&self, host: &str, port: u16, route: Route, timeout: Duration) -> Result<u16, ProbeError> {
        tokio::time::timeout(timeout, self.attempt(host, port, route))
            .await
            .unwrap_or(Err(ProbeError::Timeout))
    }
}

async fn read_status<S>(stream: S) -> Result<u16, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream).take(MAX_STATUS_LINE);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    parse_status_line(&line)
}

/// Accept statuses 200 through 404 inclusive.
pub fn parse_status_line(line: &str) -> Result<u16, ProbeError> {
    let mut parts = line.split_whitespace();
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| ProbeError::StatusLine(line.trim_end().to_owned()))?,
        _ => return Err(ProbeError::StatusLine(line.trim_end().to_owned())),
    };

    if (200..=404).contains(&status) {
        Ok(status)
    } else {
        Err(ProbeError::Status(status))
    }
}

/// SOCKS5 `CONNECT` with a domain-name address, so the proxy resolves it.
pub async fn socks5_connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host_len = u8::try_from(host.len())
        .map_err(|_| ProbeError::Socks(format!("host name too long: {} bytes", host.len())))?;

    // Greeting: version 5, one method, no authentication.
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting != [0x05, 0x00] {
        return Err(ProbeError::Socks(format!("unexpected greeting reply {greeting:?}")));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, host_len]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != 0x05 {
        return Err(ProbeError::Socks(format!("invalid reply version {}", header[0])));
    }
    if header[1] != 0x00 {
        return Err(ProbeError::Socks(reply_message(header[1]).to_owned()));
    }

    // Discard the bound address and port.
    let remaining = match header[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0]) + 2
        }
        other => return Err(ProbeError::Socks(format!("unsupported address type {other}"))),
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
