use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use super::access::{self, AccessControlList};
use super::framing::{FrameReader, FrameWriter};
use super::tls;
use crate::config::{TlsSettings, TransportSettings};
use crate::utils::{Error, Result};

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// A plain or TLS byte stream.
pub type BoxedStream = Box<dyn AsyncStream>;

pub type StreamReader = FrameReader<ReadHalf<BoxedStream>>;
pub type StreamWriter = FrameWriter<WriteHalf<BoxedStream>>;

/// Split a stream into a frame reader and writer.
pub fn framed(stream: BoxedStream, settings: &TransportSettings) -> (StreamReader, StreamWriter) {
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader::new(read, settings.incoming_message_byte_limit),
        FrameWriter::new(write, settings.tcp_timeout()),
    )
}

/// Where a broker or resolver can be reached.
///
/// `tls_cert` is the PEM certificate the listener presents; when set, dialers
/// use TLS and trust only that certificate. `domain` overrides the name the
/// certificate is verified against (the host part of `address` otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpEndpoint {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl TcpEndpoint {
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls_cert: None,
            domain: None,
        }
    }

    pub fn with_tls(
        address: impl Into<String>,
        tls_cert: impl Into<String>,
        domain: Option<String>,
    ) -> Self {
        Self {
            address: address.into(),
            tls_cert: Some(tls_cert.into()),
            domain,
        }
    }

    /// The endpoint dialers use to reach a listener at `address` configured
    /// with `tls`. Reads the certificate so it can travel with the endpoint.
    pub fn for_listener(address: impl Into<String>, tls: Option<&TlsSettings>) -> Result<Self> {
        let Some(tls) = tls else {
            return Ok(Self::plain(address));
        };
        let pem = std::fs::read_to_string(&tls.cert_path)?;
        Ok(Self::with_tls(address, pem, tls.domain.clone()))
    }

    /// Two endpoints with the same identity share one pooled connection.
    pub fn identity(&self) -> String {
        format!("{}{}", self.address, self.tls_cert.as_deref().unwrap_or(""))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn host(&self) -> &str {
        match self.address.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => &self.address,
        }
    }

    /// Open a stream to this endpoint, bounded by `timeout` for the TCP
    /// connect and the TLS handshake each.
    pub async fn dial(&self, timeout: Duration) -> Result<BoxedStream> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        tcp.set_nodelay(true)?;

        let Some(pem) = &self.tls_cert else {
            return Ok(Box::new(tcp));
        };
        let connector = tls::connector(pem)?;
        let name = tls::server_name(self.domain.as_deref().unwrap_or(self.host()))?;
        let stream = tokio::time::timeout(timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|err| Error::Tls(err.to_string()))?;
        Ok(Box::new(stream))
    }
}

impl fmt::Display for TcpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tls_cert {
            Some(_) => write!(f, "tls://{}", self.address),
            None => write!(f, "tcp://{}", self.address),
        }
    }
}

/// A TCP listener with optional TLS.
///
/// `accept` returns the raw TCP stream so callers can apply access control
/// before spending a TLS handshake on the peer.
pub struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    pub async fn bind(address: &str, tls_settings: Option<&TlsSettings>) -> Result<Self> {
        let tls = tls_settings.map(tls::acceptor).transpose()?;
        let inner = TcpListener::bind(address).await?;
        Ok(Self { inner, tls })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    /// Accept the next peer that passes the allow and deny lists. Rejected
    /// peers are logged and dropped.
    pub async fn accept_checked(
        &self,
        allow: &AccessControlList,
        deny: &AccessControlList,
    ) -> Result<(TcpStream, SocketAddr)> {
        loop {
            let (stream, peer) = self.accept().await?;
            match access::check(allow, deny, peer.ip()) {
                Ok(()) => return Ok((stream, peer)),
                Err(err) => warn!("Rejected connection: {}", err),
            }
        }
    }

    /// Complete the TLS handshake if this listener uses TLS.
    pub async fn upgrade(&self, stream: TcpStream, timeout: Duration) -> Result<BoxedStream> {
        let Some(acceptor) = &self.tls else {
            return Ok(Box::new(stream));
        };
        let stream = tokio::time::timeout(timeout, acceptor.accept(stream))
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|err| Error::Tls(err.to_string()))?;
        Ok(Box::new(stream))
    }
}
