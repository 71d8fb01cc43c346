//! Socket transport: connect, TLS handshake, timed read/write, keepalive
//! reuse, forced close (spec §4.1).
//!
//! A [`Socket`] is owned by whichever context is driving one request at a
//! time — the exchange engine for a single worker — and travels alongside
//! a `&mut` [`UrlState`]. `UrlState::sock_state` only ever records the
//! socket's *disposition*; the live descriptor/TLS session lives here,
//! matching the invariant documented on [`crate::url::SockState`].

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{Error, Result};
use crate::timeout::WithTimeout;
use crate::transport::tls::TlsContext;
use crate::url::{SockState, UrlState};

pub struct Socket {
    stream: Option<super::io_stream::IoStream>,
}

impl Socket {
    pub fn new() -> Self {
        Socket { stream: None }
    }

    /// If the socket is already a live keepalive connection, return
    /// immediately. Otherwise resolve, connect, and (for `https`) perform
    /// a TLS handshake, all under the URL's receive timeout.
    pub async fn open(&mut self, url: &mut UrlState, tls: &TlsContext) -> Result<()> {
        if url.sock_state == SockState::Keepalive && self.stream.is_some() {
            return Ok(());
        }

        if url.redirected {
            url.redirect_followed = true;
        }

        let timeout = Duration::from_secs(url.timeout_seconds);
        let addr = format!("{}:{}", url.host, url.port);
        debug!(worker = %url.tname, %addr, "opening socket");

        let tcp = TcpStream::connect(&addr)
            .with_timeout(timeout)
            .await
            .map_err(|_| Error::Io(format!("connect to '{}' timed out", addr)))?
            .map_err(|e| Error::Io(format!("connect to '{}' failed: {}", addr, e)))?;
        let _ = tcp.set_nodelay(true);

        let stream = if url.protocol.is_tls() {
            let connector = TlsConnector::from(std::sync::Arc::new(tls.client_config()));
            let dns_name = webpki::DNSNameRef::try_from_ascii_str(&url.host)
                .map_err(|_| Error::InvalidArgument(format!("invalid DNS name '{}'", url.host)))?;
            let tls = connector
                .connect(dns_name, tcp)
                .with_timeout(timeout)
                .await
                .map_err(|_| Error::Io("TLS handshake timed out".to_owned()))?
                .map_err(|e| Error::Io(format!("TLS handshake failed: {}", e)))?;
            super::io_stream::IoStream::from(tls)
        } else {
            super::io_stream::IoStream::from(tcp)
        };

        self.stream = Some(stream);
        url.sock_state = SockState::Open;
        Ok(())
    }

    /// Write the full buffer under the URL's receive timeout. Errors are
    /// returned raw so the exchange engine can classify reset/stale-write
    /// signatures itself (spec §4.3 step 2).
    pub async fn write_all(&mut self, url: &UrlState, buf: &[u8]) -> io::Result<()> {
        let stream = self.require_stream()?;
        stream
            .write_all(buf)
            .with_timeout(Duration::from_secs(url.timeout_seconds))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }

    /// Read up to `buf.len()` bytes under the URL's receive timeout.
    /// Returns `Ok(0)` on a clean EOF, which the exchange engine treats as
    /// a stale keepalive signal.
    pub async fn read(&mut self, url: &UrlState, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.require_stream()?;
        stream
            .read(buf)
            .with_timeout(Duration::from_secs(url.timeout_seconds))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?
    }

    fn require_stream(&mut self) -> io::Result<&mut super::io_stream::IoStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not open"))
    }

    /// Shut the connection down unless it's a keepalive socket being
    /// closed gracefully (spec §4.1 `close`). Returns whether the URL was
    /// reverted to its master because a redirect had been followed —
    /// callers must signal try-again and resend the original request.
    pub async fn close(&mut self, url: &mut UrlState, force: bool) -> Result<bool> {
        if url.sock_state == SockState::Keepalive && !force {
            return Ok(false);
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        url.sock_state = SockState::Closed;

        if url.redirected && url.redirect_followed {
            url.drop_to_master()?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}
