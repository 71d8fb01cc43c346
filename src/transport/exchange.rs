//! The exchange engine: `exchange(url, method, start, end)` (spec §4.3).
//!
//! Structured as a bounded retry loop with an explicit reason recorded at
//! each restart, replacing the goto-based loop of the C original (spec §9
//! "Redirect control flow via try-again").

use tracing::debug;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::transport::header::{self, Method, ParsedResponse, StatusClass};
use crate::transport::socket::Socket;
use crate::transport::tls::TlsContext;
use crate::url::UrlState;
use crate::util::reset_backoff;

/// Upper bound on restarts per call, independent of `reset_retry_limit`:
/// guards against a pathological server that redirects forever just below
/// [`crate::url::MAX_REDIRECT_DEPTH`] combined with repeated stale-keepalive
/// reconnects. Generous because stale-keepalive reconnects are meant to be
/// unlimited (spec §7 "Recovery policy").
const MAX_RESTARTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    Redirect,
    Reset,
    StaleKeepalive,
}

pub struct ExchangeResult {
    /// Header bytes followed by whatever body bytes arrived in the same read.
    pub buf: Vec<u8>,
    pub parsed: ParsedResponse,
}

/// Drive one logical request/response round trip, transparently following
/// redirects and reconnecting on reset or a stale keepalive socket.
pub async fn exchange(
    socket: &mut Socket,
    url: &mut UrlState,
    tls: &TlsContext,
    method: Method,
    start: u64,
    end: u64,
) -> Result<ExchangeResult> {
    let had_range = end > 0;
    let mut restarts = 0u32;

    loop {
        if restarts > MAX_RESTARTS {
            return Err(Error::Io("exceeded maximum exchange restarts".to_owned()));
        }

        socket.open(url, tls).await?;

        let request = header::build_request(method, &url.host, &url.path, start, end, url.auth.as_deref())?;

        if let Some(reason) = write_step(socket, url, &request).await? {
            restarts += 1;
            debug!(worker = %url.tname, ?reason, "restarting exchange after write");
            continue;
        }

        let mut buf = vec![0u8; header::HEADER_SIZE];
        let n = match read_step(socket, url, &mut buf).await? {
            Ok(n) => n,
            Err(reason) => {
                restarts += 1;
                debug!(worker = %url.tname, ?reason, "restarting exchange after read");
                continue;
            }
        };
        buf.truncate(n);

        let parsed = match header::parse_response(&buf) {
            Ok(parsed) => parsed,
            Err(e) => {
                socket.close(url, true).await?;
                return Err(e);
            }
        };

        match header::classify_status(parsed.status, had_range, parsed.range_capable, parsed.location.clone()) {
            StatusClass::Success => {
                apply_success(url, &parsed)?;
                return Ok(ExchangeResult { buf, parsed });
            }
            StatusClass::NotFound => {
                socket.close(url, true).await?;
                return Err(Error::NotFound);
            }
            StatusClass::Redirect { permanent, location } => {
                if permanent && url.redirect_depth == 0 {
                    url.adopt_permanent_redirect(&location)?;
                } else {
                    url.apply_temporary_redirect(&location)?;
                }
                url.bump_redirect_depth()?;
                socket.close(url, true).await?;
                restarts += 1;
                debug!(worker = %url.tname, reason = ?RetryReason::Redirect, %location, "restarting exchange after redirect");
                continue;
            }
            StatusClass::Fatal => {
                socket.close(url, true).await?;
                return Err(Error::Io(format!("unexpected status {}", parsed.status)));
            }
        }
    }
}

/// `Ok(None)` means the write succeeded; `Ok(Some(reason))` means the
/// caller closed the socket and must restart from the top of the loop.
async fn write_step(socket: &mut Socket, url: &mut UrlState, request: &[u8]) -> Result<Option<RetryReason>> {
    match socket.write_all(url, request).await {
        Ok(()) => Ok(None),
        Err(e) if is_reset(&e) => {
            if url.reset_attempts >= url.reset_retry_limit {
                return Err(Error::Io(format!(
                    "connection reset writing request ({}), retry limit exhausted",
                    e
                )));
            }
            tokio::time::sleep(reset_backoff(url.reset_attempts)).await;
            url.reset_attempts += 1;
            socket.close(url, true).await?;
            Ok(Some(RetryReason::Reset))
        }
        Err(e) if is_stale(&e) => {
            socket.close(url, true).await?;
            Ok(Some(RetryReason::StaleKeepalive))
        }
        Err(e) => Err(e.into()),
    }
}

/// `Ok(Ok(n))` is a successful read of `n` bytes; `Ok(Err(reason))` means
/// the caller closed the socket and must restart.
#[allow(clippy::type_complexity)]
async fn read_step(
    socket: &mut Socket,
    url: &mut UrlState,
    buf: &mut [u8],
) -> Result<std::result::Result<usize, RetryReason>> {
    match socket.read(url, buf).await {
        Ok(0) => {
            // A clean EOF on what we believed was a live keepalive socket:
            // the origin silently dropped it. Reconnect without counting
            // against `reset_retry_limit` (spec §7: unlimited).
            socket.close(url, true).await?;
            Ok(Err(RetryReason::StaleKeepalive))
        }
        Ok(n) => Ok(Ok(n)),
        Err(e) if is_reset(&e) => {
            if url.reset_attempts >= url.reset_retry_limit {
                return Err(Error::Io(format!(
                    "connection reset reading response ({}), retry limit exhausted",
                    e
                )));
            }
            tokio::time::sleep(reset_backoff(url.reset_attempts)).await;
            url.reset_attempts += 1;
            socket.close(url, true).await?;
            Ok(Err(RetryReason::Reset))
        }
        Err(e) if is_stale(&e) => {
            socket.close(url, true).await?;
            Ok(Err(RetryReason::StaleKeepalive))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_reset(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::ConnectionReset
}

fn is_stale(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionAborted
    )
}

/// Apply the per-response metadata and socket-state side effects of a
/// successful exchange (spec §4.2 "Recognised headers", "Post-parse
/// socket state").
fn apply_success(url: &mut UrlState, parsed: &ParsedResponse) -> Result<()> {
    use crate::url::SockState;

    if !url.redirected {
        url.x_md5 = match &parsed.x_md5 {
            Some(hex) => Some(Digest::from_hex(hex)?),
            None => None,
        };
    }

    if let Some(total) = parsed.content_range_total {
        url.file_size = Some(total);
    } else if let Some(len) = parsed.content_length {
        url.file_size = Some(len);
    }
    if parsed.last_modified.is_some() {
        url.last_modified = parsed.last_modified;
    }

    if url.redirected {
        url.sock_state = SockState::Open;
    } else if parsed.range_capable && parsed.content_length.is_some() && !parsed.connection_close {
        url.sock_state = SockState::Keepalive;
    } else {
        url.sock_state = SockState::Open;
    }
    if parsed.connection_close {
        url.sock_state = SockState::Open;
    }

    Ok(())
}
