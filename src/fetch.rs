//! The fetch orchestrator: cache lookup, network GET, digest
//! verification, cache insert (spec §4.6).

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::RangeCache;
use crate::digest::Hasher;
use crate::error::{Error, Result};
use crate::transport::exchange;
use crate::transport::header::Method;
use crate::transport::socket::Socket;
use crate::transport::tls::TlsContext;
use crate::url::UrlState;

/// Read bytes in worker-sized chunks once the header's own prefix is
/// exhausted (spec §4.6 step 4 "loop `read_client_socket`").
const READ_CHUNK: usize = 16 * 1024;

pub struct Fetcher {
    cache: Option<Arc<Mutex<RangeCache>>>,
    tls: Arc<TlsContext>,
}

impl Fetcher {
    pub fn new(cache: Option<Arc<Mutex<RangeCache>>>, tls: Arc<TlsContext>) -> Self {
        Fetcher { cache, tls }
    }

    /// `get_data(url, start, rsize) -> bytes_read`.
    pub async fn get_data(
        &self,
        socket: &mut Socket,
        url: &mut UrlState,
        start: u64,
        rsize: u64,
    ) -> Result<Vec<u8>> {
        if rsize == 0 {
            return Ok(Vec::new());
        }

        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().await;
            if let Some(bytes) = guard.lookup(start, rsize)? {
                return Ok(bytes);
            }
        }

        let mut attempt = 0u32;
        loop {
            let (declared_len, body, computed) = self.fetch_once(socket, url, start, rsize).await?;
            let _ = declared_len;
            let digest_ok = match url.x_md5 {
                Some(declared) => declared == computed,
                None => true,
            };

            if !digest_ok && attempt == 0 {
                attempt += 1;
                warn!(worker = %url.tname, %start, %rsize, "digest mismatch, retrying fetch");
                socket.close(url, true).await?;
                continue;
            }
            if !digest_ok {
                warn!(
                    worker = %url.tname, %start, %rsize,
                    "digest mismatch persisted after retry"
                );
                socket.close(url, false).await?;
                return Err(Error::Io(format!(
                    "digest mismatch persisted after retry for range {}+{}",
                    start, rsize
                )));
            }

            socket.close(url, false).await?;
            if let Some(cache) = &self.cache {
                let mut guard = cache.lock().await;
                guard.insert(start, computed, &body)?;
            }
            return Ok(body);
        }
    }

    /// One network attempt: exchange, then read the effective-size body,
    /// hashing as it streams in. Returns `(declared_content_length, body, digest)`.
    async fn fetch_once(
        &self,
        socket: &mut Socket,
        url: &mut UrlState,
        start: u64,
        rsize: u64,
    ) -> Result<(u64, Vec<u8>, crate::digest::Digest)> {
        let result = exchange::exchange(
            socket,
            url,
            &self.tls,
            Method::Get,
            start,
            start + rsize - 1,
        )
        .await?;

        let declared_len = result
            .parsed
            .content_length
            .ok_or_else(|| Error::Io("response missing Content-Length".to_owned()))?;
        if declared_len == 0 {
            return Err(Error::Io("zero-length response body".to_owned()));
        }
        if declared_len != rsize {
            warn!(worker = %url.tname, declared_len, rsize, "content-length does not match requested size");
        }
        let effective = declared_len.min(rsize) as usize;

        let mut hasher = Hasher::new();
        let mut collected = Vec::with_capacity(effective);

        let prefix = &result.buf[result.parsed.body_offset..];
        let take = prefix.len().min(effective);
        collected.extend_from_slice(&prefix[..take]);
        hasher.update(&prefix[..take]);

        while collected.len() < effective {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = socket.read(url, &mut buf).await.map_err(Error::from)?;
            if n == 0 {
                break;
            }
            let remaining = effective - collected.len();
            let take = n.min(remaining);
            collected.extend_from_slice(&buf[..take]);
            hasher.update(&buf[..take]);
        }

        let computed = hasher.finalize();
        Ok((declared_len, collected, computed))
    }
}
