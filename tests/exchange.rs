//! Exercises the exchange engine against an in-process mock origin over a
//! loopback socket: a plain GET, and a temporary redirect followed to a
//! second origin (spec §8 scenarios 1 and 4).

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use httpfs::transport::exchange;
use httpfs::transport::header::Method;
use httpfs::transport::socket::Socket;
use httpfs::transport::tls::TlsContext;
use httpfs::url::UrlState;

/// Bind a loopback listener that accepts exactly one connection, reads
/// whatever the client sends, and replies with `response`.
async fn mock_origin(response: String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn simple_get_returns_body() {
    let body = "hello world";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let addr = mock_origin(response).await;

    let mut url = UrlState::new(&format!("http://{}/file", addr), "t0", 5, 1).unwrap();
    let tls = TlsContext::new(false, false, Vec::new());
    let mut socket = Socket::new();

    let result = exchange::exchange(&mut socket, &mut url, &tls, Method::Get, 0, 0)
        .await
        .unwrap();

    assert_eq!(result.parsed.status, 200);
    let body_bytes = &result.buf[result.parsed.body_offset..];
    assert_eq!(body_bytes, body.as_bytes());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_maps_to_not_found_error() {
    let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned();
    let addr = mock_origin(response).await;

    let mut url = UrlState::new(&format!("http://{}/missing", addr), "t0", 5, 1).unwrap();
    let tls = TlsContext::new(false, false, Vec::new());
    let mut socket = Socket::new();

    let err = exchange::exchange(&mut socket, &mut url, &tls, Method::Get, 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, httpfs::error::Error::NotFound));
}

#[tokio::test(flavor = "multi_thread")]
async fn temporary_redirect_points_at_mirror_without_touching_master() {
    let mirror_body = "mirrored bytes";
    let mirror_response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n{}",
        mirror_body.len(),
        mirror_body
    );
    let mirror_addr = mock_origin(mirror_response).await;

    let redirect_response = format!(
        "HTTP/1.1 302 Found\r\nLocation: http://{}/mirrored\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        mirror_addr
    );
    let master_addr = mock_origin(redirect_response).await;

    let master_raw = format!("http://{}/file", master_addr);
    let mut url = UrlState::new(&master_raw, "t0", 5, 1).unwrap();
    let tls = TlsContext::new(false, false, Vec::new());
    let mut socket = Socket::new();

    let result = exchange::exchange(&mut socket, &mut url, &tls, Method::Get, 0, 0)
        .await
        .unwrap();

    assert_eq!(result.parsed.status, 200);
    assert!(url.redirected);
    assert_eq!(url.host, mirror_addr.ip().to_string());
    assert_eq!(url.master_raw(), master_raw);
}
