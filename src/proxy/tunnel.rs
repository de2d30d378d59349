//! CONNECT tunnel implementation for HTTPS proxying
//!
//! Handles the upstream CONNECT handshake and the bidirectional splice once the
//! inbound connection has been upgraded.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::{GatewayError, Result};
use crate::models::{format_tcp_addr, Proxy, ProxyScheme};
use crate::proxy::transport::{ProxyConnection, TransportFactory};

/// Largest CONNECT response header accepted from an upstream
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Status line and headers of an upstream CONNECT response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Reason phrase as sent upstream, e.g. `Connection established`
    pub reason: Option<Bytes>,
    pub headers: HeaderMap,
    /// Bytes that arrived after the blank line
    pub leftover: Bytes,
}

impl ResponseHead {
    fn established() -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            leftover: Bytes::new(),
        }
    }
}

/// Read a response header up to and including the blank line
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        buf.reserve(1024);
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(GatewayError::ConnectFailed(
                "upstream closed before sending a response header".into(),
            ));
        }

        let mut raw_headers = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut raw_headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let status = response
                    .code
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .ok_or_else(|| GatewayError::ConnectFailed("invalid status code".into()))?;

                let mut headers = HeaderMap::new();
                for header in response.headers.iter() {
                    if let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(header.name.as_bytes()),
                        HeaderValue::from_bytes(header.value),
                    ) {
                        headers.append(name, value);
                    }
                }

                let reason = response
                    .reason
                    .filter(|reason| !reason.is_empty())
                    .map(|reason| Bytes::copy_from_slice(reason.as_bytes()));

                let leftover = buf.split_off(len).freeze();
                return Ok(ResponseHead {
                    status,
                    reason,
                    headers,
                    leftover,
                });
            }
            Ok(httparse::Status::Partial) if buf.len() >= MAX_HEAD_SIZE => {
                return Err(GatewayError::ConnectFailed(format!(
                    "response header exceeds {} bytes",
                    MAX_HEAD_SIZE
                )));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => {
                return Err(GatewayError::ConnectFailed(format!(
                    "malformed response header: {}",
                    e
                )));
            }
        }
    }
}

/// Handles CONNECT tunnel requests
pub struct TunnelHandler;

impl TunnelHandler {
    /// Open a tunnel to `host:port` through `proxy`.
    ///
    /// Plain HTTP proxies get a literal CONNECT on a raw TCP connection to the
    /// proxy's own endpoint and their response header is returned as-is. Other
    /// schemes connect through their transport and report `200`.
    #[instrument(skip(proxy), fields(proxy = %proxy.uri()))]
    pub async fn open(
        proxy: &Proxy,
        host: &str,
        port: u16,
    ) -> Result<(Box<dyn ProxyConnection>, ResponseHead)> {
        if proxy.scheme() == ProxyScheme::Http {
            return Self::open_literal(proxy, host, port).await;
        }

        let strategy = TransportFactory::build(proxy.url())?;
        let conn = strategy.connect(host, port).await?;
        Ok((conn, ResponseHead::established()))
    }

    async fn open_literal(
        proxy: &Proxy,
        host: &str,
        port: u16,
    ) -> Result<(Box<dyn ProxyConnection>, ResponseHead)> {
        let mut stream = tokio::net::TcpStream::connect(proxy.addr())
            .await
            .map_err(|e| {
                GatewayError::ProxyConnectionFailed(format!("dial {}: {}", proxy.addr(), e))
            })?;

        let authority = format_tcp_addr(host, port);
        let request = format!(
            "CONNECT {0} HTTP/1.1\r\nConnection: close\r\nHost: {0}\r\n\r\n",
            authority
        );
        stream.write_all(request.as_bytes()).await?;

        let head = read_response_head(&mut stream).await?;
        debug!(status = %head.status, "upstream CONNECT answered");
        Ok((Box::new(stream), head))
    }

    /// Splice two connections until either direction finishes or `deadline` passes.
    ///
    /// Returns the bytes copied client to server and server to client.
    pub async fn splice<C, S>(client: C, server: S, deadline: Instant) -> (u64, u64)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let (done_tx, done_rx) = watch::channel(false);
        let sent = AtomicU64::new(0);
        let received = AtomicU64::new(0);

        let copies = async {
            tokio::join!(
                pipe(
                    &mut client_read,
                    &mut server_write,
                    &sent,
                    done_tx.clone(),
                    done_rx.clone()
                ),
                pipe(
                    &mut server_read,
                    &mut client_write,
                    &received,
                    done_tx.clone(),
                    done_rx.clone()
                ),
            )
        };

        match tokio::time::timeout_at(deadline, copies).await {
            Ok((upstream, downstream)) => {
                if let Err(e) = upstream {
                    debug!("client to server copy ended: {}", e);
                }
                if let Err(e) = downstream {
                    debug!("server to client copy ended: {}", e);
                }
            }
            Err(_) => debug!("tunnel deadline reached"),
        }

        let (sent, received) = (sent.into_inner(), received.into_inner());
        debug!(bytes_sent = sent, bytes_received = received, "tunnel closed");
        (sent, received)
    }
}

// One copy direction. Finishing (EOF, error or the peer direction finishing)
// shuts down the writer and tells the other direction to stop.
async fn pipe<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &AtomicU64,
    done_tx: watch::Sender<bool>,
    mut done_rx: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];

    let result = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = writer.write_all(&buf[..n]).await {
                        break Err(e);
                    }
                    copied.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => break Err(e),
            },
            _ = done_rx.changed() => break Ok(()),
        }
    };

    let _ = writer.shutdown().await;
    let _ = done_tx.send(true);
    result
}
