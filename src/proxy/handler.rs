//! Proxy request handler with retry logic
//!
//! Relays absolute-URI requests through the pool, one upstream per attempt,
//! and opens raw tunnels for CONNECT.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, PROXY_AUTHORIZATION,
};
use hyper::ext::ReasonPhrase;
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use super::body::{self, MeteredBody, ProxyBody};
use super::pool::PoolManager;
use super::request_log::RequestLog;
use super::rotation::ProxySelector;
use super::transport::{parse_authority, TransportFactory};
use super::tunnel::{ResponseHead, TunnelHandler};
use crate::config::{parse_status_list, ProxyServerConfig};
use crate::error::GatewayError;
use crate::models::UsageOutcome;

/// Retry count requested by the client, bounded by the server ceiling
pub const HEADER_RETRY: &str = "x-pool-retry";
/// Comma-separated upstream status codes the client accepts
pub const HEADER_STATUS_OK: &str = "x-pool-status-ok";
pub const HEADER_ATTEMPT: &str = "x-pool-attempt";
pub const HEADER_ID: &str = "x-pool-id";

const CONTROL_PREFIX: &str = "x-pool-";
const PROXY_PREFIX: &str = "proxy-";

/// Status written when no attempt produced an acceptable response
pub const FAILURE_STATUS: u16 = 550;

/// Configuration for proxy handler
#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    /// Retries when the client does not ask for a count
    pub retry: u32,
    /// Highest retry count a client may ask for
    pub retry_max: u32,
    /// Upstream statuses that fail the attempt
    pub wrong_status: BTreeSet<u16>,
    /// Per-attempt timeout, and the absolute lifetime of a tunnel
    pub timeout: Duration,
}

impl ProxyHandlerConfig {
    pub fn from_config(config: &ProxyServerConfig) -> Self {
        Self {
            retry: config.retry,
            retry_max: config.retry_max,
            wrong_status: config.wrong_status.clone(),
            timeout: config.timeout(),
        }
    }

    /// Attempts for one request; an override outside `0..=retry_max` is ignored
    pub fn max_attempts(&self, headers: &HeaderMap) -> u32 {
        headers
            .get(HEADER_RETRY)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|retry| *retry <= self.retry_max)
            .unwrap_or(self.retry)
            .saturating_add(1)
    }
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            retry: 0,
            retry_max: 0,
            wrong_status: BTreeSet::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Proxy request handler
pub struct ProxyHandler {
    pool: Arc<PoolManager>,
    selector: Arc<dyn ProxySelector>,
    config: ProxyHandlerConfig,
}

impl ProxyHandler {
    pub fn new(
        pool: Arc<PoolManager>,
        selector: Arc<dyn ProxySelector>,
        config: ProxyHandlerConfig,
    ) -> Self {
        Self {
            pool,
            selector,
            config,
        }
    }

    /// Handle an incoming proxy request
    ///
    /// Every outcome is a response; faults are absorbed into the retry loop
    /// or mapped to the failure status.
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>, client: SocketAddr) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let identity = client_identity(req.headers(), client);
        let mut log = RequestLog::new(
            id.clone(),
            req.method().clone(),
            req.uri().to_string(),
            client.to_string(),
        );
        log.add(format!("identity:{}", identity));

        if req.method() == Method::CONNECT {
            return self.handle_connect(req, &identity, id, log).await;
        }

        self.handle_http(req, &identity, id, log).await
    }

    /// Handle HTTP CONNECT request (HTTPS tunneling)
    async fn handle_connect<B>(
        &self,
        req: Request<B>,
        identity: &str,
        id: String,
        mut log: RequestLog,
    ) -> Response<ProxyBody> {
        if req.extensions().get::<OnUpgrade>().is_none() {
            error!("connection cannot be hijacked, CONNECT unavailable");
            log.add("hijack unsupported");
            return plain_response(StatusCode::BAD_GATEWAY, "CONNECT not supported", &id, 1, 1);
        }

        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| req.uri().to_string());
        let (host, port) = match parse_authority(&authority) {
            Ok(target) => target,
            Err(e) => {
                log.add(format!("bad_target:{}", e));
                return plain_response(StatusCode::BAD_REQUEST, &e.to_string(), &id, 1, 1);
            }
        };

        let proxy = match self.selector.select(identity).await {
            Ok(proxy) => proxy,
            Err(e) => {
                log.add(e.to_string());
                return plain_response(StatusCode::BAD_GATEWAY, &e.to_string(), &id, 1, 1);
            }
        };
        log.add(format!("proxy:{} used:{}", proxy.uri(), proxy.used()));

        let deadline = Instant::now() + self.config.timeout;
        let opened = tokio::time::timeout_at(deadline, TunnelHandler::open(&proxy, &host, port)).await;
        let (server, head) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                self.pool.mark_status(&proxy, UsageOutcome::Failed);
                warn!(proxy = %proxy.uri(), "CONNECT to {} failed: {}", authority, e);
                log.add(format!("connect_err:{}", e));
                return plain_response(StatusCode::BAD_GATEWAY, &e.to_string(), &id, 1, 1);
            }
            Err(_) => {
                self.pool.mark_status(&proxy, UsageOutcome::Failed);
                warn!(proxy = %proxy.uri(), "CONNECT to {} timed out", authority);
                log.add("connect_err:timeout");
                return plain_response(StatusCode::BAD_GATEWAY, "CONNECT timed out", &id, 1, 1);
            }
        };
        log.add(format!("connect_status:{}", head.status.as_u16()));

        if !head.status.is_success() {
            // Replay the refusal; nothing gets hijacked.
            self.pool.mark_status(&proxy, UsageOutcome::Failed);
            return replay_head(head, &id, true);
        }
        self.pool.mark_status(&proxy, UsageOutcome::Success);

        let on_upgrade = hyper::upgrade::on(req);
        let leftover = head.leftover.clone();
        tokio::spawn(async move {
            let mut log = log;
            match on_upgrade.await {
                Ok(upgraded) => {
                    let mut client = TokioIo::new(upgraded);
                    if !leftover.is_empty() {
                        if let Err(e) = client.write_all(&leftover).await {
                            log.add(format!("tunnel_err:{}", e));
                            return;
                        }
                    }
                    let (sent, received) = TunnelHandler::splice(client, server, deadline).await;
                    log.add(format!("tunnel sent:{} received:{}", sent, received));
                }
                Err(e) => {
                    let e = GatewayError::UpgradeFailed(e.to_string());
                    debug!("{}", e);
                    log.add(format!("upgrade_err:{}", e));
                }
            }
        });

        replay_head(head, &id, false)
    }

    /// Handle regular HTTP request
    async fn handle_http<B>(
        &self,
        req: Request<B>,
        identity: &str,
        id: String,
        mut log: RequestLog,
    ) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts(req.headers());
        let allowed = req
            .headers()
            .get(HEADER_STATUS_OK)
            .and_then(|v| v.to_str().ok())
            .map(parse_status_list)
            .unwrap_or_default();

        let (mut parts, body) = req.into_parts();
        strip_request_headers(&mut parts.headers);

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                log.add(format!("req_body_err:{}", e));
                return plain_response(
                    StatusCode::BAD_REQUEST,
                    &format!("failed to read request body: {}", e),
                    &id,
                    1,
                    max_attempts,
                );
            }
        };

        let mut attempt = 0;
        let mut retained = None;
        while attempt < max_attempts {
            attempt += 1;
            log.add(format!("try:{}/{}", attempt, max_attempts));

            let proxy = match self.selector.select(identity).await {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!("No proxy available: {}", e);
                    log.add(e.to_string());
                    break;
                }
            };
            log.add(format!("proxy:{} used:{}", proxy.uri(), proxy.used()));

            let strategy = match TransportFactory::build(proxy.url()) {
                Ok(strategy) => strategy,
                Err(e) => {
                    // Local fault; the proxy is not to blame.
                    log.add(format!("build_err:{}", e));
                    continue;
                }
            };

            let mut upstream_req = Request::new(Full::new(body.clone()));
            *upstream_req.method_mut() = parts.method.clone();
            *upstream_req.uri_mut() = parts.uri.clone();
            *upstream_req.headers_mut() = parts.headers.clone();

            let started = Instant::now();
            let response = match strategy.send(upstream_req, self.config.timeout).await {
                Ok(response) => response,
                Err(e) => {
                    self.pool.mark_status(&proxy, UsageOutcome::Failed);
                    debug!(proxy = %proxy.uri(), "attempt {}/{} failed: {}", attempt, max_attempts, e);
                    log.add(format!("err:{}", e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            log.add(format!("status:{}", status));
            if self.config.wrong_status.contains(&status) {
                self.pool.mark_status(&proxy, UsageOutcome::Failed);
                debug!(proxy = %proxy.uri(), "{}", GatewayError::StatusRejected { status });
                log.add("wrong_status");
                continue;
            }
            if !allowed.is_empty() && !allowed.contains(&status) {
                self.pool.mark_status(&proxy, UsageOutcome::Failed);
                log.add("status_not_allowed");
                continue;
            }

            self.pool.mark_status(&proxy, UsageOutcome::Success);
            retained = Some((response, started));
            break;
        }

        let Some((response, started)) = retained else {
            let attempt = attempt.max(1);
            warn!("{}", GatewayError::AllAttemptsFailed { attempts: attempt });
            return plain_response(
                failure_status(),
                &format!("all failed, try:{}", attempt),
                &id,
                attempt,
                max_attempts,
            );
        };

        let (upstream, incoming) = response.into_parts();
        let deadline = started + self.config.timeout;
        let mut response = Response::new(MeteredBody::new(incoming, deadline, log).boxed_unsync());
        *response.status_mut() = upstream.status;
        copy_response_headers(&upstream.headers, response.headers_mut());
        set_pool_headers(response.headers_mut(), &id, attempt, max_attempts);
        response
    }
}

/// Selector identity: the Basic `Proxy-Authorization` username, else the client IP
pub fn client_identity(headers: &HeaderMap, client: SocketAddr) -> String {
    headers
        .get(PROXY_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, credentials) = v.trim().split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("basic")
                .then(|| credentials.trim())
        })
        .and_then(|credentials| BASE64.decode(credentials).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|pair| pair.split(':').next().map(str::to_string))
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| client.ip().to_string())
}

/// Drop hop-by-hop, proxy and control headers before forwarding
pub fn strip_request_headers(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            is_hop_by_hop_header(name)
                || name.starts_with(CONTROL_PREFIX)
                || name.starts_with(PROXY_PREFIX)
        })
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(name);
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "te" | "trailers" | "transfer-encoding" | "upgrade"
    )
}

fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        let skip = name == CONTENT_LENGTH
            || name.as_str() == "connection"
            || name.as_str().starts_with(PROXY_PREFIX);
        if !skip {
            to.append(name, value.clone());
        }
    }
}

fn set_pool_headers(headers: &mut HeaderMap, id: &str, attempt: u32, max_attempts: u32) {
    if let Ok(value) = HeaderValue::from_str(&format!("{}/{}", attempt, max_attempts)) {
        headers.insert(HEADER_ATTEMPT, value);
    }
    if let Ok(value) = HeaderValue::from_str(id) {
        headers.insert(HEADER_ID, value);
    }
}

fn failure_status() -> StatusCode {
    StatusCode::from_u16(FAILURE_STATUS).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Create a plaintext response
fn plain_response(
    status: StatusCode,
    message: &str,
    id: &str,
    attempt: u32,
    max_attempts: u32,
) -> Response<ProxyBody> {
    let mut response = Response::new(body::full(message.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    set_pool_headers(response.headers_mut(), id, attempt, max_attempts);
    response
}

/// Write the upstream CONNECT response head back to the client.
///
/// Bytes read past the head travel as the body of a refusal; on success they
/// are written into the tunnel instead.
fn replay_head(head: ResponseHead, id: &str, with_leftover: bool) -> Response<ProxyBody> {
    let body = if with_leftover {
        body::full(head.leftover.clone())
    } else {
        body::empty()
    };
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    if let Some(reason) = head.reason.and_then(|r| ReasonPhrase::try_from(r).ok()) {
        response.extensions_mut().insert(reason);
    }
    for (name, value) in &head.headers {
        if name != CONTENT_LENGTH && name.as_str() != "transfer-encoding" {
            response.headers_mut().append(name, value.clone());
        }
    }
    set_pool_headers(response.headers_mut(), id, 1, 1);
    response
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use super::*;
    use crate::models::Proxy;
    use crate::proxy::rotation::RoundRobinSelector;
    use crate::repository::pool_store::tests::temp_dir;
    use crate::repository::PoolStore;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const CLIENT: &str = "192.0.2.7:40000";

    /// Fake HTTP proxy answering every request with `status` and `body`;
    /// forwards each received request head on `heads`.
    async fn serve(listener: TcpListener, status: &'static str, body: &'static str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nX-Upstream: yes\r\nProxy-Agent: fake\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        rx
    }

    /// Bind `n` listeners and return them ordered by their proxy URI
    async fn listeners(n: usize) -> Vec<(String, TcpListener)> {
        let mut bound = Vec::new();
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            bound.push((format!("http://{}", listener.local_addr().unwrap()), listener));
        }
        bound.sort_by(|a, b| a.0.cmp(&b.0));
        bound
    }

    fn handler(uris: &[String], config: ProxyHandlerConfig) -> (Arc<PoolManager>, ProxyHandler) {
        let pool = Arc::new(PoolManager::new(PoolStore::new(temp_dir("handler"))));
        for uri in uris {
            pool.add(uri).unwrap();
            pool.activate(uri);
        }
        let selector = Arc::new(RoundRobinSelector::new(pool.clone()));
        (pool.clone(), ProxyHandler::new(pool, selector, config))
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("host", "origin.test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn proxy(pool: &PoolManager, uri: &str) -> Arc<Proxy> {
        pool.get(uri).unwrap()
    }

    #[test]
    fn test_max_attempts() {
        let config = ProxyHandlerConfig {
            retry: 1,
            retry_max: 3,
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        assert_eq!(config.max_attempts(&headers), 2);

        headers.insert(HEADER_RETRY, HeaderValue::from_static("3"));
        assert_eq!(config.max_attempts(&headers), 4);

        headers.insert(HEADER_RETRY, HeaderValue::from_static("0"));
        assert_eq!(config.max_attempts(&headers), 1);

        // above the ceiling falls back to the server default
        headers.insert(HEADER_RETRY, HeaderValue::from_static("4"));
        assert_eq!(config.max_attempts(&headers), 2);
    }

    #[test]
    fn test_strip_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic eDp5"));
        headers.insert("x-pool-retry", HeaderValue::from_static("2"));
        headers.insert("x-pool-anything", HeaderValue::from_static("1"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        strip_request_headers(&mut headers);

        let mut left: Vec<_> = headers.keys().map(|k| k.as_str().to_string()).collect();
        left.sort();
        assert_eq!(left, vec!["accept", "x-forwarded-for"]);
    }

    #[test]
    fn test_client_identity() {
        let client: SocketAddr = CLIENT.parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, client), "192.0.2.7");

        // "alice:secret"
        headers.insert(
            PROXY_AUTHORIZATION,
            HeaderValue::from_static("Basic YWxpY2U6c2VjcmV0"),
        );
        assert_eq!(client_identity(&headers, client), "alice");

        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        assert_eq!(client_identity(&headers, client), "192.0.2.7");
    }

    #[tokio::test]
    async fn test_retry_past_denied_status() {
        let mut bound = listeners(2).await;
        let (good_uri, good) = bound.pop().unwrap();
        let (bad_uri, bad) = bound.pop().unwrap();
        let mut bad_heads = serve(bad, "503 Service Unavailable", "busy").await;
        let mut good_heads = serve(good, "200 OK", "hello").await;

        let (pool, handler) = handler(
            &[bad_uri.clone(), good_uri.clone()],
            ProxyHandlerConfig {
                retry: 1,
                wrong_status: [503].into_iter().collect(),
                ..Default::default()
            },
        );

        let mut req = get("http://origin.test/page");
        req.headers_mut()
            .insert("x-pool-anything", HeaderValue::from_static("secret"));
        let response = handler.handle(req, CLIENT.parse().unwrap()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_ATTEMPT], "2/2");
        assert_eq!(response.headers()[HEADER_ID].len(), 32);
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        assert!(response.headers().get("proxy-agent").is_none());
        assert_eq!(body_text(response).await, "hello");

        let head = bad_heads.recv().await.unwrap();
        assert!(head.starts_with("GET http://origin.test/page HTTP/1.1"));
        assert!(!head.to_ascii_lowercase().contains("x-pool-"));
        assert!(good_heads.recv().await.is_some());

        let bad = proxy(&pool, &bad_uri).count().snapshot();
        assert_eq!((bad.success, bad.failed), (0, 1));
        let good = proxy(&pool, &good_uri).count().snapshot();
        assert_eq!((good.success, good.failed), (1, 0));
    }

    #[tokio::test]
    async fn test_empty_pool_fails_immediately() {
        let (_pool, handler) = handler(
            &[],
            ProxyHandlerConfig {
                retry: 2,
                ..Default::default()
            },
        );

        let response = handler
            .handle(get("http://origin.test/"), CLIENT.parse().unwrap())
            .await;

        assert_eq!(response.status().as_u16(), FAILURE_STATUS);
        assert_eq!(response.headers()[HEADER_ATTEMPT], "1/3");
        assert!(body_text(response).await.contains("all failed, try:1"));
    }

    #[tokio::test]
    async fn test_attempts_use_distinct_proxies() {
        let bound = listeners(3).await;
        let uris: Vec<String> = bound.iter().map(|(uri, _)| uri.clone()).collect();
        let mut heads = Vec::new();
        for (_, listener) in bound {
            heads.push(serve(listener, "503 Service Unavailable", "busy").await);
        }

        let (pool, handler) = handler(
            &uris,
            ProxyHandlerConfig {
                retry: 2,
                wrong_status: [503].into_iter().collect(),
                ..Default::default()
            },
        );

        let response = handler
            .handle(get("http://origin.test/"), CLIENT.parse().unwrap())
            .await;

        assert_eq!(response.status().as_u16(), FAILURE_STATUS);
        assert_eq!(response.headers()[HEADER_ATTEMPT], "3/3");
        assert_eq!(body_text(response).await, "all failed, try:3");
        for (uri, rx) in uris.iter().zip(heads.iter_mut()) {
            assert!(rx.try_recv().is_ok(), "{} was not tried", uri);
            assert_eq!(proxy(&pool, uri).count().snapshot().failed, 1);
        }
        assert_eq!(pool.count().snapshot().failed, 3);
    }

    #[tokio::test]
    async fn test_status_allow_list() {
        let mut bound = listeners(1).await;
        let (uri, listener) = bound.pop().unwrap();
        let _heads = serve(listener, "404 Not Found", "missing").await;
        let (_pool, handler) = handler(&[uri], ProxyHandlerConfig::default());

        let mut req = get("http://origin.test/");
        req.headers_mut()
            .insert(HEADER_STATUS_OK, HeaderValue::from_static("200,204"));
        let response = handler.handle(req, CLIENT.parse().unwrap()).await;
        assert_eq!(response.status().as_u16(), FAILURE_STATUS);

        let response = handler
            .handle(get("http://origin.test/"), CLIENT.parse().unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "missing");
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_marked_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let (pool, handler) = handler(&[uri.clone()], ProxyHandlerConfig::default());
        let response = handler
            .handle(get("http://origin.test/"), CLIENT.parse().unwrap())
            .await;

        assert_eq!(response.status().as_u16(), FAILURE_STATUS);
        assert_eq!(response.headers()[HEADER_ATTEMPT], "1/1");
        assert_eq!(proxy(&pool, &uri).count().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_connect_without_upgrade_support() {
        let (_pool, handler) = handler(&[], ProxyHandlerConfig::default());
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = handler.handle(req, CLIENT.parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
