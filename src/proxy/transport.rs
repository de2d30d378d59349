//! Transport factory for upstream proxies
//!
//! Every supported URI scheme maps to one [`ConnectionStrategy`] through a fixed
//! lookup table. A strategy knows how to open a byte stream to a target through
//! its proxy and how to send one HTTP request over that stream.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context as _;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, PROXY_AUTHORIZATION};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use shadowsocks::{
    config::{ServerConfig, ServerType},
    context::{Context as SsContext, SharedContext},
    crypto::CipherKind,
    relay::{socks5::Address as SsAddress, tcprelay::ProxyClientStream},
    ServerAddr,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::{socks4::Socks4Stream, Socks5Stream};
use tracing::{debug, instrument, warn};
use url::Url;

use super::tunnel::read_response_head;
use crate::error::{GatewayError, Result};
use crate::models::format_tcp_addr;

/// A bidirectional byte stream to a target, opened through a proxy
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// The wire protocol spoken with an upstream proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Http,
    Socks4,
    Socks4a,
    Socks5,
    Shadowsocks,
}

const STRATEGY_TABLE: &[(&str, StrategyKind)] = &[
    ("http", StrategyKind::Http),
    ("https", StrategyKind::Http),
    ("socks4", StrategyKind::Socks4),
    ("socks4a", StrategyKind::Socks4a),
    ("socks5", StrategyKind::Socks5),
    ("ss", StrategyKind::Shadowsocks),
];

/// Builds connection strategies from proxy URLs
pub struct TransportFactory;

impl TransportFactory {
    pub fn kind_for(scheme: &str) -> Option<StrategyKind> {
        let scheme = scheme.to_ascii_lowercase();
        STRATEGY_TABLE
            .iter()
            .find(|(name, _)| *name == scheme)
            .map(|(_, kind)| *kind)
    }

    /// Build the strategy for a proxy URL; unknown schemes fail, never fall back to direct
    pub fn build(proxy_url: &Url) -> Result<ConnectionStrategy> {
        let kind = Self::kind_for(proxy_url.scheme())
            .ok_or_else(|| GatewayError::UnsupportedScheme(proxy_url.scheme().to_string()))?;

        let host = url_host(proxy_url)?;
        let port = proxy_url.port_or_known_default().unwrap_or(1080);
        let (username, password) = userinfo(proxy_url);

        let strategy = match kind {
            StrategyKind::Http => ConnectionStrategy::Http(HttpProxy {
                addr: format_tcp_addr(&host, port),
                tls: proxy_url.scheme().eq_ignore_ascii_case("https"),
                authorization: basic_auth(username.as_deref(), password.as_deref())?,
                host,
            }),
            StrategyKind::Socks4 | StrategyKind::Socks4a | StrategyKind::Socks5 => {
                let socks = SocksProxy {
                    addr: format_tcp_addr(&host, port),
                    username,
                    password,
                };
                match kind {
                    StrategyKind::Socks4 => ConnectionStrategy::Socks4(socks),
                    StrategyKind::Socks4a => ConnectionStrategy::Socks4a(socks),
                    _ => ConnectionStrategy::Socks5(socks),
                }
            }
            StrategyKind::Shadowsocks => {
                ConnectionStrategy::Shadowsocks(ShadowsocksProxy::new(&host, port, proxy_url)?)
            }
        };

        Ok(strategy)
    }
}

/// A closed set of ways to reach a target through an upstream proxy
#[derive(Debug, Clone)]
pub enum ConnectionStrategy {
    Http(HttpProxy),
    Socks4(SocksProxy),
    Socks4a(SocksProxy),
    Socks5(SocksProxy),
    Shadowsocks(ShadowsocksProxy),
}

#[derive(Debug, Clone)]
pub struct HttpProxy {
    addr: String,
    host: String,
    tls: bool,
    authorization: Option<HeaderValue>,
}

#[derive(Debug, Clone)]
pub struct SocksProxy {
    addr: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Clone)]
pub struct ShadowsocksProxy {
    context: SharedContext,
    server: ServerConfig,
}

impl std::fmt::Debug for ShadowsocksProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowsocksProxy")
            .field("server", &self.server.addr().to_string())
            .field("method", &self.server.method())
            .finish_non_exhaustive()
    }
}

impl ShadowsocksProxy {
    fn new(host: &str, port: u16, proxy_url: &Url) -> Result<Self> {
        let (method, password) = shadowsocks_userinfo(proxy_url)?;
        let cipher: CipherKind = method.parse().map_err(|_| {
            GatewayError::InvalidProxyUri(format!("unknown shadowsocks cipher: {}", method))
        })?;

        let addr = match host.parse::<IpAddr>() {
            Ok(ip) => ServerAddr::SocketAddr(SocketAddr::new(ip, port)),
            Err(_) => ServerAddr::DomainName(host.to_string(), port),
        };
        let server = ServerConfig::new(addr, password, cipher)
            .map_err(|e| GatewayError::InvalidProxyUri(format!("shadowsocks config: {}", e)))?;

        Ok(Self {
            context: SsContext::new_shared(ServerType::Local),
            server,
        })
    }
}

impl ConnectionStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ConnectionStrategy::Http(_) => StrategyKind::Http,
            ConnectionStrategy::Socks4(_) => StrategyKind::Socks4,
            ConnectionStrategy::Socks4a(_) => StrategyKind::Socks4a,
            ConnectionStrategy::Socks5(_) => StrategyKind::Socks5,
            ConnectionStrategy::Shadowsocks(_) => StrategyKind::Shadowsocks,
        }
    }

    /// Open a stream to `host:port` through this proxy
    #[instrument(skip(self), fields(kind = ?self.kind()))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        let conn: Box<dyn ProxyConnection> = match self {
            ConnectionStrategy::Http(http) => http.connect(host, port).await?,
            ConnectionStrategy::Socks4(socks) => Box::new(
                socks
                    .connect_socks4(host, port, true)
                    .await
                    .map_err(|e| failed("socks4", e))?,
            ),
            ConnectionStrategy::Socks4a(socks) => Box::new(
                socks
                    .connect_socks4(host, port, false)
                    .await
                    .map_err(|e| failed("socks4a", e))?,
            ),
            ConnectionStrategy::Socks5(socks) => Box::new(
                socks
                    .connect_socks5(host, port)
                    .await
                    .map_err(|e| failed("socks5", e))?,
            ),
            ConnectionStrategy::Shadowsocks(ss) => {
                let target = match host.parse::<IpAddr>() {
                    Ok(ip) => SsAddress::SocketAddress(SocketAddr::new(ip, port)),
                    Err(_) => SsAddress::DomainNameAddress(host.to_string(), port),
                };
                // Every stream derives its own cipher state; only the context is shared.
                let stream = ProxyClientStream::connect(ss.context.clone(), &ss.server, target)
                    .await
                    .map_err(|e| {
                        GatewayError::ProxyConnectionFailed(format!("shadowsocks: {}", e))
                    })?;
                Box::new(stream)
            }
        };

        debug!("connected to {} through proxy", format_tcp_addr(host, port));
        Ok(conn)
    }

    /// Send one request through this proxy, bounded by `timeout` until response headers arrive
    pub async fn send(
        &self,
        req: Request<Full<Bytes>>,
        timeout: Duration,
    ) -> Result<Response<Incoming>> {
        tokio::time::timeout(timeout, self.send_inner(req))
            .await
            .map_err(|_| GatewayError::Timeout)?
    }

    async fn send_inner(&self, mut req: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        let target = Target::from_uri(req.uri())?;
        ensure_host_header(&mut req, &target)?;

        if let (ConnectionStrategy::Http(http), false) = (self, target.tls) {
            // Plain HTTP proxies take the request in absolute form.
            if let Some(auth) = &http.authorization {
                req.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
            }
            let stream = http.open().await?;
            return send_over(stream, req).await;
        }

        let stream = self.connect(&target.host, target.port).await?;
        to_origin_form(&mut req)?;
        if target.tls {
            let stream = tls_wrap(stream, &target.host).await?;
            send_over(stream, req).await
        } else {
            send_over(stream, req).await
        }
    }
}

impl HttpProxy {
    async fn open(&self) -> Result<Box<dyn ProxyConnection>> {
        let stream = dial(&self.addr).await.map_err(|e| failed("http", e))?;
        if self.tls {
            Ok(Box::new(tls_wrap(stream, &self.host).await?))
        } else {
            Ok(Box::new(stream))
        }
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        let mut stream = self.open().await?;

        let authority = format_tcp_addr(host, port);
        let mut head = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", authority);
        if let Some(auth) = self.authorization.as_ref().and_then(|v| v.to_str().ok()) {
            head.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes()).await?;

        let response = read_response_head(&mut stream).await?;
        if !response.status.is_success() {
            return Err(GatewayError::ProxyConnectionFailed(format!(
                "CONNECT {} answered {}",
                authority, response.status
            )));
        }
        if !response.leftover.is_empty() {
            return Err(GatewayError::ProxyConnectionFailed(
                "unexpected bytes after CONNECT response".into(),
            ));
        }

        Ok(stream)
    }
}

impl SocksProxy {
    async fn connect_socks4(
        &self,
        host: &str,
        port: u16,
        resolve_locally: bool,
    ) -> anyhow::Result<TcpStream> {
        let socket = dial(&self.addr).await?;
        let user_id = self.username.as_deref().unwrap_or_default();

        let stream = if resolve_locally {
            // SOCKS4 carries only IPv4 addresses.
            let target = tokio::net::lookup_host((host, port))
                .await
                .with_context(|| format!("resolve {}", host))?
                .find(|addr| addr.is_ipv4())
                .with_context(|| format!("{} has no IPv4 address", host))?;
            if user_id.is_empty() {
                Socks4Stream::connect_with_socket(socket, target).await?
            } else {
                Socks4Stream::connect_with_userid_and_socket(socket, target, user_id).await?
            }
        } else if user_id.is_empty() {
            Socks4Stream::connect_with_socket(socket, (host, port)).await?
        } else {
            Socks4Stream::connect_with_userid_and_socket(socket, (host, port), user_id).await?
        };

        Ok(stream.into_inner())
    }

    async fn connect_socks5(&self, host: &str, port: u16) -> anyhow::Result<TcpStream> {
        let socket = dial(&self.addr).await?;

        let stream = match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(
                    socket,
                    (host, port),
                    username,
                    password,
                )
                .await?
            }
            _ => Socks5Stream::connect_with_socket(socket, (host, port)).await?,
        };

        Ok(stream.into_inner())
    }
}

/// Fetch a URL without any proxy; used for the alive-check baseline
pub async fn send_direct(req: Request<Full<Bytes>>, timeout: Duration) -> Result<Response<Incoming>> {
    let fut = async move {
        let mut req = req;
        let target = Target::from_uri(req.uri())?;
        ensure_host_header(&mut req, &target)?;
        to_origin_form(&mut req)?;

        let stream = dial(&format_tcp_addr(&target.host, target.port))
            .await
            .map_err(|e| failed("direct", e))?;
        if target.tls {
            let stream = tls_wrap(stream, &target.host).await?;
            send_over(stream, req).await
        } else {
            send_over(stream, req).await
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| GatewayError::Timeout)?
}

/// Parse host and port from a CONNECT authority
pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| GatewayError::InvalidRequest(format!("invalid port: {}", port)))?;
            (host, port)
        }
        // CONNECT defaults to 443
        _ => (authority, 443),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(GatewayError::InvalidRequest(format!(
            "missing host in authority: {}",
            authority
        )));
    }
    Ok((host.to_string(), port))
}

struct Target {
    host: String,
    port: u16,
    tls: bool,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self> {
        let tls = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            Some(s) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unsupported target scheme: {}",
                    s
                )))
            }
            None => {
                return Err(GatewayError::InvalidRequest(
                    "request target must be an absolute URI".into(),
                ))
            }
        };

        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("missing host in URI".into()))?;
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { host, port, tls })
    }

    fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port != default_port {
            format_tcp_addr(&self.host, self.port)
        } else if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

fn ensure_host_header(req: &mut Request<Full<Bytes>>, target: &Target) -> Result<()> {
    if !req.headers().contains_key(HOST) {
        let value = HeaderValue::from_str(&target.authority())
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid host: {}", e)))?;
        req.headers_mut().insert(HOST, value);
    }
    Ok(())
}

fn to_origin_form(req: &mut Request<Full<Bytes>>) -> Result<()> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    let origin: Uri = path
        .parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request path: {}", e)))?;
    *req.uri_mut() = origin;
    Ok(())
}

async fn send_over<S>(stream: S, req: Request<Full<Bytes>>) -> Result<Response<Incoming>>
where
    S: ProxyConnection,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| GatewayError::ProxyConnectionFailed(format!("handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("upstream connection ended: {}", e);
        }
    });

    sender
        .send_request(req)
        .await
        .map_err(|e| GatewayError::ProxyConnectionFailed(format!("request failed: {}", e)))
}

async fn dial(addr: &str) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("dial {}", addr))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn tls_connector() -> TlsConnector {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();
    CONNECTOR
        .get_or_init(|| {
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                warn!("failed to load native certificate: {}", e);
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            debug!(added, ignored, "loaded native root certificates");

            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            TlsConnector::from(Arc::new(config))
        })
        .clone()
}

async fn tls_wrap<S>(stream: S, host: &str) -> Result<tokio_rustls::client::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid TLS server name {}: {}", host, e)))?;
    tls_connector()
        .connect(name, stream)
        .await
        .map_err(|e| GatewayError::ProxyConnectionFailed(format!("TLS handshake with {}: {}", host, e)))
}

fn failed(kind: &str, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::ProxyConnectionFailed(format!("{}: {:#}", kind, err))
}

fn url_host(url: &Url) -> Result<String> {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GatewayError::InvalidProxyUri(format!("{}: missing host", url)))
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn userinfo(url: &Url) -> (Option<String>, Option<String>) {
    let username = Some(decode(url.username())).filter(|u| !u.is_empty());
    let password = url.password().map(decode);
    (username, password)
}

fn basic_auth(username: Option<&str>, password: Option<&str>) -> Result<Option<HeaderValue>> {
    let Some(username) = username else {
        return Ok(None);
    };
    let credentials = format!("{}:{}", username, password.unwrap_or_default());
    HeaderValue::from_str(&format!("Basic {}", BASE64.encode(credentials)))
        .map(Some)
        .map_err(|e| GatewayError::InvalidProxyUri(format!("invalid credentials: {}", e)))
}

/// `ss://method:password@host:port`, or the userinfo base64 encoded as a whole
fn shadowsocks_userinfo(url: &Url) -> Result<(String, String)> {
    let (username, password) = userinfo(url);
    let missing = || {
        GatewayError::InvalidProxyUri("shadowsocks uri needs a method and a password".into())
    };

    match (username, password) {
        (Some(method), Some(password)) => Ok((method, password)),
        (Some(encoded), None) => {
            let raw = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .or_else(|_| BASE64.decode(&encoded))
                .map_err(|_| missing())?;
            let decoded = String::from_utf8(raw).map_err(|_| missing())?;
            let (method, password) = decoded.split_once(':').ok_or_else(missing)?;
            Ok((method.to_string(), password.to_string()))
        }
        _ => Err(missing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn read_head(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await.unwrap();
            if n == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn test_strategy_table() {
        for (uri, kind) in [
            ("http://10.0.0.1:3128", StrategyKind::Http),
            ("https://10.0.0.1:3129", StrategyKind::Http),
            ("socks4://10.0.0.1:1080", StrategyKind::Socks4),
            ("socks4a://10.0.0.1:1080", StrategyKind::Socks4a),
            ("socks5://u:p@10.0.0.1:1080", StrategyKind::Socks5),
            ("ss://aes-256-cfb:secret@10.0.0.1:8388", StrategyKind::Shadowsocks),
        ] {
            let url = Url::parse(uri).unwrap();
            assert_eq!(TransportFactory::build(&url).unwrap().kind(), kind, "{}", uri);
        }
    }

    #[test]
    fn test_unknown_scheme_fails_fast() {
        let url = Url::parse("quic://10.0.0.1:443").unwrap();
        assert!(matches!(
            TransportFactory::build(&url),
            Err(GatewayError::UnsupportedScheme(s)) if s == "quic"
        ));
    }

    #[test]
    fn test_shadowsocks_userinfo() {
        let plain = Url::parse("ss://aes-128-gcm:p%40ss@10.0.0.1:8388").unwrap();
        assert_eq!(
            shadowsocks_userinfo(&plain).unwrap(),
            ("aes-128-gcm".to_string(), "p@ss".to_string())
        );

        let encoded = URL_SAFE_NO_PAD.encode("chacha20-ietf-poly1305:secret");
        let sip002 = Url::parse(&format!("ss://{}@10.0.0.1:8388", encoded)).unwrap();
        assert_eq!(
            shadowsocks_userinfo(&sip002).unwrap(),
            ("chacha20-ietf-poly1305".to_string(), "secret".to_string())
        );

        let bare = Url::parse("ss://10.0.0.1:8388").unwrap();
        assert!(matches!(
            TransportFactory::build(&bare),
            Err(GatewayError::InvalidProxyUri(_))
        ));

        let bad_cipher = Url::parse("ss://rot13:secret@10.0.0.1:8388").unwrap();
        assert!(matches!(
            TransportFactory::build(&bad_cipher),
            Err(GatewayError::InvalidProxyUri(_))
        ));
    }

    #[test]
    fn test_parse_authority() {
        assert_eq!(
            parse_authority("example.com:8443").unwrap(),
            ("example.com".to_string(), 8443)
        );
        assert_eq!(
            parse_authority("example.com").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            parse_authority("[::1]:443").unwrap(),
            ("::1".to_string(), 443)
        );
        assert!(parse_authority("example.com:https").is_err());
        assert!(parse_authority(":443").is_err());
    }

    #[tokio::test]
    async fn test_http_strategy_sends_absolute_form_with_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = read_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            head
        });

        let url = Url::parse(&format!("http://user:pass@{}", addr)).unwrap();
        let strategy = TransportFactory::build(&url).unwrap();
        let resp = strategy
            .send(get("http://example.test/path?q=1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");

        let head = server.await.unwrap();
        assert!(head.starts_with("GET http://example.test/path?q=1 HTTP/1.1\r\n"));
        let expected = format!("proxy-authorization: Basic {}", BASE64.encode("user:pass"));
        assert!(head.to_lowercase().contains(&expected.to_lowercase()));
        assert!(head.to_lowercase().contains("host: example.test"));
    }

    #[tokio::test]
    async fn test_socks5_strategy_sends_origin_form() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // greeting: VER NMETHODS METHODS...
            let mut greeting = [0u8; 2];
            stream.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            stream.read_exact(&mut methods).await.unwrap();
            stream.write_all(&[5, 0]).await.unwrap();

            // request: VER CMD RSV ATYP=domain LEN NAME PORT
            let mut request = [0u8; 4];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(request[3], 3);
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut name).await.unwrap();
            stream
                .write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let head = read_head(&mut stream).await;
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
            (String::from_utf8_lossy(&name[..len[0] as usize]).to_string(), head)
        });

        let url = Url::parse(&format!("socks5://{}", addr)).unwrap();
        let strategy = TransportFactory::build(&url).unwrap();
        let resp = strategy
            .send(get("http://example.test:8080/a/b"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let (target, head) = server.await.unwrap();
        assert_eq!(target, "example.test");
        assert!(head.starts_with("GET /a/b HTTP/1.1\r\n"));
        assert!(head.to_lowercase().contains("host: example.test:8080"));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let url = Url::parse(&format!("http://{}", addr)).unwrap();
        let strategy = TransportFactory::build(&url).unwrap();
        let result = strategy
            .send(get("http://example.test/"), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout)));

        server.abort();
    }

    #[tokio::test]
    async fn test_dial_failure_is_connection_error() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("socks5://{}", addr)).unwrap();
        let strategy = TransportFactory::build(&url).unwrap();
        let result = strategy.connect("example.test", 80).await;
        assert!(matches!(result, Err(GatewayError::ProxyConnectionFailed(_))));
    }

    #[test]
    fn test_target_authority() {
        let target = Target::from_uri(&"http://example.test/".parse().unwrap()).unwrap();
        assert_eq!(target.authority(), "example.test");
        let target = Target::from_uri(&"https://[::1]:8443/".parse().unwrap()).unwrap();
        assert_eq!(target.authority(), "[::1]:8443");
        assert!(Target::from_uri(&"/relative".parse().unwrap()).is_err());
    }
}
