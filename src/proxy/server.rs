//! Proxy server implementation using hyper
//!
//! Accepts forward-proxy traffic on one port. Requests addressed to the
//! server itself go to the admin router, everything else to the handler.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tower::ServiceExt;
use tracing::{debug, error, info, instrument};

use super::body::ProxyBody;
use super::handler::ProxyHandler;
use crate::config::ProxyServerConfig;
use crate::error::{GatewayError, Result};

/// Proxy server
pub struct ProxyServer {
    config: ProxyServerConfig,
    handler: Arc<ProxyHandler>,
    admin: Router,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ProxyServerConfig, handler: Arc<ProxyHandler>, admin: Router) -> Self {
        Self {
            config,
            handler,
            admin,
        }
    }

    /// Bind the configured address and run until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            GatewayError::InvalidConfig(format!("cannot listen on {}: {}", addr, e))
        })?;
        info!("Proxy server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Accept connections from `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listen_port = listener.local_addr()?.port();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();
                            let admin = self.admin.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    client_addr,
                                    listen_port,
                                    handler,
                                    admin,
                                ).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        listen_port: u16,
        handler: Arc<ProxyHandler>,
        admin: Router,
    ) -> Result<()> {
        let local_addr = stream.local_addr()?;
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            let admin = admin.clone();

            async move {
                if is_local_request(&req, listen_port, local_addr.ip()).await {
                    return Ok::<_, Infallible>(serve_admin(admin, req).await);
                }
                Ok(handler.handle(req, client_addr).await)
            }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|e| GatewayError::ProxyConnectionFailed(e.to_string()))?;

        Ok(())
    }
}

async fn serve_admin(admin: Router, req: Request<Incoming>) -> Response<ProxyBody> {
    let response = match admin.oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    response.map(|body| {
        body.map_err(|e| GatewayError::Http(e.to_string()))
            .boxed_unsync()
    })
}

/// Whether a request targets this server rather than an upstream host.
///
/// Origin-form requests are always local. Otherwise the target port must be
/// the listen port and the host must resolve to a loopback, unspecified or
/// the accepting address.
pub async fn is_local_request<B>(req: &Request<B>, listen_port: u16, local_ip: IpAddr) -> bool {
    let authority = match req.uri().authority() {
        Some(authority) => authority.as_str().to_string(),
        None if req.method() == Method::CONNECT => return false,
        None => return true,
    };

    let Some((host, port)) = split_host_port(&authority, req.uri().scheme_str()) else {
        return false;
    };
    if port != listen_port {
        return false;
    }

    let is_local_ip = |ip: IpAddr| ip.is_loopback() || ip.is_unspecified() || ip == local_ip;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_local_ip(ip);
    }
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let resolved = tokio::net::lookup_host((host.clone(), port)).await;
    match resolved {
        Ok(mut addrs) => addrs.any(|addr| is_local_ip(addr.ip())),
        Err(_) => false,
    }
}

fn split_host_port(authority: &str, scheme: Option<&str>) -> Option<(String, u16)> {
    let default_port = match scheme {
        Some(s) if s.eq_ignore_ascii_case("https") => 443,
        _ => 80,
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => (host, port.parse().ok()?),
        _ => (authority, default_port),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (!host.is_empty()).then(|| (host.to_string(), port))
}
