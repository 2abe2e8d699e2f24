//! Pingora glue: the per-request filters and the server that hosts them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{info, warn};
use pingora::http::ResponseHeader;
use pingora::prelude::*;
use pingora::proxy::{http_proxy_service, ProxyHttp, Session};
use pingora::services::background::background_service;

use crate::action::{ActionDispatcher, Body, Reply};
use crate::config::ProxyConfig;
use crate::country::CountryCode;
use crate::error::{GeoError, WatchError};
use crate::forward::Upstream;
use crate::geo::{DatabaseOpener, GeoResolver};
use crate::pipeline::{Decision, RequestPipeline};
use crate::policy::PolicyEngine;
use crate::watcher::{DatabaseWatcher, ReloadService};

pub struct GeoProxy {
    pipeline: RequestPipeline,
    upstream: Upstream,
    timeout: Option<Duration>,
}

impl GeoProxy {
    pub fn new(config: &ProxyConfig, resolver: Arc<GeoResolver>) -> Self {
        Self {
            pipeline: RequestPipeline::new(
                resolver,
                PolicyEngine::new(config.policy().clone()),
                ActionDispatcher::new(config.action().clone()),
            ),
            upstream: config.upstream().clone(),
            timeout: config.upstream_timeout(),
        }
    }
}

pub struct RequestCtx {
    /// Random id tying the decision logs to the access line.
    request_id: u32,
    start_time: Instant,
    verdict: &'static str,
    country: Option<CountryCode>,
}

#[async_trait]
impl ProxyHttp for GeoProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx {
            request_id: rand::random(),
            start_time: Instant::now(),
            verdict: "-",
            country: None,
        }
    }

    /// Admits the request or answers it here. `Ok(true)` means a response
    /// was already written and nothing goes upstream.
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let remote = connection_addr(session);
        let (verdict, decision) = self
            .pipeline
            .decide(&session.req_header().headers, remote)
            .await;
        ctx.verdict = verdict.label();
        ctx.country = verdict.country().cloned();

        match decision {
            Decision::Forward(_) => Ok(false),
            Decision::Respond(reply) => {
                write_reply(session, reply).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Ok(Box::new(self.upstream.peer(self.timeout).await?))
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some(country) = ctx.country.as_ref() else {
            return Err(Error::explain(
                ErrorType::InternalError,
                "request reached upstream without a country",
            ));
        };
        let peer_ip = connection_addr(session).map(|addr| addr.ip());
        self.upstream.rewrite(upstream_request, peer_ip, country)
    }

    async fn logging(&self, session: &mut Session, error: Option<&pingora::Error>, ctx: &mut Self::CTX) {
        let req = session.req_header();
        let status = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        let country = ctx.country.as_ref().map_or("-", CountryCode::as_str);
        let elapsed = ctx.start_time.elapsed();

        match error {
            Some(e) => warn!(
                "[{:08x}] {} {} -> {} | country={} verdict={} | error={} | {:?}",
                ctx.request_id,
                req.method,
                req.uri.path(),
                status,
                country,
                ctx.verdict,
                e,
                elapsed
            ),
            None => info!(
                "[{:08x}] {} {} -> {} | country={} verdict={} | {:?}",
                ctx.request_id,
                req.method,
                req.uri.path(),
                status,
                country,
                ctx.verdict,
                elapsed
            ),
        }
    }
}

fn connection_addr(session: &Session) -> Option<SocketAddr> {
    session.client_addr().and_then(|addr| addr.as_inet()).copied()
}

async fn write_reply(session: &mut Session, reply: Reply) -> Result<()> {
    let mut header = ResponseHeader::build(reply.status, Some(reply.headers.len() + 1))?;
    for (name, value) in &reply.headers {
        header.insert_header(*name, value.as_str())?;
    }
    header.insert_header("Content-Length", reply.body.len().to_string())?;

    let bodyless = reply.body.is_empty();
    session
        .write_response_header(Box::new(header), bodyless)
        .await?;
    if bodyless {
        return Ok(());
    }

    match reply.body {
        Body::Full(bytes) => session.write_response_body(Some(bytes), true).await,
        Body::File(mut file) => {
            while let Some(chunk) = file.next_chunk().await.map_err(|e| {
                Error::because(ErrorType::ReadError, "failed to read denial page", e)
            })? {
                session.write_response_body(Some(chunk), false).await?;
            }
            session.write_response_body(None, true).await
        }
    }
}

/// One proxy instance: its configuration, its database and, with
/// auto-reload on, the watcher that keeps the database current.
pub struct GeoFilter {
    config: ProxyConfig,
    resolver: Arc<GeoResolver>,
    opener: Arc<dyn DatabaseOpener>,
    watcher: Option<DatabaseWatcher>,
}

impl GeoFilter {
    /// Loads the database. The proxy must not serve if this fails.
    pub fn open(config: ProxyConfig, opener: Arc<dyn DatabaseOpener>) -> Result<Self, GeoError> {
        let resolver = Arc::new(GeoResolver::open(opener.as_ref(), config.database())?);
        info!("Geo DB is loaded from {}", config.database().display());
        Ok(Self {
            config,
            resolver,
            opener,
            watcher: None,
        })
    }

    /// Attaches the database watcher when auto-reload is configured. Returns
    /// once the watch is live.
    pub fn watch(&mut self) -> Result<(), WatchError> {
        if !self.config.auto_reload() || self.watcher.is_some() {
            return Ok(());
        }
        self.watcher = Some(DatabaseWatcher::subscribe(
            self.config.database(),
            self.resolver.clone(),
            self.opener.clone(),
        )?);
        Ok(())
    }

    pub fn resolver(&self) -> &Arc<GeoResolver> {
        &self.resolver
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Builds the Pingora server hosting the proxy and, if attached, the
    /// reload service.
    pub fn into_server(self) -> Result<Server> {
        let mut server = Server::new(None)?;
        server.bootstrap();

        let listen = self.config.listen_addr();
        let proxy = GeoProxy::new(&self.config, self.resolver.clone());
        let mut proxy_service = http_proxy_service(&server.configuration, proxy);
        proxy_service.add_tcp(&listen);
        server.add_service(proxy_service);

        if let Some(watcher) = self.watcher {
            server.add_service(background_service("geo db reload", ReloadService::new(watcher)));
        }

        info!(
            "starting proxy on {} -> {} ({}, action={})",
            listen,
            self.config.upstream().url(),
            self.config.policy().describe(),
            self.config.action().name()
        );
        Ok(server)
    }
}
