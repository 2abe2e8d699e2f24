//! The fixed upstream target and the rewrite applied to admitted requests.
//!
//! Pingora does the actual relaying; responses stream back to the client
//! without buffering, so this module only decides where a request goes and
//! what its outgoing header looks like.

use std::net::IpAddr;
use std::time::Duration;

use pingora::prelude::*;
use url::{Host, Url};

use crate::country::CountryCode;
use crate::error::ConfigError;

/// Header carrying the admitted client's country to the upstream.
pub const GEO_HEADER_NAME: &str = "X-Geo-Country";
pub const FORWARDED_HOST: &str = "X-Forwarded-Host";
pub const FORWARDED_FOR: &str = "X-Forwarded-For";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    url: Url,
    host: String,
    port: u16,
    tls: bool,
    authority: String,
}

impl Upstream {
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(target.trim()).map_err(|e| invalid(&e.to_string()))?;
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            _ => return Err(invalid("scheme must be http or https")),
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(invalid("missing host")),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        let host_str = url.host_str().unwrap_or(&host);
        let authority = match url.port() {
            Some(explicit) => format!("{host_str}:{explicit}"),
            None => host_str.to_string(),
        };

        Ok(Self {
            url,
            host,
            port,
            tls,
            authority,
        })
    }

    /// Value written to the outgoing `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Resolves the target and builds the peer for one request.
    pub async fn peer(&self, timeout: Option<Duration>) -> Result<HttpPeer> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                Error::explain(
                    ErrorType::ConnectNoRoute,
                    format!("failed to resolve upstream {}: {}", self.authority, e),
                )
            })?
            .next()
            .ok_or_else(|| {
                Error::explain(
                    ErrorType::ConnectNoRoute,
                    format!("no address found for upstream {}", self.authority),
                )
            })?;

        let sni = if self.tls { self.host.clone() } else { String::new() };
        let mut peer = HttpPeer::new(addr, self.tls, sni);
        if let Some(timeout) = timeout {
            peer.options.connection_timeout = Some(timeout);
            peer.options.read_timeout = Some(timeout);
        }
        Ok(peer)
    }

    /// Points an admitted request at the upstream.
    ///
    /// `peer_ip` is the connection address, appended to `X-Forwarded-For`.
    pub fn rewrite(
        &self,
        request: &mut RequestHeader,
        peer_ip: Option<IpAddr>,
        country: &CountryCode,
    ) -> Result<()> {
        let original_host = request
            .headers
            .get("Host")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| request.uri.authority().map(|a| a.to_string()));
        if let Some(host) = original_host {
            request.insert_header(FORWARDED_HOST, host)?;
        }
        request.insert_header("Host", self.authority.as_str())?;

        if let Some(ip) = peer_ip {
            // multiple header lines fold into one list, in order
            let mut hops: Vec<String> = request
                .headers
                .get_all(FORWARDED_FOR)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            hops.push(ip.to_string());
            request.insert_header(FORWARDED_FOR, hops.join(", "))?;
        }

        request.insert_header(GEO_HEADER_NAME, country.as_str())?;

        if let Some(uri) = self.join_uri(&request.uri)? {
            request.set_uri(uri);
        }
        Ok(())
    }

    fn join_uri(&self, uri: &http::Uri) -> Result<Option<http::Uri>> {
        let base_path = self.url.path();
        let base_query = self.url.query().unwrap_or("");
        if (base_path.is_empty() || base_path == "/") && base_query.is_empty() {
            return Ok(None);
        }

        let path = single_joining_slash(base_path, uri.path());
        let query = match (base_query, uri.query().unwrap_or("")) {
            ("", request) => request.to_string(),
            (base, "") => base.to_string(),
            (base, request) => format!("{base}&{request}"),
        };
        let joined = if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        };

        joined.parse::<http::Uri>().map(Some).map_err(|e| {
            Error::explain(
                ErrorType::InvalidHTTPHeader,
                format!("failed to build upstream uri '{joined}': {e}"),
            )
        })
    }
}

fn single_joining_slash(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
