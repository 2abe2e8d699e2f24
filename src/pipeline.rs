//! Per-request admission decision.
//!
//! `Start -> ExtractAddress -> ResolveCountry -> PolicyCheck -> Forward`, where
//! an unparsable address ends in a plain 400 and both an unresolvable country
//! and a policy rejection end in the configured [`Action`](crate::action::Action).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::HeaderMap;
use log::{info, warn};

use crate::action::{ActionDispatcher, Reply};
use crate::client;
use crate::country::CountryCode;
use crate::geo::GeoResolver;
use crate::policy::PolicyEngine;

/// Where a request ended up in the decision pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No usable client address. `candidate` is what was tried, if anything.
    BadAddress { candidate: Option<String> },
    /// The database has no country for this address.
    Unresolved { ip: IpAddr },
    Denied { ip: IpAddr, country: CountryCode },
    Admitted { ip: IpAddr, country: CountryCode },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::BadAddress { .. } => "bad-address",
            Verdict::Unresolved { .. } => "unresolved",
            Verdict::Denied { .. } => "denied",
            Verdict::Admitted { .. } => "admitted",
        }
    }

    pub fn country(&self) -> Option<&CountryCode> {
        match self {
            Verdict::Denied { country, .. } | Verdict::Admitted { country, .. } => Some(country),
            _ => None,
        }
    }
}

/// What the proxy should do with a request.
#[derive(Debug, PartialEq)]
pub enum Decision {
    Respond(Reply),
    Forward(CountryCode),
}

pub struct RequestPipeline {
    resolver: Arc<GeoResolver>,
    policy: PolicyEngine,
    dispatcher: ActionDispatcher,
}

impl RequestPipeline {
    pub fn new(resolver: Arc<GeoResolver>, policy: PolicyEngine, dispatcher: ActionDispatcher) -> Self {
        Self {
            resolver,
            policy,
            dispatcher,
        }
    }

    pub fn evaluate(&self, headers: &HeaderMap, remote: Option<SocketAddr>) -> Verdict {
        let candidate = client::candidate(headers, remote);
        let Some(ip) = candidate.as_deref().and_then(client::parse_ip) else {
            info!("can't get IP address for request, addr={:?}", candidate);
            return Verdict::BadAddress { candidate };
        };

        let country = match self.resolver.lookup(ip) {
            Ok(Some(country)) => country,
            Ok(None) => {
                info!("can't find a country by ip, ip={}", ip);
                return Verdict::Unresolved { ip };
            }
            Err(e) => {
                warn!("country lookup failed, ip={}: {}", ip, e);
                return Verdict::Unresolved { ip };
            }
        };

        if self.policy.decide(&country) {
            Verdict::Admitted { ip, country }
        } else {
            info!("forbidden country, ip={} country={}", ip, country);
            Verdict::Denied { ip, country }
        }
    }

    /// Runs the pipeline and, for rejected requests, renders the response.
    /// The configured action never runs for a bad address.
    pub async fn decide(&self, headers: &HeaderMap, remote: Option<SocketAddr>) -> (Verdict, Decision) {
        let verdict = self.evaluate(headers, remote);
        let decision = match &verdict {
            Verdict::BadAddress { .. } => Decision::Respond(Reply::bad_request()),
            Verdict::Unresolved { .. } | Verdict::Denied { .. } => {
                Decision::Respond(self.dispatcher.respond().await)
            }
            Verdict::Admitted { country, .. } => Decision::Forward(country.clone()),
        };
        (verdict, decision)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::action::{Action, Body};
    use crate::config::{ProxyConfig, ProxySettings};
    use crate::forward::FORWARDED_FOR;
    use crate::geo::testing::TableDatabase;

    const TABLE: &str = "192.0.2.1 US\n192.0.2.2 DE\n192.0.2.3 CN";

    fn pipeline(settings: ProxySettings) -> RequestPipeline {
        let config = ProxyConfig::from_settings(ProxySettings {
            target: "http://localhost:4001".into(),
            ..settings
        })
        .unwrap();
        RequestPipeline::new(
            Arc::new(GeoResolver::new(TableDatabase::boxed(TABLE))),
            PolicyEngine::new(config.policy().clone()),
            ActionDispatcher::new(config.action().clone()),
        )
    }

    fn allow_us() -> ProxySettings {
        ProxySettings {
            allow: Some(vec!["US".into()]),
            ..Default::default()
        }
    }

    fn from(addr: &str) -> Option<SocketAddr> {
        Some(format!("{addr}:40000").parse().unwrap())
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, value.parse().unwrap());
        headers
    }

    fn us() -> CountryCode {
        CountryCode::parse("US").unwrap()
    }

    #[tokio::test]
    async fn test_allowed_country_is_forwarded() {
        let (verdict, decision) = pipeline(allow_us()).decide(&HeaderMap::new(), from("192.0.2.1")).await;
        assert_eq!(
            verdict,
            Verdict::Admitted {
                ip: "192.0.2.1".parse().unwrap(),
                country: us()
            }
        );
        assert_eq!(decision, Decision::Forward(us()));
    }

    #[tokio::test]
    async fn test_other_country_gets_default_403() {
        let (verdict, decision) = pipeline(allow_us()).decide(&HeaderMap::new(), from("192.0.2.2")).await;
        assert!(matches!(verdict, Verdict::Denied { .. }));
        assert_eq!(decision, Decision::Respond(Reply::empty(403)));
    }

    #[tokio::test]
    async fn test_blocked_country_gets_message() {
        let p = pipeline(ProxySettings {
            block: Some(vec!["CN".into()]),
            message: Some("Blocked".into()),
            ..Default::default()
        });
        let (_, decision) = p.decide(&forwarded("192.0.2.3"), None).await;
        let Decision::Respond(reply) = decision else {
            panic!("blocked country must not be forwarded");
        };
        assert_eq!(reply.status, 200);
        let Body::Full(body) = reply.body else {
            panic!("message is rendered in memory");
        };
        assert!(String::from_utf8_lossy(&body).contains("<body>Blocked</body>"));

        let (_, decision) = p.decide(&forwarded("192.0.2.1"), None).await;
        assert_eq!(decision, Decision::Forward(us()));
    }

    #[tokio::test]
    async fn test_unparsable_address_is_400_regardless_of_action() {
        let p = pipeline(ProxySettings {
            redirect: Some("https://example.com".into()),
            ..allow_us()
        });
        let (verdict, decision) = p.decide(&forwarded("garbage"), from("192.0.2.1")).await;
        assert_eq!(
            verdict,
            Verdict::BadAddress {
                candidate: Some("garbage".into())
            }
        );
        assert_eq!(decision, Decision::Respond(Reply::bad_request()));

        let (_, decision) = p.decide(&HeaderMap::new(), None).await;
        assert_eq!(decision, Decision::Respond(Reply::bad_request()));
    }

    #[tokio::test]
    async fn test_unknown_address_matches_policy_denial() {
        for action in [
            ProxySettings::default(),
            ProxySettings {
                message: Some("Go away".into()),
                ..Default::default()
            },
            ProxySettings {
                redirect: Some("https://example.com/denied".into()),
                ..Default::default()
            },
        ] {
            let p = pipeline(ProxySettings {
                allow: Some(vec!["US".into()]),
                ..action
            });
            let (verdict, unknown) = p.decide(&HeaderMap::new(), from("198.51.100.77")).await;
            assert!(matches!(verdict, Verdict::Unresolved { .. }));
            let (_, denied) = p.decide(&HeaderMap::new(), from("192.0.2.2")).await;
            assert_eq!(unknown, denied);
        }
    }

    #[tokio::test]
    async fn test_unknown_address_is_denied_even_when_unrestricted() {
        let p = pipeline(ProxySettings::default());
        let (_, decision) = p.decide(&HeaderMap::new(), from("198.51.100.77")).await;
        assert_eq!(decision, Decision::Respond(Reply::empty(403)));

        let (_, decision) = p.decide(&HeaderMap::new(), from("192.0.2.3")).await;
        assert_eq!(decision, Decision::Forward(CountryCode::parse("CN").unwrap()));
    }

    #[tokio::test]
    async fn test_redirect_signature() {
        let p = pipeline(ProxySettings {
            redirect: Some("https://example.com".into()),
            ..allow_us()
        });
        let (_, decision) = p.decide(&HeaderMap::new(), from("192.0.2.2")).await;
        assert_eq!(
            decision,
            Decision::Respond(Reply {
                status: 307,
                headers: vec![("Location", "https://example.com".into())],
                body: Body::Full(Bytes::new()),
            })
        );
        assert_eq!(
            ActionDispatcher::new(Action::Redirect("https://example.com".into()))
                .respond()
                .await
                .status,
            307
        );
    }
}
