//! Proxy configuration.
//!
//! [`ProxySettings`] is the raw, possibly contradictory input gathered from
//! the command line. [`ProxyConfig::from_settings`] validates all of it in one
//! pass and is the only way to obtain a [`ProxyConfig`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::Action;
use crate::country::CountryCode;
use crate::error::ConfigError;
use crate::forward::Upstream;
use crate::policy::Policy;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_DATABASE: &str = "GeoLite2-Country.mmdb";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Unvalidated proxy options.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub port: u16,
    pub database: PathBuf,
    pub target: String,
    pub allow: Option<Vec<String>>,
    pub block: Option<Vec<String>>,
    pub message: Option<String>,
    pub redirect: Option<String>,
    pub file: Option<PathBuf>,
    pub auto_reload: bool,
    pub upstream_timeout: Option<Duration>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database: PathBuf::from(DEFAULT_DATABASE),
            target: String::new(),
            allow: None,
            block: None,
            message: None,
            redirect: None,
            file: None,
            auto_reload: false,
            upstream_timeout: Some(DEFAULT_UPSTREAM_TIMEOUT),
        }
    }
}

/// Validated, immutable configuration of one proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    port: u16,
    database: PathBuf,
    upstream: Upstream,
    policy: Policy,
    action: Action,
    auto_reload: bool,
    upstream_timeout: Option<Duration>,
}

impl ProxyConfig {
    pub fn from_settings(settings: ProxySettings) -> Result<Self, ConfigError> {
        let policy = build_policy(settings.allow, settings.block)?;
        let action = build_action(settings.message, settings.redirect, settings.file)?;
        let upstream = Upstream::parse(&settings.target)?;

        Ok(Self {
            port: settings.port,
            database: settings.database,
            upstream,
            policy,
            action,
            auto_reload: settings.auto_reload,
            upstream_timeout: settings.upstream_timeout.filter(|t| !t.is_zero()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn auto_reload(&self) -> bool {
        self.auto_reload
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout
    }
}

fn build_policy(
    allow: Option<Vec<String>>,
    block: Option<Vec<String>>,
) -> Result<Policy, ConfigError> {
    match (allow, block) {
        (Some(_), Some(_)) => Err(ConfigError::ConflictingPolicy),
        (Some(list), None) => Ok(Policy::AllowList(country_set("allowed", &list)?)),
        (None, Some(list)) => Ok(Policy::BlockList(country_set("blocked", &list)?)),
        (None, None) => Ok(Policy::AllowAll),
    }
}

fn country_set(kind: &'static str, list: &[String]) -> Result<BTreeSet<CountryCode>, ConfigError> {
    let set = list
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(CountryCode::parse)
        .collect::<Result<BTreeSet<_>, _>>()?;
    if set.is_empty() {
        return Err(ConfigError::EmptyCountryList(kind));
    }
    Ok(set)
}

fn build_action(
    message: Option<String>,
    redirect: Option<String>,
    file: Option<PathBuf>,
) -> Result<Action, ConfigError> {
    let non_blank = |s: String| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };
    let message = message.and_then(non_blank);
    let redirect = redirect.and_then(non_blank);
    let file = file.filter(|p| !p.as_os_str().is_empty());

    let mut chosen = Vec::new();
    if let Some(text) = message {
        chosen.push(Action::Message(text));
    }
    if let Some(url) = redirect {
        if http::HeaderValue::from_str(&url).is_err() {
            return Err(ConfigError::InvalidRedirect(url));
        }
        chosen.push(Action::Redirect(url));
    }
    if let Some(path) = file {
        chosen.push(Action::ServeFile(path));
    }

    match chosen.len() {
        0 => Ok(Action::Forbidden),
        1 => Ok(chosen.remove(0)),
        _ => Err(ConfigError::ConflictingActions(
            chosen.iter().map(Action::name).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProxySettings {
        ProxySettings {
            target: "http://localhost:4001".into(),
            ..Default::default()
        }
    }

    fn list(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::from_settings(settings()).unwrap();
        assert_eq!(config.port(), 80);
        assert_eq!(config.listen_addr(), "0.0.0.0:80");
        assert_eq!(config.database(), Path::new("GeoLite2-Country.mmdb"));
        assert_eq!(config.policy(), &Policy::AllowAll);
        assert_eq!(config.action(), &Action::Forbidden);
        assert!(!config.auto_reload());
        assert_eq!(config.upstream_timeout(), Some(DEFAULT_UPSTREAM_TIMEOUT));
    }

    #[test]
    fn test_allow_list_is_normalized() {
        let config = ProxyConfig::from_settings(ProxySettings {
            allow: list(&["us", " ca ", ""]),
            ..settings()
        })
        .unwrap();
        let expected = ["CA", "US"]
            .iter()
            .map(|c| CountryCode::parse(c).unwrap())
            .collect();
        assert_eq!(config.policy(), &Policy::AllowList(expected));
    }

    #[test]
    fn test_allow_and_block_conflict() {
        let err = ProxyConfig::from_settings(ProxySettings {
            allow: list(&["US"]),
            block: list(&["CN"]),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ConflictingPolicy);
    }

    #[test]
    fn test_empty_effective_lists_are_rejected() {
        let err = ProxyConfig::from_settings(ProxySettings {
            allow: list(&["", "  "]),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyCountryList("allowed"));

        let err = ProxyConfig::from_settings(ProxySettings {
            block: Some(Vec::new()),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyCountryList("blocked"));
    }

    #[test]
    fn test_unknown_country_is_rejected() {
        let err = ProxyConfig::from_settings(ProxySettings {
            block: list(&["CN", "China"]),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidCountry("China".into()));
    }

    #[test]
    fn test_actions_are_mutually_exclusive() {
        let err = ProxyConfig::from_settings(ProxySettings {
            message: Some("Blocked".into()),
            redirect: Some("https://example.com".into()),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ConflictingActions(vec!["message", "redirect"]));

        let err = ProxyConfig::from_settings(ProxySettings {
            redirect: Some("https://example.com".into()),
            file: Some(PathBuf::from("denied.html")),
            ..settings()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ConflictingActions(vec!["redirect", "file"]));
    }

    #[test]
    fn test_blank_message_falls_back_to_forbidden() {
        let config = ProxyConfig::from_settings(ProxySettings {
            message: Some("   ".into()),
            redirect: Some("https://example.com".into()),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.action(), &Action::Redirect("https://example.com".into()));
    }

    #[test]
    fn test_message_is_trimmed() {
        let config = ProxyConfig::from_settings(ProxySettings {
            message: Some("  Blocked \n".into()),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.action(), &Action::Message("Blocked".into()));
    }

    #[test]
    fn test_redirect_must_be_a_header_value() {
        let err = ProxyConfig::from_settings(ProxySettings {
            redirect: Some("https://example.com/\nSet-Cookie: x".into()),
            ..settings()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRedirect(_)));
    }

    #[test]
    fn test_missing_target_is_rejected() {
        let err = ProxyConfig::from_settings(ProxySettings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let config = ProxyConfig::from_settings(ProxySettings {
            upstream_timeout: Some(Duration::ZERO),
            ..settings()
        })
        .unwrap();
        assert_eq!(config.upstream_timeout(), None);
    }
}
