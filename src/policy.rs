//! Country admission policy.

use std::collections::BTreeSet;

use crate::country::CountryCode;

/// Which countries are admitted. Exactly one variant is active per instance,
/// and the list variants are never empty once validated by the config layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    AllowList(BTreeSet<CountryCode>),
    BlockList(BTreeSet<CountryCode>),
    AllowAll,
}

impl Policy {
    pub fn describe(&self) -> String {
        let join = |set: &BTreeSet<CountryCode>| {
            set.iter().map(CountryCode::as_str).collect::<Vec<_>>().join(",")
        };
        match self {
            Policy::AllowList(set) => format!("allow {}", join(set)),
            Policy::BlockList(set) => format!("block {}", join(set)),
            Policy::AllowAll => "allow all".to_string(),
        }
    }
}

/// Pure admission decision built once from a [`Policy`].
///
/// Only ever asked about resolved countries; requests whose country could not
/// be resolved are denied before they get here.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: Policy,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn decide(&self, country: &CountryCode) -> bool {
        match &self.policy {
            Policy::AllowList(allowed) => allowed.contains(country),
            Policy::BlockList(blocked) => !blocked.contains(country),
            Policy::AllowAll => true,
        }
    }
}
