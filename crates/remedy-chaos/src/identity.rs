//! Resource naming scheme.
//!
//! Every resource the harness creates carries a reserved prefix plus a
//! random lowercase alphanumeric token. A public IP and its three
//! load-balancer children share one token (the suffix), which is how they are
//! correlated and how leftovers are found again.
//!
//! The prefixes must stay disjoint from anything the controller under test
//! creates; orphan discovery is a plain prefix match.

use rand::Rng;
use std::fmt;

// ===== Constants =====

/// Public IP addresses: `ip-<suffix>`.
pub const PUBLIC_IP_PREFIX: &str = "ip-";

/// Load-balancer frontend IP configurations: `fip-<suffix>`.
pub const FRONTEND_IP_PREFIX: &str = "fip-";

/// Load-balancing rules: `lbr-<suffix>`.
pub const RULE_PREFIX: &str = "lbr-";

/// Health probes: `prb-<suffix>`.
pub const PROBE_PREFIX: &str = "prb-";

/// Churn services: `svc-<random>`.
pub const SERVICE_PREFIX: &str = "svc-";

/// Custom resources mirroring a public IP: `pubip-<ip name>`.
pub const CUSTOM_RESOURCE_PREFIX: &str = "pubip-";

/// Length of the correlation token appended to `ip-`/`fip-`/`lbr-`/`prb-`.
pub const DEFAULT_SUFFIX_LENGTH: usize = 10;

/// Total length of a churn service name, prefix included.
pub const SERVICE_NAME_LENGTH: usize = 10;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ===== Suffix =====

/// Random correlation token shared by a public IP and its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceSuffix(String);

impl ResourceSuffix {
    /// Generate a fresh token of `length` characters.
    pub fn generate(length: usize) -> Self {
        Self(random_token(length))
    }

    /// Wrap an existing token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Recover the suffix from a discovered resource name such as
    /// `ip-abc123defg`. Returns `None` if the name has no `-` separator or
    /// nothing after it.
    pub fn from_resource_name(name: &str) -> Option<Self> {
        let (_, token) = name.rsplit_once('-')?;
        if token.is_empty() {
            return None;
        }
        Some(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ===== Names =====

/// `<prefix><token>`.
pub fn derive_name(prefix: &str, suffix: &ResourceSuffix) -> String {
    format!("{prefix}{suffix}")
}

/// Random name of exactly `total_length` characters, prefix included.
///
/// If the prefix alone is at least `total_length` long, the prefix is
/// returned unchanged.
pub fn random_name(prefix: &str, total_length: usize) -> String {
    let token_length = total_length.saturating_sub(prefix.len());
    format!("{prefix}{}", random_token(token_length))
}

/// Name of the custom resource mirroring the public IP named `ip_name`.
pub fn custom_resource_name(ip_name: &str) -> String {
    format!("{CUSTOM_RESOURCE_PREFIX}{ip_name}")
}

fn random_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let index = rng.gen_range(0..TOKEN_ALPHABET.len());
            TOKEN_ALPHABET.get(index).copied().map_or('a', char::from)
        })
        .collect()
}
