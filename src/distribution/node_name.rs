//! Node identities.
//!
//! A session's node name is `{prefix}_{name}_{hash}@{host}`. The hash comes
//! from a nanosecond timestamp so that sessions started side by side on the
//! same machine do not collide.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Short (`-sname`, bare host) or long (`-name`, fully qualified host) naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMode {
    #[default]
    Short,
    Long,
}

impl NameMode {
    /// Command line flag the runtime takes for this mode.
    pub fn flag(self) -> &'static str {
        match self {
            NameMode::Short => "-sname",
            NameMode::Long => "-name",
        }
    }
}

/// First 8 hex digits of the blake3 digest of `nanos`.
pub fn timestamp_hash(nanos: u128) -> String {
    let digest = blake3::hash(&nanos.to_le_bytes());
    digest.to_hex()[..8].to_string()
}

/// `{prefix}_{name}_{hash}` for the current instant.
pub fn unique_name(prefix: &str, name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{prefix}_{name}_{}", timestamp_hash(nanos))
}

/// Full node name for this session.
pub fn node_name(prefix: &str, name: &str, mode: NameMode) -> String {
    format!("{}@{}", unique_name(prefix, name), host(mode))
}

/// Appends `@host` when `name` has no host part.
pub fn qualify(name: &str, mode: NameMode) -> String {
    if name.contains('@') {
        name.to_string()
    } else {
        format!("{name}@{}", host(mode))
    }
}

/// The host part of `node`, if any.
pub fn host_of(node: &str) -> Option<&str> {
    node.split_once('@').map(|(_, host)| host).filter(|h| !h.is_empty())
}

pub fn host(mode: NameMode) -> String {
    let hostname = local_hostname();
    match mode {
        NameMode::Short => short_host(&hostname).to_string(),
        NameMode::Long => {
            let domain = std::fs::read_to_string("/etc/resolv.conf")
                .ok()
                .and_then(|contents| resolv_domain(&contents));
            long_host(&hostname, domain.as_deref())
        }
    }
}

fn short_host(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

fn long_host(hostname: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) if !hostname.contains('.') => format!("{hostname}.{domain}"),
        _ => hostname.to_string(),
    }
}

/// `domain`, or else the first `search` entry, of a resolv.conf.
fn resolv_domain(contents: &str) -> Option<String> {
    let mut search = None;
    for line in contents.lines() {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("domain"), Some(domain)) => return Some(domain.to_string()),
            (Some("search"), Some(first)) if search.is_none() => search = Some(first.to_string()),
            _ => {}
        }
    }
    search
}

#[cfg(unix)]
fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
