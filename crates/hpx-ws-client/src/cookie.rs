//! Cookies sent with, and received from, the upgrade exchange.

use std::{collections::BTreeMap, fmt};

use http::{HeaderValue, Uri};
use parking_lot::RwLock;

/// Storage for cookies shared across upgrade attempts.
pub trait CookieStore: Send + Sync + fmt::Debug {
    /// Stores the `Set-Cookie` values of a response to `uri`.
    fn set_cookies(&self, cookies: &mut dyn Iterator<Item = &HeaderValue>, uri: &Uri);

    /// Returns the `Cookie` header to send with a request to `uri`, if any.
    fn cookies(&self, uri: &Uri) -> Option<HeaderValue>;
}

/// In-memory store keyed by host.
///
/// Only the `name=value` pair of each `Set-Cookie` is kept; attributes such
/// as `Path` or `Expires` are ignored.
#[derive(Debug, Default)]
pub struct Jar {
    hosts: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
}

impl Jar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cookie for `host` directly.
    pub fn add(&self, host: &str, name: &str, value: &str) {
        self.hosts
            .write()
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    fn host_of(uri: &Uri) -> Option<String> {
        uri.host().map(str::to_ascii_lowercase)
    }
}

impl CookieStore for Jar {
    fn set_cookies(&self, cookies: &mut dyn Iterator<Item = &HeaderValue>, uri: &Uri) {
        let Some(host) = Self::host_of(uri) else {
            return;
        };
        let mut hosts = self.hosts.write();
        let jar = hosts.entry(host).or_default();
        for cookie in cookies {
            let Ok(cookie) = cookie.to_str() else {
                continue;
            };
            let pair = cookie.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    jar.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
    }

    fn cookies(&self, uri: &Uri) -> Option<HeaderValue> {
        let host = Self::host_of(uri)?;
        let hosts = self.hosts.read();
        let jar = hosts.get(&host).filter(|jar| !jar.is_empty())?;
        let header = jar
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}
