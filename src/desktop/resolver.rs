// src/desktop/resolver.rs
// DNS resolution that refuses private and link-local addresses

use super::url_guard::is_blocked;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
#[error("{host} resolves to blocked address {ip}")]
pub struct BlockedAddress {
    pub host: String,
    pub ip: IpAddr,
}

/// Resolver for the download client. Every connection, including each
/// redirect hop, resolves here, so a name is checked on every connect.
#[derive(Debug, Clone, Default)]
pub struct GuardedResolver {
    pinned: Arc<HashMap<String, Vec<IpAddr>>>,
}

impl GuardedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `host` from a fixed address list instead of system DNS.
    /// Pinned addresses are still subject to the block list.
    pub fn pin(mut self, host: &str, addresses: Vec<IpAddr>) -> Self {
        Arc::make_mut(&mut self.pinned).insert(host.to_ascii_lowercase(), addresses);
        self
    }

    /// Port is left at 0; the connector fills it in from the URL
    pub async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>, BoxError> {
        let addresses: Vec<SocketAddr> = match self.pinned.get(&host.to_ascii_lowercase()) {
            Some(ips) => ips.iter().map(|ip| SocketAddr::new(*ip, 0)).collect(),
            None => tokio::net::lookup_host((host, 0)).await?.collect(),
        };

        if let Some(blocked) = addresses.iter().find(|address| is_blocked(address.ip())) {
            tracing::warn!("Download host {} resolves to blocked {}", host, blocked.ip());
            return Err(BlockedAddress {
                host: host.to_string(),
                ip: blocked.ip(),
            }
            .into());
        }
        if addresses.is_empty() {
            return Err(format!("{} did not resolve", host).into());
        }

        Ok(addresses)
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addresses = resolver.lookup(name.as_str()).await?;
            let addrs: Addrs = Box::new(addresses.into_iter());
            Ok(addrs)
        })
    }
}

/// Blocked-address rejection anywhere in an error's source chain
pub(crate) fn blocked_source<'a>(
    err: &'a (dyn StdError + 'static),
) -> Option<&'a BlockedAddress> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(blocked) = e.downcast_ref::<BlockedAddress>() {
            return Some(blocked);
        }
        current = e.source();
    }
    None
}
