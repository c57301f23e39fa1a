//! Pluggable `Origin` checks for WebSocket upgrades.
//!
//! Browsers always send `Origin` on a WebSocket handshake; non-browser
//! clients usually do not. Requests without the header are therefore
//! allowed by every policy here.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Decides whether an upgrade from `origin` may proceed.
pub trait OriginPolicy: Send + Sync + fmt::Debug {
    fn allows(&self, origin: Option<&str>) -> bool;
}

/// Accepts every origin. Suitable only for single-machine use.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginPolicy for AllowAnyOrigin {
    fn allows(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Accepts only origins on an exact-match allow-list.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: HashSet<String>,
}

impl AllowedOrigins {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| o.into().trim_end_matches('/').to_string())
                .collect(),
        }
    }
}

impl OriginPolicy for AllowedOrigins {
    fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self.origins.contains(origin.trim_end_matches('/')),
        }
    }
}

/// Permissive when `allowed` is empty, allow-list otherwise.
pub fn policy_from_config(allowed: &[String]) -> Arc<dyn OriginPolicy> {
    if allowed.is_empty() {
        Arc::new(AllowAnyOrigin)
    } else {
        Arc::new(AllowedOrigins::new(allowed.iter().cloned()))
    }
}
