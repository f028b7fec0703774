//! Source-IP allow-listing for the proxy listener.
//!
//! A [`Whitelist`] is the union of literal IP addresses and CIDR masks; an
//! address is allowed when it hits a literal entry or falls inside any mask.
//! [`AclListener`] wraps a TCP listener and silently drops connections from
//! addresses outside the allow-list.

mod listener;

pub use listener::AclListener;

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AclError {
    #[error("failed to parse the whitelist entry {entry:?} as an IP address")]
    InvalidIp { entry: String },
    #[error("failed to parse the whitelist entry {entry:?} as a CIDR mask")]
    InvalidMask { entry: String },
}

#[derive(Debug, Default)]
pub struct Whitelist {
    ips: HashSet<IpAddr>,
    masks: Vec<IpNet>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one entry: an `a.b.c.d/len` mask when it contains a `/`, an IP
    /// literal otherwise.
    pub fn add(&mut self, entry: &str) -> Result<(), AclError> {
        if entry.contains('/') {
            let mask: IpNet = entry.parse().map_err(|_| AclError::InvalidMask {
                entry: entry.to_string(),
            })?;
            self.masks.push(mask);
            return Ok(());
        }

        let ip: IpAddr = entry.parse().map_err(|_| AclError::InvalidIp {
            entry: entry.to_string(),
        })?;
        self.ips.insert(ip);
        Ok(())
    }

    pub fn with_entries<'a>(
        entries: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, AclError> {
        let mut whitelist = Self::new();
        for entry in entries {
            whitelist.add(entry)?;
        }
        Ok(whitelist)
    }

    pub fn allowed(&self, ip: IpAddr) -> bool {
        if self.ips.contains(&ip) {
            return true;
        }
        self.masks.iter().any(|mask| mask.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.masks.is_empty()
    }
}
