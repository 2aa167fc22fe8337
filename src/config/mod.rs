//! Runtime configuration
//!
//! Every parameter comes from the command line and is immutable once the
//! daemon starts. Validation happens up front; a bad configuration never
//! reaches the sockets.

use crate::{Error, Result};
use std::net::Ipv6Addr;
use std::time::Duration;

/// Maximum number of advertised prefixes
pub const MAX_PREFIXES: usize = 8;
/// Maximum number of RDNSS entries
pub const MAX_RDNSS: usize = 3;

/// Hop limit advertised to hosts
pub const ADV_CUR_HOP_LIMIT: u8 = 64;
/// RDNSS option lifetime in seconds
pub const ADV_RDNSS_LIFETIME: u32 = 1200;

pub const DEFAULT_VALID_LIFETIME: u32 = 86400;
pub const DEFAULT_PREFERRED_LIFETIME: u32 = 14400;
pub const DEFAULT_MAX_RTR_ADV_INTERVAL: u64 = 600;

/// A /64 prefix to advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub addr: Ipv6Addr,
    /// Advertise the L flag alongside A
    pub on_link: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ifname: String,
    pub prefixes: Vec<Prefix>,
    /// Router lifetime; 0 means "not a default router"
    pub default_lifetime: u16,
    pub rdnss: Vec<Ipv6Addr>,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub max_interval: Duration,
    /// Derived: max_interval / 3, but never below 3 seconds
    pub min_interval: Duration,
}

impl Config {
    pub fn new(ifname: impl Into<String>) -> Self {
        Self {
            ifname: ifname.into(),
            prefixes: Vec::new(),
            default_lifetime: 0,
            rdnss: Vec::new(),
            valid_lifetime: DEFAULT_VALID_LIFETIME,
            preferred_lifetime: DEFAULT_PREFERRED_LIFETIME,
            max_interval: Duration::from_secs(DEFAULT_MAX_RTR_ADV_INTERVAL),
            min_interval: Duration::from_secs(DEFAULT_MAX_RTR_ADV_INTERVAL / 3),
        }
    }

    /// Set the maximum unsolicited advertisement interval and derive the
    /// minimum as a third of it, clamped to at least 3 seconds.
    pub fn set_max_interval(&mut self, secs: u64) -> Result<()> {
        if secs < 4 {
            return Err(Error::Config(format!(
                "max router advertisement interval must be at least 4 seconds, got {}",
                secs
            )));
        }
        self.max_interval = Duration::from_secs(secs);
        self.min_interval = Duration::from_secs((secs / 3).max(3));
        Ok(())
    }

    /// Add an advertised prefix from its textual form, `addr` or `addr/64`.
    pub fn add_prefix(&mut self, literal: &str, on_link: bool) -> Result<()> {
        if self.prefixes.len() == MAX_PREFIXES {
            return Err(Error::Config(format!(
                "maximum number of prefixes is {}",
                MAX_PREFIXES
            )));
        }
        let addr = parse_prefix(literal)?;
        self.prefixes.push(Prefix { addr, on_link });
        Ok(())
    }

    pub fn add_rdnss(&mut self, literal: &str) -> Result<()> {
        if self.rdnss.len() == MAX_RDNSS {
            return Err(Error::Config(format!(
                "maximum number of RDNSS addresses is {}",
                MAX_RDNSS
            )));
        }
        let addr: Ipv6Addr = literal
            .parse()
            .map_err(|_| Error::Config(format!("invalid RDNSS address {}", literal)))?;
        self.rdnss.push(addr);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ifname.is_empty() || self.ifname.len() >= libc::IFNAMSIZ {
            return Err(Error::Config(format!(
                "invalid interface name {:?}",
                self.ifname
            )));
        }
        if self.prefixes.is_empty() {
            return Err(Error::Config("at least one prefix is required".into()));
        }
        if self.preferred_lifetime > self.valid_lifetime {
            return Err(Error::Config(format!(
                "preferred lifetime {} exceeds valid lifetime {}",
                self.preferred_lifetime, self.valid_lifetime
            )));
        }
        Ok(())
    }
}

/// Parse a /64 prefix literal. Only length 64 is supported, and the host
/// half of the address must be zero.
fn parse_prefix(literal: &str) -> Result<Ipv6Addr> {
    let invalid = || {
        Error::Config(format!(
            "invalid prefix {} (only prefixes of length 64 are supported)",
            literal
        ))
    };

    let addr_part = match literal.split_once('/') {
        Some((addr, "64")) => addr,
        Some(_) => return Err(invalid()),
        None => literal,
    };

    let addr: Ipv6Addr = addr_part.parse().map_err(|_| invalid())?;
    if u128::from_be_bytes(addr.octets()) & u64::MAX as u128 != 0 {
        return Err(invalid());
    }

    Ok(addr)
}
