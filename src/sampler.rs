//! Lazy IPv4 candidate sampling over CIDR blocks.
//!
//! A [`CidrSampler`] walks one network in host order and decides per address
//! whether to emit it:
//!
//! - the first `min` addresses of the network are emitted unconditionally,
//! - every later address is emitted independently with probability `chance`,
//! - emission stops after `max` addresses (`max == 0` means uncapped) or when
//!   the network is exhausted.
//!
//! The sequence is finite and single-pass; a sampler is built fresh for every
//! scan cycle.

use std::net::Ipv4Addr;

use ipnet::{Ipv4AddrRange, Ipv4Net};
use rand::Rng;

use crate::error::DnsError;

/// A finite, single-pass iterator of candidate addresses from one CIDR.
#[derive(Debug, Clone)]
pub struct CidrSampler {
    addrs: Ipv4AddrRange,
    chance: f64,
    max: usize,
    min: usize,
    inspected: usize,
    emitted: usize,
}

impl CidrSampler {
    /// Create a sampler over `net` with the given emission policy.
    pub fn new(net: Ipv4Net, chance: f64, max: usize, min: usize) -> Self {
        Self {
            addrs: Ipv4AddrRange::new(net.network(), net.broadcast()),
            chance: chance.clamp(0.0, 1.0),
            max,
            min,
            inspected: 0,
            emitted: 0,
        }
    }

    /// Parse `cidr` and create a sampler over it.
    pub fn parse(cidr: &str, chance: f64, max: usize, min: usize) -> Result<Self, DnsError> {
        let net: Ipv4Net = cidr.trim().parse()?;
        Ok(Self::new(net, chance, max, min))
    }
}

impl Iterator for CidrSampler {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.max > 0 && self.emitted >= self.max {
            return None;
        }
        let mut rng = rand::thread_rng();
        for addr in self.addrs.by_ref() {
            let forced = self.inspected < self.min;
            self.inspected += 1;
            if forced || rng.gen_bool(self.chance) {
                self.emitted += 1;
                return Some(addr);
            }
        }
        None
    }
}
