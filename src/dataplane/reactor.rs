//! Datapath event loop
//!
//! Owns both sockets and all mutable daemon state. One task, three wakeup
//! sources: an incoming Router Solicitation, a kernel notification, or the
//! advertisement deadline.

use crate::config::{Config, ADV_CUR_HOP_LIMIT, ADV_RDNSS_LIFETIME};
use crate::dataplane::{AdvertScheduler, Interface, Refresh};
use crate::net::{Icmp6Socket, RecvMeta, RtnlMessages, RtnlSocket};
use crate::protocol::icmpv6::{PrefixInformation, RouterAdvertisement, RouterSolicitation};
use crate::protocol::MacAddr;
use crate::telemetry::RaStats;
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Enough for any solicitation off the wire
const RECV_BUF_SIZE: usize = 1500;
/// Netlink event buffers
const RTNL_BUF_SIZE: usize = 4096;

pub struct Reactor {
    config: Config,
    icmp: Icmp6Socket,
    rtnl: RtnlSocket,
    iface: Interface,
    scheduler: AdvertScheduler,
    stats: RaStats,
}

impl Reactor {
    /// Open both sockets and seed the scheduler. Any failure here is fatal.
    pub fn new(config: Config) -> Result<Self> {
        let icmp = Icmp6Socket::open()?;
        let rtnl = RtnlSocket::open()?;
        let iface = Interface::new(config.ifname.clone());
        let scheduler = AdvertScheduler::new(
            config.min_interval,
            config.max_interval,
            Instant::now(),
            StdRng::from_entropy(),
        );

        Ok(Self {
            config,
            icmp,
            rtnl,
            iface,
            scheduler,
            stats: RaStats::default(),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.refresh();
        info!(
            interface = %self.config.ifname,
            prefixes = self.config.prefixes.len(),
            rdnss = self.config.rdnss.len(),
            "advertising"
        );

        let mut buf = [0u8; RECV_BUF_SIZE];
        let mut nlbuf = [0u8; RTNL_BUF_SIZE];

        loop {
            let ready = self.iface.ok();
            let deadline = tokio::time::Instant::from_std(self.scheduler.deadline());

            tokio::select! {
                received = self.icmp.recv_solicit(&mut buf) => match received {
                    Ok(meta) => self.handle_solicit(&buf, meta),
                    Err(e) => warn!(error = %e, "recvmsg failed"),
                },
                received = self.rtnl.recv(&mut nlbuf) => match received {
                    Ok(len) => self.handle_rtnl_buffer(&nlbuf[..len])?,
                    Err(e) => warn!(error = %e, "netlink receive failed"),
                },
                _ = tokio::time::sleep_until(deadline), if ready => self.send_advert(),
            }
        }
    }

    fn handle_solicit(&mut self, buf: &[u8], meta: RecvMeta) {
        self.stats.rs_received.inc();

        // On-link check: RFC 4861 requires the received hop limit to be 255.
        // Absent ancillary data counts as a failure.
        if meta.hop_limit != Some(255) {
            self.stats.rs_dropped.inc();
            return;
        }

        match RouterSolicitation::validate(&buf[..meta.len], &meta.src) {
            Ok(_) => {
                debug!(src = %meta.src, "router solicitation");
                self.scheduler.solicit(Instant::now());
            }
            Err(e) => {
                debug!(src = %meta.src, error = %e, "dropping solicitation");
                self.stats.rs_dropped.inc();
            }
        }
    }

    fn handle_rtnl_buffer(&mut self, buf: &[u8]) -> Result<()> {
        for message in RtnlMessages::new(buf) {
            let event = message?;
            self.stats.rtnl_events.inc();
            if self.iface.state().wants_refresh(event) {
                debug!(?event, "relevant kernel event");
                // At most one refresh per buffer; later messages are stale
                // against the state just resolved.
                self.refresh();
                break;
            }
        }
        Ok(())
    }

    fn refresh(&mut self) {
        self.stats.iface_refreshes.inc();
        if self.iface.refresh(&self.icmp) == Refresh::Advertise {
            self.scheduler.solicit(Instant::now());
        }
    }

    fn send_advert(&mut self) {
        let state = *self.iface.state();
        if !state.ok {
            return;
        }

        let packet = build_advert(&self.config, state.mac);
        match self
            .icmp
            .send_advert(&packet, &state.link_local, state.ifindex)
        {
            Ok(_) => {
                self.stats.ra_sent.inc();
                debug!(bytes = packet.len(), "router advertisement sent");
                self.scheduler.advance(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, "send failed, marking interface down");
                self.stats.ra_send_errors.inc();
                self.iface.mark_down();
            }
        }
    }
}

/// Assemble the advertisement this configuration describes.
fn build_advert(config: &Config, mac: MacAddr) -> Vec<u8> {
    let mut ra = RouterAdvertisement::new(ADV_CUR_HOP_LIMIT, config.default_lifetime)
        .with_source_link_addr(mac);

    for prefix in &config.prefixes {
        ra = ra.with_prefix(PrefixInformation::new(
            prefix.addr,
            64,
            prefix.on_link,
            true,
            config.valid_lifetime,
            config.preferred_lifetime,
        ));
    }

    if !config.rdnss.is_empty() {
        ra = ra.with_rdnss(config.rdnss.clone(), ADV_RDNSS_LIFETIME);
    }

    ra.to_bytes()
}
