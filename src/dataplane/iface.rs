//! Interface state tracking
//!
//! Resolves everything the advertiser must know about its interface (index,
//! hardware address, link-local address, all-routers membership) and decides
//! which kernel events are worth a re-resolve.

use crate::net::{Icmp6Socket, Joined, RtnlEvent};
use crate::protocol::MacAddr;
use std::ffi::{CStr, CString};
use std::net::Ipv6Addr;
use tracing::{debug, warn};

/// Everything that must be valid before advertisements may be sent.
///
/// A refresh resets this to default before rebuilding, so `ok` is only ever
/// true for a fully resolved state. Fields resolved before a failed step
/// stay populated (with `ok` false) so address events for the interface can
/// still be matched by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub ok: bool,
    pub ifindex: u32,
    pub mac: MacAddr,
    pub link_local: Ipv6Addr,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            ok: false,
            ifindex: 0,
            mac: MacAddr::ZERO,
            link_local: Ipv6Addr::UNSPECIFIED,
        }
    }
}

impl LinkState {
    /// Whether a kernel event concerns this interface enough to re-resolve.
    pub fn wants_refresh(&self, event: RtnlEvent) -> bool {
        match event {
            // A new link may be the one we are waiting for; link-set covers
            // attribute changes on an already-resolved interface.
            RtnlEvent::LinkNew { .. } => !self.ok,
            RtnlEvent::LinkSet { ifindex } => ifindex == self.ifindex || !self.ok,
            RtnlEvent::LinkDel { ifindex } => self.ok && ifindex == self.ifindex,
            RtnlEvent::AddrNew { ifindex } => !self.ok && ifindex == self.ifindex,
            RtnlEvent::AddrDel { ifindex } => self.ok && ifindex == self.ifindex,
        }
    }
}

/// Outcome of a refresh, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// State changed or the multicast group was freshly joined; an
    /// advertisement should be scheduled.
    Advertise,
    /// Nothing worth announcing.
    Unchanged,
}

/// The tracked interface.
#[derive(Debug)]
pub struct Interface {
    name: String,
    state: LinkState,
}

impl Interface {
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: LinkState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn ok(&self) -> bool {
        self.state.ok
    }

    /// Take the interface out of service, e.g. after a send failure. The
    /// next relevant kernel event re-resolves it.
    pub fn mark_down(&mut self) {
        self.state.ok = false;
    }

    /// Re-resolve the interface from scratch.
    ///
    /// The previous state is thrown away first; every step that fails
    /// leaves the interface not-ready until the next relevant kernel event.
    pub fn refresh(&mut self, sock: &Icmp6Socket) -> Refresh {
        let old = self.state;
        self.state = LinkState::default();

        let ifindex = lookup_ifindex(&self.name);
        if ifindex == 0 {
            debug!(interface = %self.name, "interface does not exist");
            return Refresh::Unchanged;
        }
        self.state.ifindex = ifindex;

        match sock.mac_addr(&self.name) {
            Ok(mac) => self.state.mac = mac,
            Err(e) => {
                warn!(interface = %self.name, error = %e, "hardware address query failed");
                return Refresh::Unchanged;
            }
        }

        match link_local_addr(&self.name) {
            Some(addr) => self.state.link_local = addr,
            None => {
                debug!(interface = %self.name, "no link-local address");
                return Refresh::Unchanged;
            }
        }

        let joined = match sock.join_all_routers(self.state.ifindex) {
            Ok(joined) => joined,
            Err(e) => {
                warn!(interface = %self.name, error = %e, "can't join all-routers group");
                return Refresh::Unchanged;
            }
        };

        if let Err(e) = sock.bind_device(&self.name) {
            warn!(interface = %self.name, error = %e, "can't bind to device");
            return Refresh::Unchanged;
        }

        self.state.ok = true;

        if self.state != old || joined == Joined::Fresh {
            debug!(
                interface = %self.name,
                ifindex = self.state.ifindex,
                mac = %self.state.mac,
                link_local = %self.state.link_local,
                "interface ready"
            );
            Refresh::Advertise
        } else {
            Refresh::Unchanged
        }
    }
}

fn lookup_ifindex(ifname: &str) -> u32 {
    let Ok(name) = CString::new(ifname) else {
        return 0;
    };
    unsafe { libc::if_nametoindex(name.as_ptr()) }
}

/// First IPv6 link-local address bound to the named interface.
fn link_local_addr(ifname: &str) -> Option<Ipv6Addr> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut addrs) } < 0 {
        warn!(error = %std::io::Error::last_os_error(), "getifaddrs failed");
        return None;
    }

    let mut found = None;
    let mut cursor = addrs;
    while !cursor.is_null() {
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;

        if ifa.ifa_addr.is_null() {
            continue;
        }
        if unsafe { (*ifa.ifa_addr).sa_family } != libc::AF_INET6 as libc::sa_family_t {
            continue;
        }
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) };
        if name.to_bytes() != ifname.as_bytes() {
            continue;
        }

        let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
        let addr = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
        if is_link_local(&addr) {
            found = Some(addr);
            break;
        }
    }

    unsafe { libc::freeifaddrs(addrs) };
    found
}

/// fe80::/10
fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_state() -> LinkState {
        LinkState {
            ok: true,
            ifindex: 4,
            mac: MacAddr([2, 0, 0, 0, 0, 1]),
            link_local: "fe80::1".parse().unwrap(),
        }
    }

    fn pending_state() -> LinkState {
        LinkState {
            ifindex: 4,
            ..LinkState::default()
        }
    }

    #[test]
    fn test_default_state_not_ready() {
        let state = LinkState::default();
        assert!(!state.ok);
        assert_eq!(state.ifindex, 0);
        assert_eq!(state.link_local, Ipv6Addr::UNSPECIFIED);
    }

    #[test]
    fn test_link_new_relevance() {
        assert!(pending_state().wants_refresh(RtnlEvent::LinkNew { ifindex: 9 }));
        assert!(!ready_state().wants_refresh(RtnlEvent::LinkNew { ifindex: 9 }));
    }

    #[test]
    fn test_link_set_relevance() {
        // Matching index, or anything while not ready
        assert!(ready_state().wants_refresh(RtnlEvent::LinkSet { ifindex: 4 }));
        assert!(!ready_state().wants_refresh(RtnlEvent::LinkSet { ifindex: 9 }));
        assert!(pending_state().wants_refresh(RtnlEvent::LinkSet { ifindex: 9 }));
    }

    #[test]
    fn test_link_del_relevance() {
        assert!(ready_state().wants_refresh(RtnlEvent::LinkDel { ifindex: 4 }));
        assert!(!ready_state().wants_refresh(RtnlEvent::LinkDel { ifindex: 9 }));
        assert!(!pending_state().wants_refresh(RtnlEvent::LinkDel { ifindex: 4 }));
    }

    #[test]
    fn test_addr_new_relevance() {
        // Only interesting while waiting for an address on our index
        assert!(pending_state().wants_refresh(RtnlEvent::AddrNew { ifindex: 4 }));
        assert!(!pending_state().wants_refresh(RtnlEvent::AddrNew { ifindex: 9 }));
        assert!(!ready_state().wants_refresh(RtnlEvent::AddrNew { ifindex: 4 }));
    }

    #[test]
    fn test_addr_del_relevance() {
        assert!(ready_state().wants_refresh(RtnlEvent::AddrDel { ifindex: 4 }));
        assert!(!ready_state().wants_refresh(RtnlEvent::AddrDel { ifindex: 9 }));
        assert!(!pending_state().wants_refresh(RtnlEvent::AddrDel { ifindex: 4 }));
    }

    #[test]
    fn test_mark_down() {
        let mut iface = Interface::new("eth0".into());
        iface.state = ready_state();
        iface.mark_down();
        assert!(!iface.ok());
        // The rest of the state stays resolved
        assert_eq!(iface.state().ifindex, 4);
    }

    #[test]
    fn test_is_link_local() {
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(is_link_local(&"febf::1".parse().unwrap()));
        assert!(!is_link_local(&"fec0::1".parse().unwrap()));
        assert!(!is_link_local(&"2001:db8::1".parse().unwrap()));
        assert!(!is_link_local(&Ipv6Addr::UNSPECIFIED));
    }
}
