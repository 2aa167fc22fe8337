//! Raw ICMPv6 endpoint
//!
//! Non-blocking AF_INET6/SOCK_RAW socket restricted to Router Solicitations,
//! with the ancillary-data plumbing RFC 4861 requires: the received hop
//! limit on the way in, source address and interface pinning on the way out.

use crate::protocol::icmpv6::ROUTER_SOLICIT;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::mem;
use std::net::Ipv6Addr;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;

/// All-nodes multicast address, ff02::1
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// All-routers multicast address, ff02::2
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

// Not exposed by the libc crate
const IPV6_CHECKSUM: libc::c_int = 7;
const ICMP6_FILTER: libc::c_int = 1;

/// Offset of the checksum field within the ICMPv6 header; handing it to the
/// kernel makes it fill the checksum on transmit.
const CHECKSUM_OFFSET: libc::c_int = 2;

/// ICMPv6 type filter, one "block" bit per message type (netinet/icmp6.h)
#[repr(C)]
struct Icmp6Filter {
    data: [u32; 8],
}

impl Icmp6Filter {
    fn block_all() -> Self {
        Self { data: [!0u32; 8] }
    }

    fn pass(&mut self, msg_type: u8) {
        self.data[(msg_type >> 5) as usize] &= !(1u32 << (msg_type & 31));
    }
}

/// Result of an all-routers multicast join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    Fresh,
    AlreadyMember,
}

/// A received datagram, before any validation.
#[derive(Debug, Clone, Copy)]
pub struct RecvMeta {
    pub len: usize,
    pub src: Ipv6Addr,
    /// Hop limit from the IPV6_HOPLIMIT control message, if present
    pub hop_limit: Option<u8>,
}

pub struct Icmp6Socket {
    async_fd: AsyncFd<RawFd>,
}

impl Icmp6Socket {
    /// Open and configure the endpoint. Failure here is fatal for the daemon.
    pub fn open() -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET6,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::IPPROTO_ICMPV6,
            )
        };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        if let Err(e) = Self::configure(fd) {
            unsafe { libc::close(fd) };
            return Err(Error::Io(e));
        }

        let async_fd = AsyncFd::new(fd).map_err(Error::Io)?;
        Ok(Self { async_fd })
    }

    fn configure(fd: RawFd) -> io::Result<()> {
        // The kernel checksums ICMPv6 raw sockets on its own; the explicit
        // offset may be refused, which is fine.
        let _ = setsockopt_int(fd, libc::IPPROTO_RAW, IPV6_CHECKSUM, CHECKSUM_OFFSET);

        setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, 255)?;
        setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, 1)?;
        setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT, 1)?;

        let mut filter = Icmp6Filter::block_all();
        filter.pass(ROUTER_SOLICIT);
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_ICMPV6,
                ICMP6_FILTER,
                &filter as *const _ as *const libc::c_void,
                mem::size_of::<Icmp6Filter>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }

    /// Join the all-routers group on the given interface, distinguishing a
    /// fresh join from an idempotent one.
    pub fn join_all_routers(&self, ifindex: u32) -> io::Result<Joined> {
        let mreq = libc::ipv6_mreq {
            ipv6mr_multiaddr: libc::in6_addr {
                s6_addr: ALL_ROUTERS.octets(),
            },
            ipv6mr_interface: ifindex as libc::c_uint,
        };

        let ret = unsafe {
            libc::setsockopt(
                self.fd(),
                libc::IPPROTO_IPV6,
                libc::IPV6_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                mem::size_of::<libc::ipv6_mreq>() as libc::socklen_t,
            )
        };

        if ret == 0 {
            Ok(Joined::Fresh)
        } else {
            classify_join(io::Error::last_os_error())
        }
    }

    /// Bind the socket to the interface by name.
    pub fn bind_device(&self, ifname: &str) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd(),
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                ifname.as_ptr() as *const libc::c_void,
                ifname.len() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Query the interface hardware address.
    pub fn mac_addr(&self, ifname: &str) -> Result<MacAddr> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };
        let ifname_c = CString::new(ifname).map_err(|_| not_found())?;
        let name_bytes = ifname_c.as_bytes_with_nul();

        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(not_found());
        }
        ifr.ifr_name[..name_bytes.len()].copy_from_slice(unsafe {
            std::slice::from_raw_parts(
                name_bytes.as_ptr() as *const libc::c_char,
                name_bytes.len(),
            )
        });

        let ret = unsafe { libc::ioctl(self.fd(), libc::SIOCGIFHWADDR, &mut ifr) };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    /// Send a Router Advertisement payload to all-nodes, pinning the source
    /// address and the outgoing interface through IPV6_PKTINFO.
    pub fn send_advert(&self, payload: &[u8], src: &Ipv6Addr, ifindex: u32) -> io::Result<usize> {
        let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        addr.sin6_addr = libc::in6_addr {
            s6_addr: ALL_NODES.octets(),
        };
        addr.sin6_scope_id = ifindex;

        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };

        // u64 storage keeps the control buffer aligned for cmsghdr
        let mut cbuf = [0u64; 8];
        let control_len =
            unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as u32) } as usize;

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut addr as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control_len as _;

        let pktinfo = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr {
                s6_addr: src.octets(),
            },
            ipi6_ifindex: ifindex as _,
        };

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
            (*cmsg).cmsg_len =
                libc::CMSG_LEN(mem::size_of::<libc::in6_pktinfo>() as u32) as _;
            std::ptr::write_unaligned(
                libc::CMSG_DATA(cmsg) as *mut libc::in6_pktinfo,
                pktinfo,
            );
        }

        let n = unsafe { libc::sendmsg(self.fd(), &msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    /// Receive one datagram once the socket is readable.
    pub async fn recv_solicit(&self, buf: &mut [u8]) -> io::Result<RecvMeta> {
        loop {
            let mut guard = self.async_fd.readable().await?;
            match guard.try_io(|inner| recv_with_meta(*inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for Icmp6Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

impl Drop for Icmp6Socket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd()) };
    }
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            option,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn classify_join(err: io::Error) -> io::Result<Joined> {
    if err.raw_os_error() == Some(libc::EADDRINUSE) {
        Ok(Joined::AlreadyMember)
    } else {
        Err(err)
    }
}

fn recv_with_meta(fd: RawFd, buf: &mut [u8]) -> io::Result<RecvMeta> {
    let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut cbuf = [0u64; 64];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut addr as *mut _ as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = mem::size_of_val(&cbuf) as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(RecvMeta {
        len: n as usize,
        src: Ipv6Addr::from(addr.sin6_addr.s6_addr),
        hop_limit: unsafe { scan_hop_limit(&msg) },
    })
}

/// Scan the control messages of a received datagram for IPV6_HOPLIMIT.
unsafe fn scan_hop_limit(msg: &libc::msghdr) -> Option<u8> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        if (*cmsg).cmsg_level == libc::IPPROTO_IPV6 && (*cmsg).cmsg_type == libc::IPV6_HOPLIMIT {
            let hop_limit =
                std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::c_int);
            return u8::try_from(hop_limit).ok();
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_passes_only_requested_type() {
        let mut filter = Icmp6Filter::block_all();
        filter.pass(ROUTER_SOLICIT);

        let blocked = |t: u8| filter.data[(t >> 5) as usize] & (1 << (t & 31)) != 0;
        assert!(!blocked(133));
        assert!(blocked(134));
        assert!(blocked(128));
        assert!(blocked(0));
    }

    #[test]
    fn test_classify_join() {
        let already = io::Error::from_raw_os_error(libc::EADDRINUSE);
        assert_eq!(classify_join(already).unwrap(), Joined::AlreadyMember);

        let denied = io::Error::from_raw_os_error(libc::ENODEV);
        assert!(classify_join(denied).is_err());
    }

    #[test]
    fn test_hop_limit_cmsg_scan() {
        let mut cbuf = [0u64; 8];
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen =
            unsafe { libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as u32) } as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_HOPLIMIT;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::c_int, 255);

            assert_eq!(scan_hop_limit(&msg), Some(255));
        }
    }

    #[test]
    fn test_hop_limit_absent() {
        let msg: libc::msghdr = unsafe { mem::zeroed() };
        assert_eq!(unsafe { scan_hop_limit(&msg) }, None);
    }

    #[test]
    fn test_well_known_addresses() {
        assert_eq!(ALL_NODES.octets()[0], 0xff);
        assert_eq!(ALL_NODES.octets()[15], 0x01);
        assert_eq!(ALL_ROUTERS.octets()[15], 0x02);
    }
}
