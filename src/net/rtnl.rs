//! Rtnetlink event channel
//!
//! Subscribes to link and IPv6 address notifications and decodes just
//! enough of each message header to tell what kind of change happened and
//! which interface it concerns.

use crate::{Error, Result};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use tokio::io::unix::AsyncFd;

const NLMSG_HDRLEN: usize = mem::size_of::<libc::nlmsghdr>();
const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;

/// One decoded kernel notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtnlEvent {
    LinkNew { ifindex: u32 },
    LinkSet { ifindex: u32 },
    LinkDel { ifindex: u32 },
    AddrNew { ifindex: u32 },
    AddrDel { ifindex: u32 },
}

pub struct RtnlSocket {
    async_fd: AsyncFd<RawFd>,
}

impl RtnlSocket {
    /// Open a NETLINK_ROUTE socket bound to the link and IPv6-address
    /// multicast groups. Failure here is fatal for the daemon.
    pub fn open() -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::NETLINK_ROUTE,
            )
        };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = (libc::RTMGRP_LINK | libc::RTMGRP_IPV6_IFADDR) as u32;

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        let async_fd = AsyncFd::new(fd).map_err(Error::Io)?;
        Ok(Self { async_fd })
    }

    /// Receive one event buffer once the socket is readable.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.async_fd.readable().await?;
            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for RtnlSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for RtnlSocket {
    fn drop(&mut self) {
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

/// Iterator over the netlink messages framed in one received buffer.
///
/// NLMSG_DONE ends iteration, NLMSG_ERROR yields the fatal error, message
/// kinds the daemon does not care about are skipped, and a truncated header
/// or length ends iteration silently.
pub struct RtnlMessages<'a> {
    buf: &'a [u8],
}

impl<'a> RtnlMessages<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl Iterator for RtnlMessages<'_> {
    type Item = Result<RtnlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buf.len() < NLMSG_HDRLEN {
                return None;
            }

            // The header layout is fixed; alignment is not guaranteed inside
            // a packed receive buffer.
            let hdr: libc::nlmsghdr =
                unsafe { ptr::read_unaligned(self.buf.as_ptr() as *const libc::nlmsghdr) };

            let msg_len = hdr.nlmsg_len as usize;
            if msg_len < NLMSG_HDRLEN || msg_len > self.buf.len() {
                return None;
            }

            let payload = &self.buf[NLMSG_HDRLEN..msg_len];

            // Step to the next message, 4-byte aligned
            let aligned = (msg_len + 3) & !3;
            self.buf = if aligned >= self.buf.len() {
                &[]
            } else {
                &self.buf[aligned..]
            };

            match hdr.nlmsg_type {
                NLMSG_DONE => return None,
                NLMSG_ERROR => {
                    self.buf = &[];
                    return Some(Err(Error::Netlink(
                        "error message in event stream".into(),
                    )));
                }
                libc::RTM_NEWLINK | libc::RTM_SETLINK | libc::RTM_DELLINK => {
                    if payload.len() < mem::size_of::<libc::ifinfomsg>() {
                        continue;
                    }
                    let info: libc::ifinfomsg =
                        unsafe { ptr::read_unaligned(payload.as_ptr() as *const libc::ifinfomsg) };
                    let ifindex = info.ifi_index as u32;
                    let event = match hdr.nlmsg_type {
                        libc::RTM_NEWLINK => RtnlEvent::LinkNew { ifindex },
                        libc::RTM_SETLINK => RtnlEvent::LinkSet { ifindex },
                        _ => RtnlEvent::LinkDel { ifindex },
                    };
                    return Some(Ok(event));
                }
                libc::RTM_NEWADDR | libc::RTM_DELADDR => {
                    if payload.len() < mem::size_of::<libc::ifaddrmsg>() {
                        continue;
                    }
                    let info: libc::ifaddrmsg =
                        unsafe { ptr::read_unaligned(payload.as_ptr() as *const libc::ifaddrmsg) };
                    let event = if hdr.nlmsg_type == libc::RTM_NEWADDR {
                        RtnlEvent::AddrNew {
                            ifindex: info.ifa_index,
                        }
                    } else {
                        RtnlEvent::AddrDel {
                            ifindex: info.ifa_index,
                        }
                    };
                    return Some(Ok(event));
                }
                _ => continue,
            }
        }
    }
}
