//! Kernel-facing sockets
//!
//! The raw ICMPv6 endpoint the daemon speaks NDP through, and the rtnetlink
//! channel it watches the interface with.

mod icmp6;
mod rtnl;

pub use icmp6::{Icmp6Socket, Joined, RecvMeta, ALL_NODES, ALL_ROUTERS};
pub use rtnl::{RtnlEvent, RtnlMessages, RtnlSocket};
