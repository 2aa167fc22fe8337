//! NDP messages - RFC 4861, RDNSS option - RFC 8106

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv6Addr;

/// ICMPv6 Router Solicitation message type
pub const ROUTER_SOLICIT: u8 = 133;
/// ICMPv6 Router Advertisement message type
pub const ROUTER_ADVERT: u8 = 134;

/// RS message size including the ICMPv6 header (type, code, checksum, reserved)
pub const RS_HEADER_SIZE: usize = 8;
/// RA message size including the ICMPv6 header, before options
pub const RA_HEADER_SIZE: usize = 16;
/// Prefix Information option size (32 bytes including type and length)
pub const PREFIX_INFO_SIZE: usize = 32;

/// NDP option types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NdpOptionType {
    SourceLinkLayerAddress = 1,
    PrefixInformation = 3,
    Rdnss = 25,
}

/// Cursor over the options trailing an NDP message body.
///
/// Options are framed as (type, length) with the length in units of 8 bytes.
/// The cursor is strict: a zero length, a declared length overrunning the
/// buffer, or a trailing fragment shorter than one option unit is an error,
/// and the walk must consume the buffer exactly.
pub struct NdpOptions<'a> {
    buf: &'a [u8],
}

impl<'a> NdpOptions<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for NdpOptions<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        if self.buf.len() < 8 {
            self.buf = &[];
            return Some(Err(Error::Parse("truncated NDP option".into())));
        }

        let opt_len = self.buf[1] as usize * 8;
        if opt_len == 0 {
            self.buf = &[];
            return Some(Err(Error::Parse("zero-length NDP option".into())));
        }
        if opt_len > self.buf.len() {
            self.buf = &[];
            return Some(Err(Error::Parse("NDP option overruns buffer".into())));
        }

        let (opt, rest) = self.buf.split_at(opt_len);
        self.buf = rest;
        Some(Ok((opt[0], opt)))
    }
}

/// Router Solicitation message (RFC 4861 Section 4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSolicitation {
    pub source_link_addr: Option<MacAddr>,
}

impl RouterSolicitation {
    /// Validate a received RS, `buffer` being the whole ICMPv6 message.
    ///
    /// `src` is the IPv6 source address of the datagram: a solicitation that
    /// carries a Source Link-Layer Address option from the unspecified
    /// address is invalid (RFC 4861 Section 6.1.1).
    pub fn validate(buffer: &[u8], src: &Ipv6Addr) -> Result<Self> {
        if buffer.len() < RS_HEADER_SIZE {
            return Err(Error::Parse("Router Solicitation too short".into()));
        }
        if buffer[0] != ROUTER_SOLICIT || buffer[1] != 0 {
            return Err(Error::Parse("not a Router Solicitation".into()));
        }

        let mut source_link_addr = None;
        for opt in NdpOptions::new(&buffer[RS_HEADER_SIZE..]) {
            let (opt_type, data) = opt?;
            if opt_type == NdpOptionType::SourceLinkLayerAddress as u8 {
                if src.is_unspecified() {
                    return Err(Error::Parse(
                        "link-layer address option from unspecified source".into(),
                    ));
                }
                let mac: [u8; 6] = data[2..8].try_into().unwrap();
                source_link_addr = Some(MacAddr(mac));
            }
        }

        Ok(Self { source_link_addr })
    }

    /// Build RS message bytes (for tests and loopback tooling)
    pub fn to_bytes(&self) -> Vec<u8> {
        let option_len = if self.source_link_addr.is_some() {
            8
        } else {
            0
        };
        let mut buf = vec![0u8; RS_HEADER_SIZE + option_len];

        buf[0] = ROUTER_SOLICIT;
        // Code, checksum and reserved stay zero

        if let Some(mac) = &self.source_link_addr {
            buf[8] = NdpOptionType::SourceLinkLayerAddress as u8;
            buf[9] = 1; // Length in units of 8 bytes
            buf[10..16].copy_from_slice(&mac.0);
        }

        buf
    }
}

/// Prefix Information option (RFC 4861 Section 4.6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix_length: u8,
    pub on_link_flag: bool,
    pub autonomous_flag: bool,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub prefix: Ipv6Addr,
}

impl PrefixInformation {
    pub fn new(
        prefix: Ipv6Addr,
        prefix_length: u8,
        on_link_flag: bool,
        autonomous_flag: bool,
        valid_lifetime: u32,
        preferred_lifetime: u32,
    ) -> Self {
        Self {
            prefix_length,
            on_link_flag,
            autonomous_flag,
            valid_lifetime,
            preferred_lifetime,
            prefix,
        }
    }

    /// Parse from option data (including type and length bytes)
    pub fn parse(data: &[u8]) -> Result<Self> {
        // Type must be 3, length must be 4 (32 bytes / 8)
        if data.len() < PREFIX_INFO_SIZE
            || data[0] != NdpOptionType::PrefixInformation as u8
            || data[1] != 4
        {
            return Err(Error::Parse("invalid Prefix Information option".into()));
        }

        let prefix_length = data[2];
        let flags = data[3];
        let valid_lifetime = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let preferred_lifetime = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        // Bytes 12-15 are reserved
        let prefix_bytes: [u8; 16] = data[16..32].try_into().unwrap();

        Ok(Self {
            prefix_length,
            on_link_flag: (flags & 0x80) != 0,
            autonomous_flag: (flags & 0x40) != 0,
            valid_lifetime,
            preferred_lifetime,
            prefix: Ipv6Addr::from(prefix_bytes),
        })
    }

    /// Serialize to bytes (32 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PREFIX_INFO_SIZE];

        buf[0] = NdpOptionType::PrefixInformation as u8;
        buf[1] = 4; // Length in 8-byte units
        buf[2] = self.prefix_length;

        let mut flags: u8 = 0;
        if self.on_link_flag {
            flags |= 0x80;
        }
        if self.autonomous_flag {
            flags |= 0x40;
        }
        buf[3] = flags;

        buf[4..8].copy_from_slice(&self.valid_lifetime.to_be_bytes());
        buf[8..12].copy_from_slice(&self.preferred_lifetime.to_be_bytes());
        // Bytes 12-15 reserved (already zero)
        buf[16..32].copy_from_slice(&self.prefix.octets());

        buf
    }
}

/// Router Advertisement message (RFC 4861 Section 4.2)
///
/// The checksum field is left zero; the sending socket hands the kernel the
/// checksum offset so it is filled on transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAdvertisement {
    pub cur_hop_limit: u8,
    pub managed_flag: bool,
    pub other_flag: bool,
    pub router_lifetime: u16,
    pub reachable_time: u32,
    pub retrans_timer: u32,
    pub source_link_addr: Option<MacAddr>,
    pub prefixes: Vec<PrefixInformation>,
    pub rdnss: Vec<Ipv6Addr>,
    pub rdnss_lifetime: u32,
}

impl RouterAdvertisement {
    pub fn new(cur_hop_limit: u8, router_lifetime: u16) -> Self {
        Self {
            cur_hop_limit,
            managed_flag: false,
            other_flag: false,
            router_lifetime,
            reachable_time: 0,
            retrans_timer: 0,
            source_link_addr: None,
            prefixes: Vec::new(),
            rdnss: Vec::new(),
            rdnss_lifetime: 0,
        }
    }

    pub fn with_source_link_addr(mut self, mac: MacAddr) -> Self {
        self.source_link_addr = Some(mac);
        self
    }

    pub fn with_prefix(mut self, prefix: PrefixInformation) -> Self {
        self.prefixes.push(prefix);
        self
    }

    pub fn with_rdnss(mut self, servers: Vec<Ipv6Addr>, lifetime: u32) -> Self {
        self.rdnss = servers;
        self.rdnss_lifetime = lifetime;
        self
    }

    /// Build the complete ICMPv6 message
    pub fn to_bytes(&self) -> Vec<u8> {
        let slla_len = if self.source_link_addr.is_some() {
            8
        } else {
            0
        };
        let prefix_len = self.prefixes.len() * PREFIX_INFO_SIZE;
        let rdnss_len = if self.rdnss.is_empty() {
            0
        } else {
            8 + self.rdnss.len() * 16
        };
        let total = RA_HEADER_SIZE + slla_len + prefix_len + rdnss_len;

        let mut buf = vec![0u8; total];

        buf[0] = ROUTER_ADVERT;
        // Code: 0; checksum: left for the kernel
        buf[4] = self.cur_hop_limit;
        let mut flags: u8 = 0;
        if self.managed_flag {
            flags |= 0x80;
        }
        if self.other_flag {
            flags |= 0x40;
        }
        buf[5] = flags;
        buf[6..8].copy_from_slice(&self.router_lifetime.to_be_bytes());
        buf[8..12].copy_from_slice(&self.reachable_time.to_be_bytes());
        buf[12..16].copy_from_slice(&self.retrans_timer.to_be_bytes());

        let mut offset = RA_HEADER_SIZE;

        if let Some(mac) = &self.source_link_addr {
            buf[offset] = NdpOptionType::SourceLinkLayerAddress as u8;
            buf[offset + 1] = 1;
            buf[offset + 2..offset + 8].copy_from_slice(&mac.0);
            offset += 8;
        }

        for prefix in &self.prefixes {
            buf[offset..offset + PREFIX_INFO_SIZE].copy_from_slice(&prefix.to_bytes());
            offset += PREFIX_INFO_SIZE;
        }

        // RDNSS option (RFC 8106): reserved, lifetime, then packed addresses
        if !self.rdnss.is_empty() {
            buf[offset] = NdpOptionType::Rdnss as u8;
            buf[offset + 1] = (1 + self.rdnss.len() * 2) as u8;
            buf[offset + 4..offset + 8].copy_from_slice(&self.rdnss_lifetime.to_be_bytes());
            let mut addr_offset = offset + 8;
            for addr in &self.rdnss {
                buf[addr_offset..addr_offset + 16].copy_from_slice(&addr.octets());
                addr_offset += 16;
            }
        }

        buf
    }

    /// Parse a complete ICMPv6 RA message
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < RA_HEADER_SIZE {
            return Err(Error::Parse("Router Advertisement too short".into()));
        }
        if buffer[0] != ROUTER_ADVERT || buffer[1] != 0 {
            return Err(Error::Parse("not a Router Advertisement".into()));
        }

        let flags = buffer[5];
        let mut ra = Self {
            cur_hop_limit: buffer[4],
            managed_flag: (flags & 0x80) != 0,
            other_flag: (flags & 0x40) != 0,
            router_lifetime: u16::from_be_bytes([buffer[6], buffer[7]]),
            reachable_time: u32::from_be_bytes([buffer[8], buffer[9], buffer[10], buffer[11]]),
            retrans_timer: u32::from_be_bytes([buffer[12], buffer[13], buffer[14], buffer[15]]),
            source_link_addr: None,
            prefixes: Vec::new(),
            rdnss: Vec::new(),
            rdnss_lifetime: 0,
        };

        for opt in NdpOptions::new(&buffer[RA_HEADER_SIZE..]) {
            let (opt_type, data) = opt?;
            match opt_type {
                t if t == NdpOptionType::SourceLinkLayerAddress as u8 => {
                    let mac: [u8; 6] = data[2..8].try_into().unwrap();
                    ra.source_link_addr = Some(MacAddr(mac));
                }
                t if t == NdpOptionType::PrefixInformation as u8 => {
                    ra.prefixes.push(PrefixInformation::parse(data)?);
                }
                t if t == NdpOptionType::Rdnss as u8 => {
                    if data.len() < 24 {
                        return Err(Error::Parse("RDNSS option too short".into()));
                    }
                    ra.rdnss_lifetime =
                        u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                    for chunk in data[8..].chunks_exact(16) {
                        let bytes: [u8; 16] = chunk.try_into().unwrap();
                        ra.rdnss.push(Ipv6Addr::from(bytes));
                    }
                }
                _ => {}
            }
        }

        Ok(ra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rs_packet() -> Vec<u8> {
        // Router Solicitation with a source link-layer address option
        vec![
            0x85, // Type: RS (133)
            0x00, // Code: 0
            0x00, 0x00, // Checksum (placeholder)
            0x00, 0x00, 0x00, 0x00, // Reserved
            // Option: Source Link-Layer Address
            0x01, // Type: 1
            0x01, // Length: 1 (8 bytes)
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // MAC
        ]
    }

    fn link_local() -> Ipv6Addr {
        "fe80::1".parse().unwrap()
    }

    #[test]
    fn test_rs_validate_with_slla() {
        let rs = RouterSolicitation::validate(&make_rs_packet(), &link_local()).unwrap();
        assert_eq!(
            rs.source_link_addr,
            Some(MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
        );
    }

    #[test]
    fn test_rs_validate_empty_options() {
        let rs = RouterSolicitation::validate(&make_rs_packet()[..8], &link_local()).unwrap();
        assert_eq!(rs.source_link_addr, None);
    }

    #[test]
    fn test_rs_validate_too_short() {
        let data = vec![0x85, 0x00, 0x00, 0x00];
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_wrong_type() {
        let mut data = make_rs_packet();
        data[0] = 134;
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_nonzero_code() {
        let mut data = make_rs_packet();
        data[1] = 1;
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_zero_length_option() {
        let mut data = make_rs_packet();
        data[9] = 0;
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_option_overrun() {
        let mut data = make_rs_packet();
        data[9] = 2; // Claims 16 bytes, only 8 remain
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_trailing_fragment() {
        let mut data = make_rs_packet();
        data.extend_from_slice(&[0x01, 0x01, 0x00]); // 3 stray bytes
        assert!(RouterSolicitation::validate(&data, &link_local()).is_err());
    }

    #[test]
    fn test_rs_validate_slla_from_unspecified() {
        let unspecified = Ipv6Addr::UNSPECIFIED;
        assert!(RouterSolicitation::validate(&make_rs_packet(), &unspecified).is_err());
    }

    #[test]
    fn test_rs_validate_no_slla_from_unspecified() {
        // An RS without options is valid even from ::
        let unspecified = Ipv6Addr::UNSPECIFIED;
        let rs = RouterSolicitation::validate(&make_rs_packet()[..8], &unspecified).unwrap();
        assert_eq!(rs.source_link_addr, None);
    }

    #[test]
    fn test_rs_roundtrip() {
        let original = RouterSolicitation {
            source_link_addr: Some(MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])),
        };
        let bytes = original.to_bytes();
        let parsed = RouterSolicitation::validate(&bytes, &link_local()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_ndp_options_walk() {
        let buf = [
            0x01, 0x01, 1, 2, 3, 4, 5, 6, // SLLA
            0x0e, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // unknown, 16 bytes
        ];
        let opts: Vec<_> = NdpOptions::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].0, 1);
        assert_eq!(opts[0].1.len(), 8);
        assert_eq!(opts[1].0, 0x0e);
        assert_eq!(opts[1].1.len(), 16);
    }

    #[test]
    fn test_ra_header_layout() {
        let ra = RouterAdvertisement::new(64, 1800)
            .with_source_link_addr(MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
        let bytes = ra.to_bytes();

        assert_eq!(bytes[0], 134); // Type
        assert_eq!(bytes[1], 0); // Code
        assert_eq!(&bytes[2..4], &[0, 0]); // Checksum left to the kernel
        assert_eq!(bytes[4], 64); // Cur hop limit
        assert_eq!(bytes[5], 0); // M/O clear
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 1800);
        assert_eq!(&bytes[8..16], &[0u8; 8]); // Reachable + retrans
        assert_eq!(bytes[16], 1); // SLLA type
        assert_eq!(bytes[17], 1); // SLLA length
        assert_eq!(&bytes[18..24], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn test_ra_prefix_option_layout() {
        let ra = RouterAdvertisement::new(64, 0)
            .with_source_link_addr(MacAddr::ZERO)
            .with_prefix(PrefixInformation::new(
                "2001:db8:1::".parse().unwrap(),
                64,
                true,
                true,
                86400,
                14400,
            ));
        let bytes = ra.to_bytes();
        let pio = &bytes[24..56];

        assert_eq!(pio[0], 3); // Type
        assert_eq!(pio[1], 4); // Length (4 * 8 bytes)
        assert_eq!(pio[2], 64); // Prefix length
        assert_eq!(pio[3], 0xc0); // L + A
        assert_eq!(u32::from_be_bytes([pio[4], pio[5], pio[6], pio[7]]), 86400);
        assert_eq!(u32::from_be_bytes([pio[8], pio[9], pio[10], pio[11]]), 14400);
        assert_eq!(&pio[12..16], &[0u8; 4]); // Reserved
        assert_eq!(
            &pio[16..32],
            &"2001:db8:1::".parse::<Ipv6Addr>().unwrap().octets()
        );
    }

    #[test]
    fn test_ra_prefix_flags_slaac_only() {
        let ra = RouterAdvertisement::new(64, 0).with_prefix(PrefixInformation::new(
            "2001:db8::".parse().unwrap(),
            64,
            false,
            true,
            86400,
            14400,
        ));
        let bytes = ra.to_bytes();
        assert_eq!(bytes[RA_HEADER_SIZE + 3], 0x40); // A only
    }

    #[test]
    fn test_ra_rdnss_option_layout() {
        let dns1: Ipv6Addr = "2001:4860:4860::8888".parse().unwrap();
        let dns2: Ipv6Addr = "2001:4860:4860::8844".parse().unwrap();
        let ra = RouterAdvertisement::new(64, 0).with_rdnss(vec![dns1, dns2], 1200);
        let bytes = ra.to_bytes();
        let rdnss = &bytes[RA_HEADER_SIZE..];

        assert_eq!(rdnss[0], 25); // Type
        assert_eq!(rdnss[1], 5); // 1 + 2 * 2 addresses
        assert_eq!(&rdnss[2..4], &[0, 0]); // Reserved
        assert_eq!(u32::from_be_bytes([rdnss[4], rdnss[5], rdnss[6], rdnss[7]]), 1200);
        // Configuration order is preserved on the wire
        assert_eq!(&rdnss[8..24], &dns1.octets());
        assert_eq!(&rdnss[24..40], &dns2.octets());
    }

    #[test]
    fn test_ra_without_rdnss_has_no_option() {
        let ra = RouterAdvertisement::new(64, 0).with_source_link_addr(MacAddr::ZERO);
        assert_eq!(ra.to_bytes().len(), RA_HEADER_SIZE + 8);
    }

    #[test]
    fn test_ra_roundtrip() {
        let original = RouterAdvertisement::new(64, 1800)
            .with_source_link_addr(MacAddr([0x02, 0x00, 0x00, 0xaa, 0xbb, 0xcc]))
            .with_prefix(PrefixInformation::new(
                "2001:db8:1::".parse().unwrap(),
                64,
                true,
                true,
                86400,
                14400,
            ))
            .with_prefix(PrefixInformation::new(
                "2001:db8:2::".parse().unwrap(),
                64,
                false,
                true,
                3600,
                1800,
            ))
            .with_rdnss(vec!["2001:4860:4860::8888".parse().unwrap()], 1200);

        let parsed = RouterAdvertisement::parse(&original.to_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_ra_zero_lifetime_roundtrip() {
        let original = RouterAdvertisement::new(64, 0)
            .with_source_link_addr(MacAddr::ZERO)
            .with_prefix(PrefixInformation::new(
                "fd00::".parse().unwrap(),
                64,
                true,
                true,
                86400,
                14400,
            ));
        let parsed = RouterAdvertisement::parse(&original.to_bytes()).unwrap();
        assert_eq!(parsed.router_lifetime, 0);
        assert_eq!(parsed, original);
    }
}
