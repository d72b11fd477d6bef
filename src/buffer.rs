use crate::error::{Error, Result};

use pnet_packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use pnet_packet::icmp::{self, IcmpPacket};
use pnet_packet::icmpv6::{self, Icmpv6Packet};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet_packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet_packet::tcp::{self, MutableTcpPacket};
use pnet_packet::udp::{self, MutableUdpPacket};
use pnet_packet::vlan::MutableVlanPacket;
use std::net::IpAddr;
use std::ops::Range;

pub const ETHERNET_HDR_LEN: usize = 14;
pub const VLAN_HDR_LEN: usize = 4;
pub const MPLS_HDR_LEN: usize = 4;
pub const IPV4_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;
pub const IPV6_FRAGMENT_HDR_LEN: usize = 8;
pub const TCP_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
pub const ICMP_HDR_LEN: usize = 8;

pub(crate) const ETHERTYPE_MPLS: EtherType = EtherType(0x8847);

/// Kind of a header region of a packet buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Ethernet,
    Vlan,
    Mpls,
    Ipv4,
    Ipv6,
    Ipv6Fragment,
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    Payload,
    /// A slice of a fragmented datagram, opaque to the field computation
    Raw,
}

impl HeaderKind {
    fn ether_type(&self) -> Option<EtherType> {
        match self {
            HeaderKind::Vlan => Some(EtherTypes::Vlan),
            HeaderKind::Mpls => Some(ETHERTYPE_MPLS),
            HeaderKind::Ipv4 => Some(EtherTypes::Ipv4),
            HeaderKind::Ipv6 => Some(EtherTypes::Ipv6),
            _ => None,
        }
    }

    fn ip_protocol(&self) -> Option<IpNextHeaderProtocol> {
        match self {
            HeaderKind::Ipv6Fragment => Some(IpNextHeaderProtocols::Ipv6Frag),
            HeaderKind::Tcp => Some(IpNextHeaderProtocols::Tcp),
            HeaderKind::Udp => Some(IpNextHeaderProtocols::Udp),
            HeaderKind::Icmp => Some(IpNextHeaderProtocols::Icmp),
            HeaderKind::Icmpv6 => Some(IpNextHeaderProtocols::Icmpv6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpan {
    pub kind: HeaderKind,
    pub offset: usize,
    pub len: usize,
}

/// A packet under construction: contiguous bytes and the header regions layers appended to them.
///
/// Layers append zeroed regions in on-wire order and fill their own fields. Lengths, protocol
/// numbers and checksums that depend on other headers are filled by
/// [`PacketBuffer::compute_calculated_fields`], which can be called any number of times.
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
    headers: Vec<HeaderSpan>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        PacketBuffer::default()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.headers.clear();
    }

    /// Append a zeroed region and return it for filling
    pub fn push_header(&mut self, kind: HeaderKind, len: usize) -> &mut [u8] {
        let offset = self.data.len();
        self.data.resize(offset + len, 0);
        self.headers.push(HeaderSpan { kind, offset, len });
        &mut self.data[offset..]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn headers(&self) -> &[HeaderSpan] {
        &self.headers
    }

    /// Index of the first header of that kind
    pub fn find_header(&self, kind: HeaderKind) -> Option<usize> {
        self.headers.iter().position(|h| h.kind == kind)
    }

    /// Number of bytes from the network header to the end of the packet
    pub fn l3_len(&self) -> usize {
        self.headers
            .iter()
            .find(|h| matches!(h.kind, HeaderKind::Ipv4 | HeaderKind::Ipv6))
            .map_or(0, |h| self.data.len() - h.offset)
    }

    /// Keep the headers up to and including `header`, followed only by the `range` slice of
    /// the bytes that came after it
    pub fn cut_upper_data(&mut self, header: usize, range: Range<usize>) -> Result<()> {
        let span = *self
            .headers
            .get(header)
            .ok_or(Error::HeaderTooShort(HeaderKind::Raw))?;
        let upper_start = span.offset + span.len;
        let upper_len = self.data.len() - upper_start;
        if range.start > range.end || range.end > upper_len {
            return Err(Error::HeaderTooShort(HeaderKind::Raw));
        }

        self.data
            .copy_within(upper_start + range.start..upper_start + range.end, upper_start);
        self.data.truncate(upper_start + range.len());
        self.headers.truncate(header + 1);
        if !range.is_empty() {
            self.headers.push(HeaderSpan {
                kind: HeaderKind::Raw,
                offset: upper_start,
                len: range.len(),
            });
        }
        Ok(())
    }

    /// Fill the fields that depend on the surrounding headers
    pub fn compute_calculated_fields(&mut self) -> Result<()> {
        for i in 0..self.headers.len() {
            let span = self.headers[i];
            let next = self.headers.get(i + 1).map(|h| h.kind);
            match span.kind {
                HeaderKind::Ethernet => {
                    let mut eth = MutableEthernetPacket::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    if let Some(ether_type) = next.and_then(|k| k.ether_type()) {
                        eth.set_ethertype(ether_type);
                    }
                }
                HeaderKind::Vlan => {
                    let mut vlan = MutableVlanPacket::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    if let Some(ether_type) = next.and_then(|k| k.ether_type()) {
                        vlan.set_ethertype(ether_type);
                    }
                }
                HeaderKind::Mpls => {
                    let label = self.header_bytes_mut(&span)?;
                    if next == Some(HeaderKind::Mpls) {
                        label[2] &= !0x01;
                    } else {
                        label[2] |= 0x01;
                    }
                }
                HeaderKind::Ipv4 => {
                    let total_len = self.data.len() - span.offset;
                    let mut ip = MutableIpv4Packet::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    ip.set_total_length(total_len as u16);
                    if let Some(proto) = next.and_then(|k| k.ip_protocol()) {
                        ip.set_next_level_protocol(proto);
                    }
                    let checksum = ipv4::checksum(&ip.to_immutable());
                    ip.set_checksum(checksum);
                }
                HeaderKind::Ipv6 => {
                    let payload_len = self.data.len() - span.offset - IPV6_HDR_LEN;
                    let mut ip = MutableIpv6Packet::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    ip.set_payload_length(payload_len as u16);
                    if let Some(proto) = next.and_then(|k| k.ip_protocol()) {
                        ip.set_next_header(proto);
                    }
                }
                HeaderKind::Ipv6Fragment => {
                    let proto = next.and_then(|k| k.ip_protocol());
                    let header = self.header_bytes_mut(&span)?;
                    if let Some(proto) = proto {
                        header[0] = proto.0;
                    }
                }
                HeaderKind::Tcp => {
                    let (src, dst) = self.enclosing_addresses(i)?;
                    let mut tcp = MutableTcpPacket::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    let checksum = match (src, dst) {
                        (IpAddr::V4(src), IpAddr::V4(dst)) => {
                            tcp::ipv4_checksum(&tcp.to_immutable(), &src, &dst)
                        }
                        (IpAddr::V6(src), IpAddr::V6(dst)) => {
                            tcp::ipv6_checksum(&tcp.to_immutable(), &src, &dst)
                        }
                        _ => 0,
                    };
                    tcp.set_checksum(checksum);
                }
                HeaderKind::Udp => {
                    let (src, dst) = self.enclosing_addresses(i)?;
                    let udp_len = self.data.len() - span.offset;
                    let mut udp = MutableUdpPacket::new(&mut self.data[span.offset..])
                        .ok_or(Error::HeaderTooShort(span.kind))?;
                    udp.set_length(udp_len as u16);
                    let checksum = match (src, dst) {
                        (IpAddr::V4(src), IpAddr::V4(dst)) => {
                            udp::ipv4_checksum(&udp.to_immutable(), &src, &dst)
                        }
                        (IpAddr::V6(src), IpAddr::V6(dst)) => {
                            udp::ipv6_checksum(&udp.to_immutable(), &src, &dst)
                        }
                        _ => 0,
                    };
                    udp.set_checksum(checksum);
                }
                HeaderKind::Icmp => {
                    let checksum = {
                        let icmp = IcmpPacket::new(&self.data[span.offset..])
                            .ok_or(Error::HeaderTooShort(span.kind))?;
                        icmp::checksum(&icmp)
                    };
                    self.data[span.offset + 2..span.offset + 4]
                        .copy_from_slice(&checksum.to_be_bytes());
                }
                HeaderKind::Icmpv6 => {
                    let (IpAddr::V6(src), IpAddr::V6(dst)) = self.enclosing_addresses(i)? else {
                        continue;
                    };
                    let checksum = {
                        let icmp = Icmpv6Packet::new(&self.data[span.offset..])
                            .ok_or(Error::HeaderTooShort(span.kind))?;
                        icmpv6::checksum(&icmp, &src, &dst)
                    };
                    self.data[span.offset + 2..span.offset + 4]
                        .copy_from_slice(&checksum.to_be_bytes());
                }
                HeaderKind::Payload | HeaderKind::Raw => (),
            }
        }
        Ok(())
    }

    fn header_bytes_mut(&mut self, span: &HeaderSpan) -> Result<&mut [u8]> {
        self.data
            .get_mut(span.offset..span.offset + span.len)
            .ok_or(Error::HeaderTooShort(span.kind))
    }

    /// Source and destination of the network header, once it is built
    pub fn network_addresses(&self) -> Option<(IpAddr, IpAddr)> {
        self.enclosing_addresses(self.headers.len()).ok()
    }

    /// Source and destination of the closest network header before `header`
    fn enclosing_addresses(&self, header: usize) -> Result<(IpAddr, IpAddr)> {
        let span = self.headers[..header]
            .iter()
            .rev()
            .find(|h| matches!(h.kind, HeaderKind::Ipv4 | HeaderKind::Ipv6))
            .ok_or(Error::HeaderTooShort(HeaderKind::Ipv4))?;
        let bytes = &self.data[span.offset..];
        if span.kind == HeaderKind::Ipv4 {
            let ip = Ipv4Packet::new(bytes).ok_or(Error::HeaderTooShort(span.kind))?;
            Ok((ip.get_source().into(), ip.get_destination().into()))
        } else {
            let ip = Ipv6Packet::new(bytes).ok_or(Error::HeaderTooShort(span.kind))?;
            Ok((ip.get_source().into(), ip.get_destination().into()))
        }
    }
}

/// Write an MPLS label stack entry. The bottom-of-stack bit is computed later.
pub fn write_mpls(header: &mut [u8], label: u32, ttl: u8) {
    let entry = ((label & 0xf_ffff) << 12) | u32::from(ttl);
    header[..MPLS_HDR_LEN].copy_from_slice(&entry.to_be_bytes());
}

/// Write an IPv6 fragment extension header. The next header field is computed later.
pub fn write_ipv6_fragment(header: &mut [u8], offset: usize, more: bool, ident: u32) {
    let offset_flags = (((offset / 8) as u16) << 3) | u16::from(more);
    header[1] = 0;
    header[2..4].copy_from_slice(&offset_flags.to_be_bytes());
    header[4..8].copy_from_slice(&ident.to_be_bytes());
}
