use crate::buffer::ETHERTYPE_MPLS;
use crate::error::{Error, Result};
use crate::histogram::ETHER_HDR_SIZE;
use crate::structs::*;

use pnet::util::MacAddr;
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::vlan::VlanPacket;
use pnet_packet::Packet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::time::Duration;

const MPLS_LABEL_LEN: usize = 4;
const IPV6_FRAGMENT_HDR_LEN: usize = 8;

/// What one direction of a flow looked like on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointRecord {
    pub packets: u64,
    pub bytes: u64,
    pub mac: Option<MacAddr>,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub l3_proto: L3Protocol,
    pub l4_proto: L4Protocol,
    pub first_ts: Duration,
    pub last_ts: Duration,
    pub fwd: EndpointRecord,
    pub rev: EndpointRecord,
    pub closed: bool,
}

impl FlowRecord {
    fn new(profile: &FlowProfile) -> Self {
        FlowRecord {
            l3_proto: profile.l3_proto,
            l4_proto: profile.l4_proto,
            first_ts: Duration::ZERO,
            last_ts: Duration::ZERO,
            fwd: EndpointRecord::default(),
            rev: EndpointRecord::default(),
            closed: false,
        }
    }

    pub fn packets(&self) -> u64 {
        self.fwd.packets + self.rev.packets
    }
}

/// Addresses and ports read back from an emitted packet
#[derive(Debug, Clone, Copy, Default)]
struct PacketEndpoints {
    src_mac: Option<MacAddr>,
    dst_mac: Option<MacAddr>,
    src_ip: Option<IpAddr>,
    dst_ip: Option<IpAddr>,
    src_port: Option<u16>,
    dst_port: Option<u16>,
}

/// Accounting of the packets actually emitted, one record per flow
#[derive(Debug, Default)]
pub struct TrafficMeter {
    records: Vec<FlowRecord>,
}

impl TrafficMeter {
    pub fn new() -> Self {
        TrafficMeter::default()
    }

    /// Flow ids must be opened in sequence, starting from 0
    pub fn open_flow(&mut self, id: u64, profile: &FlowProfile) -> Result<()> {
        let expected = self.records.len() as u64;
        if id != expected {
            return Err(Error::UnexpectedFlowId { got: id, expected });
        }
        self.records.push(FlowRecord::new(profile));
        Ok(())
    }

    pub fn record_packet(
        &mut self,
        id: u64,
        time: Duration,
        direction: Direction,
        data: &[u8],
    ) -> Result<()> {
        let record = self.record_mut(id)?;
        if record.packets() == 0 {
            record.first_ts = time;
        }
        record.last_ts = time;

        let (own, other) = match direction {
            Direction::Reverse => (&mut record.rev, &mut record.fwd),
            _ => (&mut record.fwd, &mut record.rev),
        };
        if own.packets == 0 {
            let endpoints = parse_endpoints(data);
            own.mac = endpoints.src_mac;
            own.ip = endpoints.src_ip;
            own.port = endpoints.src_port;
            if other.packets == 0 {
                other.mac = endpoints.dst_mac;
                other.ip = endpoints.dst_ip;
                other.port = endpoints.dst_port;
            }
        }
        own.packets += 1;
        own.bytes += (data.len() as u64).saturating_sub(ETHER_HDR_SIZE);
        Ok(())
    }

    pub fn close_flow(&mut self, id: u64) -> Result<()> {
        self.record_mut(id)?.closed = true;
        Ok(())
    }

    pub fn records(&self) -> &[FlowRecord] {
        &self.records
    }

    fn record_mut(&mut self, id: u64) -> Result<&mut FlowRecord> {
        self.records
            .get_mut(id as usize)
            .ok_or(Error::UnknownFlowId(id))
    }

    /// Human readable report, one line per flow
    pub fn write_report(&self, out: &mut impl Write) -> Result<()> {
        for (id, record) in self.records.iter().enumerate() {
            writeln!(
                out,
                "Flow {id}: first_ts={}.{:06} last_ts={}.{:06} \
                 fwd_bytes={} fwd_pkts={} fwd_ip={} fwd_port={} \
                 rev_bytes={} rev_pkts={} rev_ip={} rev_port={}",
                record.first_ts.as_secs(),
                record.first_ts.subsec_micros(),
                record.last_ts.as_secs(),
                record.last_ts.subsec_micros(),
                record.fwd.bytes,
                record.fwd.packets,
                display_ip(record.fwd.ip),
                display_port(record.l4_proto, record.fwd.port),
                record.rev.bytes,
                record.rev.packets,
                display_ip(record.rev.ip),
                display_port(record.l4_proto, record.rev.port),
            )?;
        }
        Ok(())
    }

    pub fn write_report_csv(&self, out: &mut impl Write) -> Result<()> {
        writeln!(
            out,
            "SRC_IP,DST_IP,START_TIME,END_TIME,L3_PROTO,L4_PROTO,SRC_PORT,DST_PORT,PACKETS,BYTES,PACKETS_REV,BYTES_REV"
        )?;
        for record in self.records.iter() {
            writeln!(
                out,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                display_ip(record.fwd.ip),
                display_ip(record.rev.ip),
                format_millis(timestamp_to_micros(record.first_ts)?),
                format_millis(timestamp_to_micros(record.last_ts)?),
                record.l3_proto.get_protocol_number(),
                record.l4_proto.get_protocol_number(),
                record.fwd.port.unwrap_or(0),
                record.rev.port.unwrap_or(0),
                record.fwd.packets,
                record.fwd.bytes,
                record.rev.packets,
                record.rev.bytes,
            )?;
        }
        Ok(())
    }

    pub fn write_report_csv_file(&self, path: &str) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_report_csv(&mut out)?;
        out.flush()?;
        log::info!("Flow report written to {path}");
        Ok(())
    }
}

/// Microseconds since the epoch, failing outside of the signed 64-bit range
pub fn timestamp_to_micros(ts: Duration) -> Result<i64> {
    i64::try_from(ts.as_micros()).map_err(|_| Error::TimestampOverflow)
}

fn format_millis(usec: i64) -> String {
    format!("{}.{:03}", usec / 1000, usec % 1000)
}

fn display_ip(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string()).unwrap_or_default()
}

fn display_port(proto: L4Protocol, port: Option<u16>) -> String {
    format!("{proto}:{}", port.unwrap_or(0))
}

/// Read the outermost addresses and the transport ports, going through VLAN tags and MPLS labels
fn parse_endpoints(data: &[u8]) -> PacketEndpoints {
    let mut endpoints = PacketEndpoints::default();
    let Some(eth) = EthernetPacket::new(data) else {
        return endpoints;
    };
    endpoints.src_mac = Some(eth.get_source());
    endpoints.dst_mac = Some(eth.get_destination());

    let mut ether_type = eth.get_ethertype();
    let mut offset = EthernetPacket::minimum_packet_size();
    while ether_type == EtherTypes::Vlan {
        let Some(vlan) = data.get(offset..).and_then(VlanPacket::new) else {
            return endpoints;
        };
        ether_type = vlan.get_ethertype();
        offset += VlanPacket::minimum_packet_size();
    }
    if ether_type == ETHERTYPE_MPLS {
        // the bottom of stack label is followed by the network header, told apart by its version
        loop {
            let Some(label) = data.get(offset..offset + MPLS_LABEL_LEN) else {
                return endpoints;
            };
            offset += MPLS_LABEL_LEN;
            if label[2] & 0x01 != 0 {
                break;
            }
        }
        ether_type = match data.get(offset).map(|b| b >> 4) {
            Some(4) => EtherTypes::Ipv4,
            Some(6) => EtherTypes::Ipv6,
            _ => EtherType(0),
        };
    }

    let Some(network) = data.get(offset..) else {
        return endpoints;
    };
    let (next, transport) = match ether_type {
        EtherTypes::Ipv4 => {
            let Some(ip) = Ipv4Packet::new(network) else {
                return endpoints;
            };
            endpoints.src_ip = Some(ip.get_source().into());
            endpoints.dst_ip = Some(ip.get_destination().into());
            if ip.get_fragment_offset() != 0 {
                return endpoints;
            }
            let header_len = usize::from(ip.get_header_length()) * 4;
            (ip.get_next_level_protocol(), network.get(header_len..))
        }
        EtherTypes::Ipv6 => {
            let Some(ip) = Ipv6Packet::new(network) else {
                return endpoints;
            };
            endpoints.src_ip = Some(ip.get_source().into());
            endpoints.dst_ip = Some(ip.get_destination().into());
            let payload = ip.payload();
            if ip.get_next_header() == IpNextHeaderProtocols::Ipv6Frag {
                let Some(fragment) = payload.get(..IPV6_FRAGMENT_HDR_LEN) else {
                    return endpoints;
                };
                let fragment_offset = u16::from_be_bytes([fragment[2], fragment[3]]) >> 3;
                if fragment_offset != 0 {
                    return endpoints;
                }
                (
                    IpNextHeaderProtocol(fragment[0]),
                    network.get(Ipv6Packet::minimum_packet_size() + IPV6_FRAGMENT_HDR_LEN..),
                )
            } else {
                (
                    ip.get_next_header(),
                    network.get(Ipv6Packet::minimum_packet_size()..),
                )
            }
        }
        _ => return endpoints,
    };

    match (next, transport) {
        (IpNextHeaderProtocols::Tcp | IpNextHeaderProtocols::Udp, Some(t)) if t.len() >= 4 => {
            endpoints.src_port = Some(u16::from_be_bytes([t[0], t[1]]));
            endpoints.dst_port = Some(u16::from_be_bytes([t[2], t[3]]));
        }
        (IpNextHeaderProtocols::Icmp | IpNextHeaderProtocols::Icmpv6, _) => {
            endpoints.src_port = Some(0);
            endpoints.dst_port = Some(0);
        }
        _ => (),
    }
    endpoints
}
