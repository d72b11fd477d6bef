use std::cmp::Ordering;
use std::fmt::Display;
use std::net::IpAddr;
use std::time::Duration;

/// A network layer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum L3Protocol {
    #[default]
    Unknown,
    Ipv4,
    Ipv6,
}

impl L3Protocol {
    /// The number used for this protocol in profiles and reports
    pub fn get_protocol_number(&self) -> u8 {
        match self {
            L3Protocol::Unknown => 0,
            L3Protocol::Ipv4 => 4,
            L3Protocol::Ipv6 => 6,
        }
    }

    pub fn from_protocol_number(n: u8) -> L3Protocol {
        match n {
            4 => L3Protocol::Ipv4,
            6 => L3Protocol::Ipv6,
            _ => L3Protocol::Unknown,
        }
    }

    /// Whether an address belongs to this protocol family
    pub fn matches(&self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (L3Protocol::Ipv4, IpAddr::V4(_)) | (L3Protocol::Ipv6, IpAddr::V6(_))
        )
    }
}

impl Display for L3Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            L3Protocol::Unknown => write!(f, "unknown"),
            L3Protocol::Ipv4 => write!(f, "IPv4"),
            L3Protocol::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// A transport protocol (ICMP included)
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum L4Protocol {
    #[default]
    Unknown,
    TCP,
    UDP,
    ICMP,
    ICMPv6,
}

impl L4Protocol {
    pub fn get_protocol_number(&self) -> u8 {
        match self {
            L4Protocol::Unknown => 0,
            L4Protocol::TCP => 6,
            L4Protocol::UDP => 17,
            L4Protocol::ICMP => 1,
            L4Protocol::ICMPv6 => 58,
        }
    }

    pub fn from_protocol_number(n: u8) -> L4Protocol {
        match n {
            6 => L4Protocol::TCP,
            17 => L4Protocol::UDP,
            1 => L4Protocol::ICMP,
            58 => L4Protocol::ICMPv6,
            _ => L4Protocol::Unknown,
        }
    }
}

impl Display for L4Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            L4Protocol::Unknown => write!(f, "unknown"),
            L4Protocol::TCP => write!(f, "TCP"),
            L4Protocol::UDP => write!(f, "UDP"),
            L4Protocol::ICMP => write!(f, "ICMP"),
            L4Protocol::ICMPv6 => write!(f, "ICMPv6"),
        }
    }
}

/// The direction of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Not decided yet (only during planning)
    #[default]
    Unknown,
    /// client to server
    Forward,
    /// server to client
    Reverse,
}

/// Statistical summary of a flow, the input of the generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowProfile {
    pub start_time: Duration,
    pub end_time: Duration,
    pub l3_proto: L3Protocol,
    pub l4_proto: L4Protocol,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub packets: u64,
    pub bytes: u64,
    pub packets_rev: u64,
    pub bytes_rev: u64,
}

/// Direction and time of a packet returned by a flow alongside its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketExtraInfo {
    pub direction: Direction,
    pub time: Duration,
}

/// A packet, with a timestamp and some data
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

/// Used for packet ordering before pcap export
impl Ord for Packet {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.timestamp == other.timestamp {
            self.data.cmp(&other.data) // use data in case both timestamps are equal
        } else {
            self.timestamp.cmp(&other.timestamp)
        }
    }
}

impl PartialOrd for Packet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A batch of packets sent to the export thread
#[derive(Debug, Clone, Default)]
pub struct Packets {
    pub packets: Vec<Packet>,
}

impl Packets {
    pub fn with_capacity(capacity: usize) -> Self {
        Packets {
            packets: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.packets.iter().map(|p| p.data.len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn protocol_numbers() {
        for l4 in [
            L4Protocol::TCP,
            L4Protocol::UDP,
            L4Protocol::ICMP,
            L4Protocol::ICMPv6,
        ] {
            assert_eq!(L4Protocol::from_protocol_number(l4.get_protocol_number()), l4);
        }
        assert_eq!(L3Protocol::from_protocol_number(5), L3Protocol::Unknown);
        assert_eq!(L3Protocol::Ipv6.get_protocol_number(), 6);
    }

    #[test]
    fn address_family() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert!(L3Protocol::Ipv4.matches(&v4));
        assert!(!L3Protocol::Ipv4.matches(&v6));
        assert!(L3Protocol::Ipv6.matches(&v6));
        assert!(!L3Protocol::Unknown.matches(&v4));
    }

    #[test]
    fn packet_order() {
        let a = Packet {
            timestamp: Duration::from_millis(5),
            data: vec![2],
        };
        let b = Packet {
            timestamp: Duration::from_millis(5),
            data: vec![1],
        };
        let c = Packet {
            timestamp: Duration::from_millis(1),
            data: vec![9],
        };
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort();
        assert_eq!(v, vec![c, b, a]);
    }
}
