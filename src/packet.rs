use crate::structs::Direction;

use std::collections::BTreeMap;
use std::time::Duration;

/// A slice of a fragmented datagram. `offset` and `len` count bytes after the network header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub len: usize,
    pub more: bool,
}

/// Parameters a layer stores in a planned packet to build its header later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerParams {
    /// The layer takes part in the packet but keeps no per-packet state
    None,
    Ipv4 {
        identification: u16,
        fragment: Option<Fragment>,
    },
    Ipv6 {
        identification: u32,
        fragment: Option<Fragment>,
    },
    Tcp {
        flags: u8,
        sequence: u32,
        acknowledgement: u32,
    },
    Payload {
        seed: u64,
    },
    IcmpEcho {
        request: bool,
        sequence: u16,
        seed: u64,
    },
    IcmpRandom {
        icmp_type: u8,
        code: u8,
        seed: u64,
    },
}

/// A packet of a flow before it is turned into bytes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedPacket {
    pub direction: Direction,
    pub timestamp: Duration,
    /// Size of the network layer datagram
    pub size: u64,
    /// The size was fixed by a layer and must not be drawn
    pub is_finished: bool,
    /// Second and following fragments of a datagram
    pub is_continuation: bool,
    /// Layer index to its parameters, only for the layers taking part in this packet
    pub layers: BTreeMap<usize, LayerParams>,
}

impl PlannedPacket {
    pub fn params(&self, layer: usize) -> Option<&LayerParams> {
        self.layers.get(&layer)
    }

    /// Extension header bytes added to the datagram when it is fragmented
    pub fn fragment_overhead(&self) -> u64 {
        let fragmented_v6 = self.layers.values().any(|params| {
            matches!(
                params,
                LayerParams::Ipv6 {
                    fragment: Some(_),
                    ..
                }
            )
        });
        if fragmented_v6 {
            crate::buffer::IPV6_FRAGMENT_HDR_LEN as u64
        } else {
            0
        }
    }
}

/// View over the planned packets of a flow, in flow order, optionally skipping the packets a
/// layer already finished
pub struct PacketFlowSpan<'a> {
    packets: &'a mut [PlannedPacket],
    skip_finished: bool,
}

impl<'a> PacketFlowSpan<'a> {
    pub fn new(packets: &'a mut [PlannedPacket], skip_finished: bool) -> Self {
        PacketFlowSpan {
            packets,
            skip_finished,
        }
    }

    /// How many forward and reverse packets are still to be assigned, given the flow totals
    pub fn available_directions(&self, fwd_packets: u64, rev_packets: u64) -> (u64, u64) {
        let (mut fwd, mut rev) = (0, 0);
        for packet in self.packets.iter() {
            match packet.direction {
                Direction::Forward => fwd += 1,
                Direction::Reverse => rev += 1,
                Direction::Unknown => (),
            }
        }
        (
            fwd_packets.saturating_sub(fwd),
            rev_packets.saturating_sub(rev),
        )
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedPacket> {
        let skip = self.skip_finished;
        self.packets.iter().filter(move |p| !(skip && p.is_finished))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlannedPacket> {
        let skip = self.skip_finished;
        self.packets
            .iter_mut()
            .filter(move |p| !(skip && p.is_finished))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(direction: Direction, is_finished: bool) -> PlannedPacket {
        PlannedPacket {
            direction,
            is_finished,
            ..Default::default()
        }
    }

    #[test]
    fn span_skips_finished_packets() {
        let mut packets = vec![
            packet(Direction::Forward, true),
            packet(Direction::Unknown, false),
            packet(Direction::Reverse, true),
            packet(Direction::Unknown, false),
        ];
        let mut span = PacketFlowSpan::new(&mut packets, true);
        assert_eq!(span.len(), 2);
        assert_eq!(span.available_directions(3, 2), (2, 1));
        for p in span.iter_mut() {
            p.size = 7;
        }
        assert_eq!(packets[0].size, 0);
        assert_eq!(packets[1].size, 7);
        assert_eq!(packets[3].size, 7);

        let span = PacketFlowSpan::new(&mut packets, false);
        assert_eq!(span.len(), 4);
    }

    #[test]
    fn exhausted_directions_saturate() {
        let mut packets = vec![packet(Direction::Forward, true); 3];
        let span = PacketFlowSpan::new(&mut packets, true);
        assert_eq!(span.available_directions(1, 0), (0, 0));
        assert!(span.is_empty());
    }
}
