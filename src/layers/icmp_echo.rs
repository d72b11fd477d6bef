use super::*;
use crate::buffer::{HeaderKind, ICMP_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use rand::seq::SliceRandom;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Largest datagram an IP header can describe
const MAX_ECHO_SIZE: u64 = u16::MAX as u64;

/// Packets of one echo exchange, in sending order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    /// Request from the client answered by the server
    Pair,
    /// Request without a reply, sent from one side
    Lone(Direction),
}

/// Echo requests from the client, answered by replies from the server
#[derive(Debug, Clone)]
pub struct IcmpEcho {
    v6: bool,
    identifier: u16,
}

impl IcmpEcho {
    pub fn new() -> Self {
        IcmpEcho {
            v6: false,
            identifier: 0,
        }
    }

    pub fn new_v6() -> Self {
        IcmpEcho {
            v6: true,
            identifier: 0,
        }
    }

    fn header_kind(&self) -> HeaderKind {
        if self.v6 {
            HeaderKind::Icmpv6
        } else {
            HeaderKind::Icmp
        }
    }
}

impl Default for IcmpEcho {
    fn default() -> Self {
        IcmpEcho::new()
    }
}

impl Layer for IcmpEcho {
    fn kind(&self) -> LayerKind {
        if self.v6 {
            LayerKind::Icmpv6Echo
        } else {
            LayerKind::IcmpEcho
        }
    }

    fn l3_overhead(&self) -> usize {
        ICMP_HDR_LEN
    }

    /// Pin the directions as request/reply pairs. Paired packets share one size, the average
    /// size of the flow, and are finished. The unpaired packets are requests whose size is left
    /// to the size generator.
    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.identifier = ctx.rng.gen();
        ctx.set_params(|rng, _| LayerParams::IcmpEcho {
            request: true,
            sequence: 0,
            seed: rng.gen(),
        });

        let (fwd, rev) = (ctx.fwd_packets, ctx.rev_packets);
        let pairs = fwd.min(rev);
        let lone_direction = if fwd > rev {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        let mut exchanges = vec![Exchange::Pair; pairs as usize];
        exchanges.extend(
            std::iter::repeat(Exchange::Lone(lone_direction)).take(fwd.abs_diff(rev) as usize),
        );
        exchanges.shuffle(&mut *ctx.rng);

        let total_pkts = fwd + rev;
        let avg_size = if total_pkts > 0 {
            (ctx.fwd_bytes + ctx.rev_bytes) / total_pkts
        } else {
            0
        };
        let pair_size = avg_size.max(ctx.overhead_through()).min(MAX_ECHO_SIZE);

        let mut packets = ctx.packets.iter_mut();
        for exchange in exchanges {
            match exchange {
                Exchange::Pair => {
                    for (direction, request) in
                        [(Direction::Forward, true), (Direction::Reverse, false)]
                    {
                        let Some(packet) = packets.next() else {
                            return Ok(());
                        };
                        packet.direction = direction;
                        packet.size = pair_size;
                        packet.is_finished = true;
                        set_request(packet, ctx.index, request);
                    }
                }
                Exchange::Lone(direction) => {
                    let Some(packet) = packets.next() else {
                        return Ok(());
                    };
                    packet.direction = direction;
                    set_request(packet, ctx.index, true);
                }
            }
        }
        Ok(())
    }

    fn plan_extra(&mut self, ctx: &mut PlanContext) -> Result<()> {
        // replies answer the latest request
        let mut sequence: u16 = 0;
        let mut last = None;
        for packet in ctx.packets.iter_mut() {
            if packet.is_continuation {
                if let Some(params) = &last {
                    packet.layers.insert(ctx.index, LayerParams::clone(params));
                }
                continue;
            }
            let Some(LayerParams::IcmpEcho { request, seed, .. }) = packet.layers.get(&ctx.index)
            else {
                continue;
            };
            if *request {
                sequence = sequence.wrapping_add(1);
            }
            let params = LayerParams::IcmpEcho {
                request: *request,
                sequence,
                seed: *seed,
            };
            packet.layers.insert(ctx.index, params.clone());
            last = Some(params);
        }
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()> {
        let LayerParams::IcmpEcho {
            request,
            sequence,
            seed,
        } = params
        else {
            return Err(Error::MissingLayerParams(self.kind()));
        };

        let icmp_type = match (self.v6, request) {
            (false, true) => ICMP_ECHO_REQUEST,
            (false, false) => ICMP_ECHO_REPLY,
            (true, true) => ICMPV6_ECHO_REQUEST,
            (true, false) => ICMPV6_ECHO_REPLY,
        };
        let header = buffer.push_header(self.header_kind(), ICMP_HDR_LEN);
        header[0] = icmp_type;
        header[1] = 0;
        header[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        header[6..8].copy_from_slice(&sequence.to_be_bytes());

        let len = plan.size.saturating_sub(buffer.l3_len() as u64) as usize;
        if len > 0 {
            fill_random(*seed, buffer.push_header(HeaderKind::Payload, len));
        }
        Ok(())
    }
}

fn set_request(packet: &mut PlannedPacket, index: usize, is_request: bool) {
    if let Some(LayerParams::IcmpEcho { request, .. }) = packet.layers.get_mut(&index) {
        *request = is_request;
    }
}
