use crate::addresses::AddressGenerator;
use crate::buffer::PacketBuffer;
use crate::config::{Config, EncapsulationLayer, EncapsulationVariant};
use crate::error::{Error, Result};
use crate::histogram::IntervalInfo;
use crate::layers::*;
use crate::packet::{PacketFlowSpan, PlannedPacket};
use crate::sizegen::PacketSizeGenerator;
use crate::structs::*;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_core::SeedableRng;
use rand_distr::{Distribution, Uniform};
use rand_pcg::Pcg32;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

/// On-wire size of an ICMP destination unreachable message quoting a UDP datagram
const ICMP_UNREACH_PKT_SIZE: u64 = 8 + 20 + 8;
/// Same for ICMPv6, whose messages carry 4 more bytes after the checksum
const ICMPV6_UNREACH_PKT_SIZE: u64 = 4 + 4 + 40 + 8;

/// Largest datagram an IP header can describe
const MAX_DATAGRAM_SIZE: u64 = 65535;

#[derive(Debug, Clone, Copy)]
enum PlanPhase {
    PlanFlow,
    PostPlanFlow,
    PlanExtra,
}

/// A flow being turned into packets.
///
/// The whole flow is planned when it is created: every packet gets a direction, a size, a
/// timestamp and the parameters of each layer. Packets are then built one at a time, in flow
/// order, with [`Flow::generate_next_packet`].
#[derive(Debug)]
pub struct Flow {
    id: u64,
    layers: Vec<Box<dyn Layer>>,
    packets: VecDeque<PlannedPacket>,
    fwd_packets: u64,
    rev_packets: u64,
    fwd_bytes: u64,
    rev_bytes: u64,
    ts_first: Duration,
    ts_last: Duration,
    packet_sizes: Vec<IntervalInfo>,
    rng: Pcg32,
}

impl Flow {
    /// Build the layer stack of a profile and plan its packets. Addresses not given by the
    /// profile are drawn from `addresses`, every other random choice derives from `seed`.
    pub fn new(
        id: u64,
        profile: &FlowProfile,
        addresses: &mut AddressGenerator,
        config: &Config,
        seed: u64,
    ) -> Result<Flow> {
        if profile.end_time < profile.start_time {
            return Err(Error::InvalidProfile(format!(
                "flow ends ({:?}) before it starts ({:?})",
                profile.end_time, profile.start_time
            )));
        }

        let mut flow = Flow {
            id,
            layers: vec![],
            packets: VecDeque::new(),
            fwd_packets: profile.packets,
            rev_packets: profile.packets_rev,
            fwd_bytes: profile.bytes,
            rev_bytes: profile.bytes_rev,
            ts_first: profile.start_time,
            ts_last: profile.end_time,
            packet_sizes: config.l3_packet_sizes()?,
            rng: Pcg32::seed_from_u64(seed),
        };

        let mac_src = addresses.generate_mac();
        let mac_dst = addresses.generate_mac();
        flow.add_layer(Box::new(Ethernet::new(mac_src, mac_dst)));

        let encapsulation = choose_encapsulation(&mut flow.rng, &config.encapsulation);
        for layer in encapsulation {
            match *layer {
                EncapsulationLayer::Vlan { id } => flow.add_layer(Box::new(Vlan::new(id))),
                EncapsulationLayer::Mpls { label } => flow.add_layer(Box::new(Mpls::new(label))),
            }
        }

        match profile.l3_proto {
            L3Protocol::Unknown => return Err(Error::UnknownL3Protocol),
            L3Protocol::Ipv4 => {
                let ranges = &config.ipv4.ip_range;
                let src = match pinned_ip(id, profile.l3_proto, profile.src_ip) {
                    Some(IpAddr::V4(ip)) => ip,
                    _ => addresses.generate_ipv4_in(ranges),
                };
                let dst = match pinned_ip(id, profile.l3_proto, profile.dst_ip) {
                    Some(IpAddr::V4(ip)) => ip,
                    _ => addresses.generate_ipv4_in(ranges),
                };
                flow.add_layer(Box::new(Ipv4::new(
                    src,
                    dst,
                    config.ipv4.fragmentation_probability,
                    config.ipv4.min_packet_size_to_fragment,
                )));
            }
            L3Protocol::Ipv6 => {
                let ranges = &config.ipv6.ip_range;
                let src = match pinned_ip(id, profile.l3_proto, profile.src_ip) {
                    Some(IpAddr::V6(ip)) => ip,
                    _ => addresses.generate_ipv6_in(ranges),
                };
                let dst = match pinned_ip(id, profile.l3_proto, profile.dst_ip) {
                    Some(IpAddr::V6(ip)) => ip,
                    _ => addresses.generate_ipv6_in(ranges),
                };
                flow.add_layer(Box::new(Ipv6::new(
                    src,
                    dst,
                    config.ipv6.fragmentation_probability,
                    config.ipv6.min_packet_size_to_fragment,
                )));
            }
        }

        let mismatch = Error::ProtocolMismatch {
            l3: profile.l3_proto,
            l4: profile.l4_proto,
        };
        match profile.l4_proto {
            L4Protocol::Unknown => return Err(Error::UnknownL4Protocol),
            L4Protocol::TCP => {
                flow.add_layer(Box::new(Tcp::new(profile.src_port, profile.dst_port)));
                flow.add_layer(Box::new(Payload::new()));
            }
            L4Protocol::UDP => {
                flow.add_layer(Box::new(Udp::new(profile.src_port, profile.dst_port)));
                flow.add_layer(Box::new(Payload::new()));
            }
            L4Protocol::ICMP => {
                if profile.l3_proto != L3Protocol::Ipv4 {
                    return Err(mismatch);
                }
                let layer = flow.make_icmp_layer(false);
                flow.add_layer(layer);
            }
            L4Protocol::ICMPv6 => {
                if profile.l3_proto != L3Protocol::Ipv6 {
                    return Err(mismatch);
                }
                let layer = flow.make_icmp_layer(true);
                flow.add_layer(layer);
            }
        }

        flow.plan()?;
        Ok(flow)
    }

    fn add_layer(&mut self, layer: Box<dyn Layer>) {
        log::trace!("Flow {}: layer {} is {:?}", self.id, self.layers.len(), layer.kind());
        self.layers.push(layer);
    }

    /// Choose between paired echo traffic and independent small messages from the shape of
    /// the flow
    fn make_icmp_layer(&self, v6: bool) -> Box<dyn Layer> {
        let mut ratio_diff = 1.0;
        let mut bytes_per_pkt = 0.0;
        let total_pkts = self.fwd_packets + self.rev_packets;
        if total_pkts > 0 {
            let min = self.fwd_packets.min(self.rev_packets) as f64;
            let max = self.fwd_packets.max(self.rev_packets) as f64;
            ratio_diff = 1.0 - min / max;
            bytes_per_pkt = ((self.fwd_bytes + self.rev_bytes) / total_pkts) as f64;
        }

        let unreach_size = if v6 {
            ICMPV6_UNREACH_PKT_SIZE
        } else {
            ICMP_UNREACH_PKT_SIZE
        } as f64;
        let small = bytes_per_pkt <= 1.10 * unreach_size;
        let few = self.fwd_packets <= 3 || self.rev_packets <= 3;

        let random = if few && small {
            true
        } else if ratio_diff <= 0.2 {
            false
        } else {
            small
        };

        match (random, v6) {
            (true, false) => Box::new(IcmpRandom::new()),
            (true, true) => Box::new(IcmpRandom::new_v6()),
            (false, false) => Box::new(IcmpEcho::new()),
            (false, true) => Box::new(IcmpEcho::new_v6()),
        }
    }

    fn plan(&mut self) -> Result<()> {
        let mut packets =
            vec![PlannedPacket::default(); (self.fwd_packets + self.rev_packets) as usize];
        let overheads: Vec<usize> = self.layers.iter().map(|l| l.l3_overhead()).collect();

        self.run_phase(PlanPhase::PlanFlow, &mut packets, &overheads)?;
        self.plan_packets_directions(&mut packets);
        self.plan_packets_sizes(&mut packets)?;
        self.run_phase(PlanPhase::PostPlanFlow, &mut packets, &overheads)?;
        self.run_phase(PlanPhase::PlanExtra, &mut packets, &overheads)?;
        self.plan_packets_timestamps(&mut packets);

        log::trace!("Flow {}: {} packets planned", self.id, packets.len());
        self.packets = packets.into();
        Ok(())
    }

    /// Run one planning hook on every layer, in stack order
    fn run_phase(
        &mut self,
        phase: PlanPhase,
        packets: &mut Vec<PlannedPacket>,
        overheads: &[usize],
    ) -> Result<()> {
        for index in 0..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(index + 1);
            let next = tail.first().map(|layer| &**layer);
            let mut ctx = PlanContext::new(
                index,
                packets,
                &mut self.rng,
                (self.fwd_packets, self.rev_packets),
                (self.fwd_bytes, self.rev_bytes),
                next,
                overheads,
            );
            let layer = &mut head[index];
            match phase {
                PlanPhase::PlanFlow => layer.plan_flow(&mut ctx)?,
                PlanPhase::PostPlanFlow => layer.post_plan_flow(&mut ctx)?,
                PlanPhase::PlanExtra => layer.plan_extra(&mut ctx)?,
            }
        }
        Ok(())
    }

    fn plan_packets_directions(&mut self, packets: &mut [PlannedPacket]) {
        let mut span = PacketFlowSpan::new(packets, true);
        let (fwd, rev) = span.available_directions(self.fwd_packets, self.rev_packets);

        let mut directions = vec![Direction::Forward; fwd as usize];
        directions.extend(std::iter::repeat(Direction::Reverse).take(rev as usize));
        directions.shuffle(&mut self.rng);

        let mut directions = directions.into_iter();
        for packet in span.iter_mut() {
            if packet.direction == Direction::Unknown {
                if let Some(direction) = directions.next() {
                    packet.direction = direction;
                }
            }
        }
    }

    fn plan_packets_sizes(&mut self, packets: &mut [PlannedPacket]) -> Result<()> {
        let mut fwd_gen =
            PacketSizeGenerator::new(&self.packet_sizes, self.fwd_packets, self.fwd_bytes)?;
        let mut rev_gen =
            PacketSizeGenerator::new(&self.packet_sizes, self.rev_packets, self.rev_bytes)?;

        for packet in packets.iter().filter(|p| p.is_finished) {
            let generator = match packet.direction {
                Direction::Reverse => &mut rev_gen,
                _ => &mut fwd_gen,
            };
            generator.get_value_exact(packet.size, &mut self.rng);
        }

        fwd_gen.plan_remaining(&mut self.rng);
        rev_gen.plan_remaining(&mut self.rng);

        for packet in packets.iter_mut().filter(|p| !p.is_finished) {
            let generator = match packet.direction {
                Direction::Reverse => &mut rev_gen,
                _ => &mut fwd_gen,
            };
            let value = generator.get_value(&mut self.rng);
            packet.size = packet.size.max(value).min(MAX_DATAGRAM_SIZE);
        }

        fwd_gen.print_report();
        rev_gen.print_report();
        Ok(())
    }

    /// The first and last packets get the flow boundaries, the others random times in between
    fn plan_packets_timestamps(&mut self, packets: &mut [PlannedPacket]) {
        let mut span = PacketFlowSpan::new(packets, false);

        let (first_sec, first_usec) = (self.ts_first.as_secs(), self.ts_first.subsec_micros());
        let (last_sec, last_usec) = (self.ts_last.as_secs(), self.ts_last.subsec_micros());
        let sec_dist = Uniform::new_inclusive(first_sec, last_sec);
        let usec_dist = Uniform::new_inclusive(0, 999_999);
        let (first_usec_dist, last_usec_dist) = if first_sec == last_sec {
            let dist = Uniform::new_inclusive(first_usec, last_usec);
            (dist, dist)
        } else {
            (
                Uniform::new_inclusive(first_usec, 999_999),
                Uniform::new_inclusive(0, last_usec),
            )
        };

        let mut timestamps = vec![self.ts_first, self.ts_last];
        for _ in 0..span.len().saturating_sub(2) {
            let sec = sec_dist.sample(&mut self.rng);
            let usec = if sec == first_sec {
                first_usec_dist.sample(&mut self.rng)
            } else if sec == last_sec {
                last_usec_dist.sample(&mut self.rng)
            } else {
                usec_dist.sample(&mut self.rng)
            };
            timestamps.push(Duration::new(sec, usec * 1000));
        }
        timestamps.sort_unstable();

        for (packet, timestamp) in span.iter_mut().zip(timestamps) {
            packet.timestamp = timestamp;
        }
    }

    /// Build the next packet of the flow into `buffer`
    pub fn generate_next_packet(&mut self, buffer: &mut PacketBuffer) -> Result<PacketExtraInfo> {
        let plan = self.packets.front().ok_or(Error::NoMorePackets)?;
        buffer.clear();

        for (&index, params) in plan.layers.iter() {
            self.layers[index].build(buffer, params, plan)?;
        }
        // post build needs the complete packet, and may change what the fields depend on
        buffer.compute_calculated_fields()?;
        for (&index, params) in plan.layers.iter() {
            self.layers[index].post_build(buffer, params, plan)?;
        }
        buffer.compute_calculated_fields()?;

        let extra = PacketExtraInfo {
            direction: plan.direction,
            time: plan.timestamp,
        };
        self.packets.pop_front();
        Ok(extra)
    }

    pub fn is_finished(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn next_packet_time(&self) -> Option<Duration> {
        self.packets.front().map(|p| p.timestamp)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(|l| l.kind()).collect()
    }

    /// The packets not generated yet, in flow order
    pub fn planned_packets(&self) -> impl Iterator<Item = &PlannedPacket> {
        self.packets.iter()
    }
}

/// Draw one encapsulation variant. The probability left by the variants means no encapsulation.
fn choose_encapsulation<'a>(
    rng: &mut impl Rng,
    variants: &'a [EncapsulationVariant],
) -> &'a [EncapsulationLayer] {
    if variants.is_empty() {
        return &[];
    }
    let drawn: f64 = rng.gen();
    let mut accum = 0.0;
    for variant in variants {
        accum += variant.probability;
        if drawn <= accum {
            return &variant.layers;
        }
    }
    &[]
}

/// The address pinned by the profile, unless it belongs to the other IP family
fn pinned_ip(id: u64, l3: L3Protocol, ip: Option<IpAddr>) -> Option<IpAddr> {
    let ip = ip?;
    if l3.matches(&ip) {
        Some(ip)
    } else {
        log::warn!("Flow {id}: ignoring address {ip} of an {l3} flow");
        None
    }
}
