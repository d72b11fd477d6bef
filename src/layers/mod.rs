//! Protocol layers of a flow.
//!
//! Every flow holds an ordered stack of layers mirroring the on-wire header order. The flow
//! runs the planning hooks of all the layers in stack order, then for each packet calls
//! `build`, computes the derived fields, calls `post_build` and computes them again.

use crate::buffer::PacketBuffer;
use crate::error::Result;
use crate::packet::{LayerParams, PlannedPacket};

use rand::Rng;
use rand_pcg::Pcg32;
use std::fmt::Debug;

mod ethernet;
mod fragment;
mod icmp_echo;
mod icmp_random;
mod ipv4;
mod ipv6;
mod mpls;
mod payload;
mod tcp;
mod udp;
mod vlan;

pub use ethernet::Ethernet;
pub use icmp_echo::IcmpEcho;
pub use icmp_random::IcmpRandom;
pub use ipv4::Ipv4;
pub use ipv6::Ipv6;
pub use mpls::Mpls;
pub use payload::Payload;
pub use tcp::Tcp;
pub use udp::Udp;
pub use vlan::Vlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ethernet,
    Vlan,
    Mpls,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    IcmpEcho,
    IcmpRandom,
    Icmpv6Echo,
    Icmpv6Random,
    Payload,
}

/// What a layer sees of its flow during planning
pub struct PlanContext<'a> {
    /// Position of the planning layer in the stack
    pub index: usize,
    pub packets: &'a mut Vec<PlannedPacket>,
    pub rng: &'a mut Pcg32,
    pub fwd_packets: u64,
    pub rev_packets: u64,
    pub fwd_bytes: u64,
    pub rev_bytes: u64,
    /// The layer right after the planning one, if any
    pub next: Option<&'a dyn Layer>,
    overheads: &'a [usize],
}

impl<'a> PlanContext<'a> {
    pub fn new(
        index: usize,
        packets: &'a mut Vec<PlannedPacket>,
        rng: &'a mut Pcg32,
        (fwd_packets, rev_packets): (u64, u64),
        (fwd_bytes, rev_bytes): (u64, u64),
        next: Option<&'a dyn Layer>,
        overheads: &'a [usize],
    ) -> Self {
        PlanContext {
            index,
            packets,
            rng,
            fwd_packets,
            rev_packets,
            fwd_bytes,
            rev_bytes,
            next,
            overheads,
        }
    }

    /// Network layer bytes of the layers before the planning one
    pub fn overhead_before(&self) -> u64 {
        self.overheads[..self.index].iter().sum::<usize>() as u64
    }

    /// Network layer bytes up to and including the planning layer
    pub fn overhead_through(&self) -> u64 {
        self.overheads[..=self.index].iter().sum::<usize>() as u64
    }

    /// Header bytes the next layer needs
    pub fn next_overhead(&self) -> u64 {
        self.next.map_or(0, |layer| layer.l3_overhead() as u64)
    }

    /// Register the planning layer in every packet with the parameters made by `f`
    pub fn set_params(&mut self, mut f: impl FnMut(&mut Pcg32, &mut PlannedPacket) -> LayerParams) {
        for packet in self.packets.iter_mut() {
            let params = f(self.rng, packet);
            packet.layers.insert(self.index, params);
        }
    }
}

/// One protocol of the stack of a flow
pub trait Layer: Debug + Send {
    fn kind(&self) -> LayerKind;

    /// Bytes this layer adds to the network layer datagram when it carries no data
    fn l3_overhead(&self) -> usize {
        0
    }

    /// First planning pass, before directions and sizes are assigned
    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()>;

    /// Second planning pass, once the sizes are known
    fn post_plan_flow(&mut self, _ctx: &mut PlanContext) -> Result<()> {
        Ok(())
    }

    /// Last planning pass, before the timestamps are assigned
    fn plan_extra(&mut self, _ctx: &mut PlanContext) -> Result<()> {
        Ok(())
    }

    /// Append this layer's header to the packet
    fn build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()>;

    /// Patch the packet once all the layers are built and the derived fields computed
    fn post_build(
        &self,
        _buffer: &mut PacketBuffer,
        _params: &LayerParams,
        _plan: &PlannedPacket,
    ) -> Result<()> {
        Ok(())
    }
}

/// Initial TTL of a common OS minus a few hops
pub(crate) fn random_ttl(rng: &mut impl Rng) -> u8 {
    let initial: u8 = match rng.gen_range(0..3) {
        0 => 64,
        1 => 128,
        _ => 255,
    };
    initial - rng.gen_range(0..16)
}

/// Random bytes derived from a packet seed, so that every fragment of a datagram carries the
/// same bytes
pub(crate) fn fill_random(seed: u64, data: &mut [u8]) {
    use rand_core::{RngCore, SeedableRng};
    Pcg32::seed_from_u64(seed).fill_bytes(data);
}
