use super::fragment::Fragmentation;
use super::*;
use crate::buffer::{write_ipv6_fragment, HeaderKind, IPV6_FRAGMENT_HDR_LEN, IPV6_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use pnet_packet::ipv6::MutableIpv6Packet;
use std::net::Ipv6Addr;

#[derive(Debug, Clone)]
pub struct Ipv6 {
    src_ip: Ipv6Addr,
    dst_ip: Ipv6Addr,
    fragmentation: Fragmentation,
    hop_limit_client: u8,
    hop_limit_server: u8,
    flow_label: u32,
}

impl Ipv6 {
    pub fn new(
        src_ip: Ipv6Addr,
        dst_ip: Ipv6Addr,
        fragmentation_probability: f64,
        min_packet_size_to_fragment: u64,
    ) -> Self {
        Ipv6 {
            src_ip,
            dst_ip,
            fragmentation: Fragmentation {
                probability: fragmentation_probability,
                min_packet_size: min_packet_size_to_fragment,
                // fragments carry an extension header
                header_len: (IPV6_HDR_LEN + IPV6_FRAGMENT_HDR_LEN) as u64,
            },
            hop_limit_client: 64,
            hop_limit_server: 64,
            flow_label: 0,
        }
    }
}

impl Layer for Ipv6 {
    fn kind(&self) -> LayerKind {
        LayerKind::Ipv6
    }

    fn l3_overhead(&self) -> usize {
        IPV6_HDR_LEN
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.hop_limit_client = random_ttl(ctx.rng);
        self.hop_limit_server = random_ttl(ctx.rng);
        self.flow_label = ctx.rng.gen_range(0..1 << 20);
        ctx.set_params(|rng, _| LayerParams::Ipv6 {
            identification: rng.gen(),
            fragment: None,
        });
        Ok(())
    }

    fn post_plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.fragmentation.apply(ctx, |params, fragment| match params {
            LayerParams::Ipv6 { identification, .. } => LayerParams::Ipv6 {
                identification: *identification,
                fragment: Some(fragment),
            },
            other => other.clone(),
        });
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()> {
        let LayerParams::Ipv6 {
            identification,
            fragment,
        } = params
        else {
            return Err(Error::MissingLayerParams(LayerKind::Ipv6));
        };

        let header = buffer.push_header(HeaderKind::Ipv6, IPV6_HDR_LEN);
        let mut ip = MutableIpv6Packet::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Ipv6))?;
        ip.set_version(6);
        ip.set_flow_label(self.flow_label);
        match plan.direction {
            Direction::Reverse => {
                ip.set_hop_limit(self.hop_limit_server);
                ip.set_source(self.dst_ip);
                ip.set_destination(self.src_ip);
            }
            _ => {
                ip.set_hop_limit(self.hop_limit_client);
                ip.set_source(self.src_ip);
                ip.set_destination(self.dst_ip);
            }
        }

        if let Some(fragment) = fragment {
            let header = buffer.push_header(HeaderKind::Ipv6Fragment, IPV6_FRAGMENT_HDR_LEN);
            write_ipv6_fragment(header, fragment.offset, fragment.more, *identification);
        }
        Ok(())
    }

    fn post_build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        _plan: &PlannedPacket,
    ) -> Result<()> {
        if let LayerParams::Ipv6 {
            fragment: Some(fragment),
            ..
        } = params
        {
            let header = buffer
                .find_header(HeaderKind::Ipv6Fragment)
                .ok_or(Error::HeaderTooShort(HeaderKind::Ipv6Fragment))?;
            buffer.cut_upper_data(header, fragment.offset..fragment.offset + fragment.len)?;
        }
        Ok(())
    }
}
