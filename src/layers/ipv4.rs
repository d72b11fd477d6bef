use super::fragment::Fragmentation;
use super::*;
use crate::buffer::{HeaderKind, IPV4_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct Ipv4 {
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    fragmentation: Fragmentation,
    ttl_client: u8,
    ttl_server: u8,
}

impl Ipv4 {
    pub fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        fragmentation_probability: f64,
        min_packet_size_to_fragment: u64,
    ) -> Self {
        Ipv4 {
            src_ip,
            dst_ip,
            fragmentation: Fragmentation {
                probability: fragmentation_probability,
                min_packet_size: min_packet_size_to_fragment,
                header_len: IPV4_HDR_LEN as u64,
            },
            ttl_client: 64,
            ttl_server: 64,
        }
    }
}

impl Layer for Ipv4 {
    fn kind(&self) -> LayerKind {
        LayerKind::Ipv4
    }

    fn l3_overhead(&self) -> usize {
        IPV4_HDR_LEN
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.ttl_client = random_ttl(ctx.rng);
        self.ttl_server = random_ttl(ctx.rng);
        ctx.set_params(|rng, _| LayerParams::Ipv4 {
            identification: rng.gen(),
            fragment: None,
        });
        Ok(())
    }

    fn post_plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.fragmentation.apply(ctx, |params, fragment| match params {
            LayerParams::Ipv4 { identification, .. } => LayerParams::Ipv4 {
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
        let LayerParams::Ipv4 {
            identification,
            fragment,
        } = params
        else {
            return Err(Error::MissingLayerParams(LayerKind::Ipv4));
        };

        let header = buffer.push_header(HeaderKind::Ipv4, IPV4_HDR_LEN);
        let mut ip = MutableIpv4Packet::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Ipv4))?;
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_identification(*identification);

        match plan.direction {
            Direction::Reverse => {
                ip.set_ttl(self.ttl_server);
                ip.set_source(self.dst_ip);
                ip.set_destination(self.src_ip);
            }
            _ => {
                ip.set_ttl(self.ttl_client);
                ip.set_source(self.src_ip);
                ip.set_destination(self.dst_ip);
            }
        }

        if let Some(fragment) = fragment {
            let flags = if fragment.more {
                Ipv4Flags::MoreFragments
            } else {
                0
            };
            ip.set_flags(flags);
            ip.set_fragment_offset((fragment.offset / 8) as u16);
        }
        Ok(())
    }

    fn post_build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        _plan: &PlannedPacket,
    ) -> Result<()> {
        if let LayerParams::Ipv4 {
            fragment: Some(fragment),
            ..
        } = params
        {
            let header = buffer
                .find_header(HeaderKind::Ipv4)
                .ok_or(Error::HeaderTooShort(HeaderKind::Ipv4))?;
            buffer.cut_upper_data(header, fragment.offset..fragment.offset + fragment.len)?;
        }
        Ok(())
    }
}
