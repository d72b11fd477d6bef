use super::*;
use crate::buffer::{HeaderKind, ETHERNET_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use pnet::util::MacAddr;
use pnet_packet::ethernet::MutableEthernetPacket;

/// Link layer. The ether type is filled from the next header.
#[derive(Debug, Clone)]
pub struct Ethernet {
    src_mac: MacAddr,
    dst_mac: MacAddr,
}

impl Ethernet {
    pub fn new(src_mac: MacAddr, dst_mac: MacAddr) -> Self {
        Ethernet { src_mac, dst_mac }
    }
}

impl Layer for Ethernet {
    fn kind(&self) -> LayerKind {
        LayerKind::Ethernet
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        ctx.set_params(|_, _| LayerParams::None);
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        _params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()> {
        let header = buffer.push_header(HeaderKind::Ethernet, ETHERNET_HDR_LEN);
        let mut eth =
            MutableEthernetPacket::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Ethernet))?;
        let (src, dst) = match plan.direction {
            Direction::Reverse => (self.dst_mac, self.src_mac),
            _ => (self.src_mac, self.dst_mac),
        };
        eth.set_source(src);
        eth.set_destination(dst);
        Ok(())
    }
}
