use super::*;
use crate::buffer::{HeaderKind, UDP_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use pnet_packet::udp::MutableUdpPacket;

/// UDP header. Length and checksum are computed with the rest of the derived fields.
#[derive(Debug, Clone)]
pub struct Udp {
    src_port: u16,
    dst_port: u16,
}

impl Udp {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Udp { src_port, dst_port }
    }
}

impl Layer for Udp {
    fn kind(&self) -> LayerKind {
        LayerKind::Udp
    }

    fn l3_overhead(&self) -> usize {
        UDP_HDR_LEN
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
        let header = buffer.push_header(HeaderKind::Udp, UDP_HDR_LEN);
        let mut udp = MutableUdpPacket::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Udp))?;
        match plan.direction {
            Direction::Reverse => {
                udp.set_source(self.dst_port);
                udp.set_destination(self.src_port);
            }
            _ => {
                udp.set_source(self.src_port);
                udp.set_destination(self.dst_port);
            }
        }
        Ok(())
    }
}
