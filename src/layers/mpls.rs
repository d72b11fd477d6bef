use super::*;
use crate::buffer::{write_mpls, HeaderKind, MPLS_HDR_LEN};

const MPLS_TTL: u8 = 255;

/// One MPLS label stack entry
#[derive(Debug, Clone)]
pub struct Mpls {
    label: u32,
}

impl Mpls {
    pub fn new(label: u32) -> Self {
        Mpls { label }
    }
}

impl Layer for Mpls {
    fn kind(&self) -> LayerKind {
        LayerKind::Mpls
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        ctx.set_params(|_, _| LayerParams::None);
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        _params: &LayerParams,
        _plan: &PlannedPacket,
    ) -> Result<()> {
        write_mpls(
            buffer.push_header(HeaderKind::Mpls, MPLS_HDR_LEN),
            self.label,
            MPLS_TTL,
        );
        Ok(())
    }
}
