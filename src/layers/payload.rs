use super::*;
use crate::buffer::HeaderKind;
use crate::error::Error;

/// Random application data filling the datagram up to its planned size
#[derive(Debug, Clone, Default)]
pub struct Payload {}

impl Payload {
    pub fn new() -> Self {
        Payload {}
    }
}

impl Layer for Payload {
    fn kind(&self) -> LayerKind {
        LayerKind::Payload
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        ctx.set_params(|rng, _| LayerParams::Payload { seed: rng.gen() });
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()> {
        let LayerParams::Payload { seed } = params else {
            return Err(Error::MissingLayerParams(LayerKind::Payload));
        };
        let len = plan.size.saturating_sub(buffer.l3_len() as u64) as usize;
        if len > 0 {
            fill_random(*seed, buffer.push_header(HeaderKind::Payload, len));
        }
        Ok(())
    }
}
