use super::*;
use crate::buffer::{HeaderKind, VLAN_HDR_LEN};
use crate::error::Error;

use pnet_packet::vlan::{ClassesOfService, MutableVlanPacket};

/// 802.1Q tag
#[derive(Debug, Clone)]
pub struct Vlan {
    id: u16,
}

impl Vlan {
    pub fn new(id: u16) -> Self {
        Vlan { id }
    }
}

impl Layer for Vlan {
    fn kind(&self) -> LayerKind {
        LayerKind::Vlan
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
        let header = buffer.push_header(HeaderKind::Vlan, VLAN_HDR_LEN);
        let mut vlan =
            MutableVlanPacket::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Vlan))?;
        vlan.set_priority_code_point(ClassesOfService::BE);
        vlan.set_drop_eligible_indicator(0);
        vlan.set_vlan_identifier(self.id);
        Ok(())
    }
}
