use super::*;
use crate::buffer::{HeaderKind, TCP_HDR_LEN};
use crate::error::Error;
use crate::structs::Direction;

use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
use std::num::Wrapping;

/// TCP header with a planned connection: a three-way handshake and a FIN teardown when the
/// packet counts of the flow allow them, and sequence numbers following the data sizes.
#[derive(Debug, Clone)]
pub struct Tcp {
    src_port: u16,
    dst_port: u16,
    window_client: u16,
    window_server: u16,
}

impl Tcp {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Tcp {
            src_port,
            dst_port,
            window_client: 65535,
            window_server: 65535,
        }
    }
}

/// Sequence space consumed by the control flags of a segment
fn flags_len(flags: u8) -> u32 {
    u32::from(flags & TcpFlags::SYN != 0) + u32::from(flags & TcpFlags::FIN != 0)
}

impl Layer for Tcp {
    fn kind(&self) -> LayerKind {
        LayerKind::Tcp
    }

    fn l3_overhead(&self) -> usize {
        TCP_HDR_LEN
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        self.window_client = ctx.rng.gen_range(1024..=65535);
        self.window_server = ctx.rng.gen_range(1024..=65535);
        ctx.set_params(|_, _| LayerParams::Tcp {
            flags: TcpFlags::ACK,
            sequence: 0,
            acknowledgement: 0,
        });

        let n = ctx.packets.len();
        let (mut fwd, mut rev) = (ctx.fwd_packets, ctx.rev_packets);
        let mut control = vec![];
        if fwd >= 2 && rev >= 1 {
            control.push((0, Direction::Forward, TcpFlags::SYN));
            control.push((1, Direction::Reverse, TcpFlags::SYN | TcpFlags::ACK));
            control.push((2, Direction::Forward, TcpFlags::ACK));
            fwd -= 2;
            rev -= 1;
        }
        if fwd >= 2 && rev >= 1 {
            control.push((n - 3, Direction::Forward, TcpFlags::FIN | TcpFlags::ACK));
            control.push((n - 2, Direction::Reverse, TcpFlags::FIN | TcpFlags::ACK));
            control.push((n - 1, Direction::Forward, TcpFlags::ACK));
        }

        // control segments carry no data
        let size = ctx.overhead_through();
        for (i, direction, flags) in control {
            let packet = &mut ctx.packets[i];
            packet.direction = direction;
            packet.size = size;
            packet.is_finished = true;
            packet.layers.insert(
                ctx.index,
                LayerParams::Tcp {
                    flags,
                    sequence: 0,
                    acknowledgement: 0,
                },
            );
        }
        Ok(())
    }

    fn plan_extra(&mut self, ctx: &mut PlanContext) -> Result<()> {
        let mut seq_client = Wrapping(ctx.rng.gen::<u32>());
        let mut seq_server = Wrapping(ctx.rng.gen::<u32>());
        let header_size = ctx.overhead_through();

        let mut last = None;
        for packet in ctx.packets.iter_mut() {
            if packet.is_continuation {
                // same datagram as the previous packet
                if let Some(params) = &last {
                    packet.layers.insert(ctx.index, LayerParams::clone(params));
                }
                continue;
            }
            let Some(LayerParams::Tcp { flags, .. }) = packet.layers.get(&ctx.index) else {
                continue;
            };

            let data_len = packet
                .size
                .saturating_sub(header_size + packet.fragment_overhead());
            let flags = if packet.is_finished {
                *flags
            } else if data_len > 0 {
                TcpFlags::ACK | TcpFlags::PSH
            } else {
                TcpFlags::ACK
            };

            let (seq, ack) = match packet.direction {
                Direction::Reverse => (&mut seq_server, seq_client),
                _ => (&mut seq_client, seq_server),
            };
            let params = LayerParams::Tcp {
                flags,
                sequence: seq.0,
                acknowledgement: if flags & TcpFlags::ACK != 0 { ack.0 } else { 0 },
            };
            *seq += Wrapping(data_len as u32) + Wrapping(flags_len(flags));

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
        let LayerParams::Tcp {
            flags,
            sequence,
            acknowledgement,
        } = params
        else {
            return Err(Error::MissingLayerParams(LayerKind::Tcp));
        };

        let header = buffer.push_header(HeaderKind::Tcp, TCP_HDR_LEN);
        let mut tcp = MutableTcpPacket::new(header).ok_or(Error::HeaderTooShort(HeaderKind::Tcp))?;
        match plan.direction {
            Direction::Reverse => {
                tcp.set_source(self.dst_port);
                tcp.set_destination(self.src_port);
                tcp.set_window(self.window_server);
            }
            _ => {
                tcp.set_source(self.src_port);
                tcp.set_destination(self.dst_port);
                tcp.set_window(self.window_client);
            }
        }
        tcp.set_sequence(*sequence);
        tcp.set_acknowledgement(*acknowledgement);
        tcp.set_flags(*flags);
        tcp.set_data_offset(5);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags_consume_sequence_space() {
        assert_eq!(flags_len(TcpFlags::SYN), 1);
        assert_eq!(flags_len(TcpFlags::SYN | TcpFlags::ACK), 1);
        assert_eq!(flags_len(TcpFlags::FIN | TcpFlags::ACK), 1);
        assert_eq!(flags_len(TcpFlags::ACK | TcpFlags::PSH), 0);
    }
}
