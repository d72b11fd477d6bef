use super::*;
use crate::buffer::{HeaderKind, ICMP_HDR_LEN, IPV4_HDR_LEN, IPV6_HDR_LEN, UDP_HDR_LEN};
use crate::error::Error;

use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, MutableIpv4Packet};
use pnet_packet::ipv6::MutableIpv6Packet;
use pnet_packet::udp::MutableUdpPacket;
use rand_core::SeedableRng;
use rand_distr::{Distribution, WeightedIndex};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const IPV6_MIN_MTU: u32 = 1280;

/// A kind of ICMP message: type, code, weight
struct MessageKind {
    icmp_type: u8,
    code: u8,
    weight: f64,
}

const fn message(icmp_type: u8, code: u8, weight: f64) -> MessageKind {
    MessageKind {
        icmp_type,
        code,
        weight,
    }
}

static ICMP_MESSAGES: [MessageKind; 6] = [
    message(3, 3, 0.35),  // port unreachable
    message(3, 1, 0.15),  // host unreachable
    message(11, 0, 0.2),  // TTL exceeded
    message(12, 0, 0.05), // parameter problem
    message(8, 0, 0.15),  // echo request
    message(0, 0, 0.1),   // echo reply
];

static ICMPV6_MESSAGES: [MessageKind; 7] = [
    message(1, 4, 0.35),   // port unreachable
    message(1, 3, 0.15),   // address unreachable
    message(3, 0, 0.2),    // hop limit exceeded
    message(2, 0, 0.05),   // packet too big
    message(4, 0, 0.05),   // parameter problem
    message(128, 0, 0.1),  // echo request
    message(129, 0, 0.1),  // echo reply
];

/// Independent ICMP messages, mostly errors quoting the header of a UDP datagram
#[derive(Debug, Clone)]
pub struct IcmpRandom {
    v6: bool,
}

impl IcmpRandom {
    pub fn new() -> Self {
        IcmpRandom { v6: false }
    }

    pub fn new_v6() -> Self {
        IcmpRandom { v6: true }
    }

    fn messages(&self) -> &'static [MessageKind] {
        if self.v6 {
            &ICMPV6_MESSAGES
        } else {
            &ICMP_MESSAGES
        }
    }

    fn is_error(&self, icmp_type: u8) -> bool {
        if self.v6 {
            icmp_type < 128
        } else {
            !matches!(icmp_type, 0 | 8)
        }
    }

    /// Bytes of the quoted datagram carried by error messages
    fn quoted_len(&self) -> usize {
        if self.v6 {
            IPV6_HDR_LEN + UDP_HDR_LEN
        } else {
            IPV4_HDR_LEN + UDP_HDR_LEN
        }
    }

    fn write_quoted(&self, rng: &mut Pcg32, data: &mut [u8], src: Option<IpAddr>) -> Result<()> {
        let ip_len = if self.v6 { IPV6_HDR_LEN } else { IPV4_HDR_LEN };
        let (ip_data, udp_data) = data.split_at_mut(ip_len);
        if self.v6 {
            let mut ip = MutableIpv6Packet::new(ip_data)
                .ok_or(Error::HeaderTooShort(HeaderKind::Ipv6))?;
            ip.set_version(6);
            ip.set_payload_length(UDP_HDR_LEN as u16);
            ip.set_next_header(IpNextHeaderProtocols::Udp);
            ip.set_hop_limit(random_ttl(rng));
            let src = match src {
                Some(IpAddr::V6(src)) => src,
                _ => Ipv6Addr::from(rng.gen::<u128>()),
            };
            ip.set_source(src);
            ip.set_destination(Ipv6Addr::from(rng.gen::<u128>()));
        } else {
            let mut ip = MutableIpv4Packet::new(ip_data)
                .ok_or(Error::HeaderTooShort(HeaderKind::Ipv4))?;
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length((IPV4_HDR_LEN + UDP_HDR_LEN) as u16);
            ip.set_identification(rng.gen());
            ip.set_ttl(random_ttl(rng));
            ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            let src = match src {
                Some(IpAddr::V4(src)) => src,
                _ => Ipv4Addr::from(rng.gen::<u32>()),
            };
            ip.set_source(src);
            ip.set_destination(Ipv4Addr::from(rng.gen::<u32>()));
            let checksum = ipv4::checksum(&ip.to_immutable());
            ip.set_checksum(checksum);
        }

        let mut udp =
            MutableUdpPacket::new(udp_data).ok_or(Error::HeaderTooShort(HeaderKind::Udp))?;
        udp.set_source(rng.gen_range(1024..=65535));
        udp.set_destination(rng.gen_range(1..1024));
        udp.set_length(UDP_HDR_LEN as u16);
        udp.set_checksum(rng.gen());
        Ok(())
    }
}

impl Default for IcmpRandom {
    fn default() -> Self {
        IcmpRandom::new()
    }
}

impl Layer for IcmpRandom {
    fn kind(&self) -> LayerKind {
        if self.v6 {
            LayerKind::Icmpv6Random
        } else {
            LayerKind::IcmpRandom
        }
    }

    fn l3_overhead(&self) -> usize {
        ICMP_HDR_LEN
    }

    fn plan_flow(&mut self, ctx: &mut PlanContext) -> Result<()> {
        let messages = self.messages();
        let dist = WeightedIndex::new(messages.iter().map(|m| m.weight))
            .map_err(|e| Error::Config(e.to_string()))?;
        // error messages must fit the quoted datagram
        let error_size = ctx.overhead_before() + (ICMP_HDR_LEN + self.quoted_len()) as u64;
        ctx.set_params(|rng, packet| {
            let message = &messages[dist.sample(rng)];
            if self.is_error(message.icmp_type) {
                packet.size = packet.size.max(error_size);
            }
            LayerParams::IcmpRandom {
                icmp_type: message.icmp_type,
                code: message.code,
                seed: rng.gen(),
            }
        });
        Ok(())
    }

    fn build(
        &self,
        buffer: &mut PacketBuffer,
        params: &LayerParams,
        plan: &PlannedPacket,
    ) -> Result<()> {
        let LayerParams::IcmpRandom {
            icmp_type,
            code,
            seed,
        } = params
        else {
            return Err(Error::MissingLayerParams(self.kind()));
        };
        let mut rng = Pcg32::seed_from_u64(*seed);
        // the quoted datagram was sent by the receiver of the error
        let quoted_src = buffer.network_addresses().map(|(_, dst)| dst);
        let kind = if self.v6 {
            HeaderKind::Icmpv6
        } else {
            HeaderKind::Icmp
        };

        let header = buffer.push_header(kind, ICMP_HDR_LEN);
        header[0] = *icmp_type;
        header[1] = *code;
        match (self.v6, *icmp_type) {
            (false, 0 | 8) | (true, 128 | 129) => rng.fill(&mut header[4..8]),
            (true, 2) => header[4..8].copy_from_slice(&IPV6_MIN_MTU.to_be_bytes()),
            (false, 12) => header[4] = rng.gen_range(0..IPV4_HDR_LEN as u8),
            (true, 4) => header[7] = rng.gen_range(0..IPV6_HDR_LEN as u8),
            _ => (),
        }

        let mut len = plan.size.saturating_sub(buffer.l3_len() as u64) as usize;
        let is_error = self.is_error(*icmp_type);
        if is_error {
            len = len.max(self.quoted_len());
        }
        if len > 0 {
            let data = buffer.push_header(HeaderKind::Payload, len);
            let quoted = if is_error { self.quoted_len() } else { 0 };
            let (quoted_data, rest) = data.split_at_mut(quoted);
            if is_error {
                self.write_quoted(&mut rng, quoted_data, quoted_src)?;
            }
            rng.fill(rest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_normalized() {
        for messages in [&ICMP_MESSAGES[..], &ICMPV6_MESSAGES[..]] {
            let sum: f64 = messages.iter().map(|m| m.weight).sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn error_types() {
        let v4 = IcmpRandom::new();
        assert!(v4.is_error(3));
        assert!(!v4.is_error(8));
        let v6 = IcmpRandom::new_v6();
        assert!(v6.is_error(2));
        assert!(!v6.is_error(129));
        assert_eq!(v6.quoted_len(), 48);
        assert_eq!(v4.quoted_len(), 28);
    }
}
