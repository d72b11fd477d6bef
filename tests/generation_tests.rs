use flowgen::addresses::AddressGenerator;
use flowgen::buffer::PacketBuffer;
use flowgen::config::Config;
use flowgen::flow::Flow;
use flowgen::layers::LayerKind;
use flowgen::meter::TrafficMeter;
use flowgen::structs::*;
use flowgen::Error;

use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, Ipv4Packet};
use pnet_packet::Packet;
use std::time::Duration;

fn profile(
    l3: L3Protocol,
    l4: L4Protocol,
    (packets, packets_rev): (u64, u64),
    (bytes, bytes_rev): (u64, u64),
) -> FlowProfile {
    FlowProfile {
        start_time: Duration::from_micros(1_700_000_000_250_000),
        end_time: Duration::from_micros(1_700_000_012_750_123),
        l3_proto: l3,
        l4_proto: l4,
        src_port: 51000,
        dst_port: 80,
        packets,
        bytes,
        packets_rev,
        bytes_rev,
        ..Default::default()
    }
}

fn new_flow(profile: &FlowProfile, seed: u64) -> flowgen::Result<Flow> {
    let mut addresses = AddressGenerator::new(1)?;
    Flow::new(0, profile, &mut addresses, &Config::default(), seed)
}

#[test]
fn small_tcp_flow() {
    let p = profile(L3Protocol::Ipv4, L4Protocol::TCP, (5, 5), (500, 500));
    let mut flow = new_flow(&p, 0).unwrap();
    assert_eq!(
        flow.layer_kinds(),
        vec![
            LayerKind::Ethernet,
            LayerKind::Ipv4,
            LayerKind::Tcp,
            LayerKind::Payload
        ]
    );
    assert_eq!(flow.planned_packets().count(), 10);
    let fwd = flow
        .planned_packets()
        .filter(|p| p.direction == Direction::Forward)
        .count();
    assert_eq!(fwd, 5);

    let mut buffer = PacketBuffer::new();
    while !flow.is_finished() {
        flow.generate_next_packet(&mut buffer).unwrap();
        let eth = EthernetPacket::new(buffer.data()).unwrap();
        assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);
        let ip = Ipv4Packet::new(eth.payload()).unwrap();
        assert_eq!(ip.get_next_level_protocol(), IpNextHeaderProtocols::Tcp);
        assert_eq!(ip.get_total_length() as usize, eth.payload().len());
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));
    }
}

#[test]
fn icmp_over_ipv6_is_rejected() {
    let p = profile(L3Protocol::Ipv6, L4Protocol::ICMP, (3, 3), (300, 300));
    assert!(matches!(
        new_flow(&p, 0),
        Err(Error::ProtocolMismatch {
            l3: L3Protocol::Ipv6,
            l4: L4Protocol::ICMP
        })
    ));
    let p = profile(L3Protocol::Ipv4, L4Protocol::ICMPv6, (3, 3), (300, 300));
    assert!(matches!(new_flow(&p, 0), Err(Error::ProtocolMismatch { .. })));
    let p = profile(L3Protocol::Unknown, L4Protocol::UDP, (3, 3), (300, 300));
    assert!(matches!(new_flow(&p, 0), Err(Error::UnknownL3Protocol)));
    let p = profile(L3Protocol::Ipv4, L4Protocol::Unknown, (3, 3), (300, 300));
    assert!(matches!(new_flow(&p, 0), Err(Error::UnknownL4Protocol)));
}

#[test]
fn address_generator_seed_bounds() {
    assert!(matches!(
        AddressGenerator::new(0),
        Err(Error::InvalidSeed(0))
    ));
    assert!(matches!(
        AddressGenerator::new(0x7fffffff),
        Err(Error::InvalidSeed(_))
    ));
    assert!(AddressGenerator::new(1).is_ok());
    assert!(AddressGenerator::new(0x7ffffffe).is_ok());
}

#[test]
fn meter_rejects_out_of_sequence_ids() {
    let p = profile(L3Protocol::Ipv4, L4Protocol::TCP, (1, 1), (40, 40));
    let mut meter = TrafficMeter::new();
    assert!(matches!(
        meter.open_flow(2, &p),
        Err(Error::UnexpectedFlowId { .. })
    ));
}

#[test]
fn flow_is_generated_exactly_n_times() {
    let cases = [
        (L3Protocol::Ipv4, L4Protocol::TCP, (12, 9), (9_000, 4_000)),
        (L3Protocol::Ipv6, L4Protocol::TCP, (1, 0), (60, 0)),
        (L3Protocol::Ipv4, L4Protocol::UDP, (7, 0), (3_500, 0)),
        (L3Protocol::Ipv6, L4Protocol::UDP, (30, 30), (20_000, 45_000)),
        (L3Protocol::Ipv4, L4Protocol::ICMP, (4, 4), (336, 336)),
        (L3Protocol::Ipv6, L4Protocol::ICMPv6, (2, 0), (112, 0)),
    ];
    for (seed, (l3, l4, pkts, bytes)) in cases.into_iter().enumerate() {
        let p = profile(l3, l4, pkts, bytes);
        let mut flow = new_flow(&p, seed as u64).unwrap();
        let n = pkts.0 + pkts.1;
        let mut buffer = PacketBuffer::new();
        let mut times = vec![];
        let (mut fwd, mut rev) = (0, 0);
        for _ in 0..n {
            assert!(!flow.is_finished());
            let extra = flow.generate_next_packet(&mut buffer).unwrap();
            match extra.direction {
                Direction::Forward => fwd += 1,
                Direction::Reverse => rev += 1,
                Direction::Unknown => panic!("packet without direction"),
            }
            times.push(extra.time);
        }
        assert!(flow.is_finished(), "{l3} {l4}");
        assert!(matches!(
            flow.generate_next_packet(&mut buffer),
            Err(Error::NoMorePackets)
        ));
        assert_eq!((fwd, rev), pkts, "{l3} {l4}");
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times.first(), Some(&p.start_time));
        if n > 1 {
            assert_eq!(times.last(), Some(&p.end_time));
        }
    }
}

#[test]
fn forward_sizes_follow_the_byte_target() {
    for seed in 0..10 {
        let p = profile(L3Protocol::Ipv4, L4Protocol::UDP, (40, 10), (30_000, 2_000));
        let flow = new_flow(&p, seed).unwrap();
        let sizes: Vec<u64> = flow
            .planned_packets()
            .filter(|p| p.direction == Direction::Forward)
            .map(|p| p.size)
            .collect();
        assert_eq!(sizes.len(), 40);
        let total: u64 = sizes.iter().sum();
        let tolerance = (p.bytes / 100).max(50);
        assert!(
            total.abs_diff(p.bytes) <= tolerance || sizes.iter().all(|&s| s == 1),
            "seed {seed}: {total} bytes for a target of {}",
            p.bytes
        );
    }
}

#[test]
fn directions_do_not_depend_on_the_seed_count() {
    for seed in 0..20 {
        let p = profile(L3Protocol::Ipv6, L4Protocol::TCP, (17, 3), (5_000, 900));
        let flow = new_flow(&p, seed).unwrap();
        let rev = flow
            .planned_packets()
            .filter(|p| p.direction == Direction::Reverse)
            .count();
        assert_eq!(rev, 3);
        assert_eq!(flow.planned_packets().count(), 20);
    }
}

#[test]
fn meter_sees_generated_flow() {
    let p = profile(L3Protocol::Ipv4, L4Protocol::UDP, (3, 2), (900, 400));
    let mut flow = new_flow(&p, 4).unwrap();
    let mut meter = TrafficMeter::new();
    meter.open_flow(0, &p).unwrap();
    let mut buffer = PacketBuffer::new();
    while !flow.is_finished() {
        let extra = flow.generate_next_packet(&mut buffer).unwrap();
        meter
            .record_packet(0, extra.time, extra.direction, buffer.data())
            .unwrap();
    }
    meter.close_flow(0).unwrap();

    let record = &meter.records()[0];
    assert_eq!(record.fwd.packets, 3);
    assert_eq!(record.rev.packets, 2);
    assert_eq!(record.fwd.port, Some(51000));
    assert_eq!(record.rev.port, Some(80));
    assert_eq!(record.first_ts, p.start_time);
    assert_eq!(record.last_ts, p.end_time);
    assert!(record.fwd.ip.is_some());
    assert_ne!(record.fwd.ip, record.rev.ip);
}
