use crate::addresses::AddressGenerator;
use crate::buffer::PacketBuffer;
use crate::config::Config;
use crate::error::Result;
use crate::flow::Flow;
use crate::meter::TrafficMeter;
use crate::structs::*;

use rand::Rng;
use rand_core::SeedableRng;
use rand_pcg::Pcg32;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

/// Largest seed accepted by the address generator
const MAX_ADDRESS_SEED: u64 = 0x7ffffffe;

/// A flow with packets left, ordered so that the heap pops the earliest next packet first
#[derive(Debug)]
struct ActiveFlow {
    next_time: Duration,
    flow: Flow,
}

impl ActiveFlow {
    fn new(flow: Flow) -> Option<Self> {
        flow.next_packet_time()
            .map(|next_time| ActiveFlow { next_time, flow })
    }
}

impl PartialEq for ActiveFlow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ActiveFlow {}

impl Ord for ActiveFlow {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap
        other
            .next_time
            .cmp(&self.next_time)
            .then_with(|| other.flow.id().cmp(&self.flow.id()))
    }
}

impl PartialOrd for ActiveFlow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Turns a set of flow profiles into a single time-ordered packet stream.
///
/// Flows are created when their first packet is due, so only the flows overlapping the
/// current time are kept in memory.
pub struct Generator {
    config: Config,
    addresses: AddressGenerator,
    rng: Pcg32,
    meter: TrafficMeter,
    pending: VecDeque<FlowProfile>,
    active: BinaryHeap<ActiveFlow>,
    buffer: PacketBuffer,
    next_id: u64,
    skipped_flows: u64,
}

impl Generator {
    pub fn new(mut profiles: Vec<FlowProfile>, config: Config, seed: u64) -> Result<Self> {
        profiles.sort_by_key(|p| p.start_time);
        let address_seed = seed % MAX_ADDRESS_SEED + 1;
        log::debug!("Address generator seeded with {address_seed}");
        Ok(Generator {
            config,
            addresses: AddressGenerator::new(address_seed as u32)?,
            rng: Pcg32::seed_from_u64(seed),
            meter: TrafficMeter::new(),
            pending: profiles.into(),
            active: BinaryHeap::new(),
            buffer: PacketBuffer::new(),
            next_id: 0,
            skipped_flows: 0,
        })
    }

    /// Create the flows of all the profiles starting before the next active packet
    fn admit_flows(&mut self) -> Result<()> {
        while let Some(profile) = self.pending.front() {
            if let Some(next) = self.active.peek() {
                if profile.start_time > next.next_time {
                    break;
                }
            }
            let Some(profile) = self.pending.pop_front() else {
                break;
            };
            let seed = self.rng.gen::<u64>();
            let id = self.next_id;
            match Flow::new(id, &profile, &mut self.addresses, &self.config, seed) {
                Ok(flow) => {
                    self.next_id += 1;
                    self.meter.open_flow(id, &profile)?;
                    match ActiveFlow::new(flow) {
                        Some(active) => self.active.push(active),
                        None => self.meter.close_flow(id)?,
                    }
                }
                Err(e) => {
                    self.skipped_flows += 1;
                    log::warn!("Skipping flow profile starting at {:?}: {e}", profile.start_time);
                }
            }
        }
        Ok(())
    }

    /// The next packet of the run, in time order, or None once every flow is drained
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        self.admit_flows()?;
        let Some(mut active) = self.active.pop() else {
            return Ok(None);
        };

        let id = active.flow.id();
        let extra = active.flow.generate_next_packet(&mut self.buffer)?;
        self.meter
            .record_packet(id, extra.time, extra.direction, self.buffer.data())?;

        match active.flow.next_packet_time() {
            Some(next_time) => {
                active.next_time = next_time;
                self.active.push(active);
            }
            None => {
                log::trace!("Flow {id} done");
                self.meter.close_flow(id)?;
            }
        }

        Ok(Some(Packet {
            timestamp: extra.time,
            data: self.buffer.data().to_vec(),
        }))
    }

    /// Number of flows created so far
    pub fn flows(&self) -> u64 {
        self.next_id
    }

    /// Number of profiles that could not be turned into a flow
    pub fn skipped_flows(&self) -> u64 {
        self.skipped_flows
    }

    pub fn meter(&self) -> &TrafficMeter {
        &self.meter
    }

    pub fn into_meter(self) -> TrafficMeter {
        self.meter
    }
}

impl Iterator for Generator {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(start_ms: u64, end_ms: u64, l4: L4Protocol, pkts: u64) -> FlowProfile {
        FlowProfile {
            start_time: Duration::from_millis(start_ms),
            end_time: Duration::from_millis(end_ms),
            l3_proto: L3Protocol::Ipv4,
            l4_proto: l4,
            src_port: 1234,
            dst_port: 80,
            packets: pkts,
            bytes: pkts * 200,
            packets_rev: pkts,
            bytes_rev: pkts * 600,
            ..Default::default()
        }
    }

    #[test]
    fn packets_are_time_ordered() {
        let profiles = vec![
            profile(5_000, 9_000, L4Protocol::TCP, 8),
            profile(1_000, 6_000, L4Protocol::UDP, 5),
            profile(1_000, 1_000, L4Protocol::UDP, 1),
        ];
        let generator = Generator::new(profiles, Config::default(), 42).unwrap();
        let packets: Vec<Packet> = generator.map(|p| p.unwrap()).collect();
        assert_eq!(packets.len(), 16 + 10 + 2);
        assert!(packets.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(packets[0].timestamp, Duration::from_secs(1));
        assert_eq!(packets.last().unwrap().timestamp, Duration::from_secs(9));
    }

    #[test]
    fn failing_profiles_are_skipped() {
        let mut icmp_over_v6 = profile(2_000, 3_000, L4Protocol::ICMP, 2);
        icmp_over_v6.l3_proto = L3Protocol::Ipv6;
        let profiles = vec![
            profile(1_000, 2_000, L4Protocol::UDP, 2),
            icmp_over_v6,
            profile(3_000, 4_000, L4Protocol::UDP, 2),
        ];
        let mut generator = Generator::new(profiles, Config::default(), 7).unwrap();
        let mut count = 0;
        while generator.next_packet().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 8);
        assert_eq!(generator.flows(), 2);
        assert_eq!(generator.skipped_flows(), 1);

        let meter = generator.into_meter();
        assert_eq!(meter.records().len(), 2);
        assert!(meter.records().iter().all(|r| r.closed));
        assert_eq!(meter.records()[1].first_ts, Duration::from_secs(3));
    }

    #[test]
    fn same_seed_same_run() {
        let profiles = vec![
            profile(0, 10_000, L4Protocol::TCP, 20),
            profile(500, 4_000, L4Protocol::UDP, 10),
        ];
        let a: Vec<Packet> = Generator::new(profiles.clone(), Config::default(), 3)
            .unwrap()
            .map(|p| p.unwrap())
            .collect();
        let b: Vec<Packet> = Generator::new(profiles, Config::default(), 3)
            .unwrap()
            .map(|p| p.unwrap())
            .collect();
        assert_eq!(a, b);
    }
}
