use crate::error::{Error, Result};

use rand::Rng;
use serde::Deserialize;

/// Size of the Ethernet header removed from link-layer packet sizes
pub const ETHER_HDR_SIZE: u64 = 14;

/// A bucket of a packet size histogram. The probabilities of a histogram need not sum to 1.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IntervalInfo {
    pub from: u64,
    pub to: u64,
    pub probability: f64,
}

impl IntervalInfo {
    pub const fn new(from: u64, to: u64, probability: f64) -> Self {
        IntervalInfo {
            from,
            to,
            probability,
        }
    }

    /// Midpoint used to decide on which side of the running average the bucket lies
    pub(crate) fn midpoint(&self) -> u64 {
        self.from / 2 + self.to / 2
    }
}

/// Link-layer packet size distribution observed on typical traffic
pub const DEFAULT_PACKET_SIZE_PROBABILITIES: [IntervalInfo; 6] = [
    IntervalInfo::new(64, 79, 0.2824),
    IntervalInfo::new(80, 159, 0.073),
    IntervalInfo::new(160, 319, 0.0115),
    IntervalInfo::new(320, 639, 0.012),
    IntervalInfo::new(640, 1279, 0.0092),
    IntervalInfo::new(1280, 1500, 0.6119),
];

/// Convert link-layer sizes into L3 sizes by removing the Ethernet header
pub fn adjust_packet_sizes_to_l3(intervals: &[IntervalInfo]) -> Result<Vec<IntervalInfo>> {
    intervals
        .iter()
        .map(|interval| {
            if interval.from < ETHER_HDR_SIZE {
                return Err(Error::SizeBelowLinkHeader(interval.from));
            }
            if interval.to < ETHER_HDR_SIZE {
                return Err(Error::SizeBelowLinkHeader(interval.to));
            }
            Ok(IntervalInfo {
                from: interval.from - ETHER_HDR_SIZE,
                to: interval.to - ETHER_HDR_SIZE,
                probability: interval.probability,
            })
        })
        .collect()
}

pub(crate) fn sum_probabilities(intervals: &[IntervalInfo]) -> f64 {
    intervals.iter().map(|i| i.probability).sum()
}

/// Draw one value: pick a bucket by walking the cumulative probabilities, then draw uniformly
/// inside its bounds. Without any probability mass the first bucket is picked.
pub(crate) fn generate_random_value(
    rng: &mut impl Rng,
    intervals: &[IntervalInfo],
    prob_sum: f64,
) -> u64 {
    let drawn = rng.gen_range(0.0..=prob_sum.max(0.0));
    let mut accum = 0.0;
    for interval in intervals {
        accum += interval.probability;
        if drawn <= accum {
            return rng.gen_range(interval.from..=interval.to);
        }
    }
    // rounding may leave the draw just above the last cumulative sum
    intervals
        .last()
        .map_or(0, |interval| rng.gen_range(interval.from..=interval.to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn default_adjusts_to_l3() {
        let l3 = adjust_packet_sizes_to_l3(&DEFAULT_PACKET_SIZE_PROBABILITIES).unwrap();
        assert_eq!(l3[0], IntervalInfo::new(50, 65, 0.2824));
        assert_eq!(l3[5], IntervalInfo::new(1266, 1486, 0.6119));
    }

    #[test]
    fn too_small_bounds_are_rejected() {
        let res = adjust_packet_sizes_to_l3(&[IntervalInfo::new(10, 100, 1.0)]);
        assert!(matches!(res, Err(Error::SizeBelowLinkHeader(10))));
    }

    #[test]
    fn values_stay_in_selected_buckets() {
        let mut rng = Pcg32::seed_from_u64(0);
        let intervals = [IntervalInfo::new(10, 20, 0.0), IntervalInfo::new(100, 110, 3.0)];
        let sum = sum_probabilities(&intervals);
        for _ in 0..1000 {
            let v = generate_random_value(&mut rng, &intervals, sum);
            assert!((100..=110).contains(&v));
        }
    }

    #[test]
    fn empty_mass_picks_the_first_bucket() {
        let mut rng = Pcg32::seed_from_u64(0);
        let intervals = [IntervalInfo::new(10, 20, 0.0), IntervalInfo::new(100, 110, 0.0)];
        for _ in 0..100 {
            let v = generate_random_value(&mut rng, &intervals, 0.0);
            assert!((10..=20).contains(&v));
        }
    }
}
