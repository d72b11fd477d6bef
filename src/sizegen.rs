use crate::error::{Error, Result};
use crate::histogram::*;

use rand::seq::SliceRandom;
use rand::Rng;

/// Maximum number of resampling attempts when generating
const MAX_ATTEMPTS: u32 = 2000;

/// How much the generated byte count may differ from the desired one
const MAX_DIFF_RATIO: f64 = 0.01;

/// Minimal allowed difference, small byte counts might never be matched exactly
const MIN_DIFF: u64 = 50;

/// How many pooled values are searched when looking for an exact value
const GET_EXACT_MAX_DISTANCE: usize = 1000;

/// Above this relative difference the histogram is abandoned for the uniform fallback
const DIFF_RATIO_FALLBACK_TO_UNIFORM: f64 = 0.2;

/// Generates the sizes of the packets of one direction of a flow, so that their sum
/// approximates the byte count of the flow while following a size histogram.
///
/// The pool of planned values is an unordered multiset: values are taken either from its end
/// or by swapping the closest value to the end, both in O(1) removal.
#[derive(Debug, Clone)]
pub struct PacketSizeGenerator {
    intervals: Vec<IntervalInfo>,
    num_pkts: u64,
    num_bytes: u64,
    assigned_pkts: u64,
    assigned_bytes: u64,
    values: Vec<u64>,
}

impl PacketSizeGenerator {
    pub fn new(intervals: &[IntervalInfo], num_pkts: u64, num_bytes: u64) -> Result<Self> {
        if intervals.is_empty() {
            return Err(Error::EmptyHistogram);
        }
        Ok(PacketSizeGenerator {
            intervals: intervals.to_vec(),
            num_pkts,
            num_bytes,
            assigned_pkts: 0,
            assigned_bytes: 0,
            values: vec![],
        })
    }

    /// Plan values for the packets and bytes not consumed yet by `get_value_exact`
    pub fn plan_remaining(&mut self, rng: &mut impl Rng) {
        let rem_pkts = self.num_pkts.saturating_sub(self.assigned_pkts);
        let rem_bytes = self.num_bytes.saturating_sub(self.assigned_bytes);
        self.generate(rng, rem_pkts, rem_bytes);
    }

    /// Take one planned value. When the pool is empty, a fresh value is drawn from the histogram.
    pub fn get_value(&mut self, rng: &mut impl Rng) -> u64 {
        let value = match self.values.pop() {
            Some(value) => value,
            None => generate_random_value(
                rng,
                &self.intervals,
                sum_probabilities(&self.intervals),
            ),
        };
        self.assigned_pkts += 1;
        self.assigned_bytes += value;
        value
    }

    /// Account for a packet whose size is already fixed, removing the pooled value closest to
    /// it. Only a window of the pool is searched when the pool is large. Returns the removed
    /// value, if any.
    pub fn get_value_exact(&mut self, value: u64, rng: &mut impl Rng) -> Option<u64> {
        self.assigned_pkts += 1;
        self.assigned_bytes += value;

        if self.values.is_empty() {
            return None;
        }

        let (start, end) = if self.values.len() <= GET_EXACT_MAX_DISTANCE {
            (0, self.values.len())
        } else {
            let start = rng.gen_range(0..=self.values.len() - GET_EXACT_MAX_DISTANCE);
            (start, start + GET_EXACT_MAX_DISTANCE)
        };

        let closest = (start..end)
            .min_by_key(|&i| self.values[i].abs_diff(value))
            .unwrap_or(start);
        Some(self.values.swap_remove(closest))
    }

    /// Number of planned values not consumed yet
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    pub fn assigned_bytes(&self) -> u64 {
        self.assigned_bytes
    }

    pub fn assigned_pkts(&self) -> u64 {
        self.assigned_pkts
    }

    /// Log the target and the achieved packet and byte counts
    pub fn print_report(&self) {
        let d_bytes = if self.num_bytes == 0 {
            0.0
        } else {
            self.num_bytes.abs_diff(self.assigned_bytes) as f64 / self.num_bytes as f64
        };
        let d_pkts = if self.num_pkts == 0 {
            0.0
        } else {
            self.num_pkts.abs_diff(self.assigned_pkts) as f64 / self.num_pkts as f64
        };
        log::debug!(
            "[Bytes] target={} actual={} (diff={:.2}%)  [Pkts] target={} actual={} (diff={:.2}%)",
            self.num_bytes,
            self.assigned_bytes,
            d_bytes * 100.0,
            self.num_pkts,
            self.assigned_pkts,
            d_pkts * 100.0
        );
    }

    fn generate(&mut self, rng: &mut impl Rng, desired_pkts: u64, desired_bytes: u64) {
        // zero bytes keeps a pool of zero sizes, which leaves the packets at their current size
        self.values = vec![0; desired_pkts as usize];
        if desired_pkts == 0 || desired_bytes == 0 {
            return;
        }
        if desired_pkts == 1 {
            self.values[0] = desired_bytes;
            return;
        }

        let mut intervals = self.intervals.clone();
        let mut prob_sum = sum_probabilities(&intervals);
        let mut values_sum = 0;
        for value in self.values.iter_mut() {
            *value = generate_random_value(rng, &intervals, prob_sum);
            values_sum += *value;
        }

        let max_diff = ((MAX_DIFF_RATIO * desired_bytes as f64) as u64).max(MIN_DIFF);
        let target_min = desired_bytes.saturating_sub(max_diff);
        let target_max = desired_bytes + max_diff;
        let in_band = |sum: u64| sum >= target_min && sum <= target_max;

        log::trace!("VALUES sum={values_sum} desired={desired_bytes}");

        let mut num_attempts = MAX_ATTEMPTS;
        let mut best_diff = values_sum.abs_diff(desired_bytes);
        let mut best_values = self.values.clone();
        while !in_band(values_sum) && num_attempts > 0 {
            num_attempts -= 1;

            // Only keep the buckets that move the average in the right direction
            let avg_value = values_sum / desired_pkts;
            let orig_intervals = intervals.clone();
            for inter in intervals.iter_mut() {
                let too_low = values_sum < target_min && inter.midpoint() < avg_value;
                let too_high = values_sum > target_max && inter.midpoint() > avg_value;
                if too_low || too_high {
                    inter.probability = 0.0;
                }
            }
            prob_sum = sum_probabilities(&intervals);

            for i in 0..self.values.len() {
                let new_value = generate_random_value(rng, &intervals, prob_sum);
                values_sum = values_sum - self.values[i] + new_value;
                self.values[i] = new_value;

                if in_band(values_sum) {
                    break;
                }

                let diff = values_sum.abs_diff(desired_bytes);
                if diff < best_diff {
                    best_values.clone_from(&self.values);
                    best_diff = diff;
                }
            }

            log::trace!("VALUES sum={values_sum} desired={desired_bytes}");

            intervals = orig_intervals;
            prob_sum = sum_probabilities(&intervals);

            let diff = values_sum.abs_diff(desired_bytes);
            if diff < best_diff {
                best_values.clone_from(&self.values);
                best_diff = diff;
            }
        }

        let final_diff_ratio = best_diff as f64 / desired_bytes as f64;
        log::trace!(
            "Final diff: {best_diff}, ratio: {final_diff_ratio}, desired: {desired_bytes}"
        );

        if final_diff_ratio > DIFF_RATIO_FALLBACK_TO_UNIFORM {
            self.values.fill(1);
            log::info!(
                "Generated values difference too large {final_diff_ratio}, fallback to uniform distribution"
            );
        } else {
            self.values = best_values;
            self.values.shuffle(rng);
        }
    }
}
