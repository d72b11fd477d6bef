use super::*;
use crate::packet::Fragment;

/// Most fragments a datagram is split into
const MAX_FRAGMENTS: u64 = 4;

/// Fragmentation settings of a network layer
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fragmentation {
    pub probability: f64,
    pub min_packet_size: u64,
    /// Network header bytes in front of the fragmented data
    pub header_len: u64,
}

impl Fragmentation {
    /// Replace the datagrams selected for fragmentation by consecutive fragment packets.
    ///
    /// Every fragment is a copy of the datagram plan, so that the upper layers rebuild the same
    /// bytes, with `with_fragment` storing which slice of the data it carries.
    pub fn apply(
        &self,
        ctx: &mut PlanContext,
        with_fragment: impl Fn(&LayerParams, Fragment) -> LayerParams,
    ) {
        if self.probability <= 0.0 {
            return;
        }
        // the whole upper header must fit in the first fragment
        let min_first = round_up_to_8(ctx.next_overhead().max(8));

        let packets = std::mem::take(ctx.packets);
        let mut planned = Vec::with_capacity(packets.len());
        for packet in packets {
            let params = packet
                .layers
                .get(&ctx.index)
                .filter(|_| packet.size >= self.min_packet_size)
                .cloned();
            let Some(params) = params else {
                planned.push(packet);
                continue;
            };
            if ctx.rng.gen::<f64>() >= self.probability {
                planned.push(packet);
                continue;
            }
            let data_len = packet.size.saturating_sub(self.header_len);
            let pieces = split(&mut *ctx.rng, data_len, min_first);
            if pieces.len() < 2 {
                planned.push(packet);
                continue;
            }

            let mut offset = 0;
            for (i, &len) in pieces.iter().enumerate() {
                let mut fragment = packet.clone();
                fragment.is_continuation = i > 0;
                let more = i + 1 < pieces.len();
                fragment
                    .layers
                    .insert(ctx.index, with_fragment(&params, Fragment { offset, len, more }));
                planned.push(fragment);
                offset += len;
            }
        }
        *ctx.packets = planned;
    }
}

fn round_up_to_8(value: u64) -> u64 {
    value.div_ceil(8) * 8
}

/// Lengths of the fragments of `data_len` bytes. All but the last are multiple of 8.
fn split(rng: &mut impl Rng, data_len: u64, min_first: u64) -> Vec<usize> {
    if data_len <= min_first {
        return vec![];
    }
    let max_pieces = (data_len / min_first).clamp(2, MAX_FRAGMENTS);
    let pieces = rng.gen_range(2..=max_pieces);
    let chunk = (data_len / pieces / 8 * 8).max(min_first);

    let mut sizes = vec![];
    let mut rest = data_len;
    while rest > chunk {
        sizes.push(chunk as usize);
        rest -= chunk;
    }
    sizes.push(rest as usize);
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn split_is_aligned_and_complete() {
        let mut rng = Pcg32::seed_from_u64(0);
        for data_len in [25, 100, 481, 1460, 9000] {
            let sizes = split(&mut rng, data_len, 24);
            assert!(sizes.len() >= 2);
            assert_eq!(sizes.iter().sum::<usize>() as u64, data_len);
            assert!(sizes[0] >= 24);
            for size in &sizes[..sizes.len() - 1] {
                assert_eq!(size % 8, 0);
            }
        }
    }

    #[test]
    fn too_small_data_is_not_split() {
        let mut rng = Pcg32::seed_from_u64(0);
        assert!(split(&mut rng, 24, 24).is_empty());
        assert!(split(&mut rng, 0, 8).is_empty());
    }
}
