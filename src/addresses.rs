use crate::error::{Error, Result};

use pnet::util::MacAddr;
use serde::Deserialize;
use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const MODULUS: u64 = 0x7fff_ffff;
const MULTIPLIER: u64 = 48271;
/// Number of values the generator produces before it would cycle
const PERIOD: u64 = MODULUS - 1;

/// Deterministic generator of MAC, IPv4 and IPv6 addresses shared by all the flows of a run.
///
/// It is a Lehmer generator over `0x7fffffff` with multiplier 48271. Its period is
/// `0x7fffffff - 1`, so no value repeats before that many draws. Once the capacity is used up,
/// the seed itself is advanced by the same recurrence and the working state restarts from it,
/// which guarantees the new window starts from a value no earlier window started from.
#[derive(Debug, Clone)]
pub struct AddressGenerator {
    state: u32,
    seed_state: u32,
    capacity: u64,
}

impl AddressGenerator {
    /// The seed must lie in `[1, 0x7ffffffe]`.
    pub fn new(seed: u32) -> Result<Self> {
        if seed == 0 || u64::from(seed) >= MODULUS {
            return Err(Error::InvalidSeed(seed.into()));
        }
        let mut generator = AddressGenerator {
            state: 0,
            seed_state: seed,
            capacity: 0,
        };
        // never start from a value derived trivially from the literal seed
        generator.next_seed();
        Ok(generator)
    }

    pub fn generate_mac(&mut self) -> MacAddr {
        let [a, b, c, d] = self.next_value().to_be_bytes();
        let [e, f, _, _] = self.next_value().to_be_bytes();
        MacAddr::new(a, b, c, d, e, f)
    }

    pub fn generate_ipv4(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.next_value().to_be_bytes())
    }

    pub fn generate_ipv6(&mut self) -> Ipv6Addr {
        let mut bytes = [0u8; 16];
        for chunk in bytes.chunks_exact_mut(4) {
            chunk.copy_from_slice(&self.next_value().to_be_bytes());
        }
        Ipv6Addr::from(bytes)
    }

    /// Draw an IPv4 address and move it into one of `ranges`, if any
    pub fn generate_ipv4_in(&mut self, ranges: &[AddressRange]) -> Ipv4Addr {
        let addr = self.generate_ipv4();
        match self.pick_range(ranges) {
            Some(range) => range.apply_ipv4(addr),
            None => addr,
        }
    }

    /// Draw an IPv6 address and move it into one of `ranges`, if any
    pub fn generate_ipv6_in(&mut self, ranges: &[AddressRange]) -> Ipv6Addr {
        let addr = self.generate_ipv6();
        match self.pick_range(ranges) {
            Some(range) => range.apply_ipv6(addr),
            None => addr,
        }
    }

    fn pick_range<'a>(&mut self, ranges: &'a [AddressRange]) -> Option<&'a AddressRange> {
        match ranges.len() {
            0 => None,
            1 => ranges.first(),
            n => ranges.get(self.next_value() as usize % n),
        }
    }

    /// Remaining draws before the next reseed
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn next_value(&mut self) -> u32 {
        if self.capacity == 0 {
            self.next_seed();
        }
        self.capacity -= 1;
        self.state = step(self.state);
        self.state
    }

    fn next_seed(&mut self) {
        self.capacity = PERIOD;
        self.seed_state = step(self.seed_state);
        self.state = self.seed_state;
    }
}

/// A network prefix such as `10.0.0.0/8`. Addresses moved into the range keep their host
/// bits and take the prefix bits of the base address.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct AddressRange {
    base: IpAddr,
    prefix_len: u8,
}

impl AddressRange {
    pub fn new(base: IpAddr, prefix_len: u8) -> Result<Self> {
        let max_len = if base.is_ipv4() { 32 } else { 128 };
        if prefix_len > max_len {
            return Err(Error::Config(format!(
                "prefix length {prefix_len} of {base} is longer than {max_len}"
            )));
        }
        Ok(AddressRange { base, prefix_len })
    }

    pub fn base(&self) -> IpAddr {
        self.base
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Replace the prefix of an IPv4 address. An IPv6 range leaves it unchanged.
    pub fn apply_ipv4(&self, addr: Ipv4Addr) -> Ipv4Addr {
        let IpAddr::V4(base) = self.base else {
            return addr;
        };
        let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
        Ipv4Addr::from((u32::from(base) & mask) | (u32::from(addr) & !mask))
    }

    /// Replace the prefix of an IPv6 address. An IPv4 range leaves it unchanged.
    pub fn apply_ipv6(&self, addr: Ipv6Addr) -> Ipv6Addr {
        let IpAddr::V6(base) = self.base else {
            return addr;
        };
        let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
        Ipv6Addr::from((u128::from(base) & mask) | (u128::from(addr) & !mask))
    }
}

impl FromStr for AddressRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid address range {s:?}"));
        let (base, len) = s.split_once('/').ok_or_else(invalid)?;
        let base = base.trim().parse().map_err(|_| invalid())?;
        let len = len.trim().parse().map_err(|_| invalid())?;
        AddressRange::new(base, len)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len)
    }
}

fn step(value: u32) -> u32 {
    // the result is below the modulus so it always fits
    (u64::from(value) * MULTIPLIER % MODULUS) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seed_bounds() {
        assert!(matches!(AddressGenerator::new(0), Err(Error::InvalidSeed(0))));
        assert!(matches!(
            AddressGenerator::new(0x7fff_ffff),
            Err(Error::InvalidSeed(_))
        ));
        assert!(AddressGenerator::new(1).is_ok());
        assert!(AddressGenerator::new(0x7fff_fffe).is_ok());
    }

    #[test]
    fn first_value_skips_the_literal_seed() {
        let mut generator = AddressGenerator::new(1).unwrap();
        // seed 1 is advanced once at construction, then once more on the first draw
        assert_eq!(generator.next_value(), 48271 * 48271 % 0x7fff_ffff);
    }

    #[test]
    fn values_do_not_repeat() {
        let mut generator = AddressGenerator::new(12345).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..200_000 {
            assert!(seen.insert(generator.next_value()));
        }
    }

    #[test]
    fn reseed_when_capacity_is_exhausted() {
        let mut generator = AddressGenerator::new(7).unwrap();
        let first_seed_state = generator.seed_state;
        generator.capacity = 1;
        generator.next_value();
        assert_eq!(generator.capacity(), 0);
        let value = generator.next_value();
        assert_ne!(generator.seed_state, first_seed_state);
        assert_eq!(generator.seed_state, step(first_seed_state));
        assert_eq!(value, step(generator.seed_state));
        assert_eq!(generator.capacity(), PERIOD - 1);
    }

    #[test]
    fn address_packing() {
        let mut a = AddressGenerator::new(42).unwrap();
        let mut b = AddressGenerator::new(42).unwrap();
        let v0 = b.next_value().to_be_bytes();
        let v1 = b.next_value().to_be_bytes();
        let mac = a.generate_mac();
        assert_eq!(mac, MacAddr::new(v0[0], v0[1], v0[2], v0[3], v1[0], v1[1]));

        let ip = a.generate_ipv4();
        assert_eq!(ip.octets(), b.next_value().to_be_bytes());

        let ip6 = a.generate_ipv6().octets();
        for chunk in ip6.chunks_exact(4) {
            assert_eq!(chunk, b.next_value().to_be_bytes());
        }
    }

    #[test]
    fn different_seeds_differ() {
        let mut a = AddressGenerator::new(1).unwrap();
        let mut b = AddressGenerator::new(2).unwrap();
        assert_ne!(a.generate_ipv4(), b.generate_ipv4());
    }

    #[test]
    fn range_parsing() {
        let range: AddressRange = "10.0.0.0/8".parse().unwrap();
        assert_eq!(range.base(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(range.prefix_len(), 8);
        assert_eq!(range.to_string(), "10.0.0.0/8");
        assert!("2001:db8::/32".parse::<AddressRange>().is_ok());
        for invalid in ["10.0.0.0", "10.0.0.0/33", "fe80::/129", "host/8", "10.0.0.0/x"] {
            assert!(
                matches!(invalid.parse::<AddressRange>(), Err(Error::Config(_))),
                "{invalid}"
            );
        }
    }

    #[test]
    fn range_keeps_host_bits() {
        let range: AddressRange = "10.20.0.0/16".parse().unwrap();
        assert_eq!(
            range.apply_ipv4(Ipv4Addr::new(192, 168, 7, 9)),
            Ipv4Addr::new(10, 20, 7, 9)
        );
        let range: AddressRange = "172.16.0.0/12".parse().unwrap();
        assert_eq!(
            range.apply_ipv4(Ipv4Addr::new(255, 255, 1, 2)),
            Ipv4Addr::new(172, 31, 1, 2)
        );
        let everything: AddressRange = "1.2.3.4/0".parse().unwrap();
        assert_eq!(
            everything.apply_ipv4(Ipv4Addr::new(8, 8, 8, 8)),
            Ipv4Addr::new(8, 8, 8, 8)
        );
        let single: AddressRange = "1.2.3.4/32".parse().unwrap();
        assert_eq!(
            single.apply_ipv4(Ipv4Addr::new(8, 8, 8, 8)),
            Ipv4Addr::new(1, 2, 3, 4)
        );

        let range: AddressRange = "2001:db8::/32".parse().unwrap();
        let addr: Ipv6Addr = "fe80:1234:aaaa:bbbb::1".parse().unwrap();
        assert_eq!(
            range.apply_ipv6(addr),
            "2001:db8:aaaa:bbbb::1".parse::<Ipv6Addr>().unwrap()
        );
        // other family
        assert_eq!(range.apply_ipv4(Ipv4Addr::new(8, 8, 8, 8)), Ipv4Addr::new(8, 8, 8, 8));
    }

    #[test]
    fn generated_addresses_stay_in_ranges() {
        let ranges: Vec<AddressRange> = ["10.0.0.0/8", "192.168.0.0/16"]
            .iter()
            .map(|r| r.parse().unwrap())
            .collect();
        let mut generator = AddressGenerator::new(99).unwrap();
        let (mut ten, mut local) = (0, 0);
        for _ in 0..1000 {
            let ip = generator.generate_ipv4_in(&ranges);
            match ip.octets() {
                [10, ..] => ten += 1,
                [192, 168, ..] => local += 1,
                _ => panic!("{ip} outside the ranges"),
            }
        }
        assert!(ten > 0 && local > 0);

        let ranges = ["fd00::/8".parse().unwrap()];
        for _ in 0..100 {
            assert_eq!(generator.generate_ipv6_in(&ranges).octets()[0], 0xfd);
        }
        let mut plain = AddressGenerator::new(99).unwrap();
        let mut ranged = AddressGenerator::new(99).unwrap();
        assert_eq!(plain.generate_ipv4(), ranged.generate_ipv4_in(&[]));
    }
}
