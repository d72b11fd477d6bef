use crate::addresses::AddressRange;
use crate::error::{Error, Result};
use crate::histogram::*;

use serde::Deserialize;
use std::fs;

const MAX_VLAN_ID: u16 = 4095;
const MAX_MPLS_LABEL: u32 = (1 << 20) - 1;

/// Settings of an IP version
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct IpConfig {
    /// Prefixes the generated addresses are confined to, any address when empty
    pub ip_range: Vec<AddressRange>,
    pub fragmentation_probability: f64,
    pub min_packet_size_to_fragment: u64,
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig {
            ip_range: vec![],
            fragmentation_probability: 0.0,
            min_packet_size_to_fragment: 512,
        }
    }
}

/// A header inserted between the link layer and the network layer
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncapsulationLayer {
    Vlan { id: u16 },
    Mpls { label: u32 },
}

/// An ordered list of encapsulation headers, chosen for a flow with some probability
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EncapsulationVariant {
    pub probability: f64,
    pub layers: Vec<EncapsulationLayer>,
}

/// Run configuration
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub ipv4: IpConfig,
    pub ipv6: IpConfig,
    pub encapsulation: Vec<EncapsulationVariant>,
    /// Link layer packet size histogram, replacing the default one
    pub packet_size_probabilities: Option<Vec<IntervalInfo>>,
}

impl Config {
    /// The packet size histogram in network layer sizes
    pub fn l3_packet_sizes(&self) -> Result<Vec<IntervalInfo>> {
        match &self.packet_size_probabilities {
            Some(intervals) => adjust_packet_sizes_to_l3(intervals),
            None => adjust_packet_sizes_to_l3(&DEFAULT_PACKET_SIZE_PROBABILITIES),
        }
    }

    /// Check the values serde cannot
    pub fn validate(&self) -> Result<()> {
        for (name, ip, v4) in [("ipv4", &self.ipv4, true), ("ipv6", &self.ipv6, false)] {
            if let Some(range) = ip.ip_range.iter().find(|r| r.base().is_ipv4() != v4) {
                return Err(Error::Config(format!(
                    "{name}: address range {range} is of the other IP version"
                )));
            }
            if !(0.0..=1.0).contains(&ip.fragmentation_probability) {
                return Err(Error::Config(format!(
                    "{name}: fragmentation probability must be in [0, 1], got {}",
                    ip.fragmentation_probability
                )));
            }
        }

        let mut sum = 0.0;
        for variant in self.encapsulation.iter() {
            if !(0.0..=1.0).contains(&variant.probability) {
                return Err(Error::Config(format!(
                    "encapsulation probability must be in [0, 1], got {}",
                    variant.probability
                )));
            }
            sum += variant.probability;
            for layer in variant.layers.iter() {
                match *layer {
                    EncapsulationLayer::Vlan { id } if id > MAX_VLAN_ID => {
                        return Err(Error::Config(format!("invalid VLAN id {id}")));
                    }
                    EncapsulationLayer::Mpls { label } if label > MAX_MPLS_LABEL => {
                        return Err(Error::Config(format!("invalid MPLS label {label}")));
                    }
                    _ => (),
                }
            }
        }
        if sum > 1.0 + 1e-9 {
            return Err(Error::Config(format!(
                "encapsulation probabilities sum to {sum}, more than 1"
            )));
        }

        if let Some(intervals) = &self.packet_size_probabilities {
            if intervals.is_empty() {
                return Err(Error::EmptyHistogram);
            }
            for interval in intervals.iter() {
                if interval.from > interval.to {
                    return Err(Error::Config(format!(
                        "packet size interval {}-{} is reversed",
                        interval.from, interval.to
                    )));
                }
                if interval.probability < 0.0 {
                    return Err(Error::Config(format!(
                        "packet size interval {}-{} has a negative probability",
                        interval.from, interval.to
                    )));
                }
            }
            adjust_packet_sizes_to_l3(intervals)?;
        }
        Ok(())
    }
}

/// Parse and validate a TOML configuration
pub fn import_config(config: &str) -> Result<Config> {
    let config: Config = toml::from_str(config)?;
    config.validate()?;
    log::info!(
        "Configuration loaded ({} encapsulation variants)",
        config.encapsulation.len()
    );
    Ok(config)
}

pub fn load_config(path: &str) -> Result<Config> {
    import_config(&fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = import_config("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ipv4.min_packet_size_to_fragment, 512);
        assert_eq!(config.l3_packet_sizes().unwrap().len(), 6);
    }

    #[test]
    fn full_config() {
        let config = import_config(
            r#"
            [ipv4]
            ip_range = ["10.0.0.0/8", "192.168.1.0/24"]
            fragmentation_probability = 0.1
            min_packet_size_to_fragment = 1000

            [ipv6]
            ip_range = ["fd00::/8"]
            fragmentation_probability = 0.05

            [[encapsulation]]
            probability = 0.3
            layers = [{ vlan = { id = 10 } }, { mpls = { label = 1000 } }]

            [[encapsulation]]
            probability = 0.2
            layers = [{ mpls = { label = 20 } }]

            [[packet_size_probabilities]]
            from = 64
            to = 100
            probability = 0.5

            [[packet_size_probabilities]]
            from = 1000
            to = 1500
            probability = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.ipv4.fragmentation_probability, 0.1);
        assert_eq!(config.ipv4.min_packet_size_to_fragment, 1000);
        assert_eq!(config.ipv6.min_packet_size_to_fragment, 512);
        assert_eq!(config.ipv4.ip_range.len(), 2);
        assert_eq!(config.ipv4.ip_range[1].to_string(), "192.168.1.0/24");
        assert_eq!(config.ipv6.ip_range[0].prefix_len(), 8);
        assert_eq!(config.encapsulation.len(), 2);
        assert_eq!(
            config.encapsulation[0].layers,
            vec![
                EncapsulationLayer::Vlan { id: 10 },
                EncapsulationLayer::Mpls { label: 1000 }
            ]
        );
        let sizes = config.l3_packet_sizes().unwrap();
        assert_eq!(sizes[0], IntervalInfo::new(50, 86, 0.5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            import_config("[ipv4]\nfragmentation_probability = 1.5"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            import_config(
                "[[encapsulation]]\nprobability = 0.5\nlayers = [{ vlan = { id = 5000 } }]"
            ),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            import_config(
                "[[encapsulation]]\nprobability = 0.7\nlayers = []\n[[encapsulation]]\nprobability = 0.7\nlayers = []"
            ),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            import_config("[[packet_size_probabilities]]\nfrom = 10\nto = 100\nprobability = 1.0"),
            Err(Error::SizeBelowLinkHeader(10))
        ));
        assert!(matches!(
            import_config("[ipv4]\nip_range = [\"fd00::/8\"]"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            import_config("[ipv6]\nip_range = [\"10.0.0.0/8\"]"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            import_config("[ipv4]\nip_range = [\"10.0.0.0/40\"]"),
            Err(Error::ConfigParse(_))
        ));
        assert!(matches!(
            import_config("unknown = 3"),
            Err(Error::ConfigParse(_))
        ));
    }
}
