//! Error types of the generator.
//!
//! Construction-time problems (bad seed, unsupported protocol pairing, broken
//! histogram or configuration) abort the flow being built. Sequencing errors
//! (asking an exhausted flow for a packet, opening flows out of order) are
//! contract violations of the caller.

use crate::buffer::HeaderKind;
use crate::layers::LayerKind;
use crate::structs::{L3Protocol, L4Protocol};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid seed value {0}, seed must be in range 1 - 2147483646")]
    InvalidSeed(u64),

    #[error("unknown L3 protocol")]
    UnknownL3Protocol,

    #[error("unknown L4 protocol")]
    UnknownL4Protocol,

    #[error("L4 protocol is {l4} but L3 protocol is {l3}")]
    ProtocolMismatch { l3: L3Protocol, l4: L4Protocol },

    #[error("packet size bound {0} is smaller than the size of an L2 header")]
    SizeBelowLinkHeader(u64),

    #[error("packet size histogram is empty")]
    EmptyHistogram,

    #[error("invalid flow profile: {0}")]
    InvalidProfile(String),

    #[error("no more packets to generate in flow")]
    NoMorePackets,

    #[error("unexpected flow ID {got}, expected {expected}")]
    UnexpectedFlowId { got: u64, expected: u64 },

    #[error("unknown flow ID {0}")]
    UnknownFlowId(u64),

    #[error("cannot convert timestamp to microseconds due to overflow")]
    TimestampOverflow,

    #[error("buffer too short for {0:?} header")]
    HeaderTooShort(HeaderKind),

    #[error("no {0:?} parameters planned for the packet")]
    MissingLayerParams(LayerKind),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("profiles line {line}: {reason}")]
    Profile { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap_file::PcapError),
}

pub type Result<T> = std::result::Result<T, Error>;
