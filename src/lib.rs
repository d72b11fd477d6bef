pub mod addresses;
pub mod buffer;
pub mod config;
pub mod error;
pub mod export;
pub mod flow;
pub mod generator;
pub mod histogram;
pub mod layers;
pub mod meter;
pub mod packet;
pub mod profiles;
pub mod sizegen;
pub mod structs;
pub mod ui;

pub use error::{Error, Result};
