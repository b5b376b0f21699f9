//! Interpretation of characteristic payloads.

pub mod temperature;

pub use temperature::{TemperatureLookup, TemperatureTable};
