//! courier wires the send endpoint and the delivery worker together around a
//! shared broker, configured from a single RON file.

pub mod config;
pub mod controller;

pub use config::{Config, find_config_file};
pub use controller::{Courier, Running};
