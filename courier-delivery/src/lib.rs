//! Delivery side of courier: turns messages published on `email/outgoing` into
//! SMTP transactions and reports how each one went.

mod error;
pub mod resolver;
pub mod worker;

pub use error::{ConnectError, WorkerError};
pub use resolver::{DropReason, Resolution, generate_address, resolve_addresses};
pub use worker::DeliveryWorker;
