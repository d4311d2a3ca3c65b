pub mod address;
pub mod directory;
pub mod error;
pub mod logging;
pub mod message;
pub mod outcome;
pub mod pubsub;
pub mod settings;

pub use tracing;

pub use address::{AddressList, Mailbox, RecipientEntry};
pub use directory::{Directory, MemoryDirectory, User};
pub use message::OutgoingMessage;
pub use outcome::DeliveryOutcome;
pub use pubsub::{Broker, ChannelName, Payload, Subscription};
pub use settings::{MemorySettings, SettingValue, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
