//! Core domain types: identifiers, the SmartTimer record, and recipients.

mod recipient;
mod timer;
mod types;

pub use recipient::{ChannelKind, Recipient};
pub use timer::{SmartTimer, TimerState};
pub use types::{DeviceId, RecipientId, TimerId, UserId};
