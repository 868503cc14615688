pub mod api;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod notify;
pub mod realtime;
pub mod storage;
pub mod wire;

pub use self::core::{
    ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId,
};
pub use engine::{EngineError, RecoverySummary, TimerEngine};
pub use events::{EventBus, EventHandler, TimerEvent};
pub use realtime::{Broadcaster, RealtimeForwarder, RealtimeFrame};
pub use storage::{InMemoryStorage, Storage, StorageError, TimerPatch};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
