pub mod broker;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod notifier;
pub mod sequencer;
pub mod supervisor;

pub use broker::{Broker, SubscriberId};
pub use config::{compile_all, compile_runner_cfg, CompiledCase, NotifyTarget, RunnerRuntimeConfig};
pub use document::{normalise, StateDocument};
pub use error::{Result, SupervisorError};
pub use events::Event;
pub use notifier::{
    JournalRow, JournalSink, Notifier, NotificationTransport, NotifyProfileDirectory, NotifyProfileView,
    TransportError,
};
pub use sequencer::Sequencer;
pub use supervisor::{NullStatusSink, RunnerSnapshot, RuntimeStatusSink, Supervisor};
