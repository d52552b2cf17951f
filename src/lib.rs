mod client;
pub mod convert;
mod debounce;
mod device;
mod diff;
mod discovery;
mod error;
mod gateway;
mod logger;
mod protocol;
mod session;
mod store;
pub mod translator;
mod types;

pub use client::{CloudClient, CloudClientBuilder, RESYNC_INTERVAL};
pub use debounce::{BatchHandler, Debouncer, PendingWrite, DEBOUNCE_WINDOW};
pub use device::DeviceBinding;
pub use discovery::{DeviceDiscoveryCache, RecordSink};
pub use error::{Error, Result};
pub use gateway::CommandGateway;
pub use logger::MessageLogMode;
pub use session::{Session, SessionManager, AUTH_GUARD, REFRESH_MARGIN};
pub use store::{CapabilityStore, MemoryStore};
pub use translator::{CapabilitySet, CapabilityWrite, OnlineTransition, Translator};
pub use types::*;
