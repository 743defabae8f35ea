//! Node slot & persistence runtime.
//!
//! Classes declare typed slots once; nodes built from them go through an
//! ordered lifecycle, live in an owner/subnode graph, post change
//! notifications and persist through a store with coalesced, asynchronous
//! writes.

pub mod class;
pub mod config;
pub mod db;
pub mod graph;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;

pub use class::{ClassDef, ClassError, ClassRegistry, BASE_CLASS, SUBTITLE_SLOT, TITLE_SLOT};
pub use config::{ConfigError, RuntimeConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use graph::{GraphResult, NodeError, NodeFlags, NodeGraph, NodeId};
pub use lifecycle::{InitContext, Phase};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::slot::{Slot, SlotKey};
pub use model::value::{FromSlotValue, SlotValue, TypeTag};
pub use notify::{
    Notification, NotificationBus, ObserverId, DID_CHANGE_SUBNODE_LIST, DID_UPDATE_SLOT,
};
pub use store::{
    FlushReport, GcReport, LoadedTree, MemoryBackend, NodeRecord, RestoreFailure,
    RestoreOutcome, SqliteBackend, Store, StoreBackend, StoreError, StoreResult, WriteJob,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
