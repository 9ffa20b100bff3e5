#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fluxa-storage** – Trait abstractions for the core's external
//! collaborators, plus in-memory, filesystem, and Postgres adapters
//! (§10.1).
//!
//! `traits` defines [`QueueTransport`](traits::QueueTransport),
//! [`BlobStore`](traits::BlobStore), [`NotificationBus`](traits::NotificationBus),
//! and [`RelationalStore`](traits::RelationalStore). `memory` supplies an
//! in-memory fake of each, used by tests and local development. `postgres`
//! and `fs_blob` supply the durable adapters the service binary wires up by
//! default.

pub mod fs_blob;
pub mod memory;
pub mod postgres;
pub mod timeout;
pub mod traits;

pub use fs_blob::FilesystemBlobStore;
pub use memory::{MemoryBlobStore, MemoryNotificationBus, MemoryQueue, MemoryStore, ProcessedNotification};
pub use postgres::PostgresStore;
pub use timeout::{TimeoutBlobStore, TimeoutLedger, TimeoutRelationalStore};
pub use traits::{
    BlobError, BlobStore, NotificationBus, NotificationError, PayloadMode, PersistedEvent,
    QueueError, QueueMessage, QueueTransport, ReceivedMessage, RelationalStore,
};
