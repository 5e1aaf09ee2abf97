//! Message store and chunk store: the two persistent repositories the rest
//! of the pipeline depends on.

#[cfg(feature = "sqlite")]
pub mod connection;
#[cfg(feature = "sqlite")]
pub mod migrations;

pub mod chunk_store;
pub mod message_store;

pub use chunk_store::{ChunkStore, InMemoryChunkStore};
pub use message_store::{last_message, InMemoryMessageStore, MessageStore};

#[cfg(feature = "sqlite")]
pub use connection::Storage;
#[cfg(feature = "sqlite")]
pub use chunk_store::sqlite::SqliteChunkStore;
#[cfg(feature = "sqlite")]
pub use message_store::sqlite::SqliteMessageStore;
