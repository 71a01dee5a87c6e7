//! # ShelfDB Core
//!
//! Sharded record store engine for ShelfDB.
//!
//! This crate provides:
//! - Collections of open field maps, sharded over `groups` files by id
//! - Secondary indexes per declared field, as files or directory trees
//! - Filter resolution with ordering, paging and projection
//! - A per-collection processing loop executing verbs in submission order
//! - Lock markers with staleness reclamation for instances sharing a directory
//! - Foreign-key relations with joined reads and cascading drops
//!
//! ## Example
//!
//! ```rust,no_run
//! use shelfdb_core::{document, Collection, CollectionConfig};
//!
//! let config = CollectionConfig::new().groups(4).index_fields(["a", "b"]);
//! let collection = Collection::open("data/items", config)?;
//! collection.new(document([("a", 1), ("b", 2), ("c", 3)]))?;
//! assert_eq!(collection.count(&document([("a", 1)]))?, 1);
//! # Ok::<(), shelfdb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod error;
pub mod filter;
pub mod index;
mod join;
pub mod lock;
pub mod meta;
mod serializer;
pub mod shard;
pub mod shelf;
mod types;
mod value;
mod verify;

pub use collection::{Collection, DropReport, Page, INDEX_PREFIX, META_FILE};
pub use config::{CollectionConfig, RetryConfig};
pub use error::{CoreError, CoreResult, BAD_REQUEST, CONFLICT};
pub use join::{CascadeReport, ForeignKey};
pub use lock::{Clock, LockOwner, ManualClock, SystemClock};
pub use serializer::{
    ActionKind, Handler, HandlerTable, Payload, Reply, Request, WriteSerializer,
};
pub use types::{IndexKind, RecordId, ShardId};
pub use value::{document, document_id, Document, Value, ID_FIELD};
pub use verify::{Issue, VerifyReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
