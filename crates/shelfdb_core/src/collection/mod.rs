//! Collections: the unit an application opens, one per directory.
//!
//! A [`Collection`] ties together the shard files, the secondary indexes,
//! the filter engine and a processing loop. Every verb is queued on the
//! loop and executed in submission order; across instances sharing a
//! directory, lock markers keep mutations from interleaving.
//!
//! ```rust,no_run
//! use shelfdb_core::{document, Collection, CollectionConfig};
//!
//! let users = Collection::open("data/users", CollectionConfig::new().index_fields(["a", "b"]))?;
//! let created = users.new(document([("a", 1), ("b", 2), ("c", 3)]))?;
//! let page = users.fetch(&document([("a", 1)]))?;
//! assert_eq!(page.data[0], created);
//! # Ok::<(), shelfdb_core::CoreError>(())
//! ```

mod handlers;
pub(crate) mod store;

pub use store::{INDEX_PREFIX, META_FILE};

use crate::config::CollectionConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockOwner;
use crate::serializer::{ActionKind, Payload, Reply, Request, WriteSerializer};
use crate::types::{IndexKind, RecordId};
use crate::value::Document;
use crate::verify::{self, VerifyReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::Store;
use uuid::Uuid;

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records on this page, each with its `_id`.
    pub data: Vec<Document>,
    /// Number of records matching the filter, all pages included.
    pub total: u64,
    /// 1-based page number.
    pub page: usize,
    /// Page size.
    pub items_per_page: usize,
}

impl Page {
    /// Returns the number of pages needed for `total` records.
    pub fn page_count(&self) -> u64 {
        if self.items_per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.items_per_page as u64)
    }
}

/// Outcome of a drop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DropReport {
    /// Records deleted.
    pub dropped: Vec<RecordId>,
    /// Records kept because a live child record still references them.
    pub skipped: Vec<RecordId>,
}

/// A persistent record collection.
#[derive(Debug)]
pub struct Collection {
    store: Arc<Store>,
    serializer: WriteSerializer,
}

impl Collection {
    /// Opens the collection stored in `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be initialized.
    pub fn open(path: impl AsRef<Path>, config: CollectionConfig) -> CoreResult<Self> {
        Self::open_with_owner(path, config, LockOwner::new())
    }

    /// Opens an existing collection with the settings stored in it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `path` holds no collection.
    pub fn open_existing(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.join(META_FILE).is_file() {
            return Err(CoreError::invalid_operation(format!(
                "{} is not a collection",
                path.display()
            )));
        }
        Self::open(path, CollectionConfig::default())
    }

    /// Opens a collection whose lock markers are written for `owner`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_owner(
        path: impl AsRef<Path>,
        config: CollectionConfig,
        owner: LockOwner,
    ) -> CoreResult<Self> {
        let store = Arc::new(Store::open(path.as_ref(), &config, owner)?);
        let serializer = WriteSerializer::spawn(
            store.name.clone(),
            Arc::clone(&store),
            handlers::table()?,
            config.queue_capacity,
        )?;
        Ok(Self { store, serializer })
    }

    fn call(&self, kind: ActionKind, filter: Document, data: Payload) -> CoreResult<Reply> {
        self.serializer.call(Request::new(kind, filter, data))
    }

    /// Returns one page of the records matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches, `FetchFailed` for a malformed
    /// filter.
    pub fn fetch(&self, filter: &Document) -> CoreResult<Page> {
        match self.call(ActionKind::Fetch, filter.clone(), Payload::None)? {
            Reply::Page(page) => Ok(page),
            other => Err(unexpected(ActionKind::Fetch, &other)),
        }
    }

    /// Creates a record and returns it with its assigned `_id`.
    ///
    /// # Errors
    ///
    /// Returns `NewFailed` when the record references a missing parent (400)
    /// or repeats a unique value (409).
    #[allow(clippy::new_ret_no_self)]
    pub fn new(&self, data: Document) -> CoreResult<Document> {
        match self.call(ActionKind::New, Document::new(), Payload::One(data))? {
            Reply::Created(doc) => Ok(doc),
            other => Err(unexpected(ActionKind::New, &other)),
        }
    }

    /// Creates many records in one locked section.
    ///
    /// # Errors
    ///
    /// Returns `NewFailed` if a unique field is configured or a record
    /// references a missing parent.
    pub fn insert(&self, data: Vec<Document>) -> CoreResult<Vec<Document>> {
        match self.call(ActionKind::Insert, Document::new(), Payload::Many(data))? {
            Reply::Inserted(docs) => Ok(docs),
            other => Err(unexpected(ActionKind::Insert, &other)),
        }
    }

    /// Merges `data` into every record matching `filter`.
    ///
    /// Paging directives in the filter are ignored. Fields not named in
    /// `data` keep their value, exactly as with [`edit`](Self::edit).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches, `ReplaceFailed` on validation
    /// failures.
    pub fn replace(&self, filter: &Document, data: Document) -> CoreResult<Page> {
        self.merge(ActionKind::Replace, filter, data)
    }

    /// Merges `data` into every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches, `EditFailed` on validation
    /// failures.
    pub fn edit(&self, filter: &Document, data: Document) -> CoreResult<Page> {
        self.merge(ActionKind::Edit, filter, data)
    }

    fn merge(&self, kind: ActionKind, filter: &Document, data: Document) -> CoreResult<Page> {
        match self.call(kind, filter.clone(), Payload::One(data))? {
            Reply::Page(page) => Ok(page),
            other => Err(unexpected(kind, &other)),
        }
    }

    /// Deletes every record matching `filter`.
    ///
    /// Records still referenced by a live child record are skipped and
    /// listed in the report.
    ///
    /// # Errors
    ///
    /// Returns `DropFailed` for a malformed filter.
    pub fn drop(&self, filter: &Document) -> CoreResult<DropReport> {
        match self.call(ActionKind::Drop, filter.clone(), Payload::None)? {
            Reply::Dropped(report) => Ok(report),
            other => Err(unexpected(ActionKind::Drop, &other)),
        }
    }

    /// Counts the records matching `filter`, ignoring paging.
    ///
    /// # Errors
    ///
    /// Returns `FetchFailed` for a malformed filter.
    pub fn count(&self, filter: &Document) -> CoreResult<u64> {
        match self.call(ActionKind::Count, filter.clone(), Payload::None)? {
            Reply::Count(n) => Ok(n),
            other => Err(unexpected(ActionKind::Count, &other)),
        }
    }

    /// Checks the stored state for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        verify::verify(&self.store)
    }

    /// Stops the processing loop after the queued requests.
    ///
    /// Later verb calls fail with `CollectionClosed`. Dropping the
    /// collection closes it as well.
    pub fn close(&self) {
        self.serializer.shutdown();
    }

    /// Returns true once the collection has been closed.
    pub fn is_closed(&self) -> bool {
        self.serializer.is_closed()
    }

    /// Returns the number of live records.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.store.load_meta()?.total)
    }

    /// Returns true if the collection holds no live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the id the next created record receives.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn next_id(&self) -> CoreResult<u64> {
        Ok(self.store.load_meta()?.next)
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.store.name
    }

    /// Returns the collection directory.
    pub fn path(&self) -> &Path {
        &self.store.dir
    }

    /// Returns the shard count.
    pub fn groups(&self) -> u32 {
        self.store.shards.groups()
    }

    /// Returns the indexed fields.
    pub fn index_fields(&self) -> Vec<String> {
        self.store.indexes.keys().cloned().collect()
    }

    /// Returns the index representation.
    pub fn index_kind(&self) -> IndexKind {
        self.store.index_kind
    }

    /// Returns the positional field order, if records are stored as tuples.
    pub fn headers(&self) -> Option<&[String]> {
        self.store.shards.headers()
    }

    /// Returns the unique field.
    pub fn unique(&self) -> Option<&str> {
        self.store.unique.as_deref()
    }

    /// Returns the shard files.
    pub fn data_files(&self) -> Vec<PathBuf> {
        self.store.shards.paths()
    }

    /// Returns the index resources.
    pub fn index_paths(&self) -> Vec<PathBuf> {
        self.store
            .indexes
            .values()
            .map(|i| i.resource().to_path_buf())
            .collect()
    }

    /// Returns the metadata file.
    pub fn meta_path(&self) -> &Path {
        &self.store.meta_path
    }

    /// Returns the instance id written into this collection's lock markers.
    pub fn instance_id(&self) -> Uuid {
        self.store.coordinator.owner().id()
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

fn unexpected(kind: ActionKind, reply: &Reply) -> CoreError {
    CoreError::invalid_operation(format!("unexpected reply to {kind}: {reply:?}"))
}
