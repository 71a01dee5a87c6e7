//! Collection state shared with the processing loop.

use crate::collection::Page;
use crate::config::{CollectionConfig, RetryConfig};
use crate::error::{CoreError, CoreResult, CONFLICT};
use crate::filter::Query;
use crate::index::{open_index, IndexDelta, IndexStore};
use crate::lock::{LockCoordinator, LockOwner, LockSet};
use crate::meta::Meta;
use crate::serializer::ActionKind;
use crate::shard::{ShardBatch, ShardStore};
use crate::types::{IndexKind, RecordId, ShardId};
use crate::value::{Document, Value, ID_FIELD};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::thread;
use tracing::{debug, info, warn};

/// Name of the metadata file.
pub const META_FILE: &str = "meta";

/// Prefix of index resources.
pub const INDEX_PREFIX: &str = "index_";

/// A registered foreign-key edge, seen from one side.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) store: Weak<Store>,
    pub(crate) field: String,
}

/// Foreign-key edges a collection takes part in.
#[derive(Debug, Default)]
pub(crate) struct Relations {
    /// Collections this one references: `field` holds a parent id.
    pub(crate) parents: Vec<Link>,
    /// Collections referencing this one through their `field`.
    pub(crate) children: Vec<Link>,
}

/// One record-level change of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Change {
    /// Store `new` at `id`, replacing `old` if there was one.
    Put {
        id: RecordId,
        old: Option<Document>,
        new: Document,
    },
    /// Delete the record at `id`, whose content was `old`.
    Remove { id: RecordId, old: Document },
}

impl Change {
    fn id(&self) -> RecordId {
        match self {
            Change::Put { id, .. } | Change::Remove { id, .. } => *id,
        }
    }

    fn old(&self) -> Option<&Document> {
        match self {
            Change::Put { old, .. } => old.as_ref(),
            Change::Remove { old, .. } => Some(old),
        }
    }

    /// Returns the change restoring the state this one replaced.
    fn inverse(&self) -> Change {
        match self {
            Change::Put {
                id,
                old: Some(old),
                new,
            } => Change::Put {
                id: *id,
                old: Some(new.clone()),
                new: old.clone(),
            },
            Change::Put { id, old: None, new } => Change::Remove {
                id: *id,
                old: new.clone(),
            },
            Change::Remove { id, old } => Change::Put {
                id: *id,
                old: None,
                new: old.clone(),
            },
        }
    }
}

/// A fully resolved mutation. Applying it twice has the effect of
/// applying it once.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub(crate) base: Meta,
    pub(crate) changes: Vec<Change>,
}

impl Plan {
    pub(crate) fn new(base: Meta) -> Self {
        Self {
            base,
            changes: Vec::new(),
        }
    }

    pub(crate) fn ids(&self) -> Vec<RecordId> {
        self.changes.iter().map(Change::id).collect()
    }
}

/// Everything a collection needs to serve requests.
#[derive(Debug)]
pub(crate) struct Store {
    pub(crate) name: String,
    pub(crate) dir: PathBuf,
    pub(crate) meta_path: PathBuf,
    pub(crate) shards: ShardStore,
    pub(crate) indexes: BTreeMap<String, Box<dyn IndexStore>>,
    pub(crate) index_kind: IndexKind,
    pub(crate) items_per_page: usize,
    pub(crate) unique: Option<String>,
    pub(crate) coordinator: LockCoordinator,
    pub(crate) retry: RetryConfig,
    pub(crate) relations: RwLock<Relations>,
}

impl Store {
    /// Opens the collection in `dir`, creating it if needed.
    pub(crate) fn open(
        dir: &Path,
        config: &CollectionConfig,
        owner: LockOwner,
    ) -> CoreResult<Self> {
        config.validate()?;
        fs::create_dir_all(dir)?;

        let coordinator = LockCoordinator::new(
            owner,
            config.lock_timeout,
            config.lock_poll_interval,
            config.keep_alive_interval,
        );
        let meta_path = dir.join(META_FILE);
        let locks = LockSet::acquire(&coordinator, &meta_path, Vec::new())?;

        let meta = match Meta::load(&meta_path)? {
            Some(stored) => Self::reconcile(dir, stored, config)?,
            None => Self::create(dir, config)?,
        };
        drop(locks);

        let indexes = meta
            .index_fields
            .iter()
            .map(|field| {
                let index = open_index(meta.index_kind, field, index_path(dir, field));
                (field.clone(), index)
            })
            .collect();

        Ok(Self {
            name: config.name.clone().unwrap_or_else(|| meta.name.clone()),
            dir: dir.to_path_buf(),
            meta_path,
            shards: ShardStore::new(dir, meta.groups, meta.headers.clone()),
            indexes,
            index_kind: meta.index_kind,
            items_per_page: config.items_per_page,
            unique: meta.unique.clone(),
            coordinator,
            retry: config.retry.clone(),
            relations: RwLock::new(Relations::default()),
        })
    }

    fn create(dir: &Path, config: &CollectionConfig) -> CoreResult<Meta> {
        let name = config
            .name
            .clone()
            .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "collection".to_string());

        let mut meta = Meta::new(name, config.groups);
        meta.index_fields = declared_fields(config);
        meta.headers = config.headers.clone();
        meta.index_kind = config.index_kind;
        meta.unique = config.unique.clone();

        ShardStore::new(dir, meta.groups, meta.headers.clone()).create_all()?;
        for field in &meta.index_fields {
            open_index(meta.index_kind, field, index_path(dir, field)).create()?;
        }
        meta.store(&dir.join(META_FILE))?;

        info!(
            collection = %meta.name,
            path = %dir.display(),
            groups = meta.groups,
            indexes = meta.index_fields.len(),
            "collection created"
        );
        Ok(meta)
    }

    /// Merges a reopening configuration into the stored metadata. Newly
    /// declared index fields are built from the live records.
    fn reconcile(dir: &Path, mut meta: Meta, config: &CollectionConfig) -> CoreResult<Meta> {
        let mut changed = false;

        if let Some(unique) = &config.unique {
            if meta.unique.as_ref() != Some(unique) {
                meta.unique = Some(unique.clone());
                changed = true;
            }
        }
        if meta.headers.is_none() && config.headers.is_some() && meta.live.is_empty() {
            meta.headers = config.headers.clone();
            changed = true;
        }

        let mut wanted = if config.index_fields.is_empty() {
            meta.index_fields.clone()
        } else {
            config.index_fields.clone()
        };
        if let Some(unique) = &meta.unique {
            if !wanted.contains(unique) {
                wanted.push(unique.clone());
            }
        }

        let added: Vec<String> = wanted
            .iter()
            .filter(|f| !meta.index_fields.contains(*f))
            .cloned()
            .collect();
        if !added.is_empty() {
            let shards = ShardStore::new(dir, meta.groups, meta.headers.clone());
            let records = shards.read_many(meta.live_ids())?;
            for field in &added {
                let index = open_index(meta.index_kind, field, index_path(dir, field));
                index.clear()?;
                let mut delta = IndexDelta::new();
                for (id, doc) in &records {
                    if let Some(value) = doc.get(field) {
                        delta.add(value.index_key(), *id);
                    }
                }
                index.apply(&delta)?;
                info!(collection = %meta.name, field = %field, "index built");
            }
        }
        if wanted != meta.index_fields {
            meta.index_fields = wanted;
            changed = true;
        }

        if changed {
            meta.store(&dir.join(META_FILE))?;
        }
        info!(
            collection = %meta.name,
            path = %dir.display(),
            total = meta.total,
            "collection opened"
        );
        Ok(meta)
    }

    /// Reads the current metadata from disk.
    pub(crate) fn load_meta(&self) -> CoreResult<Meta> {
        Meta::load(&self.meta_path)?.ok_or_else(|| {
            CoreError::invalid_format(format!("missing {}", self.meta_path.display()))
        })
    }

    /// Resolves `filter` to all matching ids, in result order.
    pub(crate) fn matching(
        &self,
        kind: ActionKind,
        filter: &Document,
        meta: &Meta,
    ) -> CoreResult<(Query, Vec<RecordId>)> {
        let query = Query::parse(filter, self.items_per_page).map_err(|e| kind.rebrand(e))?;
        let ids = query.resolve(meta, &self.indexes)?;
        Ok((query, ids))
    }

    /// Reads records in the given order, each carrying its `_id`.
    pub(crate) fn documents(&self, ids: &[RecordId]) -> CoreResult<Vec<Document>> {
        let mut found = self.shards.read_many(ids.iter().copied())?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                found.remove(id).map(|mut doc| {
                    doc.insert(ID_FIELD.to_string(), Value::from(id.as_u64()));
                    doc
                })
            })
            .collect())
    }

    /// Runs a paged query.
    pub(crate) fn fetch(&self, filter: &Document) -> CoreResult<Page> {
        let meta = self.load_meta()?;
        let (query, ids) = self.matching(ActionKind::Fetch, filter, &meta)?;
        if ids.is_empty() {
            return Err(CoreError::NotFound);
        }
        let data = self
            .documents(query.page_of(&ids))?
            .into_iter()
            .map(|doc| query.project(doc))
            .collect();
        Ok(Page {
            data,
            total: ids.len() as u64,
            page: query.page,
            items_per_page: query.items_per_page,
        })
    }

    /// Counts every match of `filter`.
    pub(crate) fn count(&self, filter: &Document) -> CoreResult<u64> {
        let meta = self.load_meta()?;
        let (_, ids) = self.matching(ActionKind::Count, filter, &meta)?;
        Ok(ids.len() as u64)
    }

    /// Runs a mutation under the collection's locks.
    ///
    /// The metadata marker is taken first, `build` computes the plan from
    /// the metadata read under it, and the remaining resources are taken in
    /// path order before the plan is applied.
    pub(crate) fn mutate<F>(&self, build: F) -> CoreResult<Plan>
    where
        F: FnOnce(Meta) -> CoreResult<Plan>,
    {
        let mut locks = LockSet::acquire(&self.coordinator, &self.meta_path, Vec::new())?;
        let plan = build(self.load_meta()?)?;
        if plan.changes.is_empty() {
            return Ok(plan);
        }
        locks.extend(self.resources_for(&plan))?;
        self.apply_with_retry(&mut locks, &plan)?;
        drop(locks);
        Ok(plan)
    }

    fn resources_for(&self, plan: &Plan) -> Vec<PathBuf> {
        let shards: BTreeSet<ShardId> = plan
            .changes
            .iter()
            .map(|c| self.shards.shard_for(c.id()))
            .collect();
        shards
            .into_iter()
            .map(|s| self.shards.path(s))
            .chain(
                self.indexes
                    .values()
                    .filter(|i| i.exists())
                    .map(|i| i.resource().to_path_buf()),
            )
            .collect()
    }

    fn apply_with_retry(&self, locks: &mut LockSet, plan: &Plan) -> CoreResult<()> {
        let mut attempt = 0;
        loop {
            if !locks.is_intact() {
                warn!(collection = %self.name, "lock taken over while held, reacquiring");
                locks.reacquire()?;
            }
            match self.apply(plan) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    warn!(collection = %self.name, attempt, error = %e, "retrying mutation");
                    thread::sleep(self.retry.delay_for_attempt(attempt));
                }
                Err(e) => {
                    self.roll_back(plan);
                    return Err(e);
                }
            }
        }
    }

    /// Applies a plan: stale index entries, then records, then fresh index
    /// entries, then metadata.
    fn apply(&self, plan: &Plan) -> CoreResult<()> {
        self.remove_entries(&plan.changes)?;
        self.write_records(&plan.changes)?;
        self.add_entries(&plan.changes)?;

        let mut meta = plan.base.clone();
        for change in &plan.changes {
            match change {
                Change::Put { id, .. } => meta.mark_created(*id),
                Change::Remove { id, .. } => meta.mark_dropped(*id),
            }
        }
        if meta != plan.base {
            meta.store(&self.meta_path)?;
        }
        debug!(
            collection = %self.name,
            changes = plan.changes.len(),
            total = meta.total,
            "plan applied"
        );
        Ok(())
    }

    /// Restores records and index entries after a failed apply.
    ///
    /// Metadata is written last, so it still holds the plan's base and is
    /// left alone. Every step is attempted even if an earlier one fails.
    fn roll_back(&self, plan: &Plan) {
        let inverse: Vec<Change> = plan.changes.iter().map(Change::inverse).collect();
        let steps = [
            ("index removals", self.remove_entries(&inverse)),
            ("records", self.write_records(&inverse)),
            ("index additions", self.add_entries(&inverse)),
        ];
        for (step, outcome) in steps {
            if let Err(e) = outcome {
                warn!(collection = %self.name, step, error = %e, "rollback incomplete");
            }
        }
        debug!(collection = %self.name, changes = inverse.len(), "plan rolled back");
    }

    fn remove_entries(&self, changes: &[Change]) -> CoreResult<()> {
        for index in self.indexes.values() {
            let mut removals = IndexDelta::new();
            for change in changes {
                if let Some(value) = change.old().and_then(|old| old.get(index.field())) {
                    removals.remove(value.index_key(), change.id());
                }
            }
            index.apply(&removals)?;
        }
        Ok(())
    }

    fn write_records(&self, changes: &[Change]) -> CoreResult<()> {
        let mut batches: BTreeMap<ShardId, ShardBatch> = BTreeMap::new();
        for change in changes {
            let batch = batches.entry(self.shards.shard_for(change.id())).or_default();
            match change {
                Change::Put { id, new, .. } => batch.writes.push((*id, new.clone())),
                Change::Remove { id, .. } => batch.deletes.push(*id),
            }
        }
        for (shard, batch) in &batches {
            self.shards.apply(*shard, batch)?;
        }
        Ok(())
    }

    fn add_entries(&self, changes: &[Change]) -> CoreResult<()> {
        for index in self.indexes.values() {
            let mut additions = IndexDelta::new();
            for change in changes {
                if let Change::Put { id, new, .. } = change {
                    if let Some(value) = new.get(index.field()) {
                        additions.add(value.index_key(), *id);
                    }
                }
            }
            index.apply(&additions)?;
        }
        Ok(())
    }

    /// Rejects values of the unique field already held by another record,
    /// or given twice within the plan.
    pub(crate) fn check_unique(&self, kind: ActionKind, plan: &Plan) -> CoreResult<()> {
        let Some(field) = &self.unique else {
            return Ok(());
        };
        let Some(index) = self.indexes.get(field) else {
            return Ok(());
        };
        let in_plan: BTreeSet<RecordId> = plan.ids().into_iter().collect();
        let mut claimed: BTreeSet<String> = BTreeSet::new();
        for change in &plan.changes {
            let Change::Put { new, .. } = change else {
                continue;
            };
            let Some(value) = new.get(field) else {
                continue;
            };
            let key = value.index_key();
            let taken = index
                .lookup(&key)?
                .into_iter()
                .any(|holder| !in_plan.contains(&holder) && plan.base.is_live(holder));
            if taken || !claimed.insert(key) {
                return Err(kind
                    .failure(format!("{field} {value} is already taken"))
                    .with_code(CONFLICT));
            }
        }
        Ok(())
    }

    /// Rejects records whose foreign fields do not name a live parent.
    pub(crate) fn check_parents(&self, kind: ActionKind, doc: &Document) -> CoreResult<()> {
        let parents: Vec<Link> = self.relations.read().parents.clone();
        for link in parents {
            let Some(parent) = link.store.upgrade() else {
                continue;
            };
            let parent_id = doc.get(&link.field).and_then(Value::as_u64).map(RecordId::new);
            let live = match parent_id {
                Some(id) => parent.load_meta()?.is_live(id),
                None => false,
            };
            if !live {
                return Err(kind.failure(format!(
                    "{} does not reference a live {} record",
                    link.field, parent.name
                )));
            }
        }
        Ok(())
    }

    /// Returns true if a live child record references `id`.
    pub(crate) fn has_children(&self, id: RecordId) -> CoreResult<bool> {
        let children: Vec<Link> = self.relations.read().children.clone();
        for link in children {
            let Some(child) = link.store.upgrade() else {
                continue;
            };
            let Some(index) = child.indexes.get(&link.field) else {
                continue;
            };
            let referencing = index.lookup(&id.as_u64().to_string())?;
            if referencing.is_empty() {
                continue;
            }
            let child_meta = child.load_meta()?;
            if referencing.into_iter().any(|c| child_meta.is_live(c)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Returns the index resource of `field` in `dir`.
pub(crate) fn index_path(dir: &Path, field: &str) -> PathBuf {
    dir.join(format!("{INDEX_PREFIX}{field}"))
}

/// Declared indexed fields, the unique field included.
fn declared_fields(config: &CollectionConfig) -> Vec<String> {
    let mut fields = config.index_fields.clone();
    if let Some(unique) = &config.unique {
        if !fields.contains(unique) {
            fields.push(unique.clone());
        }
    }
    fields
}
