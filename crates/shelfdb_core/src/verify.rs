//! Integrity verification of a collection directory.

use crate::collection::store::Store;
use crate::error::CoreResult;
use crate::types::{RecordId, ShardId};
use std::collections::BTreeSet;
use std::fmt;

/// One inconsistency found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// The stored total differs from the number of live ids.
    CountMismatch {
        /// Total recorded in the metadata.
        total: u64,
        /// Number of live ids.
        live: usize,
    },
    /// A live id at or past the id counter.
    IdAhead {
        /// The offending id.
        id: RecordId,
        /// Stored counter.
        next: u64,
    },
    /// A live id with no readable record.
    Unreadable(RecordId),
    /// A stored record whose id is not live.
    Orphan(RecordId),
    /// A record stored in the wrong shard.
    Misplaced {
        /// The record.
        id: RecordId,
        /// Shard it was found in.
        shard: ShardId,
    },
    /// An index entry pointing at a record that does not hold the value.
    StaleEntry {
        /// Indexed field.
        field: String,
        /// Index key.
        key: String,
        /// Referenced record.
        id: RecordId,
    },
    /// A live record whose value is not indexed.
    MissingEntry {
        /// Indexed field.
        field: String,
        /// Expected index key.
        key: String,
        /// The record.
        id: RecordId,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::CountMismatch { total, live } => {
                write!(f, "meta total {total} but {live} live ids")
            }
            Issue::IdAhead { id, next } => write!(f, "{id} is live but next is {next}"),
            Issue::Unreadable(id) => write!(f, "{id} is live but cannot be read"),
            Issue::Orphan(id) => write!(f, "{id} is stored but not live"),
            Issue::Misplaced { id, shard } => write!(f, "{id} found in {shard}"),
            Issue::StaleEntry { field, key, id } => {
                write!(f, "index {field}[{key}] lists {id}, which does not hold it")
            }
            Issue::MissingEntry { field, key, id } => {
                write!(f, "index {field}[{key}] is missing {id}")
            }
        }
    }
}

/// Result of verifying a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of live ids.
    pub live: usize,
    /// Number of records found across all shards.
    pub stored: usize,
    /// Number of index entries checked.
    pub index_entries: usize,
    /// Problems found.
    pub issues: Vec<Issue>,
}

impl VerifyReport {
    /// Returns true if no issue was found.
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks the count invariant, record placement and index coherence.
pub(crate) fn verify(store: &Store) -> CoreResult<VerifyReport> {
    let meta = store.load_meta()?;
    let mut report = VerifyReport {
        live: meta.live.len(),
        ..VerifyReport::default()
    };

    if meta.total != meta.live.len() as u64 {
        report.issues.push(Issue::CountMismatch {
            total: meta.total,
            live: meta.live.len(),
        });
    }
    if let Some(&last) = meta.live.iter().next_back() {
        if last >= meta.next {
            report.issues.push(Issue::IdAhead {
                id: RecordId::new(last),
                next: meta.next,
            });
        }
    }

    let mut stored = BTreeSet::new();
    for n in 0..store.shards.groups() {
        let shard = ShardId(n);
        for id in store.shards.ids(shard)? {
            if store.shards.shard_for(id) != shard {
                report.issues.push(Issue::Misplaced { id, shard });
            }
            if !meta.is_live(id) {
                report.issues.push(Issue::Orphan(id));
            }
            stored.insert(id);
        }
    }
    report.stored = stored.len();

    let records = store.shards.read_many(meta.live_ids())?;
    report.issues.extend(
        meta.live_ids()
            .filter(|id| !records.contains_key(id))
            .map(Issue::Unreadable),
    );

    for (field, index) in &store.indexes {
        for (key, ids) in index.entries()? {
            for id in ids {
                report.index_entries += 1;
                let holds = records
                    .get(&id)
                    .and_then(|doc| doc.get(field))
                    .is_some_and(|value| value.index_key() == key);
                if !holds {
                    report.issues.push(Issue::StaleEntry {
                        field: field.clone(),
                        key: key.clone(),
                        id,
                    });
                }
            }
        }
        for (id, doc) in &records {
            let Some(value) = doc.get(field) else {
                continue;
            };
            let key = value.index_key();
            if !index.lookup(&key)?.contains(id) {
                report.issues.push(Issue::MissingEntry {
                    field: field.clone(),
                    key,
                    id: *id,
                });
            }
        }
    }

    Ok(report)
}
