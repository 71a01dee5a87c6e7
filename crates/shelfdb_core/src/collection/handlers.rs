//! Verb handlers run by the processing loop.

use crate::collection::store::{Change, Plan, Store};
use crate::collection::{DropReport, Page};
use crate::error::{CoreError, CoreResult};
use crate::serializer::{ActionKind, Handler, HandlerTable, Payload, Reply, Request};
use crate::types::RecordId;
use crate::value::{Document, ID_FIELD};

/// Builds the complete handler table of a collection.
pub(crate) fn table() -> CoreResult<HandlerTable<Store>> {
    let entries: [(ActionKind, Handler<Store>); 7] = [
        (ActionKind::Fetch, fetch),
        (ActionKind::Count, count),
        (ActionKind::New, new),
        (ActionKind::Insert, insert),
        (ActionKind::Replace, merge),
        (ActionKind::Edit, merge),
        (ActionKind::Drop, drop),
    ];
    HandlerTable::new(entries)
}

fn fetch(store: &Store, request: &Request) -> CoreResult<Reply> {
    store.fetch(&request.filter).map(Reply::Page)
}

fn count(store: &Store, request: &Request) -> CoreResult<Reply> {
    store.count(&request.filter).map(Reply::Count)
}

fn one(request: &Request) -> CoreResult<Document> {
    match &request.data {
        Payload::One(doc) => Ok(without_id(doc)),
        _ => Err(request.kind.failure("expected a single record")),
    }
}

fn without_id(doc: &Document) -> Document {
    let mut doc = doc.clone();
    doc.remove(ID_FIELD);
    doc
}

fn new(store: &Store, request: &Request) -> CoreResult<Reply> {
    let doc = store.shards.normalize(one(request)?);
    let plan = store.mutate(|meta| {
        let id = RecordId::new(meta.reserve(1).start);
        store.check_parents(request.kind, &doc)?;
        let mut plan = Plan::new(meta);
        plan.changes.push(Change::Put {
            id,
            old: None,
            new: doc,
        });
        store.check_unique(request.kind, &plan)?;
        Ok(plan)
    })?;

    store
        .documents(&plan.ids())?
        .into_iter()
        .next()
        .map(Reply::Created)
        .ok_or(CoreError::NotFound)
}

fn insert(store: &Store, request: &Request) -> CoreResult<Reply> {
    let Payload::Many(docs) = &request.data else {
        return Err(request.kind.failure("expected a list of records"));
    };
    if let Some(field) = &store.unique {
        return Err(request.kind.failure(format!(
            "bulk insert is disabled while {field} is unique"
        )));
    }

    let plan = store.mutate(|meta| {
        let ids = meta.reserve(docs.len());
        let mut plan = Plan::new(meta);
        for (id, doc) in ids.zip(docs) {
            let doc = store.shards.normalize(without_id(doc));
            store.check_parents(request.kind, &doc)?;
            plan.changes.push(Change::Put {
                id: RecordId::new(id),
                old: None,
                new: doc,
            });
        }
        Ok(plan)
    })?;

    store.documents(&plan.ids()).map(Reply::Inserted)
}

/// `replace` and `edit`: both merge the given fields over each match.
fn merge(store: &Store, request: &Request) -> CoreResult<Reply> {
    let data = one(request)?;
    let plan = store.mutate(|meta| {
        let (_, ids) = store.matching(request.kind, &request.filter, &meta)?;
        if ids.is_empty() {
            return Err(CoreError::NotFound);
        }
        let olds = store.shards.read_many(ids.iter().copied())?;
        let mut plan = Plan::new(meta);
        for id in ids {
            let Some(old) = olds.get(&id) else {
                continue;
            };
            let mut new = old.clone();
            new.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            let new = store.shards.normalize(new);
            store.check_parents(request.kind, &new)?;
            plan.changes.push(Change::Put {
                id,
                old: Some(old.clone()),
                new,
            });
        }
        store.check_unique(request.kind, &plan)?;
        Ok(plan)
    })?;

    let data = store.documents(&plan.ids())?;
    let total = data.len();
    Ok(Reply::Page(Page {
        data,
        total: total as u64,
        page: 1,
        items_per_page: total.max(1),
    }))
}

fn drop(store: &Store, request: &Request) -> CoreResult<Reply> {
    let mut skipped = Vec::new();
    let plan = store.mutate(|meta| {
        let (_, ids) = store.matching(request.kind, &request.filter, &meta)?;
        let olds = store.shards.read_many(ids.iter().copied())?;
        let mut plan = Plan::new(meta);
        for id in ids {
            if store.has_children(id)? {
                skipped.push(id);
                continue;
            }
            plan.changes.push(Change::Remove {
                id,
                old: olds.get(&id).cloned().unwrap_or_default(),
            });
        }
        Ok(plan)
    })?;

    Ok(Reply::Dropped(DropReport {
        dropped: plan.ids(),
        skipped,
    }))
}
