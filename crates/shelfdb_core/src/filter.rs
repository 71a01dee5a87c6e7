//! Filter resolution: from a flat filter map to an ordered, paged id list.
//!
//! A filter is a [`Document`] whose keys are field names, plus reserved
//! directives:
//!
//! | Key | Meaning |
//! |---|---|
//! | `_id` | exact id; empty text means no constraint |
//! | `order` | comma-separated fields, `-` prefix for descending; only the first is used |
//! | `page` | 1-based page number |
//! | `items_per_page` | page size, defaults to the collection setting |
//! | `fields` | comma-separated projection |
//!
//! Every other key constrains an indexed field to a value. Constraints are
//! intersected. A constraint on an unindexed field matches nothing.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexStore;
use crate::meta::Meta;
use crate::types::RecordId;
use crate::value::{Document, Value, ID_FIELD};
use std::collections::{BTreeMap, BTreeSet};

/// Key of the ordering directive.
pub const ORDER: &str = "order";
/// Key of the page directive.
pub const PAGE: &str = "page";
/// Key of the page size directive.
pub const ITEMS_PER_PAGE: &str = "items_per_page";
/// Key of the projection directive.
pub const FIELDS: &str = "fields";

/// Requested ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Field to order by.
    pub field: String,
    /// Whether the order is descending.
    pub descending: bool,
}

/// A parsed filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Exact id constraint.
    pub id: Option<RecordId>,
    /// `(field, index key)` constraints.
    pub constraints: Vec<(String, String)>,
    /// Requested ordering.
    pub order: Option<Order>,
    /// 1-based page.
    pub page: usize,
    /// Page size.
    pub items_per_page: usize,
    /// Projection, `_id` always included.
    pub fields: Option<Vec<String>>,
}

impl Query {
    /// A query matching every live record.
    #[must_use]
    pub fn all(items_per_page: usize) -> Self {
        Self {
            id: None,
            constraints: Vec::new(),
            order: None,
            page: 1,
            items_per_page,
            fields: None,
        }
    }

    /// Parses a filter map.
    ///
    /// # Errors
    ///
    /// Returns `FetchFailed` (400) for a malformed `_id`, `page` or
    /// `items_per_page`.
    pub fn parse(filter: &Document, default_items_per_page: usize) -> CoreResult<Self> {
        let mut query = Self::all(default_items_per_page);

        for (key, value) in filter {
            match key.as_str() {
                ID_FIELD => query.id = parse_id(value)?,
                ORDER => query.order = parse_order(value),
                PAGE => query.page = parse_positive(PAGE, value)?,
                ITEMS_PER_PAGE => query.items_per_page = parse_positive(ITEMS_PER_PAGE, value)?,
                FIELDS => query.fields = parse_fields(value),
                field => query
                    .constraints
                    .push((field.to_string(), value.index_key())),
            }
        }
        Ok(query)
    }

    /// Resolves the query to every matching id, in result order.
    pub fn resolve(
        &self,
        meta: &Meta,
        indexes: &BTreeMap<String, Box<dyn IndexStore>>,
    ) -> CoreResult<Vec<RecordId>> {
        let mut matched: BTreeSet<RecordId> = meta.live_ids().collect();

        if let Some(id) = self.id {
            matched.retain(|candidate| *candidate == id);
        }
        for (field, key) in &self.constraints {
            if matched.is_empty() {
                break;
            }
            let candidates = match indexes.get(field) {
                Some(index) => index.lookup(key)?,
                None => BTreeSet::new(),
            };
            matched.retain(|id| candidates.contains(id));
        }

        let ids: Vec<RecordId> = matched.into_iter().collect();
        let ordering = self
            .order
            .as_ref()
            .and_then(|o| indexes.get(&o.field).map(|index| (o, index)));
        match ordering {
            Some((order, index)) => match index.ordered() {
                Some(ordered) => ordered.sort(&ids, order.descending),
                None => Ok(ids),
            },
            None => Ok(ids),
        }
    }

    /// Returns the slice of `ids` on the requested page.
    pub fn page_of<'a>(&self, ids: &'a [RecordId]) -> &'a [RecordId] {
        let start = self
            .items_per_page
            .saturating_mul(self.page.saturating_sub(1))
            .min(ids.len());
        let end = start.saturating_add(self.items_per_page).min(ids.len());
        &ids[start..end]
    }

    /// Applies the projection to a returned document.
    pub fn project(&self, mut doc: Document) -> Document {
        if let Some(fields) = &self.fields {
            doc.retain(|key, _| key == ID_FIELD || fields.iter().any(|f| f == key));
        }
        doc
    }
}

fn parse_id(value: &Value) -> CoreResult<Option<RecordId>> {
    match value {
        Value::Null => Ok(None),
        Value::Text(s) if s.trim().is_empty() => Ok(None),
        other => other
            .as_u64()
            .map(|id| Some(RecordId::new(id)))
            .ok_or_else(|| CoreError::fetch_failed(format!("invalid {ID_FIELD}: {other}"))),
    }
}

fn parse_order(value: &Value) -> Option<Order> {
    let text = value.index_key();
    let first = text.split(',').next()?.trim();
    let (field, descending) = match first.strip_prefix('-') {
        Some(field) => (field.trim(), true),
        None => (first, false),
    };
    if field.is_empty() {
        return None;
    }
    Some(Order {
        field: field.to_string(),
        descending,
    })
}

fn parse_positive(key: &str, value: &Value) -> CoreResult<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| CoreError::fetch_failed(format!("invalid {key}: {value}")))
}

fn parse_fields(value: &Value) -> Option<Vec<String>> {
    let fields: Vec<String> = match value {
        Value::Array(items) => items.iter().map(Value::index_key).collect(),
        other => other
            .index_key()
            .split(',')
            .map(|f| f.trim().to_string())
            .collect(),
    };
    let fields: Vec<String> = fields.into_iter().filter(|f| !f.is_empty()).collect();
    (!fields.is_empty()).then_some(fields)
}
