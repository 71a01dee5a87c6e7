//! Foreign-key relations between two collections.
//!
//! A [`ForeignKey`] pairs a parent collection with a child collection whose
//! `field` holds a parent id. Registering it turns on referential checks in
//! both collections: the child rejects records that do not reference a live
//! parent, and the parent skips drops of records a live child still
//! references. The relation itself only orchestrates joined reads and the
//! cascade.
//!
//! Joined filters address each side with the collection name as prefix:
//! `users_name` filters the parent on `name`, `posts_title` filters the
//! child on `title`. Unprefixed keys go to the parent.

use crate::collection::store::Link;
use crate::collection::{Collection, DropReport, Page};
use crate::error::{CoreError, CoreResult};
use crate::filter::{ITEMS_PER_PAGE, PAGE};
use crate::value::{document_id, Document, Value, ID_FIELD};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a cascading drop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CascadeReport {
    /// Parent records dropped or kept.
    pub parents: DropReport,
    /// Child records dropped or kept.
    pub children: DropReport,
}

/// A registered parent/child relation.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    parent: Arc<Collection>,
    child: Arc<Collection>,
    field: String,
}

impl ForeignKey {
    /// Registers `child.field -> parent._id`.
    ///
    /// The relation stays registered for as long as both collections are
    /// open, even once this handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `field` is not indexed in the child,
    /// or if both sides share a name.
    pub fn new(
        parent: Arc<Collection>,
        child: Arc<Collection>,
        field: impl Into<String>,
    ) -> CoreResult<Self> {
        let field = field.into();
        if !child.store().indexes.contains_key(&field) {
            return Err(CoreError::invalid_operation(format!(
                "{field} must be indexed in {}",
                child.name()
            )));
        }
        if parent.name() == child.name() {
            return Err(CoreError::invalid_operation(format!(
                "a relation needs two distinct names, both are {}",
                parent.name()
            )));
        }

        parent.store().relations.write().children.push(Link {
            store: Arc::downgrade(child.store()),
            field: field.clone(),
        });
        child.store().relations.write().parents.push(Link {
            store: Arc::downgrade(parent.store()),
            field: field.clone(),
        });
        debug!(parent = %parent.name(), child = %child.name(), field = %field, "relation registered");

        Ok(Self {
            parent,
            child,
            field,
        })
    }

    /// Returns the parent collection.
    pub fn parent(&self) -> &Collection {
        &self.parent
    }

    /// Returns the child collection.
    pub fn child(&self) -> &Collection {
        &self.child
    }

    /// Returns the child field holding parent ids.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Splits a joined filter into the parent and child filters.
    fn split(&self, filter: &Document) -> (Document, Document) {
        let parent_prefix = format!("{}_", self.parent.name());
        let child_prefix = format!("{}_", self.child.name());
        // The longer prefix wins when one name starts with the other.
        let child_first = child_prefix.len() > parent_prefix.len();

        let mut parent = Document::new();
        let mut child = Document::new();
        for (key, value) in filter {
            let as_parent = key.strip_prefix(parent_prefix.as_str());
            let as_child = key.strip_prefix(child_prefix.as_str());
            match (as_parent, as_child) {
                (_, Some(k)) if child_first || as_parent.is_none() => {
                    child.insert(k.to_string(), value.clone());
                }
                (Some(k), _) => {
                    parent.insert(k.to_string(), value.clone());
                }
                _ => {
                    parent.insert(key.clone(), value.clone());
                }
            }
        }
        (parent, child)
    }

    /// Returns parent records with their children embedded under the child
    /// collection's name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no parent matches. A parent without children
    /// carries an empty list.
    pub fn fetch(&self, filter: &Document) -> CoreResult<Page> {
        let (parent_filter, child_filter) = self.split(filter);
        let mut page = self.parent.fetch(&parent_filter)?;
        for doc in &mut page.data {
            let children = match document_id(doc) {
                Some(id) => self.children_of(id, &child_filter)?,
                None => Vec::new(),
            };
            doc.insert(
                self.child.name().to_string(),
                Value::Array(children.into_iter().map(Value::from).collect()),
            );
        }
        Ok(page)
    }

    /// Every child of `parent` matching `filter`, unpaged.
    fn children_of(&self, parent: u64, filter: &Document) -> CoreResult<Vec<Document>> {
        let mut filter = filter.clone();
        filter.insert(self.field.clone(), Value::from(parent));
        all(&self.child, filter)
    }

    /// Creates a child of the single parent matching `filter`.
    ///
    /// Returns the joined view of that parent.
    ///
    /// # Errors
    ///
    /// Returns `NewFailed` unless exactly one parent matches.
    #[allow(clippy::new_ret_no_self)]
    pub fn new_child(&self, filter: &Document, mut data: Document) -> CoreResult<Page> {
        let (parent_filter, _) = self.split(filter);
        let parents = match all(&self.parent, parent_filter) {
            Ok(parents) => parents,
            Err(e) => return Err(CoreError::new_failed(e.to_string())),
        };
        let [parent] = parents.as_slice() else {
            return Err(CoreError::new_failed(format!(
                "{} parents match, exactly one is required",
                parents.len()
            )));
        };
        let Some(id) = document_id(parent) else {
            return Err(CoreError::new_failed("parent has no id"));
        };

        data.insert(self.field.clone(), Value::from(id));
        self.child.new(data)?;
        self.fetch(&self.parent_id_filter(id))
    }

    /// Drops matching parents after their matching children.
    ///
    /// Children outside the child part of `filter` keep their parent alive;
    /// such parents are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns `DropFailed` for a malformed filter.
    pub fn drop(&self, filter: &Document) -> CoreResult<CascadeReport> {
        let (parent_filter, child_filter) = self.split(filter);
        let parents = match all(&self.parent, parent_filter) {
            Ok(parents) => parents,
            Err(CoreError::NotFound) => Vec::new(),
            Err(e) => return Err(CoreError::drop_failed(e.to_string())),
        };

        let mut report = CascadeReport::default();
        for id in parents.iter().filter_map(document_id) {
            let mut children = child_filter.clone();
            children.insert(self.field.clone(), Value::from(id));
            let dropped = Collection::drop(&self.child, &children)?;
            report.children.dropped.extend(dropped.dropped);
            report.children.skipped.extend(dropped.skipped);

            let by_id = Document::from([(ID_FIELD.to_string(), Value::from(id))]);
            let dropped = Collection::drop(&self.parent, &by_id)?;
            report.parents.dropped.extend(dropped.dropped);
            report.parents.skipped.extend(dropped.skipped);
        }
        Ok(report)
    }

    /// Merges `data` into every child embedded in the joined view.
    ///
    /// Returns the refreshed joined view.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no parent matches.
    pub fn replace(&self, filter: &Document, data: Document) -> CoreResult<Page> {
        self.update(filter, &data, |child, id, data| child.replace(id, data))
    }

    /// Same as [`replace`](Self::replace), through the child's `edit`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no parent matches.
    pub fn edit(&self, filter: &Document, data: Document) -> CoreResult<Page> {
        self.update(filter, &data, |child, id, data| child.edit(id, data))
    }

    fn update<F>(&self, filter: &Document, data: &Document, apply: F) -> CoreResult<Page>
    where
        F: Fn(&Collection, &Document, Document) -> CoreResult<Page>,
    {
        let view = self.fetch(filter)?;
        for parent in &view.data {
            let children = parent
                .get(self.child.name())
                .and_then(Value::as_array)
                .unwrap_or_default();
            for child in children {
                let Some(id) = child.get(ID_FIELD).and_then(Value::as_u64) else {
                    continue;
                };
                let by_id = Document::from([(ID_FIELD.to_string(), Value::from(id))]);
                apply(&self.child, &by_id, data.clone())?;
            }
        }
        self.fetch(filter)
    }

    fn parent_id_filter(&self, id: u64) -> Document {
        Document::from([(format!("{}_{ID_FIELD}", self.parent.name()), Value::from(id))])
    }
}

/// Every record of `collection` matching `filter`, ignoring paging.
fn all(collection: &Collection, mut filter: Document) -> CoreResult<Vec<Document>> {
    filter.remove(PAGE);
    let count = collection.count(&filter)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    filter.insert(ITEMS_PER_PAGE.to_string(), Value::from(count));
    Ok(collection.fetch(&filter)?.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::value::document;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn open(temp: &TempDir, name: &str, fields: &[&str]) -> Arc<Collection> {
        let config = CollectionConfig::new()
            .groups(2)
            .index_fields(fields.iter().copied())
            .lock_poll_interval(Duration::from_millis(1));
        Arc::new(Collection::open(temp.path().join(name), config).unwrap())
    }

    fn relation(temp: &TempDir) -> ForeignKey {
        let users = open(temp, "users", &["name"]);
        let posts = open(temp, "posts", &["user", "title"]);
        ForeignKey::new(users, posts, "user").unwrap()
    }

    #[test]
    fn field_must_be_indexed() {
        let temp = tempdir().unwrap();
        let users = open(&temp, "users", &["name"]);
        let posts = open(&temp, "posts", &["title"]);
        assert!(matches!(
            ForeignKey::new(users, posts, "user"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn split_routes_prefixed_keys() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        let (parent, child) = fk.split(&document([
            ("users_name", "ann"),
            ("posts_title", "hi"),
            ("page", "2"),
        ]));
        assert_eq!(parent, document([("name", "ann"), ("page", "2")]));
        assert_eq!(child, document([("title", "hi")]));
    }

    #[test]
    fn fetch_embeds_children() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        fk.parent().new(document([("name", "bob")])).unwrap();

        let page = fk
            .new_child(&document([("users_name", "ann")]), document([("title", "hi")]))
            .unwrap();
        let posts = page.data[0]["posts"].as_array().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].get("user"), Some(&Value::Integer(0)));

        let page = fk.fetch(&document([("users_name", "bob")])).unwrap();
        assert_eq!(page.data[0]["posts"], Value::Array(Vec::new()));
    }

    #[test]
    fn new_child_needs_exactly_one_parent() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        fk.parent().new(document([("name", "ann")])).unwrap();

        let err = fk
            .new_child(&document([("users_name", "ann")]), document([("title", "x")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::NewFailed { .. }));
        let err = fk
            .new_child(&document([("users_name", "eve")]), document([("title", "x")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::NewFailed { .. }));
        assert_eq!(fk.child().len().unwrap(), 0);
    }

    #[test]
    fn child_rejects_missing_parent() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        let err = fk
            .child()
            .new(document([("user", Value::from(5)), ("title", Value::from("x"))]))
            .unwrap_err();
        assert!(matches!(err, CoreError::NewFailed { .. }));
    }

    #[test]
    fn parent_with_children_is_skipped() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        fk.child()
            .new(document([("user", Value::from(0)), ("title", Value::from("x"))]))
            .unwrap();

        let report = fk.parent().drop(&document([("name", "ann")])).unwrap();
        assert!(report.dropped.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fk.parent().len().unwrap(), 1);
    }

    #[test]
    fn drop_cascades() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        for title in ["a", "b"] {
            fk.new_child(&document([("users_name", "ann")]), document([("title", title)]))
                .unwrap();
        }

        let report = fk.drop(&document([("users_name", "ann")])).unwrap();
        assert_eq!(report.children.dropped.len(), 2);
        assert_eq!(report.parents.dropped.len(), 1);
        assert_eq!(fk.parent().len().unwrap(), 0);
        assert_eq!(fk.child().len().unwrap(), 0);
    }

    #[test]
    fn partial_cascade_keeps_parent() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        for title in ["a", "b"] {
            fk.new_child(&document([("users_name", "ann")]), document([("title", title)]))
                .unwrap();
        }

        let report = fk
            .drop(&document([("users_name", "ann"), ("posts_title", "a")]))
            .unwrap();
        assert_eq!(report.children.dropped.len(), 1);
        assert_eq!(report.parents.skipped.len(), 1);
        assert_eq!(fk.parent().len().unwrap(), 1);
    }

    #[test]
    fn replace_updates_every_child() {
        let temp = tempdir().unwrap();
        let fk = relation(&temp);
        fk.parent().new(document([("name", "ann")])).unwrap();
        for title in ["a", "b"] {
            fk.new_child(&document([("users_name", "ann")]), document([("title", title)]))
                .unwrap();
        }

        let page = fk
            .replace(&document([("users_name", "ann")]), document([("seen", true)]))
            .unwrap();
        let posts = page.data[0]["posts"].as_array().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.get("seen") == Some(&Value::Bool(true))));

        fk.edit(&document([("users_name", "ann")]), document([("seen", false)]))
            .unwrap();
        assert_eq!(fk.child().count(&document([("title", "a")])).unwrap(), 1);
    }
}
