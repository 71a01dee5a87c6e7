//! Integration tests for foreign-key relations.

use shelfdb_core::{
    document, document_id, Collection, CoreError, Document, ForeignKey, Value,
};
use shelfdb_testkit::test_config;
use std::sync::Arc;
use tempfile::TempDir;

struct Blog {
    fk: ForeignKey,
    _temp_dir: TempDir,
}

fn blog() -> Blog {
    let temp_dir = TempDir::new().unwrap();
    let authors = Collection::open(
        temp_dir.path().join("authors"),
        test_config().index_fields(["name"]),
    )
    .unwrap();
    let posts = Collection::open(
        temp_dir.path().join("posts"),
        test_config().index_fields(["author", "tag"]),
    )
    .unwrap();
    let fk = ForeignKey::new(Arc::new(authors), Arc::new(posts), "author").unwrap();
    Blog {
        fk,
        _temp_dir: temp_dir,
    }
}

fn post(tag: &str) -> Document {
    document([("tag", tag)])
}

fn embedded(page_doc: &Document) -> Vec<Document> {
    page_doc["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_map().unwrap().clone())
        .collect()
}

#[test]
fn joined_fetch_filters_both_sides() {
    let blog = blog();
    let fk = &blog.fk;
    fk.parent().new(document([("name", "ann")])).unwrap();
    fk.parent().new(document([("name", "bob")])).unwrap();
    for (author, tag) in [("ann", "rust"), ("ann", "go"), ("bob", "rust")] {
        fk.new_child(&document([("authors_name", author)]), post(tag))
            .unwrap();
    }

    let page = fk.fetch(&Document::new()).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(embedded(&page.data[0]).len(), 2);
    assert_eq!(embedded(&page.data[1]).len(), 1);

    let page = fk.fetch(&document([("posts_tag", "rust")])).unwrap();
    for author in &page.data {
        let posts = embedded(author);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["tag"], Value::from("rust"));
        assert_eq!(posts[0]["author"], author["_id"]);
    }
}

#[test]
fn child_requires_live_parent() {
    let blog = blog();
    let fk = &blog.fk;
    let ann = fk.parent().new(document([("name", "ann")])).unwrap();
    let ann_id = document_id(&ann).unwrap();

    let orphan = document([("author", Value::from(ann_id + 1)), ("tag", Value::from("x"))]);
    assert!(matches!(
        fk.child().new(orphan),
        Err(CoreError::NewFailed { .. })
    ));
    assert!(matches!(
        fk.child().new(post("x")),
        Err(CoreError::NewFailed { .. })
    ));

    let child = document([("author", Value::from(ann_id)), ("tag", Value::from("x"))]);
    let created = fk.child().new(child).unwrap();

    // Moving the child to a missing parent is rejected and changes nothing.
    let err = fk
        .child()
        .edit(
            &document([("_id", document_id(&created).unwrap())]),
            document([("author", 99)]),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::EditFailed { .. }));
    assert_eq!(fk.child().count(&document([("author", ann_id)])).unwrap(), 1);
}

#[test]
fn referenced_parent_is_not_dropped_directly() {
    let blog = blog();
    let fk = &blog.fk;
    fk.parent().new(document([("name", "ann")])).unwrap();
    fk.parent().new(document([("name", "bob")])).unwrap();
    fk.new_child(&document([("authors_name", "ann")]), post("x"))
        .unwrap();

    let report = fk.parent().drop(&Document::new()).unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(fk.parent().len().unwrap(), 1);

    let cascade = fk.drop(&document([("authors_name", "ann")])).unwrap();
    assert_eq!(cascade.children.dropped.len(), 1);
    assert_eq!(cascade.parents.dropped.len(), 1);
    assert!(fk.parent().is_empty().unwrap());
    assert!(fk.child().is_empty().unwrap());
}

#[test]
fn joined_edit_touches_only_children() {
    let blog = blog();
    let fk = &blog.fk;
    fk.parent().new(document([("name", "ann")])).unwrap();
    fk.new_child(&document([("authors_name", "ann")]), post("a"))
        .unwrap();
    fk.new_child(&document([("authors_name", "ann")]), post("b"))
        .unwrap();

    let page = fk
        .edit(&document([("authors_name", "ann")]), document([("tag", "z")]))
        .unwrap();
    assert_eq!(page.data[0]["name"], Value::from("ann"));
    assert!(embedded(&page.data[0])
        .iter()
        .all(|p| p["tag"] == Value::from("z")));
    assert_eq!(fk.child().count(&document([("tag", "z")])).unwrap(), 2);
    assert!(fk.child().verify().unwrap().is_ok());
}

#[test]
fn joined_fetch_of_missing_parent_is_not_found() {
    let blog = blog();
    assert!(matches!(
        blog.fk.fetch(&document([("authors_name", "eve")])),
        Err(CoreError::NotFound)
    ));
    assert!(matches!(
        blog.fk
            .replace(&document([("authors_name", "eve")]), document([("tag", "z")])),
        Err(CoreError::NotFound)
    ));
}
