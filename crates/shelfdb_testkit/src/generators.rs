//! Property-based test generators using proptest.
//!
//! Values are drawn from small domains so that filters built from
//! generated values actually match records.

use proptest::prelude::*;
use shelfdb_core::{Collection, CoreError, CoreResult, Document, Value, ID_FIELD};

/// Fields generated documents draw from.
pub const FIELDS: [&str; 3] = ["a", "b", "c"];

/// Strategy for generating a field value: small integers or short text.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => (0i64..4).prop_map(Value::from),
        1 => prop::sample::select(vec!["x", "y"]).prop_map(Value::from),
    ]
}

/// Strategy for generating a field name.
pub fn field_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(FIELDS.to_vec()).prop_map(str::to_string)
}

/// Strategy for generating a document over [`FIELDS`].
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(field_strategy(), value_strategy(), 1..FIELDS.len())
}

/// A verb call against a collection.
#[derive(Debug, Clone)]
pub enum VerbOp {
    /// Create one record
    New(Document),
    /// Create several records
    Insert(Vec<Document>),
    /// Merge data into the records where `field == value`
    Replace {
        /// Filter field
        field: String,
        /// Filter value
        value: Value,
        /// Merged data
        data: Document,
    },
    /// Same as `Replace`, through `edit`
    Edit {
        /// Filter field
        field: String,
        /// Filter value
        value: Value,
        /// Merged data
        data: Document,
    },
    /// Delete the records where `field == value`
    Drop {
        /// Filter field
        field: String,
        /// Filter value
        value: Value,
    },
    /// Delete one record by id
    DropId(u64),
}

impl VerbOp {
    /// Runs the call. A replace or edit that matches nothing is not an
    /// error here.
    pub fn apply(&self, collection: &Collection) -> CoreResult<()> {
        let by = |field: &str, value: &Value| Document::from([(field.to_string(), value.clone())]);
        let result = match self {
            VerbOp::New(doc) => collection.new(doc.clone()).map(drop),
            VerbOp::Insert(docs) => collection.insert(docs.clone()).map(drop),
            VerbOp::Replace { field, value, data } => {
                collection.replace(&by(field, value), data.clone()).map(drop)
            }
            VerbOp::Edit { field, value, data } => {
                collection.edit(&by(field, value), data.clone()).map(drop)
            }
            VerbOp::Drop { field, value } => collection.drop(&by(field, value)).map(drop),
            VerbOp::DropId(id) => collection.drop(&by(ID_FIELD, &Value::from(*id))).map(drop),
        };
        match result {
            Err(CoreError::NotFound) => Ok(()),
            other => other,
        }
    }
}

/// Strategy for generating verb calls.
pub fn verb_strategy() -> impl Strategy<Value = VerbOp> {
    prop_oneof![
        4 => document_strategy().prop_map(VerbOp::New),
        1 => prop::collection::vec(document_strategy(), 1..4).prop_map(VerbOp::Insert),
        1 => (field_strategy(), value_strategy(), document_strategy())
            .prop_map(|(field, value, data)| VerbOp::Replace { field, value, data }),
        1 => (field_strategy(), value_strategy(), document_strategy())
            .prop_map(|(field, value, data)| VerbOp::Edit { field, value, data }),
        1 => (field_strategy(), value_strategy())
            .prop_map(|(field, value)| VerbOp::Drop { field, value }),
        1 => (0u64..10).prop_map(VerbOp::DropId),
    ]
}

/// Strategy for generating a sequence of verb calls.
pub fn verb_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<VerbOp>> {
    prop::collection::vec(verb_strategy(), min_ops..max_ops)
}

/// Proptest configuration for properties that touch the file system.
#[must_use]
pub fn file_backed_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        max_shrink_iters: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(file_backed_config(32))]

        #[test]
        fn documents_use_known_fields(doc in document_strategy()) {
            prop_assert!(!doc.is_empty());
            prop_assert!(doc.keys().all(|k| FIELDS.contains(&k.as_str())));
        }

        #[test]
        fn sequences_respect_bounds(ops in verb_sequence_strategy(2, 6)) {
            prop_assert!((2..6).contains(&ops.len()));
        }
    }
}
