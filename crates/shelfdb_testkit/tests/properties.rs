//! Property tests over random verb sequences.

use proptest::prelude::*;
use shelfdb_core::{document, document_id, Document, Value};
use shelfdb_testkit::{
    file_backed_config, scenarios, test_config, verb_sequence_strategy, TestCollection, FIELDS,
};
use std::collections::BTreeSet;

proptest! {
    #![proptest_config(file_backed_config(24))]

    #[test]
    fn indexes_and_counts_stay_coherent(ops in verb_sequence_strategy(1, 25)) {
        let test = TestCollection::new(test_config().index_fields(FIELDS));
        let mut created = Vec::new();
        for op in &ops {
            op.apply(&test).unwrap();
            created.push(test.next_id().unwrap());
        }

        let report = test.verify().unwrap();
        prop_assert!(report.is_ok(), "{:?}", report.issues);

        // Every live id, and nothing else, is fetchable by id.
        let total = test.len().unwrap();
        let mut fetchable = 0;
        for id in 0..test.next_id().unwrap() {
            if test.fetch(&document([("_id", id)])).is_ok() {
                fetchable += 1;
            }
        }
        prop_assert_eq!(fetchable, total);

        // The id counter never moves backwards.
        prop_assert!(created.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn pages_concatenate_to_the_full_result(
        count in 0usize..30,
        per_page in 1usize..8,
        descending in any::<bool>(),
    ) {
        let test = scenarios::populated_collection(count);
        let order = if descending { "-a" } else { "a" };
        let filter = |extra: Vec<(&str, Value)>| -> Document {
            let mut filter = document([("order", order)]);
            filter.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v)));
            filter
        };

        if count == 0 {
            prop_assert!(test.fetch(&filter(Vec::new())).is_err());
            return Ok(());
        }

        let full: Vec<u64> = test
            .fetch(&filter(vec![("items_per_page", Value::from(count as u64))]))
            .unwrap()
            .data
            .iter()
            .filter_map(document_id)
            .collect();
        prop_assert_eq!(full.len(), count);

        let pages = count.div_ceil(per_page);
        let mut joined = Vec::new();
        for page in 1..=pages {
            let data = test
                .fetch(&filter(vec![
                    ("page", Value::from(page as u64)),
                    ("items_per_page", Value::from(per_page as u64)),
                ]))
                .unwrap()
                .data;
            prop_assert!(data.len() <= per_page);
            joined.extend(data.iter().filter_map(document_id));
        }
        prop_assert_eq!(&joined, &full);
        prop_assert_eq!(joined.iter().collect::<BTreeSet<_>>().len(), count);

        // Past the last page the result set is still non-empty overall,
        // so the page is simply empty.
        let past = test
            .fetch(&filter(vec![
                ("page", Value::from(pages as u64 + 1)),
                ("items_per_page", Value::from(per_page as u64)),
            ]))
            .unwrap();
        prop_assert!(past.data.is_empty());
        prop_assert_eq!(past.total, count as u64);
    }
}
