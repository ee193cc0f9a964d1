//! Property-based test generators using proptest.
//!
//! Provides strategies for generating sync scripts that keep the
//! invariants the engine relies on: unique server ids and positive
//! modification timestamps.

use crate::fixtures::remote_record;
use proptest::prelude::*;
use serde_json::Value;
use tidesync_engine::{MergeMode, SyncOptions};

/// Strategy for generating merge modes.
pub fn merge_mode_strategy() -> impl Strategy<Value = MergeMode> {
    prop_oneof![Just(MergeMode::Overwrite), Just(MergeMode::LeaveIfChanged)]
}

/// Strategy for generating job options.
pub fn sync_options_strategy() -> impl Strategy<Value = SyncOptions> {
    (
        merge_mode_strategy(),
        prop::option::of(prop::collection::vec("[A-Z][a-z]{1,8}", 1..4)),
    )
        .prop_map(|(mode, fields)| {
            let options = SyncOptions::new(mode);
            match fields {
                Some(fields) => options.with_fieldlist(fields),
                None => options,
            }
        })
}

/// Strategy for generating page sizes of a pull script.
pub fn page_sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..12, 1..6)
}

/// Strategy for generating modification timestamps, one per record.
pub fn timestamps_strategy(count: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..1_000_000, count)
}

/// Strategy for generating a pull script: pages of remote records with
/// unique ids.
pub fn pull_script_strategy() -> impl Strategy<Value = Vec<Vec<Value>>> {
    page_sizes_strategy().prop_flat_map(|sizes| {
        let total = sizes.iter().sum();
        timestamps_strategy(total).prop_map(move |stamps| build_pages(&sizes, &stamps))
    })
}

/// Splits `stamps` into pages of the given sizes.
pub fn build_pages(sizes: &[usize], stamps: &[i64]) -> Vec<Vec<Value>> {
    let mut stamps = stamps.iter().enumerate();
    sizes
        .iter()
        .map(|&size| {
            stamps
                .by_ref()
                .take(size)
                .map(|(i, &ts)| remote_record(&format!("{i:05}"), ts))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_pull_script_ids_unique(pages in pull_script_strategy()) {
            let ids: Vec<&str> = pages
                .iter()
                .flatten()
                .filter_map(|r| r["Id"].as_str())
                .collect();
            let unique: HashSet<&str> = ids.iter().copied().collect();
            prop_assert_eq!(ids.len(), unique.len());
        }

        #[test]
        fn test_options_roundtrip_merge_mode(options in sync_options_strategy()) {
            let value = serde_json::to_value(&options).unwrap();
            let back: SyncOptions = serde_json::from_value(value).unwrap();
            prop_assert_eq!(back, options);
        }
    }

    #[test]
    fn test_build_pages() {
        let pages = build_pages(&[2, 0, 1], &[10, 20, 30]);
        let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 0, 1]);
        assert_eq!(pages[2][0]["LastModifiedDate"], serde_json::json!(30));
    }
}
