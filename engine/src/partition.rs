//! Splits filtered items into units of work.

use crate::model::{CopyItem, CopyUnit};

/// Group small files into batches and schedule large ones on their own.
///
/// Items smaller than `small_threshold_bytes` are collected, in order, into
/// batches of at most `batch_size` files; everything else becomes a `Single`.
/// Every item ends up in exactly one unit. A `batch_size` of 0 is treated as 1.
pub fn partition<I>(items: I, small_threshold_bytes: u64, batch_size: usize) -> Vec<CopyUnit>
where
    I: IntoIterator<Item = CopyItem>,
{
    let batch_size = batch_size.max(1);
    let mut units = Vec::new();
    let mut batch: Vec<CopyItem> = Vec::with_capacity(batch_size);

    for item in items {
        if item.record.size_bytes >= small_threshold_bytes {
            units.push(CopyUnit::Single { item });
            continue;
        }
        batch.push(item);
        if batch.len() == batch_size {
            units.push(CopyUnit::Batch {
                items: std::mem::replace(&mut batch, Vec::with_capacity(batch_size)),
            });
        }
    }
    if !batch.is_empty() {
        units.push(CopyUnit::Batch { items: batch });
    }

    tracing::debug!(units = units.len(), "Partitioned copy items");
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupMapping, FileRecord};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn items(sizes: &[u64]) -> Vec<CopyItem> {
        let mapping = Arc::new(BackupMapping::new("/s", "/d"));
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| CopyItem {
                record: FileRecord {
                    absolute_path: PathBuf::from(format!("/s/{i}")),
                    size_bytes: size,
                    modified: SystemTime::UNIX_EPOCH,
                    source_root: PathBuf::from("/s"),
                },
                destination: PathBuf::from(format!("/d/{i}")),
                mapping: Arc::clone(&mapping),
            })
            .collect()
    }

    #[test]
    fn test_every_item_lands_in_exactly_one_unit() {
        let sizes: Vec<u64> = (0..37).map(|i| if i % 5 == 0 { 5000 } else { 10 }).collect();
        let units = partition(items(&sizes), 1024, 4);

        let mut seen = HashSet::new();
        for unit in units {
            match &unit {
                CopyUnit::Batch { items } => {
                    assert!(!items.is_empty() && items.len() <= 4);
                    assert!(items.iter().all(|i| i.record.size_bytes < 1024));
                }
                CopyUnit::Single { item } => assert!(item.record.size_bytes >= 1024),
            }
            for item in unit.into_items() {
                assert!(seen.insert(item.record.absolute_path));
            }
        }
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn test_threshold_is_exclusive_for_small_files() {
        let units = partition(items(&[1023, 1024]), 1024, 10);
        assert_eq!(units.len(), 2);
        assert!(matches!(units[0], CopyUnit::Single { .. }));
        assert!(matches!(&units[1], CopyUnit::Batch { items } if items.len() == 1));
    }

    #[test]
    fn test_batches_keep_encounter_order() {
        let units = partition(items(&[1, 1, 1, 1, 1]), 100, 2);
        let lens: Vec<_> = units.iter().map(CopyUnit::len).collect();
        assert_eq!(lens, vec![2, 2, 1]);
        let order: Vec<_> = units
            .into_iter()
            .flat_map(CopyUnit::into_items)
            .map(|i| i.record.absolute_path)
            .collect();
        let expected: Vec<_> = (0..5).map(|i| PathBuf::from(format!("/s/{i}"))).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_zero_batch_size_and_zero_threshold() {
        assert_eq!(partition(items(&[1, 1, 1]), 100, 0).len(), 3);
        let all_single = partition(items(&[0, 1, 2]), 0, 50);
        assert!(all_single.iter().all(|u| matches!(u, CopyUnit::Single { .. })));
        assert!(partition(Vec::new(), 100, 10).is_empty());
    }
}
