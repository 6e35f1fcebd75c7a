//! Consistency checks between the progress marker and the partition files.

use tracing::{info, warn};

use crate::error::StoreError;
use crate::pipeline::PartitionKeyFn;
use crate::progress::ProgressMarker;
use crate::store::Store;
use crate::work::DocumentItem;

const SAMPLE_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    pub key: String,
    pub records: usize,
    pub sample_title: Option<String>,
    pub sample_sections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Items the marker claims are done, when the marker points inside the link index.
    pub expected: Option<usize>,
    /// Records found across all partitions.
    pub actual: usize,
    pub partitions: Vec<PartitionStats>,
}

impl VerifyReport {
    /// Fewer records than the marker claims means some judgements are missing.
    pub fn is_consistent(&self) -> bool {
        self.expected.map_or(true, |expected| self.actual >= expected)
    }
}

/// Compare the marker with what the partitions actually hold. An under-count
/// is reported, never repaired.
pub fn verify(
    store: &Store,
    marker: Option<&ProgressMarker>,
    link_count: usize,
) -> Result<VerifyReport, StoreError> {
    let mut partitions = Vec::new();
    for key in store.partition_keys()? {
        let records = store.load_partition(&key)?;
        let sample = records.first();
        partitions.push(PartitionStats {
            sample_title: sample.map(|r| r.title.chars().take(SAMPLE_TITLE_CHARS).collect()),
            sample_sections: sample.map_or(0, |r| r.texts.len()),
            records: records.len(),
            key,
        });
    }
    let actual = partitions.iter().map(|p| p.records).sum();

    let expected = marker
        .and_then(ProgressMarker::committed)
        .filter(|&index| index < link_count)
        .map(|index| index + 1);

    let report = VerifyReport {
        expected,
        actual,
        partitions,
    };
    if !report.is_consistent() {
        warn!(
            "Marker claims {} processed links but partitions hold {} records",
            expected.unwrap_or_default(),
            actual
        );
    }
    Ok(report)
}

/// Drop the record of the item at the marker if it is the last record of its
/// partition and has no texts: a page cut short by an interrupted run.
/// The marker and all other records are left alone.
pub fn clean_incomplete_tail(
    store: &Store,
    marker: &ProgressMarker,
    items: &[DocumentItem],
    partition_key: PartitionKeyFn,
) -> Result<bool, StoreError> {
    let Some(item) = marker.committed().and_then(|i| items.get(i)) else {
        return Ok(false);
    };
    let key = partition_key(item);
    let mut records = store.load_partition(&key)?;

    let is_tail = records.last().is_some_and(|last| {
        let same_item = match last.doc_id.as_deref() {
            Some(id) => id == item.doc_id,
            None => last.url == item.link,
        };
        same_item && last.is_incomplete()
    });
    if !is_tail {
        return Ok(false);
    }

    records.pop();
    store.save_partition(&key, &records)?;
    info!(
        "Removed incomplete record for doc {} from partition {}",
        item.doc_id, key
    );
    Ok(true)
}
