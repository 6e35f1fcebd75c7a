//! Checkpointed judgement crawl.
//!
//! Items are processed strictly in list order, one fetch at a time. Results
//! are buffered per partition (the year by default) and flushed together with
//! the progress marker every `flush_every` items, on partition switch, at the
//! end of the run and on interrupt. The partition is always written before
//! the marker, so the marker never claims an item whose record is not on disk.

use std::collections::HashSet;
use std::time::Duration;

use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::StoreError;
use crate::fetcher::Transport;
use crate::parser::judgement;
use crate::progress::{ProgressMarker, Status};
use crate::record::Record;
use crate::shutdown::ShutdownSignal;
use crate::store::Store;
use crate::work::DocumentItem;

/// Maps an item to the partition its record is stored in.
pub type PartitionKeyFn = fn(&DocumentItem) -> String;

pub fn by_year(item: &DocumentItem) -> String {
    item.year.to_string()
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub flush_every: usize,
    pub delay: Duration,
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            flush_every: settings.flush_every.max(1),
            delay: settings.delay(),
        }
    }
}

/// Outcome of one [`Pipeline::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub saved: usize,
    pub failed: usize,
    pub interrupted: bool,
}

struct Partition {
    key: String,
    records: Vec<Record>,
}

pub struct Pipeline<'a, T> {
    transport: &'a T,
    store: &'a Store,
    options: PipelineOptions,
    partition_key: PartitionKeyFn,
    shutdown: ShutdownSignal,
    progress: ProgressBar,
    marker: ProgressMarker,
    active: Option<Partition>,
}

impl<'a, T: Transport> Pipeline<'a, T> {
    pub fn new(
        transport: &'a T,
        store: &'a Store,
        options: PipelineOptions,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            transport,
            store,
            options,
            partition_key: by_year,
            shutdown,
            progress: ProgressBar::hidden(),
            marker: ProgressMarker::default(),
            active: None,
        }
    }

    pub fn with_partition_key(mut self, partition_key: PartitionKeyFn) -> Self {
        self.partition_key = partition_key;
        self
    }

    pub fn with_progress_bar(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Continue counting from a previously persisted marker.
    pub fn with_marker(mut self, marker: ProgressMarker) -> Self {
        self.marker = marker;
        self
    }

    pub fn marker(&self) -> &ProgressMarker {
        &self.marker
    }

    /// Fetch and extract one judgement. `None` when the page could not be
    /// fetched or did not answer 200; a page with an unexpected structure
    /// still yields a record, with no texts.
    pub async fn process_one(&self, item: &DocumentItem) -> Option<Record> {
        let response = match self.transport.fetch(&item.link).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetch failed for doc {} ({}): {}", item.doc_id, item.link, e);
                return None;
            }
        };
        if !response.is_ok() {
            warn!(
                "Doc {} answered {} ({}), skipping",
                item.doc_id, response.status, item.link
            );
            return None;
        }

        let record = judgement::extract(&response.body, &item.link).for_item(item);
        if record.is_incomplete() {
            warn!("No judgement text found for doc {} ({})", item.doc_id, item.link);
        } else {
            debug!("Doc {}: {} sections", item.doc_id, record.texts.len());
        }
        Some(record)
    }

    /// Process `items[start..]`. Per-item failures are logged and skipped;
    /// only persistence errors abort the run, after a best-effort flush.
    pub async fn run(
        &mut self,
        items: &[DocumentItem],
        start: usize,
    ) -> Result<RunSummary, StoreError> {
        let result = self.run_items(items, start).await;
        if let Err(e) = &result {
            error!("Aborting run: {}", e);
            if let Err(flush_err) = self.checkpoint() {
                error!("Final flush failed, buffered records lost: {}", flush_err);
            }
        }
        self.progress.finish_and_clear();
        result
    }

    async fn run_items(
        &mut self,
        items: &[DocumentItem],
        start: usize,
    ) -> Result<RunSummary, StoreError> {
        let mut summary = RunSummary::default();
        let mut since_flush = 0usize;

        self.progress
            .set_length(items.len().saturating_sub(start) as u64);
        self.marker.status = Status::Processing;
        info!("Starting from index {} of {}", start, items.len());

        for (i, item) in items.iter().enumerate().skip(start) {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            let key = (self.partition_key)(item);
            if self.active.as_ref().map(|p| p.key.as_str()) != Some(key.as_str()) {
                self.switch_partition(key, items, i)?;
            }

            let record = self.process_one(item).await;
            let succeeded = record.is_some();
            if let (Some(record), Some(partition)) = (record, self.active.as_mut()) {
                partition.records.push(record);
            }
            self.marker.advance(i, item.year, item.page, succeeded);

            summary.attempted += 1;
            if succeeded {
                summary.saved += 1;
            } else {
                summary.failed += 1;
            }
            self.progress.inc(1);

            since_flush += 1;
            if since_flush >= self.options.flush_every {
                self.checkpoint()?;
                since_flush = 0;
            }

            if i + 1 < items.len() && self.shutdown.sleep(self.options.delay).await {
                summary.interrupted = true;
                break;
            }
        }

        if summary.interrupted {
            info!(
                "Interrupted after index {}, saving progress",
                self.marker.index
            );
        } else {
            self.marker.status = Status::Completed;
        }
        self.checkpoint()?;

        info!(
            "Run finished: {} attempted ({} saved, {} failed)",
            summary.attempted, summary.saved, summary.failed
        );
        Ok(summary)
    }

    /// Flush the active partition, then the marker.
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        if let Some(partition) = &self.active {
            self.store.save_partition(&partition.key, &partition.records)?;
        }
        self.store.save_marker(&self.marker)
    }

    /// Make `key` the active partition, loading what is already on disk.
    ///
    /// Records for items at or after `next`, the first item not yet attempted,
    /// are uncommitted leftovers of an earlier run (written before the marker
    /// moved past them) and are dropped, since this run will produce them
    /// again. Records committed earlier in this run are kept.
    fn switch_partition(
        &mut self,
        key: String,
        items: &[DocumentItem],
        next: usize,
    ) -> Result<(), StoreError> {
        if self.active.as_ref().is_some_and(|p| !p.records.is_empty()) {
            self.checkpoint()?;
        }

        let mut records = self.store.load_partition(&key)?;
        let pending: HashSet<&str> = items[next.min(items.len())..]
            .iter()
            .filter(|item| (self.partition_key)(item) == key)
            .map(|item| item.doc_id.as_str())
            .collect();
        let before = records.len();
        records.retain(|r| r.doc_id.as_deref().map_or(true, |id| !pending.contains(id)));
        if records.len() < before {
            warn!(
                "Partition {}: dropped {} records beyond the progress marker",
                key,
                before - records.len()
            );
        }

        info!("Partition {}: {} records on disk", key, records.len());
        self.active = Some(Partition { key, records });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::stub::StubTransport;
    use crate::progress::resume_index;
    use crate::shutdown;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    fn link(doc_id: &str) -> String {
        format!("https://indiankanoon.org/doc/{}/", doc_id)
    }

    fn item(year: i32, page: u32, doc_id: &str) -> DocumentItem {
        DocumentItem {
            year,
            page,
            link: link(doc_id),
            doc_id: doc_id.to_string(),
        }
    }

    fn page_for(doc_id: &str) -> String {
        format!(
            r#"<html><body><div class="judgments">
                 <h2 class="doc_title">Judgement {id}</h2>
                 <p title="Facts">Facts of {id}.</p>
               </div></body></html>"#,
            id = doc_id
        )
    }

    fn stub_for(items: &[DocumentItem]) -> StubTransport {
        items.iter().fold(StubTransport::default(), |t, it| {
            t.with_page(&it.link, 200, &page_for(&it.doc_id))
        })
    }

    fn store() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "judgements").unwrap();
        (dir, store)
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            flush_every: 5,
            delay: Duration::ZERO,
        }
    }

    fn ten_items() -> Vec<DocumentItem> {
        (0..10)
            .map(|n| item(2018 + n / 4, 1, &format!("{}", 100 + n)))
            .collect()
    }

    fn doc_ids(store: &Store) -> Vec<String> {
        store
            .partition_keys()
            .unwrap()
            .iter()
            .flat_map(|k| store.load_partition(k).unwrap())
            .filter_map(|r| r.doc_id)
            .collect()
    }

    async fn run(
        store: &Store,
        transport: &StubTransport,
        items: &[DocumentItem],
        resume: bool,
    ) -> RunSummary {
        let (_trigger, signal) = shutdown::channel();
        let marker = if resume { store.load_marker().unwrap() } else { None };
        let start = resume_index(marker.as_ref(), resume);
        let mut pipeline = Pipeline::new(transport, store, options(), signal);
        if let Some(m) = marker {
            pipeline = pipeline.with_marker(m);
        }
        pipeline.run(items, start).await.unwrap()
    }

    #[tokio::test]
    async fn full_run_has_no_duplicates() {
        let (_dir, store) = store();
        let items = ten_items();
        let transport = stub_for(&items);

        let summary = run(&store, &transport, &items, false).await;
        assert_eq!(summary.attempted, 10);
        assert_eq!(summary.saved, 10);
        assert!(!summary.interrupted);

        let ids = doc_ids(&store);
        assert_eq!(ids.len(), 10);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 10);
        assert_eq!(store.partition_keys().unwrap(), vec!["2018", "2019", "2020"]);
        for key in ["2018", "2019", "2020"] {
            assert!(store
                .load_partition(key)
                .unwrap()
                .iter()
                .all(|r| r.year.map(|y| y.to_string()).as_deref() == Some(key)));
        }

        let marker = store.load_marker().unwrap().unwrap();
        assert_eq!(marker.index, 9);
        assert_eq!(marker.total_processed, 10);
        assert_eq!(marker.status, Status::Completed);
    }

    #[tokio::test]
    async fn partitions_keep_processing_order() {
        let (_dir, store) = store();
        let items = vec![item(2020, 1, "A"), item(2020, 1, "B"), item(2021, 1, "C")];
        let transport = stub_for(&items);
        let (_trigger, signal) = shutdown::channel();
        let mut pipeline = Pipeline::new(&transport, &store, options(), signal);

        // Two items processed: only 2020 exists.
        pipeline.run(&items[..2], 0).await.unwrap();
        assert_eq!(store.partition_keys().unwrap(), vec!["2020"]);
        let ids: Vec<_> = store
            .load_partition("2020")
            .unwrap()
            .into_iter()
            .filter_map(|r| r.doc_id)
            .collect();
        assert_eq!(ids, vec!["A", "B"]);

        pipeline.run(&items, 2).await.unwrap();
        assert_eq!(store.partition_keys().unwrap(), vec!["2020", "2021"]);
        assert_eq!(transport.calls(), vec![link("A"), link("B"), link("C")]);
    }

    #[tokio::test]
    async fn returning_partition_keeps_records_from_this_run() {
        let (_dir, store) = store();
        let items = vec![
            item(2020, 1, "1"),
            item(2021, 1, "2"),
            item(2020, 1, "3"),
            item(2021, 2, "4"),
        ];
        let transport = stub_for(&items);

        let summary = run(&store, &transport, &items, false).await;
        assert_eq!(summary.saved, 4);

        let ids = |key: &str| -> Vec<String> {
            store
                .load_partition(key)
                .unwrap()
                .into_iter()
                .filter_map(|r| r.doc_id)
                .collect()
        };
        assert_eq!(ids("2020"), vec!["1", "3"]);
        assert_eq!(ids("2021"), vec!["2", "4"]);
        let marker = store.load_marker().unwrap().unwrap();
        assert_eq!(marker.index, 3);
        assert_eq!(marker.total_processed, 4);
    }

    #[tokio::test]
    async fn resume_with_returning_partition_fills_each_item_once() {
        let (_dir, store) = store();
        let items = vec![
            item(2020, 1, "1"),
            item(2021, 1, "2"),
            item(2020, 1, "3"),
            item(2021, 2, "4"),
            item(2020, 2, "5"),
        ];
        run(&store, &stub_for(&items), &items, false).await;

        let mut marker = store.load_marker().unwrap().unwrap();
        marker.index = 1;
        store.save_marker(&marker).unwrap();

        let second = stub_for(&items);
        run(&store, &second, &items, true).await;
        assert_eq!(second.calls(), vec![link("3"), link("4"), link("5")]);

        let mut ids = doc_ids(&store);
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn empty_page_is_kept_and_counted_but_fetch_failure_is_not() {
        let (_dir, store) = store();
        let items = vec![item(2020, 1, "1"), item(2020, 1, "2"), item(2020, 2, "3")];
        let transport = StubTransport::default()
            .with_page(&items[0].link, 200, &page_for("1"))
            .with_page(&items[1].link, 404, "not found")
            .with_page(&items[2].link, 200, "<html><body>maintenance</body></html>");

        let summary = run(&store, &transport, &items, false).await;
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failed, 1);

        let records = store.load_partition("2020").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].is_incomplete());
        assert_eq!(records[1].doc_id.as_deref(), Some("3"));

        let marker = store.load_marker().unwrap().unwrap();
        assert_eq!(marker.index, 2);
        assert_eq!(marker.total_processed, 2);
        assert_eq!(marker.page, Some(2));
    }

    #[tokio::test]
    async fn resume_skips_committed_items_and_fills_the_rest_once() {
        let items = ten_items();
        for truncate_at in [0i64, 3, 4, 8] {
            let (_dir, store) = store();
            let first = stub_for(&items);
            run(&store, &first, &items, false).await;

            let mut marker = store.load_marker().unwrap().unwrap();
            marker.index = truncate_at;
            marker.status = Status::Processing;
            store.save_marker(&marker).unwrap();

            let second = stub_for(&items);
            run(&store, &second, &items, true).await;

            let expected: Vec<String> = items[truncate_at as usize + 1..]
                .iter()
                .map(|it| it.link.clone())
                .collect();
            assert_eq!(second.calls(), expected, "truncated at {}", truncate_at);

            let mut counts: HashMap<String, usize> = HashMap::new();
            for id in doc_ids(&store) {
                *counts.entry(id).or_default() += 1;
            }
            assert_eq!(counts.len(), 10, "truncated at {}", truncate_at);
            assert!(counts.values().all(|&c| c == 1), "truncated at {}", truncate_at);
        }
    }

    #[tokio::test]
    async fn resume_after_completion_does_nothing() {
        let (_dir, store) = store();
        let items = ten_items();
        run(&store, &stub_for(&items), &items, false).await;

        let again = stub_for(&items);
        let summary = run(&store, &again, &items, true).await;
        assert_eq!(summary.attempted, 0);
        assert!(again.calls().is_empty());
        assert_eq!(doc_ids(&store).len(), 10);
    }

    #[tokio::test]
    async fn interrupt_flushes_and_stops_before_next_item() {
        let (_dir, store) = store();
        let items = ten_items();
        let transport = stub_for(&items);
        let (trigger, signal) = shutdown::channel();
        let opts = PipelineOptions {
            flush_every: 100,
            delay: Duration::from_secs(3600),
        };
        let mut pipeline = Pipeline::new(&transport, &store, opts, signal);

        let run = pipeline.run(&items, 0);
        tokio::pin!(run);
        // First item is fetched, then the driver sleeps: interrupt it there.
        tokio::select! {
            _ = &mut run => panic!("run finished without interrupt"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => trigger.trigger(),
        }
        let summary = run.await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 1);
        assert_eq!(transport.calls().len(), 1);
        let marker = store.load_marker().unwrap().unwrap();
        assert_eq!(marker.index, 0);
        assert_eq!(marker.status, Status::Processing);
        assert_eq!(store.load_partition("2018").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn custom_partition_key() {
        let (_dir, store) = store();
        let items = vec![item(2020, 1, "1"), item(2020, 2, "2"), item(2020, 2, "3")];
        let transport = stub_for(&items);
        let (_trigger, signal) = shutdown::channel();
        let mut pipeline = Pipeline::new(&transport, &store, options(), signal)
            .with_partition_key(|it| format!("{}-p{}", it.year, it.page));

        pipeline.run(&items, 0).await.unwrap();
        assert_eq!(store.partition_keys().unwrap(), vec!["2020-p1", "2020-p2"]);
        assert_eq!(store.load_partition("2020-p2").unwrap().len(), 2);
    }

    /// Looks at the files on disk every time a page is requested.
    struct Snooper<'a> {
        inner: StubTransport,
        store: &'a Store,
        seen: std::sync::Mutex<Vec<(Option<i64>, usize)>>,
    }

    impl Transport for Snooper<'_> {
        async fn fetch(
            &self,
            url: &str,
        ) -> Result<crate::fetcher::FetchResponse, crate::error::TransportError> {
            let marker = self.store.load_marker().unwrap().map(|m| m.index);
            let on_disk = self.store.load_partition("2020").unwrap().len();
            self.seen.lock().unwrap().push((marker, on_disk));
            self.inner.fetch(url).await
        }
    }

    #[tokio::test]
    async fn flush_cadence_writes_partition_before_marker() {
        let (_dir, store) = store();
        let items: Vec<_> = (0..7).map(|n| item(2020, 1, &n.to_string())).collect();
        let transport = Snooper {
            inner: stub_for(&items),
            store: &store,
            seen: Default::default(),
        };
        let (_trigger, signal) = shutdown::channel();
        let mut pipeline = Pipeline::new(&transport, &store, options(), signal);
        pipeline.run(&items, 0).await.unwrap();

        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 7);
        // Nothing on disk until five items are done.
        assert!(seen[..5].iter().all(|&(marker, _)| marker.is_none()));
        assert_eq!(seen[5], (Some(4), 5));
        assert_eq!(seen[6], (Some(4), 5));
        for (marker, on_disk) in seen {
            if let Some(index) = marker {
                assert!(on_disk as i64 >= index + 1);
            }
        }
    }

    /// Replaces the 2020 partition file with a directory when `trap` is requested,
    /// so the next rename over it fails.
    struct Saboteur<'a> {
        inner: StubTransport,
        store: &'a Store,
        trap: String,
    }

    impl Transport for Saboteur<'_> {
        async fn fetch(
            &self,
            url: &str,
        ) -> Result<crate::fetcher::FetchResponse, crate::error::TransportError> {
            if url == self.trap {
                let path = self.store.partition_path("2020");
                std::fs::remove_file(&path).unwrap();
                std::fs::create_dir(&path).unwrap();
            }
            self.inner.fetch(url).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_stops_the_run() {
        let (_dir, store) = store();
        let items: Vec<_> = (0..6).map(|n| item(2020, 1, &n.to_string())).collect();
        let transport = Saboteur {
            inner: stub_for(&items),
            store: &store,
            trap: link("2"),
        };
        let (_trigger, signal) = shutdown::channel();
        let opts = PipelineOptions {
            flush_every: 2,
            delay: Duration::ZERO,
        };
        let mut pipeline = Pipeline::new(&transport, &store, opts, signal);

        let err = pipeline.run(&items, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "unexpected error: {}", err);

        // Items 2 and 3 were fetched, the flush after them failed, nothing more.
        assert_eq!(transport.inner.calls(), vec![link("0"), link("1"), link("2"), link("3")]);
        let marker = store.load_marker().unwrap().unwrap();
        assert_eq!(marker.index, 1);
        assert_eq!(marker.total_processed, 2);
    }
}
