//! JSON file persistence.
//!
//! Every write goes to `<file>.tmp` first and is renamed over the target, so
//! a reader never observes a half-written document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::progress::{ListingProgress, ProgressMarker};
use crate::record::Record;
use crate::work::{DocumentItem, RawLinks};

const RAW_LINKS_FILE: &str = "supreme_court_links.json";
const FILTERED_LINKS_FILE: &str = "filtered_judgement_links.json";
const LINK_INDEX_FILE: &str = "all_judgement_links_flat.json";
const LISTING_PROGRESS_FILE: &str = "scraper_progress.json";
const MARKER_FILE: &str = "judgement_scraper_progress.json";

type Result<T> = std::result::Result<T, StoreError>;

/// File layout of one crawl: the link files and markers live in `root`,
/// one `<partition>.json` per partition under `partitions`.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    partitions: PathBuf,
}

impl Store {
    /// Open a store, creating the partition directory if needed.
    pub fn open(root: impl Into<PathBuf>, partition_dir: impl AsRef<Path>) -> Result<Self> {
        let root = root.into();
        let partitions = root.join(partition_dir);
        fs::create_dir_all(&partitions).map_err(|e| StoreError::io(&partitions, e))?;
        Ok(Self { root, partitions })
    }

    pub fn partition_path(&self, key: &str) -> PathBuf {
        self.partitions.join(format!("{}.json", key))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    pub fn link_index_path(&self) -> PathBuf {
        self.root.join(LINK_INDEX_FILE)
    }

    // ── Partitions ──

    pub fn load_partition(&self, key: &str) -> Result<Vec<Record>> {
        Ok(read_json(&self.partition_path(key))?.unwrap_or_default())
    }

    pub fn save_partition(&self, key: &str, records: &[Record]) -> Result<()> {
        write_json_atomic(&self.partition_path(key), &records)
    }

    /// Keys of all partitions on disk, sorted.
    pub fn partition_keys(&self) -> Result<Vec<String>> {
        let entries =
            fs::read_dir(&self.partitions).map_err(|e| StoreError::io(&self.partitions, e))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.partitions, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    // ── Progress ──

    pub fn load_marker(&self) -> Result<Option<ProgressMarker>> {
        read_json(&self.marker_path())
    }

    pub fn save_marker(&self, marker: &ProgressMarker) -> Result<()> {
        write_json_atomic(&self.marker_path(), marker)
    }

    pub fn load_listing_progress(&self) -> Result<Option<ListingProgress>> {
        read_json(&self.root.join(LISTING_PROGRESS_FILE))
    }

    pub fn save_listing_progress(&self, progress: &ListingProgress) -> Result<()> {
        write_json_atomic(&self.root.join(LISTING_PROGRESS_FILE), progress)
    }

    // ── Links ──

    /// The flat judgement list. Missing is an error: nothing can run without it.
    pub fn load_link_index(&self) -> Result<Vec<DocumentItem>> {
        let path = self.link_index_path();
        read_json(&path)?.ok_or_else(|| {
            StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "link index not found"),
            )
        })
    }

    pub fn save_link_index(&self, items: &[DocumentItem]) -> Result<()> {
        write_json_atomic(&self.link_index_path(), &items)
    }

    pub fn load_raw_links(&self) -> Result<RawLinks> {
        Ok(read_json(&self.root.join(RAW_LINKS_FILE))?.unwrap_or_default())
    }

    pub fn save_raw_links(&self, raw: &RawLinks) -> Result<()> {
        write_json_atomic(&self.root.join(RAW_LINKS_FILE), raw)
    }

    pub fn save_filtered_links(&self, filtered: &RawLinks) -> Result<()> {
        write_json_atomic(&self.root.join(FILTERED_LINKS_FILE), filtered)
    }
}

/// Read a JSON document; `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Pretty-print `value` to `<path>.tmp`, fsync, then rename over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(&json).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    debug!("Wrote {} ({} bytes)", path.display(), json.len());
    Ok(())
}
