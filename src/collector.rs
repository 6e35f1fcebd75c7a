//! Link discovery: walk the search listing year by year and record every
//! result link, page by page.

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::StoreError;
use crate::fetcher::{self, Transport};
use crate::parser::listing::ListingPage;
use crate::progress::ListingProgress;
use crate::shutdown::ShutdownSignal;
use crate::store::Store;
use crate::work::{self, ListingCursor};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectStats {
    pub pages: usize,
    pub links: usize,
    pub interrupted: bool,
}

/// Collect listing links into the raw link file.
///
/// The position is saved before every page fetch, so an interrupted crawl
/// resumes by refetching at most one page. Pages are keyed by their 1-based
/// number, which makes refetching idempotent.
pub async fn collect_links<T: Transport>(
    transport: &T,
    store: &Store,
    settings: &Settings,
    resume: bool,
    shutdown: &mut ShutdownSignal,
) -> Result<CollectStats, StoreError> {
    let mut raw = store.load_raw_links()?;
    let mut cursor = match store.load_listing_progress()? {
        Some(p) if resume => {
            info!("Resuming from year {}, page {}", p.current_year, p.current_page + 1);
            ListingCursor::starting_at(settings.years(), p.current_year, p.current_page)
        }
        _ => ListingCursor::new(settings.years()),
    };
    let mut stats = CollectStats::default();

    while let Some(item) = cursor.current() {
        if shutdown.is_triggered() {
            stats.interrupted = true;
            break;
        }
        if item.page == 0 {
            info!("=== Starting year {} ===", item.year);
        }

        store.save_listing_progress(&ListingProgress {
            current_year: item.year,
            current_page: item.page,
        })?;

        let page = match fetcher::fetch_listing_page(transport, &settings.base_url, item).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Listing year {} page {} failed: {}", item.year, item.page + 1, e);
                ListingPage::default()
            }
        };

        let has_more = !page.links.is_empty() && page.has_more_content;
        if !page.links.is_empty() {
            stats.pages += 1;
            stats.links += page.links.len();
            raw.entry(item.year)
                .or_default()
                .insert(item.page + 1, page.links);
            store.save_raw_links(&raw)?;
        }
        if !has_more {
            info!("Completed year {}", item.year);
        }

        cursor.advance(has_more);
        if cursor.current().is_some() && shutdown.sleep(settings.listing_delay()).await {
            stats.interrupted = true;
            break;
        }
    }

    // Park the cursor on the next page to fetch, or past the last year.
    let next = cursor.current().map_or(
        ListingProgress {
            current_year: settings.end_year + 1,
            current_page: 0,
        },
        |item| ListingProgress {
            current_year: item.year,
            current_page: item.page,
        },
    );
    store.save_listing_progress(&next)?;

    Ok(stats)
}

/// Turn the raw link file into the filtered per-page file and the flat
/// link index. Returns the number of judgement links.
pub fn build_link_index(store: &Store) -> Result<usize, StoreError> {
    let raw = store.load_raw_links()?;
    let filtered = work::filter_by_page(&raw);
    let items = work::flatten(&raw);

    store.save_filtered_links(&filtered)?;
    store.save_link_index(&items)?;
    info!("Link index: {} judgement links", items.len());
    Ok(items.len())
}
