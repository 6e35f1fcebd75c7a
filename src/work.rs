use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static DOC_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/doc/(\d+)/").unwrap());

/// Listing links as discovered: year → 1-based page number → links on that page.
pub type RawLinks = BTreeMap<i32, BTreeMap<u32, Vec<String>>>;

/// One listing page to scan for judgement links. `page` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerationItem {
    pub year: i32,
    pub page: u32,
}

/// One judgement to fetch, as stored in the flat link index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentItem {
    pub year: i32,
    pub page: u32,
    pub link: String,
    #[serde(rename = "docId")]
    pub doc_id: String,
}

/// Walks listing pages year by year. The number of pages per year is only
/// known once a page comes back empty, so the caller drives it with
/// [`ListingCursor::advance`].
#[derive(Debug, Clone)]
pub struct ListingCursor {
    end_year: i32,
    current: Option<EnumerationItem>,
}

impl ListingCursor {
    pub fn new(years: RangeInclusive<i32>) -> Self {
        let start = *years.start();
        Self::starting_at(years, start, 0)
    }

    /// Rebuild a cursor positioned at `(year, page)`.
    pub fn starting_at(years: RangeInclusive<i32>, year: i32, page: u32) -> Self {
        let current = if years.is_empty() || year > *years.end() {
            None
        } else {
            Some(EnumerationItem {
                year: year.max(*years.start()),
                page: if year < *years.start() { 0 } else { page },
            })
        };
        Self {
            end_year: *years.end(),
            current,
        }
    }

    pub fn current(&self) -> Option<EnumerationItem> {
        self.current
    }

    /// Move to the next page if the current one had results, otherwise to
    /// page 0 of the next year.
    pub fn advance(&mut self, has_more: bool) {
        self.current = match self.current {
            Some(item) if has_more => Some(EnumerationItem {
                year: item.year,
                page: item.page + 1,
            }),
            Some(item) if item.year < self.end_year => Some(EnumerationItem {
                year: item.year + 1,
                page: 0,
            }),
            _ => None,
        };
    }
}

/// Extract the numeric document id from a judgement link.
/// Fragment links (`/docfragment/`) are not judgements.
pub fn doc_id(link: &str) -> Option<&str> {
    if !link.contains("/doc/") || link.contains("/docfragment/") {
        return None;
    }
    DOC_ID_RE.captures(link)?.get(1).map(|m| m.as_str())
}

/// Flatten raw listing links into the ordered judgement list.
/// Years ascend, pages ascend, links keep their on-page order.
pub fn flatten(raw: &RawLinks) -> Vec<DocumentItem> {
    let mut items = Vec::new();
    for (&year, pages) in raw {
        for (&page, links) in pages {
            for link in links {
                if let Some(id) = doc_id(link) {
                    items.push(DocumentItem {
                        year,
                        page,
                        link: link.clone(),
                        doc_id: id.to_string(),
                    });
                }
            }
        }
    }
    items
}

/// Same shape as the input, keeping only judgement links and dropping pages
/// left empty. Years with no surviving pages stay as empty maps.
pub fn filter_by_page(raw: &RawLinks) -> RawLinks {
    raw.iter()
        .map(|(&year, pages)| {
            let kept = pages
                .iter()
                .filter_map(|(&page, links)| {
                    let links: Vec<String> = links
                        .iter()
                        .filter(|l| doc_id(l).is_some())
                        .cloned()
                        .collect();
                    (!links.is_empty()).then_some((page, links))
                })
                .collect();
            (year, kept)
        })
        .collect()
}
