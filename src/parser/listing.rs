use std::sync::LazyLock;

use scraper::{Html, Selector};

static RESULT_LINKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("article.result a, .result a, .result_title a").unwrap()
});
static RESULTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article.result, .result, .result_title").unwrap());

/// Links found on one search result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub links: Vec<String>,
    /// The page rendered result entries at all; a page without them is past
    /// the last page of the year.
    pub has_more_content: bool,
}

/// Collect result links in document order, made absolute against `base_url`.
pub fn parse(html: &str, base_url: &str) -> ListingPage {
    let document = Html::parse_document(html);

    let links = document
        .select(&RESULT_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(|href| absolutize(href, base_url))
        .collect();

    let has_more_content = document.select(&RESULTS).next().is_some();

    ListingPage {
        links,
        has_more_content,
    }
}

fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    }
}
