use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::TransportError;
use crate::parser::listing::{self, ListingPage};
use crate::work::EnumerationItem;

const MAX_REDIRECTS: usize = 5;
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Raw HTTP response: status and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Anything that can GET a URL. Network-level failures are errors; HTTP
/// error statuses are ordinary responses.
pub trait Transport {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchResponse, TransportError>> + Send;
}

/// reqwest-backed transport with a browser-like identity.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|e| TransportError::Other(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(FetchResponse { status, body })
    }
}

/// Search URL for one page of a year's Supreme Court judgements.
pub fn listing_url(base_url: &str, item: EnumerationItem) -> String {
    let base = base_url.trim_end_matches('/');
    if item.page == 0 {
        format!(
            "{}/search/?formInput=doctypes:supremecourt%20year:{}",
            base, item.year
        )
    } else {
        format!(
            "{}/search/?formInput=doctypes%3A%20supremecourt%20year%3A%20{}&pagenum={}",
            base, item.year, item.page
        )
    }
}

/// Fetch and parse one listing page. A non-200 status is reported as an error.
pub async fn fetch_listing_page<T: Transport>(
    transport: &T,
    base_url: &str,
    item: EnumerationItem,
) -> Result<ListingPage, TransportError> {
    let url = listing_url(base_url, item);
    info!("Fetching year {}, page {}...", item.year, item.page + 1);

    let response = transport.fetch(&url).await?;
    if !response.is_ok() {
        return Err(TransportError::Status(response.status));
    }
    let page = listing::parse(&response.body, base_url);
    info!("Found {} links", page.links.len());
    Ok(page)
}
