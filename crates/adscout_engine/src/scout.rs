use std::collections::HashSet;
use std::time::Duration;

use adscout_logging::{scout_debug, scout_info, scout_warn};
use scraper::Html;
use thiserror::Error;
use url::Url;

use crate::decode::decode_page;
use crate::loader::{LoadError, UrlDownload, UrlDownloadRequest, UrlLoader};
use crate::rules::{ExtractionError, ListingRules};

/// Failure of the collaborator that remembers known offer URLs.
#[derive(Debug, Error)]
#[error("offer ledger failure: {message}")]
pub struct LedgerError {
    pub message: String,
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Handle the scouting side of the system hands to scouts and acceptors.
pub trait ScoutStorage: Send + Sync {
    fn loader(&self) -> &UrlLoader;

    /// Remembers `url`; `Ok(false)` means it was already known.
    fn register_offer_url(&self, url: &str) -> Result<bool, LedgerError>;
}

/// Caller-supplied predicate; returning `false` stops the walk immediately.
pub type Acceptor<'a> = dyn FnMut(&str, &dyn ScoutStorage) -> bool + Send + 'a;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("failed to load {page_url}: {source}")]
    Load { page_url: String, source: LoadError },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("invalid start url {url}: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoutFinish {
    /// No further page to visit.
    Exhausted,
    /// The acceptor returned `false`.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoutSummary {
    pub pages_visited: usize,
    pub urls_offered: usize,
    pub finish: ScoutFinish,
}

/// How listing pages are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLoadPolicy {
    /// Serve pages from the cache when younger than this; `None` always fetches.
    pub cache_max_age: Option<Duration>,
    pub store_to_cache: bool,
}

impl Default for PageLoadPolicy {
    fn default() -> Self {
        Self {
            cache_max_age: None,
            store_to_cache: true,
        }
    }
}

impl PageLoadPolicy {
    pub fn request(&self, url: &str) -> UrlDownloadRequest {
        UrlDownloadRequest {
            url: url.to_string(),
            can_load_directly: true,
            can_load_from_cache: self.cache_max_age.is_some(),
            can_store_to_cache: self.store_to_cache,
            max_age_of_cached_content: self.cache_max_age,
        }
    }
}

/// Walks one site's paginated listing and surfaces offer URLs in page order.
///
/// The walk always starts from the first page; it cannot be resumed midway.
pub struct Scout {
    start_url: Url,
    rules: Box<dyn ListingRules>,
    policy: PageLoadPolicy,
    max_pages: Option<usize>,
}

impl Scout {
    pub fn new(start_url: &str, rules: impl ListingRules + 'static) -> Result<Self, ScoutError> {
        let parsed = Url::parse(start_url).map_err(|source| ScoutError::InvalidUrl {
            url: start_url.to_string(),
            source,
        })?;
        Ok(Self {
            start_url: parsed,
            rules: Box::new(rules),
            policy: PageLoadPolicy::default(),
            max_pages: None,
        })
    }

    pub fn with_policy(mut self, policy: PageLoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    pub async fn scout(
        &self,
        storage: &dyn ScoutStorage,
        acceptor: &mut Acceptor<'_>,
    ) -> Result<ScoutSummary, ScoutError> {
        let mut summary = ScoutSummary {
            pages_visited: 0,
            urls_offered: 0,
            finish: ScoutFinish::Exhausted,
        };
        let mut visited = HashSet::new();
        let mut page_url = self.start_url.clone();

        loop {
            visited.insert(page_url.to_string());
            let download = storage
                .loader()
                .load(self.policy.request(page_url.as_str()))
                .await
                .map_err(|source| ScoutError::Load {
                    page_url: page_url.to_string(),
                    source,
                })?;
            summary.pages_visited += 1;

            // Relative links resolve against the page's own address after redirects.
            let base_url = match Url::parse(&download.final_url) {
                Ok(final_url) => final_url,
                Err(err) => {
                    scout_warn!(
                        "Ignoring unparsable final url {} of {}: {}",
                        download.final_url,
                        page_url,
                        err
                    );
                    page_url.clone()
                }
            };
            visited.insert(base_url.to_string());

            let (listing, next_page) = self.extract(&base_url, &download);
            let listing = listing?;
            scout_debug!(
                "Page {} of {} lists {} offers{}",
                summary.pages_visited,
                self.start_url,
                listing.len(),
                if download.is_content_loaded_from_cache { " (cached)" } else { "" }
            );

            for url in &listing {
                summary.urls_offered += 1;
                if !acceptor(url.as_str(), storage) {
                    summary.finish = ScoutFinish::Halted;
                    return Ok(summary);
                }
            }

            let Some(next_page) = next_page? else {
                return Ok(summary);
            };
            if visited.contains(next_page.as_str()) {
                scout_warn!("Pagination of {} loops back to {}", self.start_url, next_page);
                return Ok(summary);
            }
            if self.max_pages.is_some_and(|max| summary.pages_visited >= max) {
                scout_info!(
                    "Stopping {} after {} pages",
                    self.start_url,
                    summary.pages_visited
                );
                return Ok(summary);
            }
            page_url = next_page;
        }
    }

    // The parsed document is not `Send`, so it must not live across an await.
    fn extract(
        &self,
        page_url: &Url,
        download: &UrlDownload,
    ) -> (
        Result<Vec<Url>, ExtractionError>,
        Result<Option<Url>, ExtractionError>,
    ) {
        let decoded = decode_page(
            &download.content,
            download.content_type.as_deref(),
            Some(page_url),
        );
        if decoded.had_errors {
            scout_warn!("{} is not valid {}", page_url, decoded.encoding_label);
        }
        let document = Html::parse_document(&decoded.html);
        (
            self.rules.listing_urls(&document, page_url),
            self.rules.next_page_url(&document, page_url),
        )
    }
}
