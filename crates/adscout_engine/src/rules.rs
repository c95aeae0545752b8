use adscout_logging::scout_trace;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("extraction failed on {page_url}: {message}")]
pub struct ExtractionError {
    pub page_url: String,
    pub message: String,
}

impl ExtractionError {
    pub fn new(page_url: &Url, message: impl Into<String>) -> Self {
        Self {
            page_url: page_url.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selector `{selector}`: {message}")]
pub struct RulesError {
    pub selector: String,
    pub message: String,
}

/// Site-specific knowledge a scout needs about one listing page.
///
/// Both functions see the parsed page and the URL it was loaded from and
/// return absolute URLs.
pub trait ListingRules: Send + Sync {
    /// Offer URLs on the page, in document order.
    fn listing_urls(&self, document: &Html, page_url: &Url) -> Result<Vec<Url>, ExtractionError>;

    /// Link to the following page, or `None` on the last one.
    fn next_page_url(&self, document: &Html, page_url: &Url)
        -> Result<Option<Url>, ExtractionError>;
}

/// Rules driven by two CSS selectors matching link elements.
#[derive(Debug, Clone)]
pub struct SelectorRules {
    listing: Selector,
    next_page: Selector,
    attribute: String,
}

impl SelectorRules {
    pub fn new(listing_selector: &str, next_page_selector: &str) -> Result<Self, RulesError> {
        Ok(Self {
            listing: parse_selector(listing_selector)?,
            next_page: parse_selector(next_page_selector)?,
            attribute: "href".to_string(),
        })
    }

    /// Reads links from `attribute` instead of `href` (e.g. `data-href`).
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    fn link_of(&self, element: ElementRef, page_url: &Url) -> Result<Option<Url>, ExtractionError> {
        let Some(raw) = element.value().attr(&self.attribute) else {
            scout_trace!("<{}> without {} on {}", element.value().name(), self.attribute, page_url);
            return Ok(None);
        };
        resolve_link(raw, page_url)
    }
}

impl ListingRules for SelectorRules {
    fn listing_urls(&self, document: &Html, page_url: &Url) -> Result<Vec<Url>, ExtractionError> {
        let mut urls = Vec::new();
        for element in document.select(&self.listing) {
            if let Some(url) = self.link_of(element, page_url)? {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    fn next_page_url(
        &self,
        document: &Html,
        page_url: &Url,
    ) -> Result<Option<Url>, ExtractionError> {
        for element in document.select(&self.next_page) {
            if let Some(url) = self.link_of(element, page_url)? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, RulesError> {
    Selector::parse(selector).map_err(|err| RulesError {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

/// Resolves `reference` against the page URL. Fragment-only, `javascript:`
/// and non-http(s) links resolve to `None`.
pub fn resolve_link(reference: &str, page_url: &Url) -> Result<Option<Url>, ExtractionError> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#') || lower.starts_with("javascript:") {
        return Ok(None);
    }
    let url = page_url
        .join(trimmed)
        .map_err(|err| ExtractionError::new(page_url, format!("bad link `{trimmed}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(Some(url)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://ads.example.pl/mieszkania/?page=2").unwrap()
    }

    #[test]
    fn relative_and_absolute_links_resolve() {
        assert_eq!(
            resolve_link("oferta/1", &page()).unwrap().unwrap().as_str(),
            "https://ads.example.pl/mieszkania/oferta/1"
        );
        assert_eq!(
            resolve_link("/o/2", &page()).unwrap().unwrap().as_str(),
            "https://ads.example.pl/o/2"
        );
        assert_eq!(
            resolve_link("?page=3", &page()).unwrap().unwrap().as_str(),
            "https://ads.example.pl/mieszkania/?page=3"
        );
        assert_eq!(
            resolve_link("https://other.pl/x", &page()).unwrap().unwrap().as_str(),
            "https://other.pl/x"
        );
    }

    #[test]
    fn non_navigational_links_are_ignored() {
        for link in ["", "  ", "#top", "javascript:void(0)", "mailto:a@b.pl"] {
            assert_eq!(resolve_link(link, &page()).unwrap(), None, "{link}");
        }
    }

    #[test]
    fn unparsable_link_is_an_extraction_error() {
        let err = resolve_link("http://[broken", &page()).unwrap_err();
        assert!(err.message.contains("http://[broken"));
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let err = SelectorRules::new("a[", "a.next").unwrap_err();
        assert_eq!(err.selector, "a[");
    }
}
