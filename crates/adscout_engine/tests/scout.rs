mod common;

use std::sync::Arc;
use std::time::Duration;

use adscout_engine::{
    ExtractionError, ListingRules, PageLoadPolicy, Scout, ScoutError, ScoutFinish, ScoutStorage,
    UrlLoader,
};
use common::{
    init_logging, listing_html, manual_clock, offer_urls, rules, temp_store, MemoryLedger,
    PageFetcher,
};
use pretty_assertions::assert_eq;
use scraper::Html;
use url::Url;

const SITE: &str = "https://ads.example.pl";

struct Site {
    _temp: tempfile::TempDir,
    fetcher: Arc<PageFetcher>,
    ledger: MemoryLedger,
}

fn site() -> Site {
    init_logging();
    let (temp, store) = temp_store();
    let clock = manual_clock();
    let fetcher = Arc::new(PageFetcher::new(clock.clone()));
    let loader = UrlLoader::new(store, fetcher.clone(), clock);
    Site {
        _temp: temp,
        fetcher,
        ledger: MemoryLedger::new(loader),
    }
}

fn page_url(n: usize) -> String {
    format!("{SITE}/lista?page={n}")
}

/// Serves pages 1..=counts.len(), each linking to the next.
fn serve_listing(fetcher: &PageFetcher, counts: &[usize]) -> Vec<String> {
    let mut all = Vec::new();
    for (i, count) in counts.iter().enumerate() {
        let n = i + 1;
        let items = offer_urls(SITE, n, *count);
        all.extend(items.iter().cloned());
        let next = (n < counts.len()).then(|| format!("?page={}", n + 1));
        fetcher.page(&page_url(n), listing_html(&items, next.as_deref()));
    }
    all
}

fn collecting(seen: &mut Vec<String>) -> impl FnMut(&str, &dyn ScoutStorage) -> bool + Send + '_ {
    move |url, _| {
        seen.push(url.to_string());
        true
    }
}

#[tokio::test]
async fn walks_all_pages_in_order() {
    let site = site();
    let expected = serve_listing(&site.fetcher, &[5, 5, 2]);
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut seen = Vec::new();
    let summary = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();

    assert_eq!(seen, expected);
    assert_eq!(summary.pages_visited, 3);
    assert_eq!(summary.urls_offered, 12);
    assert_eq!(summary.finish, ScoutFinish::Exhausted);
    assert_eq!(
        site.fetcher.hits(),
        vec![page_url(1), page_url(2), page_url(3)]
    );
}

#[tokio::test]
async fn rejecting_acceptor_stops_the_walk_at_once() {
    let site = site();
    serve_listing(&site.fetcher, &[5, 5, 2]);
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut offered = 0;
    let mut acceptor = |_: &str, _: &dyn ScoutStorage| {
        offered += 1;
        offered < 3
    };
    let summary = scout.scout(&site.ledger, &mut acceptor).await.unwrap();

    assert_eq!(offered, 3);
    assert_eq!(summary.urls_offered, 3);
    assert_eq!(summary.finish, ScoutFinish::Halted);
    assert_eq!(site.fetcher.hits(), vec![page_url(1)]);
}

#[tokio::test]
async fn empty_page_still_follows_the_next_link() {
    let site = site();
    let expected = serve_listing(&site.fetcher, &[0, 3]);
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut seen = Vec::new();
    let summary = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();
    assert_eq!(seen, expected);
    assert_eq!(summary.pages_visited, 2);
}

#[tokio::test]
async fn acceptor_can_use_the_storage() {
    let site = site();
    let expected = serve_listing(&site.fetcher, &[4]);
    site.ledger.remember(&expected[..2]);
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut new_urls = Vec::new();
    let mut acceptor = |url: &str, storage: &dyn ScoutStorage| {
        if storage.register_offer_url(url).unwrap() {
            new_urls.push(url.to_string());
        }
        true
    };
    scout.scout(&site.ledger, &mut acceptor).await.unwrap();

    assert_eq!(new_urls, expected[2..].to_vec());
    assert_eq!(site.ledger.known_count(), 4);
}

#[tokio::test]
async fn page_load_failure_ends_the_walk_with_an_error() {
    let site = site();
    serve_listing(&site.fetcher, &[2, 2]);
    site.fetcher.fail(&page_url(2), 500);
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut seen = Vec::new();
    let err = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap_err();

    assert_eq!(seen.len(), 2);
    match err {
        ScoutError::Load { page_url: failed, .. } => assert_eq!(failed, page_url(2)),
        other => panic!("unexpected error {other:?}"),
    }
}

struct BrokenNextLink;

impl ListingRules for BrokenNextLink {
    fn listing_urls(&self, _: &Html, page_url: &Url) -> Result<Vec<Url>, ExtractionError> {
        Ok(vec![page_url.join("/offer/only").unwrap()])
    }

    fn next_page_url(&self, _: &Html, page_url: &Url) -> Result<Option<Url>, ExtractionError> {
        Err(ExtractionError::new(page_url, "pager markup changed"))
    }
}

#[tokio::test]
async fn extraction_error_is_reported_after_the_page_urls() {
    let site = site();
    site.fetcher.page(&page_url(1), "<html></html>".to_string());
    let scout = Scout::new(&page_url(1), BrokenNextLink).unwrap();

    let mut seen = Vec::new();
    let err = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap_err();

    assert_eq!(seen, vec![format!("{SITE}/offer/only")]);
    match err {
        ScoutError::Extraction(e) => assert_eq!(e.message, "pager markup changed"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn pagination_loop_ends_the_walk() {
    let site = site();
    let items = offer_urls(SITE, 1, 1);
    site.fetcher
        .page(&page_url(1), listing_html(&items, Some("?page=2")));
    site.fetcher
        .page(&page_url(2), listing_html(&offer_urls(SITE, 2, 1), Some("?page=1")));
    let scout = Scout::new(&page_url(1), rules()).unwrap();

    let mut seen = Vec::new();
    let summary = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();
    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.finish, ScoutFinish::Exhausted);
    assert_eq!(site.fetcher.hits().len(), 2);
}

#[tokio::test]
async fn max_pages_caps_the_walk() {
    let site = site();
    serve_listing(&site.fetcher, &[1, 1, 1, 1]);
    let scout = Scout::new(&page_url(1), rules())
        .unwrap()
        .with_max_pages(2);

    let mut seen = Vec::new();
    let summary = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();
    assert_eq!(summary.pages_visited, 2);
    assert_eq!(seen.len(), 2);
    assert_eq!(summary.finish, ScoutFinish::Exhausted);
}

#[tokio::test]
async fn cached_pages_are_reused_within_max_age() {
    let site = site();
    serve_listing(&site.fetcher, &[2]);
    let scout = Scout::new(&page_url(1), rules())
        .unwrap()
        .with_policy(PageLoadPolicy {
            cache_max_age: Some(Duration::from_secs(600)),
            store_to_cache: true,
        });

    let mut seen = Vec::new();
    scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();
    scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();

    assert_eq!(seen.len(), 4);
    assert_eq!(site.fetcher.hits().len(), 1);
}

#[test]
fn invalid_start_url_is_rejected() {
    let err = Scout::new("not a url", rules()).err().unwrap();
    assert!(matches!(err, ScoutError::InvalidUrl { .. }));
}

#[tokio::test]
async fn links_resolve_against_the_redirected_page_url() {
    let site = site();
    let requested = format!("{SITE}/mieszkania");
    let landed = format!("{SITE}/mieszkania/");
    site.fetcher.redirected_page(
        &requested,
        &landed,
        listing_html(&["oferta/1".to_string()], Some("?page=2")),
    );
    site.fetcher.page(
        &format!("{landed}?page=2"),
        listing_html(&["oferta/2".to_string()], Some("/mieszkania/")),
    );
    let scout = Scout::new(&requested, rules()).unwrap();

    let mut seen = Vec::new();
    let summary = scout
        .scout(&site.ledger, &mut collecting(&mut seen))
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![
            format!("{SITE}/mieszkania/oferta/1"),
            format!("{SITE}/mieszkania/oferta/2"),
        ]
    );
    // The link back to the landing page counts as already visited.
    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.finish, ScoutFinish::Exhausted);
}

#[tokio::test]
async fn cached_pages_keep_their_redirected_url() {
    let site = site();
    let requested = format!("{SITE}/domy");
    site.fetcher.redirected_page(
        &requested,
        &format!("{SITE}/domy/"),
        listing_html(&["oferta/7".to_string()], None),
    );
    let scout = Scout::new(&requested, rules())
        .unwrap()
        .with_policy(PageLoadPolicy {
            cache_max_age: Some(Duration::from_secs(600)),
            store_to_cache: true,
        });

    let mut seen = Vec::new();
    for _ in 0..2 {
        scout
            .scout(&site.ledger, &mut collecting(&mut seen))
            .await
            .unwrap();
    }

    assert_eq!(site.fetcher.hits().len(), 1);
    assert_eq!(
        seen,
        vec![format!("{SITE}/domy/oferta/7"), format!("{SITE}/domy/oferta/7")]
    );
}
