#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use adscout_core::ScoutRun;
use adscout_engine::{
    AuditError, Clock, FailureKind, FetchError, FetchMetadata, FetchOutput, Fetcher,
    FsResourceStore, LedgerError, ManualClock, RunAudit, ScoutStorage, SelectorRules, UrlLoader,
};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub fn init_logging() {
    adscout_logging::initialize_for_tests();
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

pub fn temp_store() -> (TempDir, Arc<FsResourceStore>) {
    let temp = TempDir::new().unwrap();
    let store = FsResourceStore::open(temp.path().join("cache")).unwrap();
    (temp, Arc::new(store))
}

pub fn rules() -> SelectorRules {
    SelectorRules::new("a.offer", "a.next").unwrap()
}

/// Listing page with one `a.offer` per item and an optional `a.next` link.
pub fn listing_html(items: &[String], next: Option<&str>) -> String {
    let mut html = String::from("<html><head><title>Listing</title></head><body><ul>");
    for item in items {
        html.push_str(&format!(r#"<li><a class="offer" href="{item}">Offer</a></li>"#));
    }
    html.push_str("</ul>");
    if let Some(next) = next {
        html.push_str(&format!(r#"<a class="next" href="{next}">Next</a>"#));
    }
    html.push_str("</body></html>");
    html
}

pub fn offer_urls(site: &str, page: usize, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{site}/offer/{page}-{i}"))
        .collect()
}

enum Page {
    Html(String),
    Redirected { final_url: String, html: String },
    Status(u16),
}

/// In-memory site: serves registered pages and records every fetch.
pub struct PageFetcher {
    clock: Arc<dyn Clock>,
    pages: Mutex<HashMap<String, Page>>,
    hits: Mutex<Vec<(String, DateTime<Utc>)>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl PageFetcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pages: Mutex::new(HashMap::new()),
            hits: Mutex::new(Vec::new()),
            cancel_on: Mutex::new(None),
        }
    }

    pub fn page(&self, url: &str, html: String) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Page::Html(html));
    }

    /// Serves `html` for `url` as if the server had redirected to `final_url`.
    pub fn redirected_page(&self, url: &str, final_url: &str, html: String) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            Page::Redirected {
                final_url: final_url.to_string(),
                html,
            },
        );
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Page::Status(status));
    }

    pub fn cancel_when_fetching(&self, url: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((url.to_string(), token));
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn hit_times(&self) -> Vec<(String, DateTime<Utc>)> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let now = self.clock.now();
        self.hits.lock().unwrap().push((url.to_string(), now));
        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if trigger == url {
                token.cancel();
            }
        }
        let pages = self.pages.lock().unwrap();
        let (final_url, html, redirect_count) = match pages.get(url) {
            Some(Page::Html(html)) => (url, html, 0),
            Some(Page::Redirected { final_url, html }) => (final_url.as_str(), html, 1),
            Some(Page::Status(code)) => {
                return Err(FetchError::new(
                    FailureKind::HttpStatus(*code),
                    format!("status {code}"),
                ))
            }
            None => return Err(FetchError::new(FailureKind::HttpStatus(404), "not found")),
        };
        Ok(FetchOutput {
            bytes: html.as_bytes().to_vec(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: final_url.to_string(),
                redirect_count,
                content_type: Some("text/html; charset=utf-8".to_string()),
                byte_len: html.len() as u64,
                fetched_at: now,
            },
        })
    }
}

/// Dedup collaborator keeping known offer URLs in memory.
pub struct MemoryLedger {
    loader: UrlLoader,
    known: Mutex<HashSet<String>>,
    broken: bool,
}

impl MemoryLedger {
    pub fn new(loader: UrlLoader) -> Self {
        Self {
            loader,
            known: Mutex::new(HashSet::new()),
            broken: false,
        }
    }

    pub fn broken(loader: UrlLoader) -> Self {
        Self {
            broken: true,
            ..Self::new(loader)
        }
    }

    pub fn remember(&self, urls: &[String]) {
        self.known.lock().unwrap().extend(urls.iter().cloned());
    }

    pub fn known_count(&self) -> usize {
        self.known.lock().unwrap().len()
    }
}

impl ScoutStorage for MemoryLedger {
    fn loader(&self) -> &UrlLoader {
        &self.loader
    }

    fn register_offer_url(&self, url: &str) -> Result<bool, LedgerError> {
        if self.broken {
            return Err(LedgerError {
                message: "ledger offline".to_string(),
            });
        }
        Ok(self.known.lock().unwrap().insert(url.to_string()))
    }
}

/// Run audit that keeps every run and can stop the scheduler after N records.
#[derive(Default)]
pub struct MemoryAudit {
    seeded: Mutex<HashMap<String, ScoutRun>>,
    runs: Mutex<Vec<ScoutRun>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MemoryAudit {
    pub fn seed(&self, run: ScoutRun) {
        self.seeded
            .lock()
            .unwrap()
            .insert(run.scout_id.clone(), run);
    }

    pub fn cancel_after(&self, records: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((records, token));
    }

    pub fn runs(&self) -> Vec<ScoutRun> {
        self.runs.lock().unwrap().clone()
    }
}

impl RunAudit for MemoryAudit {
    fn last_run(&self, scout_id: &str) -> Result<Option<ScoutRun>, AuditError> {
        let recorded = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|run| run.scout_id == scout_id)
            .cloned();
        Ok(recorded.or_else(|| self.seeded.lock().unwrap().get(scout_id).cloned()))
    }

    fn record(&self, run: &ScoutRun) -> Result<(), AuditError> {
        let mut runs = self.runs.lock().unwrap();
        runs.push(run.clone());
        if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if runs.len() >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }
}
