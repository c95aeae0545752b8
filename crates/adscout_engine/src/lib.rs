//! Adscout engine: resource cache, cache-aware loading, scouting and scheduling.
mod clock;
mod decode;
mod entry_name;
mod fetch;
mod loader;
mod persist;
mod rules;
mod scheduler;
mod scout;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decode::{decode_page, DecodedPage};
pub use entry_name::{
    hashed_component, resource_id_for_url, sanitize_component, version_entry_name, MAX_ENTRY_NAME_LEN,
};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use loader::{
    LoadError, UrlDownload, UrlDownloadRequest, UrlLoader, CONTENT_TYPE_PROPERTY,
    FINAL_URL_PROPERTY, ORIGIN_PROPERTY,
};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use rules::{resolve_link, ExtractionError, ListingRules, RulesError, SelectorRules};
pub use scheduler::{AuditError, RunAudit, SchedulerError, SchedulerSettings, ScoutScheduler};
pub use scout::{
    Acceptor, LedgerError, PageLoadPolicy, Scout, ScoutError, ScoutFinish, ScoutStorage,
    ScoutSummary,
};
pub use store::{
    FsResourceStore, Properties, ResourceId, ResourceStore, StoreError, StoredResource,
    StoredResourceVersion,
};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
