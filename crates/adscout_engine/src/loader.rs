use std::sync::Arc;
use std::time::Duration;

use adscout_logging::{scout_debug, scout_warn};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::Clock;
use crate::entry_name::resource_id_for_url;
use crate::fetch::Fetcher;
use crate::store::{Properties, ResourceStore, StoreError, StoredResource};
use crate::{FetchError, FetchOutput};

/// Version property holding the response `Content-Type`.
pub const CONTENT_TYPE_PROPERTY: &str = "content-type";
/// Version property holding the URL after redirects.
pub const FINAL_URL_PROPERTY: &str = "final-url";
/// Resource property naming the component that created the resource.
pub const ORIGIN_PROPERTY: &str = "origin";

/// What a single load is allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDownloadRequest {
    pub url: String,
    pub can_load_directly: bool,
    pub can_load_from_cache: bool,
    pub can_store_to_cache: bool,
    /// Cached content older than this is ignored. `None` accepts any age.
    pub max_age_of_cached_content: Option<Duration>,
}

impl UrlDownloadRequest {
    /// Cache first, network otherwise, and keep what was fetched.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            can_load_directly: true,
            can_load_from_cache: true,
            can_store_to_cache: true,
            max_age_of_cached_content: None,
        }
    }

    pub fn direct_only(url: impl Into<String>) -> Self {
        Self {
            can_load_from_cache: false,
            can_store_to_cache: false,
            ..Self::new(url)
        }
    }

    pub fn cache_only(url: impl Into<String>) -> Self {
        Self {
            can_load_directly: false,
            can_store_to_cache: false,
            ..Self::new(url)
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_of_cached_content = Some(max_age);
        self
    }
}

/// Result of a load; records exactly which path served the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDownload {
    pub request: UrlDownloadRequest,
    pub load_time: DateTime<Utc>,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    /// URL the content was served from after redirects.
    pub final_url: String,
    pub is_content_loaded_from_cache: bool,
    pub is_content_stored_to_cache: bool,
}

impl UrlDownload {
    pub fn content_length(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no load strategy available for {url}")]
    NoStrategyAvailable { url: String },
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("cache failure: {0}")]
    Store(#[from] StoreError),
}

/// Serves URLs from the resource store when allowed and fresh, from the
/// network otherwise. Holds no per-call state.
#[derive(Clone)]
pub struct UrlLoader {
    store: Arc<dyn ResourceStore>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl UrlLoader {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub async fn load(&self, request: UrlDownloadRequest) -> Result<UrlDownload, LoadError> {
        if request.can_load_from_cache {
            if let Some(download) = self.load_cached(&request)? {
                return Ok(download);
            }
        }

        if !request.can_load_directly {
            return Err(LoadError::NoStrategyAvailable { url: request.url });
        }

        let output = self.fetcher.fetch(&request.url).await?;
        let is_content_stored_to_cache = if request.can_store_to_cache {
            self.store_version(&request.url, &output)?
        } else {
            false
        };

        Ok(UrlDownload {
            load_time: output.metadata.fetched_at,
            content_type: output.metadata.content_type,
            final_url: output.metadata.final_url,
            content: output.bytes,
            is_content_loaded_from_cache: false,
            is_content_stored_to_cache,
            request,
        })
    }

    fn load_cached(&self, request: &UrlDownloadRequest) -> Result<Option<UrlDownload>, LoadError> {
        let Some(resource) = self.resource_for(&request.url)? else {
            scout_debug!("Cache miss for {}", request.url);
            return Ok(None);
        };
        let Some(version) = resource.newest_version() else {
            scout_debug!("Resource {} has no versions yet", resource.id);
            return Ok(None);
        };

        if let Some(max_age) = request.max_age_of_cached_content {
            let age = self.clock.now() - version.creation_time;
            // A version stamped in the future counts as fresh.
            let too_old = age.to_std().map(|age| age > max_age).unwrap_or(false);
            if too_old {
                scout_debug!(
                    "Cached {} is stale ({}s old)",
                    request.url,
                    age.num_seconds()
                );
                return Ok(None);
            }
        }

        let content = self.store.read_content(&resource, version)?;
        scout_debug!("Cache hit for {} ({} bytes)", request.url, content.len());
        Ok(Some(UrlDownload {
            request: request.clone(),
            load_time: version.creation_time,
            content,
            content_type: version.properties.get(CONTENT_TYPE_PROPERTY).cloned(),
            final_url: version
                .properties
                .get(FINAL_URL_PROPERTY)
                .cloned()
                .unwrap_or_else(|| request.url.clone()),
            is_content_loaded_from_cache: true,
            is_content_stored_to_cache: false,
        }))
    }

    /// Resource cached for `url`, ignoring id collisions with other URLs.
    fn resource_for(&self, url: &str) -> Result<Option<StoredResource>, StoreError> {
        let id = resource_id_for_url(url);
        match self.store.try_get(id)? {
            Some(resource) if resource.url == url => Ok(Some(resource)),
            Some(resource) => {
                scout_warn!(
                    "Resource id {} of {} is taken by {}",
                    id,
                    url,
                    resource.url
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn store_version(&self, url: &str, output: &FetchOutput) -> Result<bool, StoreError> {
        let id = resource_id_for_url(url);
        let resource = match self.resource_for(url)? {
            Some(resource) => resource,
            None if self.store.exists(id) => return Ok(false),
            None => {
                let mut properties = Properties::new();
                properties.insert(ORIGIN_PROPERTY.to_string(), "loader".to_string());
                match self.store.create(id, url, properties) {
                    Ok(resource) => resource,
                    // Another load of the same URL created it first.
                    Err(StoreError::Conflict { .. }) => match self.resource_for(url)? {
                        Some(resource) => resource,
                        None => return Ok(false),
                    },
                    Err(err) => return Err(err),
                }
            }
        };

        let mut properties = Properties::new();
        if let Some(content_type) = &output.metadata.content_type {
            properties.insert(CONTENT_TYPE_PROPERTY.to_string(), content_type.clone());
        }
        properties.insert(
            FINAL_URL_PROPERTY.to_string(),
            output.metadata.final_url.clone(),
        );
        self.store.add_version(
            &resource,
            output.metadata.fetched_at,
            &mut output.bytes.as_slice(),
            properties,
        )?;
        Ok(true)
    }
}
