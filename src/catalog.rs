//! Schema catalog: fetches schema locations and remembers what happened.
//!
//! Records are appended in discovery order and handed out FIFO through
//! [`SchemaCatalog::next_record`], so a caller can keep merging newly found
//! locations while it walks the list. A location is dispatched at most once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};

use crate::error::{FetchError, FetchResult};
use crate::http_client::SchemaFetcher;
use crate::lock::{LOCK_TIMEOUT, LockedFile};
use crate::namespaces::NamespaceLocations;
use crate::record::{SchemaRecord, compare_by_location, content_digest, whole_seconds};

/// Redirects followed before a location is given up on.
pub const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub max_redirects: usize,
    pub lock_timeout: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            max_redirects: MAX_REDIRECTS,
            lock_timeout: LOCK_TIMEOUT,
        }
    }
}

struct Fetched {
    final_location: String,
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

enum Retrieved {
    Fetched(Fetched),
    /// A redirect landed on a location this catalog already dispatched.
    AlreadyDispatched(String),
}

pub struct SchemaCatalog<F> {
    fetcher: F,
    cache_dir: PathBuf,
    options: CatalogOptions,
    records: Vec<SchemaRecord>,
    processed: HashSet<String>,
    cursor: usize,
}

impl<F: SchemaFetcher> SchemaCatalog<F> {
    /// An empty catalog storing bodies under `cache_dir`, which must exist.
    pub fn new(fetcher: F, cache_dir: impl Into<PathBuf>, options: CatalogOptions) -> Self {
        Self {
            fetcher,
            cache_dir: cache_dir.into(),
            options,
            records: Vec::new(),
            processed: HashSet::new(),
            cursor: 0,
        }
    }

    /// Fetch every location not yet processed and append its record.
    ///
    /// When redirects moved a location, the success is recorded under the
    /// final location and a `Redirect` record is appended for the original.
    /// A redirect onto a location already dispatched only adds the `Redirect`.
    pub async fn merge(&mut self, locations: &NamespaceLocations) {
        for (location, namespace) in locations.iter() {
            if self.processed.contains(location) {
                continue;
            }
            self.processed.insert(location.to_string());

            let record = match self.retrieve(location).await {
                Ok(Retrieved::AlreadyDispatched(target)) => {
                    tracing::debug!("{} redirected to known location {}", location, target);
                    self.records
                        .push(SchemaRecord::redirect(location, namespace, target));
                    continue;
                }
                Ok(Retrieved::Fetched(fetched)) => {
                    let digest = content_digest(&fetched.body);
                    SchemaRecord::success(
                        fetched.final_location,
                        namespace,
                        digest.clone(),
                        self.cache_dir.join(&digest),
                        fetched.last_modified,
                    )
                }
                Err(e) => {
                    tracing::warn!("Schema {} not retrieved: {}", location, e);
                    SchemaRecord::failure(location, namespace, e.to_string())
                }
            };

            let final_location = record.location.clone();
            self.processed.insert(final_location.clone());
            self.records.push(record);

            if final_location != location {
                tracing::debug!("{} redirected to {}", location, final_location);
                self.records
                    .push(SchemaRecord::redirect(location, namespace, final_location));
            }
        }
    }

    /// Next record not yet handed out, in append order.
    pub fn next_record(&mut self) -> Option<SchemaRecord> {
        let record = self.records.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(record)
    }

    /// Records in append order.
    pub fn records(&self) -> &[SchemaRecord] {
        &self.records
    }

    /// Stable snapshot sorted by location.
    pub fn schemas(&self) -> Vec<SchemaRecord> {
        let mut schemas = self.records.clone();
        schemas.sort_by(compare_by_location);
        schemas
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn retrieve(&self, location: &str) -> FetchResult<Retrieved> {
        let fetched = match self.fetch(location).await? {
            Retrieved::Fetched(fetched) => fetched,
            known => return Ok(known),
        };
        let digest = content_digest(&fetched.body);
        let path = self.cache_dir.join(&digest);

        let cached = self
            .is_cached(&path, fetched.last_modified, &digest)
            .await
            .map_err(|e| cache_error(location, e))?;
        if !cached {
            LockedFile::exclusive(&path, self.options.lock_timeout)
                .await
                .map_err(|e| cache_error(location, e))?
                .replace_contents(&fetched.body, Some(SystemTime::from(fetched.last_modified)))
                .await
                .map_err(|e| cache_error(location, e))?;
            tracing::debug!("Cached {} as {}", fetched.final_location, digest);
        }

        Ok(Retrieved::Fetched(fetched))
    }

    /// GET `location`, following redirects; only `http` locations are allowed at every hop.
    ///
    /// Stops without a request when a hop reaches a location dispatched earlier.
    async fn fetch(&self, location: &str) -> FetchResult<Retrieved> {
        let mut current = location.to_string();
        let mut redirects = 0;

        loop {
            let url = parse_http_location(&current)?;
            let response = self.fetcher.get(url.as_str()).await?;

            if response.is_success() {
                let last_modified = response
                    .last_modified
                    .as_deref()
                    .and_then(|text| DateTime::parse_from_rfc2822(text).ok())
                    .map(|time| time.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                return Ok(Retrieved::Fetched(Fetched {
                    final_location: current,
                    body: response.body,
                    last_modified: whole_seconds(last_modified),
                }));
            }

            if !response.is_redirect() {
                let reason = StatusCode::from_u16(response.status)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or("Unknown Status");
                return Err(FetchError::HttpStatus {
                    location: current,
                    status: response.status,
                    reason: reason.to_string(),
                });
            }

            if redirects >= self.options.max_redirects {
                return Err(FetchError::TooManyRedirects {
                    location: location.to_string(),
                });
            }
            redirects += 1;

            let target = response
                .location
                .ok_or_else(|| FetchError::MissingRedirectTarget {
                    location: current.clone(),
                })?;
            current = url
                .join(&target)
                .map_err(|e| FetchError::InvalidLocation {
                    location: target.clone(),
                    details: e.to_string(),
                })?
                .to_string();
            if current != location && self.processed.contains(&current) {
                return Ok(Retrieved::AlreadyDispatched(current));
            }
        }
    }

    /// True when `path` already holds this body with this modification time.
    async fn is_cached(
        &self,
        path: &Path,
        last_modified: DateTime<Utc>,
        digest: &str,
    ) -> crate::error::Result<bool> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(false);
        }
        let locked = LockedFile::shared(path, self.options.lock_timeout).await?;
        let modified = tokio::fs::metadata(path).await?.modified()?;
        if modified != SystemTime::from(last_modified) {
            return Ok(false);
        }
        let contents = locked.read_to_end().await?;
        Ok(content_digest(&contents) == digest)
    }
}

fn parse_http_location(location: &str) -> FetchResult<Url> {
    let url = Url::parse(location).map_err(|e| FetchError::InvalidLocation {
        location: location.to_string(),
        details: e.to_string(),
    })?;
    if url.scheme() != "http" {
        return Err(FetchError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
            location: location.to_string(),
        });
    }
    Ok(url)
}

fn cache_error(location: &str, error: crate::error::ResolutionError) -> FetchError {
    FetchError::Cache {
        location: location.to_string(),
        details: error.to_string(),
    }
}
