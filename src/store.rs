//! On-disk store of resolutions.
//!
//! ```text
//! <data_root>/schemas/<md5>                       shared, content-addressed schema bodies
//! <data_root>/collections/<id>/<document md5>     one dumped ResolutionRecord per document
//! ```
//!
//! Record files are read under a shared lock and written under an exclusive
//! one. Collections whose directory has not been modified within the TTL are
//! removed whenever collections are listed.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use percent_encoding::utf8_percent_encode;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, Event};
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncWrite;

use crate::config::StoreConfig;
use crate::error::{ResolutionError, Result};
use crate::http_client::SchemaFetcher;
use crate::lock::{LockedFile, read_locked, write_locked};
use crate::record::{ResolutionRecord, Retrieval, TOKEN, format_time};
use crate::report::{empty, end, leaf, start, xml_error};
use crate::resolver::{ResolverOptions, XmlResolver};
use crate::tar_writer::{FileOwnership, TarWriter};

const SCHEMAS_DIR: &str = "schemas";
const COLLECTIONS_DIR: &str = "collections";
const MANIFEST_NAME: &str = "manifest.xml";

static RECORD_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_record_name_regex() -> &'static Regex {
    RECORD_NAME_REGEX
        .get_or_init(|| Regex::new(r"^[a-f0-9]{32}$").expect("Failed to compile record name regex"))
}

/// A collection id must be one URL-safe path component.
pub fn collection_name_ok(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && utf8_percent_encode(name, TOKEN).to_string() == name
}

/// Whether a create call made the collection or found it already there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Created,
    Existed,
}

impl CollectionStatus {
    /// Status a PUT-style front end answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            CollectionStatus::Created => 201,
            CollectionStatus::Existed => 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverStore {
    schemas_dir: PathBuf,
    collections_dir: PathBuf,
    config: StoreConfig,
}

impl ResolverStore {
    /// Open the store under `config.data_root`, creating its directories as needed.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let schemas_dir = config.data_root.join(SCHEMAS_DIR);
        let collections_dir = config.data_root.join(COLLECTIONS_DIR);

        for (phrase, dir) in [
            ("The schema storage directory", &schemas_dir),
            ("The collection storage directory", &collections_dir),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ResolutionError::Config(format!("{} {} can't be created: {}", phrase, dir.display(), e))
            })?;
            check_directory(phrase, dir).await?;
        }

        Ok(Self {
            schemas_dir,
            collections_dir,
            config: config.clone(),
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.config.data_root
    }

    pub fn schemas_dir(&self) -> &Path {
        &self.schemas_dir
    }

    pub fn collections_dir(&self) -> &Path {
        &self.collections_dir
    }

    /// Resolve a document against this store's schema cache. Nothing is saved.
    pub async fn resolve<F: SchemaFetcher>(
        &self,
        text: &[u8],
        document_uri: &str,
        fetcher: F,
        options: ResolverOptions,
    ) -> Result<ResolutionRecord> {
        XmlResolver::new(text, document_uri, &self.schemas_dir, fetcher, options)?
            .process()
            .await
    }

    /// Sorted collection names, after evicting stale collections.
    pub async fn collections(&self) -> Result<Vec<String>> {
        self.age_out_collections().await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.collections_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && collection_name_ok(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove collections untouched for longer than the TTL; returns their names.
    pub async fn age_out_collections(&self) -> Result<Vec<String>> {
        let ttl = self.config.collection_ttl();
        let now = SystemTime::now();
        let mut evicted = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.collections_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !collection_name_ok(&name) {
                continue;
            }

            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO);
            if age > ttl {
                tokio::fs::remove_dir_all(entry.path()).await?;
                tracing::info!(
                    "Evicted collection {} (unmodified for {} days)",
                    name,
                    age.as_secs() / 86_400
                );
                evicted.push(name);
            }
        }

        Ok(evicted)
    }

    pub async fn collection_exists(&self, id: &str) -> Result<bool> {
        if !collection_name_ok(id) {
            return Ok(false);
        }
        match tokio::fs::metadata(self.collections_dir.join(id)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a collection; creating one that exists is not an error.
    pub async fn create_collection(&self, id: &str) -> Result<CollectionStatus> {
        validate_collection_id(id)?;
        if self.collection_exists(id).await? {
            return Ok(CollectionStatus::Existed);
        }
        tokio::fs::create_dir_all(self.collections_dir.join(id)).await?;
        tracing::info!("Created collection {}", id);
        Ok(CollectionStatus::Created)
    }

    /// Open an existing collection.
    pub async fn collection(&self, id: &str) -> Result<Collection> {
        validate_collection_id(id)?;
        if !self.collection_exists(id).await? {
            return Err(ResolutionError::UnknownCollection(id.to_string()));
        }
        Ok(Collection {
            id: id.to_string(),
            dir: self.collections_dir.join(id),
            schemas_dir: self.schemas_dir.clone(),
            lock_timeout: self.config.lock_timeout(),
        })
    }

    /// Save `record` into collection `id`, creating the collection only if
    /// the store is configured to.
    pub async fn save(&self, record: &ResolutionRecord, id: &str) -> Result<()> {
        validate_collection_id(id)?;
        if self.config.auto_create_collections {
            self.create_collection(id).await?;
        }
        self.collection(id).await?.add(record).await
    }
}

fn validate_collection_id(id: &str) -> Result<()> {
    if collection_name_ok(id) {
        Ok(())
    } else {
        Err(ResolutionError::BadCollectionId(id.to_string()))
    }
}

async fn check_directory(phrase: &str, dir: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(dir).await.map_err(|e| {
        ResolutionError::Config(format!("{} {} is not accessible: {}", phrase, dir.display(), e))
    })?;
    if !metadata.is_dir() {
        return Err(ResolutionError::Config(format!(
            "{} {} isn't a directory",
            phrase,
            dir.display()
        )));
    }
    if metadata.permissions().readonly() {
        return Err(ResolutionError::Config(format!(
            "{} {} isn't writable",
            phrase,
            dir.display()
        )));
    }
    Ok(())
}

/// One named collection of resolution records.
#[derive(Debug, Clone)]
pub struct Collection {
    id: String,
    dir: PathBuf,
    schemas_dir: PathBuf,
    lock_timeout: Duration,
}

impl Collection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Store `record`, replacing any earlier record for the same document bytes.
    pub async fn add(&self, record: &ResolutionRecord) -> Result<()> {
        for schema in record.successes() {
            if let Retrieval::Success {
                digest, local_path, ..
            } = &schema.retrieval
                && !tokio::fs::try_exists(local_path).await?
            {
                return Err(ResolutionError::Internal(format!(
                    "Schema {} ({}) is missing from the cache at {}",
                    schema.location,
                    digest,
                    local_path.display()
                )));
            }
        }

        let path = self.dir.join(&record.document_digest);
        write_locked(&path, record.dump().as_bytes(), self.lock_timeout).await?;
        tracing::info!(
            "Saved {} ({}) to collection {}: {} schemas, {} unresolved namespaces",
            record.document_uri,
            record.document_digest,
            self.id,
            record.schemas.len(),
            record.unresolved_namespaces.len()
        );
        Ok(())
    }

    /// Digests of the documents saved in this collection, sorted.
    pub async fn document_ids(&self) -> Result<Vec<String>> {
        let regex = get_record_name_regex();
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && regex.is_match(name)
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Reload one saved record.
    pub async fn resolution(&self, document_id: &str) -> Result<ResolutionRecord> {
        let source_name = format!("{}/{}", self.id, document_id);
        let bytes = read_locked(&self.dir.join(document_id), self.lock_timeout).await?;
        let text = String::from_utf8(bytes).map_err(|e| ResolutionError::CorruptRecord {
            source_name: source_name.clone(),
            details: e.to_string(),
        })?;
        ResolutionRecord::load(&text, &source_name, &self.schemas_dir)
    }

    pub async fn resolutions(&self) -> Result<Vec<ResolutionRecord>> {
        let mut resolutions = Vec::new();
        for id in self.document_ids().await? {
            resolutions.push(self.resolution(&id).await?);
        }
        Ok(resolutions)
    }

    pub async fn manifest(&self) -> Result<String> {
        let resolutions = self.resolutions().await?;
        self.render_manifest(&resolutions)
    }

    /// Manifest XML listing every resolution's schemas by outcome.
    pub fn render_manifest(&self, resolutions: &[ResolutionRecord]) -> Result<String> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;

        start(&mut w, "resolutions", &[("collection", self.id.as_str())])?;
        for res in resolutions {
            let time = format_time(&res.resolved_at);
            start(
                &mut w,
                "resolution",
                &[
                    ("name", res.document_uri.as_str()),
                    ("id", res.document_digest.as_str()),
                    ("time", time.as_str()),
                ],
            )?;

            for schema in res.successes() {
                if let Retrieval::Success {
                    digest,
                    last_modified,
                    ..
                } = &schema.retrieval
                {
                    let last_modified = format_time(last_modified);
                    empty(
                        &mut w,
                        "schema",
                        &[
                            ("status", "success"),
                            ("location", schema.location.as_str()),
                            ("namespace", schema.namespace.as_str()),
                            ("md5", digest.as_str()),
                            ("last_modified", last_modified.as_str()),
                        ],
                    )?;
                }
            }
            for schema in res.failures() {
                empty(
                    &mut w,
                    "schema",
                    &[
                        ("status", "failure"),
                        ("location", schema.location.as_str()),
                        ("namespace", schema.namespace.as_str()),
                        ("message", schema.error_message().unwrap_or_default()),
                    ],
                )?;
            }
            for schema in res.redirects() {
                empty(
                    &mut w,
                    "schema",
                    &[
                        ("status", "redirect"),
                        ("location", schema.location.as_str()),
                        ("namespace", schema.namespace.as_str()),
                        ("actual", schema.redirected_location().unwrap_or_default()),
                    ],
                )?;
            }
            for namespace in &res.unresolved_namespaces {
                empty(
                    &mut w,
                    "schema",
                    &[("status", "unresolved"), ("namespace", namespace.as_str())],
                )?;
            }
            if !res.errors.is_empty() {
                start(&mut w, "errors", &[])?;
                for error in &res.errors {
                    leaf(&mut w, "error", error)?;
                }
                end(&mut w, "errors")?;
            }

            end(&mut w, "resolution")?;
        }
        end(&mut w, "resolutions")?;

        let mut xml = String::from_utf8(w.into_inner()).map_err(xml_error)?;
        xml.push('\n');
        Ok(xml)
    }

    /// Stream a tar of the manifest plus every distinct successfully
    /// retrieved schema, named `<id>/<location>`, sorted by location.
    pub async fn tar<W: AsyncWrite + Unpin>(&self, writer: W, ownership: &FileOwnership) -> Result<W> {
        let resolutions = self.resolutions().await?;

        let manifest = tempfile::Builder::new()
            .prefix(&format!("manifest-{}-", self.id))
            .suffix(".xml")
            .tempfile()?;
        tokio::fs::write(manifest.path(), self.render_manifest(&resolutions)?).await?;
        std::fs::set_permissions(manifest.path(), std::fs::Permissions::from_mode(0o644))?;

        let mut schemas: BTreeMap<&str, &Path> = BTreeMap::new();
        for res in &resolutions {
            for schema in res.successes() {
                if let Some(path) = schema.local_path() {
                    schemas.entry(schema.location.as_str()).or_insert(path);
                }
            }
        }

        let mut tar = TarWriter::new(writer, ownership.clone());
        tar.write(manifest.path(), &format!("{}/{}", self.id, MANIFEST_NAME))
            .await?;
        for (location, path) in schemas {
            let _guard = LockedFile::shared(path, self.lock_timeout).await?;
            tar.write(path, &format!("{}/{}", self.id, location)).await?;
        }
        Ok(tar.close().await?)
    }
}
