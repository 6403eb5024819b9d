//! Recursive schema resolution for one instance document.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::catalog::{CatalogOptions, SchemaCatalog};
use crate::error::{ResolutionError, Result};
use crate::http_client::SchemaFetcher;
use crate::lock::read_locked;
use crate::namespaces::NamespaceExtractor;
use crate::record::{
    ResolutionRecord, RetrievalStatus, SchemaRecord, content_digest, sort_namespaces,
    whole_seconds,
};

/// Ceiling on schema records considered in one resolution.
pub const TOO_MANY_SCHEMAS: usize = 500;

/// Namespaces every schema-aware tool knows without a schema document.
pub const IGNORED_NAMESPACES: [&str; 2] = [
    "http://www.w3.org/2001/XMLSchema-hasFacetAndProperty",
    "http://www.w3.org/2001/XMLSchema-instance",
];

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub max_schemas: usize,
    pub catalog: CatalogOptions,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_schemas: TOO_MANY_SCHEMAS,
            catalog: CatalogOptions::default(),
        }
    }
}

/// Resolves the schemas needed by one document.
///
/// [`XmlResolver::process`] consumes the resolver, so a document is processed
/// at most once; the result is an immutable [`ResolutionRecord`].
pub struct XmlResolver<F> {
    text: Vec<u8>,
    document_uri: String,
    schemas_dir: PathBuf,
    fetcher: F,
    options: ResolverOptions,
}

impl<F: SchemaFetcher> XmlResolver<F> {
    pub fn new(
        text: impl Into<Vec<u8>>,
        document_uri: impl Into<String>,
        schemas_dir: impl Into<PathBuf>,
        fetcher: F,
        options: ResolverOptions,
    ) -> Result<Self> {
        let text = text.into();
        let document_uri = document_uri.into();
        if text.is_empty() {
            return Err(ResolutionError::EmptyDocument { uri: document_uri });
        }

        let schemas_dir = schemas_dir.into();
        if !schemas_dir.is_dir() {
            return Err(ResolutionError::Config(format!(
                "The schemas storage directory {} does not exist",
                schemas_dir.display()
            )));
        }

        Ok(Self {
            text,
            document_uri,
            schemas_dir,
            fetcher,
            options,
        })
    }

    pub fn document_uri(&self) -> &str {
        &self.document_uri
    }

    /// Extract, fetch and recurse until no new schema locations turn up.
    pub async fn process(self) -> Result<ResolutionRecord> {
        let resolved_at = whole_seconds(Utc::now());
        let instance = NamespaceExtractor::for_instance().extract(&self.text);

        if instance.version != "1.0" {
            return Err(ResolutionError::UnsupportedXmlVersion {
                uri: self.document_uri,
                version: instance.version,
            });
        }
        if instance.is_hopeless() {
            return Err(ResolutionError::UnparseableDocument {
                uri: self.document_uri,
                details: instance.errors.join("; "),
            });
        }
        for warning in &instance.warnings {
            tracing::debug!("{}: {}", self.document_uri, warning);
        }

        let mut used_namespaces = instance.used_namespaces;
        let mut catalog = SchemaCatalog::new(
            self.fetcher,
            self.schemas_dir.clone(),
            self.options.catalog.clone(),
        );
        catalog.merge(&instance.locations).await;

        let mut considered = 0;
        while let Some(record) = catalog.next_record() {
            considered += 1;
            if considered > self.options.max_schemas {
                return Err(ResolutionError::TooManySchemas {
                    uri: self.document_uri,
                    count: considered,
                });
            }

            let Some(path) = record.local_path() else {
                continue;
            };
            let body = read_locked(path, self.options.catalog.lock_timeout).await?;
            let schema = NamespaceExtractor::for_schema(&record.location, used_namespaces)?
                .extract(&body);
            for error in &schema.errors {
                tracing::debug!("Schema {}: {}", record.location, error);
            }

            used_namespaces = schema.used_namespaces;
            catalog.merge(&schema.locations).await;
        }

        let schemas = catalog.schemas();
        let unresolved_namespaces = unresolved(&used_namespaces, &schemas);
        for namespace in &unresolved_namespaces {
            tracing::warn!("{}: unresolved namespace {}", self.document_uri, namespace);
        }

        Ok(ResolutionRecord {
            document_digest: content_digest(&self.text),
            size_bytes: self.text.len() as u64,
            document_uri: self.document_uri,
            resolved_at,
            schemas,
            unresolved_namespaces,
            errors: instance.errors,
        })
    }
}

/// Used namespaces no schema accounts for, minus the ones tools know implicitly.
fn unresolved(used_namespaces: &BTreeSet<String>, schemas: &[SchemaRecord]) -> Vec<String> {
    let satisfied: BTreeSet<&str> = schemas
        .iter()
        .filter(|s| s.status() != RetrievalStatus::Failure)
        .map(|s| s.namespace.as_str())
        .collect();

    let mut namespaces: Vec<String> = used_namespaces
        .iter()
        .filter(|ns| !satisfied.contains(ns.as_str()))
        .filter(|ns| !IGNORED_NAMESPACES.contains(&ns.as_str()))
        .cloned()
        .collect();
    sort_namespaces(&mut namespaces);
    namespaces
}

/// Resolve `text` against the shared schema cache in `schemas_dir`.
pub async fn resolve<F: SchemaFetcher>(
    text: &[u8],
    document_uri: &str,
    schemas_dir: &Path,
    fetcher: F,
    options: ResolverOptions,
) -> Result<ResolutionRecord> {
    XmlResolver::new(text, document_uri, schemas_dir, fetcher, options)?
        .process()
        .await
}
