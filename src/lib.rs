//! # xml-resolution Library
//!
//! Discovers every XML Schema an instance document depends on, fetches each
//! one once into a content-addressed cache, and keeps per-collection records
//! of what was found so the schemas can be archived next to the documents.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod http_client;
pub mod lock;
pub mod namespaces;
pub mod output;
pub mod record;
pub mod report;
pub mod resolver;
pub mod store;
pub mod tar_writer;

pub use catalog::{CatalogOptions, SchemaCatalog};
pub use cli::{Cli, VerbosityLevel};
pub use config::{Config, ConfigManager};
pub use error::{FetchError, ResolutionError};
pub use http_client::{AsyncHttpClient, HttpClientConfig, HttpResponse, SchemaFetcher};
pub use namespaces::{ExtractedNamespaces, NamespaceExtractor, NamespaceLocations};
pub use output::Output;
pub use record::{ResolutionRecord, Retrieval, RetrievalStatus, SchemaRecord};
pub use report::premis_report;
pub use resolver::{ResolverOptions, XmlResolver, resolve};
pub use store::{Collection, CollectionStatus, ResolverStore, collection_name_ok};
pub use tar_writer::{FileOwnership, TarWriter};
