//! Streaming discovery of namespaces and schema locations.
//!
//! One pass over a document records every namespace used by an element or
//! attribute and every candidate schema location: `xsi:schemaLocation`
//! pairs and, for schema documents, `xs:import` and `xs:include` targets.
//! Only locations whose namespace is actually used are reported.

use std::collections::BTreeSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{QName, ResolveResult};
use quick_xml::reader::NsReader;
use reqwest::Url;

use crate::error::{ResolutionError, Result};

pub const XML_SCHEMA_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XML_SCHEMA_INSTANCE_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Insertion-ordered `location -> namespace` map.
///
/// Discovery order is fetch order, so this is a list rather than a hash map.
/// Re-inserting a location replaces its namespace but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceLocations {
    entries: Vec<(String, String)>,
}

impl NamespaceLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, namespace: impl Into<String>) {
        let location = location.into();
        let namespace = namespace.into();
        match self.entries.iter_mut().find(|(loc, _)| *loc == location) {
            Some(entry) => entry.1 = namespace,
            None => self.entries.push((location, namespace)),
        }
    }

    pub fn get(&self, location: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(loc, _)| loc == location)
            .map(|(_, ns)| ns.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(loc, ns)| (loc.as_str(), ns.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>, N: Into<String>> FromIterator<(L, N)> for NamespaceLocations {
    fn from_iter<I: IntoIterator<Item = (L, N)>>(iter: I) -> Self {
        let mut locations = Self::new();
        for (location, namespace) in iter {
            locations.insert(location, namespace);
        }
        locations
    }
}

/// What one pass over a document found.
#[derive(Debug, Clone, Default)]
pub struct ExtractedNamespaces {
    /// Declared XML version, `1.0` when there is no declaration
    pub version: String,
    /// Every namespace used so far, including those seeded by the caller
    pub used_namespaces: BTreeSet<String>,
    /// Candidate locations whose namespace is in `used_namespaces`
    pub locations: NamespaceLocations,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExtractedNamespaces {
    /// Broken and told us nothing at all.
    pub fn is_hopeless(&self) -> bool {
        !self.errors.is_empty() && self.locations.is_empty() && self.used_namespaces.is_empty()
    }
}

struct Attribute {
    namespace: Option<String>,
    local_name: String,
    value: String,
}

/// SAX-style extractor for instance and schema documents.
pub struct NamespaceExtractor {
    /// Absolute location of the schema being read; `None` for instance documents
    schema_location: Option<Url>,
    target_namespace: Option<String>,
    used: BTreeSet<String>,
    candidates: NamespaceLocations,
    version: String,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl NamespaceExtractor {
    /// Extractor for an instance document.
    pub fn for_instance() -> Self {
        Self::with_state(None, BTreeSet::new())
    }

    /// Extractor for a schema fetched from `location`, extending `used_namespaces`.
    pub fn for_schema(location: &str, used_namespaces: BTreeSet<String>) -> Result<Self> {
        let url = Url::parse(location).map_err(|e| {
            ResolutionError::Internal(format!(
                "Schema location {} must be an absolute URI: {}",
                location, e
            ))
        })?;
        Ok(Self::with_state(Some(url), used_namespaces))
    }

    fn with_state(schema_location: Option<Url>, used: BTreeSet<String>) -> Self {
        Self {
            schema_location,
            target_namespace: None,
            used,
            candidates: NamespaceLocations::new(),
            version: "1.0".to_string(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Run the single streaming pass over `text`.
    ///
    /// Parsing stops at the first fatal error; whatever was seen before it is
    /// still reported, with the error attached.
    pub fn extract(mut self, text: &[u8]) -> ExtractedNamespaces {
        let mut reader = NsReader::from_reader(text);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut saw_element = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Decl(decl)) => match decl.version() {
                    Ok(version) => self.version = String::from_utf8_lossy(&version).into_owned(),
                    Err(e) => self.errors.push(format!("Bad XML declaration: {}", e)),
                },
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    saw_element = true;
                    self.start_element(&reader, &e);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    self.errors
                        .push(format!("{} (at byte {})", e, reader.buffer_position()));
                    break;
                }
            }
            buf.clear();
        }

        if !saw_element && self.errors.is_empty() {
            self.errors.push("Document has no root element".to_string());
        }

        let locations = self
            .candidates
            .iter()
            .filter(|(_, namespace)| self.used.contains(*namespace))
            .collect();

        ExtractedNamespaces {
            version: self.version,
            used_namespaces: self.used,
            locations,
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    fn start_element(&mut self, reader: &NsReader<&[u8]>, element: &BytesStart<'_>) {
        let (resolved, local) = reader.resolver().resolve_element(element.name());
        let element_ns = self.bound_namespace(resolved, element.name());
        if let Some(ns) = &element_ns {
            self.used.insert(ns.clone());
        }

        let mut attributes = Vec::new();
        for attr in element.attributes().with_checks(false) {
            let attr = match attr {
                Ok(attr) => attr,
                Err(e) => {
                    self.errors.push(format!("Bad attribute: {}", e));
                    continue;
                }
            };
            if is_namespace_declaration(attr.key) {
                continue;
            }

            let (resolved, attr_local) = reader.resolver().resolve_attribute(attr.key);
            let namespace = self.bound_namespace(resolved, attr.key);
            if let Some(ns) = &namespace {
                self.used.insert(ns.clone());
            }

            let raw = String::from_utf8_lossy(attr.value.as_ref()).into_owned();
            let value = match quick_xml::escape::unescape(&raw) {
                Ok(unescaped) => unescaped.into_owned(),
                Err(e) => {
                    self.warnings
                        .push(format!("Could not unescape attribute value '{}': {}", raw, e));
                    raw.clone()
                }
            };

            attributes.push(Attribute {
                namespace,
                local_name: String::from_utf8_lossy(attr_local.as_ref()).into_owned(),
                value,
            });
        }

        self.check_for_schema_locations(&attributes);

        if self.schema_location.is_some() && element_ns.as_deref() == Some(XML_SCHEMA_NS) {
            match local.as_ref() {
                b"schema" => self.record_target_namespace(&attributes),
                b"import" => self.record_import(&attributes),
                b"include" => self.record_include(&attributes),
                _ => {}
            }
        }
    }

    fn bound_namespace(&mut self, resolved: ResolveResult<'_>, name: QName<'_>) -> Option<String> {
        match resolved {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                self.errors.push(format!(
                    "Namespace prefix {} on {} is not defined",
                    String::from_utf8_lossy(&prefix),
                    String::from_utf8_lossy(name.as_ref())
                ));
                None
            }
        }
    }

    /// `xsi:schemaLocation` holds whitespace-separated namespace/location pairs.
    fn check_for_schema_locations(&mut self, attributes: &[Attribute]) {
        for attr in attributes {
            if attr.local_name != "schemaLocation"
                || attr.namespace.as_deref() != Some(XML_SCHEMA_INSTANCE_NS)
            {
                continue;
            }
            let tokens: Vec<&str> = attr.value.split_whitespace().collect();
            for pair in tokens.chunks(2) {
                if let [namespace, location] = pair {
                    self.candidates.insert(*location, *namespace);
                }
            }
        }
    }

    fn record_target_namespace(&mut self, attributes: &[Attribute]) {
        for attr in attributes {
            if attr.local_name == "targetNamespace"
                && (attr.namespace.is_none() || attr.namespace.as_deref() == Some(XML_SCHEMA_NS))
            {
                self.target_namespace = Some(attr.value.clone());
            }
        }
    }

    fn record_import(&mut self, attributes: &[Attribute]) {
        let namespace = attributes
            .iter()
            .find(|a| a.local_name == "namespace")
            .map(|a| a.value.clone());
        let location = attributes
            .iter()
            .find(|a| a.local_name == "schemaLocation")
            .map(|a| a.value.clone());

        if let (Some(namespace), Some(location)) = (namespace, location) {
            self.used.insert(namespace.clone());
            if let Some(absolute) = self.absolutize(&location) {
                self.candidates.insert(absolute, namespace);
            }
        }
    }

    /// Included schemas share the including schema's target namespace.
    fn record_include(&mut self, attributes: &[Attribute]) {
        let Some(target) = self.target_namespace.clone() else {
            return;
        };
        for attr in attributes {
            if attr.local_name == "schemaLocation"
                && let Some(absolute) = self.absolutize(&attr.value)
            {
                self.candidates.insert(absolute, target.clone());
            }
        }
    }

    /// Resolve `location` against the schema's own location. Already-absolute
    /// locations are returned verbatim.
    fn absolutize(&mut self, location: &str) -> Option<String> {
        if Url::parse(location).is_ok() {
            return Some(location.to_string());
        }
        let base = self.schema_location.as_ref()?;
        match base.join(location) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                self.warnings.push(format!(
                    "Can't resolve schema location {} against {}: {}",
                    location, base, e
                ));
                None
            }
        }
    }
}

fn is_namespace_declaration(key: QName<'_>) -> bool {
    let key = key.as_ref();
    key == b"xmlns" || key.starts_with(b"xmlns:")
}
