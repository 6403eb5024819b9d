//! Resolution data model and its persisted text form.
//!
//! A [`ResolutionRecord`] is produced either by running the resolver over a
//! document or by loading a previously dumped record from a collection; both
//! paths yield the same value type.
//!
//! The dumped form is one escaped phrase per line:
//!
//! ```text
//! FILE_NAME uri
//! DATE_TIME time
//! DIGEST md5
//! LENGTH bytes
//! SCHEMA md5 last-modified location namespace
//! BROKEN_SCHEMA location namespace error-message
//! REDIRECTED_SCHEMA location namespace redirected-location
//! ERROR message
//! UNRESOLVED_NAMESPACES namespace namespace ...
//! ```

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;

use crate::error::{ResolutionError, Result};

/// Characters left unescaped in record tokens.
pub(crate) const TOKEN: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b';')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b',')
    .remove(b'[')
    .remove(b']');

/// Stand-in for an empty token, which would otherwise disappear on split.
const EMPTY_TOKEN: &str = "\"\"";

/// MD5 hex digest of a byte sequence; the key for documents and cached schemas.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Drop sub-second precision so a timestamp survives a dump/load cycle unchanged.
pub fn whole_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|t| t.with_timezone(&Utc))
}

/// Escape each phrase and join them with single spaces.
pub fn escape_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|token| {
            let token = token.as_ref();
            if token.is_empty() {
                EMPTY_TOKEN.to_string()
            } else {
                utf8_percent_encode(token, TOKEN).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a line on whitespace and unescape each phrase.
pub fn unescape_line(line: &str) -> Vec<String> {
    line.split_whitespace()
        .map(|token| {
            if token == EMPTY_TOKEN {
                String::new()
            } else {
                percent_decode_str(token).decode_utf8_lossy().into_owned()
            }
        })
        .collect()
}

/// Outcome of trying to retrieve one schema location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStatus {
    Success,
    Failure,
    Redirect,
}

impl RetrievalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStatus::Success => "success",
            RetrievalStatus::Failure => "failure",
            RetrievalStatus::Redirect => "redirect",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RetrievalStatus::Success => 0,
            RetrievalStatus::Failure => 1,
            RetrievalStatus::Redirect => 2,
        }
    }
}

/// Status-specific data of a schema record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Retrieval {
    /// The body was fetched and lives in the shared cache under `digest`.
    Success {
        digest: String,
        local_path: PathBuf,
        last_modified: DateTime<Utc>,
    },
    Failure {
        message: String,
    },
    /// The location answered with one or more redirects ending at `redirected_location`.
    Redirect {
        redirected_location: String,
    },
}

/// One entry of a resolution's schema dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaRecord {
    pub location: String,
    pub namespace: String,
    #[serde(flatten)]
    pub retrieval: Retrieval,
}

impl SchemaRecord {
    pub fn success(
        location: impl Into<String>,
        namespace: impl Into<String>,
        digest: impl Into<String>,
        local_path: PathBuf,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            location: location.into(),
            namespace: namespace.into(),
            retrieval: Retrieval::Success {
                digest: digest.into(),
                local_path,
                last_modified: whole_seconds(last_modified),
            },
        }
    }

    pub fn failure(
        location: impl Into<String>,
        namespace: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            namespace: namespace.into(),
            retrieval: Retrieval::Failure {
                message: message.into(),
            },
        }
    }

    pub fn redirect(
        location: impl Into<String>,
        namespace: impl Into<String>,
        redirected_location: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            namespace: namespace.into(),
            retrieval: Retrieval::Redirect {
                redirected_location: redirected_location.into(),
            },
        }
    }

    pub fn status(&self) -> RetrievalStatus {
        match self.retrieval {
            Retrieval::Success { .. } => RetrievalStatus::Success,
            Retrieval::Failure { .. } => RetrievalStatus::Failure,
            Retrieval::Redirect { .. } => RetrievalStatus::Redirect,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.retrieval, Retrieval::Success { .. })
    }

    pub fn digest(&self) -> Option<&str> {
        match &self.retrieval {
            Retrieval::Success { digest, .. } => Some(digest),
            _ => None,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.retrieval {
            Retrieval::Success { local_path, .. } => Some(local_path),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match &self.retrieval {
            Retrieval::Success { last_modified, .. } => Some(*last_modified),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.retrieval {
            Retrieval::Failure { message } => Some(message),
            _ => None,
        }
    }

    pub fn redirected_location(&self) -> Option<&str> {
        match &self.retrieval {
            Retrieval::Redirect {
                redirected_location,
            } => Some(redirected_location),
            _ => None,
        }
    }
}

/// Report ordering: case-insensitive by location, ties by status.
pub fn compare_by_location(a: &SchemaRecord, b: &SchemaRecord) -> Ordering {
    a.location
        .to_lowercase()
        .cmp(&b.location.to_lowercase())
        .then_with(|| a.location.cmp(&b.location))
        .then_with(|| a.status().rank().cmp(&b.status().rank()))
}

/// Sort namespaces case-insensitively, as they are reported.
pub fn sort_namespaces(namespaces: &mut [String]) {
    namespaces.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
}

/// Everything learned about one instance document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionRecord {
    /// MD5 of the raw document bytes; also the record's file name in a collection.
    pub document_digest: String,
    pub document_uri: String,
    pub size_bytes: u64,
    pub resolved_at: DateTime<Utc>,
    /// Location-sorted schema dictionary.
    pub schemas: Vec<SchemaRecord>,
    pub unresolved_namespaces: Vec<String>,
    /// Parse errors found in the instance document itself.
    pub errors: Vec<String>,
}

impl ResolutionRecord {
    pub fn successes(&self) -> impl Iterator<Item = &SchemaRecord> {
        self.with_status(RetrievalStatus::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SchemaRecord> {
        self.with_status(RetrievalStatus::Failure)
    }

    pub fn redirects(&self) -> impl Iterator<Item = &SchemaRecord> {
        self.with_status(RetrievalStatus::Redirect)
    }

    fn with_status(&self, status: RetrievalStatus) -> impl Iterator<Item = &SchemaRecord> {
        self.schemas.iter().filter(move |s| s.status() == status)
    }

    /// Serialize to the line-oriented text stored in a collection.
    pub fn dump(&self) -> String {
        let mut lines = vec![
            escape_tokens(&["FILE_NAME", &self.document_uri]),
            escape_tokens(&["DATE_TIME", &format_time(&self.resolved_at)]),
            escape_tokens(&["DIGEST", &self.document_digest]),
            escape_tokens(&["LENGTH", &self.size_bytes.to_string()]),
        ];

        for schema in &self.schemas {
            if let Retrieval::Success {
                digest,
                last_modified,
                ..
            } = &schema.retrieval
            {
                lines.push(escape_tokens(&[
                    "SCHEMA",
                    digest,
                    &format_time(last_modified),
                    &schema.location,
                    &schema.namespace,
                ]));
            }
        }

        for schema in &self.schemas {
            if let Retrieval::Failure { message } = &schema.retrieval {
                lines.push(escape_tokens(&[
                    "BROKEN_SCHEMA",
                    &schema.location,
                    &schema.namespace,
                    message,
                ]));
            }
        }

        for schema in &self.schemas {
            if let Retrieval::Redirect {
                redirected_location,
            } = &schema.retrieval
            {
                lines.push(escape_tokens(&[
                    "REDIRECTED_SCHEMA",
                    &schema.location,
                    &schema.namespace,
                    redirected_location,
                ]));
            }
        }

        for error in &self.errors {
            lines.push(escape_tokens(&["ERROR", error]));
        }

        let mut unresolved = vec!["UNRESOLVED_NAMESPACES"];
        unresolved.extend(self.unresolved_namespaces.iter().map(String::as_str));
        lines.push(escape_tokens(&unresolved));

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Rebuild a record from [`dump`](Self::dump) output. Cached schema paths
    /// are re-derived from `schemas_dir`; nothing is fetched.
    pub fn load(text: &str, source_name: &str, schemas_dir: &Path) -> Result<Self> {
        let corrupt = |details: String| ResolutionError::CorruptRecord {
            source_name: source_name.to_string(),
            details,
        };

        let mut document_uri = None;
        let mut document_digest = None;
        let mut size_bytes = None;
        let mut resolved_at = None;
        let mut schemas = Vec::new();
        let mut unresolved_namespaces = Vec::new();
        let mut errors = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let mut fields = unescape_line(line).into_iter();
            let Some(keyword) = fields.next() else {
                continue;
            };
            let mut field = |name: &str| {
                fields
                    .next()
                    .ok_or_else(|| corrupt(format!("line {}: {keyword} is missing {name}", number + 1)))
            };

            match keyword.as_str() {
                "FILE_NAME" => document_uri = Some(field("the file name")?),
                "DIGEST" => document_digest = Some(field("the digest")?),
                "LENGTH" => {
                    let length = field("the length")?;
                    size_bytes = Some(length.parse::<u64>().map_err(|e| {
                        corrupt(format!("line {}: bad length {length}: {e}", number + 1))
                    })?);
                }
                "DATE_TIME" => {
                    let time = field("the time")?;
                    resolved_at = Some(parse_time(&time).map_err(|e| {
                        corrupt(format!("line {}: bad time {time}: {e}", number + 1))
                    })?);
                }
                "SCHEMA" => {
                    let digest = field("the digest")?;
                    let modified = field("the last-modified time")?;
                    let location = field("the location")?;
                    let namespace = field("the namespace")?;
                    let last_modified = parse_time(&modified).map_err(|e| {
                        corrupt(format!("line {}: bad time {modified}: {e}", number + 1))
                    })?;
                    let local_path = schemas_dir.join(&digest);
                    schemas.push(SchemaRecord::success(
                        location,
                        namespace,
                        digest,
                        local_path,
                        last_modified,
                    ));
                }
                "BROKEN_SCHEMA" => {
                    let location = field("the location")?;
                    let namespace = field("the namespace")?;
                    let message = fields.collect::<Vec<_>>().join(" ");
                    schemas.push(SchemaRecord::failure(location, namespace, message));
                }
                "REDIRECTED_SCHEMA" => {
                    let location = field("the location")?;
                    let namespace = field("the namespace")?;
                    let redirected = field("the redirected location")?;
                    schemas.push(SchemaRecord::redirect(location, namespace, redirected));
                }
                "ERROR" => errors.push(fields.collect::<Vec<_>>().join(" ")),
                "UNRESOLVED_NAMESPACES" => unresolved_namespaces = fields.collect(),
                _ => {}
            }
        }

        schemas.sort_by(compare_by_location);

        Ok(Self {
            document_uri: document_uri.ok_or_else(|| corrupt("no FILE_NAME line".to_string()))?,
            document_digest: document_digest
                .ok_or_else(|| corrupt("no DIGEST line".to_string()))?,
            size_bytes: size_bytes.ok_or_else(|| corrupt("no LENGTH line".to_string()))?,
            resolved_at: resolved_at.ok_or_else(|| corrupt("no DATE_TIME line".to_string()))?,
            schemas,
            unresolved_namespaces,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> ResolutionRecord {
        let modified = Utc.with_ymd_and_hms(2009, 6, 1, 12, 30, 0).unwrap();
        let mut schemas = vec![
            SchemaRecord::success(
                "http://www.loc.gov/standards/mets/mets.xsd",
                "http://www.loc.gov/METS/",
                "0123456789abcdef0123456789abcdef",
                PathBuf::from("/data/schemas/0123456789abcdef0123456789abcdef"),
                modified,
            ),
            SchemaRecord::failure(
                "http://example.com/missing.xsd",
                "http://example.com/ns",
                "HTTP 404 Not Found for http://example.com/missing.xsd",
            ),
            SchemaRecord::redirect(
                "http://www.loc.gov/mods/v3/mods-3-3.xsd",
                "http://www.loc.gov/mods/v3",
                "http://www.loc.gov/standards/mods/v3/mods-3-3.xsd",
            ),
            SchemaRecord::success(
                "http://www.loc.gov/standards/mods/v3/mods-3-3.xsd",
                "http://www.loc.gov/mods/v3",
                "fedcba9876543210fedcba9876543210",
                PathBuf::from("/data/schemas/fedcba9876543210fedcba9876543210"),
                modified,
            ),
        ];
        schemas.sort_by(compare_by_location);

        ResolutionRecord {
            document_digest: content_digest(b"<doc/>"),
            document_uri: "file://client.example.com/my documents/F2006.xml".to_string(),
            size_bytes: 6,
            resolved_at: Utc.with_ymd_and_hms(2010, 5, 13, 21, 54, 8).unwrap(),
            schemas,
            unresolved_namespaces: vec!["http://www.w3.org/1999/xlink".to_string()],
            errors: vec!["Opening and ending tag mismatch: a line 3 and b".to_string()],
        }
    }

    #[test]
    fn test_content_digest_is_md5() {
        assert_eq!(content_digest(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_digest(b"<schema/>").len(), 32);
    }

    #[test]
    fn test_escape_keeps_tokens_whitespace_free() {
        let line = escape_tokens(&["FILE_NAME", "file://host/my file.xml"]);
        assert_eq!(line, "FILE_NAME file://host/my%20file.xml");
        assert_eq!(
            unescape_line(&line),
            vec!["FILE_NAME".to_string(), "file://host/my file.xml".to_string()]
        );
    }

    #[test]
    fn test_escape_handles_percent_quotes_and_empty_tokens() {
        let line = escape_tokens(&["SCHEMA", "", "50% \"off\"", "\u{e9}t\u{e9}"]);
        assert_eq!(
            unescape_line(&line),
            vec![
                "SCHEMA".to_string(),
                String::new(),
                "50% \"off\"".to_string(),
                "\u{e9}t\u{e9}".to_string()
            ]
        );
    }

    #[test]
    fn test_dump_groups_schemas_by_status() {
        let dump = sample_record().dump();
        let keywords: Vec<&str> = dump
            .lines()
            .map(|l| l.split(' ').next().unwrap())
            .collect();

        assert_eq!(
            keywords,
            vec![
                "FILE_NAME",
                "DATE_TIME",
                "DIGEST",
                "LENGTH",
                "SCHEMA",
                "SCHEMA",
                "BROKEN_SCHEMA",
                "REDIRECTED_SCHEMA",
                "ERROR",
                "UNRESOLVED_NAMESPACES"
            ]
        );
        assert!(dump.contains("DATE_TIME 2010-05-13T21:54:08Z"));
    }

    #[test]
    fn test_load_reproduces_dumped_record() {
        let record = sample_record();
        let reloaded =
            ResolutionRecord::load(&record.dump(), "sample", Path::new("/data/schemas")).unwrap();

        assert_eq!(reloaded, record);
        assert_eq!(reloaded.dump(), record.dump());
    }

    #[test]
    fn test_load_rejects_truncated_schema_line() {
        let text = "FILE_NAME a\nDATE_TIME 2010-05-13T21:54:08Z\nDIGEST d\nLENGTH 1\nSCHEMA abc\n";
        let result = ResolutionRecord::load(text, "broken", Path::new("/tmp"));

        match result {
            Err(ResolutionError::CorruptRecord { source_name, .. }) => {
                assert_eq!(source_name, "broken")
            }
            other => panic!("Expected CorruptRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_load_requires_header_lines() {
        let result = ResolutionRecord::load("UNRESOLVED_NAMESPACES\n", "x", Path::new("/tmp"));
        assert!(result.is_err());
    }

    #[test]
    fn test_record_accessors_follow_status() {
        let record = sample_record();
        assert_eq!(record.successes().count(), 2);
        assert_eq!(record.failures().count(), 1);
        assert_eq!(record.redirects().count(), 1);

        let redirect = record.redirects().next().unwrap();
        assert!(redirect.digest().is_none());
        assert!(redirect.local_path().is_none());
        assert_eq!(
            redirect.redirected_location(),
            Some("http://www.loc.gov/standards/mods/v3/mods-3-3.xsd")
        );
    }

    #[test]
    fn test_namespaces_sort_case_insensitively() {
        let mut namespaces = vec![
            "http://b.example".to_string(),
            "HTTP://A.example".to_string(),
            "http://c.example".to_string(),
        ];
        sort_namespaces(&mut namespaces);
        assert_eq!(namespaces[0], "HTTP://A.example");
        assert_eq!(namespaces[2], "http://c.example");
    }
}
