//! PREMIS event report describing one resolution.

use std::ffi::CStr;
use std::fmt::Display;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;

use crate::error::{ResolutionError, Result};
use crate::record::{ResolutionRecord, format_time};

pub const PREMIS_NS: &str = "info:lc/xmlns/premis-v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Failure,
    Mixed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::Failure => "failure",
            EventOutcome::Mixed => "mixed",
        }
    }
}

/// Redirects count as successes; a resolution with no schemas at all succeeds.
pub fn outcome(record: &ResolutionRecord) -> EventOutcome {
    let failures = record.failures().count();
    let successes = record.schemas.len() - failures;
    match (successes > 0, failures > 0) {
        (true, true) => EventOutcome::Mixed,
        (false, true) => EventOutcome::Failure,
        _ => EventOutcome::Success,
    }
}

/// Identifier of this service as a PREMIS agent.
pub fn agent_uri() -> String {
    format!("info:fcla/daitss/xmlresolution/{}", env!("CARGO_PKG_VERSION"))
}

/// Name of this host, or `localhost` when it can't be determined.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes and gethostname NUL-terminates on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    match CStr::from_bytes_until_nul(&buf) {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => "localhost".to_string(),
    }
}

/// Fresh event identifier for a resolution of `document_digest` on `host`.
pub fn mint_event_id(host: &str, document_digest: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "file://{}/xmlresolution/events/{}-{}",
        host,
        document_digest,
        &suffix[..6]
    )
}

/// PREMIS report with a newly minted event identifier.
pub fn premis_report(record: &ResolutionRecord) -> Result<String> {
    let event_id = mint_event_id(&hostname(), &record.document_digest);
    premis_report_with_event_id(record, &event_id)
}

pub fn premis_report_with_event_id(record: &ResolutionRecord, event_id: &str) -> Result<String> {
    let agent = agent_uri();
    let broken_links: Vec<&str> = record.failures().map(|s| s.location.as_str()).collect();

    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    start(
        &mut w,
        "premis",
        &[
            ("xmlns", PREMIS_NS),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            (
                "xsi:schemaLocation",
                "info:lc/xmlns/premis-v2 http://www.loc.gov/standards/premis/premis.xsd",
            ),
            ("version", "2.0"),
        ],
    )?;

    start(&mut w, "object", &[("xsi:type", "file")])?;
    identifier(&mut w, "objectIdentifier", &record.document_uri)?;
    start(&mut w, "objectCharacteristics", &[])?;
    leaf(&mut w, "compositionLevel", "0")?;
    start(&mut w, "fixity", &[])?;
    leaf(&mut w, "messageDigestAlgorithm", "MD5")?;
    leaf(&mut w, "messageDigest", &record.document_digest)?;
    end(&mut w, "fixity")?;
    leaf(&mut w, "size", &record.size_bytes.to_string())?;
    start(&mut w, "format", &[])?;
    start(&mut w, "formatDesignation", &[])?;
    leaf(&mut w, "formatName", "XML")?;
    leaf(&mut w, "formatVersion", "1.0")?;
    end(&mut w, "formatDesignation")?;
    start(&mut w, "formatRegistry", &[])?;
    leaf(&mut w, "formatRegistryName", "http://www.nationalarchives.gov.uk/pronom")?;
    leaf(&mut w, "formatRegistryKey", "fmt/101")?;
    end(&mut w, "formatRegistry")?;
    end(&mut w, "format")?;
    end(&mut w, "objectCharacteristics")?;
    identifier(&mut w, "linkingEventIdentifier", event_id)?;
    end(&mut w, "object")?;

    start(&mut w, "event", &[])?;
    identifier(&mut w, "eventIdentifier", event_id)?;
    leaf(&mut w, "eventType", "XML Resolution")?;
    leaf(&mut w, "eventDateTime", &format_time(&record.resolved_at))?;
    start(&mut w, "eventOutcomeInformation", &[])?;
    leaf(&mut w, "eventOutcome", outcome(record).as_str())?;
    if !broken_links.is_empty() || !record.unresolved_namespaces.is_empty() {
        start(&mut w, "eventOutcomeDetail", &[])?;
        start(&mut w, "eventOutcomeDetailExtension", &[])?;
        for location in &broken_links {
            leaf(&mut w, "broke_link", location)?;
        }
        for namespace in &record.unresolved_namespaces {
            leaf(&mut w, "unresolved_namespace", namespace)?;
        }
        end(&mut w, "eventOutcomeDetailExtension")?;
        end(&mut w, "eventOutcomeDetail")?;
    }
    end(&mut w, "eventOutcomeInformation")?;
    identifier(&mut w, "linkingAgentIdentifier", &agent)?;
    identifier(&mut w, "linkingObjectIdentifier", &record.document_uri)?;
    end(&mut w, "event")?;

    start(&mut w, "agent", &[])?;
    identifier(&mut w, "agentIdentifier", &agent)?;
    leaf(&mut w, "agentName", "XML Resolution Service")?;
    leaf(&mut w, "agentType", "Web Service")?;
    leaf(&mut w, "agentNote", env!("CARGO_PKG_VERSION"))?;
    end(&mut w, "agent")?;

    end(&mut w, "premis")?;

    String::from_utf8(w.into_inner()).map_err(xml_error)
}

/// `<{name}><{name}Type>URI</…><{name}Value>value</…></{name}>`
fn identifier(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    start(w, name, &[])?;
    leaf(w, &format!("{}Type", name), "URI")?;
    leaf(w, &format!("{}Value", name), value)?;
    end(w, name)
}

pub(crate) fn xml_error(e: impl Display) -> ResolutionError {
    ResolutionError::Xml(e.to_string())
}

pub(crate) fn start(w: &mut Writer<Vec<u8>>, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
    let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
    w.write_event(Event::Start(element)).map_err(xml_error)
}

pub(crate) fn empty(w: &mut Writer<Vec<u8>>, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
    let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
    w.write_event(Event::Empty(element)).map_err(xml_error)
}

pub(crate) fn end(w: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

pub(crate) fn leaf(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    start(w, name, &[])?;
    w.write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    end(w, name)
}
