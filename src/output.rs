//! Terminal rendering of resolutions.

use serde::Serialize;

use crate::cli::VerbosityLevel;
use crate::record::{ResolutionRecord, Retrieval};
use crate::report::{EventOutcome, outcome};

/// Output formatter for human-readable results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

/// A record plus its overall outcome, as emitted in JSON mode.
#[derive(Debug, Serialize)]
pub struct ResolutionSummary<'a> {
    pub outcome: EventOutcome,
    #[serde(flatten)]
    pub record: &'a ResolutionRecord,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    /// Formatter that never emits color escapes.
    pub fn plain(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_resolution(&self, record: &ResolutionRecord) -> String {
        let mut output = String::new();
        let outcome = outcome(record);

        if self.verbosity == VerbosityLevel::Quiet && outcome == EventOutcome::Success {
            return output;
        }

        let label = match outcome {
            EventOutcome::Success => self.colorize("✓ RESOLVED", "32"),
            EventOutcome::Mixed => self.colorize("⚠ PARTIAL", "33"),
            EventOutcome::Failure => self.colorize("✗ FAILED", "31"),
        };
        let count = record.schemas.len();
        output.push_str(&format!(
            "{}  {} ({}) - {} schema{}\n",
            label,
            record.document_uri,
            record.document_digest,
            count,
            if count == 1 { "" } else { "s" }
        ));

        for schema in &record.schemas {
            match &schema.retrieval {
                Retrieval::Success { digest, .. } => {
                    if self.verbosity >= VerbosityLevel::Verbose {
                        output.push_str(&format!(
                            "    {} {} [{}]",
                            self.colorize("success ", "32"),
                            schema.location,
                            schema.namespace
                        ));
                        if self.verbosity == VerbosityLevel::Debug {
                            output.push_str(&format!(" md5 {}", digest));
                        }
                        output.push('\n');
                    }
                }
                Retrieval::Redirect {
                    redirected_location,
                } => {
                    if self.verbosity >= VerbosityLevel::Verbose {
                        output.push_str(&format!(
                            "    {} {} -> {}\n",
                            self.colorize("redirect", "36"),
                            schema.location,
                            redirected_location
                        ));
                    }
                }
                Retrieval::Failure { message } => {
                    output.push_str(&format!(
                        "    {} {} [{}]: {}\n",
                        self.colorize("failure ", "31"),
                        schema.location,
                        schema.namespace,
                        message
                    ));
                }
            }
        }

        for namespace in &record.unresolved_namespaces {
            output.push_str(&format!(
                "    {} {}\n",
                self.colorize("unresolved", "33"),
                namespace
            ));
        }

        if self.verbosity >= VerbosityLevel::Verbose {
            for error in &record.errors {
                output.push_str(&format!("    error: {}\n", error));
            }
        }

        output
    }

    pub fn format_json(&self, records: &[ResolutionRecord]) -> serde_json::Result<String> {
        let summaries: Vec<ResolutionSummary<'_>> = records
            .iter()
            .map(|record| ResolutionSummary {
                outcome: outcome(record),
                record,
            })
            .collect();
        serde_json::to_string_pretty(&summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SchemaRecord;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn record() -> ResolutionRecord {
        ResolutionRecord {
            document_digest: "0123456789abcdef0123456789abcdef".to_string(),
            document_uri: "file://host/mets.xml".to_string(),
            size_bytes: 10,
            resolved_at: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            schemas: vec![
                SchemaRecord::success(
                    "http://example.org/a.xsd",
                    "http://ns/a",
                    "d41d8cd98f00b204e9800998ecf8427e",
                    PathBuf::from("/tmp/d41d8cd98f00b204e9800998ecf8427e"),
                    Utc.with_ymd_and_hms(2009, 1, 1, 0, 0, 0).unwrap(),
                ),
                SchemaRecord::failure("http://example.org/b.xsd", "http://ns/b", "HTTP 404 Not Found"),
            ],
            unresolved_namespaces: vec!["http://ns/b".to_string()],
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_normal_output_lists_problems_only() {
        let text = Output::plain(VerbosityLevel::Normal).format_resolution(&record());

        assert!(text.starts_with("⚠ PARTIAL  file://host/mets.xml"));
        assert!(text.contains("2 schemas"));
        assert!(text.contains("failure  http://example.org/b.xsd [http://ns/b]: HTTP 404 Not Found"));
        assert!(text.contains("unresolved http://ns/b"));
        assert!(!text.contains("http://example.org/a.xsd"));
    }

    #[test]
    fn test_verbose_output_lists_successes() {
        let text = Output::plain(VerbosityLevel::Verbose).format_resolution(&record());
        assert!(text.contains("success  http://example.org/a.xsd [http://ns/a]"));
    }

    #[test]
    fn test_quiet_output_skips_clean_resolutions() {
        let mut clean = record();
        clean.schemas.truncate(1);
        clean.unresolved_namespaces.clear();
        assert!(Output::plain(VerbosityLevel::Quiet).format_resolution(&clean).is_empty());
    }

    #[test]
    fn test_json_output() {
        let json = Output::plain(VerbosityLevel::Normal)
            .format_json(&[record()])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value[0]["outcome"], "mixed");
        assert_eq!(value[0]["document_uri"], "file://host/mets.xml");
        assert_eq!(value[0]["schemas"].as_array().unwrap().len(), 2);
    }
}
