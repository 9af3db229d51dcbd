use std::path::Path;
use std::process;

use r7_interchange::{content_hash, parse_action_record, parse_rule_set};

use crate::{read_json, report_error, DocumentKind, OutputFormat};

/// Guess the document kind from its top-level fields.
fn detect(doc: &serde_json::Value) -> DocumentKind {
    if doc.get("rulesHash").is_some() && doc.get("request").is_some() {
        DocumentKind::Record
    } else if doc.get("rules").is_some() && doc.get("version").is_some() {
        DocumentKind::Rules
    } else {
        DocumentKind::Json
    }
}

pub(crate) fn cmd_hash(path: &Path, kind: DocumentKind, output: OutputFormat, quiet: bool) {
    let doc = read_json(path, output, quiet);
    let kind = match kind {
        DocumentKind::Auto => detect(&doc),
        k => k,
    };

    let hashed = match kind {
        DocumentKind::Record => parse_action_record(&doc)
            .map_err(|e| e.to_string())
            .and_then(|r| r.content_hash().map_err(|e| e.to_string())),
        DocumentKind::Rules => parse_rule_set(&doc)
            .map_err(|e| e.to_string())
            .and_then(|r| r.hash().map_err(|e| e.to_string())),
        DocumentKind::Json | DocumentKind::Auto => content_hash(&doc).map_err(|e| e.to_string()),
    };
    let hash = match hashed {
        Ok(h) => h,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let kind_name = match kind {
        DocumentKind::Record => "record",
        DocumentKind::Rules => "rules",
        DocumentKind::Json | DocumentKind::Auto => "json",
    };
    match output {
        OutputFormat::Text => println!("{}", hash),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "kind": kind_name, "hash": hash }));
        }
    }
}
