//! Attack signature classification and request-level threat scanning.
//!
//! # Responsibility
//! - Classify suspicious input into XSS / code-injection / SQL-injection.
//! - Walk arbitrary request payloads and collect path-qualified threats.
//!
//! # Invariants
//! - Signatures are evaluated in a fixed order; the first match wins.
//! - Scanning never panics, including on deeply nested payloads.

use crate::validation::entities::decode_html_entities;
use crate::validation::sanitize::find_dangerous_pattern;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{Display, Formatter};

const MAX_SCAN_DEPTH: usize = 64;
const ROOT_PATH: &str = "$";

/// Attack family reported by [`detect_attack_signature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    Xss,
    CodeInjection,
    SqlInjection,
}

impl AttackType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xss => "xss",
            Self::CodeInjection => "code_injection",
            Self::SqlInjection => "sql_injection",
        }
    }
}

impl Display for AttackType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static ATTACK_SIGNATURES: Lazy<Vec<(AttackType, Regex)>> = Lazy::new(|| {
    let table: &[(AttackType, &str)] = &[
        (AttackType::Xss, r"(?i)<\s*/?\s*script\b"),
        (AttackType::Xss, r"(?i)\b(?:javascript|vbscript)\s*:"),
        (AttackType::Xss, r"(?i)\bon\w+\s*="),
        (
            AttackType::Xss,
            r"(?i)<\s*(?:iframe|object|embed|applet|meta|svg|link|style|base|form)\b",
        ),
        (AttackType::Xss, r"(?i)\bsrcdoc\s*="),
        (AttackType::CodeInjection, r"(?i)\beval\s*\("),
        (AttackType::CodeInjection, r"\bnew\s+Function\s*\("),
        (
            AttackType::CodeInjection,
            r#"\bset(?:Timeout|Interval)\s*\(\s*["'`]"#,
        ),
        (
            AttackType::CodeInjection,
            r"(?i)\bdocument\s*\.\s*(?:cookie|write|domain)\b",
        ),
        (AttackType::CodeInjection, r"(?i)\bwindow\s*\.\s*location\b"),
        (AttackType::CodeInjection, r"__proto__|\bconstructor\s*\.\s*prototype\b"),
        (AttackType::SqlInjection, r"(?i)\bunion\s+(?:all\s+)?select\b"),
        (
            AttackType::SqlInjection,
            r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        ),
        (
            AttackType::SqlInjection,
            r"(?i);\s*(?:drop|delete|truncate|insert|update|alter|create)\s+",
        ),
        (AttackType::SqlInjection, r"(?i)\b(?:drop|truncate)\s+table\b"),
        (AttackType::SqlInjection, r"(?i)\bexec(?:ute)?\s+(?:xp|sp)_\w+"),
        (AttackType::SqlInjection, r#"['"]\s*(?:--|#|/\*)"#),
        (
            AttackType::SqlInjection,
            r"(?i)\bsleep\s*\(\s*\d+\s*\)|\bwaitfor\s+delay\b",
        ),
    ];
    table
        .iter()
        .map(|(kind, pattern)| (*kind, Regex::new(pattern).expect("valid attack signature")))
        .collect()
});

/// Classifies `input` by the first matching attack signature.
///
/// Entities are decoded first. Returns `None` when nothing matches.
pub fn detect_attack_signature(input: &str) -> Option<AttackType> {
    let decoded = decode_html_entities(input);
    ATTACK_SIGNATURES
        .iter()
        .find(|(_, re)| re.is_match(&decoded))
        .map(|(kind, _)| *kind)
}

/// Outcome of a recursive payload scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestValidation {
    pub valid: bool,
    /// `"<path>: <category>"` entries, in traversal order.
    pub threats: Vec<String>,
}

/// Scans every string leaf and object key of `data`.
///
/// Paths use `$` for the root, `.key` for object members and `[i]` for array
/// items, e.g. `$.tags[1]`. Payloads nested deeper than 64 levels are reported
/// as a threat instead of being scanned further.
pub fn validate_request(data: &Value) -> RequestValidation {
    let mut threats = Vec::new();
    scan_value(data, ROOT_PATH, 0, &mut threats);
    RequestValidation {
        valid: threats.is_empty(),
        threats,
    }
}

fn scan_value(value: &Value, path: &str, depth: usize, threats: &mut Vec<String>) {
    if depth > MAX_SCAN_DEPTH {
        threats.push(format!("{path}: max_depth_exceeded"));
        return;
    }

    match value {
        Value::String(text) => {
            if let Some(label) = threat_label(text) {
                threats.push(format!("{path}: {label}"));
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                scan_value(item, &format!("{path}[{index}]"), depth + 1, threats);
            }
        }
        Value::Object(members) => {
            for (key, member) in members {
                let member_path = format!("{path}.{key}");
                if let Some(label) = threat_label(key) {
                    threats.push(format!("{member_path}: {label} (key)"));
                }
                scan_value(member, &member_path, depth + 1, threats);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Only dangerous patterns block; the attack signature just names the hit.
fn threat_label(text: &str) -> Option<&'static str> {
    let pattern = find_dangerous_pattern(text)?;
    Some(detect_attack_signature(text).map_or(pattern.as_str(), AttackType::as_str))
}
