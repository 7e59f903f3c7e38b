//! Field validation and display sanitization.
//!
//! # Responsibility
//! - Validate untrusted title/description text and return a storage-safe form.
//! - Strip markup and hostile fragments from text headed for display.
//!
//! # Invariants
//! - Every check runs on entity-decoded text.
//! - No function in this module panics.
//! - `sanitize_for_display` is idempotent.

use crate::validation::entities::decode_html_entities;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Minimum title length in chars, after entity decoding and trimming.
pub const TITLE_MIN_CHARS: usize = 3;
/// Maximum title length in chars, after entity decoding and trimming.
pub const TITLE_MAX_CHARS: usize = 100;
/// Maximum description length in chars, after entity decoding and trimming.
pub const DESCRIPTION_MAX_CHARS: usize = 500;

const MALICIOUS_DOMAINS: &[&str] = &[
    "evil.com",
    "malware.com",
    "phishing.com",
    "attacker.com",
    "xss.rocks",
    "bit.ly",
    "tinyurl.com",
];

static SCRIPT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*/?\s*script\b").expect("valid script tag regex"));
static EVENT_HANDLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("valid event handler regex"));
static SCRIPT_PROTOCOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:javascript|vbscript)\s*:").expect("valid script protocol regex")
});
static DATA_PROTOCOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdata\s*:\s*[a-z]+/[a-z0-9.+-]+").expect("valid data protocol regex")
});
static CSS_EXPRESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)expression\s*\(").expect("valid css expression regex"));
static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\burl\s*\(").expect("valid css url regex"));
static BASE64_DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdata\s*:[^,;]*;\s*base64\s*,").expect("valid base64 data url regex")
});
static CONTROL_CHARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("valid control chars regex")
});
static URL_WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\t\r\n]").expect("valid url whitespace regex"));

static SCRIPT_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("valid script block regex")
});
static SCRIPT_TAG_STRIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*script\b[^>]*>?").expect("valid script tag strip regex")
});
static EVENT_HANDLER_STRIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bon\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#)
        .expect("valid event handler strip regex")
});
static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid html tag regex"));
static EXTERNAL_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(?:https?|ftp)://|www\.)\S*").expect("valid external url regex")
});
static MALICIOUS_DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    let alternatives = MALICIOUS_DOMAINS
        .iter()
        .map(|domain| regex::escape(domain))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{alternatives})")).expect("valid malicious domain regex")
});

/// Field-level validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// Empty or whitespace-only input for a mandatory field.
    Required,
    /// Shorter than the field minimum.
    TooShort,
    /// Longer than the field maximum.
    TooLong,
    /// Contains C0 control characters (other than tab/newline/CR) or DEL.
    ControlChars,
    /// Matches an injection pattern.
    DangerousContent,
}

impl ValidationErrorKind {
    /// Stable code used in audit events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::ControlChars => "control_chars",
            Self::DangerousContent => "dangerous_content",
        }
    }
}

impl Display for ValidationErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required => write!(f, "value is required"),
            Self::TooShort => write!(f, "value is too short"),
            Self::TooLong => write!(f, "value is too long"),
            Self::ControlChars => write!(f, "value contains control characters"),
            Self::DangerousContent => write!(f, "value contains potentially dangerous content"),
        }
    }
}

impl Error for ValidationErrorKind {}

/// Injection pattern family matched by [`find_dangerous_pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DangerPattern {
    ScriptTag,
    EventHandler,
    ScriptProtocol,
    DataProtocol,
    CssExpression,
    CssUrl,
    Base64DataUrl,
}

impl DangerPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScriptTag => "script_tag",
            Self::EventHandler => "event_handler",
            Self::ScriptProtocol => "script_protocol",
            Self::DataProtocol => "data_protocol",
            Self::CssExpression => "css_expression",
            Self::CssUrl => "css_url",
            Self::Base64DataUrl => "base64_data_url",
        }
    }
}

/// Validates a task title.
///
/// Check order: `Required`, `DangerousContent`, `ControlChars`, `TooLong`,
/// `TooShort`. Injection payloads are reported as such regardless of length.
///
/// On success returns the trimmed text with HTML special characters escaped.
pub fn validate_title(raw: &str) -> Result<String, ValidationErrorKind> {
    validate_text(raw, TITLE_MIN_CHARS, TITLE_MAX_CHARS)
}

/// Validates an optional task description.
///
/// Absent or blank input is valid and yields `Ok(None)`.
pub fn validate_description(raw: Option<&str>) -> Result<Option<String>, ValidationErrorKind> {
    match raw {
        None => Ok(None),
        Some(value) if decode_html_entities(value).trim().is_empty() => Ok(None),
        Some(value) => validate_text(value, 0, DESCRIPTION_MAX_CHARS).map(Some),
    }
}

/// Returns the first injection pattern found in entity-decoded `input`.
pub fn find_dangerous_pattern(input: &str) -> Option<DangerPattern> {
    match_dangerous(&decode_html_entities(input))
}

/// Pattern scan over text that is already entity-decoded.
fn match_dangerous(decoded: &str) -> Option<DangerPattern> {
    // Browsers drop tab/CR/LF inside URL schemes (`java\tscript:`).
    let collapsed = URL_WHITESPACE_RE.replace_all(decoded, "");

    if SCRIPT_TAG_RE.is_match(decoded) {
        return Some(DangerPattern::ScriptTag);
    }
    if EVENT_HANDLER_RE.is_match(decoded) {
        return Some(DangerPattern::EventHandler);
    }
    if SCRIPT_PROTOCOL_RE.is_match(&collapsed) {
        return Some(DangerPattern::ScriptProtocol);
    }
    if BASE64_DATA_URL_RE.is_match(&collapsed) {
        return Some(DangerPattern::Base64DataUrl);
    }
    if DATA_PROTOCOL_RE.is_match(&collapsed) {
        return Some(DangerPattern::DataProtocol);
    }
    if CSS_EXPRESSION_RE.is_match(decoded) {
        return Some(DangerPattern::CssExpression);
    }
    if CSS_URL_RE.is_match(decoded) {
        return Some(DangerPattern::CssUrl);
    }
    None
}

/// Returns whether `input` contains control characters rejected by validation.
pub fn contains_control_chars(input: &str) -> bool {
    CONTROL_CHARS_RE.is_match(&decode_html_entities(input))
}

/// Cleans arbitrary content before it reaches a rendering surface.
///
/// Strips HTML tags (script blocks with their bodies), event handlers,
/// dangerous protocols, CSS injection openers, external URLs, known malicious
/// domains, angle brackets and control characters. Entities are decoded first
/// so encoded markup is removed as well.
///
/// Independent of validation: it never fails and is applied to accepted and
/// rejected values alike.
pub fn sanitize_for_display(content: &str) -> String {
    let mut current = content.to_string();
    // Each pass only removes or shortens text, so a changed pass is strictly
    // shorter and the loop ends at a fixed point.
    loop {
        let next = display_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn display_pass(input: &str) -> String {
    let text = decode_html_entities(input);
    let text = SCRIPT_BLOCK_RE.replace_all(&text, "");
    let text = HTML_TAG_RE.replace_all(&text, "");
    let text = strip_dangerous(&text);
    let text = EXTERNAL_URL_RE.replace_all(&text, "");
    let text = MALICIOUS_DOMAIN_RE.replace_all(&text, "");
    let text = CONTROL_CHARS_RE.replace_all(&text, "");
    text.replace(['<', '>'], "").trim().to_string()
}

fn validate_text(raw: &str, min_chars: usize, max_chars: usize) -> Result<String, ValidationErrorKind> {
    let decoded = decode_html_entities(raw);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        return Err(ValidationErrorKind::Required);
    }
    if match_dangerous(trimmed).is_some() {
        return Err(ValidationErrorKind::DangerousContent);
    }
    // Checked before trimming: `trim` also drops VT and FF.
    if CONTROL_CHARS_RE.is_match(&decoded) {
        return Err(ValidationErrorKind::ControlChars);
    }

    let char_count = trimmed.chars().count();
    if char_count > max_chars {
        return Err(ValidationErrorKind::TooLong);
    }
    if char_count < min_chars {
        return Err(ValidationErrorKind::TooShort);
    }

    Ok(escape_html(trimmed))
}

/// Removes script tags, event handlers, hostile protocols and CSS injection
/// openers. Only deletes text.
fn strip_dangerous(input: &str) -> String {
    let mut text = input.to_string();
    for re in [
        &*SCRIPT_BLOCK_RE,
        &*SCRIPT_TAG_STRIP_RE,
        &*EVENT_HANDLER_STRIP_RE,
        &*SCRIPT_PROTOCOL_RE,
        &*BASE64_DATA_URL_RE,
        &*DATA_PROTOCOL_RE,
        &*CSS_EXPRESSION_RE,
        &*CSS_URL_RE,
    ] {
        text = re.replace_all(&text, "").into_owned();
    }
    text
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}
