//! Recipient and body normalization.
//!
//! Recipients are normalized before a message is fingerprinted so that
//! equivalent addresses written differently produce the same hash:
//! e-mail addresses are lower-cased, phone numbers are rewritten to E.164
//! digits (without the leading `+`), everything else (push tokens) is only
//! trimmed.

use lazy_static::lazy_static;
use regex::Regex;

use super::types::Mime;

lazy_static! {
    static ref PHONE_LIKE: Regex = Regex::new(r"^\+?[0-9][0-9 ().\-]{4,}$").expect("valid regex");
    static ref PHONE_SEPARATORS: Regex = Regex::new(r"[ ().\-]").expect("valid regex");
    static ref HTML_TAG: Regex = Regex::new(
        r"(?i)<(!doctype|html|head|body|p|div|span|br|hr|a|b|i|u|em|strong|small|ul|ol|li|table|thead|tbody|tr|td|th|h[1-6]|img|style|script|section|article|header|footer|center|font|blockquote|pre|code)\b[^>]*>"
    )
    .expect("valid regex");
}

/// ISO 3166 alpha-2 code to international calling code.
const CALLING_CODES: &[(&str, &str)] = &[
    ("TZ", "255"),
    ("KE", "254"),
    ("UG", "256"),
    ("RW", "250"),
    ("BI", "257"),
    ("ZA", "27"),
    ("NG", "234"),
    ("GH", "233"),
    ("ET", "251"),
    ("MZ", "258"),
    ("ZM", "260"),
    ("MW", "265"),
    ("US", "1"),
    ("CA", "1"),
    ("GB", "44"),
    ("DE", "49"),
    ("FR", "33"),
    ("IN", "91"),
    ("CN", "86"),
];

/// Calling code for an ISO alpha-2 country code, if known.
pub fn calling_code(country: &str) -> Option<&'static str> {
    let country = country.trim();
    CALLING_CODES
        .iter()
        .find(|(iso, _)| iso.eq_ignore_ascii_case(country))
        .map(|(_, code)| *code)
}

/// Options controlling recipient normalization
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Country assumed for national-format phone numbers
    pub default_country: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            default_country: Some("TZ".to_string()),
        }
    }
}

/// Format a phone number to E.164 digits without the leading plus sign.
///
/// Returns `None` if the input does not look like a phone number.
pub fn to_e164(raw: &str, country: Option<&str>) -> Option<String> {
    let raw = raw.trim();
    if !PHONE_LIKE.is_match(raw) {
        return None;
    }

    let international = raw.starts_with('+');
    let digits = PHONE_SEPARATORS.replace_all(raw, "").replace('+', "");

    if international {
        return Some(digits);
    }
    if let Some(rest) = digits.strip_prefix("00") {
        return Some(rest.to_string());
    }

    let code = country.and_then(calling_code);
    match (digits.strip_prefix('0'), code) {
        (Some(national), Some(code)) => Some(format!("{}{}", code, national)),
        _ => Some(digits),
    }
}

/// Normalize a single recipient address.
pub fn normalize_recipient(raw: &str, options: &NormalizeOptions) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }
    to_e164(trimmed, options.default_country.as_deref()).unwrap_or_else(|| trimmed.to_string())
}

/// Normalize a recipient list: drop blanks, normalize, de-duplicate keeping
/// first occurrence order.
pub fn normalize_recipients<S: AsRef<str>>(raw: &[S], options: &NormalizeOptions) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for recipient in raw {
        let recipient = recipient.as_ref();
        if recipient.trim().is_empty() {
            continue;
        }
        let normalized = normalize_recipient(recipient, options);
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

/// Lower-case, de-duplicate and compact tags
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Trim optional text, collapsing blank strings to `None`
pub fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Classify a body as HTML when it contains markup
pub fn detect_mime(body: Option<&str>) -> Mime {
    match body {
        Some(body) if HTML_TAG.is_match(body) => Mime::Html,
        _ => Mime::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> NormalizeOptions {
        NormalizeOptions {
            default_country: Some("TZ".to_string()),
        }
    }

    #[test]
    fn test_e164_equivalent_formats() {
        assert_eq!(to_e164("+255714000000", Some("TZ")).as_deref(), Some("255714000000"));
        assert_eq!(to_e164("0714000000", Some("TZ")).as_deref(), Some("255714000000"));
        assert_eq!(to_e164("0714 000 000", Some("TZ")).as_deref(), Some("255714000000"));
        assert_eq!(to_e164("00255714000000", None).as_deref(), Some("255714000000"));
        assert_eq!(to_e164("255714000000", Some("TZ")).as_deref(), Some("255714000000"));
    }

    #[test]
    fn test_e164_rejects_non_phone() {
        assert_eq!(to_e164("john@example.com", Some("TZ")), None);
        assert_eq!(to_e164("fcm-token-abc", Some("TZ")), None);
        assert_eq!(to_e164("123", Some("TZ")), None);
    }

    #[test]
    fn test_national_number_without_country_is_kept() {
        assert_eq!(to_e164("0714000000", None).as_deref(), Some("0714000000"));
    }

    #[test]
    fn test_normalize_recipients_dedupes_and_lowercases() {
        let raw = vec![
            "John@Example.com".to_string(),
            " john@example.com ".to_string(),
            "".to_string(),
            "+255714000000".to_string(),
            "0714000000".to_string(),
        ];
        let normalized = normalize_recipients(&raw, &tz());
        assert_eq!(normalized, vec!["john@example.com", "255714000000"]);
    }

    #[test]
    fn test_push_tokens_keep_case() {
        let normalized = normalize_recipients(&["AbC-Token_1"], &tz());
        assert_eq!(normalized, vec!["AbC-Token_1"]);
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime(Some("<p>Hello</p>")), Mime::Html);
        assert_eq!(detect_mime(Some("<!DOCTYPE html><html></html>")), Mime::Html);
        assert_eq!(detect_mime(Some("1 < 2 and 3 > 2")), Mime::Text);
        assert_eq!(detect_mime(Some("plain")), Mime::Text);
        assert_eq!(detect_mime(None), Mime::Text);
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(&["Alert".to_string(), "alert".to_string(), " ".to_string()]);
        assert_eq!(tags, vec!["alert"]);
    }
}
