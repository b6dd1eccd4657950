//! Secret scrubbing for audit payloads.
//!
//! Every argument object and result summary is passed through this module
//! before it is written to the audit trail. Matches are replaced with a
//! typed `[REDACTED:<name>]` marker rather than blanked, so a reader of the
//! trail can still see that a secret was present and of what kind. The
//! operator reviewing a tool call is shown true values; only persistence is
//! scrubbed.
//!
//! Patterns are data tables consumed by generic matchers, not inline logic.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::Regex;

/// Inputs longer than this are truncated before scanning to bound CPU cost.
const MAX_SCAN_CHARS: usize = 100_000;

/// Named value patterns: anything matching is replaced wholesale.
static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        (
            "anthropic_api_key",
            Regex::new(r"(?i)sk-ant-[A-Za-z0-9\-_]{20,}").unwrap(),
        ),
        ("openai_api_key", Regex::new(r"\bsk-[A-Za-z0-9]{20,}").unwrap()),
        ("aws_access_key_id", Regex::new(r"\bAKIA[A-Z0-9]{16}\b").unwrap()),
        (
            "github_token",
            Regex::new(r"(?i)\bgh[ps]_[A-Za-z0-9]{36}\b").unwrap(),
        ),
        (
            "bearer_token",
            Regex::new(r"(?i)\bBearer\s+[A-Za-z0-9\-._~+/]{8,}=*").unwrap(),
        ),
        (
            "pem_private_key",
            Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
        ),
        (
            "generic_password_assign",
            Regex::new(r"(?i)\bpassword\s*[=:]\s*\S{4,}").unwrap(),
        ),
        (
            "generic_token_assign",
            Regex::new(r#"(?i)\btoken\s*[=:]\s*[^\s,}"']{8,}"#).unwrap(),
        ),
        (
            "generic_secret_assign",
            Regex::new(r#"(?i)\bsecret\s*[=:]\s*[^\s,}"']{8,}"#).unwrap(),
        ),
    ]
});

/// Object keys whose values are redacted regardless of the value's shape.
static SENSITIVE_KEYS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "password",
            "secret",
            "token",
            "api_key",
            "api-key",
            "apikey",
            "auth",
            "credential",
            "private_key",
            "private-key",
            "access_key",
            "access-key",
            "client_secret",
            "client-secret",
        ])
        .expect("failed to build sensitive-key matcher")
});

/// Query parameter names whose values are redacted by [`scrub_url`].
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "token",
    "api_key",
    "apikey",
    "secret",
    "password",
    "auth",
    "access_token",
    "refresh_token",
    "key",
    "private_key",
    "client_secret",
    "authorization",
];

/// Replace known secret patterns in a string with `[REDACTED:<name>]`.
pub fn scrub_str(s: &str) -> String {
    let mut out = if s.len() > MAX_SCAN_CHARS {
        let mut end = MAX_SCAN_CHARS;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated {} chars]", &s[..end], s.len())
    } else {
        s.to_string()
    };
    for (name, pattern) in PATTERNS.iter() {
        out = pattern
            .replace_all(&out, format!("[REDACTED:{name}]"))
            .into_owned();
    }
    out
}

/// Recursively scrub a JSON value. Returns a new value, never mutates the
/// input. Recursion is capped to handle pathological nesting.
pub fn scrub_value(value: &serde_json::Value) -> serde_json::Value {
    scrub_value_depth(value, 0)
}

fn scrub_value_depth(value: &serde_json::Value, depth: u32) -> serde_json::Value {
    use serde_json::Value;

    if depth > 10 {
        return Value::String("[truncated:max_depth]".to_string());
    }

    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if SENSITIVE_KEYS.is_match(k) {
                    out.insert(k.clone(), Value::String("[REDACTED:sensitive_key]".to_string()));
                } else {
                    out.insert(k.clone(), scrub_value_depth(v, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items.iter().map(|v| scrub_value_depth(v, depth + 1)).collect(),
        ),
        Value::String(s) => Value::String(scrub_str(s)),
        other => other.clone(),
    }
}

/// Redact sensitive query-parameter values from a URL string.
pub fn scrub_url(url: &str) -> String {
    let (head, rest) = match url.split_once('?') {
        Some(parts) => parts,
        None => return scrub_str(url),
    };
    let (query, fragment) = match rest.split_once('#') {
        Some((q, f)) => (q, Some(f)),
        None => (rest, None),
    };

    let scrubbed: Vec<String> = query
        .split('&')
        .map(|param| {
            let (name, _value) = param.split_once('=').unwrap_or((param, ""));
            if SENSITIVE_QUERY_PARAMS.contains(&name.to_ascii_lowercase().as_str()) {
                format!("{name}=[REDACTED:query_param]")
            } else {
                param.to_string()
            }
        })
        .collect();

    let mut out = format!("{head}?{}", scrubbed.join("&"));
    if let Some(f) = fragment {
        out.push('#');
        out.push_str(f);
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn scrubs_api_keys() {
        let s = "key is sk-ant-REDACTED and more";
        let scrubbed = scrub_str(s);
        assert!(scrubbed.contains("[REDACTED:anthropic_api_key]"));
        assert!(!scrubbed.contains("sk-ant-"));
    }

    #[test]
    fn scrubs_bearer_tokens() {
        let scrubbed = scrub_str("Authorization: Bearer abc123def456ghi");
        assert!(scrubbed.contains("[REDACTED:bearer_token]"));
    }

    #[test]
    fn scrubs_password_assignments() {
        let scrubbed = scrub_str("password=hunter2hunter2");
        assert_eq!(scrubbed, "[REDACTED:generic_password_assign]");
    }

    #[test]
    fn scrubbing_is_idempotent() {
        let inputs = [
            "password=hunter2hunter2",
            "Bearer abcdefgh12345678",
            "sk-ant-REDACTED",
            "token: deadbeefdeadbeef end",
            "plain text with nothing secret",
        ];
        for input in inputs {
            let once = scrub_str(input);
            let twice = scrub_str(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn scrubs_sensitive_keys_in_objects() {
        let value = json!({
            "path": "/tmp/x",
            "api_key": "sk-whatever",
            "nested": {"client_secret": "abc", "ok": "visible"}
        });
        let scrubbed = scrub_value(&value);
        assert_eq!(scrubbed["api_key"], "[REDACTED:sensitive_key]");
        assert_eq!(scrubbed["nested"]["client_secret"], "[REDACTED:sensitive_key]");
        assert_eq!(scrubbed["nested"]["ok"], "visible");
        assert_eq!(scrubbed["path"], "/tmp/x");
    }

    #[test]
    fn value_scrubbing_is_idempotent() {
        let value = json!({"token": "aaaabbbbcccc", "text": "password=hunter2hunter2"});
        let once = scrub_value(&value);
        let twice = scrub_value(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn scrubs_url_query_params() {
        let url = "https://example.com/data?id=7&api_key=abc123&x=1#frag";
        let scrubbed = scrub_url(url);
        assert_eq!(
            scrubbed,
            "https://example.com/data?id=7&api_key=[REDACTED:query_param]&x=1#frag"
        );
    }

    #[test]
    fn truncates_oversized_input() {
        let big = "a".repeat(200_000);
        let scrubbed = scrub_str(&big);
        assert!(scrubbed.len() < 110_000);
        assert!(scrubbed.contains("[truncated 200000 chars]"));
    }
}
