//! Machine-level input validation.
//!
//! These checks run before the verification gate is shown anything, so no
//! amount of human approval can authorize an unconditionally-forbidden
//! action. Everything here is fail-closed: an unresolvable host, a malformed
//! URL, or an unparseable schema all result in rejection, never allowance.
//!
//! The destructive-command patterns and private-network ranges are data
//! tables consumed by generic matchers so the rule sets can grow without
//! touching dispatch logic.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const MAX_COMMAND_LEN: usize = 4_096;
pub const MAX_URL_LEN: usize = 2_048;
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;
/// Hard ceiling on shell command execution time, in seconds.
pub const MAX_SHELL_TIMEOUT_SECS: u64 = 300;
/// Hard ceiling on network fetch time, in seconds.
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 60;

/// A rejected input. The message names the rule that fired so operators can
/// tell "blocked by a fixed rule" apart from other failure layers.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} length {len} exceeds maximum {max} characters")]
    TooLong { field: &'static str, len: usize, max: usize },

    #[error("'{field}' size {size} bytes exceeds maximum {max} bytes")]
    TooLarge { field: String, size: usize, max: usize },

    #[error("command blocked: matches denylist pattern '{pattern}'")]
    BlockedCommand { pattern: &'static str },

    #[error("malformed URL: {reason}")]
    MalformedUrl { reason: String },

    #[error("URL scheme '{scheme}' is not permitted; allowed: http, https")]
    ForbiddenScheme { scheme: String },

    #[error("URL contains no hostname")]
    MissingHost,

    #[error(
        "cannot resolve hostname '{host}': {reason}. Unresolvable hosts are \
         blocked (fail-closed)"
    )]
    Unresolvable { host: String, reason: String },

    #[error("blocked: '{host}' resolves to private/reserved address {addr} ({range})")]
    PrivateAddress {
        host: String,
        addr: IpAddr,
        range: &'static str,
    },

    #[error("arguments for tool '{tool}' failed schema validation: {detail}")]
    Shape { tool: String, detail: String },
}

/// Destructive shell patterns blocked unconditionally, before the human
/// gate. Human approval is an additional control on top of these, never a
/// substitute for them.
static COMMAND_BLOCKLIST: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\brm\s+(-[a-zA-Z]*f[a-zA-Z]*\s+|--force\s+)?/", "rm of root-anchored path"),
        (r"(?i)\bmkfs\b", "filesystem format"),
        (r"(?i)\bdd\b.*\bof=/dev/", "raw device write via dd"),
        (r"(?i)>\s*/dev/sd[a-z]\b", "redirect to block device"),
        (r"(?i)\bshred\b", "secure file deletion"),
        (r"(?i)\bwipefs\b", "filesystem wipe"),
        (r":\(\)\s*\{.*\}.*:", "fork bomb"),
        (
            r"(?i)\bcurl\b[^|]*\|\s*(bash|sh|python3?|perl|ruby)\b",
            "curl pipe-to-shell",
        ),
        (
            r"(?i)\bwget\b[^|]*\|\s*(bash|sh|python3?|perl|ruby)\b",
            "wget pipe-to-shell",
        ),
        (
            r"(?i)>\s*/etc/(passwd|shadow|sudoers|crontab)\b",
            "system credential file overwrite",
        ),
        (r"(?i)\biptables\s+-F\b", "firewall rule flush"),
        (r"(?i)\bufw\s+disable\b", "firewall disable"),
        (r"(?i)\bkill\s+-9\s+-1\b", "kill all processes"),
        (r"(?i)\bchmod\s+(777|a\+rwx)\s+/", "world-write on root-anchored path"),
    ]
    .into_iter()
    .map(|(pattern, desc)| (Regex::new(pattern).unwrap(), desc))
    .collect()
});

/// RFC 1918 and reserved IPv4 ranges rejected by the SSRF check.
const PRIVATE_V4_NETWORKS: &[(Ipv4Addr, u8, &str)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8, "10.0.0.0/8"),
    (Ipv4Addr::new(172, 16, 0, 0), 12, "172.16.0.0/12"),
    (Ipv4Addr::new(192, 168, 0, 0), 16, "192.168.0.0/16"),
    (Ipv4Addr::new(127, 0, 0, 0), 8, "127.0.0.0/8"),
    (Ipv4Addr::new(169, 254, 0, 0), 16, "169.254.0.0/16"),
    (Ipv4Addr::new(100, 64, 0, 0), 10, "100.64.0.0/10"),
    (Ipv4Addr::new(0, 0, 0, 0), 8, "0.0.0.0/8"),
];

/// Validate a shell command against the blocklist and size limit.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if command.len() > MAX_COMMAND_LEN {
        return Err(ValidationError::TooLong {
            field: "command",
            len: command.len(),
            max: MAX_COMMAND_LEN,
        });
    }
    for (pattern, desc) in COMMAND_BLOCKLIST.iter() {
        if pattern.is_match(command) {
            return Err(ValidationError::BlockedCommand { pattern: desc });
        }
    }
    Ok(())
}

/// Clamp a requested shell timeout to `[1, MAX_SHELL_TIMEOUT_SECS]`.
pub fn clamp_shell_timeout(secs: u64) -> u64 {
    secs.clamp(1, MAX_SHELL_TIMEOUT_SECS)
}

/// Clamp a requested fetch timeout to `[1, MAX_FETCH_TIMEOUT_SECS]`.
pub fn clamp_fetch_timeout(secs: u64) -> u64 {
    secs.clamp(1, MAX_FETCH_TIMEOUT_SECS)
}

/// Reject content above the payload ceiling.
pub fn check_content_size(content: &str, field: &str) -> Result<(), ValidationError> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            size: content.len(),
            max: MAX_CONTENT_BYTES,
        });
    }
    Ok(())
}

/// Validate a URL for safe fetching: length, scheme, host presence, and an
/// SSRF check over every address the host resolves to.
pub async fn validate_url(raw: &str) -> Result<reqwest::Url, ValidationError> {
    if raw.len() > MAX_URL_LEN {
        return Err(ValidationError::TooLong {
            field: "url",
            len: raw.len(),
            max: MAX_URL_LEN,
        });
    }

    let url = reqwest::Url::parse(raw).map_err(|e| ValidationError::MalformedUrl {
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::ForbiddenScheme {
                scheme: other.to_string(),
            });
        }
    }

    let host = url.host_str().ok_or(ValidationError::MissingHost)?.to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    // IP-literal hosts are checked directly; no lookup involved. IPv6
    // literals arrive bracketed from the URL parser.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if let Some(range) = disallowed_range(ip) {
            return Err(ValidationError::PrivateAddress {
                host,
                addr: ip,
                range,
            });
        }
        return Ok(url);
    }

    let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| ValidationError::Unresolvable {
            host: host.clone(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ValidationError::Unresolvable {
            host,
            reason: "no addresses returned".to_string(),
        });
    }

    for addr in addrs {
        if let Some(range) = disallowed_range(addr.ip()) {
            return Err(ValidationError::PrivateAddress {
                host,
                addr: addr.ip(),
                range,
            });
        }
    }

    Ok(url)
}

/// Name of the reserved range an address falls in, if any.
fn disallowed_range(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_multicast() {
                return Some("multicast");
            }
            if v4.is_broadcast() {
                return Some("broadcast");
            }
            for (net, prefix, name) in PRIVATE_V4_NETWORKS {
                let mask = if *prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                if (u32::from(v4) & mask) == (u32::from(*net) & mask) {
                    return Some(name);
                }
            }
            None
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return disallowed_range(IpAddr::V4(mapped));
            }
            if v6.is_loopback() {
                return Some("::1/128");
            }
            if v6.is_unspecified() {
                return Some("::/128");
            }
            if v6.is_multicast() {
                return Some("ff00::/8");
            }
            let seg = v6.segments()[0];
            if seg & 0xfe00 == 0xfc00 {
                return Some("fc00::/7");
            }
            if seg & 0xffc0 == 0xfe80 {
                return Some("fe80::/10");
            }
            None
        }
    }
}

/// Re-validate tool arguments against their declared shape. Used on the
/// verification gate's edit path: operator-edited arguments must still
/// conform to the tool's declared schema before execution.
pub fn validate_args_shape(
    tool: &str,
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), ValidationError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ValidationError::Shape {
        tool: tool.to_string(),
        detail: format!("invalid schema: {e}"),
    })?;
    let messages: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Shape {
            tool: tool.to_string(),
            detail: messages.join("; "),
        })
    }
}
