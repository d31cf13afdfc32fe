//! Parsing of `s3-presign://` reference tokens.
//!
//! ```text
//! s3-presign://[METHOD[:ENDPOINT]@]BUCKET/OBJECT_KEY[?QUERY][#OPTIONS]
//! ```
//!
//! - `METHOD` defaults to `GET` and is upper-cased.
//! - `ENDPOINT` (percent-encoded) replaces the scheme and host of the signed
//!   URL, e.g. `get:https%3A%2F%2Fcdn.example.com@bucket/key`.
//! - `QUERY` is forwarded to the signer unchanged.
//! - `OPTIONS` is a `key=value` list; only `expires=<duration>` is understood.

use std::cell::Cell;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use tracing::warn;
use url::{form_urlencoded, ParseError, SyntaxViolation, Url};

use crate::duration::parse_duration;
use crate::errors::PresignError;
use crate::grammar::Grammar;

/// Expiry used when a reference carries no `expires` option.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3600);

/// Method used when a reference carries no user-info.
pub const DEFAULT_METHOD: &str = "GET";

/// Fragment option holding the expiry.
const EXPIRES_OPTION: &str = "expires";

/// Maximum object key length in bytes.
const MAX_KEY_LENGTH: usize = 1024;

/// A parsed reference, ready to be handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Public scheme+host to present instead of the signing endpoint.
    pub endpoint_override: Option<String>,
    /// Bucket name.
    pub bucket: String,
    /// Object key, without the leading `/`.
    pub object_key: String,
    /// How long the signed URL stays valid.
    pub expiry: Duration,
    /// Query parameters forwarded to the signer, in source order.
    pub extra_query: Vec<(String, String)>,
}

/// Parse one reference token.
pub fn parse(grammar: &Grammar, token: &str) -> Result<Reference, PresignError> {
    // The URL parser silently drops tabs and newlines, so check first.
    if let Some(bad) = token.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(PresignError::malformed(
            token,
            format!("unexpected character {bad:?}"),
        ));
    }
    reject_dot_segments(token)?;

    let bad_escape = Cell::new(false);
    let url = Url::options()
        .syntax_violation_callback(Some(&|violation: SyntaxViolation| {
            if matches!(violation, SyntaxViolation::PercentDecode) {
                bad_escape.set(true);
            }
        }))
        .parse(token)
        .map_err(|err| match err {
            ParseError::EmptyHost => PresignError::MissingBucket {
                example: grammar.example().to_string(),
            },
            err => PresignError::malformed(token, err.to_string()),
        })?;
    if bad_escape.get() {
        return Err(PresignError::malformed(
            token,
            "\"%\" must start a two-digit hex escape",
        ));
    }

    if !url.scheme().eq_ignore_ascii_case(grammar.scheme()) {
        return Err(PresignError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
        });
    }
    if !url.has_authority() {
        return Err(PresignError::malformed(token, "missing \"//\" after scheme"));
    }
    if let Some(port) = url.port() {
        return Err(PresignError::malformed(
            token,
            format!("unexpected port {port} after bucket"),
        ));
    }

    let method = decode(token, url.username())?.to_ascii_uppercase();
    let method = if method.is_empty() {
        DEFAULT_METHOD.to_string()
    } else {
        method
    };
    let endpoint_override = url
        .password()
        .map(|p| decode(token, p))
        .transpose()?
        .filter(|p| !p.is_empty());

    let bucket = decode(token, url.host_str().unwrap_or_default())?;
    if bucket.is_empty() {
        return Err(PresignError::MissingBucket {
            example: grammar.example().to_string(),
        });
    }

    let path = url.path();
    let object_key = decode_key(path.strip_prefix('/').unwrap_or(path))?;
    validate_object_key(&object_key)?;

    let extra_query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut expiry = DEFAULT_EXPIRY;
    if let Some(fragment) = url.fragment() {
        let mut expires_seen = false;
        for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
            if key == EXPIRES_OPTION {
                if expires_seen {
                    continue;
                }
                expires_seen = true;
                expiry = parse_duration(&value).ok_or_else(|| PresignError::InvalidDuration {
                    value: value.into_owned(),
                })?;
            } else {
                warn!("Ignoring unknown reference option {:?} in {}", key, token);
            }
        }
    }

    Ok(Reference {
        method,
        endpoint_override,
        bucket,
        object_key,
        expiry,
        extra_query,
    })
}

/// Check an object key against the storage system's naming rules.
pub fn validate_object_key(key: &str) -> Result<(), PresignError> {
    if key.trim().is_empty() {
        return Err(PresignError::invalid_key(key, "object name cannot be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(PresignError::invalid_key(
            key,
            format!("object name cannot be longer than {MAX_KEY_LENGTH} bytes"),
        ));
    }
    if key.contains("//") {
        return Err(PresignError::invalid_key(
            key,
            "object name with a \"//\" is not supported",
        ));
    }
    if key.split('/').any(is_dot_segment) {
        return Err(PresignError::invalid_key(key, DOT_SEGMENT_REASON));
    }
    Ok(())
}

const DOT_SEGMENT_REASON: &str = "object name with \".\" or \"..\" segments is not supported";

fn is_dot_segment(segment: &str) -> bool {
    segment == "." || segment == ".."
}

/// `Url` resolves `.` and `..` path segments (escaped or not) while
/// parsing, so they have to be caught on the raw token.
fn reject_dot_segments(token: &str) -> Result<(), PresignError> {
    let before_query = token.split(['?', '#']).next().unwrap_or(token);
    // Skip "scheme:", "" and the authority.
    let mut segments = before_query.split('/').skip(3);
    if segments.any(|segment| is_dot_segment(&segment.to_ascii_lowercase().replace("%2e", "."))) {
        return Err(PresignError::invalid_key(before_query, DOT_SEGMENT_REASON));
    }
    Ok(())
}

/// Percent-decode a component, rejecting non-UTF-8 results.
fn decode(token: &str, raw: &str) -> Result<String, PresignError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| PresignError::malformed(token, "escaped bytes are not valid UTF-8"))
}

/// Percent-decode the object key path.
fn decode_key(raw: &str) -> Result<String, PresignError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| {
            PresignError::invalid_key(raw, "object name with non UTF-8 strings is not supported")
        })
}

// ── Tests ───────────────────────────────────────────────────────────
