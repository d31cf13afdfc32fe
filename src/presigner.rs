//! The signing capability behind the signer adapter.
//!
//! [`Presign`] is the seam between reference rewriting and credentials:
//! the substitutors only ever see this trait, so tests can swap in a fake
//! while the binary uses [`SigV4Presigner`].

use std::time::Duration;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::config::SignerConfig;
use crate::sigv4::{
    build_canonical_request, build_canonical_query_string, build_string_to_sign,
    compute_signature, credential_scope, derive_signing_key, format_amz_date, s3_uri_encode,
    s3_uri_encode_path, ALGORITHM, UNSIGNED_PAYLOAD,
};

/// Maximum presigned URL expiration (7 days).
pub const MAX_PRESIGNED_EXPIRES: u64 = 604800;

/// Service name in the credential scope.
const SERVICE: &str = "s3";

/// Produces time-limited URLs for storage objects.
pub trait Presign {
    /// Return a fully qualified URL granting `method` on `bucket/key` for
    /// `expiry`, with `extra_query` folded into the signed query.
    fn presign(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expiry: Duration,
        extra_query: &[(String, String)],
    ) -> anyhow::Result<String>;
}

/// Offline AWS Signature Version 4 query-string presigner.
#[derive(Debug, Clone)]
pub struct SigV4Presigner {
    scheme: String,
    host: String,
    region: String,
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    path_style: bool,
}

impl SigV4Presigner {
    /// Build a presigner from signer settings.
    ///
    /// Fails when the endpoint or either half of the key pair is missing.
    pub fn from_config(config: &SignerConfig) -> anyhow::Result<Self> {
        let endpoint = required(&config.endpoint, "AWS_S3_ENDPOINT")?;
        let access_key = required(&config.access_key, "AWS_ACCESS_KEY_ID")?;
        let secret_key = required(&config.secret_key, "AWS_SECRET_ACCESS_KEY")?;

        let (scheme, host) = split_endpoint(endpoint, config.secure)?;
        Ok(Self {
            scheme,
            host,
            region: config.region.clone(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            session_token: config.session_token.clone().filter(|t| !t.is_empty()),
            path_style: config.path_style,
        })
    }

    /// Presign as of `now`.
    pub fn presign_at(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expiry: Duration,
        extra_query: &[(String, String)],
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let expires = expiry.as_secs();
        if expires == 0 || expires > MAX_PRESIGNED_EXPIRES {
            bail!("X-Amz-Expires must be between 1 and {MAX_PRESIGNED_EXPIRES} seconds, got {expiry:?}");
        }

        let (host, path) = if self.path_style {
            (self.host.clone(), format!("{bucket}/{key}"))
        } else {
            (format!("{bucket}.{}", self.host), key.to_string())
        };
        let canonical_uri = s3_uri_encode_path(&path);

        let (date_stamp, amz_date) = format_amz_date(now);
        let scope = credential_scope(&date_stamp, &self.region, SERVICE);
        let credential = format!("{}/{scope}", self.access_key);

        let mut params: Vec<(String, String)> = vec![
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(token) = &self.session_token {
            params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        params.extend(extra_query.iter().cloned());

        let raw_query = params
            .iter()
            .map(|(k, v)| format!("{}={}", s3_uri_encode(k, true), s3_uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");

        let headers = vec![("host".to_string(), host.clone())];
        let canonical_request = build_canonical_request(
            method,
            &canonical_uri,
            &raw_query,
            &headers,
            "host",
            UNSIGNED_PAYLOAD,
        );
        let string_to_sign = build_string_to_sign(&amz_date, &scope, &canonical_request);
        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region, SERVICE);
        let signature = compute_signature(&signing_key, &string_to_sign);

        debug!(
            "Presigned {} {}/{} for {}s via {}",
            method, bucket, key, expires, host
        );

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.scheme,
            host,
            canonical_uri,
            build_canonical_query_string(&raw_query),
            signature
        ))
    }
}

impl Presign for SigV4Presigner {
    fn presign(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expiry: Duration,
        extra_query: &[(String, String)],
    ) -> anyhow::Result<String> {
        self.presign_at(method, bucket, key, expiry, extra_query, Utc::now())
    }
}

fn required<'a>(value: &'a Option<String>, env_name: &str) -> anyhow::Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("required env var: {env_name}"))
}

/// Split an endpoint into `(scheme, host[:port])`.
///
/// Accepts `host[:port]` (scheme chosen by `secure`) or a full
/// `http(s)://host[:port]` URL. Default ports are dropped since they are
/// not part of the signed `host` header.
fn split_endpoint(endpoint: &str, secure: bool) -> anyhow::Result<(String, String)> {
    let default_scheme = if secure { "https" } else { "http" };
    // `minio:9000` parses as a URL with scheme `minio` and no host.
    let url = match Url::parse(endpoint) {
        Ok(url) if url.has_host() => url,
        _ => Url::parse(&format!("{default_scheme}://{endpoint}"))
            .map_err(|err| anyhow!("invalid AWS_S3_ENDPOINT {endpoint:?}: {err}"))?,
    };

    let scheme = url.scheme();
    if scheme != "https" && scheme != "http" {
        bail!("unsupported endpoint scheme {scheme:?} in {endpoint:?}");
    }
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => bail!("invalid AWS_S3_ENDPOINT: missing host in {endpoint:?}"),
    };
    if url.path() != "/" || url.query().is_some() || !url.username().is_empty() {
        bail!("invalid AWS_S3_ENDPOINT: expected host[:port], got {endpoint:?}");
    }

    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((scheme.to_string(), host))
}
