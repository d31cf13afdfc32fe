//! Signer adapter: turns a parsed [`Reference`] into its final URL.

use tracing::debug;
use url::Url;

use crate::errors::PresignError;
use crate::presigner::Presign;
use crate::reference::Reference;

/// Forwards references to a [`Presign`] capability and applies endpoint
/// overrides to the result.
pub struct Signer {
    presigner: Box<dyn Presign>,
    default_endpoint: Option<String>,
}

impl Signer {
    pub fn new(presigner: Box<dyn Presign>) -> Self {
        Self {
            presigner,
            default_endpoint: None,
        }
    }

    /// Present `endpoint` instead of the signing host for references that
    /// carry no override of their own.
    pub fn with_default_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.default_endpoint = endpoint.filter(|e| !e.is_empty());
        self
    }

    /// Sign one reference. Makes exactly one presign call.
    ///
    /// An endpoint override is normalized before use: a trailing `/` is
    /// dropped, and any path it carries becomes a prefix of the signed path.
    pub fn sign(&self, reference: Reference) -> Result<String, PresignError> {
        let Reference {
            method,
            endpoint_override,
            bucket,
            object_key,
            expiry,
            extra_query,
        } = reference;

        let signed = self
            .presigner
            .presign(&method, &bucket, &object_key, expiry, &extra_query)
            .map_err(|source| PresignError::Sign {
                bucket: bucket.clone(),
                key: object_key.clone(),
                source,
            })?;

        debug!("Signed {} {}/{}", method, bucket, object_key);

        match endpoint_override.as_deref().or(self.default_endpoint.as_deref()) {
            Some(endpoint) => {
                replace_endpoint(&signed, endpoint).map_err(|err| PresignError::Sign {
                    bucket,
                    key: object_key,
                    source: anyhow::Error::new(err)
                        .context(format!("invalid endpoint override {endpoint:?}")),
                })
            }
            None => Ok(signed),
        }
    }
}

/// Serve the path, query and fragment of `signed` from `endpoint`.
///
/// Scheme, host and port come from `endpoint`. A path on `endpoint` is kept
/// as a prefix, so both `https://cdn` and `https://cdn/` produce
/// `https://cdn/<path>`.
pub fn replace_endpoint(signed: &str, endpoint: &str) -> Result<String, url::ParseError> {
    let signed = Url::parse(signed)?;
    let mut url = Url::parse(endpoint)?;

    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{prefix}{}", signed.path()));
    url.set_query(signed.query());
    url.set_fragment(signed.fragment());
    Ok(url.into())
}
