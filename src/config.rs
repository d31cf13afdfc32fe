//! Configuration loading and types for s3-presign.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct, then overlaid with the usual AWS environment
//! variables. Each subsection governs a different part of the tool: the
//! reference grammar, the signer, and logging.

use serde::Deserialize;
use std::path::Path;

use crate::grammar::{EXAMPLE, SCHEME};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Reference grammar settings.
    #[serde(default)]
    pub reference: ReferenceConfig,

    /// Signing endpoint and credentials.
    #[serde(default)]
    pub signer: SignerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reference grammar configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    /// Scheme that marks a reference (without `://`).
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Example reference echoed in error messages.
    #[serde(default = "default_example")]
    pub example: String,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            example: default_example(),
        }
    }
}

/// Signer configuration.
///
/// Credentials are normally left out of the file and supplied through
/// `AWS_S3_ENDPOINT`, `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// S3 endpoint, `host[:port]` or `http(s)://host[:port]`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region used in the credential scope.
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    pub access_key: Option<String>,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    pub secret_key: Option<String>,

    /// Temporary session token, if the credentials are from STS.
    #[serde(default)]
    pub session_token: Option<String>,

    /// Use https when the endpoint carries no scheme.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Path-style (`host/bucket/key`) instead of virtual-hosted addressing.
    #[serde(default = "default_true")]
    pub path_style: bool,

    /// Scheme and host presented in signed URLs when a reference carries no
    /// endpoint override of its own.
    #[serde(default)]
    pub public_endpoint: Option<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key: None,
            secret_key: None,
            session_token: None,
            secure: true,
            path_style: true,
            public_endpoint: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    SCHEME.to_string()
}

fn default_example() -> String {
    EXAMPLE.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Environment -------------------------------------------------------------

impl Config {
    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Overlay values looked up through `lookup`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let signer = &mut self.signer;

        if let Some(v) = get("AWS_S3_ENDPOINT") {
            signer.endpoint = Some(v);
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            signer.access_key = Some(v);
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            signer.secret_key = Some(v);
        }
        if let Some(v) = get("AWS_SESSION_TOKEN") {
            signer.session_token = Some(v);
        }
        if let Some(v) = get("AWS_REGION") {
            signer.region = v;
        }
        if let Some(v) = get("S3_PRESIGN_PUBLIC_ENDPOINT") {
            signer.public_endpoint = Some(v);
        }
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.reference.scheme, "s3-presign");
        assert_eq!(config.reference.example, EXAMPLE);
        assert_eq!(config.signer.region, "us-east-1");
        assert!(config.signer.secure);
        assert!(config.signer.path_style);
        assert!(config.signer.endpoint.is_none());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_load_partial_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "signer:\n  endpoint: minio:9000\n  secure: false\n  access_key_id: AKID\nlogging:\n  format: json"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.signer.endpoint.as_deref(), Some("minio:9000"));
        assert_eq!(config.signer.access_key.as_deref(), Some("AKID"));
        assert!(!config.signer.secure);
        assert!(config.signer.path_style);
        assert_eq!(config.signer.region, "us-east-1");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.reference.scheme, "s3-presign");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_config("/nonexistent/s3-presign.yaml").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("AWS_S3_ENDPOINT", "s3.example.com"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_SESSION_TOKEN", ""),
            ("S3_PRESIGN_PUBLIC_ENDPOINT", "https://cdn.example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.signer.endpoint = Some("from-file:9000".to_string());
        config.signer.session_token = Some("kept".to_string());
        config.apply_env_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.signer.endpoint.as_deref(), Some("s3.example.com"));
        assert_eq!(config.signer.access_key.as_deref(), Some("AKID"));
        assert_eq!(config.signer.secret_key.as_deref(), Some("secret"));
        assert_eq!(config.signer.region, "eu-west-1");
        assert_eq!(config.signer.session_token.as_deref(), Some("kept"));
        assert_eq!(
            config.signer.public_endpoint.as_deref(),
            Some("https://cdn.example.com")
        );
    }
}
