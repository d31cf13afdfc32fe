//! Reference token grammar shared by the text and YAML substitutors.
//!
//! A [`Grammar`] bundles the scheme literal, the example shown in error
//! messages, and the precompiled token pattern. It is built once and passed
//! by reference into the parser and both substitutors so the two modes can
//! never disagree about what a reference looks like.

use std::ops::Range;

use regex::bytes::Regex;

/// Default reference scheme.
pub const SCHEME: &str = "s3-presign";

/// Canonical example echoed back when a reference is missing its bucket.
pub const EXAMPLE: &str = "s3-presign://get@my-bucket/path/to/object";

/// Characters allowed after `SCHEME://` in a text-mode token.
pub const TOKEN_CLASS: &str = r"A-Za-z0-9@\-_/?=#%.~+";

/// Scheme, example, and compiled token pattern.
#[derive(Debug, Clone)]
pub struct Grammar {
    scheme: String,
    example: String,
    prefix: String,
    pattern: Regex,
}

impl Grammar {
    /// Build a grammar for `scheme`. `example` is echoed in error messages.
    pub fn new(scheme: &str, example: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            "{}://[{}]+",
            regex::escape(scheme),
            TOKEN_CLASS
        ))?;
        Ok(Self {
            scheme: scheme.to_string(),
            example: example.to_string(),
            prefix: format!("{scheme}://"),
            pattern,
        })
    }

    /// The scheme literal, without `://`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Example reference used in error messages.
    pub fn example(&self) -> &str {
        &self.example
    }

    /// `scheme://`, the literal every reference starts with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Find the next token in `haystack`, as a byte range.
    pub fn find(&self, haystack: &[u8]) -> Option<Range<usize>> {
        self.pattern.find(haystack).map(|m| m.range())
    }

    /// Whether a structured scalar value should be treated as a reference.
    ///
    /// Only the trimmed value's prefix is checked; whether the rest is a
    /// well-formed token is up to the parser.
    pub fn is_candidate(&self, value: &str) -> bool {
        value.trim().starts_with(&self.prefix)
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new(SCHEME, EXAMPLE).expect("built-in reference pattern compiles")
    }
}
