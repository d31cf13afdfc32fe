//! s3-presign library: rewrite `s3-presign://` references into presigned URLs.
//!
//! A reference names a bucket and object key, optionally with a method, an
//! endpoint override, extra query parameters and an expiry. The crate finds
//! references in free text ([`text`]) or in YAML scalars ([`yaml`]), parses
//! them ([`reference`]) and replaces each with a SigV4 presigned URL
//! ([`signer`], [`presigner`]). Everything that is not a reference passes
//! through unchanged.

pub mod config;
pub mod document;
pub mod duration;
pub mod errors;
pub mod grammar;
pub mod input;
pub mod presigner;
pub mod reference;
pub mod sigv4;
pub mod signer;
pub mod text;
pub mod yaml;

pub use errors::PresignError;
pub use grammar::Grammar;
pub use reference::Reference;
pub use signer::Signer;
