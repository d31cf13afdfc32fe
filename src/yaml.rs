//! Structured-document substitution for YAML streams.
//!
//! Only scalars whose whole (trimmed) value is a reference are rewritten.
//! The rest of the stream, comments and formatting included, is written
//! back exactly as read.

use std::io::{Read, Write};

use tracing::{debug, info};

use crate::document::{self, Document};
use crate::errors::PresignError;
use crate::grammar::Grammar;
use crate::reference;
use crate::signer::Signer;

/// Rewrites reference scalars inside YAML documents.
pub struct YamlSubstitutor<'a> {
    grammar: &'a Grammar,
    signer: &'a Signer,
}

impl<'a> YamlSubstitutor<'a> {
    pub fn new(grammar: &'a Grammar, signer: &'a Signer) -> Self {
        Self { grammar, signer }
    }

    /// Rewrite every candidate scalar in `doc`, in document order. Returns
    /// the number of scalars replaced.
    pub fn process_document(&self, doc: &mut Document) -> Result<usize, PresignError> {
        let mut count = 0;
        for scalar in doc.scalars_mut() {
            if !self.grammar.is_candidate(scalar.value()) {
                continue;
            }
            let parsed = reference::parse(self.grammar, scalar.value().trim())?;
            let signed = self.signer.sign(parsed)?;
            scalar.set_value(signed);
            count += 1;
        }
        Ok(count)
    }

    /// Read the whole stream, rewrite each document and write the result.
    /// Nothing is written if the stream is not UTF-8 or any document fails
    /// to parse.
    pub fn process_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> Result<usize, PresignError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let source = String::from_utf8(bytes)?;

        let mut documents = document::load_stream(&source)?;
        if documents.is_empty() {
            writer.write_all(source.as_bytes())?;
            writer.flush()?;
            return Ok(0);
        }

        let mut total = 0;
        for (i, doc) in documents.iter_mut().enumerate() {
            let count = self.process_document(doc)?;
            debug!("Document {}: replaced {} references", i, count);
            total += count;
            writer.write_all(doc.render()?.as_bytes())?;
        }
        writer.flush()?;
        info!(
            "Replaced {} references in {} YAML documents",
            total,
            documents.len()
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presigner::Presign;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    /// Deterministic presigner; counts its calls.
    struct FakePresigner {
        calls: Rc<Cell<usize>>,
    }

    impl Presign for FakePresigner {
        fn presign(
            &self,
            method: &str,
            bucket: &str,
            key: &str,
            expiry: Duration,
            _extra_query: &[(String, String)],
        ) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(format!(
                "https://signed.test/{bucket}/{key}?m={method}&e={}",
                expiry.as_secs()
            ))
        }
    }

    fn run(input: &str) -> Result<(String, usize), PresignError> {
        run_counting(input).map(|(out, count, _)| (out, count))
    }

    fn run_counting(input: &str) -> Result<(String, usize, usize), PresignError> {
        let calls = Rc::new(Cell::new(0));
        let grammar = Grammar::default();
        let signer = Signer::new(Box::new(FakePresigner {
            calls: calls.clone(),
        }));
        let substitutor = YamlSubstitutor::new(&grammar, &signer);
        let mut out = Vec::new();
        let count = substitutor.process_stream(input.as_bytes(), &mut out)?;
        Ok((String::from_utf8(out).unwrap(), count, calls.get()))
    }

    // ── Pass-through ────────────────────────────────────────────────

    #[test]
    fn test_passthrough_is_byte_identical() {
        let input = "# top comment\n\
                     service:\n  name: web   # inline\n  ports: [80, 443]\n\
                     base: &base {a: 1}\nderived:\n  <<: *base\n\
                     ---\n- 'quoted'\n- \"double\"\n- |\n  block\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(out, input);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_comment_only_stream_is_copied() {
        let input = "# nothing here\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(out, input);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_empty_stream() {
        let (out, count) = run("").unwrap();
        assert_eq!(out, "");
        assert_eq!(count, 0);
    }

    // ── Rewriting ───────────────────────────────────────────────────

    #[test]
    fn test_double_quoted_value_keeps_quotes() {
        let (out, count) = run("{url: \"s3-presign://get@my-bucket/path/to/object\"}\n").unwrap();
        assert_eq!(
            out,
            "{url: \"https://signed.test/my-bucket/path/to/object?m=GET&e=3600\"}\n"
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_plain_and_single_quoted_values() {
        let input = "# assets\na: s3-presign://b/one  # first\nb: 's3-presign://put@b/two#expires=5m'\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(
            out,
            "# assets\na: https://signed.test/b/one?m=GET&e=3600  # first\n\
             b: 'https://signed.test/b/two?m=PUT&e=300'\n"
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_literal_block_scalar() {
        let input = "script: |\n  s3-presign://b/run.sh\nnext: 1\n";
        let (out, _) = run(input).unwrap();
        assert_eq!(
            out,
            "script: |\n  https://signed.test/b/run.sh?m=GET&e=3600\nnext: 1\n"
        );
    }

    #[test]
    fn test_block_scalar_styles() {
        let input = "a: |\n  x\nk: |-\n  s3-presign://b/k\nf: >\n  s3-presign://b/f\n\n\
                     w: |2\n    s3-presign://b/w\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(
            out,
            "a: |\n  x\nk: |-\n  https://signed.test/b/k?m=GET&e=3600\n\
             f: >\n  https://signed.test/b/f?m=GET&e=3600\n\n\
             w: |2\n    https://signed.test/b/w?m=GET&e=3600\n"
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn test_multibyte_text_before_reference() {
        let input = "název: s3-presign://b/k # poznámka\nemoji: \"🙂 ok\"\nnext: 's3-presign://b/j'\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(
            out,
            "název: https://signed.test/b/k?m=GET&e=3600 # poznámka\nemoji: \"🙂 ok\"\n\
             next: 'https://signed.test/b/j?m=GET&e=3600'\n"
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_sequence_items_and_padding() {
        let input = "files:\n  - s3-presign://b/1\n  - \"  s3-presign://b/2  \"\n  - other\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(
            out,
            "files:\n  - https://signed.test/b/1?m=GET&e=3600\n  \
             - \"https://signed.test/b/2?m=GET&e=3600\"\n  - other\n"
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_mapping_key_is_rewritten() {
        let (out, count) = run("s3-presign://b/key: value\n").unwrap();
        assert_eq!(out, "https://signed.test/b/key?m=GET&e=3600: value\n");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_anchor_rewritten_alias_untouched() {
        let input = "first: &ref s3-presign://b/k\nsecond: *ref\n";
        let (out, count, calls) = run_counting(input).unwrap();
        assert_eq!(
            out,
            "first: &ref https://signed.test/b/k?m=GET&e=3600\nsecond: *ref\n"
        );
        assert_eq!(count, 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_partial_scalar_is_not_rewritten() {
        let input = "note: prefix s3-presign://bucket/key suffix\n";
        let (out, count, calls) = run_counting(input).unwrap();
        assert_eq!(out, input);
        assert_eq!(count, 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_multi_document_stream() {
        let input = "a: s3-presign://b/1\n---\n# second\nb: s3-presign://b/2\n...\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(
            out,
            "a: https://signed.test/b/1?m=GET&e=3600\n---\n# second\n\
             b: https://signed.test/b/2?m=GET&e=3600\n...\n"
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_repeat_runs_are_identical() {
        let input = "x: s3-presign://b/k#expires=90s\ny:\n- s3-presign://b/j\n";
        let first = run(input).unwrap();
        let second = run(input).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.0,
            "x: https://signed.test/b/k?m=GET&e=90\ny:\n- https://signed.test/b/j?m=GET&e=3600\n"
        );
    }

    // ── Errors ──────────────────────────────────────────────────────

    #[test]
    fn test_malformed_candidate_aborts() {
        let err = run("ok: s3-presign://b/k\nbad: s3-presign://get@/no-bucket\n").unwrap_err();
        assert_eq!(err.code(), "MissingBucket");
    }

    #[test]
    fn test_wrong_scheme_is_not_a_candidate() {
        let input = "x: s3://bucket/key\n";
        let (out, count) = run(input).unwrap();
        assert_eq!(out, input);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_multiline_plain_candidate_is_malformed() {
        let err = run("k: s3-presign://b/k\n  continued\n").unwrap_err();
        assert_eq!(err.code(), "MalformedToken");
    }

    fn run_bytes_expecting_error(input: &[u8]) -> (PresignError, Vec<u8>) {
        let grammar = Grammar::default();
        let signer = Signer::new(Box::new(FakePresigner {
            calls: Rc::new(Cell::new(0)),
        }));
        let substitutor = YamlSubstitutor::new(&grammar, &signer);
        let mut out = Vec::new();
        let err = substitutor.process_stream(input, &mut out).unwrap_err();
        (err, out)
    }

    #[test]
    fn test_decode_error_writes_nothing() {
        let (err, out) =
            run_bytes_expecting_error(b"a: s3-presign://b/k\n---\nb: [unterminated\n");
        assert_eq!(err.code(), "DecodeError");
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let (err, out) = run_bytes_expecting_error(b"a: s3-presign://b/k\nb: caf\xe9\n");
        assert_eq!(err.code(), "DecodeError");
        assert!(out.is_empty());
    }
}
