//! Text-stream substitution.
//!
//! Every line is scanned left to right for reference tokens; each token is
//! parsed, signed, and replaced while the bytes around it pass through
//! untouched. Lines keep their original terminator.

use std::io::{BufRead, Write};

use tracing::info;

use crate::errors::PresignError;
use crate::grammar::Grammar;
use crate::reference;
use crate::signer::Signer;

/// Rewrites references found anywhere in line-oriented text.
pub struct TextSubstitutor<'a> {
    grammar: &'a Grammar,
    signer: &'a Signer,
}

impl<'a> TextSubstitutor<'a> {
    pub fn new(grammar: &'a Grammar, signer: &'a Signer) -> Self {
        Self { grammar, signer }
    }

    /// Rewrite every reference in `line`, which must not include its
    /// terminator.
    pub fn process_line(&self, line: &[u8]) -> Result<Vec<u8>, PresignError> {
        let mut out = Vec::with_capacity(line.len());
        self.write_line(line, &mut out)?;
        Ok(out)
    }

    /// Rewrite `reader` into `writer` line by line. Returns the number of
    /// references replaced.
    pub fn process_stream<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> Result<usize, PresignError> {
        let mut total = 0;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let (body, terminator) = split_terminator(&buf);
            total += self.write_line(body, &mut writer)?;
            writer.write_all(terminator)?;
        }
        writer.flush()?;
        info!("Replaced {} references in text stream", total);
        Ok(total)
    }

    fn write_line<W: Write>(&self, line: &[u8], out: &mut W) -> Result<usize, PresignError> {
        let mut count = 0;
        let mut rest = line;
        while let Some(range) = self.grammar.find(rest) {
            out.write_all(&rest[..range.start])?;

            // The token class is pure ASCII.
            let token = String::from_utf8_lossy(&rest[range.clone()]);
            let parsed = reference::parse(self.grammar, &token)?;
            out.write_all(self.signer.sign(parsed)?.as_bytes())?;
            count += 1;

            rest = &rest[range.end..];
        }
        out.write_all(rest)?;
        Ok(count)
    }
}

/// Split a line into its body and its `\n` / `\r\n` terminator.
fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") {
        line.split_at(line.len() - 1)
    } else {
        (line, &line[line.len()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presigner::Presign;
    use std::time::Duration;

    /// Deterministic presigner that encodes its inputs into the URL.
    struct FakePresigner;

    impl Presign for FakePresigner {
        fn presign(
            &self,
            method: &str,
            bucket: &str,
            key: &str,
            expiry: Duration,
            extra_query: &[(String, String)],
        ) -> anyhow::Result<String> {
            if bucket == "deny" {
                anyhow::bail!("access denied");
            }
            let mut url = format!(
                "https://signed.test/{bucket}/{key}?m={method}&e={}",
                expiry.as_secs()
            );
            for (k, v) in extra_query {
                url.push_str(&format!("&{k}={v}"));
            }
            Ok(url)
        }
    }

    fn run(input: &[u8]) -> Result<(String, usize), PresignError> {
        let grammar = Grammar::default();
        let signer = Signer::new(Box::new(FakePresigner));
        let substitutor = TextSubstitutor::new(&grammar, &signer);
        let mut out = Vec::new();
        let count = substitutor.process_stream(input, &mut out)?;
        Ok((String::from_utf8(out).unwrap(), count))
    }

    #[test]
    fn test_passthrough_without_references() {
        let input = "plain text\r\n  indented: s3://not-ours/key\n\nlast line without newline";
        let (out, count) = run(input.as_bytes()).unwrap();
        assert_eq!(out, input);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_passthrough_non_utf8_bytes() {
        let input: &[u8] = b"caf\xe9 s3-presign://b/k \xff\n";
        let grammar = Grammar::default();
        let signer = Signer::new(Box::new(FakePresigner));
        let substitutor = TextSubstitutor::new(&grammar, &signer);
        let mut out = Vec::new();
        substitutor.process_stream(input, &mut out).unwrap();
        assert_eq!(
            out,
            b"caf\xe9 https://signed.test/b/k?m=GET&e=3600 \xff\n".to_vec()
        );
    }

    #[test]
    fn test_token_isolation() {
        let (out, count) = run(b"curl \"s3-presign://get@my-bucket/path/to/object\" -o out\n").unwrap();
        assert_eq!(
            out,
            "curl \"https://signed.test/my-bucket/path/to/object?m=GET&e=3600\" -o out\n"
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_multiple_tokens_per_line() {
        let (out, count) =
            run(b"a=s3-presign://b1/k1#expires=1m, b=s3-presign://put@b2/k2?x=y;end").unwrap();
        assert_eq!(
            out,
            "a=https://signed.test/b1/k1?m=GET&e=60, b=https://signed.test/b2/k2?m=PUT&e=3600&x=y;end"
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_adjacent_tokens_split_on_non_class_char() {
        let (out, _) = run(b"s3-presign://a/1,s3-presign://b/2").unwrap();
        assert_eq!(
            out,
            "https://signed.test/a/1?m=GET&e=3600,https://signed.test/b/2?m=GET&e=3600"
        );
    }

    #[test]
    fn test_inner_token_in_larger_text_is_replaced() {
        let (out, _) = run(b"prefix s3-presign://bucket/key suffix").unwrap();
        assert_eq!(out, "prefix https://signed.test/bucket/key?m=GET&e=3600 suffix");
    }

    #[test]
    fn test_terminators_are_preserved_per_line() {
        let (out, count) = run(b"s3-presign://b/1\r\ns3-presign://b/2\ns3-presign://b/3").unwrap();
        assert_eq!(
            out,
            "https://signed.test/b/1?m=GET&e=3600\r\n\
             https://signed.test/b/2?m=GET&e=3600\n\
             https://signed.test/b/3?m=GET&e=3600"
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn test_process_line() {
        let grammar = Grammar::default();
        let signer = Signer::new(Box::new(FakePresigner));
        let substitutor = TextSubstitutor::new(&grammar, &signer);
        let out = substitutor.process_line(b"x s3-presign://b/k y").unwrap();
        assert_eq!(out, b"x https://signed.test/b/k?m=GET&e=3600 y".to_vec());
    }

    #[test]
    fn test_parse_error_aborts() {
        let err = run(b"ok s3-presign://b/k\nbad s3-presign://get@/missing-bucket\n").unwrap_err();
        assert_eq!(err.code(), "MissingBucket");
    }

    #[test]
    fn test_invalid_duration_aborts() {
        let err = run(b"s3-presign://get@bucket/obj#expires=notaduration").unwrap_err();
        assert_eq!(err.code(), "InvalidDuration");
    }

    #[test]
    fn test_sign_error_aborts() {
        let err = run(b"s3-presign://deny/key\n").unwrap_err();
        assert_eq!(err.code(), "SignError");
    }
}
