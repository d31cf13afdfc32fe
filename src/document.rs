//! YAML node trees that remember where every scalar came from.
//!
//! [`load_stream`] splits a YAML stream into [`Document`]s, each holding
//! its own slice of the source text and a node tree built from the parser's
//! marked events. Scalars keep their quoting style and source position, so
//! [`Document::render`] can re-emit the original text with only rewritten
//! scalars spliced in: comments, anchors, tags, indentation and quoting of
//! every other node come out byte-for-byte.

use std::iter;
use std::ops::Range;

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use crate::errors::PresignError;

/// How a scalar was written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

impl From<TScalarStyle> for ScalarStyle {
    fn from(style: TScalarStyle) -> Self {
        match style {
            TScalarStyle::SingleQuoted => ScalarStyle::SingleQuoted,
            TScalarStyle::DoubleQuoted => ScalarStyle::DoubleQuoted,
            TScalarStyle::Literal => ScalarStyle::Literal,
            TScalarStyle::Plain => ScalarStyle::Plain,
            _ => ScalarStyle::Folded,
        }
    }
}

/// A scalar leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    value: String,
    original: String,
    style: ScalarStyle,
    /// Byte offset in the whole stream: the opening quote of quoted scalars,
    /// the first body character of block scalars.
    start: usize,
    modified: bool,
}

impl Scalar {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn style(&self) -> ScalarStyle {
        self.style
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Replace the value. Style and position are left alone.
    pub fn set_value(&mut self, value: String) {
        self.value = value;
        self.modified = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(Vec<(Node, Node)>),
    /// Reference to the node registered under this anchor id.
    Alias(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Anchor id assigned by the parser, if the node is anchored.
    pub anchor: Option<usize>,
}

impl Node {
    fn new(kind: NodeKind, anchor: usize) -> Self {
        Self {
            kind,
            anchor: (anchor != 0).then_some(anchor),
        }
    }

    fn null(start: usize) -> Self {
        Self::new(
            NodeKind::Scalar(Scalar {
                value: String::new(),
                original: String::new(),
                style: ScalarStyle::Plain,
                start,
                modified: false,
            }),
            0,
        )
    }
}

/// One top-level document and the slice of the stream it was parsed from.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Node,
    text: String,
    offset: usize,
}

impl Document {
    /// Source text of this document, including its `---` marker and any
    /// comments that follow it up to the next document.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Every scalar in pre-order (mapping keys before their values),
    /// walked with an explicit stack. Aliases are not followed.
    pub fn scalars_mut(&mut self) -> Vec<&mut Scalar> {
        let mut out = Vec::new();
        let mut stack: Vec<&mut Node> = vec![&mut self.root];
        while let Some(Node { kind, .. }) = stack.pop() {
            match kind {
                NodeKind::Scalar(scalar) => out.push(scalar),
                NodeKind::Sequence(items) => stack.extend(items.iter_mut().rev()),
                NodeKind::Mapping(entries) => {
                    for (key, value) in entries.iter_mut().rev() {
                        stack.push(value);
                        stack.push(key);
                    }
                }
                NodeKind::Alias(_) => {}
            }
        }
        out
    }

    /// Every scalar in pre-order, read-only.
    pub fn scalars(&self) -> Vec<&Scalar> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = vec![&self.root];
        while let Some(Node { kind, .. }) = stack.pop() {
            match kind {
                NodeKind::Scalar(scalar) => out.push(scalar),
                NodeKind::Sequence(items) => stack.extend(items.iter().rev()),
                NodeKind::Mapping(entries) => {
                    for (key, value) in entries.iter().rev() {
                        stack.push(value);
                        stack.push(key);
                    }
                }
                NodeKind::Alias(_) => {}
            }
        }
        out
    }

    /// Re-emit the document with modified scalars written back in their
    /// original style.
    pub fn render(&self) -> Result<String, PresignError> {
        let mut edits = self
            .scalars()
            .into_iter()
            .filter(|s| s.is_modified())
            .map(|s| self.splice(s))
            .collect::<Result<Vec<_>, _>>()?;
        edits.sort_by_key(|(range, _)| range.start);

        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for (range, replacement) in edits {
            if range.start < cursor {
                return Err(encode_error("overlapping scalar rewrites"));
            }
            out.push_str(&self.text[cursor..range.start]);
            out.push_str(&replacement);
            cursor = range.end;
        }
        out.push_str(&self.text[cursor..]);
        Ok(out)
    }

    /// Locate `scalar` in the document text and render its new value.
    fn splice(&self, scalar: &Scalar) -> Result<(Range<usize>, String), PresignError> {
        let start = scalar
            .start
            .checked_sub(self.offset)
            .filter(|s| self.text.is_char_boundary(*s))
            .ok_or_else(|| encode_error("scalar position outside its document"))?;
        let tail = &self.text[start..];
        let value = scalar.value.as_str();

        match scalar.style {
            ScalarStyle::Plain => {
                if !tail.starts_with(scalar.original.as_str()) {
                    return Err(encode_error(format!(
                        "plain scalar {:?} not found at its position",
                        scalar.original
                    )));
                }
                let replacement = if is_plain_safe(value) {
                    value.to_string()
                } else {
                    double_quoted(value)
                };
                Ok((start..start + scalar.original.len(), replacement))
            }
            ScalarStyle::SingleQuoted => {
                let end = closing_single_quote(tail)
                    .ok_or_else(|| encode_error("unterminated single-quoted scalar"))?;
                let replacement = if value.contains(['\n', '\r']) {
                    double_quoted(value)
                } else {
                    format!("'{}'", value.replace('\'', "''"))
                };
                Ok((start..start + end + 1, replacement))
            }
            ScalarStyle::DoubleQuoted => {
                let end = closing_double_quote(tail)
                    .ok_or_else(|| encode_error("unterminated double-quoted scalar"))?;
                Ok((start..start + end + 1, double_quoted(value)))
            }
            ScalarStyle::Literal | ScalarStyle::Folded => {
                if value.contains(['\n', '\r']) {
                    return Err(encode_error("multi-line value in block scalar"));
                }
                // The parser marks the first body character; step over the
                // header line should the mark sit on the indicator instead.
                let body_start = if tail.starts_with(['|', '>']) {
                    tail.find('\n')
                        .ok_or_else(|| encode_error("block scalar without a body"))?
                } else {
                    0
                };
                let body = &tail[body_start..];
                let needle = scalar.original.trim();
                let found = body
                    .find(needle)
                    .filter(|idx| body[..*idx].trim().is_empty())
                    .ok_or_else(|| encode_error("block scalar content not found"))?;
                let at = start + body_start + found;
                Ok((at..at + needle.len(), value.to_string()))
            }
        }
    }
}

/// Parse a (possibly multi-document) YAML stream.
pub fn load_stream(source: &str) -> Result<Vec<Document>, PresignError> {
    let mut builder = TreeBuilder::new(source);
    let mut parser = Parser::new(source.chars());
    parser.load(&mut builder, true)?;
    Ok(builder.finish(source))
}

// ── Tree construction ───────────────────────────────────────────────

struct TreeBuilder {
    /// Byte offset of every char index, plus the total length.
    char_offsets: Vec<usize>,
    /// `(start byte, root)` per document.
    documents: Vec<(usize, Option<Node>)>,
    /// Open containers, each with a pending mapping key.
    stack: Vec<(Node, Option<Node>)>,
}

impl TreeBuilder {
    fn new(source: &str) -> Self {
        let char_offsets = source
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(iter::once(source.len()))
            .collect();
        Self {
            char_offsets,
            documents: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn byte_offset(&self, mark: &Marker) -> usize {
        self.char_offsets
            .get(mark.index())
            .or(self.char_offsets.last())
            .copied()
            .unwrap_or(0)
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some((parent, pending_key)) => match &mut parent.kind {
                NodeKind::Sequence(items) => items.push(node),
                NodeKind::Mapping(entries) => match pending_key.take() {
                    Some(key) => entries.push((key, node)),
                    None => *pending_key = Some(node),
                },
                NodeKind::Scalar(_) | NodeKind::Alias(_) => {}
            },
            None => {
                if let Some((_, root)) = self.documents.last_mut() {
                    *root = Some(node);
                }
            }
        }
    }

    fn finish(self, source: &str) -> Vec<Document> {
        let starts: Vec<usize> = self.documents.iter().map(|(start, _)| *start).collect();
        self.documents
            .into_iter()
            .enumerate()
            .map(|(i, (start, root))| {
                let end = starts.get(i + 1).copied().unwrap_or(source.len());
                Document {
                    root: root.unwrap_or_else(|| Node::null(start)),
                    text: source[start..end].to_string(),
                    offset: start,
                }
            })
            .collect()
    }
}

impl MarkedEventReceiver for TreeBuilder {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        let start = self.byte_offset(&mark);
        match ev {
            Event::DocumentStart { .. } => {
                // Anything before the first document (comments, directives)
                // travels with it.
                let start = if self.documents.is_empty() { 0 } else { start };
                self.documents.push((start, None));
            }
            Event::Scalar(value, style, anchor, ..) => {
                let scalar = Scalar {
                    original: value.clone(),
                    value,
                    style: style.into(),
                    start,
                    modified: false,
                };
                self.attach(Node::new(NodeKind::Scalar(scalar), anchor));
            }
            Event::Alias(id) => self.attach(Node::new(NodeKind::Alias(id), 0)),
            Event::SequenceStart(anchor, ..) => self
                .stack
                .push((Node::new(NodeKind::Sequence(Vec::new()), anchor), None)),
            Event::MappingStart(anchor, ..) => self
                .stack
                .push((Node::new(NodeKind::Mapping(Vec::new()), anchor), None)),
            Event::SequenceEnd | Event::MappingEnd => {
                if let Some((node, _)) = self.stack.pop() {
                    self.attach(node);
                }
            }
            _ => {}
        }
    }
}

// ── Scalar rendering ────────────────────────────────────────────────

fn encode_error(message: impl Into<String>) -> PresignError {
    PresignError::Encode {
        message: message.into(),
    }
}

/// Index of the quote closing a single-quoted scalar that starts `tail`.
fn closing_single_quote(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Index of the quote closing a double-quoted scalar that starts `tail`.
fn closing_double_quote(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Whether `value` can be written as a plain scalar in any context.
fn is_plain_safe(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return false;
    };
    !first.is_whitespace()
        && !value.ends_with(char::is_whitespace)
        && !"-?:,[]{}#&*!|>'\"%@`".contains(first)
        && !value.ends_with(':')
        && !value.contains(": ")
        && !value.contains(" #")
        && !value
            .chars()
            .any(|c| c.is_control() || matches!(c, ',' | '[' | ']' | '{' | '}'))
}

// ── Tests ───────────────────────────────────────────────────────────
