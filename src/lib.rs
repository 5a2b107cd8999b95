//! A CommonMark parsing engine with a bundled HTML renderer.
//!
//! Parsing runs in two phases: the block parser consumes the whole source
//! line by line, building the block tree and the link reference table, and
//! only then is each leaf block's raw text handed to the inline parser.
//! That ordering is what lets a reference-style link cite a definition that
//! appears later in the document.
//!
//! The parsed [`ast::Document`] exposes a depth-first visitor
//! ([`ast::Document::traverse`]) that renderers consume; the bundled
//! [`renderer::HtmlRenderer`] is one such consumer. Parsing never fails:
//! malformed input degrades to literal text, byte for byte.

pub mod ast;
mod inline;
pub mod parser;
pub mod renderer;
pub mod scanners;

use ast::{Document, InlineValue};
use parser::Parser;
use renderer::HtmlRenderer;

/// What an extension block rule recognized at the start of a line. The
/// vocabulary is limited to existing leaf kinds so extensions cannot smuggle
/// unknown tags past the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSeed {
    /// The line is a thematic break; the rest of it is consumed.
    ThematicBreak,
    /// The line opens a heading; `text_start` is the byte offset of the
    /// heading text within the tested slice.
    Heading { level: u8, text_start: usize },
}

/// Read-only view of the inline parser's position, handed to extension
/// inline rules.
#[derive(Debug, Clone, Copy)]
pub struct InlineCursor<'a> {
    /// The full inline text of the block being parsed.
    pub text: &'a str,
    /// Byte offset of the trigger character.
    pub pos: usize,
}

impl<'a> InlineCursor<'a> {
    /// The text from the trigger character onward.
    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }
}

/// An extension block-start test, tried (in registration order) before the
/// built-in leaf rules on every non-indented line.
pub trait BlockRule {
    /// `line` starts at the first non-space column and excludes the line
    /// ending. Returns what the line opens, or `None` to fall through.
    fn try_start(&self, line: &str) -> Option<BlockSeed>;
}

/// An extension inline handler for a single trigger character, tried before
/// the built-in handler for that character.
pub trait InlineRule {
    /// The byte value this rule wants to be dispatched on.
    fn trigger(&self) -> u8;

    /// Attempt to consume input at the cursor. On success returns the
    /// finished inline and the number of bytes consumed (which must be
    /// non-zero); `None` falls through to the built-in behavior.
    fn try_handle(&self, cursor: InlineCursor<'_>) -> Option<(InlineValue, usize)>;
}

/// Registry of extension rules. Empty by default; the built-in CommonMark
/// rules are always active.
#[derive(Default)]
pub struct ExtensionSet {
    block_rules: Vec<Box<dyn BlockRule>>,
    inline_rules: Vec<Box<dyn InlineRule>>,
}

impl ExtensionSet {
    pub fn register_block_rule(&mut self, rule: Box<dyn BlockRule>) {
        self.block_rules.push(rule);
    }

    pub fn register_inline_rule(&mut self, rule: Box<dyn InlineRule>) {
        self.inline_rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.block_rules.is_empty() && self.inline_rules.is_empty()
    }

    pub(crate) fn try_block_start(&self, line: &str) -> Option<BlockSeed> {
        self.block_rules.iter().find_map(|rule| rule.try_start(line))
    }

    /// Per-character dispatch table for the registered inline rules,
    /// compiled once per inline-parse setup.
    pub(crate) fn inline_trigger_table(&self) -> [bool; 256] {
        let mut table = [false; 256];
        for rule in &self.inline_rules {
            table[rule.trigger() as usize] = true;
        }
        table
    }

    pub(crate) fn try_inline(
        &self,
        trigger: u8,
        cursor: InlineCursor<'_>,
    ) -> Option<(InlineValue, usize)> {
        self.inline_rules
            .iter()
            .filter(|rule| rule.trigger() == trigger)
            .find_map(|rule| rule.try_handle(cursor))
    }
}

// Rules are trait objects, so only the counts are reportable.
impl std::fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionSet")
            .field("block_rules", &self.block_rules.len())
            .field("inline_rules", &self.inline_rules.len())
            .finish()
    }
}

/// Parser settings. `Default` is the plain CommonMark configuration.
#[derive(Debug)]
pub struct Options {
    /// Record a `SourceSpan` on every node.
    pub track_source_positions: bool,
    /// Tab-stop width used when expanding tabs for indentation.
    pub tab_stop: usize,
    /// Extension registry (block-start tests and inline handlers).
    pub extensions: ExtensionSet,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            track_source_positions: false,
            tab_stop: 4,
            extensions: ExtensionSet::default(),
        }
    }
}

/// Parse markdown into a document tree. Never fails; malformed constructs
/// degrade to literal text.
pub fn parse_document(input: &str, options: &Options) -> Document {
    Parser::new(input, options).parse()
}

/// Parse markdown text and render to HTML with default options.
pub fn markdown_to_html(input: &str) -> String {
    markdown_to_html_with_options(input, &Options::default())
}

/// Parse markdown text and render to HTML.
pub fn markdown_to_html_with_options(input: &str, options: &Options) -> String {
    let document = parse_document(input, options);
    HtmlRenderer::new().render(&document)
}
