/// Block-structure parsing
///
/// Phase one of the pipeline. Source text is consumed line by line; each
/// line first re-matches the spine of open blocks, then may open new ones,
/// and finally lands as text in the deepest open leaf. Closing a paragraph
/// extracts leading link reference definitions into the reference table, so
/// the table is complete before any inline parsing starts.
use crate::ast::{
    BlockArena, BlockId, BlockValue, Document, InlineArena, LineSpan, ListData, ListKind,
    SourceSpan, StringContent,
};
use crate::inline;
use crate::scanners;
use crate::{BlockSeed, Options};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_casefold::UnicodeCaseFold;

/// Columns of indentation that turn a line into indented code.
pub(crate) const CODE_INDENT: usize = 4;

/// Containers deeper than this cannot open further list items.
const MAX_LIST_DEPTH: usize = 100;

/// A link reference definition: destination plus optional title (empty when
/// absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    pub title: String,
}

/// Reference table built during block parsing. Keys are normalized labels;
/// the first definition of a label wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefMap {
    map: BTreeMap<String, Reference>,
}

/// Outcome of a reference lookup. `Invalid` means the label itself is
/// unusable (empty once normalized, or over the length cap), as opposed to a
/// well-formed label that simply was never defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefLookup<'a> {
    Found(&'a Reference),
    NoSuchLabel,
    Invalid,
}

impl RefMap {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn insert(&mut self, raw_label: &str, reference: Reference) {
        let key = normalize_label(raw_label);
        if key.is_empty() {
            return;
        }
        self.map.entry(key).or_insert(reference);
    }

    pub fn lookup(&self, raw_label: &str) -> RefLookup<'_> {
        if raw_label.len() > scanners::MAX_LINK_LABEL_LENGTH {
            return RefLookup::Invalid;
        }
        let key = normalize_label(raw_label);
        if key.is_empty() {
            return RefLookup::Invalid;
        }
        match self.map.get(&key) {
            Some(reference) => RefLookup::Found(reference),
            None => RefLookup::NoSuchLabel,
        }
    }
}

/// Collapse internal whitespace runs to single spaces, trim the ends, and
/// apply Unicode case folding.
pub(crate) fn normalize_label(raw_label: &str) -> String {
    let mut collapsed = String::with_capacity(raw_label.len());
    let mut pending_space = false;
    for c in raw_label.chars() {
        if c.is_whitespace() {
            if !collapsed.is_empty() {
                pending_space = true;
            }
        } else {
            if pending_space {
                collapsed.push(' ');
                pending_space = false;
            }
            collapsed.push(c);
        }
    }
    collapsed.chars().case_fold().collect()
}

fn unwrap_into<T>(t: Option<T>, out: &mut T) -> bool {
    match t {
        Some(v) => {
            *out = v;
            true
        }
        None => false,
    }
}

fn unwrap_into_2<T, U>(tu: Option<(T, U)>, out_t: &mut T, out_u: &mut U) -> bool {
    match tu {
        Some((t, u)) => {
            *out_t = t;
            *out_u = u;
            true
        }
        None => false,
    }
}

/// Byte at `i`, with everything past the slice reading as a line feed so
/// that end-of-input behaves like an implicit line ending.
fn byte_at(line: &str, i: usize) -> u8 {
    line.as_bytes().get(i).copied().unwrap_or(b'\n')
}

/// Whitespace as list markers see it (space, tab, or any line end).
fn is_marker_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | 0x0b | 0x0c | b'\n' | b'\r')
}

/// Length of the line without its trailing line ending.
fn line_content_end(line: &str) -> usize {
    let bytes = line.as_bytes();
    let mut end = bytes.len();
    while end > 0 && scanners::is_line_end_char(bytes[end - 1]) {
        end -= 1;
    }
    end
}

/// New end index after removing an ATX closing sequence: trailing `#`s
/// preceded by a space or tab (or spanning the whole text), plus any
/// trailing whitespace.
fn chop_closing_hashes(line: &str, end: usize) -> usize {
    let bytes = line.as_bytes();
    let mut end = end;
    while end > 0 && scanners::is_space_or_tab(bytes[end - 1]) {
        end -= 1;
    }
    let orig = end;
    let mut n = end;
    while n > 0 && bytes[n - 1] == b'#' {
        n -= 1;
    }
    if n != orig && (n == 0 || scanners::is_space_or_tab(bytes[n - 1])) {
        while n > 0 && scanners::is_space_or_tab(bytes[n - 1]) {
            n -= 1;
        }
        n
    } else {
        end
    }
}

/// Drop trailing blank lines from an indented code literal.
fn remove_trailing_blank_lines(s: &mut String) {
    let bytes = s.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        let b = bytes[i - 1];
        if !scanners::is_space_or_tab(b) && !scanners::is_line_end_char(b) {
            break;
        }
        i -= 1;
    }
    if i == 0 {
        s.clear();
        return;
    }
    let cut = s.as_bytes()[i..]
        .iter()
        .position(|&b| scanners::is_line_end_char(b))
        .map(|p| i + p);
    if let Some(cut) = cut {
        s.truncate(cut);
    }
}

/// Drop the first `n` rebuilt bytes from a block's accumulated content,
/// keeping the remaining spans pointed at the source.
fn trim_span_prefix(content: &mut StringContent, mut n: usize) {
    let mut drop = 0;
    for span in content.spans.iter_mut() {
        let len = span.pad + (span.end - span.start) + 1;
        if n >= len {
            n -= len;
            drop += 1;
            if n == 0 {
                break;
            }
        } else {
            if n <= span.pad {
                span.pad -= n;
            } else {
                span.start += n - span.pad;
                span.pad = 0;
            }
            break;
        }
    }
    content.spans.drain(..drop);
}

/// List marker at `pos`: a bullet or an ordered marker of at most nine
/// digits, followed by whitespace. Returns the marker length and the list
/// data it implies. A marker that would interrupt a paragraph must have
/// content after it, and an ordered one must start at 1.
fn parse_list_marker(
    line: &str,
    pos: usize,
    interrupts_paragraph: bool,
) -> Option<(usize, ListData)> {
    let startpos = pos;
    let mut pos = pos;
    let c = byte_at(line, pos);

    if c == b'*' || c == b'-' || c == b'+' {
        pos += 1;
        if !is_marker_space(byte_at(line, pos)) {
            return None;
        }
        if interrupts_paragraph {
            let mut i = pos;
            while scanners::is_space_or_tab(byte_at(line, i)) {
                i += 1;
            }
            if scanners::is_line_end_char(byte_at(line, i)) {
                return None;
            }
        }
        return Some((
            pos - startpos,
            ListData {
                kind: ListKind::Bullet,
                marker_offset: 0,
                padding: 0,
                start: 1,
                delimiter: 0,
                bullet_char: c,
                tight: false,
            },
        ));
    }

    if c.is_ascii_digit() {
        let mut start: usize = 0;
        let mut digits = 0;
        loop {
            start = 10 * start + usize::from(byte_at(line, pos) - b'0');
            pos += 1;
            digits += 1;
            if !(digits < 9 && byte_at(line, pos).is_ascii_digit()) {
                break;
            }
        }
        if interrupts_paragraph && start != 1 {
            return None;
        }
        let delimiter = byte_at(line, pos);
        if delimiter != b'.' && delimiter != b')' {
            return None;
        }
        pos += 1;
        if !is_marker_space(byte_at(line, pos)) {
            return None;
        }
        if interrupts_paragraph {
            let mut i = pos;
            while scanners::is_space_or_tab(byte_at(line, i)) {
                i += 1;
            }
            if scanners::is_line_end_char(byte_at(line, i)) {
                return None;
            }
        }
        return Some((
            pos - startpos,
            ListData {
                kind: ListKind::Ordered,
                marker_offset: 0,
                padding: 0,
                start,
                delimiter,
                bullet_char: 0,
                tight: false,
            },
        ));
    }

    None
}

/// One link reference definition at `pos` in a paragraph's text: label,
/// colon, destination, optional title, nothing else on the final line.
/// Returns the raw label, the reference, and the bytes consumed. A title
/// attempt that leaves garbage on its line is dropped again if the
/// destination line ended cleanly.
fn try_parse_reference_definition(content: &str, pos: usize) -> Option<(String, Reference, usize)> {
    let bytes = content.as_bytes();
    let start = pos;

    let (raw_label, label_len) = scanners::scan_link_label(&content[pos..])?;
    if raw_label.is_empty() {
        return None;
    }
    let mut i = pos + label_len;
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;

    i += scanners::scan_spnl(&bytes[i..]);
    let (url, url_len) = scanners::scan_link_destination(&content[i..])?;
    if url_len == 0 {
        return None;
    }
    i += url_len;

    let before_title = i;
    let ws = scanners::scan_spnl(&bytes[i..]);
    let mut title = String::new();
    let mut have_title = false;
    if ws > 0 {
        if let Some((t, title_len)) = scanners::scan_link_title(&content[i + ws..]) {
            title = t;
            have_title = true;
            i += ws + title_len;
        }
    }

    let to_line_end = |mut j: usize| -> Option<usize> {
        while j < bytes.len() && scanners::is_space_or_tab(bytes[j]) {
            j += 1;
        }
        if j >= bytes.len() {
            return Some(j);
        }
        if bytes[j] == b'\n' {
            return Some(j + 1);
        }
        None
    };

    match to_line_end(i) {
        Some(end) => Some((raw_label.to_string(), Reference { url, title }, end - start)),
        None if have_title => {
            // The title line has trailing garbage; fall back to a
            // definition without one if the destination line was clean.
            let end = to_line_end(before_title)?;
            Some((
                raw_label.to_string(),
                Reference {
                    url,
                    title: String::new(),
                },
                end - start,
            ))
        }
        None => None,
    }
}

/// Tag data copied out of an open block for prefix re-matching.
enum Prefix {
    Container,
    BlockQuote,
    Item(ListData),
    IndentedCode,
    FencedCode {
        fence_char: u8,
        fence_length: usize,
        fence_offset: usize,
    },
    HtmlBlock(u8),
    Paragraph,
    Leaf,
}

enum TextSink {
    Code,
    Html(u8),
    Other,
}

pub(crate) struct Parser<'i, 'o> {
    input: &'i str,
    options: &'o Options,
    tab_stop: usize,
    blocks: BlockArena,
    inlines: InlineArena,
    refmap: RefMap,
    root: BlockId,
    current: BlockId,
    /// Line on which each block was opened, indexed by block id.
    open_lines: Vec<usize>,
    line_number: usize,
    /// Absolute offset of the current line in the source.
    line_start: usize,
    /// Length of the current line without its line ending.
    content_end: usize,
    offset: usize,
    column: usize,
    first_nonspace: usize,
    first_nonspace_column: usize,
    indent: usize,
    blank: bool,
    partially_consumed_tab: bool,
    thematic_break_kill_pos: usize,
}

impl<'i, 'o> Parser<'i, 'o> {
    pub(crate) fn new(input: &'i str, options: &'o Options) -> Self {
        let mut blocks = BlockArena::default();
        let root = blocks.alloc(BlockValue::Document);
        let mut parser = Parser {
            input,
            options,
            tab_stop: options.tab_stop.max(1),
            blocks,
            inlines: InlineArena::default(),
            refmap: RefMap::default(),
            root,
            current: root,
            open_lines: vec![0],
            line_number: 0,
            line_start: 0,
            content_end: 0,
            offset: 0,
            column: 0,
            first_nonspace: 0,
            first_nonspace_column: 0,
            indent: 0,
            blank: false,
            partially_consumed_tab: false,
            thematic_break_kill_pos: 0,
        };
        if options.track_source_positions {
            parser.blocks[root].span = Some(SourceSpan { start: 0, end: 0 });
        }
        parser
    }

    pub(crate) fn parse(mut self) -> Document {
        let bytes = self.input.as_bytes();
        let mut pos = if self.input.starts_with('\u{feff}') {
            3
        } else {
            0
        };
        while pos < bytes.len() {
            let mut end = pos;
            while end < bytes.len() && !scanners::is_line_end_char(bytes[end]) {
                end += 1;
            }
            if end < bytes.len() && bytes[end] == b'\r' {
                end += 1;
            }
            if end < bytes.len() && bytes[end] == b'\n' {
                end += 1;
            }
            self.process_line(pos, end);
            pos = end;
        }

        while self.current != self.root {
            self.current = self.finalize(self.current).unwrap_or(self.root);
        }
        let _ = self.finalize(self.root);
        self.process_inlines();

        Document::new(self.blocks, self.inlines, self.root, self.refmap)
    }

    fn process_line(&mut self, start: usize, end: usize) {
        let line = &self.input[start..end];
        self.line_start = start;
        self.content_end = line_content_end(line);
        self.offset = 0;
        self.column = 0;
        self.first_nonspace = 0;
        self.first_nonspace_column = 0;
        self.indent = 0;
        self.blank = false;
        self.partially_consumed_tab = false;
        self.thematic_break_kill_pos = 0;
        self.line_number += 1;

        let mut all_matched = true;
        if let Some(last_matched) = self.check_open_blocks(line, &mut all_matched) {
            let mut container = last_matched;
            let current = self.current;
            self.open_new_blocks(&mut container, line, all_matched);
            if current == self.current {
                self.add_text_to_container(container, last_matched, line);
            }
        }
    }

    /// Re-match the spine of open blocks against the new line. Returns the
    /// deepest block whose continuation condition held, or `None` when a
    /// closing code fence consumed the whole line.
    fn check_open_blocks(&mut self, line: &str, all_matched: &mut bool) -> Option<BlockId> {
        let mut should_continue = true;
        let mut container = self.root;

        while let Some(next) = self.blocks.last_open_child(container) {
            container = next;
            self.find_first_nonspace(line);

            let prefix = match &self.blocks[container].value {
                BlockValue::BlockQuote => Prefix::BlockQuote,
                BlockValue::ListItem(data) => Prefix::Item(*data),
                BlockValue::IndentedCode { .. } => Prefix::IndentedCode,
                BlockValue::FencedCode {
                    fence_char,
                    fence_length,
                    fence_offset,
                    ..
                } => Prefix::FencedCode {
                    fence_char: *fence_char,
                    fence_length: *fence_length,
                    fence_offset: *fence_offset,
                },
                BlockValue::HtmlBlock { kind, .. } => Prefix::HtmlBlock(*kind),
                BlockValue::Paragraph => Prefix::Paragraph,
                BlockValue::AtxHeading { .. }
                | BlockValue::SetextHeading { .. }
                | BlockValue::ThematicBreak
                | BlockValue::ReferenceDefinition { .. } => Prefix::Leaf,
                BlockValue::Document | BlockValue::List(..) => Prefix::Container,
            };

            let matched = match prefix {
                Prefix::Container => true,
                Prefix::BlockQuote => self.parse_block_quote_prefix(line),
                Prefix::Item(data) => self.parse_list_item_prefix(line, container, &data),
                Prefix::IndentedCode => self.parse_indented_code_prefix(line),
                Prefix::FencedCode {
                    fence_char,
                    fence_length,
                    fence_offset,
                } => {
                    if self.try_close_fence(line, container, fence_char, fence_length) {
                        should_continue = false;
                        false
                    } else {
                        // Strip up to the opening fence's indentation.
                        let mut i = fence_offset;
                        while i > 0 && scanners::is_space_or_tab(byte_at(line, self.offset)) {
                            self.advance_offset(line, 1, true);
                            i -= 1;
                        }
                        true
                    }
                }
                Prefix::HtmlBlock(kind) => matches!(kind, 1..=5) || !self.blank,
                Prefix::Paragraph => !self.blank,
                Prefix::Leaf => false,
            };

            if !matched {
                *all_matched = false;
                container = self.blocks[container].parent.unwrap_or(self.root);
                break;
            }
        }

        if should_continue { Some(container) } else { None }
    }

    fn parse_block_quote_prefix(&mut self, line: &str) -> bool {
        let indent = self.indent;
        if indent <= 3 && byte_at(line, self.first_nonspace) == b'>' {
            self.advance_offset(line, indent + 1, true);
            if scanners::is_space_or_tab(byte_at(line, self.offset)) {
                self.advance_offset(line, 1, true);
            }
            return true;
        }
        false
    }

    fn parse_list_item_prefix(&mut self, line: &str, container: BlockId, data: &ListData) -> bool {
        if self.indent >= data.marker_offset + data.padding {
            self.advance_offset(line, data.marker_offset + data.padding, true);
            true
        } else if self.blank && self.blocks[container].first_child.is_some() {
            let offset = self.first_nonspace - self.offset;
            self.advance_offset(line, offset, false);
            true
        } else {
            false
        }
    }

    fn parse_indented_code_prefix(&mut self, line: &str) -> bool {
        if self.indent >= CODE_INDENT {
            self.advance_offset(line, CODE_INDENT, true);
            true
        } else if self.blank {
            let offset = self.first_nonspace - self.offset;
            self.advance_offset(line, offset, false);
            true
        } else {
            false
        }
    }

    /// Close the fence if the line is a matching closing fence. The line is
    /// consumed entirely in that case.
    fn try_close_fence(
        &mut self,
        line: &str,
        container: BlockId,
        fence_char: u8,
        fence_length: usize,
    ) -> bool {
        if self.indent > 3 || byte_at(line, self.first_nonspace) != fence_char {
            return false;
        }
        let matched = scanners::close_code_fence(&line[self.first_nonspace..]).unwrap_or(0);
        if matched < fence_length {
            return false;
        }
        self.advance_offset(line, matched, false);
        if self.options.track_source_positions {
            let end = self.line_start + self.content_end;
            if let Some(span) = &mut self.blocks[container].span {
                span.end = span.end.max(end);
            }
        }
        self.current = self.finalize(container).unwrap_or(self.root);
        true
    }

    /// Try to open new blocks at the current position until a leaf that
    /// accepts lines is reached.
    fn open_new_blocks(&mut self, container: &mut BlockId, line: &str, all_matched: bool) {
        let mut matched: usize = 0;
        let mut html_kind: u8 = 0;
        let mut setext_level: u8 = 0;
        let mut list_data = ListData {
            kind: ListKind::Bullet,
            marker_offset: 0,
            padding: 0,
            start: 1,
            delimiter: 0,
            bullet_char: 0,
            tight: false,
        };
        let mut maybe_lazy = matches!(self.blocks[self.current].value, BlockValue::Paragraph);

        while !matches!(
            self.blocks[*container].value,
            BlockValue::IndentedCode { .. }
                | BlockValue::FencedCode { .. }
                | BlockValue::HtmlBlock { .. }
        ) {
            self.find_first_nonspace(line);
            let indented = self.indent >= CODE_INDENT;

            let custom_seed = if indented {
                None
            } else {
                self.options
                    .extensions
                    .try_block_start(&line[self.first_nonspace..self.content_end])
            };

            if let Some(seed) = custom_seed {
                match seed {
                    BlockSeed::ThematicBreak => {
                        *container = self.add_child(*container, BlockValue::ThematicBreak);
                        let adv = self.content_end - self.offset;
                        self.advance_offset(line, adv, false);
                    }
                    BlockSeed::Heading { level, text_start } => {
                        let first_nonspace = self.first_nonspace;
                        let offset = self.offset;
                        self.advance_offset(line, first_nonspace + text_start - offset, false);
                        *container = self.add_child(*container, BlockValue::AtxHeading { level });
                    }
                }
            } else if !indented && byte_at(line, self.first_nonspace) == b'>' {
                let offset = self.first_nonspace + 1 - self.offset;
                self.advance_offset(line, offset, false);
                if scanners::is_space_or_tab(byte_at(line, self.offset)) {
                    self.advance_offset(line, 1, true);
                }
                *container = self.add_child(*container, BlockValue::BlockQuote);
            } else if !indented
                && unwrap_into(
                    scanners::atx_heading_start(&line[self.first_nonspace..]),
                    &mut matched,
                )
            {
                let first_nonspace = self.first_nonspace;
                let offset = self.offset;
                self.advance_offset(line, first_nonspace + matched - offset, false);

                let mut level: u8 = 0;
                let mut p = first_nonspace;
                while byte_at(line, p) == b'#' {
                    level += 1;
                    p += 1;
                }
                *container = self.add_child(*container, BlockValue::AtxHeading { level });
            } else if !indented
                && unwrap_into(
                    scanners::open_code_fence(&line[self.first_nonspace..]),
                    &mut matched,
                )
            {
                let first_nonspace = self.first_nonspace;
                let offset = self.offset;
                *container = self.add_child(
                    *container,
                    BlockValue::FencedCode {
                        fence_char: byte_at(line, first_nonspace),
                        fence_length: matched,
                        fence_offset: first_nonspace - offset,
                        info: String::new(),
                        literal: String::new(),
                    },
                );
                self.advance_offset(line, first_nonspace + matched - offset, false);
            } else if !indented
                && (unwrap_into(
                    scanners::html_block_start(&line[self.first_nonspace..]),
                    &mut html_kind,
                ) || (!matches!(self.blocks[*container].value, BlockValue::Paragraph)
                    && unwrap_into(
                        scanners::html_block_start_7(&line[self.first_nonspace..]),
                        &mut html_kind,
                    )))
            {
                *container = self.add_child(
                    *container,
                    BlockValue::HtmlBlock {
                        kind: html_kind,
                        literal: String::new(),
                    },
                );
            } else if !indented
                && all_matched
                && matches!(self.blocks[*container].value, BlockValue::Paragraph)
                && unwrap_into(
                    scanners::setext_heading_line(&line[self.first_nonspace..]),
                    &mut setext_level,
                )
            {
                let (has_content, _) = self.resolve_reference_link_definitions(*container);
                if has_content {
                    self.blocks[*container].value = BlockValue::SetextHeading {
                        level: setext_level,
                    };
                    if self.options.track_source_positions {
                        let end = self.line_start + self.content_end;
                        if let Some(span) = &mut self.blocks[*container].span {
                            span.end = span.end.max(end);
                        }
                    }
                    let adv = self.content_end - self.offset;
                    self.advance_offset(line, adv, false);
                }
            } else if !indented
                && !(matches!(self.blocks[*container].value, BlockValue::Paragraph)
                    && !all_matched)
                && self.thematic_break_kill_pos <= self.first_nonspace
                && unwrap_into(self.scan_thematic_break(line), &mut matched)
            {
                *container = self.add_child(*container, BlockValue::ThematicBreak);
                let adv = self.content_end - self.offset;
                self.advance_offset(line, adv, false);
            } else if (!indented || matches!(self.blocks[*container].value, BlockValue::List(..)))
                && self.indent < CODE_INDENT
                && self.container_depth(*container) < MAX_LIST_DEPTH
                && unwrap_into_2(
                    parse_list_marker(
                        line,
                        self.first_nonspace,
                        matches!(self.blocks[*container].value, BlockValue::Paragraph),
                    ),
                    &mut matched,
                    &mut list_data,
                )
            {
                let offset = self.first_nonspace + matched - self.offset;
                self.advance_offset(line, offset, false);

                let save_partially_consumed_tab = self.partially_consumed_tab;
                let save_offset = self.offset;
                let save_column = self.column;

                while self.column - save_column <= 5
                    && scanners::is_space_or_tab(byte_at(line, self.offset))
                {
                    self.advance_offset(line, 1, true);
                }

                let i = self.column - save_column;
                if !(1..5).contains(&i) || scanners::is_line_end_char(byte_at(line, self.offset)) {
                    list_data.padding = matched + 1;
                    self.offset = save_offset;
                    self.column = save_column;
                    self.partially_consumed_tab = save_partially_consumed_tab;
                    if i > 0 {
                        self.advance_offset(line, 1, true);
                    }
                } else {
                    list_data.padding = matched + i;
                }
                list_data.marker_offset = self.indent;

                let same_list = match &self.blocks[*container].value {
                    BlockValue::List(existing) => existing.matches(&list_data),
                    _ => false,
                };
                if !same_list {
                    *container = self.add_child(*container, BlockValue::List(list_data));
                }
                *container = self.add_child(*container, BlockValue::ListItem(list_data));
            } else if indented && !maybe_lazy && !self.blank {
                self.advance_offset(line, CODE_INDENT, true);
                *container = self.add_child(
                    *container,
                    BlockValue::IndentedCode {
                        literal: String::new(),
                    },
                );
            } else {
                break;
            }

            if self.blocks[*container].value.accepts_lines() {
                break;
            }
            maybe_lazy = false;
        }
    }

    /// Land the rest of the line as text: lazily continue the current
    /// paragraph, extend a code or HTML block, feed a heading, or open a
    /// fresh paragraph.
    fn add_text_to_container(&mut self, mut container: BlockId, last_matched: BlockId, line: &str) {
        self.find_first_nonspace(line);

        if self.blank {
            if let Some(last_child) = self.blocks[container].last_child {
                self.blocks[last_child].is_last_line_blank = true;
            }
        }

        let exclude = {
            let node = &self.blocks[container];
            matches!(
                node.value,
                BlockValue::BlockQuote
                    | BlockValue::AtxHeading { .. }
                    | BlockValue::SetextHeading { .. }
                    | BlockValue::ThematicBreak
                    | BlockValue::FencedCode { .. }
            ) || (matches!(node.value, BlockValue::ListItem(..))
                && node.first_child.is_none()
                && self.open_lines[container.0] == self.line_number)
        };
        self.blocks[container].is_last_line_blank = self.blank && !exclude;

        let mut ancestor = self.blocks[container].parent;
        while let Some(p) = ancestor {
            self.blocks[p].is_last_line_blank = false;
            ancestor = self.blocks[p].parent;
        }

        if self.current != container
            && container == last_matched
            && !self.blank
            && matches!(self.blocks[self.current].value, BlockValue::Paragraph)
        {
            // Lazy continuation line.
            self.add_line(self.current, self.content_end);
            return;
        }

        while self.current != last_matched {
            self.current = self.finalize(self.current).unwrap_or(last_matched);
        }

        let sink = match &self.blocks[container].value {
            BlockValue::IndentedCode { .. } | BlockValue::FencedCode { .. } => TextSink::Code,
            BlockValue::HtmlBlock { kind, .. } => TextSink::Html(*kind),
            _ => TextSink::Other,
        };

        match sink {
            TextSink::Code => {
                self.add_line(container, self.content_end);
            }
            TextSink::Html(kind) => {
                self.add_line(container, self.content_end);
                let done = matches!(kind, 1..=5)
                    && scanners::html_block_end(kind, &line[self.first_nonspace..]);
                if done {
                    container = self.finalize(container).unwrap_or(self.root);
                }
            }
            TextSink::Other => {
                if self.blank {
                    // Nothing to add.
                } else if self.blocks[container].value.accepts_lines() {
                    let mut end = self.content_end;
                    if matches!(self.blocks[container].value, BlockValue::AtxHeading { .. }) {
                        end = chop_closing_hashes(line, end);
                    }
                    if self.offset < end {
                        let count = self.first_nonspace - self.offset;
                        self.advance_offset(line, count, false);
                        self.add_line(container, end);
                    }
                } else {
                    container = self.add_child(container, BlockValue::Paragraph);
                    let count = self.first_nonspace - self.offset;
                    self.advance_offset(line, count, false);
                    self.add_line(container, self.content_end);
                }
            }
        }

        self.current = container;
    }

    /// Append the line tail from the current offset through `end` to the
    /// block's content, materializing the rest of a partially consumed tab
    /// as pad spaces.
    fn add_line(&mut self, block: BlockId, end: usize) {
        debug_assert!(self.blocks[block].is_open);
        let mut pad = 0;
        if self.partially_consumed_tab {
            self.offset += 1;
            pad = self.tab_stop - (self.column % self.tab_stop);
        }
        let start = self.line_start + self.offset;
        let end = (self.line_start + end).max(start);
        self.blocks[block].content.push_span(start, end, pad);
        if self.options.track_source_positions {
            if let Some(span) = &mut self.blocks[block].span {
                span.end = span.end.max(end);
            }
        }
    }

    /// Allocate and attach a child, first closing open blocks that cannot
    /// contain it.
    fn add_child(&mut self, mut parent: BlockId, value: BlockValue) -> BlockId {
        while !self.blocks[parent].value.can_contain(&value) {
            parent = self.finalize(parent).unwrap_or(self.root);
        }
        let child = self.blocks.alloc(value);
        self.open_lines.push(self.line_number);
        if self.options.track_source_positions {
            self.blocks[child].span = Some(SourceSpan {
                start: self.line_start + self.first_nonspace,
                end: self.line_start + self.content_end,
            });
        }
        self.blocks.append_child(parent, child);
        child
    }

    /// Close a block. Paragraphs give up leading reference definitions,
    /// code and HTML blocks materialize their literals, and lists settle
    /// tightness. Returns the parent.
    fn finalize(&mut self, block: BlockId) -> Option<BlockId> {
        debug_assert!(self.blocks[block].is_open);
        self.blocks[block].is_open = false;
        let parent = self.blocks[block].parent;

        match self.blocks[block].value {
            BlockValue::Paragraph => {
                let (has_content, definitions) = self.resolve_reference_link_definitions(block);
                if !has_content {
                    self.blocks[block].value = BlockValue::ReferenceDefinition { definitions };
                }
            }
            BlockValue::IndentedCode { .. } => {
                let mut literal = self.blocks[block].content.rebuild(self.input);
                remove_trailing_blank_lines(&mut literal);
                literal.push('\n');
                self.blocks[block].content.clear();
                if let BlockValue::IndentedCode { literal: slot } = &mut self.blocks[block].value {
                    *slot = literal;
                }
            }
            BlockValue::FencedCode { .. } => {
                let content = self.blocks[block].content.rebuild(self.input);
                let (first_line, rest) = match content.find('\n') {
                    Some(nl) => (&content[..nl], &content[nl + 1..]),
                    None => (content.as_str(), ""),
                };
                let entity_free = scanners::unescape_entities(first_line);
                let info = scanners::unescape_backslashes(entity_free.trim());
                let literal = rest.to_string();
                self.blocks[block].content.clear();
                if let BlockValue::FencedCode {
                    info: info_slot,
                    literal: literal_slot,
                    ..
                } = &mut self.blocks[block].value
                {
                    *info_slot = info;
                    *literal_slot = literal;
                }
            }
            BlockValue::HtmlBlock { .. } => {
                let literal = self.blocks[block].content.rebuild(self.input);
                self.blocks[block].content.clear();
                if let BlockValue::HtmlBlock { literal: slot, .. } = &mut self.blocks[block].value {
                    *slot = literal;
                }
            }
            BlockValue::List(..) => {
                let tight = self.determine_list_tight(block);
                if let BlockValue::List(data) = &mut self.blocks[block].value {
                    data.tight = tight;
                }
            }
            _ => {}
        }

        if self.options.track_source_positions {
            if let (Some(p), Some(child_span)) = (parent, self.blocks[block].span) {
                if let Some(parent_span) = &mut self.blocks[p].span {
                    parent_span.end = parent_span.end.max(child_span.end);
                }
            }
        }

        parent
    }

    /// Pull link reference definitions off the front of a paragraph's
    /// content. Returns whether any text remains, and how many definitions
    /// were consumed.
    fn resolve_reference_link_definitions(&mut self, block: BlockId) -> (bool, usize) {
        let content = self.blocks[block].content.rebuild(self.input);
        let mut pos = 0;
        let mut definitions = 0;
        while pos < content.len() && content.as_bytes()[pos] == b'[' {
            match try_parse_reference_definition(&content, pos) {
                Some((raw_label, reference, consumed)) => {
                    self.refmap.insert(&raw_label, reference);
                    pos += consumed;
                    definitions += 1;
                }
                None => break,
            }
        }
        if pos > 0 {
            trim_span_prefix(&mut self.blocks[block].content, pos);
        }
        (!self.blocks[block].content.is_empty(), definitions)
    }

    /// A list is tight unless a blank line separates items or sits between
    /// the blocks of an item (trailing blanks of the final item excepted).
    fn determine_list_tight(&self, list: BlockId) -> bool {
        let mut item = self.blocks[list].first_child;
        while let Some(it) = item {
            if self.blocks[it].is_last_line_blank && self.blocks[it].next_sibling.is_some() {
                return false;
            }
            let mut sub = self.blocks[it].first_child;
            while let Some(s) = sub {
                if (self.blocks[it].next_sibling.is_some()
                    || self.blocks[s].next_sibling.is_some())
                    && self.blocks.ends_with_blank_line(s)
                {
                    return false;
                }
                sub = self.blocks[s].next_sibling;
            }
            item = self.blocks[it].next_sibling;
        }
        true
    }

    fn container_depth(&self, mut id: BlockId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.blocks[id].parent {
            depth += 1;
            id = parent;
        }
        depth
    }

    /// 3+ of `*`, `_` or `-` with only spaces and tabs interspersed, to the
    /// end of the line. Failures memoize how far the scan got so re-checks
    /// on the same line bail out early.
    fn scan_thematic_break(&mut self, line: &str) -> Option<usize> {
        let mut i = self.first_nonspace;
        let terminator = byte_at(line, i);
        if !matches!(terminator, b'*' | b'_' | b'-') {
            return None;
        }

        let mut count = 1;
        let nextc;
        loop {
            i += 1;
            let c = byte_at(line, i);
            if c == terminator {
                count += 1;
            } else if !scanners::is_space_or_tab(c) {
                nextc = c;
                break;
            }
        }

        if count >= 3 && scanners::is_line_end_char(nextc) {
            Some(i - self.first_nonspace + 1)
        } else {
            self.thematic_break_kill_pos = i;
            None
        }
    }

    fn find_first_nonspace(&mut self, line: &str) {
        let mut chars_to_tab = self.tab_stop - (self.column % self.tab_stop);
        if self.first_nonspace <= self.offset {
            self.first_nonspace = self.offset;
            self.first_nonspace_column = self.column;
            loop {
                match byte_at(line, self.first_nonspace) {
                    b' ' => {
                        self.first_nonspace += 1;
                        self.first_nonspace_column += 1;
                        chars_to_tab -= 1;
                        if chars_to_tab == 0 {
                            chars_to_tab = self.tab_stop;
                        }
                    }
                    b'\t' => {
                        self.first_nonspace += 1;
                        self.first_nonspace_column += chars_to_tab;
                        chars_to_tab = self.tab_stop;
                    }
                    _ => break,
                }
            }
        }
        self.indent = self.first_nonspace_column - self.column;
        self.blank = scanners::is_line_end_char(byte_at(line, self.first_nonspace));
    }

    /// Move the cursor `count` bytes (or columns) forward, expanding tabs.
    /// In column mode a tab may be consumed partially; the leftover columns
    /// are owed as pad spaces by the next `add_line`.
    fn advance_offset(&mut self, line: &str, mut count: usize, columns: bool) {
        let bytes = line.as_bytes();
        while count > 0 {
            match bytes.get(self.offset) {
                None => break,
                Some(&b'\t') => {
                    let chars_to_tab = self.tab_stop - (self.column % self.tab_stop);
                    if columns {
                        self.partially_consumed_tab = chars_to_tab > count;
                        let chars_to_advance = chars_to_tab.min(count);
                        self.column += chars_to_advance;
                        if !self.partially_consumed_tab {
                            self.offset += 1;
                        }
                        count -= chars_to_advance;
                    } else {
                        self.partially_consumed_tab = false;
                        self.column += chars_to_tab;
                        self.offset += 1;
                        count -= 1;
                    }
                }
                Some(_) => {
                    self.partially_consumed_tab = false;
                    self.offset += 1;
                    self.column += 1;
                    count -= 1;
                }
            }
        }
    }

    /// Phase two: run the inline parser over every leaf that takes inline
    /// content. The reference table is complete by now.
    fn process_inlines(&mut self) {
        for idx in 0..self.blocks.len() {
            let id = BlockId(idx);
            if !self.blocks[id].value.contains_inlines() || self.blocks[id].content.is_empty() {
                continue;
            }
            let content = self.blocks[id].content.rebuild(self.input);
            let spans: Vec<LineSpan> = if self.options.track_source_positions {
                self.blocks[id].content.spans.clone()
            } else {
                Vec::new()
            };
            let head =
                inline::parse_inlines(&mut self.inlines, &self.refmap, self.options, &content, &spans);
            self.blocks[id].inlines = head;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;

    fn parse(input: &str) -> Document {
        let options = Options::default();
        Parser::new(input, &options).parse()
    }

    fn child_values(doc: &Document, of: BlockId) -> Vec<BlockValue> {
        let mut out = Vec::new();
        let mut cur = doc.blocks[of].first_child;
        while let Some(id) = cur {
            out.push(doc.blocks[id].value.clone());
            cur = doc.blocks[id].next_sibling;
        }
        out
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Foo\t bar "), "foo bar");
        assert_eq!(normalize_label("ẞ"), "ss");
        assert_eq!(normalize_label("   "), "");
    }

    #[test]
    fn test_refmap_first_definition_wins() {
        let mut map = RefMap::default();
        map.insert(
            "foo",
            Reference {
                url: "/first".into(),
                title: String::new(),
            },
        );
        map.insert(
            "FOO",
            Reference {
                url: "/second".into(),
                title: String::new(),
            },
        );
        match map.lookup("Foo") {
            RefLookup::Found(r) => assert_eq!(r.url, "/first"),
            other => panic!("expected a hit, got {:?}", other),
        }
    }

    #[test]
    fn test_refmap_lookup_failures() {
        let map = RefMap::default();
        assert_eq!(map.lookup("  "), RefLookup::Invalid);
        assert_eq!(map.lookup(&"x".repeat(1001)), RefLookup::Invalid);
        assert_eq!(map.lookup("absent"), RefLookup::NoSuchLabel);
    }

    #[test]
    fn test_parse_list_marker() {
        let (len, data) = parse_list_marker("- foo", 0, false).unwrap();
        assert_eq!(len, 1);
        assert_eq!(data.kind, ListKind::Bullet);
        assert_eq!(data.bullet_char, b'-');

        let (len, data) = parse_list_marker("123) bar", 0, false).unwrap();
        assert_eq!(len, 4);
        assert_eq!(data.kind, ListKind::Ordered);
        assert_eq!(data.start, 123);
        assert_eq!(data.delimiter, b')');

        // Not followed by whitespace
        assert!(parse_list_marker("-foo", 0, false).is_none());
        // Ten digits is too many
        assert!(parse_list_marker("1234567890. x", 0, false).is_none());
        // Interrupting a paragraph needs content and an ordered start of 1
        assert!(parse_list_marker("- ", 0, true).is_none());
        assert!(parse_list_marker("2. x", 0, true).is_none());
        assert!(parse_list_marker("1. x", 0, true).is_some());
    }

    #[test]
    fn test_reference_definition_basic() {
        let content = "[foo]: /url \"title\"\nrest\n";
        let (label, reference, consumed) = try_parse_reference_definition(content, 0).unwrap();
        assert_eq!(label, "foo");
        assert_eq!(reference.url, "/url");
        assert_eq!(reference.title, "title");
        assert_eq!(&content[consumed..], "rest\n");
    }

    #[test]
    fn test_reference_definition_title_fallback() {
        // The would-be title has garbage after it on its own line, so the
        // definition ends after the destination line.
        let content = "[foo]: /url\n\"title\" extra\n";
        let (_, reference, consumed) = try_parse_reference_definition(content, 0).unwrap();
        assert_eq!(reference.url, "/url");
        assert_eq!(reference.title, "");
        assert_eq!(&content[consumed..], "\"title\" extra\n");

        // Same garbage on the destination line kills the whole definition.
        assert!(try_parse_reference_definition("[foo]: /url \"title\" extra\n", 0).is_none());
    }

    #[test]
    fn test_reference_definition_needs_destination() {
        assert!(try_parse_reference_definition("[foo]:\n\n/url\n", 0).is_none());
        assert!(try_parse_reference_definition("[foo] /url\n", 0).is_none());
    }

    #[test]
    fn test_chop_closing_hashes() {
        let line = "foo ###\n";
        assert_eq!(&line[..chop_closing_hashes(line, 7)], "foo");
        let line = "foo#\n";
        assert_eq!(&line[..chop_closing_hashes(line, 4)], "foo#");
        let line = "###\n";
        assert_eq!(&line[..chop_closing_hashes(line, 3)], "");
    }

    #[test]
    fn test_remove_trailing_blank_lines() {
        let mut s = "code\n  \n\t\n".to_string();
        remove_trailing_blank_lines(&mut s);
        assert_eq!(s, "code");
        let mut s = " \n \n".to_string();
        remove_trailing_blank_lines(&mut s);
        assert_eq!(s, "");
    }

    #[test]
    fn test_document_structure() {
        let doc = parse("para one\n\n# heading\n\n> quoted\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], BlockValue::Paragraph);
        assert_eq!(children[1], BlockValue::AtxHeading { level: 1 });
        assert_eq!(children[2], BlockValue::BlockQuote);
    }

    #[test]
    fn test_lazy_continuation_joins_paragraph() {
        let doc = parse("> foo\nbar\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], BlockValue::BlockQuote);
        let quote = doc.blocks[doc.root].first_child.unwrap();
        let para = doc.blocks[quote].first_child.unwrap();
        assert_eq!(doc.blocks[para].content.spans.len(), 2);
    }

    #[test]
    fn test_reference_definition_block() {
        let doc = parse("[foo]: /url \"title\"\n\n[foo]\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children[0], BlockValue::ReferenceDefinition { definitions: 1 });
        assert_eq!(children[1], BlockValue::Paragraph);
        let reference = doc.reference("FOO").unwrap();
        assert_eq!(reference.url, "/url");
        assert_eq!(reference.title, "title");
    }

    #[test]
    fn test_definition_extracted_at_end_of_input() {
        // No trailing newline and no blank line after the definition.
        let doc = parse("[foo]: /url");
        assert!(doc.reference("foo").is_some());
    }

    #[test]
    fn test_list_tightness() {
        let doc = parse("- a\n- b\n");
        let list = doc.blocks[doc.root].first_child.unwrap();
        match &doc.blocks[list].value {
            BlockValue::List(data) => assert!(data.tight),
            other => panic!("expected a list, got {:?}", other),
        }

        let doc = parse("- a\n\n- b\n");
        let list = doc.blocks[doc.root].first_child.unwrap();
        match &doc.blocks[list].value {
            BlockValue::List(data) => assert!(!data.tight),
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[test]
    fn test_setext_heading_promotion() {
        let doc = parse("Foo\n---\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children, vec![BlockValue::SetextHeading { level: 2 }]);
    }

    #[test]
    fn test_fenced_code_info_and_literal() {
        let doc = parse("``` rust\nfn main() {}\n```\n");
        let code = doc.blocks[doc.root].first_child.unwrap();
        match &doc.blocks[code].value {
            BlockValue::FencedCode { info, literal, .. } => {
                assert_eq!(info, "rust");
                assert_eq!(literal, "fn main() {}\n");
            }
            other => panic!("expected fenced code, got {:?}", other),
        }
    }

    #[test]
    fn test_indented_code_drops_trailing_blanks() {
        let doc = parse("    one\n\n    two\n\n\n");
        let code = doc.blocks[doc.root].first_child.unwrap();
        match &doc.blocks[code].value {
            BlockValue::IndentedCode { literal } => assert_eq!(literal, "one\n\ntwo\n"),
            other => panic!("expected indented code, got {:?}", other),
        }
    }

    #[test]
    fn test_html_block_end_condition() {
        let doc = parse("<!-- note -->\nafter\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children.len(), 2);
        match &children[0] {
            BlockValue::HtmlBlock { kind, literal } => {
                assert_eq!(*kind, 2);
                assert_eq!(literal, "<!-- note -->\n");
            }
            other => panic!("expected an HTML block, got {:?}", other),
        }
        assert_eq!(children[1], BlockValue::Paragraph);
    }

    #[test]
    fn test_fence_close_consumes_line() {
        let doc = parse("```\ncode\n```\nafter\n");
        let children = child_values(&doc, doc.root);
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0], BlockValue::FencedCode { .. }));
        assert_eq!(children[1], BlockValue::Paragraph);
    }

    #[test]
    fn test_trim_span_prefix_partial() {
        let mut content = StringContent::default();
        content.push_span(10, 15, 0);
        content.push_span(20, 25, 2);
        // Drop the whole first line (5 bytes + newline) and the pad spaces
        // plus one byte of the second.
        trim_span_prefix(&mut content, 6 + 3);
        assert_eq!(content.spans.len(), 1);
        assert_eq!(content.spans[0].start, 21);
        assert_eq!(content.spans[0].pad, 0);
    }
}
