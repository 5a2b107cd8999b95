//! Phase-two inline parsing. Each leaf block's raw text is scanned once,
//! left to right, emitting a flat chain of inline nodes; emphasis and links
//! are resolved afterwards over a delimiter stack and a bracket stack, so a
//! single pass suffices even though `*`, `_`, `~` and `[` are ambiguous
//! until their counterparts appear.

use crate::ast::{InlineArena, InlineId, InlineValue, LineSpan, SourceSpan};
use crate::parser::{RefLookup, RefMap};
use crate::scanners;
use crate::{InlineCursor, Options};

/// Longest backtick run the closer memo tracks. Longer runs fall back to
/// literal text, matching the reference implementation's cutoff.
const MAX_BACKTICKS: usize = 80;

/// A run of `*`, `_` or `~` that may yet open or close emphasis. Entries
/// form a doubly linked list through `prev`/`next` indices into the
/// subject's delimiter vector; unlinked entries are simply left behind.
struct Delimiter {
    inl: InlineId,
    /// Byte offset of the run in the inline text. Stack bottoms are
    /// expressed as positions, not indices.
    position: usize,
    /// Original run length. The multiple-of-three rule uses this even
    /// after the run's text node has been partially consumed.
    length: usize,
    delim_char: u8,
    can_open: bool,
    can_close: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A pending `[` or `![` awaiting its `]`.
struct Bracket {
    /// The literal text node holding the opening bracket. On a match it is
    /// converted in place into the link or image node.
    inl_text: InlineId,
    /// Byte offset just past the opener, where the bracketed text starts.
    position: usize,
    image: bool,
    /// Set when a later bracket opens while this one is still pending;
    /// suppresses the shortcut-reference fallback.
    bracket_after: bool,
}

/// Parse one leaf block's inline content into `arena`, returning the head
/// of the top-level chain. `content` is the rebuilt block text; `spans` is
/// its line map, used only when source positions are tracked.
pub(crate) fn parse_inlines(
    arena: &mut InlineArena,
    refmap: &RefMap,
    options: &Options,
    content: &str,
    spans: &[LineSpan],
) -> Option<InlineId> {
    let input = content.trim_end();
    if input.is_empty() {
        return None;
    }
    let mut subject = Subject::new(&mut *arena, refmap, options, input, spans);
    while subject.parse_next() {}
    subject.process_emphasis(0);
    let head = subject.head;
    prune_empty_text(arena, head).0
}

/// Drop the empty `Text` husks that emphasis resolution leaves behind,
/// relinking each sibling chain. Returns the chain's new head and tail.
fn prune_empty_text(
    arena: &mut InlineArena,
    head: Option<InlineId>,
) -> (Option<InlineId>, Option<InlineId>) {
    let mut new_head = None;
    let mut new_tail: Option<InlineId> = None;
    let mut cur = head;
    while let Some(id) = cur {
        let next = arena[id].next_sibling;
        let child_head = arena[id].first_child;
        let (child_head, child_tail) = prune_empty_text(arena, child_head);
        arena[id].first_child = child_head;
        arena[id].last_child = child_tail;
        let empty = matches!(&arena[id].value, InlineValue::Text(t) if t.is_empty());
        if !empty {
            arena[id].next_sibling = None;
            match new_tail {
                Some(tail) => arena[tail].next_sibling = Some(id),
                None => new_head = Some(id),
            }
            new_tail = Some(id);
        }
        cur = next;
    }
    (new_head, new_tail)
}

struct Subject<'s, 'a> {
    arena: &'s mut InlineArena,
    refmap: &'a RefMap,
    options: &'a Options,
    input: &'a str,
    spans: &'a [LineSpan],
    pos: usize,
    head: Option<InlineId>,
    /// Last node of the chain currently being appended to. Bracket matches
    /// retarget this at the new link node, whose children absorb the tail.
    tail: Option<InlineId>,
    delimiters: Vec<Delimiter>,
    last_delimiter: Option<usize>,
    brackets: Vec<Bracket>,
    /// Cleared while a `[` is pending, set again when a link closes; a `]`
    /// seen while set cannot form a link, which keeps links unnested.
    no_link_openers: bool,
    /// Start position of the most recent backtick run of each length.
    backticks: [usize; MAX_BACKTICKS + 1],
    scanned_for_backticks: bool,
    special: [bool; 256],
    ext_trigger: [bool; 256],
}

impl<'s, 'a> Subject<'s, 'a> {
    fn new(
        arena: &'s mut InlineArena,
        refmap: &'a RefMap,
        options: &'a Options,
        input: &'a str,
        spans: &'a [LineSpan],
    ) -> Self {
        let mut special = [false; 256];
        for &b in b"\r\n`\\&<[]!*_~" {
            special[b as usize] = true;
        }
        Subject {
            arena,
            refmap,
            options,
            input,
            spans,
            pos: 0,
            head: None,
            tail: None,
            delimiters: Vec::new(),
            last_delimiter: None,
            brackets: Vec::new(),
            no_link_openers: true,
            backticks: [0; MAX_BACKTICKS + 1],
            scanned_for_backticks: false,
            special,
            ext_trigger: options.extensions.inline_trigger_table(),
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn make_inline(&mut self, value: InlineValue, start: usize, end: usize) -> InlineId {
        let span = if self.options.track_source_positions && !self.spans.is_empty() {
            Some(SourceSpan {
                start: self.map_offset(start),
                end: self.map_offset(end),
            })
        } else {
            None
        };
        let id = self.arena.alloc(value);
        self.arena[id].span = span;
        id
    }

    /// Map a byte offset in the rebuilt inline text back to the source,
    /// skipping over tab-expansion pad columns and line endings.
    fn map_offset(&self, mut offset: usize) -> usize {
        for span in self.spans {
            let body = span.end - span.start;
            if offset <= span.pad {
                return span.start;
            }
            offset -= span.pad;
            if offset <= body {
                return span.start + offset;
            }
            offset -= body + 1;
        }
        self.spans.last().map_or(0, |s| s.end)
    }

    fn push_inline(&mut self, id: InlineId) {
        match self.tail {
            Some(tail) => self.arena[tail].next_sibling = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// Consume one construct. Returns false at end of input.
    fn parse_next(&mut self) -> bool {
        if self.pos >= self.input.len() {
            return false;
        }
        let c = self.input.as_bytes()[self.pos];

        if self.ext_trigger[c as usize] {
            let cursor = InlineCursor {
                text: self.input,
                pos: self.pos,
            };
            if let Some((value, len)) = self.options.extensions.try_inline(c, cursor) {
                if len > 0 {
                    let start = self.pos;
                    self.pos += len;
                    let node = self.make_inline(value, start, self.pos);
                    self.push_inline(node);
                    return true;
                }
            }
        }

        match c {
            b'\n' | b'\r' => self.handle_newline(),
            b'`' => self.handle_backticks(),
            b'\\' => self.handle_backslash(),
            b'&' => self.handle_entity(),
            b'<' => self.handle_pointy_brace(),
            b'*' | b'_' | b'~' => self.handle_delim(c),
            b'[' => {
                self.pos += 1;
                let inl = self.make_inline(InlineValue::Text("[".into()), self.pos - 1, self.pos);
                self.push_inline(inl);
                self.push_bracket(false, inl);
            }
            b']' => self.handle_close_bracket(),
            b'!' => {
                let start = self.pos;
                self.pos += 1;
                if self.peek_byte() == Some(b'[') {
                    self.pos += 1;
                    let inl = self.make_inline(InlineValue::Text("![".into()), start, self.pos);
                    self.push_inline(inl);
                    self.push_bracket(true, inl);
                } else {
                    let inl = self.make_inline(InlineValue::Text("!".into()), start, self.pos);
                    self.push_inline(inl);
                }
            }
            _ => self.handle_text(),
        }
        true
    }

    /// Literal text up to the next byte that could start a construct.
    fn handle_text(&mut self) {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        self.pos += 1;
        while self.pos < bytes.len()
            && !self.special[bytes[self.pos] as usize]
            && !self.ext_trigger[bytes[self.pos] as usize]
        {
            self.pos += 1;
        }
        let text = self.input[start..self.pos].to_string();
        let node = self.make_inline(InlineValue::Text(text), start, self.pos);
        self.push_inline(node);
    }

    /// Two or more trailing spaces on the previous text node turn the line
    /// ending into a hard break; either way the spaces are dropped, as is
    /// leading whitespace on the next line.
    fn handle_newline(&mut self) {
        let start = self.pos;
        if self.input.as_bytes()[self.pos] == b'\r' {
            self.pos += 1;
        }
        if self.peek_byte() == Some(b'\n') {
            self.pos += 1;
        }
        let mut hard = false;
        if let Some(tail) = self.tail {
            if let InlineValue::Text(text) = &mut self.arena[tail].value {
                let trimmed_len = text.trim_end_matches(' ').len();
                hard = text.len() - trimmed_len >= 2;
                text.truncate(trimmed_len);
            }
        }
        let value = if hard {
            InlineValue::LineBreak
        } else {
            InlineValue::SoftBreak
        };
        let node = self.make_inline(value, start, self.pos);
        self.push_inline(node);
        self.skip_line_start_whitespace();
    }

    fn skip_line_start_whitespace(&mut self) {
        while matches!(self.peek_byte(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    /// Backslash escapes ASCII punctuation; at a line end it forces a hard
    /// break; anything else leaves it literal.
    fn handle_backslash(&mut self) {
        let start = self.pos;
        self.pos += 1;
        match self.peek_byte() {
            Some(c) if c.is_ascii_punctuation() => {
                self.pos += 1;
                let node =
                    self.make_inline(InlineValue::Text((c as char).to_string()), start, self.pos);
                self.push_inline(node);
            }
            Some(b'\n') | Some(b'\r') => {
                if self.input.as_bytes()[self.pos] == b'\r' {
                    self.pos += 1;
                }
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
                let node = self.make_inline(InlineValue::LineBreak, start, self.pos);
                self.push_inline(node);
                self.skip_line_start_whitespace();
            }
            _ => {
                let node = self.make_inline(InlineValue::Text("\\".into()), start, self.pos);
                self.push_inline(node);
            }
        }
    }

    fn handle_entity(&mut self) {
        let start = self.pos;
        match scanners::scan_entity(self.input, self.pos) {
            Some((decoded, len)) => {
                self.pos += len;
                let node = self.make_inline(InlineValue::Text(decoded), start, self.pos);
                self.push_inline(node);
            }
            None => {
                self.pos += 1;
                let node = self.make_inline(InlineValue::Text("&".into()), start, self.pos);
                self.push_inline(node);
            }
        }
    }

    fn take_backticks(&mut self) -> usize {
        let bytes = self.input.as_bytes();
        let mut n = 0;
        while self.pos < bytes.len() && bytes[self.pos] == b'`' {
            n += 1;
            self.pos += 1;
        }
        n
    }

    fn handle_backticks(&mut self) {
        let start = self.pos;
        let openticks = self.take_backticks();
        let after_open = self.pos;
        match self.scan_to_closing_backticks(openticks) {
            Some(end) => {
                let raw = &self.input[after_open..end - openticks];
                let code = normalize_code(raw);
                self.pos = end;
                let node = self.make_inline(InlineValue::Code(code), start, self.pos);
                self.push_inline(node);
            }
            None => {
                self.pos = after_open;
                let literal = self.input[start..after_open].to_string();
                let node = self.make_inline(InlineValue::Text(literal), start, after_open);
                self.push_inline(node);
            }
        }
    }

    /// Find a backtick run of exactly `openticks` length, memoizing every
    /// run seen on the way so repeated failures stay linear.
    fn scan_to_closing_backticks(&mut self, openticks: usize) -> Option<usize> {
        if openticks > MAX_BACKTICKS {
            return None;
        }
        if self.scanned_for_backticks && self.backticks[openticks] <= self.pos {
            return None;
        }
        let bytes = self.input.as_bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos] != b'`' {
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                self.scanned_for_backticks = true;
                return None;
            }
            let numticks = self.take_backticks();
            if numticks <= MAX_BACKTICKS {
                self.backticks[numticks] = self.pos - numticks;
            }
            if numticks == openticks {
                return Some(self.pos);
            }
        }
    }

    fn handle_pointy_brace(&mut self) {
        let start = self.pos;
        let rest = &self.input[self.pos..];
        if let Some(len) = scanners::scan_autolink_uri(rest) {
            let inner = self.input[start + 1..start + len - 1].to_string();
            self.pos += len;
            let node = self.make_inline(
                InlineValue::Link {
                    url: inner.clone(),
                    title: String::new(),
                },
                start,
                self.pos,
            );
            let text = self.make_inline(InlineValue::Text(inner), start + 1, self.pos - 1);
            self.arena[node].first_child = Some(text);
            self.arena[node].last_child = Some(text);
            self.push_inline(node);
            return;
        }
        if let Some(len) = scanners::scan_autolink_email(rest) {
            let inner = self.input[start + 1..start + len - 1].to_string();
            self.pos += len;
            let node = self.make_inline(
                InlineValue::Link {
                    url: format!("mailto:{inner}"),
                    title: String::new(),
                },
                start,
                self.pos,
            );
            let text = self.make_inline(InlineValue::Text(inner), start + 1, self.pos - 1);
            self.arena[node].first_child = Some(text);
            self.arena[node].last_child = Some(text);
            self.push_inline(node);
            return;
        }
        if let Some(len) = scanners::scan_html_tag(rest) {
            let raw = self.input[start..start + len].to_string();
            self.pos += len;
            let node = self.make_inline(InlineValue::RawHtml(raw), start, self.pos);
            self.push_inline(node);
            return;
        }
        self.pos += 1;
        let node = self.make_inline(InlineValue::Text("<".into()), start, self.pos);
        self.push_inline(node);
    }

    /// A run of `*`, `_` or `~`: emit its literal text node and, if the run
    /// is flanking-eligible, record a delimiter for resolution. Tilde runs
    /// longer than two are never delimiters.
    fn handle_delim(&mut self, c: u8) {
        let start = self.pos;
        let (numdelims, can_open, can_close) = self.scan_delims(c);
        let literal = self.input[start..self.pos].to_string();
        let inl = self.make_inline(InlineValue::Text(literal), start, self.pos);
        self.push_inline(inl);
        if (can_open || can_close) && (c != b'~' || numdelims <= 2) {
            self.push_delimiter(c, can_open, can_close, numdelims, inl, start);
        }
    }

    /// Flanking analysis for a delimiter run, on the characters (not bytes)
    /// adjacent to it. Underscore gets the extra intraword restriction.
    fn scan_delims(&mut self, c: u8) -> (usize, bool, bool) {
        let before_char = if self.pos == 0 {
            '\n'
        } else {
            self.input[..self.pos].chars().next_back().unwrap_or('\n')
        };
        let bytes = self.input.as_bytes();
        let mut numdelims = 0;
        while self.pos < bytes.len() && bytes[self.pos] == c {
            numdelims += 1;
            self.pos += 1;
        }
        let after_char = self.input[self.pos..].chars().next().unwrap_or('\n');

        let before_ws = scanners::is_unicode_whitespace(before_char);
        let before_punct = scanners::is_unicode_punctuation(before_char);
        let after_ws = scanners::is_unicode_whitespace(after_char);
        let after_punct = scanners::is_unicode_punctuation(after_char);

        let left_flanking =
            numdelims > 0 && !after_ws && !(after_punct && !before_ws && !before_punct);
        let right_flanking =
            numdelims > 0 && !before_ws && !(before_punct && !after_ws && !after_punct);

        if c == b'_' {
            (
                numdelims,
                left_flanking && (!right_flanking || before_punct),
                right_flanking && (!left_flanking || after_punct),
            )
        } else {
            (numdelims, left_flanking, right_flanking)
        }
    }

    fn push_delimiter(
        &mut self,
        delim_char: u8,
        can_open: bool,
        can_close: bool,
        length: usize,
        inl: InlineId,
        position: usize,
    ) {
        let idx = self.delimiters.len();
        self.delimiters.push(Delimiter {
            inl,
            position,
            length,
            delim_char,
            can_open,
            can_close,
            prev: self.last_delimiter,
            next: None,
        });
        if let Some(prev) = self.last_delimiter {
            self.delimiters[prev].next = Some(idx);
        }
        self.last_delimiter = Some(idx);
    }

    fn remove_delimiter(&mut self, idx: usize) {
        let prev = self.delimiters[idx].prev;
        let next = self.delimiters[idx].next;
        if let Some(p) = prev {
            self.delimiters[p].next = next;
        }
        if let Some(n) = next {
            self.delimiters[n].prev = prev;
        }
        if self.last_delimiter == Some(idx) {
            self.last_delimiter = prev;
        }
    }

    fn remove_delimiters(&mut self, stack_bottom: usize) {
        while let Some(idx) = self.last_delimiter {
            if self.delimiters[idx].position < stack_bottom {
                break;
            }
            self.remove_delimiter(idx);
        }
    }

    /// Current length of a delimiter's text run; shrinks as emphasis is
    /// carved off.
    fn delim_text_len(&self, idx: usize) -> usize {
        match &self.arena[self.delimiters[idx].inl].value {
            InlineValue::Text(t) => t.len(),
            _ => 0,
        }
    }

    /// Resolve emphasis among the delimiters at or above `stack_bottom` (a
    /// byte position). Walks closers bottom-up, searching backwards for the
    /// nearest matching opener, with per-category floors so a failed search
    /// is never repeated.
    fn process_emphasis(&mut self, stack_bottom: usize) {
        // floors: tilde, underscore, then star split by can_open and the
        // original run length mod 3
        let mut openers_bottom = [stack_bottom; 8];

        let mut closer = self.last_delimiter;
        while let Some(c) = closer {
            match self.delimiters[c].prev {
                Some(p) if self.delimiters[p].position >= stack_bottom => closer = Some(p),
                _ => break,
            }
        }
        if let Some(c) = closer {
            if self.delimiters[c].position < stack_bottom {
                closer = None;
            }
        }

        while let Some(c_idx) = closer {
            if !self.delimiters[c_idx].can_close {
                closer = self.delimiters[c_idx].next;
                continue;
            }
            let c_char = self.delimiters[c_idx].delim_char;
            let ob_index = match c_char {
                b'~' => 0,
                b'_' => 1,
                _ => {
                    2 + if self.delimiters[c_idx].can_open { 3 } else { 0 }
                        + self.delimiters[c_idx].length % 3
                }
            };
            let bottom = stack_bottom.max(openers_bottom[ob_index]);

            let mut opener = self.delimiters[c_idx].prev;
            let mut opener_found = false;
            while let Some(o_idx) = opener {
                if self.delimiters[o_idx].position < bottom {
                    break;
                }
                if self.delimiters[o_idx].can_open && self.delimiters[o_idx].delim_char == c_char {
                    // An opener-capable closer (or closer-capable opener)
                    // whose combined length is a multiple of three cannot
                    // match unless both runs are themselves multiples.
                    let odd_match = c_char != b'~'
                        && (self.delimiters[c_idx].can_open || self.delimiters[o_idx].can_close)
                        && (self.delimiters[o_idx].length + self.delimiters[c_idx].length) % 3 == 0
                        && !(self.delimiters[o_idx].length % 3 == 0
                            && self.delimiters[c_idx].length % 3 == 0);
                    // Tilde runs only pair whole against an equal run.
                    let tilde_mismatch = c_char == b'~'
                        && self.delim_text_len(o_idx) != self.delim_text_len(c_idx);
                    if !odd_match && !tilde_mismatch {
                        opener_found = true;
                        break;
                    }
                }
                opener = self.delimiters[o_idx].prev;
            }

            if opener_found {
                closer = self.insert_emph(opener.unwrap_or(c_idx), c_idx);
            } else {
                let next = self.delimiters[c_idx].next;
                openers_bottom[ob_index] = self.delimiters[c_idx].position;
                if !self.delimiters[c_idx].can_open {
                    self.remove_delimiter(c_idx);
                }
                closer = next;
            }
        }

        self.remove_delimiters(stack_bottom);
    }

    /// Carve an emphasis node out of a matched opener/closer pair: shorten
    /// both text runs, splice the nodes between them under the new node,
    /// and retire whichever runs were fully consumed. Returns the next
    /// closer to consider.
    fn insert_emph(&mut self, opener: usize, closer: usize) -> Option<usize> {
        let opener_inl = self.delimiters[opener].inl;
        let closer_inl = self.delimiters[closer].inl;
        let delim_char = self.delimiters[opener].delim_char;
        let opener_len = self.delim_text_len(opener);
        let closer_len = self.delim_text_len(closer);

        let use_delims = if delim_char == b'~' {
            opener_len
        } else if opener_len >= 2 && closer_len >= 2 {
            2
        } else {
            1
        };

        if let InlineValue::Text(t) = &mut self.arena[opener_inl].value {
            t.truncate(opener_len - use_delims);
        }
        if let InlineValue::Text(t) = &mut self.arena[closer_inl].value {
            t.truncate(closer_len - use_delims);
        }

        // delimiters strictly between the pair can no longer match anything
        let mut between = self.delimiters[closer].prev;
        while let Some(idx) = between {
            if idx == opener {
                break;
            }
            let prev = self.delimiters[idx].prev;
            self.remove_delimiter(idx);
            between = prev;
        }

        let value = match (delim_char, use_delims) {
            (b'~', _) => InlineValue::Strikethrough,
            (_, 1) => InlineValue::Emphasis,
            _ => InlineValue::Strong,
        };
        let emph = self.arena.alloc(value);
        if self.options.track_source_positions {
            if let (Some(open_span), Some(close_span)) =
                (self.arena[opener_inl].span, self.arena[closer_inl].span)
            {
                self.arena[emph].span = Some(SourceSpan {
                    start: open_span.start,
                    end: close_span.end,
                });
            }
        }

        let first = self.arena[opener_inl].next_sibling.take();
        if let Some(first_id) = first {
            if first_id != closer_inl {
                let mut last = first_id;
                while let Some(next) = self.arena[last].next_sibling {
                    if next == closer_inl {
                        break;
                    }
                    last = next;
                }
                self.arena[last].next_sibling = None;
                self.arena[emph].first_child = Some(first_id);
                self.arena[emph].last_child = Some(last);
            }
        }
        self.arena[opener_inl].next_sibling = Some(emph);
        self.arena[emph].next_sibling = Some(closer_inl);

        let closer_next = self.delimiters[closer].next;
        if opener_len == use_delims {
            self.remove_delimiter(opener);
        }
        if closer_len == use_delims {
            self.remove_delimiter(closer);
            closer_next
        } else {
            Some(closer)
        }
    }

    fn push_bracket(&mut self, image: bool, inl_text: InlineId) {
        if let Some(top) = self.brackets.last_mut() {
            top.bracket_after = true;
        }
        self.brackets.push(Bracket {
            inl_text,
            position: self.pos,
            image,
            bracket_after: false,
        });
        if !image {
            self.no_link_openers = false;
        }
    }

    /// A `]`: try, in order, an inline `(destination "title")` suffix, an
    /// explicit or collapsed reference label, and a shortcut reference. On
    /// failure the brackets stay as literal text.
    fn handle_close_bracket(&mut self) {
        self.pos += 1;
        let initial_pos = self.pos;

        let Some(top) = self.brackets.last() else {
            let node = self.make_inline(InlineValue::Text("]".into()), initial_pos - 1, initial_pos);
            self.push_inline(node);
            return;
        };
        let is_image = top.image;
        let opener_position = top.position;
        let bracket_after = top.bracket_after;

        if !is_image && self.no_link_openers {
            self.brackets.pop();
            let node = self.make_inline(InlineValue::Text("]".into()), initial_pos - 1, initial_pos);
            self.push_inline(node);
            return;
        }

        if self.peek_byte() == Some(b'(') {
            if let Some((url, title, end)) = self.scan_inline_link_suffix(self.pos) {
                self.pos = end;
                self.close_bracket_match(is_image, url, title);
                return;
            }
        }

        let (mut label, mut found_label) =
            match scanners::scan_link_label(&self.input[self.pos..]) {
                Some((lab, consumed)) => {
                    self.pos += consumed;
                    (lab.to_string(), true)
                }
                None => (String::new(), false),
            };

        // shortcut reference, unless another bracket opened inside this one
        if (!found_label || label.is_empty()) && !bracket_after {
            label = self.input[opener_position..initial_pos - 1].to_string();
            found_label = true;
        }

        if found_label {
            if let RefLookup::Found(reference) = self.refmap.lookup(&label) {
                let url = reference.url.clone();
                let title = reference.title.clone();
                self.close_bracket_match(is_image, url, title);
                return;
            }
        }

        self.brackets.pop();
        self.pos = initial_pos;
        let node = self.make_inline(InlineValue::Text("]".into()), initial_pos - 1, initial_pos);
        self.push_inline(node);
    }

    /// Scan `(dest "title")` starting at the `(`. The title needs
    /// whitespace before it. Returns the position just past the `)`.
    fn scan_inline_link_suffix(&self, open: usize) -> Option<(String, String, usize)> {
        let bytes = self.input.as_bytes();
        let dest_start = open + 1 + scanners::scan_spnl(&bytes[open + 1..]);
        let (url, dest_len) = scanners::scan_link_destination(&self.input[dest_start..])?;
        let after_dest = dest_start + dest_len;
        let sps = scanners::scan_spnl(&bytes[after_dest..]);
        let mut title = String::new();
        let mut after = after_dest + sps;
        if sps > 0 {
            if let Some((t, title_len)) = scanners::scan_link_title(&self.input[after..]) {
                title = t;
                after += title_len;
                after += scanners::scan_spnl(&bytes[after..]);
            }
        }
        if bytes.get(after) == Some(&b')') {
            Some((url, title, after + 1))
        } else {
            None
        }
    }

    /// Turn the matched bracket's opener text node into the link or image
    /// node in place, adopting everything parsed since it as children, then
    /// resolve emphasis among those children.
    fn close_bracket_match(&mut self, is_image: bool, url: String, title: String) {
        let Some(bracket) = self.brackets.pop() else {
            return;
        };
        let opener_inl = bracket.inl_text;
        self.arena[opener_inl].value = if is_image {
            InlineValue::Image { url, title }
        } else {
            InlineValue::Link { url, title }
        };
        let first = self.arena[opener_inl].next_sibling.take();
        if first.is_some() {
            self.arena[opener_inl].first_child = first;
            self.arena[opener_inl].last_child = self.tail;
        }
        self.tail = Some(opener_inl);
        if self.options.track_source_positions && !self.spans.is_empty() {
            let end = self.map_offset(self.pos);
            if let Some(span) = &mut self.arena[opener_inl].span {
                span.end = end;
            }
        }

        self.process_emphasis(bracket.position);

        if !is_image {
            self.no_link_openers = true;
        }
    }
}

/// Code span cleanup: line endings become spaces, and one leading plus one
/// trailing space are stripped when both are present and the span is not
/// all spaces.
fn normalize_code(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push(' ');
            }
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    if out.len() >= 2
        && out.starts_with(' ')
        && out.ends_with(' ')
        && !out.chars().all(|c| c == ' ')
    {
        out = out[1..out.len() - 1].to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Reference;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> (InlineArena, Option<InlineId>) {
        parse_with_refs(input, &RefMap::default())
    }

    fn parse_with_refs(input: &str, refmap: &RefMap) -> (InlineArena, Option<InlineId>) {
        let mut arena = InlineArena::default();
        let options = Options::default();
        let head = parse_inlines(&mut arena, refmap, &options, input, &[]);
        (arena, head)
    }

    fn chain(arena: &InlineArena, head: Option<InlineId>) -> Vec<InlineValue> {
        let mut out = Vec::new();
        let mut cur = head;
        while let Some(id) = cur {
            out.push(arena[id].value.clone());
            cur = arena[id].next_sibling;
        }
        out
    }

    fn children(arena: &InlineArena, id: InlineId) -> Vec<InlineValue> {
        chain(arena, arena[id].first_child)
    }

    fn text(s: &str) -> InlineValue {
        InlineValue::Text(s.to_string())
    }

    #[test]
    fn test_plain_text_single_node() {
        let (arena, head) = parse("hello world");
        assert_eq!(chain(&arena, head), vec![text("hello world")]);
    }

    #[test]
    fn test_soft_and_hard_breaks() {
        let (arena, head) = parse("foo\nbar");
        assert_eq!(
            chain(&arena, head),
            vec![text("foo"), InlineValue::SoftBreak, text("bar")]
        );

        let (arena, head) = parse("foo  \nbar");
        assert_eq!(
            chain(&arena, head),
            vec![text("foo"), InlineValue::LineBreak, text("bar")]
        );

        let (arena, head) = parse("foo\\\nbar");
        assert_eq!(
            chain(&arena, head),
            vec![text("foo"), InlineValue::LineBreak, text("bar")]
        );
    }

    #[test]
    fn test_backslash_escape() {
        let (arena, head) = parse("\\*not emphasized\\*");
        assert_eq!(
            chain(&arena, head),
            vec![text("*"), text("not emphasized"), text("*")]
        );

        let (arena, head) = parse("a\\b");
        assert_eq!(chain(&arena, head), vec![text("a"), text("\\"), text("b")]);
    }

    #[test]
    fn test_entity_decoding() {
        let (arena, head) = parse("&amp;&MadeUp;");
        assert_eq!(
            chain(&arena, head),
            vec![text("&"), text("&"), text("MadeUp;")]
        );
    }

    #[test]
    fn test_code_span_normalization() {
        let (arena, head) = parse("`` foo ` bar ``");
        assert_eq!(
            chain(&arena, head),
            vec![InlineValue::Code("foo ` bar".to_string())]
        );

        let (arena, head) = parse("` `` `");
        assert_eq!(chain(&arena, head), vec![InlineValue::Code("``".to_string())]);
    }

    #[test]
    fn test_unmatched_backticks_stay_literal() {
        let (arena, head) = parse("``foo`");
        assert_eq!(chain(&arena, head), vec![text("``"), text("foo"), text("`")]);
    }

    #[test]
    fn test_emphasis_and_strong() {
        let (arena, head) = parse("*foo* and **bar**");
        let top = chain(&arena, head);
        assert_eq!(
            top,
            vec![InlineValue::Emphasis, text(" and "), InlineValue::Strong]
        );
        assert_eq!(children(&arena, head.unwrap()), vec![text("foo")]);
    }

    #[test]
    fn test_strong_with_nested_emphasis() {
        // the trailing *** closes the inner run first, then the outer
        let (arena, head) = parse("**foo*bar***");
        let top = chain(&arena, head);
        assert_eq!(top, vec![InlineValue::Strong]);
        let inner = children(&arena, head.unwrap());
        assert_eq!(inner, vec![text("foo"), InlineValue::Emphasis]);
    }

    #[test]
    fn test_multiple_of_three_rule() {
        let (arena, head) = parse("*foo**bar***");
        let top = chain(&arena, head);
        assert_eq!(top, vec![InlineValue::Emphasis]);
        let inner = children(&arena, head.unwrap());
        assert_eq!(inner, vec![text("foo"), InlineValue::Strong]);
    }

    #[test]
    fn test_intraword_underscore_is_literal() {
        let (arena, head) = parse("foo_bar_baz");
        assert_eq!(
            chain(&arena, head),
            vec![text("foo"), text("_"), text("bar"), text("_"), text("baz")]
        );
    }

    #[test]
    fn test_intraword_star_works() {
        let (arena, head) = parse("foo*bar*baz");
        assert_eq!(
            chain(&arena, head),
            vec![text("foo"), InlineValue::Emphasis, text("baz")]
        );
    }

    #[test]
    fn test_strikethrough() {
        let (arena, head) = parse("~~gone~~");
        assert_eq!(chain(&arena, head), vec![InlineValue::Strikethrough]);

        // unequal runs do not pair
        let (arena, head) = parse("~~no~");
        assert_eq!(chain(&arena, head), vec![text("~~"), text("no"), text("~")]);

        // runs of three or more are never delimiters
        let (arena, head) = parse("~~~no~~~");
        assert_eq!(chain(&arena, head), vec![text("~~~"), text("no"), text("~~~")]);
    }

    #[test]
    fn test_inline_link() {
        let (arena, head) = parse("[text](/url \"title\")");
        let top = chain(&arena, head);
        assert_eq!(
            top,
            vec![InlineValue::Link {
                url: "/url".to_string(),
                title: "title".to_string()
            }]
        );
        assert_eq!(children(&arena, head.unwrap()), vec![text("text")]);
    }

    #[test]
    fn test_inline_link_empty_destination() {
        let (arena, head) = parse("[a]()");
        assert_eq!(
            chain(&arena, head),
            vec![InlineValue::Link {
                url: String::new(),
                title: String::new()
            }]
        );
    }

    #[test]
    fn test_failed_inline_link_degrades() {
        let (arena, head) = parse("[a](oops");
        assert_eq!(
            chain(&arena, head),
            vec![text("["), text("a"), text("]"), text("(oops")]
        );
    }

    #[test]
    fn test_image() {
        let (arena, head) = parse("![alt](/pic)");
        assert_eq!(
            chain(&arena, head),
            vec![InlineValue::Image {
                url: "/pic".to_string(),
                title: String::new()
            }]
        );
    }

    #[test]
    fn test_no_nested_links() {
        let (arena, head) = parse("[a [b](u1) c](u2)");
        let top = chain(&arena, head);
        assert_eq!(
            top,
            vec![
                text("["),
                text("a "),
                InlineValue::Link {
                    url: "u1".to_string(),
                    title: String::new()
                },
                text(" c"),
                text("]"),
                text("(u2)"),
            ]
        );
    }

    #[test]
    fn test_images_nest_inside_links() {
        let (arena, head) = parse("[![alt](/pic)](/url)");
        let top = chain(&arena, head);
        assert_eq!(
            top,
            vec![InlineValue::Link {
                url: "/url".to_string(),
                title: String::new()
            }]
        );
        assert_eq!(
            children(&arena, head.unwrap()),
            vec![InlineValue::Image {
                url: "/pic".to_string(),
                title: String::new()
            }]
        );
    }

    #[test]
    fn test_reference_links() {
        let mut refmap = RefMap::default();
        refmap.insert(
            "foo",
            Reference {
                url: "/url".to_string(),
                title: "t".to_string(),
            },
        );

        for input in ["[foo][]", "[foo]", "[bar][foo]"] {
            let (arena, head) = parse_with_refs(input, &refmap);
            let top = chain(&arena, head);
            assert_eq!(
                top,
                vec![InlineValue::Link {
                    url: "/url".to_string(),
                    title: "t".to_string()
                }],
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_undefined_reference_stays_literal() {
        let (arena, head) = parse("[nope][missing]");
        assert_eq!(
            chain(&arena, head),
            vec![
                text("["),
                text("nope"),
                text("]"),
                text("["),
                text("missing"),
                text("]")
            ]
        );
    }

    #[test]
    fn test_shortcut_suppressed_by_following_bracket() {
        let mut refmap = RefMap::default();
        refmap.insert(
            "foo",
            Reference {
                url: "/url".to_string(),
                title: String::new(),
            },
        );
        // `[foo][bar]` with no `bar` definition is not a shortcut for foo
        let (arena, head) = parse_with_refs("[foo][bar]", &refmap);
        let top = chain(&arena, head);
        assert!(
            !top.iter()
                .any(|v| matches!(v, InlineValue::Link { .. })),
            "got {top:?}"
        );
    }

    #[test]
    fn test_emphasis_inside_link_text() {
        let (arena, head) = parse("[*em*](/url)");
        let top = chain(&arena, head);
        assert_eq!(
            top,
            vec![InlineValue::Link {
                url: "/url".to_string(),
                title: String::new()
            }]
        );
        assert_eq!(children(&arena, head.unwrap()), vec![InlineValue::Emphasis]);
    }

    #[test]
    fn test_autolinks() {
        let (arena, head) = parse("<http://example.com>");
        assert_eq!(
            chain(&arena, head),
            vec![InlineValue::Link {
                url: "http://example.com".to_string(),
                title: String::new()
            }]
        );

        let (arena, head) = parse("<me@example.com>");
        assert_eq!(
            chain(&arena, head),
            vec![InlineValue::Link {
                url: "mailto:me@example.com".to_string(),
                title: String::new()
            }]
        );
    }

    #[test]
    fn test_raw_html_tag() {
        let (arena, head) = parse("a <b> c < d");
        assert_eq!(
            chain(&arena, head),
            vec![
                text("a "),
                InlineValue::RawHtml("<b>".to_string()),
                text(" c "),
                text("<"),
                text(" d")
            ]
        );
    }

    #[test]
    fn test_unmatched_emphasis_stays_literal() {
        let (arena, head) = parse("*open");
        assert_eq!(chain(&arena, head), vec![text("*"), text("open")]);
    }
}
