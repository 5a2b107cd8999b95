//! HTML rendering over the document's visit-event stream. One pass, no
//! recursion: block tags are emitted on open/close events, with a newline
//! discipline that keeps block boundaries on their own lines.

use crate::ast::{BlockValue, Document, InlineValue, NodeRef};

pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        HtmlRenderer
    }

    pub fn render(&self, doc: &Document) -> String {
        let mut out = Output {
            buf: String::new(),
            alt_depth: 0,
        };
        for event in doc.traverse() {
            match event.node {
                NodeRef::Block(node) => {
                    if event.is_opening {
                        out.open_block(doc, node);
                    }
                    if event.is_closing {
                        out.close_block(doc, node);
                    }
                }
                NodeRef::Inline(node) => {
                    if event.is_opening {
                        out.open_inline(node);
                    }
                    if event.is_closing {
                        out.close_inline(node);
                    }
                }
            }
        }
        out.buf
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

struct Output {
    buf: String,
    /// Nesting depth of images. Inside an image only the plain text of the
    /// children is emitted, into the `alt` attribute.
    alt_depth: usize,
}

impl Output {
    /// Ensure the buffer ends at a line boundary before a block tag.
    fn cr(&mut self) {
        if !self.buf.is_empty() && !self.buf.ends_with('\n') {
            self.buf.push('\n');
        }
    }

    /// A paragraph directly inside an item of a tight list loses its tags.
    fn in_tight_item(&self, doc: &Document, node: &crate::ast::BlockNode) -> bool {
        let Some(parent) = node.parent else {
            return false;
        };
        if !matches!(doc.blocks[parent].value, BlockValue::ListItem(..)) {
            return false;
        }
        match doc.blocks[parent].parent {
            Some(gp) => matches!(&doc.blocks[gp].value, BlockValue::List(data) if data.tight),
            None => false,
        }
    }

    fn open_block(&mut self, doc: &Document, node: &crate::ast::BlockNode) {
        match &node.value {
            BlockValue::Document | BlockValue::ReferenceDefinition { .. } => {}
            BlockValue::Paragraph => {
                if !self.in_tight_item(doc, node) {
                    self.cr();
                    self.buf.push_str("<p>");
                }
            }
            BlockValue::BlockQuote => {
                self.cr();
                self.buf.push_str("<blockquote>\n");
            }
            BlockValue::List(data) => {
                self.cr();
                match data.kind {
                    crate::ast::ListKind::Bullet => self.buf.push_str("<ul>\n"),
                    crate::ast::ListKind::Ordered => {
                        if data.start == 1 {
                            self.buf.push_str("<ol>\n");
                        } else {
                            self.buf.push_str(&format!("<ol start=\"{}\">\n", data.start));
                        }
                    }
                }
            }
            BlockValue::ListItem(..) => {
                self.cr();
                self.buf.push_str("<li>");
            }
            BlockValue::AtxHeading { level } | BlockValue::SetextHeading { level } => {
                self.cr();
                self.buf.push_str(&format!("<h{level}>"));
            }
            BlockValue::IndentedCode { literal } => {
                self.cr();
                self.buf.push_str("<pre><code>");
                self.buf.push_str(&escape_html(literal));
                self.buf.push_str("</code></pre>\n");
            }
            BlockValue::FencedCode { info, literal, .. } => {
                self.cr();
                match info.split_whitespace().next() {
                    Some(lang) => {
                        self.buf.push_str("<pre><code class=\"language-");
                        self.buf.push_str(&escape_html(lang));
                        self.buf.push_str("\">");
                    }
                    None => self.buf.push_str("<pre><code>"),
                }
                self.buf.push_str(&escape_html(literal));
                self.buf.push_str("</code></pre>\n");
            }
            BlockValue::HtmlBlock { literal, .. } => {
                self.cr();
                self.buf.push_str(literal);
                self.cr();
            }
            BlockValue::ThematicBreak => {
                self.cr();
                self.buf.push_str("<hr />\n");
            }
        }
    }

    fn close_block(&mut self, doc: &Document, node: &crate::ast::BlockNode) {
        match &node.value {
            BlockValue::Paragraph => {
                if !self.in_tight_item(doc, node) {
                    self.buf.push_str("</p>\n");
                }
            }
            BlockValue::BlockQuote => {
                self.cr();
                self.buf.push_str("</blockquote>\n");
            }
            BlockValue::List(data) => {
                self.cr();
                match data.kind {
                    crate::ast::ListKind::Bullet => self.buf.push_str("</ul>\n"),
                    crate::ast::ListKind::Ordered => self.buf.push_str("</ol>\n"),
                }
            }
            BlockValue::ListItem(..) => {
                self.buf.push_str("</li>\n");
            }
            BlockValue::AtxHeading { level } | BlockValue::SetextHeading { level } => {
                self.buf.push_str(&format!("</h{level}>\n"));
            }
            _ => {}
        }
    }

    fn open_inline(&mut self, node: &crate::ast::InlineNode) {
        if self.alt_depth > 0 {
            // plain mode: only the text content survives
            match &node.value {
                InlineValue::Text(text) => self.buf.push_str(&escape_html(text)),
                InlineValue::Code(code) => self.buf.push_str(&escape_html(code)),
                InlineValue::SoftBreak | InlineValue::LineBreak => self.buf.push(' '),
                InlineValue::Image { .. } => self.alt_depth += 1,
                _ => {}
            }
            return;
        }
        match &node.value {
            InlineValue::Text(text) => self.buf.push_str(&escape_html(text)),
            InlineValue::SoftBreak => self.buf.push('\n'),
            InlineValue::LineBreak => self.buf.push_str("<br />\n"),
            InlineValue::Code(code) => {
                self.buf.push_str("<code>");
                self.buf.push_str(&escape_html(code));
                self.buf.push_str("</code>");
            }
            InlineValue::RawHtml(raw) => self.buf.push_str(raw),
            InlineValue::Emphasis => self.buf.push_str("<em>"),
            InlineValue::Strong => self.buf.push_str("<strong>"),
            InlineValue::Strikethrough => self.buf.push_str("<del>"),
            InlineValue::Link { url, title } => {
                self.buf.push_str("<a href=\"");
                self.buf.push_str(&crate::scanners::encode_url(url));
                self.buf.push('"');
                if !title.is_empty() {
                    self.buf.push_str(" title=\"");
                    self.buf.push_str(&escape_html(title));
                    self.buf.push('"');
                }
                self.buf.push('>');
            }
            InlineValue::Image { url, .. } => {
                self.buf.push_str("<img src=\"");
                self.buf.push_str(&crate::scanners::encode_url(url));
                self.buf.push_str("\" alt=\"");
                self.alt_depth = 1;
            }
        }
    }

    fn close_inline(&mut self, node: &crate::ast::InlineNode) {
        if self.alt_depth > 0 {
            if let InlineValue::Image { title, .. } = &node.value {
                self.alt_depth -= 1;
                if self.alt_depth == 0 {
                    self.buf.push('"');
                    if !title.is_empty() {
                        self.buf.push_str(" title=\"");
                        self.buf.push_str(&escape_html(title));
                        self.buf.push('"');
                    }
                    self.buf.push_str(" />");
                }
            }
            return;
        }
        match &node.value {
            InlineValue::Emphasis => self.buf.push_str("</em>"),
            InlineValue::Strong => self.buf.push_str("</strong>"),
            InlineValue::Strikethrough => self.buf.push_str("</del>"),
            InlineValue::Link { .. } => self.buf.push_str("</a>"),
            _ => {}
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use pretty_assertions::assert_eq;

    fn render(input: &str) -> String {
        let options = Options::default();
        let doc = crate::parse_document(input, &options);
        HtmlRenderer::new().render(&doc)
    }

    #[test]
    fn test_paragraphs_and_heading() {
        assert_eq!(
            render("# Title\n\nbody text\n"),
            "<h1>Title</h1>\n<p>body text</p>\n"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        assert_eq!(render("a < b & c\n"), "<p>a &lt; b &amp; c</p>\n");
    }

    #[test]
    fn test_tight_list_suppresses_paragraphs() {
        assert_eq!(
            render("- one\n- two\n"),
            "<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n"
        );
    }

    #[test]
    fn test_loose_list_keeps_paragraphs() {
        assert_eq!(
            render("- one\n\n- two\n"),
            "<ul>\n<li>\n<p>one</p>\n</li>\n<li>\n<p>two</p>\n</li>\n</ul>\n"
        );
    }

    #[test]
    fn test_ordered_list_start_attribute() {
        assert_eq!(
            render("3. c\n4. d\n"),
            "<ol start=\"3\">\n<li>c</li>\n<li>d</li>\n</ol>\n"
        );
    }

    #[test]
    fn test_fenced_code_language_class() {
        assert_eq!(
            render("```rust ignore\nfn main() {}\n```\n"),
            "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>\n"
        );
    }

    #[test]
    fn test_block_quote() {
        assert_eq!(
            render("> quoted\n"),
            "<blockquote>\n<p>quoted</p>\n</blockquote>\n"
        );
    }

    #[test]
    fn test_link_with_title_and_url_encoding() {
        assert_eq!(
            render("[a](/b c)\n"),
            "<p>[a](/b c)</p>\n"
        );
        assert_eq!(
            render("[a](/b%20c \"t\")\n"),
            "<p><a href=\"/b%20c\" title=\"t\">a</a></p>\n"
        );
    }

    #[test]
    fn test_image_alt_text_is_plain() {
        assert_eq!(
            render("![*em* and `code`](/pic)\n"),
            "<p><img src=\"/pic\" alt=\"em and code\" /></p>\n"
        );
    }

    #[test]
    fn test_reference_definition_renders_nothing() {
        assert_eq!(render("[a]: /url\n"), "");
    }

    #[test]
    fn test_hard_break() {
        assert_eq!(render("a  \nb\n"), "<p>a<br />\nb</p>\n");
    }
}
