//! Cross-cutting guarantees: parsing is deterministic and total, raw block
//! content stays anchored to the source text, delimiters are conserved, and
//! the extension seams compose with the built-in rules.

use pretty_assertions::assert_eq;
use stonemark::ast::{BlockValue, NodeRef};
use stonemark::{
    markdown_to_html, markdown_to_html_with_options, parse_document, BlockRule, BlockSeed,
    InlineCursor, InlineRule, Options,
};

#[test]
fn parsing_is_deterministic() {
    let input = "# A\n\n- one\n- two\n\n> quote *em*\n\n    code\n";
    let a = parse_document(input, &Options::default());
    let b = parse_document(input, &Options::default());
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn parsing_never_fails_on_malformed_input() {
    // every degenerate construct degrades to literal output
    for input in [
        "[",
        "![",
        "*",
        "`",
        "[a](",
        "<",
        "&#;",
        "~~~",
        "> ",
        "1.",
    ] {
        let html = markdown_to_html(input);
        assert!(html.is_empty() || html.ends_with('\n'), "input {input:?}");
    }
}

#[test]
fn paragraph_content_round_trips_to_source() {
    let input = "first *line*\nsecond line\n";
    let options = Options {
        track_source_positions: true,
        ..Options::default()
    };
    let doc = parse_document(input, &options);
    let para = doc.blocks[doc.root].first_child.unwrap();
    assert_eq!(doc.blocks[para].content.rebuild(input), input);
}

#[test]
fn source_spans_cover_whole_blocks() {
    let input = "# head\n\npara one\npara two\n";
    let options = Options {
        track_source_positions: true,
        ..Options::default()
    };
    let doc = parse_document(input, &options);
    for event in doc.traverse() {
        if let NodeRef::Block(node) = event.node {
            if !event.is_opening {
                continue;
            }
            if matches!(node.value, BlockValue::Document) {
                continue;
            }
            let span = node.span.expect("block spans recorded");
            assert!(span.start <= span.end);
            assert!(span.end <= input.len());
        }
    }
}

#[test]
fn unmatched_delimiters_remain_literal() {
    assert_eq!(markdown_to_html("*a**\n"), "<p><em>a</em>*</p>\n");
    assert_eq!(markdown_to_html("**a*\n"), "<p>*<em>a</em></p>\n");
    assert_eq!(markdown_to_html("*open\n"), "<p>*open</p>\n");
}

#[test]
fn delimiter_runs_are_conserved() {
    // every `*` of the input ends up either consumed by an emphasis pair
    // (2 per <em>, 4 per <strong>) or emitted as a literal star
    for n in 1..12 {
        let run = "*".repeat(n);
        let input = format!("a{run}b{run}c\n");
        let html = markdown_to_html(&input);
        let em = html.matches("<em>").count();
        let strong = html.matches("<strong>").count();
        let literal = html.matches('*').count();
        assert_eq!(
            2 * em + 4 * strong + literal,
            2 * n,
            "run length {n}: {html:?}"
        );
    }
}

#[test]
fn rule_of_three_nesting() {
    assert_eq!(
        markdown_to_html("**foo*bar***\n"),
        "<p><strong>foo<em>bar</em></strong></p>\n"
    );
    assert_eq!(
        markdown_to_html("*foo**bar***\n"),
        "<p><em>foo<strong>bar</strong></em></p>\n"
    );
}

#[test]
fn links_do_not_nest() {
    assert_eq!(
        markdown_to_html("[a [b](u1) c](u2)\n"),
        "<p>[a <a href=\"u1\">b</a> c](u2)</p>\n"
    );
}

#[test]
fn references_resolve_forward_and_first_wins() {
    assert_eq!(
        markdown_to_html("[foo]\n\n[foo]: /url\n"),
        "<p><a href=\"/url\">foo</a></p>\n"
    );
    assert_eq!(
        markdown_to_html("[foo]: /first\n[foo]: /second\n\n[foo]\n"),
        "<p><a href=\"/first\">foo</a></p>\n"
    );
}

#[test]
fn oversized_reference_labels_are_rejected() {
    let label = "a".repeat(1200);
    let input = format!("[{label}]: /url\n");
    let doc = parse_document(&input, &Options::default());
    assert!(doc.reference(&label).is_none());
}

#[test]
fn tight_and_loose_lists() {
    assert_eq!(
        markdown_to_html("- a\n- b\n"),
        "<ul>\n<li>a</li>\n<li>b</li>\n</ul>\n"
    );
    assert_eq!(
        markdown_to_html("- a\n\n- b\n"),
        "<ul>\n<li>\n<p>a</p>\n</li>\n<li>\n<p>b</p>\n</li>\n</ul>\n"
    );
}

#[test]
fn lazy_continuation_lines() {
    assert_eq!(
        markdown_to_html("> a\nb\n"),
        "<blockquote>\n<p>a\nb</p>\n</blockquote>\n"
    );
}

struct BannerRule;

impl BlockRule for BannerRule {
    fn try_start(&self, line: &str) -> Option<BlockSeed> {
        if line.starts_with("@@@") {
            Some(BlockSeed::ThematicBreak)
        } else {
            None
        }
    }
}

struct ArrowHeadingRule;

impl BlockRule for ArrowHeadingRule {
    fn try_start(&self, line: &str) -> Option<BlockSeed> {
        if line.starts_with("=> ") {
            Some(BlockSeed::Heading {
                level: 2,
                text_start: 3,
            })
        } else {
            None
        }
    }
}

struct SmileyRule;

impl InlineRule for SmileyRule {
    fn trigger(&self) -> u8 {
        b':'
    }

    fn try_handle(&self, cursor: InlineCursor<'_>) -> Option<(stonemark::ast::InlineValue, usize)> {
        if cursor.rest().starts_with(":)") {
            Some((stonemark::ast::InlineValue::Text("\u{263A}".to_string()), 2))
        } else {
            None
        }
    }
}

#[test]
fn custom_block_rule_runs_before_builtins() {
    let mut options = Options::default();
    options
        .extensions
        .register_block_rule(Box::new(BannerRule));
    assert_eq!(
        markdown_to_html_with_options("@@@\ntext\n", &options),
        "<hr />\n<p>text</p>\n"
    );
    // without the rule the line is a plain paragraph
    assert_eq!(
        markdown_to_html("@@@\ntext\n"),
        "<p>@@@\ntext</p>\n"
    );
}

#[test]
fn custom_heading_rule() {
    let mut options = Options::default();
    options
        .extensions
        .register_block_rule(Box::new(ArrowHeadingRule));
    assert_eq!(
        markdown_to_html_with_options("=> Gemini\n", &options),
        "<h2>Gemini</h2>\n"
    );
}

#[test]
fn custom_inline_rule_runs_before_builtins() {
    let mut options = Options::default();
    options
        .extensions
        .register_inline_rule(Box::new(SmileyRule));
    assert_eq!(
        markdown_to_html_with_options("hi :) there\n", &options),
        "<p>hi \u{263A} there</p>\n"
    );
    // a failed handler falls through to literal text
    assert_eq!(
        markdown_to_html_with_options("a : b\n", &options),
        "<p>a : b</p>\n"
    );
}
