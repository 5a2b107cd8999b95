/// Arena-backed AST for CommonMark documents
///
/// Blocks and inlines live in separate `Vec` stores and point at each other
/// with plain index handles, so the parent/child/sibling cycles of the tree
/// never need reference counting. Block nodes keep a non-owning back-pointer
/// to their parent; inline nodes carry none and walkers maintain an explicit
/// stack instead.
use serde::{Deserialize, Serialize};

use crate::parser::{RefLookup, RefMap, Reference};

/// Handle to a block node inside a `BlockArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId(pub(crate) usize);

/// Handle to an inline node inside an `InlineArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineId(pub(crate) usize);

/// Byte range of source text covered by a node, populated when
/// `Options::track_source_positions` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

/// One line of raw text accumulated by an open block: a byte range into the
/// source (marker prefixes already consumed, line ending excluded) plus the
/// number of pad spaces owed when a tab was only partially consumed by
/// indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
    pub pad: usize,
}

/// Raw text of a leaf block as a list of line spans. The text itself stays in
/// the source buffer until inline parsing (or code-block finalization)
/// materializes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringContent {
    pub spans: Vec<LineSpan>,
}

impl StringContent {
    pub fn push_span(&mut self, start: usize, end: usize, pad: usize) {
        self.spans.push(LineSpan { start, end, pad });
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn clear(&mut self) {
        self.spans.clear();
    }

    /// Materialize the accumulated text: pad spaces, the source slice, and a
    /// newline per recorded line.
    pub fn rebuild(&self, source: &str) -> String {
        let mut out = String::new();
        for span in &self.spans {
            for _ in 0..span.pad {
                out.push(' ');
            }
            out.push_str(&source[span.start..span.end]);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    Bullet,
    Ordered,
}

/// Marker data shared by a list container and its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListData {
    pub kind: ListKind,
    /// Indentation of the marker itself, in columns.
    pub marker_offset: usize,
    /// Columns from the marker start to the item content.
    pub padding: usize,
    pub start: usize,
    /// `.` or `)` for ordered lists, 0 otherwise.
    pub delimiter: u8,
    /// `-`, `+` or `*` for bullet lists, 0 otherwise.
    pub bullet_char: u8,
    pub tight: bool,
}

impl ListData {
    /// Items belong to the same list only when marker kind, delimiter and
    /// bullet character all agree.
    pub fn matches(&self, other: &ListData) -> bool {
        self.kind == other.kind
            && self.delimiter == other.delimiter
            && self.bullet_char == other.bullet_char
    }
}

/// Block tag plus its tag-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockValue {
    Document,
    BlockQuote,
    List(ListData),
    ListItem(ListData),
    IndentedCode {
        literal: String,
    },
    FencedCode {
        fence_char: u8,
        fence_length: usize,
        fence_offset: usize,
        info: String,
        literal: String,
    },
    HtmlBlock {
        kind: u8, // 1..=7
        literal: String,
    },
    Paragraph,
    AtxHeading {
        level: u8,
    },
    SetextHeading {
        level: u8,
    },
    ThematicBreak,
    /// A closed paragraph whose every line was consumed as a link reference
    /// definition. Renders nothing.
    ReferenceDefinition {
        definitions: usize,
    },
}

impl BlockValue {
    /// Whether a block of this tag may hold `child` as a direct child.
    pub fn can_contain(&self, child: &BlockValue) -> bool {
        match self {
            BlockValue::Document | BlockValue::BlockQuote | BlockValue::ListItem(..) => {
                !matches!(child, BlockValue::ListItem(..))
            }
            BlockValue::List(..) => matches!(child, BlockValue::ListItem(..)),
            _ => false,
        }
    }

    /// Leaf blocks that accumulate raw text line by line.
    pub fn accepts_lines(&self) -> bool {
        matches!(
            self,
            BlockValue::Paragraph
                | BlockValue::AtxHeading { .. }
                | BlockValue::SetextHeading { .. }
                | BlockValue::IndentedCode { .. }
                | BlockValue::FencedCode { .. }
                | BlockValue::HtmlBlock { .. }
        )
    }

    /// Leaf blocks whose text goes through the inline parser.
    pub fn contains_inlines(&self) -> bool {
        matches!(
            self,
            BlockValue::Paragraph | BlockValue::AtxHeading { .. } | BlockValue::SetextHeading { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    pub value: BlockValue,
    pub parent: Option<BlockId>,
    pub first_child: Option<BlockId>,
    pub last_child: Option<BlockId>,
    pub prev_sibling: Option<BlockId>,
    pub next_sibling: Option<BlockId>,
    /// Still accepting lines.
    pub is_open: bool,
    /// The last line processed while this block was the deepest match was
    /// blank. Drives tight/loose list determination.
    pub is_last_line_blank: bool,
    pub content: StringContent,
    /// Head of the inline chain, set during phase two for blocks that
    /// `contains_inlines`.
    pub inlines: Option<InlineId>,
    pub span: Option<SourceSpan>,
}

impl BlockNode {
    fn new(value: BlockValue) -> Self {
        BlockNode {
            value,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            is_open: true,
            is_last_line_blank: false,
            content: StringContent::default(),
            inlines: None,
            span: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockArena {
    nodes: Vec<BlockNode>,
}

impl BlockArena {
    pub fn alloc(&mut self, value: BlockValue) -> BlockId {
        let id = BlockId(self.nodes.len());
        self.nodes.push(BlockNode::new(value));
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach `child` as the last child of `parent`, keeping the sibling
    /// chain and the child's back-pointer consistent.
    pub fn append_child(&mut self, parent: BlockId, child: BlockId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[child.0].prev_sibling = self.nodes[parent.0].last_child;
        if let Some(prev) = self.nodes[parent.0].last_child {
            self.nodes[prev.0].next_sibling = Some(child);
        } else {
            self.nodes[parent.0].first_child = Some(child);
        }
        self.nodes[parent.0].last_child = Some(child);
    }

    /// The last child of `id`, if it is still open.
    pub fn last_open_child(&self, id: BlockId) -> Option<BlockId> {
        match self.nodes[id.0].last_child {
            Some(child) if self.nodes[child.0].is_open => Some(child),
            _ => None,
        }
    }

    /// Whether the chain of last children starting at `id` ends in a blank
    /// line. Only list structures propagate the question downward.
    pub fn ends_with_blank_line(&self, id: BlockId) -> bool {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if self.nodes[node.0].is_last_line_blank {
                return true;
            }
            cur = match self.nodes[node.0].value {
                BlockValue::List(..) | BlockValue::ListItem(..) => self.nodes[node.0].last_child,
                _ => None,
            };
        }
        false
    }
}

impl std::ops::Index<BlockId> for BlockArena {
    type Output = BlockNode;

    fn index(&self, id: BlockId) -> &BlockNode {
        &self.nodes[id.0]
    }
}

impl std::ops::IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut BlockNode {
        &mut self.nodes[id.0]
    }
}

/// Inline tag plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InlineValue {
    Text(String),
    SoftBreak,
    LineBreak,
    Code(String),
    RawHtml(String),
    Emphasis,
    Strong,
    Strikethrough,
    Link { url: String, title: String },
    Image { url: String, title: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineNode {
    pub value: InlineValue,
    pub first_child: Option<InlineId>,
    pub last_child: Option<InlineId>,
    pub next_sibling: Option<InlineId>,
    pub span: Option<SourceSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineArena {
    nodes: Vec<InlineNode>,
}

impl InlineArena {
    pub fn alloc(&mut self, value: InlineValue) -> InlineId {
        let id = InlineId(self.nodes.len());
        self.nodes.push(InlineNode {
            value,
            first_child: None,
            last_child: None,
            next_sibling: None,
            span: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::ops::Index<InlineId> for InlineArena {
    type Output = InlineNode;

    fn index(&self, id: InlineId) -> &InlineNode {
        &self.nodes[id.0]
    }
}

impl std::ops::IndexMut<InlineId> for InlineArena {
    fn index_mut(&mut self, id: InlineId) -> &mut InlineNode {
        &mut self.nodes[id.0]
    }
}

/// A fully parsed document: the block tree, the inline trees of its leaves,
/// and the reference table collected during block parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub blocks: BlockArena,
    pub inlines: InlineArena,
    pub root: BlockId,
    pub(crate) refs: RefMap,
}

impl Document {
    pub(crate) fn new(
        blocks: BlockArena,
        inlines: InlineArena,
        root: BlockId,
        refs: RefMap,
    ) -> Self {
        Document {
            blocks,
            inlines,
            root,
            refs,
        }
    }

    /// Look up a link reference definition by its raw label. The label is
    /// normalized (whitespace collapsed, case folded) before the lookup.
    pub fn reference(&self, label: &str) -> Option<&Reference> {
        match self.refs.lookup(label) {
            RefLookup::Found(r) => Some(r),
            _ => None,
        }
    }

    /// Depth-first walk over the whole tree, yielding a pre and a post event
    /// per node. Childless nodes yield a single event with both flags set.
    pub fn traverse(&self) -> Traversal<'_> {
        Traversal {
            doc: self,
            stack: vec![Step::Open(NodeId::Block(self.root))],
        }
    }
}

/// Borrowed view of either tree's node, as handed to visitors.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Block(&'a BlockNode),
    Inline(&'a InlineNode),
}

/// One visit event of a depth-first walk.
#[derive(Debug, Clone, Copy)]
pub struct VisitEvent<'a> {
    pub node: NodeRef<'a>,
    pub is_opening: bool,
    pub is_closing: bool,
}

#[derive(Debug, Clone, Copy)]
enum NodeId {
    Block(BlockId),
    Inline(InlineId),
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Open(NodeId),
    Close(NodeId),
}

/// Iterator behind `Document::traverse`. Keeps an explicit work stack so that
/// inline nodes never need parent pointers.
pub struct Traversal<'a> {
    doc: &'a Document,
    stack: Vec<Step>,
}

impl<'a> Traversal<'a> {
    fn first_child_of(&self, id: NodeId) -> Option<NodeId> {
        match id {
            NodeId::Block(b) => {
                let node = &self.doc.blocks[b];
                if let Some(child) = node.first_child {
                    Some(NodeId::Block(child))
                } else {
                    node.inlines.map(NodeId::Inline)
                }
            }
            NodeId::Inline(i) => self.doc.inlines[i].first_child.map(NodeId::Inline),
        }
    }

    fn next_sibling_of(&self, id: NodeId) -> Option<NodeId> {
        match id {
            NodeId::Block(b) => self.doc.blocks[b].next_sibling.map(NodeId::Block),
            NodeId::Inline(i) => self.doc.inlines[i].next_sibling.map(NodeId::Inline),
        }
    }

    fn node_ref(&self, id: NodeId) -> NodeRef<'a> {
        match id {
            NodeId::Block(b) => NodeRef::Block(&self.doc.blocks[b]),
            NodeId::Inline(i) => NodeRef::Inline(&self.doc.inlines[i]),
        }
    }
}

impl<'a> Iterator for Traversal<'a> {
    type Item = VisitEvent<'a>;

    fn next(&mut self) -> Option<VisitEvent<'a>> {
        match self.stack.pop()? {
            Step::Open(id) => {
                if let Some(child) = self.first_child_of(id) {
                    self.stack.push(Step::Close(id));
                    self.stack.push(Step::Open(child));
                    Some(VisitEvent {
                        node: self.node_ref(id),
                        is_opening: true,
                        is_closing: false,
                    })
                } else {
                    if let Some(sibling) = self.next_sibling_of(id) {
                        self.stack.push(Step::Open(sibling));
                    }
                    Some(VisitEvent {
                        node: self.node_ref(id),
                        is_opening: true,
                        is_closing: true,
                    })
                }
            }
            Step::Close(id) => {
                if let Some(sibling) = self.next_sibling_of(id) {
                    self.stack.push(Step::Open(sibling));
                }
                Some(VisitEvent {
                    node: self.node_ref(id),
                    is_opening: false,
                    is_closing: true,
                })
            }
        }
    }
}
