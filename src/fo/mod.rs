//! # Formatting-Object Tree
//!
//! The input representation for the layout engine. A document is a tree of
//! formatting objects, each with a fixed kind, a string property bag
//! populated from XML attributes, and an ordered child list. The tree is
//! produced once by an external XSL-FO parser driving [`FoTreeBuilder`] and
//! is read-only for the whole layout run.
//!
//! Nodes live in an arena (`Vec<FoNode>`) and reference each other by
//! [`NodeId`] index; parent links are plain back-references, never owning.

pub mod properties;

use crate::error::FolioError;
use std::fmt;

/// Index of a node in the [`FoTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed, finite set of formatting-object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FoKind {
    Root,
    LayoutMasterSet,
    SimplePageMaster,
    PageSequenceMaster,
    SinglePageMasterReference,
    RepeatablePageMasterReference,
    RepeatablePageMasterAlternatives,
    ConditionalPageMasterReference,
    RegionBody,
    RegionBefore,
    RegionAfter,
    RegionStart,
    RegionEnd,
    PageSequence,
    Flow,
    StaticContent,
    Block,
    BlockContainer,
    Inline,
    InlineContainer,
    BasicLink,
    Leader,
    Character,
    PageNumber,
    PageNumberCitation,
    ExternalGraphic,
    InstreamForeignObject,
    Table,
    TableColumn,
    TableHeader,
    TableFooter,
    TableBody,
    TableRow,
    TableCell,
    ListBlock,
    ListItem,
    ListItemLabel,
    ListItemBody,
    Footnote,
    FootnoteBody,
    Marker,
    RetrieveMarker,
    Wrapper,
    BidiOverride,
    BookmarkTree,
    Bookmark,
    BookmarkTitle,
    Declarations,
    Info,
    /// Character data. Produced by the parser for text content; carries its
    /// content in [`FoNode::text`].
    Text,
}

impl FoKind {
    /// The local name in the XSL-FO namespace, e.g. `page-sequence`.
    pub fn name(self) -> &'static str {
        match self {
            FoKind::Root => "root",
            FoKind::LayoutMasterSet => "layout-master-set",
            FoKind::SimplePageMaster => "simple-page-master",
            FoKind::PageSequenceMaster => "page-sequence-master",
            FoKind::SinglePageMasterReference => "single-page-master-reference",
            FoKind::RepeatablePageMasterReference => "repeatable-page-master-reference",
            FoKind::RepeatablePageMasterAlternatives => "repeatable-page-master-alternatives",
            FoKind::ConditionalPageMasterReference => "conditional-page-master-reference",
            FoKind::RegionBody => "region-body",
            FoKind::RegionBefore => "region-before",
            FoKind::RegionAfter => "region-after",
            FoKind::RegionStart => "region-start",
            FoKind::RegionEnd => "region-end",
            FoKind::PageSequence => "page-sequence",
            FoKind::Flow => "flow",
            FoKind::StaticContent => "static-content",
            FoKind::Block => "block",
            FoKind::BlockContainer => "block-container",
            FoKind::Inline => "inline",
            FoKind::InlineContainer => "inline-container",
            FoKind::BasicLink => "basic-link",
            FoKind::Leader => "leader",
            FoKind::Character => "character",
            FoKind::PageNumber => "page-number",
            FoKind::PageNumberCitation => "page-number-citation",
            FoKind::ExternalGraphic => "external-graphic",
            FoKind::InstreamForeignObject => "instream-foreign-object",
            FoKind::Table => "table",
            FoKind::TableColumn => "table-column",
            FoKind::TableHeader => "table-header",
            FoKind::TableFooter => "table-footer",
            FoKind::TableBody => "table-body",
            FoKind::TableRow => "table-row",
            FoKind::TableCell => "table-cell",
            FoKind::ListBlock => "list-block",
            FoKind::ListItem => "list-item",
            FoKind::ListItemLabel => "list-item-label",
            FoKind::ListItemBody => "list-item-body",
            FoKind::Footnote => "footnote",
            FoKind::FootnoteBody => "footnote-body",
            FoKind::Marker => "marker",
            FoKind::RetrieveMarker => "retrieve-marker",
            FoKind::Wrapper => "wrapper",
            FoKind::BidiOverride => "bidi-override",
            FoKind::BookmarkTree => "bookmark-tree",
            FoKind::Bookmark => "bookmark",
            FoKind::BookmarkTitle => "bookmark-title",
            FoKind::Declarations => "declarations",
            FoKind::Info => "info",
            FoKind::Text => "#text",
        }
    }

    /// Inverse of [`FoKind::name`] for element names the parser hands over.
    pub fn from_name(name: &str) -> Option<FoKind> {
        Some(match name {
            "root" => FoKind::Root,
            "layout-master-set" => FoKind::LayoutMasterSet,
            "simple-page-master" => FoKind::SimplePageMaster,
            "page-sequence-master" => FoKind::PageSequenceMaster,
            "single-page-master-reference" => FoKind::SinglePageMasterReference,
            "repeatable-page-master-reference" => FoKind::RepeatablePageMasterReference,
            "repeatable-page-master-alternatives" => FoKind::RepeatablePageMasterAlternatives,
            "conditional-page-master-reference" => FoKind::ConditionalPageMasterReference,
            "region-body" => FoKind::RegionBody,
            "region-before" => FoKind::RegionBefore,
            "region-after" => FoKind::RegionAfter,
            "region-start" => FoKind::RegionStart,
            "region-end" => FoKind::RegionEnd,
            "page-sequence" => FoKind::PageSequence,
            "flow" => FoKind::Flow,
            "static-content" => FoKind::StaticContent,
            "block" => FoKind::Block,
            "block-container" => FoKind::BlockContainer,
            "inline" => FoKind::Inline,
            "inline-container" => FoKind::InlineContainer,
            "basic-link" => FoKind::BasicLink,
            "leader" => FoKind::Leader,
            "character" => FoKind::Character,
            "page-number" => FoKind::PageNumber,
            "page-number-citation" => FoKind::PageNumberCitation,
            "external-graphic" => FoKind::ExternalGraphic,
            "instream-foreign-object" => FoKind::InstreamForeignObject,
            "table" => FoKind::Table,
            "table-column" => FoKind::TableColumn,
            "table-header" => FoKind::TableHeader,
            "table-footer" => FoKind::TableFooter,
            "table-body" => FoKind::TableBody,
            "table-row" => FoKind::TableRow,
            "table-cell" => FoKind::TableCell,
            "list-block" => FoKind::ListBlock,
            "list-item" => FoKind::ListItem,
            "list-item-label" => FoKind::ListItemLabel,
            "list-item-body" => FoKind::ListItemBody,
            "footnote" => FoKind::Footnote,
            "footnote-body" => FoKind::FootnoteBody,
            "marker" => FoKind::Marker,
            "retrieve-marker" => FoKind::RetrieveMarker,
            "wrapper" => FoKind::Wrapper,
            "bidi-override" => FoKind::BidiOverride,
            "bookmark-tree" => FoKind::BookmarkTree,
            "bookmark" => FoKind::Bookmark,
            "bookmark-title" => FoKind::BookmarkTitle,
            "declarations" => FoKind::Declarations,
            "info" => FoKind::Info,
            _ => return None,
        })
    }

    /// Is this one of the five region kinds of a simple-page-master?
    pub fn is_region(self) -> bool {
        matches!(
            self,
            FoKind::RegionBody
                | FoKind::RegionBefore
                | FoKind::RegionAfter
                | FoKind::RegionStart
                | FoKind::RegionEnd
        )
    }
}

/// An untyped property bag: attribute name to attribute value.
///
/// Kept as a sorted-insertion vector; nodes carry few properties and lookups
/// stay cache-friendly without hashing.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    entries: Vec<(Box<str>, Box<str>)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| &**v)
    }

    /// Insert or overwrite.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| &**k == name) {
            entry.1 = value.into();
        } else {
            self.entries.push((name.into(), value.into()));
        }
    }

    /// Insert only when absent. Shorthand expansion must never clobber an
    /// explicitly set per-edge value.
    pub fn set_if_absent(&mut self, name: &str, value: &str) {
        if self.get(name).is_none() {
            self.entries.push((name.into(), value.into()));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (&**k, &**v))
    }
}

/// One node in the formatting-object tree.
#[derive(Debug, Clone)]
pub struct FoNode {
    pub kind: FoKind,
    pub props: PropertyBag,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Character data for [`FoKind::Text`] nodes, `None` otherwise.
    pub text: Option<String>,
}

/// The arena-backed formatting-object tree.
#[derive(Debug, Clone)]
pub struct FoTree {
    nodes: Vec<FoNode>,
    root: NodeId,
}

impl FoTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &FoNode {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> FoKind {
        self.nodes[id.index()].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn props(&self, id: NodeId) -> &PropertyBag {
        &self.nodes[id.index()].props
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()].text.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child nodes of `id` with the given kind, in document order.
    pub fn children_of_kind(&self, id: NodeId, kind: FoKind) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.kind(c) == kind)
    }

    /// First child of the given kind.
    pub fn first_child_of_kind(&self, id: NodeId, kind: FoKind) -> Option<NodeId> {
        self.children_of_kind(id, kind).next()
    }

    /// Depth-first walk over the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for &c in self.children(n).iter().rev() {
                stack.push(c);
            }
        }
        out
    }
}

/// Construction API driven by the external XSL-FO parser.
///
/// ```
/// use folio::fo::{FoKind, FoTreeBuilder};
///
/// let mut b = FoTreeBuilder::new();
/// b.open(FoKind::Root);
/// b.open(FoKind::LayoutMasterSet);
/// b.open(FoKind::SimplePageMaster);
/// b.attribute("master-name", "page");
/// b.attribute("page-width", "595pt");
/// b.attribute("page-height", "842pt");
/// b.open(FoKind::RegionBody);
/// b.close();
/// b.close();
/// b.close();
/// b.open(FoKind::PageSequence);
/// b.attribute("master-reference", "page");
/// b.open(FoKind::Flow);
/// b.attribute("flow-name", "xsl-region-body");
/// b.open(FoKind::Block);
/// b.text("Hello");
/// b.close();
/// b.close();
/// b.close();
/// b.close();
/// let tree = b.finish().unwrap();
/// assert_eq!(tree.kind(tree.root()), FoKind::Root);
/// ```
#[derive(Debug, Default)]
pub struct FoTreeBuilder {
    nodes: Vec<FoNode>,
    stack: Vec<NodeId>,
}

impl FoTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new element as a child of the current one.
    pub fn open(&mut self, kind: FoKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = self.stack.last().copied();
        self.nodes.push(FoNode {
            kind,
            props: PropertyBag::new(),
            parent,
            children: Vec::new(),
            text: None,
        });
        if let Some(p) = parent {
            self.nodes[p.index()].children.push(id);
        }
        self.stack.push(id);
        id
    }

    /// Set an attribute on the currently open element. Shorthand properties
    /// expand here, eagerly, so the bag only ever holds longhand keys (plus
    /// the raw shorthand as residue for diagnostic purposes).
    pub fn attribute(&mut self, name: &str, value: &str) {
        let id = match self.stack.last() {
            Some(&id) => id,
            None => return,
        };
        let bag = &mut self.nodes[id.index()].props;
        properties::expand_into(bag, name, value);
    }

    /// Append character data under the currently open element. Consecutive
    /// text calls merge into one text node.
    pub fn text(&mut self, content: &str) {
        let parent = match self.stack.last() {
            Some(&id) => id,
            None => return,
        };
        if let Some(&last) = self.nodes[parent.index()].children.last() {
            if self.nodes[last.index()].kind == FoKind::Text {
                self.nodes[last.index()]
                    .text
                    .get_or_insert_with(String::new)
                    .push_str(content);
                return;
            }
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(FoNode {
            kind: FoKind::Text,
            props: PropertyBag::new(),
            parent: Some(parent),
            children: Vec::new(),
            text: Some(content.to_string()),
        });
        self.nodes[parent.index()].children.push(id);
    }

    /// Close the currently open element.
    pub fn close(&mut self) {
        self.stack.pop();
    }

    /// Finish the tree and run structural validation.
    pub fn finish(self) -> Result<FoTree, FolioError> {
        if self.nodes.is_empty() {
            return Err(FolioError::InvalidDocument {
                node: NodeId(0),
                reason: "empty document".to_string(),
            });
        }
        let tree = FoTree {
            nodes: self.nodes,
            root: NodeId(0),
        };
        validate(&tree)?;
        Ok(tree)
    }
}

/// Structural constraints that make the tree layoutable at all. Anything
/// violated here is fatal; looser defects are handled during layout.
fn validate(tree: &FoTree) -> Result<(), FolioError> {
    let root = tree.root();
    if tree.kind(root) != FoKind::Root {
        return Err(FolioError::InvalidDocument {
            node: root,
            reason: format!("document element is fo:{}, expected fo:root", tree.kind(root).name()),
        });
    }
    if tree.first_child_of_kind(root, FoKind::LayoutMasterSet).is_none() {
        return Err(FolioError::InvalidDocument {
            node: root,
            reason: "fo:root has no fo:layout-master-set".to_string(),
        });
    }
    if tree.first_child_of_kind(root, FoKind::PageSequence).is_none() {
        return Err(FolioError::InvalidDocument {
            node: root,
            reason: "fo:root has no fo:page-sequence".to_string(),
        });
    }

    for id in tree.descendants(root) {
        let kind = tree.kind(id);
        let parent_kind = tree.parent(id).map(|p| tree.kind(p));
        let ok = match kind {
            FoKind::Flow | FoKind::StaticContent => parent_kind == Some(FoKind::PageSequence),
            FoKind::TableCell => parent_kind == Some(FoKind::TableRow),
            FoKind::TableRow => matches!(
                parent_kind,
                Some(FoKind::TableHeader) | Some(FoKind::TableFooter) | Some(FoKind::TableBody)
            ),
            FoKind::TableHeader | FoKind::TableFooter | FoKind::TableBody | FoKind::TableColumn => {
                parent_kind == Some(FoKind::Table)
            }
            FoKind::SimplePageMaster | FoKind::PageSequenceMaster => {
                parent_kind == Some(FoKind::LayoutMasterSet)
            }
            FoKind::ListItem => parent_kind == Some(FoKind::ListBlock),
            FoKind::ListItemLabel | FoKind::ListItemBody => parent_kind == Some(FoKind::ListItem),
            FoKind::FootnoteBody => parent_kind == Some(FoKind::Footnote),
            _ => true,
        };
        if !ok {
            return Err(FolioError::InvalidDocument {
                node: id,
                reason: format!(
                    "fo:{} may not appear inside fo:{}",
                    kind.name(),
                    parent_kind.map(|k| k.name()).unwrap_or("(none)")
                ),
            });
        }
        if kind == FoKind::Flow && tree.props(id).get("flow-name").is_none() {
            return Err(FolioError::InvalidDocument {
                node: id,
                reason: "fo:flow requires a flow-name".to_string(),
            });
        }
    }
    Ok(())
}
