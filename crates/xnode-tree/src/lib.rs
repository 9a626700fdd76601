//! Arena-backed mutable XML tree with a per-mutation change journal.
//!
//! Every structural or value mutation appends exactly one [`Change`] record
//! to the journal. Nothing is delivered implicitly: consumers drain the
//! journal with [`XmlTree::take_changes`] after mutating and interpret the
//! records themselves. Loading and saving go through `quick-xml`.
//!
//! ```rust
//! use xnode_tree::{ChangeKind, XmlTree};
//!
//! let mut tree = XmlTree::new();
//! let doc = tree.parse("<Settings><Volume>3</Volume></Settings>")?;
//! let root = tree.document_element(doc).unwrap();
//! let volume = tree.first_child_element(root, "Volume").unwrap();
//! tree.set_value(volume, "7")?;
//!
//! // The lone text child is rewritten in place.
//! let changes = tree.take_changes();
//! assert_eq!(changes.last().map(|c| c.kind), Some(ChangeKind::Value));
//! assert_eq!(tree.to_string(doc)?, "<Settings><Volume>7</Volume></Settings>");
//! # Ok::<(), xnode_tree::TreeError>(())
//! ```

mod xml;

use thiserror::Error;
use tracing::trace;

/// Error type produced by tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The XML text could not be read or written.
    #[error("xml: {0}")]
    Xml(String),
    /// The provided element or attribute name is not a valid XML name.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    /// The operation requires an element node.
    #[error("not an element: {0:?}")]
    NotAnElement(NodeId),
    /// The operation requires a node that can hold children.
    #[error("node cannot hold children: {0:?}")]
    NotAContainer(NodeId),
    /// The node must be detached before it can be inserted elsewhere.
    #[error("node is already attached: {0:?}")]
    AlreadyAttached(NodeId),
    /// A document holds at most one element.
    #[error("document already has a root element: {0:?}")]
    DocumentElementExists(NodeId),
    /// The handle does not belong to this tree.
    #[error("unknown node: {0:?}")]
    UnknownNode(NodeId),
}

/// Lightweight handle to a node stored in an [`XmlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Raw arena index, stable for the lifetime of the tree.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node kinds held by the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
}

/// Kind of a low-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A node was inserted below a container (or an attribute was created).
    Add,
    /// A node was detached from its container (or an attribute was removed).
    Remove,
    /// An element was renamed.
    Name,
    /// The scalar value of an attribute or text node was replaced.
    Value,
}

/// One journal record per low-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// The node that changed.
    pub sender: NodeId,
    pub kind: ChangeKind,
    /// Node the notification is raised on: the (former) container for
    /// `Add`/`Remove`, the sender itself for `Name`/`Value`.
    pub origin: Option<NodeId>,
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    name: String,
    value: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
    /// Cleared when the slot is released to the free list.
    live: bool,
}

impl NodeData {
    fn new(kind: NodeKind, name: String, value: String) -> Self {
        NodeData {
            kind,
            name,
            value,
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
            live: true,
        }
    }
}

/// Arena holding any number of documents and detached subtrees.
///
/// Released slots go to a free list and are handed out again by later
/// allocations, so a released [`NodeId`] may come back naming a new node.
#[derive(Debug, Default)]
pub struct XmlTree {
    nodes: Vec<NodeData>,
    free: Vec<usize>,
    changes: Vec<Change>,
    /// Children discarded by value writes, awaiting [`XmlTree::release`].
    dropped: Vec<NodeId>,
}

impl XmlTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached, empty document node.
    pub fn new_document(&mut self) -> NodeId {
        self.alloc(NodeData::new(NodeKind::Document, String::new(), String::new()))
    }

    /// Create a detached element.
    pub fn new_element(&mut self, name: &str) -> Result<NodeId, TreeError> {
        validate_name(name)?;
        Ok(self.alloc(NodeData::new(
            NodeKind::Element,
            name.to_string(),
            String::new(),
        )))
    }

    /// Create a detached text node.
    pub fn new_text(&mut self, value: &str) -> NodeId {
        self.alloc(NodeData::new(NodeKind::Text, String::new(), value.to_string()))
    }

    pub fn kind(&self, node: NodeId) -> Result<NodeKind, TreeError> {
        Ok(self.data(node)?.kind)
    }

    /// Element or attribute name; empty for documents and text.
    pub fn name(&self, node: NodeId) -> Result<&str, TreeError> {
        Ok(&self.data(node)?.name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.live(node).and_then(|data| data.parent)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.live(node).is_some()
    }

    /// Number of live nodes across every document and detached subtree.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_text(&self, node: NodeId) -> bool {
        matches!(self.live(node), Some(data) if data.kind == NodeKind::Text)
    }

    pub fn is_attribute(&self, node: NodeId) -> bool {
        matches!(self.live(node), Some(data) if data.kind == NodeKind::Attribute)
    }

    /// Child nodes in document order. Attributes are not children.
    pub fn children(&self, node: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.data(node)?.children)
    }

    /// Attribute nodes of an element in their stored order.
    pub fn attributes(&self, element: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.element(element)?.attributes)
    }

    pub fn attribute(&self, element: NodeId, name: &str) -> Option<NodeId> {
        let data = self.live(element)?;
        data.attributes
            .iter()
            .copied()
            .find(|attr| self.nodes[attr.0].name == name)
    }

    pub fn first_attribute(&self, element: NodeId) -> Option<NodeId> {
        self.live(element)?.attributes.first().copied()
    }

    /// First element child of `node` called `name`.
    pub fn first_child_element(&self, node: NodeId, name: &str) -> Option<NodeId> {
        let data = self.live(node)?;
        data.children.iter().copied().find(|child| {
            let child = &self.nodes[child.0];
            child.kind == NodeKind::Element && child.name == name
        })
    }

    /// The single element child of a document.
    pub fn document_element(&self, document: NodeId) -> Option<NodeId> {
        let data = self.live(document)?;
        if data.kind != NodeKind::Document {
            return None;
        }
        data.children
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].kind == NodeKind::Element)
    }

    /// Scalar value of a node.
    ///
    /// Attributes and text nodes return their own value; elements and
    /// documents return the concatenated text of all descendants.
    pub fn value(&self, node: NodeId) -> Result<String, TreeError> {
        let data = self.data(node)?;
        match data.kind {
            NodeKind::Attribute | NodeKind::Text => Ok(data.value.clone()),
            NodeKind::Element | NodeKind::Document => {
                let mut out = String::new();
                self.collect_text(node, &mut out);
                Ok(out)
            }
        }
    }

    /// Whether `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Append `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let index = self.data(parent)?.children.len();
        self.insert_child(parent, index, child)
    }

    /// Insert `child` at `index` (clamped) among the children of `parent`.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        let parent_kind = self.data(parent)?.kind;
        let child_data = self.data(child)?;
        match parent_kind {
            NodeKind::Element => {}
            NodeKind::Document => {
                if child_data.kind == NodeKind::Text {
                    return Err(TreeError::NotAContainer(parent));
                }
                if let Some(existing) = self.document_element(parent) {
                    return Err(TreeError::DocumentElementExists(existing));
                }
            }
            NodeKind::Attribute | NodeKind::Text => {
                return Err(TreeError::NotAContainer(parent))
            }
        }
        if matches!(child_data.kind, NodeKind::Document | NodeKind::Attribute) {
            return Err(TreeError::NotAContainer(child));
        }
        if child_data.parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(TreeError::AlreadyAttached(child));
        }
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        self.record(child, ChangeKind::Add, Some(parent));
        Ok(())
    }

    /// Detach a child node or remove an attribute from its element.
    ///
    /// Detaching a node without a parent is a no-op.
    pub fn detach(&mut self, node: NodeId) -> Result<(), TreeError> {
        let data = self.data(node)?;
        let Some(parent) = data.parent else {
            return Ok(());
        };
        let is_attribute = data.kind == NodeKind::Attribute;
        let siblings = if is_attribute {
            &mut self.nodes[parent.0].attributes
        } else {
            &mut self.nodes[parent.0].children
        };
        siblings.retain(|id| *id != node);
        self.nodes[node.0].parent = None;
        self.record(node, ChangeKind::Remove, Some(parent));
        Ok(())
    }

    /// Set an attribute, creating it at the end of the attribute list if needed.
    pub fn set_attribute(
        &mut self,
        element: NodeId,
        name: &str,
        value: &str,
    ) -> Result<NodeId, TreeError> {
        let index = self.element(element)?.attributes.len();
        self.insert_attribute(element, index, name, value)
    }

    /// Set an attribute, creating it at `index` (clamped) if needed.
    ///
    /// An existing attribute keeps its position and only changes value.
    pub fn insert_attribute(
        &mut self,
        element: NodeId,
        index: usize,
        name: &str,
        value: &str,
    ) -> Result<NodeId, TreeError> {
        self.element(element)?;
        if let Some(existing) = self.attribute(element, name) {
            self.set_value(existing, value)?;
            return Ok(existing);
        }
        validate_name(name)?;
        let attr = self.alloc(NodeData::new(
            NodeKind::Attribute,
            name.to_string(),
            value.to_string(),
        ));
        let attributes = &mut self.nodes[element.0].attributes;
        let index = index.min(attributes.len());
        attributes.insert(index, attr);
        self.nodes[attr.0].parent = Some(element);
        self.record(attr, ChangeKind::Add, Some(element));
        Ok(attr)
    }

    /// Remove an attribute by name. Returns whether one was removed.
    pub fn remove_attribute(&mut self, element: NodeId, name: &str) -> Result<bool, TreeError> {
        self.element(element)?;
        match self.attribute(element, name) {
            Some(attr) => {
                self.detach(attr)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the scalar value of a node.
    ///
    /// Attributes and text nodes change in place (`Value`). An element whose
    /// only child is a text node rewrites that node in place (`Value`, sender
    /// = text) when `value` is non-empty. Any other element drops every child
    /// node (one `Remove` each) and then receives a single new text node
    /// (`Add`) unless `value` is empty.
    ///
    /// Dropped children are queued for [`XmlTree::take_dropped`].
    pub fn set_value(&mut self, node: NodeId, value: &str) -> Result<(), TreeError> {
        let data = self.data(node)?;
        match data.kind {
            NodeKind::Attribute | NodeKind::Text => {
                self.nodes[node.0].value = value.to_string();
                self.record(node, ChangeKind::Value, Some(node));
                Ok(())
            }
            NodeKind::Element => {
                if let [only] = data.children[..] {
                    if !value.is_empty() && self.is_text(only) {
                        return self.set_value(only, value);
                    }
                }
                let children = data.children.clone();
                for child in children {
                    self.detach(child)?;
                    self.dropped.push(child);
                }
                if !value.is_empty() {
                    let text = self.new_text(value);
                    self.append_child(node, text)?;
                }
                Ok(())
            }
            NodeKind::Document => Err(TreeError::NotAnElement(node)),
        }
    }

    /// Remove the text children of an element, leaving child elements alone.
    ///
    /// Removed text nodes are queued for [`XmlTree::take_dropped`].
    pub fn clear_value(&mut self, element: NodeId) -> Result<(), TreeError> {
        let texts: Vec<NodeId> = self
            .element(element)?
            .children
            .iter()
            .copied()
            .filter(|child| self.nodes[child.0].kind == NodeKind::Text)
            .collect();
        for text in texts {
            self.detach(text)?;
            self.dropped.push(text);
        }
        Ok(())
    }

    pub fn rename(&mut self, element: NodeId, name: &str) -> Result<(), TreeError> {
        self.element(element)?;
        validate_name(name)?;
        self.nodes[element.0].name = name.to_string();
        self.record(element, ChangeKind::Name, Some(element));
        Ok(())
    }

    /// Drain the change journal in emission order.
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Drain the nodes discarded by [`XmlTree::set_value`] and
    /// [`XmlTree::clear_value`].
    ///
    /// They stay allocated until released, so change records naming them can
    /// still be interpreted.
    pub fn take_dropped(&mut self) -> Vec<NodeId> {
        let mut dropped = std::mem::take(&mut self.dropped);
        dropped.sort_unstable();
        dropped.dedup();
        dropped
    }

    /// Free a detached node and its whole subtree, attributes included.
    ///
    /// Returns the number of slots released. Every handle into the subtree
    /// becomes invalid. Not journaled.
    pub fn release(&mut self, node: NodeId) -> Result<usize, TreeError> {
        if self.data(node)?.parent.is_some() {
            return Err(TreeError::AlreadyAttached(node));
        }
        let mut stack = vec![node];
        let mut released = 0;
        while let Some(id) = stack.pop() {
            let data = &mut self.nodes[id.0];
            stack.append(&mut data.children);
            stack.append(&mut data.attributes);
            data.live = false;
            data.parent = None;
            data.name = String::new();
            data.value = String::new();
            self.free.push(id.0);
            released += 1;
        }
        trace!(node = node.0, released, "released subtree");
        Ok(released)
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = data;
                NodeId(index)
            }
            None => {
                let id = NodeId(self.nodes.len());
                self.nodes.push(data);
                id
            }
        }
    }

    fn record(&mut self, sender: NodeId, kind: ChangeKind, origin: Option<NodeId>) {
        trace!(sender = sender.0, ?kind, origin = ?origin.map(|o| o.0), "tree change");
        self.changes.push(Change {
            sender,
            kind,
            origin,
        });
    }

    fn live(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0).filter(|data| data.live)
    }

    fn data(&self, node: NodeId) -> Result<&NodeData, TreeError> {
        self.live(node).ok_or(TreeError::UnknownNode(node))
    }

    fn element(&self, node: NodeId) -> Result<&NodeData, TreeError> {
        let data = self.data(node)?;
        if data.kind != NodeKind::Element {
            return Err(TreeError::NotAnElement(node));
        }
        Ok(data)
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        for child in &self.nodes[node.0].children {
            let data = &self.nodes[child.0];
            match data.kind {
                NodeKind::Text => out.push_str(&data.value),
                NodeKind::Element => self.collect_text(*child, out),
                NodeKind::Document | NodeKind::Attribute => {}
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    let mut chars = name.chars();
    let valid_start = match chars.next() {
        Some(first) => first.is_alphabetic() || first == '_' || first == ':',
        None => false,
    };
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'));
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(TreeError::InvalidName(name.to_string()))
    }
}
