//! Interpretation of raw tree change records relative to a node of interest.

use thiserror::Error;
use tracing::trace;
use xnode_tree::{Change, ChangeKind, NodeId, XmlTree};

/// Meaning of a change record for one observed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    NameChanged,
    ValueChanged,
    DescendantAdded,
    DescendantRemoved,
    None,
}

/// Host tree contract violations detected while classifying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// The change names a sender that does not exist in the tree.
    #[error("change sender {0:?} is not part of the tree")]
    UnknownSender(NodeId),
    /// The observed node was expected to be an attribute.
    #[error("node {0:?} is not an attribute")]
    NotAnAttribute(NodeId),
    /// Attributes only ever change value; anything else is a broken contract.
    #[error("attribute {attribute:?} received a structural {kind:?} change")]
    AttributeStructural { attribute: NodeId, kind: ChangeKind },
}

/// Classify a change for an element or document node.
///
/// With `discriminate` set, only direct children of `node` count as
/// descendants; otherwise any transitive descendant does.
///
/// A text `Add` or text `Value` directly below `node` is how the tree sets an
/// element value, so it reports `ValueChanged`; deeper down it counts as a
/// descendant change. Text `Remove` is ignored here: a replacement `Add`
/// usually follows it, and the provider graph reports an unreplaced removal
/// as a value change itself. Removals of anything else report
/// `DescendantRemoved` unconditionally: once detached, the removed node no
/// longer says where it was.
///
/// An `Add` is placed by its recorded origin rather than the sender's
/// current parent, so it still classifies after a later change in the same
/// batch detached the sender again.
pub fn classify_container(
    tree: &XmlTree,
    change: &Change,
    node: NodeId,
    discriminate: bool,
) -> Result<Classification, ClassifyError> {
    let sender = change.sender;
    if !tree.contains(sender) {
        return Err(ClassifyError::UnknownSender(sender));
    }
    let outcome = match change.kind {
        ChangeKind::Name => {
            if sender == node {
                Classification::NameChanged
            } else if is_descendant(tree, node, sender, discriminate) {
                Classification::DescendantAdded
            } else {
                Classification::None
            }
        }
        ChangeKind::Value => {
            if sender == node {
                Classification::ValueChanged
            } else if tree.is_text(sender) {
                match tree.parent(sender) {
                    Some(parent) if parent == node => Classification::ValueChanged,
                    Some(parent) if !discriminate && tree.is_ancestor(node, parent) => {
                        Classification::DescendantAdded
                    }
                    _ => Classification::None,
                }
            } else {
                Classification::None
            }
        }
        ChangeKind::Add => match change.origin.or_else(|| tree.parent(sender)) {
            Some(parent) if parent == node => {
                if tree.is_text(sender) {
                    Classification::ValueChanged
                } else {
                    Classification::DescendantAdded
                }
            }
            Some(parent) if !discriminate && tree.is_ancestor(node, parent) => {
                Classification::DescendantAdded
            }
            _ => Classification::None,
        },
        ChangeKind::Remove => {
            if tree.is_text(sender) {
                Classification::None
            } else {
                Classification::DescendantRemoved
            }
        }
    };
    trace!(
        node = node.index(),
        sender = sender.index(),
        kind = ?change.kind,
        ?outcome,
        "classified container change"
    );
    Ok(outcome)
}

/// Classify a change for an attribute node. Attributes only change value.
pub fn classify_attribute(
    tree: &XmlTree,
    change: &Change,
    attribute: NodeId,
) -> Result<Classification, ClassifyError> {
    let sender = change.sender;
    if !tree.contains(sender) {
        return Err(ClassifyError::UnknownSender(sender));
    }
    if !tree.is_attribute(attribute) {
        return Err(ClassifyError::NotAnAttribute(attribute));
    }
    if sender != attribute {
        return Ok(Classification::None);
    }
    match change.kind {
        ChangeKind::Value => Ok(Classification::ValueChanged),
        kind => Err(ClassifyError::AttributeStructural { attribute, kind }),
    }
}

fn is_descendant(tree: &XmlTree, node: NodeId, sender: NodeId, discriminate: bool) -> bool {
    if discriminate {
        tree.parent(sender) == Some(node)
    } else {
        tree.is_ancestor(node, sender)
    }
}
