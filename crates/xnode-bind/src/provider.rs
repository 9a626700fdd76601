//! Provider arena: named locations in an [`XmlTree`] that track availability.
//!
//! Providers form a tree of their own, held in an arena with parent-index
//! back-references. After every batch of tree mutations the graph runs a
//! depth-first re-resolution pass, then classifies each change for the
//! providers bound along its origin path, and finally delivers the
//! collected events to subscribers.

use std::fmt;
use std::rc::Weak;

use tracing::{debug, trace};
use xnode_tree::{Change, ChangeKind, NodeId, NodeKind, TreeError, XmlTree};

use crate::classify::{classify_attribute, classify_container, Classification};
use crate::BindError;

/// Handle to a provider stored in a [`ProviderGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(usize);

/// Handle returned by the subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Wraps a swappable document or top-level element.
    Root,
    /// First child element of the parent's node with the provider's name.
    Element,
    /// Attribute of the parent element with the provider's name.
    Attribute,
}

/// Position of attributes created through a provider, set on the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeOrder {
    #[default]
    Insertion,
    Alphabetical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    /// The provider became bound to a node.
    Added,
    /// The provider lost its node.
    Removed,
    /// The provider's own value changed.
    ValueChanged,
    /// A child (or, without discrimination, any descendant) was added or removed.
    DescendantChanged,
}

/// Notification delivered to provider subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub provider: ProviderId,
    pub kind: ProviderEventKind,
    /// Raw value of the provider once the triggering mutation completed.
    pub raw_value: Option<String>,
}

/// Receiver held weakly by the graph. Dropped listeners are pruned.
pub trait ProviderListener {
    fn on_provider_event(&self, event: &ProviderEvent);
}

enum Subscriber {
    Callback(Box<dyn FnMut(&ProviderEvent)>),
    Listener(Weak<dyn ProviderListener>),
}

impl Subscriber {
    /// Returns `false` once the subscriber can never be reached again.
    fn deliver(&mut self, event: &ProviderEvent) -> bool {
        match self {
            Subscriber::Callback(callback) => {
                callback(event);
                true
            }
            Subscriber::Listener(weak) => match weak.upgrade() {
                Some(listener) => {
                    listener.on_provider_event(event);
                    true
                }
                None => false,
            },
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Callback(_) => write!(f, "Callback"),
            Subscriber::Listener(weak) => write!(f, "Listener(alive: {})", weak.strong_count() > 0),
        }
    }
}

#[derive(Debug)]
struct Slot {
    name: String,
    kind: ProviderKind,
    parent: Option<ProviderId>,
    children: Vec<ProviderId>,
    /// Node assigned to a root provider.
    assigned: Option<NodeId>,
    /// Document parsed by `load_root` for this root, released once replaced.
    loaded: Option<NodeId>,
    /// Currently bound node.
    node: Option<NodeId>,
    creation_enabled: bool,
    discriminate: bool,
    attribute_order: AttributeOrder,
    removable: bool,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

impl Slot {
    fn new(name: &str, kind: ProviderKind, parent: Option<ProviderId>) -> Self {
        Slot {
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            assigned: None,
            loaded: None,
            node: None,
            creation_enabled: true,
            discriminate: false,
            attribute_order: AttributeOrder::Insertion,
            removable: true,
            subscribers: Vec::new(),
        }
    }
}

/// Owner of the tree and of every provider bound into it.
#[derive(Debug, Default)]
pub struct ProviderGraph {
    tree: XmlTree,
    slots: Vec<Slot>,
    roots: Vec<ProviderId>,
    next_subscription: u64,
}

impl ProviderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph around an existing tree.
    pub fn with_tree(tree: XmlTree) -> Self {
        ProviderGraph {
            tree,
            ..Self::default()
        }
    }

    /// Read access to the tree. Mutations go through [`ProviderGraph::mutate`].
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    /// Register an unbound root provider.
    pub fn add_root(&mut self, name: &str) -> Result<ProviderId, BindError> {
        validate_provider_name(name)?;
        let id = ProviderId(self.slots.len());
        self.slots.push(Slot::new(name, ProviderKind::Root, None));
        self.roots.push(id);
        debug!(provider = %name, "registered root provider");
        Ok(id)
    }

    /// Register an element provider below a root or element provider.
    pub fn add_element(&mut self, name: &str, parent: ProviderId) -> Result<ProviderId, BindError> {
        validate_provider_name(name)?;
        match self.slot(parent)?.kind {
            ProviderKind::Root | ProviderKind::Element => {}
            ProviderKind::Attribute => {
                return Err(BindError::Config(format!(
                    "element provider {name} cannot live below an attribute provider"
                )))
            }
        }
        Ok(self.push_child(name, ProviderKind::Element, parent))
    }

    /// Register an attribute provider below an element provider.
    pub fn add_attribute(
        &mut self,
        name: &str,
        parent: ProviderId,
    ) -> Result<ProviderId, BindError> {
        validate_provider_name(name)?;
        if self.slot(parent)?.kind != ProviderKind::Element {
            return Err(BindError::Config(format!(
                "attribute provider {name} requires an element provider parent"
            )));
        }
        Ok(self.push_child(name, ProviderKind::Attribute, parent))
    }

    pub fn name(&self, id: ProviderId) -> Result<&str, BindError> {
        Ok(&self.slot(id)?.name)
    }

    pub fn kind(&self, id: ProviderId) -> Result<ProviderKind, BindError> {
        Ok(self.slot(id)?.kind)
    }

    pub fn parent(&self, id: ProviderId) -> Option<ProviderId> {
        self.slots.get(id.0).and_then(|slot| slot.parent)
    }

    pub fn children(&self, id: ProviderId) -> Result<&[ProviderId], BindError> {
        Ok(&self.slot(id)?.children)
    }

    /// Node the provider is currently bound to.
    pub fn node(&self, id: ProviderId) -> Option<NodeId> {
        self.slots.get(id.0).and_then(|slot| slot.node)
    }

    pub fn is_available(&self, id: ProviderId) -> bool {
        self.node(id).is_some()
    }

    /// Whether [`ProviderGraph::create_if_missing`] can succeed.
    ///
    /// Bound providers always can. Otherwise creation must be enabled on the
    /// provider and every ancestor, and the chain must end at a bound root
    /// with room for any missing node directly below it.
    pub fn can_be_created(&self, id: ProviderId) -> bool {
        if self.is_available(id) {
            return true;
        }
        let mut current = Some(id);
        let mut below: Option<ProviderId> = None;
        while let Some(cursor) = current {
            let Some(slot) = self.slots.get(cursor.0) else {
                return false;
            };
            if !slot.creation_enabled {
                return false;
            }
            if slot.kind == ProviderKind::Root {
                let Some(node) = slot.node else {
                    return false;
                };
                // A document holds a single element.
                let document_full = matches!(self.tree.kind(node), Ok(NodeKind::Document))
                    && self.tree.document_element(node).is_some();
                return !(document_full && below.is_some_and(|child| !self.is_available(child)));
            }
            below = Some(cursor);
            current = slot.parent;
        }
        false
    }

    pub fn set_creation_enabled(&mut self, id: ProviderId, enabled: bool) -> Result<(), BindError> {
        self.slot_mut(id)?.creation_enabled = enabled;
        Ok(())
    }

    /// Restrict `DescendantChanged` on a container provider to direct children.
    pub fn set_discriminate_descendants(
        &mut self,
        id: ProviderId,
        discriminate: bool,
    ) -> Result<(), BindError> {
        let slot = self.container_slot_mut(id)?;
        slot.discriminate = discriminate;
        Ok(())
    }

    pub fn discriminates_descendants(&self, id: ProviderId) -> bool {
        self.slots.get(id.0).is_some_and(|slot| slot.discriminate)
    }

    /// Choose where attributes created below an element provider are placed.
    pub fn set_attribute_order(
        &mut self,
        id: ProviderId,
        order: AttributeOrder,
    ) -> Result<(), BindError> {
        let slot = self.slot_mut(id)?;
        if slot.kind != ProviderKind::Element {
            return Err(BindError::Config(format!(
                "attribute order applies to element providers, not {}",
                slot.name
            )));
        }
        slot.attribute_order = order;
        Ok(())
    }

    /// Whether writing no value removes the attribute (default) or empties it.
    pub fn set_removable(&mut self, id: ProviderId, removable: bool) -> Result<(), BindError> {
        let slot = self.slot_mut(id)?;
        if slot.kind != ProviderKind::Attribute {
            return Err(BindError::Config(format!(
                "removal policy applies to attribute providers, not {}",
                slot.name
            )));
        }
        slot.removable = removable;
        Ok(())
    }

    /// Point a root provider at a document or element, or clear it.
    ///
    /// Every descendant provider is re-resolved; each one that loses or
    /// gains its node fires `Removed` or `Added`.
    pub fn assign_root(&mut self, root: ProviderId, node: Option<NodeId>) -> Result<(), BindError> {
        if self.slot(root)?.kind != ProviderKind::Root {
            return Err(BindError::InvalidOperation(format!(
                "{} is not a root provider",
                self.slot(root)?.name
            )));
        }
        if let Some(node) = node {
            match self.tree.kind(node)? {
                NodeKind::Document | NodeKind::Element => {}
                NodeKind::Attribute | NodeKind::Text => {
                    return Err(BindError::Tree(TreeError::NotAContainer(node)))
                }
            }
        }
        let slot = &mut self.slots[root.0];
        let replaced = slot.loaded.filter(|loaded| Some(*loaded) != node);
        if replaced.is_some() {
            slot.loaded = None;
        }
        slot.assigned = node;
        debug!(provider = %slot.name, node = ?node, "assigned root");
        let mut events = Vec::new();
        self.resolve_all(&mut events);
        if let Some(document) = replaced {
            self.release_unpinned(document);
        }
        self.deliver(events);
        Ok(())
    }

    /// Parse `xml` into the tree and assign the new document to `root`.
    ///
    /// The document stays owned by the graph: once `root` is assigned
    /// anything else, it is released and its node ids become invalid.
    pub fn load_root(&mut self, root: ProviderId, xml: &str) -> Result<NodeId, BindError> {
        let document = self.tree.parse(xml)?;
        if let Err(err) = self.assign_root(root, Some(document)) {
            self.tree.release(document)?;
            return Err(err);
        }
        self.slots[root.0].loaded = Some(document);
        Ok(document)
    }

    /// Apply a batch of tree mutations and dispatch the resulting changes.
    ///
    /// Changes recorded before an error are still dispatched. Each change is
    /// placed by the origin it recorded, but the ancestors above that origin
    /// are walked in the tree as it stands after the whole batch: moving an
    /// origin elsewhere later in the same batch reroutes its notifications.
    /// Nodes discarded by value writes are released once dispatch is done.
    pub fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut XmlTree) -> Result<R, TreeError>,
    ) -> Result<R, BindError> {
        let result = f(&mut self.tree);
        let changes = self.tree.take_changes();
        let dispatched = self.dispatch(changes);
        for node in self.tree.take_dropped() {
            self.release_unpinned(node);
        }
        dispatched?;
        Ok(result?)
    }

    /// Raw string value of a bound provider.
    pub fn raw_value(&self, id: ProviderId) -> Option<String> {
        let node = self.node(id)?;
        self.tree.value(node).ok()
    }

    /// Materialise the provider and, transitively, its missing ancestors.
    ///
    /// Returns the bound node. Calling this on a bound provider is a no-op.
    pub fn create_if_missing(&mut self, id: ProviderId) -> Result<NodeId, BindError> {
        self.materialize(id, "")
    }

    /// Detach the provider's node from its parent.
    ///
    /// `Removed` fires through the regular change dispatch, not directly.
    pub fn remove(&mut self, id: ProviderId) -> Result<(), BindError> {
        let slot = self.slot(id)?;
        if slot.kind == ProviderKind::Root {
            return Err(BindError::InvalidOperation(format!(
                "root provider {} has no parent to be removed from",
                slot.name
            )));
        }
        let node = slot
            .node
            .ok_or_else(|| BindError::Unavailable(slot.name.clone()))?;
        debug!(provider = %slot.name, "removing provider node");
        self.mutate(|tree| tree.detach(node))
    }

    /// Write a raw value.
    ///
    /// `Some` materialises the provider if needed. `None` removes an
    /// attribute (or empties it when removal is disabled) and clears the
    /// text of an element; on an unbound provider it does nothing.
    pub fn set_raw_value(&mut self, id: ProviderId, value: Option<&str>) -> Result<(), BindError> {
        let slot = self.slot(id)?;
        let kind = slot.kind;
        let removable = slot.removable;
        match (value, slot.node) {
            (Some(value), Some(node)) => self.mutate(|tree| tree.set_value(node, value)),
            (Some(value), None) => match kind {
                ProviderKind::Attribute => self.materialize(id, value).map(|_| ()),
                ProviderKind::Root | ProviderKind::Element => {
                    let node = self.create_if_missing(id)?;
                    self.mutate(|tree| tree.set_value(node, value))
                }
            },
            (None, Some(node)) => match kind {
                ProviderKind::Attribute if removable => self.mutate(|tree| tree.detach(node)),
                ProviderKind::Attribute => self.mutate(|tree| tree.set_value(node, "")),
                ProviderKind::Root | ProviderKind::Element => {
                    self.mutate(|tree| tree.clear_value(node))
                }
            },
            (None, None) => Ok(()),
        }
    }

    /// Subscribe a closure to a provider's events.
    pub fn subscribe(
        &mut self,
        id: ProviderId,
        callback: impl FnMut(&ProviderEvent) + 'static,
    ) -> Result<SubscriptionId, BindError> {
        self.push_subscriber(id, Subscriber::Callback(Box::new(callback)))
    }

    /// Subscribe a weakly held listener; it is pruned once dropped.
    pub fn subscribe_listener(
        &mut self,
        id: ProviderId,
        listener: Weak<dyn ProviderListener>,
    ) -> Result<SubscriptionId, BindError> {
        self.push_subscriber(id, Subscriber::Listener(listener))
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: ProviderId, subscription: SubscriptionId) -> bool {
        match self.slots.get_mut(id.0) {
            Some(slot) => {
                let before = slot.subscribers.len();
                slot.subscribers.retain(|(sub, _)| *sub != subscription);
                slot.subscribers.len() != before
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self, id: ProviderId) -> usize {
        self.slots.get(id.0).map_or(0, |slot| slot.subscribers.len())
    }

    fn push_child(&mut self, name: &str, kind: ProviderKind, parent: ProviderId) -> ProviderId {
        let id = ProviderId(self.slots.len());
        self.slots.push(Slot::new(name, kind, Some(parent)));
        self.slots[parent.0].children.push(id);
        // Bind silently: nobody can be subscribed yet.
        let node = self.desired_node(id, |provider| self.slots[provider.0].node);
        self.slots[id.0].node = node;
        debug!(provider = %name, ?kind, bound = node.is_some(), "registered provider");
        id
    }

    fn push_subscriber(
        &mut self,
        id: ProviderId,
        subscriber: Subscriber,
    ) -> Result<SubscriptionId, BindError> {
        let subscription = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.slot_mut(id)?.subscribers.push((subscription, subscriber));
        Ok(subscription)
    }

    fn materialize(&mut self, id: ProviderId, initial: &str) -> Result<NodeId, BindError> {
        if let Some(node) = self.node(id) {
            return Ok(node);
        }
        if !self.can_be_created(id) {
            return Err(BindError::NotCreatable(self.slot(id)?.name.clone()));
        }
        let slot = self.slot(id)?;
        let name = slot.name.clone();
        let kind = slot.kind;
        let parent = slot
            .parent
            .ok_or_else(|| BindError::NotCreatable(name.clone()))?;
        let parent_node = self.create_if_missing(parent)?;
        debug!(provider = %name, ?kind, "materialising provider");
        match kind {
            ProviderKind::Element => {
                self.mutate(|tree| {
                    let element = tree.new_element(&name)?;
                    tree.append_child(parent_node, element)?;
                    if !initial.is_empty() {
                        tree.set_value(element, initial)?;
                    }
                    Ok(())
                })?;
            }
            ProviderKind::Attribute => {
                let index = self.attribute_index(parent, parent_node, &name)?;
                self.mutate(|tree| tree.insert_attribute(parent_node, index, &name, initial))?;
            }
            ProviderKind::Root => return Err(BindError::NotCreatable(name)),
        }
        self.node(id).ok_or(BindError::NotCreatable(name))
    }

    fn attribute_index(
        &self,
        parent: ProviderId,
        element: NodeId,
        name: &str,
    ) -> Result<usize, BindError> {
        let existing = self.tree.attributes(element)?;
        match self.slot(parent)?.attribute_order {
            AttributeOrder::Insertion => Ok(existing.len()),
            AttributeOrder::Alphabetical => Ok(existing
                .iter()
                .position(|attr| self.tree.name(*attr).is_ok_and(|other| other > name))
                .unwrap_or(existing.len())),
        }
    }

    /// Release a detached subtree unless a provider still lives inside it.
    fn release_unpinned(&mut self, node: NodeId) {
        if !self.tree.contains(node) || self.tree.parent(node).is_some() {
            return;
        }
        let pinned = self.slots.iter().any(|slot| {
            [slot.assigned, slot.node]
                .into_iter()
                .flatten()
                .any(|bound| bound == node || self.tree.is_ancestor(node, bound))
        });
        if pinned {
            trace!(node = node.index(), "keeping detached subtree in use");
            return;
        }
        match self.tree.release(node) {
            Ok(released) => trace!(node = node.index(), released, "released detached subtree"),
            Err(err) => debug!(%err, "could not release detached subtree"),
        }
    }

    fn dispatch(&mut self, changes: Vec<Change>) -> Result<(), BindError> {
        let mut events = Vec::new();
        let mut outcome = Ok(());
        for (index, change) in changes.iter().enumerate() {
            let cleared = is_final_text_removal(&self.tree, &changes, index);
            if let Err(err) = self.process_change(change, cleared, &mut events) {
                outcome = Err(err);
                break;
            }
        }
        self.deliver(events);
        outcome
    }

    /// `cleared` marks a text removal that nothing in the batch replaces; it
    /// is reported as a value change of the former parent.
    fn process_change(
        &mut self,
        change: &Change,
        cleared: bool,
        events: &mut Vec<ProviderEvent>,
    ) -> Result<(), BindError> {
        if matches!(
            change.kind,
            ChangeKind::Add | ChangeKind::Remove | ChangeKind::Name
        ) {
            self.resolve_all(events);
        }

        let Some(origin) = change.origin else {
            return Ok(());
        };
        // Nodes the notification bubbles through, deepest first.
        let mut path = vec![origin];
        let mut cursor = self.tree.parent(origin);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.tree.parent(node);
        }

        let mut value_events = Vec::new();
        let mut descendant_events = Vec::new();
        for node in path {
            for (index, slot) in self.slots.iter().enumerate() {
                if slot.node != Some(node) {
                    continue;
                }
                let id = ProviderId(index);
                let classification = match slot.kind {
                    ProviderKind::Attribute => {
                        if node != origin {
                            continue;
                        }
                        classify_attribute(&self.tree, change, node)?
                    }
                    ProviderKind::Root | ProviderKind::Element => {
                        match classify_container(&self.tree, change, node, slot.discriminate)? {
                            Classification::None if cleared && node == origin => {
                                Classification::ValueChanged
                            }
                            classification => classification,
                        }
                    }
                };
                match classification {
                    Classification::ValueChanged => value_events.push(id),
                    Classification::DescendantAdded | Classification::DescendantRemoved => {
                        descendant_events.push(id)
                    }
                    Classification::NameChanged => {
                        trace!(provider = %slot.name, "bound node renamed");
                    }
                    Classification::None => {}
                }
            }
        }

        for id in value_events {
            events.push(self.event(id, ProviderEventKind::ValueChanged));
        }
        for id in descendant_events {
            events.push(self.event(id, ProviderEventKind::DescendantChanged));
        }
        Ok(())
    }

    /// Depth-first re-resolution of every provider.
    ///
    /// Unbinding runs children-first and binding parents-first, so a bound
    /// provider never has an unbound parent when its event is observed. A
    /// provider moving from one node to another fires `Removed` then `Added`.
    fn resolve_all(&mut self, events: &mut Vec<ProviderEvent>) {
        let order = self.preorder();
        let mut desired: Vec<Option<NodeId>> = vec![None; self.slots.len()];
        for id in &order {
            let node = self.desired_node(*id, |provider| desired[provider.0]);
            desired[id.0] = node;
        }

        for id in order.iter().rev() {
            let slot = &mut self.slots[id.0];
            if slot.node.is_some() && slot.node != desired[id.0] {
                slot.node = None;
                debug!(provider = %slot.name, "provider removed");
                events.push(ProviderEvent {
                    provider: *id,
                    kind: ProviderEventKind::Removed,
                    raw_value: None,
                });
            }
        }
        for id in &order {
            let slot = &mut self.slots[id.0];
            if slot.node.is_none() && desired[id.0].is_some() {
                slot.node = desired[id.0];
                debug!(provider = %slot.name, node = ?slot.node, "provider added");
                events.push(self.event(*id, ProviderEventKind::Added));
            }
        }
    }

    /// Node a provider should be bound to, given its parent's node.
    fn desired_node(
        &self,
        id: ProviderId,
        parent_node: impl Fn(ProviderId) -> Option<NodeId>,
    ) -> Option<NodeId> {
        let slot = &self.slots[id.0];
        match slot.kind {
            ProviderKind::Root => slot.assigned,
            ProviderKind::Element => {
                let parent = parent_node(slot.parent?)?;
                self.tree.first_child_element(parent, &slot.name)
            }
            ProviderKind::Attribute => {
                let parent = parent_node(slot.parent?)?;
                self.tree.attribute(parent, &slot.name)
            }
        }
    }

    fn preorder(&self) -> Vec<ProviderId> {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut stack: Vec<ProviderId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.slots[id.0].children.iter().rev().copied());
        }
        order
    }

    fn event(&self, provider: ProviderId, kind: ProviderEventKind) -> ProviderEvent {
        ProviderEvent {
            provider,
            kind,
            raw_value: self.raw_value(provider),
        }
    }

    fn deliver(&mut self, events: Vec<ProviderEvent>) {
        for event in events {
            let slot = &mut self.slots[event.provider.0];
            trace!(provider = %slot.name, kind = ?event.kind, "delivering provider event");
            slot.subscribers
                .retain_mut(|(_, subscriber)| subscriber.deliver(&event));
        }
    }

    fn slot(&self, id: ProviderId) -> Result<&Slot, BindError> {
        self.slots.get(id.0).ok_or(BindError::UnknownProvider(id))
    }

    fn slot_mut(&mut self, id: ProviderId) -> Result<&mut Slot, BindError> {
        self.slots.get_mut(id.0).ok_or(BindError::UnknownProvider(id))
    }

    fn container_slot_mut(&mut self, id: ProviderId) -> Result<&mut Slot, BindError> {
        let slot = self.slot_mut(id)?;
        if slot.kind == ProviderKind::Attribute {
            return Err(BindError::Config(format!(
                "attribute provider {} has no descendants",
                slot.name
            )));
        }
        Ok(slot)
    }
}

/// A text `Remove` with no later text `Add` or `Remove` on the same container
/// in the batch. Earlier removals are superseded by whatever follows them.
fn is_final_text_removal(tree: &XmlTree, changes: &[Change], index: usize) -> bool {
    let change = &changes[index];
    if change.kind != ChangeKind::Remove || !tree.is_text(change.sender) {
        return false;
    }
    !changes[index + 1..].iter().any(|later| {
        matches!(later.kind, ChangeKind::Add | ChangeKind::Remove)
            && later.origin == change.origin
            && tree.is_text(later.sender)
    })
}

fn validate_provider_name(name: &str) -> Result<(), BindError> {
    if name.trim().is_empty() {
        return Err(BindError::Config("provider name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(ProviderId, ProviderEventKind)>>>;

    fn record(graph: &mut ProviderGraph, log: &Log, ids: &[ProviderId]) {
        for id in ids {
            let log = Rc::clone(log);
            graph
                .subscribe(*id, move |event| {
                    log.borrow_mut().push((event.provider, event.kind))
                })
                .expect("subscribe");
        }
    }

    #[test]
    fn binds_on_root_assignment() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let settings = graph.add_element("Settings", root).unwrap();
        let mode = graph.add_attribute("Mode", settings).unwrap();
        assert!(!graph.is_available(settings));
        assert!(!graph.can_be_created(settings));

        let log = Log::default();
        record(&mut graph, &log, &[root, settings, mode]);
        graph
            .load_root(root, r#"<Settings Mode="dark"/>"#)
            .unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (root, ProviderEventKind::Added),
                (settings, ProviderEventKind::Added),
                (mode, ProviderEventKind::Added),
            ]
        );
        assert_eq!(graph.raw_value(mode).as_deref(), Some("dark"));

        log.borrow_mut().clear();
        graph.assign_root(root, None).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (mode, ProviderEventKind::Removed),
                (settings, ProviderEventKind::Removed),
                (root, ProviderEventKind::Removed),
            ]
        );
        assert!(!graph.is_available(mode));
    }

    #[test]
    fn reassignment_never_swaps_silently() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        graph.load_root(root, "<A>first</A>").unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[root, a]);
        graph.load_root(root, "<A>second</A>").unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (a, ProviderEventKind::Removed),
                (root, ProviderEventKind::Removed),
                (root, ProviderEventKind::Added),
                (a, ProviderEventKind::Added),
            ]
        );
        assert_eq!(graph.raw_value(a).as_deref(), Some("second"));
    }

    #[test]
    fn create_if_missing_materialises_ancestors() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let top = graph.add_element("Top", root).unwrap();
        let mid = graph.add_element("Mid", top).unwrap();
        let leaf = graph.add_attribute("Leaf", mid).unwrap();
        graph.load_root(root, "<Top/>").unwrap();
        assert!(graph.can_be_created(leaf));

        let log = Log::default();
        record(&mut graph, &log, &[top, mid, leaf]);
        let node = graph.create_if_missing(leaf).unwrap();
        assert_eq!(graph.node(leaf), Some(node));
        assert_eq!(
            *log.borrow(),
            vec![
                (mid, ProviderEventKind::Added),
                (top, ProviderEventKind::DescendantChanged),
                (leaf, ProviderEventKind::Added),
                (mid, ProviderEventKind::DescendantChanged),
                (top, ProviderEventKind::DescendantChanged),
            ]
        );

        log.borrow_mut().clear();
        assert_eq!(graph.create_if_missing(leaf).unwrap(), node);
        assert!(log.borrow().is_empty());
        let doc = graph.tree().parent(graph.node(top).unwrap()).unwrap();
        assert_eq!(
            graph.tree().to_string(doc).unwrap(),
            r#"<Top><Mid Leaf=""/></Top>"#
        );
    }

    #[test]
    fn creation_disabled_on_ancestor() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let top = graph.add_element("Top", root).unwrap();
        let mid = graph.add_element("Mid", top).unwrap();
        let leaf = graph.add_element("Leaf", mid).unwrap();
        graph.load_root(root, "<Top/>").unwrap();
        assert!(graph.can_be_created(leaf));
        graph.set_creation_enabled(mid, false).unwrap();
        assert!(!graph.can_be_created(leaf));
        assert!(matches!(
            graph.create_if_missing(leaf),
            Err(BindError::NotCreatable(name)) if name == "Leaf"
        ));
        assert!(!graph.is_available(mid));
    }

    #[test]
    fn document_with_other_root_cannot_grow_a_second_one() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let top = graph.add_element("Top", root).unwrap();
        let attr = graph.add_attribute("Mode", top).unwrap();
        graph.load_root(root, "<Other/>").unwrap();
        assert!(!graph.can_be_created(top));
        assert!(!graph.can_be_created(attr));
        assert!(matches!(
            graph.create_if_missing(attr),
            Err(BindError::NotCreatable(_))
        ));

        let document = graph.mutate(|tree| Ok(tree.new_document())).unwrap();
        graph.assign_root(root, Some(document)).unwrap();
        assert!(graph.can_be_created(attr));
        graph.create_if_missing(attr).unwrap();
        assert_eq!(
            graph.tree().to_string(document).unwrap(),
            r#"<Top Mode=""/>"#
        );
    }

    #[test]
    fn remove_routes_through_dispatch() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        let b = graph.add_element("B", a).unwrap();
        graph.load_root(root, "<A><B/></A>").unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[a, b]);
        graph.remove(b).unwrap();
        assert!(!graph.is_available(b));
        assert_eq!(
            *log.borrow(),
            vec![
                (b, ProviderEventKind::Removed),
                (a, ProviderEventKind::DescendantChanged),
            ]
        );
        assert!(matches!(graph.remove(b), Err(BindError::Unavailable(_))));
        assert!(matches!(
            graph.remove(root),
            Err(BindError::InvalidOperation(_))
        ));
    }

    #[test]
    fn external_mutation_rebinds_to_next_match() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let list = graph.add_element("List", root).unwrap();
        let item = graph.add_element("Item", list).unwrap();
        graph
            .load_root(root, "<List><Item>1</Item><Item>2</Item></List>")
            .unwrap();
        let first = graph.node(item).unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[item]);
        graph.mutate(|tree| tree.detach(first)).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (item, ProviderEventKind::Removed),
                (item, ProviderEventKind::Added),
            ]
        );
        assert_eq!(graph.raw_value(item).as_deref(), Some("2"));
    }

    #[test]
    fn value_changes_reach_only_the_owner() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        let attr = graph.add_attribute("Mode", a).unwrap();
        graph.load_root(root, r#"<A Mode="x">text</A>"#).unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[root, a, attr]);

        graph.set_raw_value(attr, Some("y")).unwrap();
        assert_eq!(*log.borrow(), vec![(attr, ProviderEventKind::ValueChanged)]);

        log.borrow_mut().clear();
        graph.set_raw_value(a, Some("other")).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (a, ProviderEventKind::ValueChanged),
                (root, ProviderEventKind::DescendantChanged),
            ]
        );
        assert_eq!(graph.raw_value(a).as_deref(), Some("other"));
    }

    #[test]
    fn none_removes_attribute_or_empties_it() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        let kept = graph.add_attribute("Kept", a).unwrap();
        let dropped = graph.add_attribute("Dropped", a).unwrap();
        graph.set_removable(kept, false).unwrap();
        graph
            .load_root(root, r#"<A Kept="1" Dropped="2">v</A>"#)
            .unwrap();
        graph.set_raw_value(kept, None).unwrap();
        graph.set_raw_value(dropped, None).unwrap();
        graph.set_raw_value(a, None).unwrap();
        assert_eq!(graph.raw_value(kept).as_deref(), Some(""));
        assert!(!graph.is_available(dropped));
        assert_eq!(graph.raw_value(a).as_deref(), Some(""));
        graph.set_raw_value(dropped, None).unwrap();
    }

    #[test]
    fn clearing_text_reports_one_value_change() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        graph.load_root(root, "<A>v</A>").unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[a]);

        graph.set_raw_value(a, Some("")).unwrap();
        assert_eq!(*log.borrow(), vec![(a, ProviderEventKind::ValueChanged)]);

        log.borrow_mut().clear();
        let element = graph.node(a).unwrap();
        graph
            .mutate(|tree| {
                let first = tree.new_text("x");
                tree.append_child(element, first)?;
                let second = tree.new_text("y");
                tree.append_child(element, second)
            })
            .unwrap();
        log.borrow_mut().clear();
        graph.set_raw_value(a, None).unwrap();
        assert_eq!(*log.borrow(), vec![(a, ProviderEventKind::ValueChanged)]);
        assert_eq!(graph.raw_value(a).as_deref(), Some(""));
    }

    #[test]
    fn append_then_detach_in_one_batch_reports_both() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        graph.set_discriminate_descendants(a, true).unwrap();
        graph.load_root(root, "<A/>").unwrap();
        let log = Log::default();
        record(&mut graph, &log, &[root, a]);

        let element = graph.node(a).unwrap();
        graph
            .mutate(|tree| {
                let transient = tree.new_element("Transient")?;
                tree.append_child(element, transient)?;
                tree.detach(transient)
            })
            .unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (a, ProviderEventKind::DescendantChanged),
                (root, ProviderEventKind::DescendantChanged),
                (a, ProviderEventKind::DescendantChanged),
                (root, ProviderEventKind::DescendantChanged),
            ]
        );
    }

    #[test]
    fn value_writes_keep_the_arena_flat() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        graph.load_root(root, "<A>0</A>").unwrap();
        let live = graph.tree().node_count();
        let text = graph.tree().children(graph.node(a).unwrap()).unwrap()[0];
        for value in 1..=10_000 {
            graph.set_raw_value(a, Some(&value.to_string())).unwrap();
        }
        assert_eq!(graph.tree().node_count(), live);
        assert_eq!(graph.tree().children(graph.node(a).unwrap()).unwrap(), &[text]);
        assert_eq!(graph.raw_value(a).as_deref(), Some("10000"));

        // Clearing and refilling reuses the freed slot.
        graph.set_raw_value(a, None).unwrap();
        assert_eq!(graph.tree().node_count(), live - 1);
        graph.set_raw_value(a, Some("back")).unwrap();
        assert_eq!(graph.tree().node_count(), live);
    }

    #[test]
    fn discarded_children_are_released_unless_bound() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        let b = graph.add_element("B", a).unwrap();
        let side = graph.add_root("side").unwrap();
        let document = graph
            .load_root(root, "<A><B>x</B><C>y</C></A>")
            .unwrap();
        let c = graph
            .tree()
            .first_child_element(graph.node(a).unwrap(), "C")
            .unwrap();
        graph.assign_root(side, Some(c)).unwrap();
        let old_b = graph.node(b).unwrap();
        assert_eq!(graph.tree().node_count(), 6);

        graph.set_raw_value(a, Some("flat")).unwrap();
        assert!(!graph.is_available(b));
        assert!(!graph.tree().contains(old_b));
        // C is still assigned to `side`, so it survives detached.
        assert!(graph.tree().contains(c));
        assert_eq!(graph.raw_value(side).as_deref(), Some("y"));
        assert_eq!(graph.tree().node_count(), 5);
        assert_eq!(graph.tree().to_string(document).unwrap(), "<A>flat</A>");
    }

    #[test]
    fn reloading_releases_the_previous_document() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let first = graph.load_root(root, "<A><B/></A>").unwrap();
        assert_eq!(graph.tree().node_count(), 3);
        graph.load_root(root, "<A/>").unwrap();
        assert!(!graph.tree().contains(first));
        assert_eq!(graph.tree().node_count(), 2);

        assert!(graph.load_root(root, "<A>").is_err());
        assert_eq!(graph.tree().node_count(), 2);
        graph.assign_root(root, None).unwrap();
        assert_eq!(graph.tree().node_count(), 0);
    }

    #[test]
    fn alphabetical_attribute_order() {
        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let a = graph.add_element("A", root).unwrap();
        graph.set_attribute_order(a, AttributeOrder::Alphabetical).unwrap();
        let test = graph.add_attribute("TestValue", a).unwrap();
        let alpha = graph.add_attribute("AlphaValue", a).unwrap();
        graph.load_root(root, "<A/>").unwrap();
        graph.set_raw_value(test, Some("t")).unwrap();
        graph.set_raw_value(alpha, Some("a")).unwrap();
        let element = graph.node(a).unwrap();
        let first = graph.tree().first_attribute(element).unwrap();
        assert_eq!(graph.tree().name(first).unwrap(), "AlphaValue");
    }

    #[test]
    fn configuration_errors() {
        let mut graph = ProviderGraph::new();
        assert!(matches!(graph.add_root(""), Err(BindError::Config(_))));
        let root = graph.add_root("doc").unwrap();
        assert!(matches!(
            graph.add_attribute("Mode", root),
            Err(BindError::Config(_))
        ));
        let a = graph.add_element("A", root).unwrap();
        let attr = graph.add_attribute("Mode", a).unwrap();
        assert!(matches!(
            graph.add_element("B", attr),
            Err(BindError::Config(_))
        ));
        assert!(matches!(
            graph.add_element(" ", a),
            Err(BindError::Config(_))
        ));
        assert!(matches!(
            graph.set_discriminate_descendants(attr, true),
            Err(BindError::Config(_))
        ));
        assert!(matches!(
            graph.add_element("B", ProviderId(99)),
            Err(BindError::UnknownProvider(_))
        ));
        assert!(matches!(
            graph.assign_root(a, None),
            Err(BindError::InvalidOperation(_))
        ));
    }

    #[test]
    fn weak_listeners_are_pruned() {
        struct Counter(RefCell<usize>);
        impl ProviderListener for Counter {
            fn on_provider_event(&self, _event: &ProviderEvent) {
                *self.0.borrow_mut() += 1;
            }
        }

        let mut graph = ProviderGraph::new();
        let root = graph.add_root("doc").unwrap();
        let counter = Rc::new(Counter(RefCell::new(0)));
        let weak: Weak<dyn ProviderListener> = Rc::downgrade(&counter) as Weak<dyn ProviderListener>;
        let sub = graph.subscribe_listener(root, weak).unwrap();
        graph.load_root(root, "<A/>").unwrap();
        assert_eq!(*counter.0.borrow(), 1);
        drop(counter);
        graph.assign_root(root, None).unwrap();
        assert_eq!(graph.subscriber_count(root), 0);
        assert!(!graph.unsubscribe(root, sub));
    }
}
