//! Arena-backed element tree.
//!
//! Every element lives in a single `Vec` owned by the [`Document`] and is addressed by a
//! [`NodeId`]. Parent/child links are indices into that arena, so nodes can be detached,
//! cloned and re-attached without any shared ownership. Detached nodes stay allocated
//! until the document is dropped.

use crate::path::ElementPath;

/// Handle to an element inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    text: Option<String>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
            text: None,
        }
    }
}

/// A mutable, in-memory XML element tree with a single root element.
#[derive(Debug, Clone)]
pub struct Document {
    elements: Vec<Element>,
    root: NodeId,
}

impl Document {
    /// Create a document containing only a root element.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            elements: vec![Element::new(root_name.into())],
            root: NodeId(0),
        }
    }

    /// The root element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Qualified element name as it appears in the source (prefix included).
    pub fn name(&self, node: NodeId) -> &str {
        &self.element(node).name
    }

    /// Element name without any namespace prefix.
    pub fn local_name(&self, node: NodeId) -> &str {
        local_part(&self.element(node).name)
    }

    pub fn attribute(&self, node: NodeId, key: &str) -> Option<&str> {
        self.element(node)
            .attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place so attribute order is stable.
    pub fn set_attribute(&mut self, node: NodeId, key: &str, value: impl Into<String>) {
        let value = value.into();
        let attributes = &mut self.element_mut(node).attributes;
        if let Some(slot) = attributes.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            attributes.push((key.to_string(), value));
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, key: &str) -> Option<String> {
        let attributes = &mut self.element_mut(node).attributes;
        let index = attributes.iter().position(|(k, _)| k == key)?;
        Some(attributes.remove(index).1)
    }

    pub fn attributes(&self, node: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.element(node)
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.element(node).text.as_deref()
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        self.element_mut(node).text = Some(text.into());
    }

    pub(crate) fn append_text(&mut self, node: NodeId, text: &str) {
        let element = self.element_mut(node);
        match element.text.as_mut() {
            Some(existing) => existing.push_str(text),
            None => element.text = Some(text.to_string()),
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.element(node).parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.element(node).children
    }

    /// Direct children whose local name equals `name`, in document order.
    pub fn child_elements(&self, node: NodeId, name: &str) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|child| self.local_name(*child) == name)
            .collect()
    }

    /// First direct child whose local name equals `name`.
    pub fn first_child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .find(|child| self.local_name(*child) == name)
    }

    /// First direct child named `name` whose `attribute` equals `value`.
    pub fn find_child_with_attribute(
        &self,
        node: NodeId,
        name: &str,
        attribute: &str,
        value: &str,
    ) -> Option<NodeId> {
        self.children(node).iter().copied().find(|child| {
            self.local_name(*child) == name && self.attribute(*child, attribute) == Some(value)
        })
    }

    /// All direct children named `name` whose `attribute` equals `value`.
    pub fn children_with_attribute(
        &self,
        node: NodeId,
        name: &str,
        attribute: &str,
        value: &str,
    ) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|child| {
                self.local_name(*child) == name && self.attribute(*child, attribute) == Some(value)
            })
            .collect()
    }

    /// First node reached by following a `/`-separated path of local names from `from`.
    pub fn select_single(&self, from: NodeId, path: &str) -> Option<NodeId> {
        self.select_all(from, path).into_iter().next()
    }

    /// Every node reached by following a `/`-separated path of local names from `from`.
    ///
    /// An empty segment (`a//b`) matches descendants at any depth.
    pub fn select_all(&self, from: NodeId, path: &str) -> Vec<NodeId> {
        ElementPath::parse(path).select(self, from)
    }

    /// Every descendant of `node` (excluding `node`) in document order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Allocate a new detached element.
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.elements.push(Element::new(name.into()));
        NodeId(self.elements.len() - 1)
    }

    /// Append `child` as the last child of `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(
            !self.is_ancestor_or_self(child, parent),
            "cannot append a node beneath itself"
        );
        self.detach(child);
        self.element_mut(parent).children.push(child);
        self.element_mut(child).parent = Some(parent);
    }

    /// Insert `child` under `parent` immediately before `reference`.
    ///
    /// Falls back to appending when `reference` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        debug_assert!(
            !self.is_ancestor_or_self(child, parent),
            "cannot insert a node beneath itself"
        );
        self.detach(child);
        let children = &mut self.element_mut(parent).children;
        match children.iter().position(|c| *c == reference) {
            Some(index) => children.insert(index, child),
            None => children.push(child),
        }
        self.element_mut(child).parent = Some(parent);
    }

    /// Remove `child` from `parent`. Returns `false` if it was not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.element_mut(parent).children;
        match children.iter().position(|c| *c == child) {
            Some(index) => {
                children.remove(index);
                self.element_mut(child).parent = None;
                true
            }
            None => false,
        }
    }

    /// Detach `node` from its parent, if any.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.parent(node) {
            self.remove_child(parent, node);
        }
    }

    /// Detach every child of `node`.
    pub fn clear_children(&mut self, node: NodeId) {
        let children = std::mem::take(&mut self.element_mut(node).children);
        for child in children {
            self.element_mut(child).parent = None;
        }
    }

    /// Deep-copy `node` and its subtree. The copy is detached.
    pub fn deep_clone(&mut self, node: NodeId) -> NodeId {
        let source = self.element(node);
        let name = source.name.clone();
        let attributes = source.attributes.clone();
        let text = source.text.clone();
        let children = source.children.clone();

        let copy = self.create_element(name);
        {
            let element = self.element_mut(copy);
            element.attributes = attributes;
            element.text = text;
        }
        for child in children {
            let child_copy = self.deep_clone(child);
            self.append_child(copy, child_copy);
        }
        copy
    }

    /// Whether `node` is reachable from the root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.is_ancestor_or_self(self.root, node)
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn element(&self, node: NodeId) -> &Element {
        &self.elements[node.0]
    }

    fn element_mut(&mut self, node: NodeId) -> &mut Element {
        &mut self.elements[node.0]
    }
}

pub(crate) fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}
