//! A small arena document model.
//!
//! Only what the highlight and selection-editing routines observe is
//! modelled: the element tree, text, rendered box size, hidden/none styles,
//! form-field values and the live selection. Detached nodes stay in the arena
//! with no parent.

use std::collections::BTreeMap;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lowercase tag name.
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub width: f64,
    pub height: f64,
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub content_editable: bool,
    /// Current value of an input or textarea.
    pub value: String,
    /// Selection inside an input or textarea, in chars.
    pub selection: Option<(usize, usize)>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            width: 100.0,
            height: 16.0,
            display_none: false,
            visibility_hidden: false,
            content_editable: false,
            value: String::new(),
            selection: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.add_class(class);
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility_hidden = true;
        self
    }

    pub fn display_none(mut self) -> Self {
        self.display_none = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.content_editable = true;
        self
    }

    pub fn is_text_field(&self) -> bool {
        self.tag == "input" || self.tag == "textarea"
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// The live selection of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// A char range inside one text node; `start == end` is a caret.
    Range { node: NodeId, start: usize, end: usize },
    /// Everything inside an element.
    Contents(NodeId),
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    body: NodeId,
    pub focused: Option<NodeId>,
    pub selection: Option<Selection>,
    /// Last element scrolled into view.
    pub scrolled_to: Option<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let body = Node {
            data: NodeData::Element(Element::new("body").with_size(1024.0, 768.0)),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![body],
            body: 0,
            focused: None,
            selection: None,
            scrolled_to: None,
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: String) {
        if let Some(NodeData::Text(t)) = self.nodes.get_mut(id).map(|n| &mut n.data) {
            *t = text;
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.text(id).is_some()
    }

    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.push(NodeData::Element(element))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn append_element(&mut self, parent: NodeId, element: Element) -> NodeId {
        let id = self.create_element(element);
        self.insert_before(parent, id, None);
        id
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.create_text(text);
        self.insert_before(parent, id, None);
        id
    }

    /// Insert `child` under `parent` before `reference`, or last when
    /// `reference` is None or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if let Some(old) = self.nodes[child].parent {
            self.remove_child(old, child);
        }
        let pos = reference
            .and_then(|r| self.nodes[parent].children.iter().position(|&c| c == r))
            .unwrap_or(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(pos, child);
        self.nodes[child].parent = Some(parent);
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent].children.retain(|&c| c != child);
        if self.nodes[child].parent == Some(parent) {
            self.nodes[child].parent = None;
        }
    }

    pub fn remove_all_children(&mut self, parent: NodeId) {
        let children = std::mem::take(&mut self.nodes[parent].children);
        for child in children {
            self.nodes[child].parent = None;
        }
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// True when the node is reachable from the body.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.body {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Ancestors from the node itself upward.
    pub fn ancestors_or_self(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.parent(n))
    }

    /// Attached nodes under `root` in document order, `root` included.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Concatenated text of every text node under `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .find(|&n| self.element(n).and_then(|e| e.id.as_deref()) == Some(id))
    }

    pub fn find_by_attribute(&self, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .find(|&n| self.element(n).and_then(|e| e.attr(name)) == Some(value))
    }

    pub fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .filter(|&n| self.element(n).map(|e| e.has_class(class)).unwrap_or(false))
            .collect()
    }

    /// Merge adjacent text children and drop empty ones.
    pub fn normalize(&mut self, parent: NodeId) {
        let children = self.nodes[parent].children.clone();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            let Some(text) = self.text(child).map(str::to_string) else {
                kept.push(child);
                continue;
            };
            if text.is_empty() {
                self.nodes[child].parent = None;
                continue;
            }
            match kept.last().copied() {
                Some(prev) if self.is_text(prev) => {
                    let merged = format!("{}{}", self.text(prev).unwrap_or_default(), text);
                    self.set_text(prev, merged);
                    self.nodes[child].parent = None;
                }
                _ => kept.push(child),
            }
        }
        self.nodes[parent].children = kept;
    }
}
