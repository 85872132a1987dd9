//! Arena-backed document tree.
//!
//! Nodes live in a flat `Vec` and refer to each other through [`NodeId`] slot
//! indices. The parent link is a plain index, so subtrees can be detached and
//! re-attached during rewriting without any ownership juggling. Detached nodes
//! keep their slot but are no longer reachable from the root.

use std::fmt;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use wxsforge_contracts::WXSFORGE_DOCUMENT_SCHEMA_VERSION;

use crate::directives::Directive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Wix,
    Product,
    Module,
    Package,
    Media,
    Directory,
    Component,
    File,
    CreateFolder,
    RemoveFolder,
    RegistryKey,
    RegistryValue,
    Feature,
    ComponentRef,
    Shortcut,
    Icon,
    Property,
    CustomAction,
    Custom,
    InstallExecuteSequence,
    InstallUISequence,
    Condition,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Wix => "Wix",
            NodeKind::Product => "Product",
            NodeKind::Module => "Module",
            NodeKind::Package => "Package",
            NodeKind::Media => "Media",
            NodeKind::Directory => "Directory",
            NodeKind::Component => "Component",
            NodeKind::File => "File",
            NodeKind::CreateFolder => "CreateFolder",
            NodeKind::RemoveFolder => "RemoveFolder",
            NodeKind::RegistryKey => "RegistryKey",
            NodeKind::RegistryValue => "RegistryValue",
            NodeKind::Feature => "Feature",
            NodeKind::ComponentRef => "ComponentRef",
            NodeKind::Shortcut => "Shortcut",
            NodeKind::Icon => "Icon",
            NodeKind::Property => "Property",
            NodeKind::CustomAction => "CustomAction",
            NodeKind::Custom => "Custom",
            NodeKind::InstallExecuteSequence => "InstallExecuteSequence",
            NodeKind::InstallUISequence => "InstallUISequence",
            NodeKind::Condition => "Condition",
            NodeKind::Other(name) => name.as_str(),
        }
    }

    pub fn from_name(name: &str) -> NodeKind {
        match name {
            "Wix" => NodeKind::Wix,
            "Product" => NodeKind::Product,
            "Module" => NodeKind::Module,
            "Package" => NodeKind::Package,
            "Media" => NodeKind::Media,
            "Directory" => NodeKind::Directory,
            "Component" => NodeKind::Component,
            "File" => NodeKind::File,
            "CreateFolder" => NodeKind::CreateFolder,
            "RemoveFolder" => NodeKind::RemoveFolder,
            "RegistryKey" => NodeKind::RegistryKey,
            "RegistryValue" => NodeKind::RegistryValue,
            "Feature" => NodeKind::Feature,
            "ComponentRef" => NodeKind::ComponentRef,
            "Shortcut" => NodeKind::Shortcut,
            "Icon" => NodeKind::Icon,
            "Property" => NodeKind::Property,
            "CustomAction" => NodeKind::CustomAction,
            "Custom" => NodeKind::Custom,
            "InstallExecuteSequence" => NodeKind::InstallExecuteSequence,
            "InstallUISequence" => NodeKind::InstallUISequence,
            "Condition" => NodeKind::Condition,
            other => NodeKind::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeKind {
    fn from(name: String) -> Self {
        NodeKind::from_name(&name)
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub attributes: IndexMap<String, String>,
    /// Element body (`Condition`, `Custom`).
    pub text: Option<String>,
    /// Authoring flag: this directory is the product's install dir.
    pub install_dir: bool,
    pub directives: Vec<Directive>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            attributes: IndexMap::new(),
            text: None,
            install_dir: false,
            directives: Vec::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("Id")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    pub fn new(root_kind: NodeKind) -> Self {
        Document {
            nodes: vec![Node::new(root_kind)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn is(&self, id: NodeId, kind: &NodeKind) -> bool {
        &self.nodes[id.0].kind == kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(kind);
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn append_with(&mut self, parent: NodeId, kind: NodeKind, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.append(parent, kind);
        for (name, value) in attrs {
            self.set_attr(id, name, value);
        }
        id
    }

    /// Unlinks `id` from its parent. The subtree stays intact and can be
    /// re-attached with [`Document::attach`].
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn attach(&mut self, parent: NodeId, id: NodeId) {
        self.detach(id);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id.0].attr(name)
    }

    pub fn id_of(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].id()
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.nodes[id.0].attributes.contains_key(name)
    }

    pub fn attr_is(&self, id: NodeId, name: &str, value: &str) -> bool {
        self.attr(id, name) == Some(value)
    }

    /// Returns `true` when the stored value changed.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let attrs = &mut self.nodes[id.0].attributes;
        if attrs.get(name).map(String::as_str) == Some(value) {
            return false;
        }
        attrs.insert(name.to_string(), value.to_string());
        true
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.nodes[id.0].attributes.shift_remove(name)
    }

    pub fn children_of_kind(&self, id: NodeId, kind: &NodeKind) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is(*c, kind))
            .collect()
    }

    pub fn first_child_of_kind(&self, id: NodeId, kind: &NodeKind) -> Option<NodeId> {
        self.children(id).iter().copied().find(|c| self.is(*c, kind))
    }

    /// Pre-order descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.children(cur).iter().rev().copied());
        }
        out
    }

    pub fn descendants_of_kind(&self, id: NodeId, kind: &NodeKind) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| self.is(*d, kind))
            .collect()
    }

    /// Every reachable node of `kind`, the root included, in document order.
    pub fn find_all(&self, kind: &NodeKind) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.is(self.root, kind) {
            out.push(self.root);
        }
        out.extend(self.descendants_of_kind(self.root, kind));
        out
    }

    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(id),
        }
    }

    /// Nearest enclosing node of `kind`, not counting `id` itself.
    pub fn ancestor_of_kind(&self, id: NodeId, kind: &NodeKind) -> Option<NodeId> {
        self.ancestors(id).find(|a| self.is(*a, kind))
    }

    /// The `Product` (or `Module`) element, whether it is the root or wrapped in `Wix`.
    pub fn product(&self) -> Option<NodeId> {
        let is_product = |n: NodeId| matches!(self.kind(n), NodeKind::Product | NodeKind::Module);
        if is_product(self.root) {
            return Some(self.root);
        }
        self.children(self.root).iter().copied().find(|c| is_product(*c))
    }

    pub fn select_or_create(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        match self.first_child_of_kind(parent, &kind) {
            Some(existing) => existing,
            None => self.append(parent, kind),
        }
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        1 + self.descendants(self.root).len()
    }

    /// Human-readable location such as `Product/Directory[INSTALLDIR]/Component[Main]`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut chain: Vec<NodeId> = self.ancestors(id).collect();
        chain.reverse();
        chain.push(id);
        chain
            .into_iter()
            .map(|n| match self.id_of(n) {
                Some(node_id) => format!("{}[{node_id}]", self.kind(n)),
                None => self.kind(n).to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn from_spec(spec: &NodeSpec) -> Document {
        let mut doc = Document::new(spec.kind.clone());
        let root = doc.root;
        doc.fill_from_spec(root, spec);
        doc
    }

    fn fill_from_spec(&mut self, id: NodeId, spec: &NodeSpec) {
        let node = self.node_mut(id);
        node.attributes = spec.attributes.clone();
        node.text = spec.text.clone();
        node.install_dir = spec.install_dir;
        node.directives = spec.directives.clone();
        for child in &spec.children {
            let child_id = self.append(id, child.kind.clone());
            self.fill_from_spec(child_id, child);
        }
    }

    pub fn to_spec(&self) -> NodeSpec {
        self.spec_of(self.root)
    }

    fn spec_of(&self, id: NodeId) -> NodeSpec {
        let node = self.node(id);
        NodeSpec {
            kind: node.kind.clone(),
            attributes: node.attributes.clone(),
            text: node.text.clone(),
            install_dir: node.install_dir,
            directives: node.directives.clone(),
            children: node.children.iter().map(|c| self.spec_of(*c)).collect(),
        }
    }
}

pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.doc.parent(cur);
        Some(cur)
    }
}

/// Nested, serializable form of a node. This is the shape the object-model
/// layer hands over and the shape `--emit-json` writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub install_dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFile {
    pub schema_version: String,
    pub root: NodeSpec,
}

pub fn parse_document_json(bytes: &[u8]) -> Result<Document> {
    let file: DocumentFile = serde_json::from_slice(bytes).context("parse document JSON")?;
    if file.schema_version.trim() != WXSFORGE_DOCUMENT_SCHEMA_VERSION {
        anyhow::bail!(
            "document schema_version mismatch: expected {WXSFORGE_DOCUMENT_SCHEMA_VERSION} got {:?}",
            file.schema_version
        );
    }
    Ok(Document::from_spec(&file.root))
}

pub fn load_document(path: &std::path::Path) -> Result<Document> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read document: {}", path.display()))?;
    parse_document_json(&bytes).with_context(|| format!("load document: {}", path.display()))
}
