// src/tree.rs

//! Queue tree data structures
//!
//! Packages waiting for an operation are kept in a tree with one root per
//! section (install, uninstall, world update). Install nodes are nested under
//! the package that pulled them in. Nodes live in an arena and are addressed
//! by [`NodeId`]; slots are never reused, so a handle to a removed node stays
//! invalid instead of pointing at a newer node.

use crate::cpv::Cpv;
use std::collections::HashSet;
use std::fmt;

/// Top level grouping of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Install,
    Uninstall,
    Update,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Install, Section::Uninstall, Section::Update];

    pub fn label(&self) -> &'static str {
        match self {
            Section::Install => "Install",
            Section::Uninstall => "Uninstall",
            Section::Update => "Update",
        }
    }

    fn index(self) -> usize {
        match self {
            Section::Install => 0,
            Section::Uninstall => 1,
            Section::Update => 2,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Handle to a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A queued package as shown in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub cpv: Cpv,
    pub oneshot: bool,
    pub update: bool,
    pub downgrade: bool,
    /// Installed version being replaced
    pub prior_version: Option<String>,
    /// Pending USE changes (`+flag` / `-flag`)
    pub use_changes: Vec<String>,
}

impl QueueEntry {
    pub fn new(cpv: Cpv) -> Self {
        Self {
            cpv,
            oneshot: false,
            update: false,
            downgrade: false,
            prior_version: None,
            use_changes: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum NodeValue {
    Root,
    Package(QueueEntry),
}

#[derive(Debug)]
struct Node {
    section: Section,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: NodeValue,
}

/// Arena-backed queue tree
#[derive(Debug, Default)]
pub struct DependencyTree {
    nodes: Vec<Option<Node>>,
    roots: [Option<NodeId>; 3],
    in_progress: HashSet<Section>,
    live: usize,
}

impl DependencyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the root of a section, creating it on first use
    pub fn root(&mut self, section: Section) -> NodeId {
        if let Some(id) = self.roots[section.index()].filter(|id| self.contains(*id)) {
            return id;
        }

        let id = self.insert(Node {
            section,
            parent: None,
            children: Vec::new(),
            value: NodeValue::Root,
        });
        self.roots[section.index()] = Some(id);
        id
    }

    /// The root of a section if it exists
    pub fn existing_root(&self, section: Section) -> Option<NodeId> {
        self.roots[section.index()].filter(|id| self.contains(*id))
    }

    /// Append a package below `parent`
    ///
    /// Returns `None` if `parent` is no longer part of the tree.
    pub fn append(&mut self, parent: NodeId, entry: QueueEntry) -> Option<NodeId> {
        let section = self.node(parent)?.section;
        let id = self.insert(Node {
            section,
            parent: Some(parent),
            children: Vec::new(),
            value: NodeValue::Package(entry),
        });
        if let Some(p) = self.node_mut(parent) {
            p.children.push(id);
        }
        Some(id)
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        self.live += 1;
        id
    }

    /// Remove a node together with all of its descendants
    ///
    /// Returns the number of nodes removed. Removing a root invalidates the
    /// section handle; the next [`root`](Self::root) call creates a new one.
    pub fn remove(&mut self, id: NodeId) -> usize {
        let Some(parent) = self.node(id).map(|n| n.parent) else {
            return 0;
        };

        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|c| *c != id);
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        self.live -= removed;
        removed
    }

    /// Unlink a subtree from its parent, keeping its nodes alive
    ///
    /// Returns the former position among the parent's children. A detached
    /// subtree is invisible to navigation from the roots until it is
    /// [`reattach`](Self::reattach)ed or removed.
    pub fn detach(&mut self, id: NodeId) -> Option<usize> {
        let parent = self.node(id)?.parent?;
        let siblings = &mut self.node_mut(parent)?.children;
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.remove(pos);
        Some(pos)
    }

    /// Link a detached subtree back under its parent at `pos`
    pub fn reattach(&mut self, id: NodeId, pos: usize) -> bool {
        let Some(parent) = self.node(id).and_then(|n| n.parent) else {
            return false;
        };
        let Some(parent) = self.node_mut(parent) else {
            return false;
        };
        if !parent.children.contains(&id) {
            let pos = pos.min(parent.children.len());
            parent.children.insert(pos, id);
        }
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of nodes in the tree, roots included
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn section(&self, id: NodeId) -> Option<Section> {
        self.node(id).map(|n| n.section)
    }

    /// The package of a node; `None` for roots and stale handles
    pub fn entry(&self, id: NodeId) -> Option<&QueueEntry> {
        match &self.node(id)?.value {
            NodeValue::Package(entry) => Some(entry),
            NodeValue::Root => None,
        }
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        matches!(self.node(id).map(|n| &n.value), Some(NodeValue::Root))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        !self.children(id).is_empty()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// All nodes below `id` in pre-order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    /// Pre-order listing of all sections with node depth (roots at 0)
    pub fn walk(&self) -> Vec<(usize, NodeId)> {
        let mut out = Vec::new();
        for root in Section::ALL.iter().filter_map(|s| self.existing_root(*s)) {
            let mut stack = vec![(0, root)];
            while let Some((depth, id)) = stack.pop() {
                out.push((depth, id));
                stack.extend(self.children(id).iter().rev().map(|c| (depth + 1, *c)));
            }
        }
        out
    }

    pub fn mark_in_progress(&mut self, section: Section, in_progress: bool) {
        if in_progress {
            self.in_progress.insert(section);
        } else {
            self.in_progress.remove(&section);
        }
    }

    pub fn is_in_progress(&self, section: Section) -> bool {
        self.in_progress.contains(&section)
    }

    /// Annotation text shown next to a package
    pub fn display_value(entry: &QueueEntry) -> String {
        let mut parts = Vec::new();

        if entry.oneshot {
            parts.push("oneshot".to_string());
        }

        let (flag, verb) = if entry.update {
            (true, "updating")
        } else {
            (entry.downgrade, "downgrading")
        };
        if flag {
            parts.push(match &entry.prior_version {
                Some(version) => format!("{} from version {}", verb, version),
                None => verb.to_string(),
            });
        }

        if !entry.use_changes.is_empty() {
            let mut flags = entry.use_changes.clone();
            flags.sort();
            parts.push(format!("IUSE changes: {}", flags.join(" ")));
        }

        parts.join("; ")
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }
}
