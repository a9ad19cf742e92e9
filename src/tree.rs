//! The virtual-node table.
//!
//! A pure in-memory arena owning every node of the exposed namespace. Nodes
//! are addressed by [`NodeId`]; parents hold their children as an
//! ordered-insertion list of ids. External holders (open handles, the fetch
//! queue, outstanding helper request handles) pin nodes through an explicit
//! reference count; a node is reclaimed only once it is unlinked and
//! unreferenced, so identities stay stable while anyone can still reach them.

use std::collections::HashMap;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::Error;
use crate::FileKind;
use crate::Result;
use crate::host::HostDir;
use crate::host::HostIdent;
use crate::host::HostMapping;

/// Identifier of a node in the virtual tree.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl NodeId {
    /// The root of the mount.
    pub const ROOT: NodeId = NodeId(1);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Node {
    pub(crate) kind: FileKind,
    pub(crate) name: OsString,
    pub(crate) size: u64,
    pub(crate) mtime: i64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Link to the backing host directory. Held for directories only and,
    /// once set, valid for the lifetime of the node. Regular files are
    /// re-resolved on every open and never retain one.
    pub(crate) host: Option<Arc<dyn HostDir>>,
    /// Identity of the listing file last used to populate `children`.
    pub(crate) manifest_token: Option<HostIdent>,
    pub(crate) dynamic: bool,
    /// A negative entry minted by lookup in a dynamic directory, carried
    /// only so a fetch request can name it. Invisible to readdir.
    pub(crate) placeholder: bool,
    /// The host mapping this node's page cache is aliased to, set on the
    /// first successful mmap and never re-aliased to a different host.
    pub(crate) mapped: Option<Arc<HostMapping>>,
    refs: u64,
}

impl Node {
    fn new(kind: FileKind, name: OsString, parent: Option<NodeId>) -> Node {
        Node {
            kind,
            name,
            size: 0,
            mtime: 0,
            parent,
            children: Vec::new(),
            host: None,
            manifest_token: None,
            dynamic: false,
            placeholder: false,
            mapped: None,
            refs: 0,
        }
    }

}

pub(crate) struct NodeTable {
    nodes: HashMap<NodeId, Node>,
    next: u64,
}

impl NodeTable {
    /// Create a table holding only the root node.
    pub(crate) fn new() -> NodeTable {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::ROOT,
            Node::new(FileKind::Directory, OsString::from("/"), None),
        );
        NodeTable {
            nodes,
            next: NodeId::ROOT.0 + 1,
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(&id).expect("node table lost a live id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(&id).expect("node table lost a live id")
    }

    /// Create a child of `parent`. Fails with [`Error::Exists`] if a sibling
    /// of that name is already present.
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        kind: FileKind,
        name: &OsStr,
    ) -> Result<NodeId> {
        debug_assert_eq!(self.node(parent).kind, FileKind::Directory);
        if self.lookup_child(parent, name).is_some() {
            return Err(Error::Exists);
        }
        let id = NodeId(self.next);
        self.next += 1;
        self.nodes
            .insert(id, Node::new(kind, name.to_os_string(), Some(parent)));
        self.node_mut(parent).children.push(id);
        Ok(id)
    }

    /// Find a child of `parent` by byte-exact name.
    pub(crate) fn lookup_child(&self, parent: NodeId, name: &OsStr) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name)
    }

    /// Take an external reference on a node. Fails if a concurrent sweep
    /// already reclaimed it.
    pub(crate) fn grab(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop an external reference taken with [`NodeTable::grab`].
    pub(crate) fn put(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            debug_assert!(node.refs > 0);
            node.refs = node.refs.saturating_sub(1);
        }
    }

    fn subtree_refs(&self, id: NodeId) -> u64 {
        let node = self.node(id);
        node.refs
            + node
                .children
                .iter()
                .map(|&child| self.subtree_refs(child))
                .sum::<u64>()
    }

    /// Unlink `id` from its parent and free it together with all of its
    /// descendants. The caller must have established that the subtree holds
    /// no external references.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) {
        debug_assert_eq!(self.subtree_refs(id), 0);
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|&child| child != id);
        }
        self.free_recursive(id);
    }

    fn free_recursive(&mut self, id: NodeId) {
        let children = match self.nodes.remove(&id) {
            Some(node) => node.children,
            None => return,
        };
        for child in children {
            self.free_recursive(child);
        }
    }

    /// Drop the children of `dir` that are not named in `keep`, skipping the
    /// synthetic node `skip`. A child whose subtree is still referenced
    /// survives, linked and addressable, until a later sweep finds it idle.
    pub(crate) fn sweep_absent(&mut self, dir: NodeId, keep: &HashSet<OsString>, skip: NodeId) {
        let absent: Vec<NodeId> = self
            .node(dir)
            .children
            .iter()
            .copied()
            .filter(|&child| child != skip && !keep.contains(&self.node(child).name))
            .collect();
        for child in absent {
            if self.subtree_refs(child) == 0 {
                self.remove_subtree(child);
            } else {
                warn!(
                    "keeping removed entry {:?}, still referenced",
                    self.node(child).name
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }
}
