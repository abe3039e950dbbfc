//! Arena-backed hierarchical tree.
//!
//! One [`Tree`] owns every node in a slot vector; [`NodeId`] handles index
//! into it. Structural edits (delete, move, duplicate) are cheap id surgery
//! instead of pointer juggling, and the borrow checker rules out structural
//! mutation during traversal because every operation goes through the tree.
//!
//! Deleting a subtree tombstones its slots and recycles them through a free
//! list; handles into a deleted subtree report [`TreeError::InvalidHandle`]
//! until their slot is reused.
//!
//! Sibling names are unique under each parent. The empty name is reserved
//! for the root, and `/` is reserved as the path delimiter.

use serde_json::Value;

use plinth_core::TreeError;

use crate::iter::TreeIter;

/// Handle to a node in a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// A single tree node: name, JSON payload, and child order by insertion.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) data: Value,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// An arena-backed tree with named nodes and JSON payloads.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
    sorted: bool,
}

impl Tree {
    /// Create a tree holding just the root (empty name, `Null` payload).
    pub fn new() -> Self {
        Self::with_root(String::new(), Value::Null)
    }

    /// Create a tree whose root carries the given name and payload. Used by
    /// deserialization, where the encoded root keeps its original name.
    pub(crate) fn with_root(name: String, data: Value) -> Self {
        Self {
            slots: vec![Some(Node {
                name,
                data,
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
            root: NodeId(0),
            sorted: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Whether inserts keep siblings sorted by name.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Toggle sorted mode. Enabling it re-sorts every sibling list ascending
    /// so the invariant holds from this point on.
    pub fn set_sorted(&mut self, sorted: bool) {
        self.sorted = sorted;
        if sorted {
            let ids: Vec<NodeId> = self.iter(self.root).collect();
            for id in ids {
                self.sort_one(id, true);
            }
        }
    }

    // ========================================================================
    // Node access
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.slots
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .ok_or(TreeError::InvalidHandle)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.slots
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(TreeError::InvalidHandle)
    }

    pub fn name_of(&self, id: NodeId) -> Result<&str, TreeError> {
        Ok(self.node(id)?.name())
    }

    pub fn data_of(&self, id: NodeId) -> Result<&Value, TreeError> {
        Ok(self.node(id)?.data())
    }

    pub fn set_data(&mut self, id: NodeId, data: Value) -> Result<(), TreeError> {
        self.node_mut(id)?.data = data;
        Ok(())
    }

    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children_of(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(self.node(id)?.children())
    }

    /// Find a direct child by name. `None` for unknown names or handles.
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .ok()?
            .children
            .iter()
            .copied()
            .find(|&child| self.name_or_empty(child) == name)
    }

    fn name_or_empty(&self, id: NodeId) -> &str {
        self.slots
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .map(|node| node.name.as_str())
            .unwrap_or("")
    }

    // ========================================================================
    // Structural edits
    // ========================================================================

    fn validate_name(name: &str) -> Result<(), TreeError> {
        if name.is_empty() {
            return Err(TreeError::InvalidName {
                reason: "empty name is reserved for the root".to_string(),
            });
        }
        if name.contains('/') {
            return Err(TreeError::InvalidName {
                reason: "name must not contain the path delimiter '/'".to_string(),
            });
        }
        Ok(())
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Remove `id` from its parent's child list (the node itself survives).
    fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        if let Some(parent) = self.node(id)?.parent {
            self.node_mut(parent)?.children.retain(|&child| child != id);
        }
        Ok(())
    }

    /// Tombstone `id` and everything below it.
    fn release_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.slots.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
                self.free.push(current.0);
            }
        }
    }

    fn sort_one(&mut self, parent: NodeId, ascending: bool) {
        let Ok(node) = self.node(parent) else { return };
        let mut children = node.children.clone();
        children.sort_by(|&a, &b| {
            let order = self.name_or_empty(a).cmp(self.name_or_empty(b));
            if ascending {
                order
            } else {
                order.reverse()
            }
        });
        if let Ok(node) = self.node_mut(parent) {
            node.children = children;
        }
    }

    /// Create a direct child. With `replace`, an existing child of that name
    /// keeps its identity and children and only its payload is overwritten.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        name: &str,
        data: Value,
        replace: bool,
    ) -> Result<NodeId, TreeError> {
        self.node(parent)?;
        Self::validate_name(name)?;

        if let Some(existing) = self.child_by_name(parent, name) {
            if !replace {
                return Err(TreeError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            self.node_mut(existing)?.data = data;
            return Ok(existing);
        }

        let id = self.alloc(Node {
            name: name.to_string(),
            data,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent)?.children.push(id);
        if self.sorted {
            self.sort_one(parent, true);
        }
        Ok(id)
    }

    /// Create a node at a `/`-delimited path.
    ///
    /// A leading `/` resolves from the root of `node`'s tree, otherwise the
    /// path is relative to `node`. Missing intermediate segments are created
    /// with `Null` payloads. An existing final segment is an
    /// [`TreeError::AlreadyExists`] error unless `replace` is set, in which
    /// case its payload is overwritten in place.
    pub fn create_by_path(
        &mut self,
        node: NodeId,
        path: &str,
        data: Value,
        replace: bool,
    ) -> Result<NodeId, TreeError> {
        let mut current = if path.starts_with('/') {
            self.root_of(node)?
        } else {
            self.node(node)?;
            node
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, intermediate)) = segments.split_last() else {
            return Err(TreeError::InvalidName {
                reason: "path has no segments".to_string(),
            });
        };

        for segment in intermediate {
            current = match self.child_by_name(current, segment) {
                Some(id) => id,
                None => self.create_child(current, segment, Value::Null, false)?,
            };
        }

        match self.child_by_name(current, last) {
            Some(existing) => {
                if !replace {
                    return Err(TreeError::AlreadyExists {
                        name: (*last).to_string(),
                    });
                }
                self.node_mut(existing)?.data = data;
                Ok(existing)
            }
            None => self.create_child(current, last, data, false),
        }
    }

    /// Delete the named child of `node` and its whole subtree.
    pub fn delete(&mut self, node: NodeId, name: &str) -> Result<(), TreeError> {
        self.node(node)?;
        let child = self
            .child_by_name(node, name)
            .ok_or_else(|| TreeError::NotFound {
                path: name.to_string(),
            })?;
        self.detach(child)?;
        self.release_subtree(child);
        Ok(())
    }

    /// Rename the child `src` of `node` to `dst`, in place: the node keeps
    /// its identity, its children, and its position among its siblings.
    pub fn rename(&mut self, node: NodeId, src: &str, dst: &str) -> Result<(), TreeError> {
        self.node(node)?;
        Self::validate_name(dst)?;
        if self.child_by_name(node, dst).is_some() {
            return Err(TreeError::AlreadyExists {
                name: dst.to_string(),
            });
        }
        let child = self
            .child_by_name(node, src)
            .ok_or_else(|| TreeError::NotFound {
                path: src.to_string(),
            })?;
        self.node_mut(child)?.name = dst.to_string();
        if self.sorted {
            self.sort_one(node, true);
        }
        Ok(())
    }

    /// Deep-copy the subtree at `src` to a new child of `dst_parent`.
    ///
    /// The payload clone is a full `Value` clone, so the copy shares nothing
    /// with the original. Copying into a descendant of `src` is allowed; the
    /// copy is built unattached before insertion, so it never recurses into
    /// itself.
    pub fn duplicate(
        &mut self,
        src: NodeId,
        dst_parent: NodeId,
        dst_name: &str,
        replace: bool,
    ) -> Result<NodeId, TreeError> {
        self.node(src)?;
        self.node(dst_parent)?;
        Self::validate_name(dst_name)?;

        if let Some(existing) = self.child_by_name(dst_parent, dst_name) {
            if !replace {
                return Err(TreeError::AlreadyExists {
                    name: dst_name.to_string(),
                });
            }
            let copy = self.clone_subtree(src, Some(dst_parent))?;
            self.detach(existing)?;
            self.release_subtree(existing);
            self.node_mut(copy)?.name = dst_name.to_string();
            self.node_mut(dst_parent)?.children.push(copy);
            if self.sorted {
                self.sort_one(dst_parent, true);
            }
            return Ok(copy);
        }

        let copy = self.clone_subtree(src, Some(dst_parent))?;
        self.node_mut(copy)?.name = dst_name.to_string();
        self.node_mut(dst_parent)?.children.push(copy);
        if self.sorted {
            self.sort_one(dst_parent, true);
        }
        Ok(copy)
    }

    fn clone_subtree(&mut self, src: NodeId, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        let (name, data, children) = {
            let node = self.node(src)?;
            (node.name.clone(), node.data.clone(), node.children.clone())
        };
        let copy = self.alloc(Node {
            name,
            data,
            parent,
            children: Vec::new(),
        });
        for child in children {
            let child_copy = self.clone_subtree(child, Some(copy))?;
            self.node_mut(copy)?.children.push(child_copy);
        }
        Ok(copy)
    }

    /// Re-parent the subtree at `src` under `dst_parent` as `new_name`,
    /// without copying. The destination must not lie inside the moved
    /// subtree.
    pub fn move_node(
        &mut self,
        src: NodeId,
        dst_parent: NodeId,
        new_name: &str,
        replace: bool,
    ) -> Result<NodeId, TreeError> {
        self.node(src)?;
        self.node(dst_parent)?;
        Self::validate_name(new_name)?;

        let mut cursor = Some(dst_parent);
        while let Some(id) = cursor {
            if id == src {
                return Err(TreeError::CycleDetected {
                    name: self.name_or_empty(src).to_string(),
                });
            }
            cursor = self.node(id)?.parent;
        }

        if let Some(existing) = self.child_by_name(dst_parent, new_name) {
            if existing == src {
                return Ok(src);
            }
            if !replace {
                return Err(TreeError::AlreadyExists {
                    name: new_name.to_string(),
                });
            }
            self.detach(existing)?;
            self.release_subtree(existing);
        }

        self.detach(src)?;
        {
            let node = self.node_mut(src)?;
            node.name = new_name.to_string();
            node.parent = Some(dst_parent);
        }
        self.node_mut(dst_parent)?.children.push(src);
        if self.sorted {
            self.sort_one(dst_parent, true);
        }
        Ok(src)
    }

    /// Sort the direct children of `node` by name.
    pub fn sort_children(&mut self, node: NodeId, ascending: bool) -> Result<(), TreeError> {
        self.node(node)?;
        self.sort_one(node, ascending);
        Ok(())
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Walk parent links up to the root of `node`'s tree.
    pub fn root_of(&self, node: NodeId) -> Result<NodeId, TreeError> {
        let mut current = node;
        loop {
            match self.node(current)?.parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    /// The `/`-prefixed path from the root to `node`. The root itself is
    /// `/`.
    pub fn path_of(&self, node: NodeId) -> Result<String, TreeError> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            let n = self.node(current)?;
            match n.parent {
                Some(parent) => {
                    segments.push(n.name.clone());
                    current = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Resolve a `/`-delimited path. `None` on any missing segment or on an
    /// invalid starting handle.
    pub fn find_by_path(&self, node: NodeId, path: &str) -> Option<NodeId> {
        let mut current = if path.starts_with('/') {
            self.root_of(node).ok()?
        } else {
            self.node(node).ok()?;
            node
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.child_by_name(current, segment)?;
        }
        Some(current)
    }

    /// Find nodes whose payload equals `value`, in pre-order.
    ///
    /// `single` stops at the first match; `global` searches from the root of
    /// `node`'s tree instead of from `node`.
    pub fn find_by_data(
        &self,
        node: NodeId,
        value: &Value,
        single: bool,
        global: bool,
    ) -> Result<Vec<NodeId>, TreeError> {
        let start = if global { self.root_of(node)? } else { node };
        self.node(start)?;

        let mut found = Vec::new();
        for id in self.iter(start) {
            if self.node(id)?.data == *value {
                found.push(id);
                if single {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Pre-order traversal of the subtree at `node`, starting with `node`
    /// itself. An invalid handle yields an empty iterator.
    pub fn iter(&self, node: NodeId) -> TreeIter<'_> {
        TreeIter::new(self, node)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,5}"
    }

    proptest! {
        /// A node created at a path is found at that path, and path_of is
        /// its inverse.
        #[test]
        fn prop_create_find_path_roundtrip(
            segments in proptest::collection::vec(segment(), 1..5),
        ) {
            let mut tree = Tree::new();
            let root = tree.root();
            let path = format!("/{}", segments.join("/"));

            let id = tree.create_by_path(root, &path, json!("payload"), true).unwrap();
            prop_assert_eq!(tree.find_by_path(root, &path), Some(id));
            prop_assert_eq!(tree.path_of(id).unwrap(), path);
        }

        /// Pre-order yields every created node exactly once.
        #[test]
        fn prop_iter_visits_all_nodes(
            names in proptest::collection::btree_set(segment(), 1..8),
        ) {
            let mut tree = Tree::new();
            let root = tree.root();
            for name in &names {
                tree.create_child(root, name, Value::Null, false).unwrap();
            }
            prop_assert_eq!(tree.iter(root).count(), names.len() + 1);
        }
    }
}
