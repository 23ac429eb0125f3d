//! Department hierarchy.
//!
//! Departments form a rooted forest keyed by id in an arena; parent/child
//! relationships are id references, never object self-references. All walks
//! are explicit and iterative with visited-set guards, so a corrupted parent
//! chain (a cycle in the stored data) terminates instead of looping or
//! blowing the call stack.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeptNode {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub parent_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DepartmentArena {
    nodes: HashMap<Uuid, DeptNode>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl DepartmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = DeptNode>) -> Self {
        let mut arena = Self::new();
        for node in nodes {
            arena.insert(node);
        }
        arena
    }

    pub fn insert(&mut self, node: DeptNode) {
        if let Some(parent_id) = node.parent_id {
            self.children.entry(parent_id).or_default().push(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    pub fn get(&self, id: Uuid) -> Option<&DeptNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeptNode> {
        self.nodes.values()
    }

    pub fn parent(&self, id: Uuid) -> Option<&DeptNode> {
        self.nodes
            .get(&id)
            .and_then(|node| node.parent_id)
            .and_then(|pid| self.nodes.get(&pid))
    }

    pub fn children(&self, id: Uuid) -> Vec<Uuid> {
        self.children.get(&id).cloned().unwrap_or_default()
    }

    /// All nodes reachable via child edges, excluding `id` itself.
    /// Iterative depth-first walk over the arena.
    pub fn descendants(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = self.children(id);

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current));
        }

        out
    }

    /// Ancestors from direct parent up to the root, in that order.
    /// Stops on the first repeated id, tolerating corrupted parent chains.
    pub fn ancestors(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id);

        let mut current = self.nodes.get(&id).and_then(|node| node.parent_id);
        while let Some(ancestor) = current {
            if !seen.insert(ancestor) {
                break;
            }
            out.push(ancestor);
            current = self.nodes.get(&ancestor).and_then(|node| node.parent_id);
        }

        out
    }

    pub fn is_descendant_of(&self, id: Uuid, ancestor: Uuid) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Distance from the root; a root node is level 0. Unknown ids are 0.
    pub fn level(&self, id: Uuid) -> usize {
        self.ancestors(id).len()
    }

    /// Root-to-self name chain joined for display, e.g.
    /// "Operations / Logistics / Fleet".
    pub fn hierarchy_path(&self, id: Uuid) -> String {
        let mut names: Vec<&str> = self
            .ancestors(id)
            .iter()
            .filter_map(|aid| self.nodes.get(aid))
            .map(|node| node.name.as_str())
            .collect();
        names.reverse();
        if let Some(node) = self.nodes.get(&id) {
            names.push(node.name.as_str());
        }
        names.join(" / ")
    }

    /// Reparent guard: assigning `new_parent` to `id` would create a cycle
    /// when the new parent is the node itself or one of its descendants.
    /// Callers must check this before persisting a parent change.
    pub fn would_create_cycle(&self, id: Uuid, new_parent: Uuid) -> bool {
        id == new_parent || self.descendants(id).contains(&new_parent)
    }

    /// Departments directly managed by `user_id`.
    pub fn managed_by(&self, user_id: Uuid) -> Vec<Uuid> {
        self.nodes
            .values()
            .filter(|node| node.manager_id == Some(user_id))
            .map(|node| node.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: Uuid, name: &str, parent: Option<Uuid>) -> DeptNode {
        DeptNode {
            id,
            name: name.to_string(),
            code: name.to_lowercase(),
            parent_id: parent,
            manager_id: None,
            active: true,
        }
    }

    fn chain() -> (DepartmentArena, Uuid, Uuid, Uuid) {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let leaf = Uuid::new_v4();
        let arena = DepartmentArena::from_nodes([
            node(root, "Operations", None),
            node(mid, "Logistics", Some(root)),
            node(leaf, "Fleet", Some(mid)),
        ]);
        (arena, root, mid, leaf)
    }

    #[test]
    fn descendants_collects_whole_subtree() {
        let (arena, root, mid, leaf) = chain();
        let mut descendants = arena.descendants(root);
        descendants.sort();
        let mut expected = vec![mid, leaf];
        expected.sort();
        assert_eq!(descendants, expected);
        assert_eq!(arena.descendants(leaf), Vec::<Uuid>::new());
    }

    #[test]
    fn ancestors_walk_upward_in_order() {
        let (arena, root, mid, leaf) = chain();
        assert_eq!(arena.ancestors(leaf), vec![mid, root]);
        assert_eq!(arena.ancestors(root), Vec::<Uuid>::new());
    }

    #[test]
    fn level_is_distance_from_root() {
        let (arena, root, mid, leaf) = chain();
        assert_eq!(arena.level(root), 0);
        assert_eq!(arena.level(mid), 1);
        assert_eq!(arena.level(leaf), 2);
    }

    #[test]
    fn hierarchy_path_joins_names() {
        let (arena, _, _, leaf) = chain();
        assert_eq!(arena.hierarchy_path(leaf), "Operations / Logistics / Fleet");
    }

    #[test]
    fn reparent_to_own_descendant_is_a_cycle() {
        let (arena, root, mid, leaf) = chain();
        assert!(arena.would_create_cycle(root, leaf));
        assert!(arena.would_create_cycle(mid, mid));
        assert!(!arena.would_create_cycle(leaf, root));
    }

    #[test]
    fn corrupted_parent_chain_terminates() {
        // a <-> b reference each other; the walk must not loop forever
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let arena = DepartmentArena::from_nodes([
            node(a, "A", Some(b)),
            node(b, "B", Some(a)),
        ]);
        assert_eq!(arena.ancestors(a), vec![b]);
        assert!(arena.descendants(a).len() <= 2);
    }

    #[test]
    fn managed_by_finds_direct_manager_assignments() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let manager = Uuid::new_v4();
        let mut managed = node(mid, "Logistics", Some(root));
        managed.manager_id = Some(manager);
        let arena = DepartmentArena::from_nodes([node(root, "Operations", None), managed]);
        assert_eq!(arena.managed_by(manager), vec![mid]);
        assert!(arena.managed_by(Uuid::new_v4()).is_empty());
    }
}
