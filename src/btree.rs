//! The persistent B-tree engine: node encoding, traversal, insertion with
//! splitting, deletion with rotation/merge rebalancing, structural
//! verification, and the dense-packing compaction scheme that keeps the
//! backing file free of holes.
//!
//! An `order` tree keeps `order` to `2*order` keys per node (except the
//! root, which may have as few as zero). Node positions are cell offsets
//! into the backing [`RecordStore`]; cell 0 of the store holds `order`, and
//! the root always lives at cell 1 for the lifetime of the tree.

use crate::errors::{err, Error};
use crate::store::{FileStore, MemStore, RecordStore};
use std::path::Path;
use tracing::{debug, info, trace, warn};

/// Reserved sentinel. Never a valid key or value.
pub const SENTINEL: i32 = -1;

/// Derived sizing constants for a given `order`.
#[derive(Debug, Clone, Copy)]
struct Params {
    order: i32,
}

impl Params {
    fn max_keys(&self) -> usize {
        2 * self.order as usize
    }

    fn min_keys(&self) -> usize {
        self.order as usize
    }

    fn max_children(&self) -> usize {
        2 * self.order as usize + 1
    }

    fn node_record_len(&self) -> i64 {
        (2 * self.max_keys() + self.max_children() + 3) as i64
    }
}

/// A child link: either a bare position we haven't read yet, or a node
/// we've already pulled off disk. Only the root and its immediate children
/// are ever kept in `Loaded` form (see [`Tree::reload_root`]) — everything
/// materialized deeper during an insert or delete is a local, throwaway copy
/// that is written back and dropped when the operation returns.
#[derive(Debug, Clone)]
pub enum ChildRef {
    Unloaded(i64),
    Loaded(Box<Node>),
}

impl ChildRef {
    pub fn pos(&self) -> i64 {
        match self {
            ChildRef::Unloaded(pos) => *pos,
            ChildRef::Loaded(node) => node.pos,
        }
    }
}

/// A B-tree node. `keys` is always sorted ascending; `children` is empty for
/// a leaf and `keys.len() + 1` long otherwise. `pos` is the node's own cell
/// offset and is also its identity — two `Node`s are equal iff their `pos`
/// match, mirroring the fact that the disk image, not any in-memory copy, is
/// authoritative.
#[derive(Debug, Clone)]
pub struct Node {
    pub pos: i64,
    pub keys: Vec<(i32, i32)>,
    pub children: Vec<ChildRef>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}

impl Node {
    fn encode(&self, params: &Params) -> Vec<i32> {
        let mut cells = Vec::with_capacity(params.node_record_len() as usize);
        cells.push(self.pos as i32);
        cells.push(self.keys.len() as i32);
        cells.push(self.children.len() as i32);
        for i in 0..params.max_keys() {
            if let Some(&(k, v)) = self.keys.get(i) {
                cells.push(k);
                cells.push(v);
            } else {
                cells.push(SENTINEL);
                cells.push(SENTINEL);
            }
        }
        for i in 0..params.max_children() {
            if let Some(c) = self.children.get(i) {
                cells.push(c.pos() as i32);
            } else {
                cells.push(SENTINEL);
            }
        }
        cells
    }

    fn decode(pos: i64, cells: &[i32], params: &Params) -> Result<Node, Error> {
        let stored_pos = cells[0] as i64;
        if stored_pos != pos {
            return Err(err!(
                Structure,
                "node record at {} claims pos {}",
                pos,
                stored_pos
            ));
        }
        let n_keys = cells[1];
        let n_children = cells[2];
        if n_keys < 0 || n_keys as usize > params.max_keys() {
            return Err(err!(
                Structure,
                "node at {} has invalid key count {}",
                pos,
                n_keys
            ));
        }
        if n_children < 0 || n_children as usize > params.max_children() {
            return Err(err!(
                Structure,
                "node at {} has invalid child count {}",
                pos,
                n_children
            ));
        }
        let n_keys = n_keys as usize;
        let n_children = n_children as usize;

        let mut keys = Vec::with_capacity(n_keys);
        for i in 0..n_keys {
            keys.push((cells[3 + 2 * i], cells[3 + 2 * i + 1]));
        }

        let children_start = 3 + 2 * params.max_keys();
        let mut children = Vec::with_capacity(n_children);
        for i in 0..n_children {
            children.push(ChildRef::Unloaded(cells[children_start + i] as i64));
        }

        Ok(Node { pos, keys, children })
    }
}

/// A persistent B-tree mapping 32-bit integer keys to 32-bit integer
/// values, backed by any [`RecordStore`].
pub struct Tree<S: RecordStore> {
    store: S,
    params: Params,
    /// The only long-lived cache: the root, materialized one level deep.
    root: Node,
}

impl<S: RecordStore> Tree<S> {
    /// Bootstraps or opens a tree over an existing store. An empty store is
    /// initialized with `order` and an empty root; a non-empty store's
    /// already-stored order wins over `order` (see module docs and
    /// `DESIGN.md`).
    pub fn bootstrap(mut store: S, order: i32) -> Result<Tree<S>, Error> {
        let params = if store.length() == 0 {
            if order <= 0 {
                return Err(err!(Structure, "order must be positive, got {}", order));
            }
            store.append(&[order])?;
            info!(order, "bootstrapped new tree");
            Params { order }
        } else {
            let stored_order = store.read(0)?;
            if stored_order <= 0 {
                return Err(err!(
                    Structure,
                    "stored order {} is invalid",
                    stored_order
                ));
            }
            if stored_order != order {
                debug!(
                    requested = order,
                    stored = stored_order,
                    "ignoring requested order in favor of the order already on disk"
                );
            }
            Params { order: stored_order }
        };

        let mut tree = Tree {
            store,
            params,
            root: Node {
                pos: 1,
                keys: vec![],
                children: vec![],
            },
        };
        tree.ensure_root()?;
        tree.reload_root()?;
        Ok(tree)
    }

    fn ensure_root(&mut self) -> Result<(), Error> {
        if self.store.length() <= 1 {
            let root = Node {
                pos: 1,
                keys: vec![],
                children: vec![],
            };
            self.allocate(&root)?;
        }
        Ok(())
    }

    /// Refreshes the cached root from disk, eagerly loading its immediate
    /// children (but no deeper) as the bootstrap path does.
    fn reload_root(&mut self) -> Result<(), Error> {
        if self.store.length() <= 1 {
            self.root = Node {
                pos: 1,
                keys: vec![],
                children: vec![],
            };
            return Ok(());
        }
        let mut root = self.load(1)?;
        for c in root.children.iter_mut() {
            let child = self.load(c.pos())?;
            *c = ChildRef::Loaded(Box::new(child));
        }
        self.root = root;
        Ok(())
    }

    fn load(&mut self, pos: i64) -> Result<Node, Error> {
        let cells = self.store.read_many(pos, self.params.node_record_len() as usize)?;
        Node::decode(pos, &cells, &self.params)
    }

    fn save(&mut self, node: &Node) -> Result<(), Error> {
        let cells = node.encode(&self.params);
        for (i, v) in cells.into_iter().enumerate() {
            self.store.write(node.pos + i as i64, v)?;
        }
        Ok(())
    }

    fn allocate(&mut self, node: &Node) -> Result<(), Error> {
        if node.pos != self.store.length() {
            return Err(err!(
                Structure,
                "allocate at {} but tail is at {}",
                node.pos,
                self.store.length()
            ));
        }
        let cells = node.encode(&self.params);
        self.store.append(&cells)
    }

    /// Frees the node at `pos`, compacting the file so that live node
    /// records always form a contiguous run starting at cell 1. If `pos` is
    /// the root, the file is truncated to the empty (domain-empty) state. If
    /// `pos` is already the tail node, the record is simply dropped.
    /// Otherwise the tail node is relocated into the freed slot and its
    /// parent's child pointer is patched to match, found by descending from
    /// the root using the tail node's smallest key.
    fn free(&mut self, pos: i64) -> Result<(), Error> {
        if pos == 1 {
            self.store.truncate((self.store.length() - 1) as usize)?;
            info!("freed the root; tree is now domain-empty");
            return Ok(());
        }

        let node_len = self.params.node_record_len();
        let tail_pos = self.store.length() - node_len;

        if tail_pos == pos {
            self.store.truncate(node_len as usize)?;
            trace!(pos, "freed tail node by truncation");
            return Ok(());
        }

        let tail = self.load(tail_pos)?;
        let key = tail
            .keys
            .first()
            .map(|&(k, _)| k)
            .ok_or_else(|| err!(Structure, "tail node at {} has no keys", tail_pos))?;

        let mut cursor = self.load(1)?;
        loop {
            if let Some(slot) = cursor.children.iter().position(|c| c.pos() == tail_pos) {
                cursor.children[slot] = ChildRef::Unloaded(pos);
                self.save(&cursor)?;
                break;
            }
            if cursor.children.is_empty() {
                return Err(err!(
                    Structure,
                    "could not locate the parent of tail node {}",
                    tail_pos
                ));
            }
            let i = match cursor.keys.binary_search_by_key(&key, |&(k, _)| k) {
                Ok(i) => i + 1,
                Err(i) => i,
            };
            let next = cursor.children[i].pos();
            cursor = self.load(next)?;
        }

        let mut relocated = tail;
        relocated.pos = pos;
        self.save(&relocated)?;
        self.store.truncate(node_len as usize)?;
        debug!(from = tail_pos, to = pos, "relocated tail node into freed slot");
        Ok(())
    }

    /// Looks up `key`, returning its value if present.
    pub fn search(&mut self, key: i32) -> Result<Option<i32>, Error> {
        let root = self.root.clone();
        self.search_in(&root, key)
    }

    fn search_in(&mut self, node: &Node, key: i32) -> Result<Option<i32>, Error> {
        match node.keys.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(i) => Ok(Some(node.keys[i].1)),
            Err(i) => {
                if node.children.is_empty() {
                    return Ok(None);
                }
                match &node.children[i] {
                    ChildRef::Loaded(child) => {
                        let child = (**child).clone();
                        self.search_in(&child, key)
                    }
                    ChildRef::Unloaded(pos) => {
                        let child = self.load(*pos)?;
                        self.search_in(&child, key)
                    }
                }
            }
        }
    }

    /// Inserts `key` with `value`. Rejects the reserved sentinel `-1` for
    /// either field, and rejects an already-present key rather than
    /// replicating the source implementation's accidental duplication.
    pub fn insert(&mut self, key: i32, value: i32) -> Result<(), Error> {
        if key == SENTINEL || value == SENTINEL {
            return Err(err!(Structure, "key/value {} is reserved", SENTINEL));
        }
        debug!(key, value, "inserting");

        let mut path: Vec<(Node, usize)> = Vec::new();
        let mut node = self.load(1)?;
        loop {
            match node.keys.binary_search_by_key(&key, |&(k, _)| k) {
                Ok(_) => return Err(err!(Structure, "duplicate key {}", key)),
                Err(i) => {
                    if node.children.is_empty() {
                        node.keys.insert(i, (key, value));
                        break;
                    }
                    let child_pos = node.children[i].pos();
                    path.push((node, i));
                    node = self.load(child_pos)?;
                }
            }
        }

        self.save(&node)?;
        self.rebalance_after_insert(node, path)?;
        self.reload_root()?;
        Ok(())
    }

    fn rebalance_after_insert(&mut self, mut node: Node, mut path: Vec<(Node, usize)>) -> Result<(), Error> {
        loop {
            if node.keys.len() <= self.params.max_keys() {
                // `node` may be a parent that just absorbed a separator from a
                // child split without overflowing itself; persist it before
                // returning or that separator/child only ever exists in memory.
                self.save(&node)?;
                return Ok(());
            }

            let m = node.keys.len() / 2;
            let sep = node.keys[m];
            let right_keys = node.keys.split_off(m + 1);
            node.keys.pop();
            let right_children = if node.children.is_empty() {
                vec![]
            } else {
                node.children.split_off(m + 1)
            };

            let r_pos = self.store.length();
            let right = Node {
                pos: r_pos,
                keys: right_keys,
                children: right_children,
            };
            self.allocate(&right)?;
            trace!(left = node.pos, right = r_pos, separator = sep.0, "split node");

            match path.pop() {
                None => {
                    self.save(&node)?;
                    let new_left_pos = self.store.length();
                    let mut left = node.clone();
                    left.pos = new_left_pos;
                    self.allocate(&left)?;

                    let new_root = Node {
                        pos: 1,
                        keys: vec![sep],
                        children: vec![ChildRef::Unloaded(left.pos), ChildRef::Unloaded(right.pos)],
                    };
                    self.save(&new_root)?;
                    info!(new_root = 1, "root split; tree height increased");
                    return Ok(());
                }
                Some((mut parent, idx)) => {
                    self.save(&node)?;
                    parent.keys.insert(idx, sep);
                    parent
                        .children
                        .insert(idx + 1, ChildRef::Unloaded(right.pos));
                    node = parent;
                }
            }
        }
    }

    /// Removes `key` if present; a no-op otherwise.
    pub fn delete(&mut self, key: i32) -> Result<(), Error> {
        if key == SENTINEL || self.store.length() <= 1 {
            return Ok(());
        }
        debug!(key, "deleting");

        let mut path: Vec<(Node, usize)> = Vec::new();
        let mut node = self.load(1)?;
        loop {
            match node.keys.binary_search_by_key(&key, |&(k, _)| k) {
                Ok(i) => {
                    if node.children.is_empty() {
                        node.keys.remove(i);
                        self.save(&node)?;
                        self.rebalance_after_delete(node, path)?;
                        self.reload_root()?;
                        return Ok(());
                    }

                    // Internal hit: replace with the true inorder successor
                    // (the leftmost key under children[i + 1]), not a shallow
                    // swap with that child's first key.
                    let mut spos = node.children[i + 1].pos();
                    let mut inner_path = Vec::new();
                    let mut snode = self.load(spos)?;
                    while !snode.children.is_empty() {
                        inner_path.push((snode.clone(), 0usize));
                        spos = snode.children[0].pos();
                        snode = self.load(spos)?;
                    }

                    let succ = snode.keys[0];
                    node.keys[i] = succ;
                    self.save(&node)?;
                    snode.keys.remove(0);
                    self.save(&snode)?;

                    path.push((node, i + 1));
                    path.extend(inner_path);
                    self.rebalance_after_delete(snode, path)?;
                    self.reload_root()?;
                    return Ok(());
                }
                Err(i) => {
                    if node.children.is_empty() {
                        return Ok(());
                    }
                    let child_pos = node.children[i].pos();
                    path.push((node, i));
                    node = self.load(child_pos)?;
                }
            }
        }
    }

    fn rebalance_after_delete(&mut self, mut node: Node, mut path: Vec<(Node, usize)>) -> Result<(), Error> {
        loop {
            match path.pop() {
                None => {
                    if node.keys.is_empty() && !node.children.is_empty() {
                        let only_child_pos = node.children[0].pos();
                        let mut child = self.load(only_child_pos)?;
                        child.pos = 1;
                        self.save(&child)?;
                        self.free(only_child_pos)?;
                        info!("root collapsed; tree height decreased");
                    } else {
                        self.save(&node)?;
                    }
                    return Ok(());
                }
                Some((mut parent, idx)) => {
                    if node.keys.len() >= self.params.min_keys() {
                        self.save(&node)?;
                        return Ok(());
                    }

                    let left_donates = idx > 0 && {
                        let left = self.load(parent.children[idx - 1].pos())?;
                        left.keys.len() > self.params.min_keys()
                    };
                    if left_donates {
                        self.rotate_right(&mut parent, &mut node, idx)?;
                        self.save(&node)?;
                        self.save(&parent)?;
                        return Ok(());
                    }

                    let right_donates = idx + 1 < parent.children.len() && {
                        let right = self.load(parent.children[idx + 1].pos())?;
                        right.keys.len() > self.params.min_keys()
                    };
                    if right_donates {
                        self.rotate_left(&mut parent, &mut node, idx)?;
                        self.save(&node)?;
                        self.save(&parent)?;
                        return Ok(());
                    }

                    self.merge(&mut parent, &mut node, idx)?;

                    // `free` (called by `merge` to discard the right sibling)
                    // may have relocated the file's tail node into the freed
                    // slot, patching that node's parent on disk. If the
                    // patched parent is `parent` itself or a still-pending
                    // ancestor in `path`, our in-memory copy is now stale;
                    // reload every node we still might save so a later
                    // `save` doesn't revert `free`'s patch with stale data.
                    node = self.load(parent.pos)?;
                    for (ancestor, _) in path.iter_mut() {
                        *ancestor = self.load(ancestor.pos)?;
                    }
                }
            }
        }
    }

    fn rotate_right(&mut self, parent: &mut Node, node: &mut Node, idx: usize) -> Result<(), Error> {
        let donor_pos = parent.children[idx - 1].pos();
        let mut donor = self.load(donor_pos)?;
        trace!(parent = parent.pos, idx, "rotating right");

        let sep = parent.keys[idx - 1];
        node.keys.insert(0, sep);
        // Caller only reaches here after confirming donor.keys.len() > min_keys >= 0.
        let donor_last_key = donor.keys.pop().expect("donor has spare keys");
        parent.keys[idx - 1] = donor_last_key;
        if !donor.children.is_empty() {
            let donor_last_child = donor.children.pop().expect("donor has children");
            node.children.insert(0, donor_last_child);
        }
        self.save(&donor)
    }

    fn rotate_left(&mut self, parent: &mut Node, node: &mut Node, idx: usize) -> Result<(), Error> {
        let donor_pos = parent.children[idx + 1].pos();
        let mut donor = self.load(donor_pos)?;
        trace!(parent = parent.pos, idx, "rotating left");

        let sep = parent.keys[idx];
        node.keys.push(sep);
        // Caller only reaches here after confirming donor.keys.len() > min_keys >= 0.
        let donor_first_key = donor.keys.remove(0);
        parent.keys[idx] = donor_first_key;
        if !donor.children.is_empty() {
            let donor_first_child = donor.children.remove(0);
            node.children.push(donor_first_child);
        }
        self.save(&donor)
    }

    /// Merges the underflowing child at `idx` with a sibling. The left
    /// sibling of the pair is always kept (per `DESIGN.md`); the right is
    /// freed via [`Tree::free`].
    fn merge(&mut self, parent: &mut Node, node: &mut Node, idx: usize) -> Result<(), Error> {
        let (a_idx, b_idx) = if idx > 0 { (idx - 1, idx) } else { (idx, idx + 1) };
        let a_pos = parent.children[a_idx].pos();
        let b_pos = parent.children[b_idx].pos();

        let mut a = if a_idx == idx { node.clone() } else { self.load(a_pos)? };
        let b = if a_idx == idx { self.load(b_pos)? } else { node.clone() };

        let sep = parent.keys[a_idx];
        warn!(left = a.pos, right = b.pos, "merging siblings after a failed rotation");

        a.keys.push(sep);
        a.keys.extend(b.keys.iter().copied());
        a.children.extend(b.children.iter().cloned());

        parent.keys.remove(a_idx);
        parent.children.remove(b_idx);

        self.save(&a)?;
        self.save(parent)?;
        self.free(b.pos)?;

        *node = a;
        Ok(())
    }

    /// Verifies every structural invariant (key ordering, fan-out, size
    /// bounds, dense packing) and returns `Ok(true)` if they all hold. The
    /// first violation encountered is returned as an `Error::Structure`.
    pub fn check(&mut self) -> Result<bool, Error> {
        let len = self.store.length();
        if len < 1 {
            return Err(err!(Structure, "file is missing the order cell"));
        }
        if len > 1 {
            let body = len - 1;
            if body % self.params.node_record_len() != 0 {
                return Err(err!(
                    Structure,
                    "file length {} cells is not 1 plus a multiple of the node record length {}",
                    len,
                    self.params.node_record_len()
                ));
            }
            let root = self.load(1)?;
            self.check_node(&root, true)?;
        }
        Ok(true)
    }

    fn check_node(&mut self, node: &Node, is_root: bool) -> Result<(), Error> {
        if is_root {
            if node.keys.len() > self.params.max_keys() {
                return Err(err!(
                    Structure,
                    "root at {} has {} keys, exceeding max {}",
                    node.pos,
                    node.keys.len(),
                    self.params.max_keys()
                ));
            }
        } else if node.keys.len() < self.params.min_keys() || node.keys.len() > self.params.max_keys() {
            return Err(err!(
                Structure,
                "node at {} has {} keys, outside [{}, {}]",
                node.pos,
                node.keys.len(),
                self.params.min_keys(),
                self.params.max_keys()
            ));
        }

        for w in node.keys.windows(2) {
            if w[0].0 >= w[1].0 {
                return Err(err!(Structure, "keys in node {} are not strictly ascending", node.pos));
            }
        }

        if node.children.is_empty() {
            return Ok(());
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(err!(
                Structure,
                "node {} has {} children but {} keys",
                node.pos,
                node.children.len(),
                node.keys.len()
            ));
        }

        for (i, child_ref) in node.children.iter().enumerate() {
            let child = self.load(child_ref.pos())?;
            if i < node.keys.len() {
                let bound = node.keys[i].0;
                if child.keys.iter().any(|&(k, _)| k >= bound) {
                    return Err(err!(
                        Structure,
                        "child {} holds a key >= parent separator {} at index {}",
                        child.pos,
                        bound,
                        i
                    ));
                }
            }
            if i > 0 {
                let bound = node.keys[i - 1].0;
                if child.keys.iter().any(|&(k, _)| k <= bound) {
                    return Err(err!(
                        Structure,
                        "child {} holds a key <= parent separator {} at index {}",
                        child.pos,
                        bound,
                        i - 1
                    ));
                }
            }
            self.check_node(&child, false)?;
        }
        Ok(())
    }

    /// Height of the tree: 1 for a single-node (root-only) tree, growing by
    /// one per split. Not part of the original distilled interface, but
    /// useful for exercising the height bound in tests.
    pub fn height(&mut self) -> Result<usize, Error> {
        if self.store.length() <= 1 {
            return Ok(0);
        }
        let mut depth = 1;
        let mut node = self.load(1)?;
        while !node.children.is_empty() {
            depth += 1;
            node = self.load(node.children[0].pos())?;
        }
        Ok(depth)
    }

    /// A human-readable level-order dump, for diagnostics only.
    pub fn display(&mut self) -> Result<String, Error> {
        let mut out = String::new();
        out.push_str(&format!("order: {}\n", self.params.order));
        if self.store.length() > 1 {
            let root = self.load(1)?;
            self.display_node(&root, 0, &mut out)?;
        } else {
            out.push_str("(empty)\n");
        }
        Ok(out)
    }

    fn display_node(&mut self, node: &Node, level: usize, out: &mut String) -> Result<(), Error> {
        let indent = "  ".repeat(level);
        out.push_str(&format!(
            "{}#{} keys={:?} children={:?}\n",
            indent,
            node.pos,
            node.keys,
            node.children.iter().map(|c| c.pos()).collect::<Vec<_>>()
        ));
        for child_ref in &node.children {
            let child = self.load(child_ref.pos())?;
            self.display_node(&child, level + 1, out)?;
        }
        Ok(())
    }
}

impl Tree<FileStore> {
    /// Opens (or creates) a tree backed by the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, order: i32) -> Result<Self, Error> {
        Tree::bootstrap(FileStore::open(path)?, order)
    }
}

impl Tree<MemStore> {
    /// A tree backed by an in-memory store, useful for tests and for
    /// embedding without a backing file.
    pub fn in_memory(order: i32) -> Result<Self, Error> {
        Tree::bootstrap(MemStore::new(), order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    #[test]
    fn insert_and_search_round_trip() {
        let mut tree = Tree::in_memory(2).unwrap();
        for i in 0..20 {
            tree.insert(i, i * 10).unwrap();
        }
        for i in 0..20 {
            assert_eq!(tree.search(i).unwrap(), Some(i * 10));
        }
        assert_eq!(tree.search(999).unwrap(), None);
        tree.check().unwrap();
    }

    #[test]
    fn split_persists_a_parent_that_absorbs_a_separator_without_overflowing() {
        // order=2: inserting 0..8 ascending splits a leaf whose separator
        // lands in a parent that does not itself overflow. That parent must
        // still be persisted, or the separator and its new right child exist
        // only in memory and are lost once the root is reloaded from disk.
        let mut tree = Tree::in_memory(2).unwrap();
        for i in 0..8 {
            tree.insert(i, i * 10).unwrap();
        }
        tree.check().unwrap();
        for i in 0..8 {
            assert_eq!(tree.search(i).unwrap(), Some(i * 10));
        }
    }

    #[test]
    fn ascending_inserts_grow_height_via_root_splits() {
        let mut tree = Tree::in_memory(2).unwrap();
        let mut heights = Vec::new();
        for i in 0..20 {
            tree.insert(i, i).unwrap();
            heights.push(tree.height().unwrap());
        }
        tree.check().unwrap();
        // Height only ever increases, and does so exactly on a root split.
        let mut last = 0;
        let mut increases = 0;
        for h in heights {
            assert!(h >= last);
            if h > last {
                increases += 1;
            }
            last = h;
        }
        assert_eq!(increases, 3);
    }

    #[test]
    fn rejects_sentinel_key_and_value() {
        let mut tree = Tree::in_memory(2).unwrap();
        assert!(tree.insert(SENTINEL, 1).is_err());
        assert!(tree.insert(1, SENTINEL).is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut tree = Tree::in_memory(2).unwrap();
        tree.insert(5, 50).unwrap();
        assert!(tree.insert(5, 99).is_err());
        assert_eq!(tree.search(5).unwrap(), Some(50));
    }

    #[test]
    fn delete_then_reinsert_and_full_drain() {
        let mut tree = Tree::in_memory(2).unwrap();
        for i in 0..100 {
            tree.insert(i, i).unwrap();
        }
        for i in 0..50 {
            tree.delete(i).unwrap();
            tree.check().unwrap();
        }
        for i in 0..50 {
            assert_eq!(tree.search(i).unwrap(), None);
        }
        for i in 50..100 {
            assert_eq!(tree.search(i).unwrap(), Some(i));
        }
        for i in 50..100 {
            tree.delete(i).unwrap();
            tree.check().unwrap();
        }
        for i in 0..100 {
            assert_eq!(tree.search(i).unwrap(), None);
        }
    }

    #[test]
    fn merge_survives_tail_relocation_of_a_pending_ancestor() {
        // order=2, enough keys for height >= 3 so a leaf-level merge's
        // underflow propagates through at least one ancestor still waiting
        // on `path`. If `free`'s tail relocation patches that ancestor (or
        // the immediate parent) on disk and the stale in-memory copy is
        // saved afterward, the relocation patch is reverted and a child
        // pointer is left dangling; `check()`/`search` would then fail with
        // an out-of-range read.
        let mut tree = Tree::in_memory(2).unwrap();
        for i in 0..200 {
            tree.insert(i, i).unwrap();
        }
        tree.check().unwrap();
        assert!(tree.height().unwrap() >= 3);

        // Delete from both ends so merges happen on both the leftmost and
        // rightmost spines while the file's tail keeps moving around.
        for i in 0..100 {
            let lo = i;
            let hi = 199 - i;
            tree.delete(lo).unwrap();
            tree.check().unwrap();
            tree.delete(hi).unwrap();
            tree.check().unwrap();
        }
        for i in 0..200 {
            assert_eq!(tree.search(i).unwrap(), None);
        }
    }

    #[test]
    fn delete_of_missing_key_is_a_silent_noop() {
        let mut tree = Tree::in_memory(2).unwrap();
        tree.insert(1, 1).unwrap();
        tree.delete(42).unwrap();
        assert_eq!(tree.search(1).unwrap(), Some(1));
    }

    #[test]
    fn delete_on_empty_tree_is_a_noop() {
        let mut tree = Tree::in_memory(2).unwrap();
        tree.delete(1).unwrap();
        assert_eq!(tree.search(1).unwrap(), None);
    }

    #[test]
    fn reopening_a_populated_file_ignores_the_requested_order() {
        let file = NamedTempFile::new().unwrap();
        {
            let mut tree = Tree::open(file.path(), 60).unwrap();
            for i in 0..30 {
                tree.insert(i, i).unwrap();
            }
            tree.check().unwrap();
        }
        let mut reopened = Tree::open(file.path(), 5).unwrap();
        for i in 0..30 {
            assert_eq!(reopened.search(i).unwrap(), Some(i));
        }
        reopened.insert(30, 30).unwrap();
        reopened.check().unwrap();
    }

    #[test]
    fn internal_delete_uses_the_true_inorder_successor() {
        // order=2: force an internal node and delete its separator key so the
        // true leftmost-leaf successor (not a shallow one-level swap) must be
        // used to keep ordering intact.
        let mut tree = Tree::in_memory(2).unwrap();
        for i in [10, 20, 30, 40, 50, 60, 70, 5, 15, 25] {
            tree.insert(i, i).unwrap();
        }
        tree.check().unwrap();
        tree.delete(30).unwrap();
        tree.check().unwrap();
        assert_eq!(tree.search(30).unwrap(), None);
        for i in [10, 20, 40, 50, 60, 70, 5, 15, 25] {
            assert_eq!(tree.search(i).unwrap(), Some(i));
        }
    }

    struct Xorshift32(u32);

    impl Xorshift32 {
        fn new(seed: u32) -> Self {
            Xorshift32(seed)
        }

        fn next_u32(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }

        fn next_key(&mut self, bound: i32) -> i32 {
            (self.next_u32() % bound as u32) as i32
        }
    }

    #[test]
    fn random_mixed_operations_match_a_btreemap_oracle() {
        let mut tree = Tree::in_memory(3).unwrap();
        let mut oracle: BTreeMap<i32, i32> = BTreeMap::new();
        let mut rng = Xorshift32::new(0xC0FFEE);

        for step in 0..2000 {
            let key = rng.next_key(500);
            let insert = rng.next_u32() % 3 != 0;

            if insert {
                let value = rng.next_key(1_000_000);
                let result = tree.insert(key, value);
                if oracle.contains_key(&key) {
                    assert!(result.is_err());
                } else {
                    result.unwrap();
                    oracle.insert(key, value);
                }
            } else {
                tree.delete(key).unwrap();
                oracle.remove(&key);
            }

            if step % 50 == 0 {
                tree.check().unwrap();
            }
        }

        tree.check().unwrap();
        for (k, v) in &oracle {
            assert_eq!(tree.search(*k).unwrap(), Some(*v));
        }
    }
}
