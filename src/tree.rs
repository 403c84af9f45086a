use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::cut::Cut;
use crate::errors::{check_argument, check_state, ForestError, Result};
use crate::nodestore::NodeStore;
use crate::nodeview::PathView;
use crate::pointstore::PointStore;
use crate::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// An incremental random cut tree over point-store handles.
///
/// Insertion follows the classic streaming construction: walk the cut path
/// down to the leaf the point would land at, then ascend growing a candidate
/// box one sibling at a time, sampling one random cut per level; the first
/// sampled cut that separates the point from the subtree below it is
/// installed there. Deletion splices the leaf's sibling into its
/// grandparent. Duplicate points never create a second leaf; they raise the
/// existing leaf's mass.
pub struct RandomCutTree {
    dimensions: usize,
    node_store: NodeStore,
    root: usize,
    tree_mass: usize,
    rng: ChaCha20Rng,
}

impl RandomCutTree {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
    ) -> Result<Self> {
        let node_store = NodeStore::new(
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            store_sequence_indexes,
            center_of_mass,
        )?;
        let root = node_store.null_node();
        Ok(RandomCutTree {
            dimensions,
            node_store,
            root,
            tree_mass: 0,
            rng: ChaCha20Rng::seed_from_u64(random_seed),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root == self.node_store.null_node()
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    /// Center of mass of the whole tree, when the feature is enabled and
    /// the root is internal.
    pub fn center_of_mass(&self) -> Option<Vec<f32>> {
        if self.is_empty() || self.node_store.is_leaf(self.root) {
            return None;
        }
        self.node_store.center_of_mass(self.root)
    }

    pub fn set_bounding_box_cache_fraction(
        &mut self,
        fraction: f64,
        point_store: &PointStore,
    ) -> Result<()> {
        self.node_store.set_cache_fraction(fraction, point_store)
    }

    /// Inserts the point behind `handle`. Returns the handle the tree
    /// actually references, which is the existing leaf's handle when the
    /// point duplicates one already present.
    pub fn add(
        &mut self,
        handle: usize,
        sequence_index: i64,
        point_store: &PointStore,
    ) -> Result<usize> {
        if self.is_empty() {
            self.root = self.node_store.leaf_node(handle);
            self.tree_mass = 1;
            self.node_store.append_leaf_sequence(handle, sequence_index);
            return Ok(handle);
        }

        let point = point_store.copy(handle)?;
        let mut path = Vec::new();
        self.node_store.set_path(&mut path, self.root, &point);
        let (leaf, mut sibling) = path.pop().expect("path cannot be empty");
        let leaf_handle = self.node_store.leaf_handle(leaf);

        self.tree_mass += 1;
        if point_store.is_equal(&point, leaf_handle)? {
            self.node_store.increase_leaf_mass(leaf);
            self.node_store
                .append_leaf_sequence(leaf_handle, sequence_index);
            self.node_store.ancestors_after_add(&mut path, &point, true);
            return Ok(leaf_handle);
        }

        // ascend from the leaf, sampling one cut per level against the box
        // of the subtree walked so far; remember the lowest separating cut
        let mut node = leaf;
        let mut parent = path.last().map(|&(n, _)| n);
        let mut current_box = self.node_store.bounding_box(leaf, point_store)?;
        let mut saved_box = current_box.clone();
        let mut saved_node = node;
        let mut saved_parent = parent;
        let mut saved_cut = Cut::placeholder();
        let mut rejected_above: Vec<(usize, usize)> = Vec::new();

        loop {
            let factor: f64 = self.rng.gen();
            let (cut, separates) = Cut::random_cut_and_separation(&current_box, factor, &point);
            if separates {
                saved_cut = cut;
                saved_parent = parent;
                saved_node = node;
                saved_box = current_box.clone();
                rejected_above.clear();
            } else {
                rejected_above.push((node, sibling));
            }
            check_state(!saved_cut.is_placeholder(), "no separating cut found")?;

            match parent {
                None => break,
                Some(p) => {
                    self.node_store
                        .grow_node_box(&mut current_box, point_store, sibling)?;
                    let (n, s) = path.pop().expect("parent must be on the path");
                    debug_assert!(n == p);
                    node = n;
                    sibling = s;
                    parent = path.last().map(|&(x, _)| x);
                }
            }
        }

        // path now ends at saved_parent; nodes between it and saved_node
        // go back so the mass walk sees every ancestor of the new node
        if let Some(p) = saved_parent {
            while let Some(entry) = rejected_above.pop() {
                path.push(entry);
            }
            check_state(
                path.last().map(|&(n, _)| n) == Some(p),
                "insertion path out of sync",
            )?;
        } else {
            check_state(path.is_empty(), "insertion path out of sync")?;
        }

        let merged = self.node_store.add_node(
            saved_parent.unwrap_or(self.node_store.null_node()),
            &point,
            saved_node,
            handle,
            saved_cut,
            &saved_box,
            point_store,
        )?;
        self.node_store.append_leaf_sequence(handle, sequence_index);
        if saved_parent.is_some() {
            self.node_store
                .ancestors_after_add(&mut path, &point, false);
        } else {
            self.root = merged;
        }
        Ok(handle)
    }

    /// Removes one insertion of the point behind `handle`; the leaf itself
    /// goes away when its mass reaches zero. Returns the handle the tree
    /// had referenced.
    pub fn delete(
        &mut self,
        handle: usize,
        sequence_index: i64,
        point_store: &PointStore,
    ) -> Result<usize> {
        check_argument(!self.is_empty(), "deleting from an empty tree")?;
        let point = point_store.copy(handle)?;
        let mut path = Vec::new();
        self.node_store.set_path(&mut path, self.root, &point);
        let (leaf, leaf_sibling) = path.pop().expect("path cannot be empty");
        let leaf_handle = self.node_store.leaf_handle(leaf);

        if leaf_handle != handle && !point_store.is_equal(&point, leaf_handle)? {
            return Err(ForestError::InvalidInput {
                msg: "point is not present in the tree",
            });
        }

        self.tree_mass -= 1;
        self.node_store
            .remove_leaf_sequence(leaf_handle, sequence_index);

        if self.node_store.decrease_leaf_mass(leaf) == 0 {
            match path.pop() {
                None => {
                    self.root = self.node_store.null_node();
                }
                Some((parent, _)) => {
                    match path.last().map(|&(n, _)| n) {
                        None => {
                            self.root = leaf_sibling;
                        }
                        Some(grandparent) => {
                            self.node_store
                                .replace_child(grandparent, parent, leaf_sibling);
                            self.node_store.ancestors_after_delete(
                                &mut path,
                                &point,
                                point_store,
                                false,
                            )?;
                        }
                    }
                    self.node_store.release_node(parent)?;
                }
            }
        } else {
            self.node_store
                .ancestors_after_delete(&mut path, &point, point_store, true)?;
        }
        Ok(leaf_handle)
    }

    /// Runs a visitor down to the leaf for `point` and back up; an empty
    /// tree yields `default`.
    pub fn traverse<R, V, F>(
        &self,
        point: &[f32],
        info: &VisitorInfo,
        make_visitor: F,
        default: &R,
        point_store: &PointStore,
    ) -> Result<R>
    where
        V: Visitor<R>,
        F: FnOnce(usize) -> V,
        R: Clone,
    {
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = make_visitor(self.tree_mass);
        let mut view = PathView::new(self.root, visitor.needs_box(), &self.node_store);
        self.traverse_recursive(point, &mut view, &mut visitor, info, point_store)?;
        visitor.result(info)
    }

    fn traverse_recursive<R, V: Visitor<R>>(
        &self,
        point: &[f32],
        view: &mut PathView,
        visitor: &mut V,
        info: &VisitorInfo,
        point_store: &PointStore,
    ) -> Result<()> {
        let node = view.current_node();
        if self.node_store.is_leaf(node) {
            view.update_at_leaf(point, node, &self.node_store, point_store)?;
            visitor.accept_leaf(point, info, view)?;
            if visitor.use_shadow_box() {
                view.enable_shadow_box(&self.node_store, point_store)?;
            }
        } else {
            view.descend(point, &self.node_store);
            self.traverse_recursive(point, view, visitor, info, point_store)?;
            if !visitor.is_converged() {
                view.ascend(point, node, &self.node_store, point_store)?;
                visitor.accept(point, info, view)?;
            }
        }
        Ok(())
    }

    /// Branching traversal for queries with missing coordinates: descends
    /// both children wherever the cut falls on a missing dimension, letting
    /// the visitor reconcile the branches.
    pub fn traverse_multi<R, V, F>(
        &self,
        point: &[f32],
        missing: &[bool],
        info: &VisitorInfo,
        make_visitor: F,
        default: &R,
        point_store: &PointStore,
    ) -> Result<R>
    where
        V: MultiVisitor<R>,
        F: FnOnce(usize) -> V,
        R: Clone,
    {
        check_argument(missing.len() == self.dimensions, "wrong mask length")?;
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = make_visitor(self.tree_mass);
        let mut view = PathView::new(self.root, visitor.needs_box(), &self.node_store);
        self.traverse_multi_recursive(point, missing, &mut view, &mut visitor, info, point_store)?;
        visitor.result(info)
    }

    fn traverse_multi_recursive<R, V: MultiVisitor<R>>(
        &self,
        point: &[f32],
        missing: &[bool],
        view: &mut PathView,
        visitor: &mut V,
        info: &VisitorInfo,
        point_store: &PointStore,
    ) -> Result<()> {
        let node = view.current_node();
        if self.node_store.is_leaf(node) {
            view.update_at_leaf(point, node, &self.node_store, point_store)?;
            visitor.accept_leaf(point, info, view)?;
            return Ok(());
        }
        if missing[self.node_store.cut_dimension(node)] {
            let depth = view.depth();
            let left = self.node_store.left(node);
            let right = self.node_store.right(node);
            view.enter(left);
            self.traverse_multi_recursive(point, missing, view, visitor, info, point_store)?;
            let first_branch_box = view.take_box();
            view.restore(right, depth + 1);
            self.traverse_multi_recursive(point, missing, view, visitor, info, point_store)?;
            visitor.combine_branches(point, info, view)?;
            if !visitor.is_converged() {
                view.merge_fork(
                    point,
                    missing,
                    node,
                    first_branch_box,
                    &self.node_store,
                    point_store,
                )?;
            }
        } else {
            view.descend(point, &self.node_store);
            self.traverse_multi_recursive(point, missing, view, visitor, info, point_store)?;
            if !visitor.is_converged() {
                view.ascend_with_missing(point, missing, node, &self.node_store, point_store)?;
            }
        }
        if !visitor.is_converged() {
            visitor.accept(point, info, view)?;
        }
        Ok(())
    }

    pub fn size_in_bytes(&self) -> usize {
        self.node_store.size_in_bytes() + std::mem::size_of::<RandomCutTree>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundingbox::BoundingBox;

    fn store_with(points: &[Vec<f32>]) -> (PointStore, Vec<usize>) {
        let mut store = PointStore::new(points[0].len(), 1, 1024, 64, false, false);
        let handles = points
            .iter()
            .map(|p| store.intern(p).unwrap().unwrap())
            .collect();
        (store, handles)
    }

    fn audit_masses(tree: &RandomCutTree, node: usize) -> usize {
        let nodes = &tree.node_store;
        if nodes.is_leaf(node) {
            return nodes.mass(node);
        }
        let total = audit_masses(tree, nodes.left(node)) + audit_masses(tree, nodes.right(node));
        assert_eq!(total, nodes.mass(node), "subtree mass out of sync");
        total
    }

    fn audit_boxes(tree: &RandomCutTree, store: &PointStore, node: usize) -> BoundingBox {
        let nodes = &tree.node_store;
        if nodes.is_leaf(node) {
            let point = store.copy(nodes.leaf_handle(node)).unwrap();
            return BoundingBox::from_point(&point);
        }
        let mut expected = audit_boxes(tree, store, nodes.left(node));
        expected.add_box(&audit_boxes(tree, store, nodes.right(node)));
        let cached = nodes.bounding_box(node, store).unwrap();
        assert_eq!(cached.min_values(), expected.min_values());
        assert_eq!(cached.max_values(), expected.max_values());
        expected
    }

    #[test]
    fn masses_and_boxes_stay_consistent_under_churn() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut points = Vec::new();
        for _ in 0..200 {
            points.push(vec![rng.gen::<f32>() * 10.0, rng.gen::<f32>() * 10.0]);
        }
        let (mut store, handles) = store_with(&points);
        let mut tree = RandomCutTree::new(2, 256, 1.0, false, false, 9).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            tree.add(h, i as i64, &store).unwrap();
        }
        assert_eq!(tree.mass(), 200);
        audit_masses(&tree, tree.root);
        audit_boxes(&tree, &store, tree.root);

        for (i, &h) in handles.iter().enumerate().take(100) {
            tree.delete(h, i as i64, &store).unwrap();
            store.release(h).unwrap();
        }
        assert_eq!(tree.mass(), 100);
        audit_masses(&tree, tree.root);
        audit_boxes(&tree, &store, tree.root);
    }

    #[test]
    fn duplicates_share_a_leaf() {
        let (store, handles) = store_with(&[
            vec![1.0, 1.0],
            vec![2.0, 2.0],
            vec![1.0, 1.0],
            vec![1.0, 1.0],
        ]);
        // dedup interned equal points to one handle
        assert_eq!(handles[0], handles[2]);
        let mut tree = RandomCutTree::new(2, 16, 1.0, false, false, 5).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            let referenced = tree.add(h, i as i64, &store).unwrap();
            assert_eq!(referenced, h);
        }
        assert_eq!(tree.mass(), 4);
        // three insertions of (1,1) live in one leaf of mass 3
        let leaf = tree.node_store.leaf_node(handles[0]);
        assert_eq!(tree.node_store.mass(leaf), 3);
    }

    #[test]
    fn delete_reverses_add_down_to_empty() {
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let points: Vec<Vec<f32>> = (0..50)
            .map(|_| vec![rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()])
            .collect();
        let (store, handles) = store_with(&points);
        let mut tree = RandomCutTree::new(3, 64, 1.0, false, false, 3).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            tree.add(h, i as i64, &store).unwrap();
        }
        for (i, &h) in handles.iter().enumerate() {
            tree.delete(h, i as i64, &store).unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.mass(), 0);
    }

    #[test]
    fn deleting_an_absent_point_is_an_error() {
        let (store, handles) = store_with(&[vec![0.0], vec![5.0], vec![9.0]]);
        let mut tree = RandomCutTree::new(1, 16, 1.0, false, false, 1).unwrap();
        tree.add(handles[0], 0, &store).unwrap();
        tree.add(handles[1], 1, &store).unwrap();
        assert!(matches!(
            tree.delete(handles[2], 2, &store),
            Err(ForestError::InvalidInput { .. })
        ));
    }

    #[test]
    fn uncached_boxes_match_cached_traversals() {
        use crate::visitor::score::ScoreVisitor;
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let points: Vec<Vec<f32>> = (0..128)
            .map(|_| vec![rng.gen::<f32>() * 4.0, rng.gen::<f32>() * 4.0])
            .collect();
        let (store, handles) = store_with(&points);
        let mut cached = RandomCutTree::new(2, 256, 1.0, false, false, 77).unwrap();
        let mut bare = RandomCutTree::new(2, 256, 0.0, false, false, 77).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            cached.add(h, i as i64, &store).unwrap();
            bare.add(h, i as i64, &store).unwrap();
        }
        let info = VisitorInfo::default();
        for query in [[0.5f32, 0.5], [8.0, 8.0], [-3.0, 2.0]] {
            let a: f64 = cached
                .traverse(&query, &info, |m| ScoreVisitor::new(m, &info), &0.0, &store)
                .unwrap();
            let b: f64 = bare
                .traverse(&query, &info, |m| ScoreVisitor::new(m, &info), &0.0, &store)
                .unwrap();
            assert!((a - b).abs() < 1e-10);
        }
    }
}
