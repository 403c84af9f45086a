use crate::boundingbox::BoundingBox;
use crate::errors::Result;
use crate::nodestore::NodeStore;
use crate::pointstore::PointStore;

/// The walker state a visitor observes during one root-leaf-root traversal.
///
/// The view descends by cuts, captures the leaf, and on the way back up
/// maintains whatever the visitor asked for: always the probability that a
/// random cut of the current subtree's box separates the query, optionally
/// the box itself (directional visitors), and optionally a shadow box that
/// excludes the leaf (ignore-mass scoring).
///
/// When the node store caches few boxes the view grows its own box along
/// the path regardless, turning per-node recomputation into one merge per
/// level.
pub struct PathView {
    current: usize,
    depth: usize,
    mass: usize,
    leaf_handle: usize,
    leaf_point: Vec<f32>,
    leaf_duplicate: bool,
    leaf_sequences: Option<Vec<i64>>,
    probability_of_cut: f64,
    shadow_probability_of_cut: f64,
    maintain_box: bool,
    use_shadow_box: bool,
    current_box: Option<BoundingBox>,
    shadow_box: Option<BoundingBox>,
}

impl PathView {
    pub fn new(root: usize, maintain_box: bool, node_store: &NodeStore) -> Self {
        PathView {
            current: root,
            depth: 0,
            mass: node_store.mass(root),
            leaf_handle: usize::MAX,
            leaf_point: Vec::new(),
            leaf_duplicate: false,
            leaf_sequences: None,
            probability_of_cut: f64::MAX,
            shadow_probability_of_cut: f64::MAX,
            maintain_box,
            use_shadow_box: false,
            current_box: None,
            shadow_box: None,
        }
    }

    pub fn current_node(&self) -> usize {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn leaf_handle(&self) -> usize {
        self.leaf_handle
    }

    pub fn leaf_point(&self) -> &[f32] {
        &self.leaf_point
    }

    pub fn is_duplicate(&self) -> bool {
        self.leaf_duplicate
    }

    pub fn leaf_sequences(&self) -> Option<&[i64]> {
        self.leaf_sequences.as_deref()
    }

    pub fn probability_of_cut(&self) -> f64 {
        self.probability_of_cut
    }

    pub fn shadow_probability_of_cut(&self) -> f64 {
        self.shadow_probability_of_cut
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.current_box.as_ref()
    }

    pub fn shadow_box(&self) -> Option<&BoundingBox> {
        self.shadow_box.as_ref()
    }

    /// Steps to the child of the current node the cuts route `point` to.
    pub fn descend(&mut self, point: &[f32], node_store: &NodeStore) {
        self.current = if node_store.is_left_of(self.current, point) {
            node_store.left(self.current)
        } else {
            node_store.right(self.current)
        };
        self.depth += 1;
    }

    /// Jumps to an explicit child during a branching traversal.
    pub fn enter(&mut self, node: usize) {
        self.current = node;
        self.depth += 1;
    }

    /// Restores walker position between the branches of a fork.
    pub fn restore(&mut self, node: usize, depth: usize) {
        self.current = node;
        self.depth = depth;
    }

    /// Hands the box accumulated by a finished branch to the caller.
    pub fn take_box(&mut self) -> Option<BoundingBox> {
        self.current_box.take()
    }

    pub fn update_at_leaf(
        &mut self,
        point: &[f32],
        node: usize,
        node_store: &NodeStore,
        point_store: &PointStore,
    ) -> Result<()> {
        self.leaf_handle = node_store.leaf_handle(node);
        self.leaf_point = point_store.copy(self.leaf_handle)?;
        self.leaf_sequences = node_store.leaf_sequences(self.leaf_handle);
        self.mass = node_store.mass(node);
        self.leaf_duplicate = self.leaf_point == point;
        self.probability_of_cut = if self.leaf_duplicate { 0.0 } else { 1.0 };
        if self.maintain_box || node_store.use_path_for_box() {
            self.current_box = Some(BoundingBox::from_point(&self.leaf_point));
        }
        Ok(())
    }

    /// Requested by a visitor that must score as if the leaf were absent;
    /// from here on the ascent also maintains a box excluding the leaf.
    pub fn enable_shadow_box(
        &mut self,
        node_store: &NodeStore,
        point_store: &PointStore,
    ) -> Result<()> {
        self.use_shadow_box = true;
        if self.current_box.is_none() {
            self.current_box = Some(node_store.bounding_box(self.current, point_store)?);
        }
        Ok(())
    }

    /// Moves the view from the current node to `parent`, folding in the
    /// sibling subtree and refreshing the separation probability.
    pub fn ascend(
        &mut self,
        point: &[f32],
        parent: usize,
        node_store: &NodeStore,
        point_store: &PointStore,
    ) -> Result<()> {
        let sibling = node_store.sibling_of(self.current, parent);
        let use_shadow_box = self.use_shadow_box;
        self.probability_of_cut = match self.current_box.as_mut() {
            Some(current_box) => {
                if use_shadow_box {
                    let sibling_box = node_store.bounding_box(sibling, point_store)?;
                    current_box.add_box(&sibling_box);
                    let shadow = match self.shadow_box.take() {
                        Some(mut shadow) => {
                            shadow.add_box(&sibling_box);
                            shadow
                        }
                        None => sibling_box,
                    };
                    self.shadow_probability_of_cut = shadow.probability_of_cut(point);
                    self.shadow_box = Some(shadow);
                } else {
                    node_store.grow_node_box(current_box, point_store, sibling)?;
                }
                current_box.probability_of_cut(point)
            }
            None => node_store.probability_of_cut(parent, point, point_store)?,
        };
        self.current = parent;
        self.mass = node_store.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    /// Ascent step of a branching traversal: the separation probability
    /// ignores missing coordinates, and the box (when maintained) grows by
    /// the sibling that was not forked into.
    pub fn ascend_with_missing(
        &mut self,
        point: &[f32],
        missing: &[bool],
        parent: usize,
        node_store: &NodeStore,
        point_store: &PointStore,
    ) -> Result<()> {
        self.probability_of_cut = match self.current_box.as_mut() {
            Some(current_box) => {
                let sibling = node_store.sibling_of(self.current, parent);
                node_store.grow_node_box(current_box, point_store, sibling)?;
                current_box.probability_of_cut_with_missing(point, missing)
            }
            None => {
                node_store.probability_of_cut_with_missing(parent, point, missing, point_store)?
            }
        };
        self.current = parent;
        self.mass = node_store.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    /// Joins the boxes of the two branches of a fork at `parent` and
    /// refreshes the missing-aware separation probability.
    pub fn merge_fork(
        &mut self,
        point: &[f32],
        missing: &[bool],
        parent: usize,
        other_branch_box: Option<BoundingBox>,
        node_store: &NodeStore,
        point_store: &PointStore,
    ) -> Result<()> {
        self.probability_of_cut = match (self.current_box.as_mut(), other_branch_box) {
            (Some(current_box), Some(other)) => {
                current_box.add_box(&other);
                current_box.probability_of_cut_with_missing(point, missing)
            }
            _ => node_store.probability_of_cut_with_missing(parent, point, missing, point_store)?,
        };
        self.current = parent;
        self.mass = node_store.mass(parent);
        self.depth -= 1;
        Ok(())
    }
}
