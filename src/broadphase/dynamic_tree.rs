//! Dynamic AABB tree.
//!
//! A self-balancing binary tree of fat AABBs. Leaves are proxies carrying
//! user data; internal nodes enclose their two children. Insertion descends
//! by surface-area cost, and every insert/remove walks back to the root
//! applying AVL-style rotations so sibling heights never differ by more
//! than one.

use glam::Vec3;

use crate::collider::Aabb;

/// Null node sentinel.
pub const NULL_NODE: u32 = u32::MAX;

const QUERY_STACK_SIZE: usize = 256;

/// Traversal stack that only touches the heap once it outgrows
/// [`QUERY_STACK_SIZE`] entries.
struct GrowableStack {
    inline: [u32; QUERY_STACK_SIZE],
    len: usize,
    spill: Vec<u32>,
}

impl GrowableStack {
    fn new() -> Self {
        Self {
            inline: [NULL_NODE; QUERY_STACK_SIZE],
            len: 0,
            spill: Vec::new(),
        }
    }

    fn push(&mut self, node: u32) {
        if self.len < QUERY_STACK_SIZE {
            self.inline[self.len] = node;
            self.len += 1;
        } else {
            self.spill.push(node);
        }
    }

    fn pop(&mut self) -> Option<u32> {
        if let Some(node) = self.spill.pop() {
            return Some(node);
        }
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.inline[self.len])
    }
}

#[derive(Debug, Clone)]
struct TreeNode<T> {
    /// Fat AABB.
    aabb: Aabb,
    user_data: Option<T>,
    parent: u32,
    child1: u32,
    child2: u32,
    /// 0 for leaves, -1 for free nodes.
    height: i32,
}

impl<T> TreeNode<T> {
    fn free() -> Self {
        Self {
            aabb: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            user_data: None,
            parent: NULL_NODE,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: -1,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// Dynamic AABB tree keyed by proxy id.
#[derive(Debug, Clone)]
pub struct DynamicTree<T> {
    nodes: Vec<TreeNode<T>>,
    free_list: Vec<u32>,
    root: u32,
    proxy_count: usize,
    /// Fat AABB margin on every side.
    margin: f32,
    /// Scale applied to the displacement when predicting motion.
    multiplier: f32,
}

impl<T: Copy> Default for DynamicTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> DynamicTree<T> {
    pub fn new() -> Self {
        Self::with_margin(0.1, 2.0)
    }

    pub fn with_margin(margin: f32, multiplier: f32) -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: NULL_NODE,
            proxy_count: 0,
            margin,
            multiplier,
        }
    }

    /// Insert a proxy for `aabb`; the stored AABB is fattened by the margin.
    pub fn create_proxy(&mut self, aabb: &Aabb, user_data: T) -> u32 {
        let id = self.alloc_node();
        let node = &mut self.nodes[id as usize];
        node.aabb = aabb.fatten(self.margin);
        node.user_data = Some(user_data);
        node.height = 0;
        self.insert_leaf(id);
        self.proxy_count += 1;
        id
    }

    /// Remove a proxy. Unknown or already freed ids are ignored.
    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        if !self.is_proxy(proxy_id) {
            return;
        }
        self.remove_leaf(proxy_id);
        self.free_node(proxy_id);
        self.proxy_count -= 1;
    }

    /// Move a proxy to a new tight `aabb`.
    ///
    /// Returns false and leaves the tree untouched while `aabb` still fits
    /// inside the current fat AABB. Otherwise the proxy is re-inserted with an
    /// AABB fattened by the margin and extended along `displacement`.
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: &Aabb, displacement: Vec3) -> bool {
        if !self.is_proxy(proxy_id) {
            return false;
        }
        if self.nodes[proxy_id as usize].aabb.contains(aabb) {
            return false;
        }

        self.remove_leaf(proxy_id);
        self.nodes[proxy_id as usize].aabb = aabb
            .fatten(self.margin)
            .extend_along(displacement * self.multiplier);
        self.insert_leaf(proxy_id);
        true
    }

    #[inline]
    pub fn user_data(&self, proxy_id: u32) -> Option<T> {
        self.nodes.get(proxy_id as usize).and_then(|n| n.user_data)
    }

    #[inline]
    pub fn fat_aabb(&self, proxy_id: u32) -> Option<Aabb> {
        self.is_proxy(proxy_id)
            .then(|| self.nodes[proxy_id as usize].aabb)
    }

    /// Visit every proxy whose fat AABB overlaps `aabb`. The callback returns
    /// false to stop the query early.
    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        if self.root == NULL_NODE {
            return;
        }

        let mut stack = GrowableStack::new();
        stack.push(self.root);

        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[node_id as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }

            if node.is_leaf() {
                if !callback(node_id) {
                    return;
                }
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Number of live proxies.
    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.proxy_count
    }

    /// Total node count (including internal).
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Tree height (0 for a single leaf or an empty tree).
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Largest height difference between two siblings.
    pub fn max_balance(&self) -> i32 {
        self.nodes
            .iter()
            .filter(|n| n.height > 1)
            .map(|n| {
                (self.nodes[n.child2 as usize].height - self.nodes[n.child1 as usize].height).abs()
            })
            .max()
            .unwrap_or(0)
    }

    /// Sum of all node areas divided by the root area.
    pub fn area_ratio(&self) -> f32 {
        if self.root == NULL_NODE {
            return 0.0;
        }
        let root_area = self.nodes[self.root as usize].aabb.surface_area();
        if root_area <= 0.0 {
            return 0.0;
        }
        let total: f32 = self
            .nodes
            .iter()
            .filter(|n| n.height >= 0)
            .map(|n| n.aabb.surface_area())
            .sum();
        total / root_area
    }

    /// Check links, heights, containment and balance of the whole tree.
    pub fn validate(&self) -> bool {
        if self.root != NULL_NODE && self.nodes[self.root as usize].parent != NULL_NODE {
            return false;
        }
        let mut reachable = 0;
        let mut leaves = 0;
        if self.root != NULL_NODE
            && !self.validate_node(self.root, &mut reachable, &mut leaves)
        {
            return false;
        }
        reachable + self.free_list.len() == self.nodes.len() && leaves == self.proxy_count
    }

    fn validate_node(&self, index: u32, reachable: &mut usize, leaves: &mut usize) -> bool {
        *reachable += 1;
        let node = &self.nodes[index as usize];
        if node.is_leaf() {
            *leaves += 1;
            return node.child2 == NULL_NODE && node.height == 0 && node.user_data.is_some();
        }

        let (c1, c2) = (node.child1, node.child2);
        if c2 == NULL_NODE {
            return false;
        }
        let (n1, n2) = (&self.nodes[c1 as usize], &self.nodes[c2 as usize]);
        n1.parent == index
            && n2.parent == index
            && node.height == 1 + n1.height.max(n2.height)
            && (n1.height - n2.height).abs() <= 1
            && node.aabb.contains(&n1.aabb)
            && node.aabb.contains(&n2.aabb)
            && self.validate_node(c1, reachable, leaves)
            && self.validate_node(c2, reachable, leaves)
    }

    #[inline]
    fn is_proxy(&self, proxy_id: u32) -> bool {
        self.nodes
            .get(proxy_id as usize)
            .is_some_and(|n| n.height == 0 && n.user_data.is_some())
    }

    fn alloc_node(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id as usize] = TreeNode::free();
            id
        } else {
            let id = self.nodes.len() as u32;
            self.nodes.push(TreeNode::free());
            id
        }
    }

    fn free_node(&mut self, node_id: u32) {
        self.nodes[node_id as usize] = TreeNode::free();
        self.free_list.push(node_id);
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the best sibling.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let child1 = node.child1;
            let child2 = node.child2;

            let area = node.aabb.surface_area();
            let combined_area = node.aabb.combine(&leaf_aabb).surface_area();

            // Cost of creating a new parent for this node and the new leaf.
            let cost = 2.0 * combined_area;
            // Minimum cost of pushing the leaf further down the tree.
            let inheritance_cost = 2.0 * (combined_area - area);

            let cost1 = self.descend_cost(child1, &leaf_aabb, inheritance_cost);
            let cost2 = self.descend_cost(child2, &leaf_aabb, inheritance_cost);

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 <= cost2 { child1 } else { child2 };
        }
        let sibling = index;

        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.alloc_node();
        {
            let sibling_node = &self.nodes[sibling as usize];
            let aabb = leaf_aabb.combine(&sibling_node.aabb);
            let height = sibling_node.height + 1;
            let parent = &mut self.nodes[new_parent as usize];
            parent.parent = old_parent;
            parent.aabb = aabb;
            parent.height = height;
            parent.child1 = sibling;
            parent.child2 = leaf;
        }

        if old_parent != NULL_NODE {
            self.replace_child(old_parent, sibling, new_parent);
        } else {
            self.root = new_parent;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.fix_upwards(new_parent);
    }

    fn descend_cost(&self, child: u32, leaf_aabb: &Aabb, inheritance_cost: f32) -> f32 {
        let node = &self.nodes[child as usize];
        let combined = leaf_aabb.combine(&node.aabb).surface_area();
        if node.is_leaf() {
            combined + inheritance_cost
        } else {
            combined - node.aabb.surface_area() + inheritance_cost
        }
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        if grand_parent != NULL_NODE {
            self.replace_child(grand_parent, parent, sibling);
            self.nodes[sibling as usize].parent = grand_parent;
            self.free_node(parent);
            self.fix_upwards(grand_parent);
        } else {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.free_node(parent);
        }
        self.nodes[leaf as usize].parent = NULL_NODE;
    }

    #[inline]
    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        let node = &mut self.nodes[parent as usize];
        if node.child1 == old {
            node.child1 = new;
        } else {
            node.child2 = new;
        }
    }

    /// Rebalance and refit from `start` to the root.
    fn fix_upwards(&mut self, start: u32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(index);

            let child1 = self.nodes[index as usize].child1;
            let child2 = self.nodes[index as usize].child2;
            let height = 1 + self.nodes[child1 as usize]
                .height
                .max(self.nodes[child2 as usize].height);
            let aabb = self.nodes[child1 as usize]
                .aabb
                .combine(&self.nodes[child2 as usize].aabb);

            let node = &mut self.nodes[index as usize];
            node.height = height;
            node.aabb = aabb;
            index = node.parent;
        }
    }

    /// Rotate `ia` if its children are out of balance. Returns the index of
    /// the subtree's new root.
    fn balance(&mut self, ia: u32) -> u32 {
        let a = &self.nodes[ia as usize];
        if a.is_leaf() || a.height < 2 {
            return ia;
        }

        let ib = a.child1;
        let ic = a.child2;
        let balance = self.nodes[ic as usize].height - self.nodes[ib as usize].height;

        if balance > 1 {
            self.rotate_up(ia, ic, ib, Side::Second)
        } else if balance < -1 {
            self.rotate_up(ia, ib, ic, Side::First)
        } else {
            ia
        }
    }

    /// Promote child `iup` of `ia` to the subtree root. `iother` is the other
    /// child of `ia`; `side` says which slot of `ia` held `iup`.
    fn rotate_up(&mut self, ia: u32, iup: u32, iother: u32, side: Side) -> u32 {
        let i_f = self.nodes[iup as usize].child1;
        let i_g = self.nodes[iup as usize].child2;

        // Swap A and the promoted child.
        let a_parent = self.nodes[ia as usize].parent;
        self.nodes[iup as usize].child1 = ia;
        self.nodes[iup as usize].parent = a_parent;
        self.nodes[ia as usize].parent = iup;

        if a_parent != NULL_NODE {
            self.replace_child(a_parent, ia, iup);
        } else {
            self.root = iup;
        }

        // The taller grandchild stays under the promoted node; the shorter
        // one takes the promoted node's old slot under A.
        let (keep, give) = if self.nodes[i_f as usize].height > self.nodes[i_g as usize].height {
            (i_f, i_g)
        } else {
            (i_g, i_f)
        };

        self.nodes[iup as usize].child2 = keep;
        match side {
            Side::First => self.nodes[ia as usize].child1 = give,
            Side::Second => self.nodes[ia as usize].child2 = give,
        }
        self.nodes[give as usize].parent = ia;

        let a_aabb = self.nodes[iother as usize]
            .aabb
            .combine(&self.nodes[give as usize].aabb);
        let a_height = 1 + self.nodes[iother as usize]
            .height
            .max(self.nodes[give as usize].height);
        self.nodes[ia as usize].aabb = a_aabb;
        self.nodes[ia as usize].height = a_height;

        let up_aabb = a_aabb.combine(&self.nodes[keep as usize].aabb);
        let up_height = 1 + a_height.max(self.nodes[keep as usize].height);
        self.nodes[iup as usize].aabb = up_aabb;
        self.nodes[iup as usize].height = up_height;

        iup
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    First,
    Second,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3) -> Aabb {
        Aabb::from_center_extents(center, Vec3::splat(0.5))
    }

    /// Small deterministic generator for shuffled workloads.
    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }

        fn range(&mut self, lo: f32, hi: f32) -> f32 {
            lo + (hi - lo) * (self.next() % 10_000) as f32 / 10_000.0
        }
    }

    #[test]
    fn test_create_then_query_finds_proxy() {
        let mut tree = DynamicTree::new();
        let aabb = unit_box(Vec3::new(3.0, 1.0, -2.0));
        let id = tree.create_proxy(&aabb, 7u32);

        let mut found = Vec::new();
        tree.query(&aabb, |proxy| {
            found.push(proxy);
            true
        });
        assert_eq!(found, vec![id]);
        assert_eq!(tree.user_data(id), Some(7));
    }

    #[test]
    fn test_destroyed_proxy_never_reported() {
        let mut tree = DynamicTree::new();
        let aabb = unit_box(Vec3::ZERO);
        let a = tree.create_proxy(&aabb, 0u32);
        let b = tree.create_proxy(&aabb, 1u32);
        tree.destroy_proxy(a);

        let mut found = Vec::new();
        tree.query(&aabb, |proxy| {
            found.push(proxy);
            true
        });
        assert_eq!(found, vec![b]);
        assert_eq!(tree.user_data(a), None);
        assert_eq!(tree.proxy_count(), 1);
        assert!(tree.validate());
    }

    #[test]
    fn test_small_move_is_noop() {
        let mut tree = DynamicTree::new();
        let id = tree.create_proxy(&unit_box(Vec3::ZERO), 0u32);
        let before = tree.fat_aabb(id);

        let moved = tree.move_proxy(id, &unit_box(Vec3::new(0.05, 0.0, 0.0)), Vec3::X * 0.05);
        assert!(!moved);
        assert_eq!(tree.fat_aabb(id), before);

        let moved = tree.move_proxy(id, &unit_box(Vec3::new(2.0, 0.0, 0.0)), Vec3::X * 2.0);
        assert!(moved);
        let fat = tree.fat_aabb(id).unwrap();
        assert!(fat.contains(&unit_box(Vec3::new(2.0, 0.0, 0.0))));
        // Predictive extension along +X.
        assert!(fat.max.x > 2.5 + 0.1 + 1.0);
    }

    #[test]
    fn test_growable_stack_spills_in_lifo_order() {
        let mut stack = GrowableStack::new();
        let total = QUERY_STACK_SIZE as u32 + 10;
        for i in 0..total {
            stack.push(i);
        }
        assert_eq!(stack.spill.len(), 10);
        for i in (0..total).rev() {
            assert_eq!(stack.pop(), Some(i));
        }
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_query_early_exit() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.create_proxy(&unit_box(Vec3::ZERO), i);
        }
        let mut visits = 0;
        tree.query(&unit_box(Vec3::ZERO), |_| {
            visits += 1;
            false
        });
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_tree_invariant_after_random_operations() {
        let mut rng = XorShift(0x9E37_79B9);
        let mut tree = DynamicTree::new();
        let mut live: Vec<u32> = Vec::new();

        for step in 0..2000u32 {
            match rng.next() % 4 {
                0 | 1 => {
                    let center = Vec3::new(
                        rng.range(-50.0, 50.0),
                        rng.range(-50.0, 50.0),
                        rng.range(-50.0, 50.0),
                    );
                    live.push(tree.create_proxy(&unit_box(center), step));
                }
                2 if !live.is_empty() => {
                    let i = rng.next() as usize % live.len();
                    tree.destroy_proxy(live.swap_remove(i));
                }
                _ if !live.is_empty() => {
                    let i = rng.next() as usize % live.len();
                    let d = Vec3::new(rng.range(-3.0, 3.0), rng.range(-3.0, 3.0), 0.0);
                    let fat = tree.fat_aabb(live[i]).unwrap();
                    tree.move_proxy(live[i], &unit_box(fat.center() + d), d);
                }
                _ => {}
            }

            if step % 50 == 0 {
                assert!(tree.validate(), "tree invalid at step {step}");
                assert!(tree.max_balance() <= 1);
            }
        }

        assert!(tree.validate());
        assert!(tree.max_balance() <= 1);
        assert_eq!(tree.proxy_count(), live.len());
        assert!(tree.area_ratio() >= 1.0);
    }

    #[test]
    fn test_height_stays_logarithmic() {
        let mut tree = DynamicTree::new();
        for i in 0..1024 {
            tree.create_proxy(&unit_box(Vec3::new(i as f32 * 2.0, 0.0, 0.0)), i);
        }
        assert!(tree.validate());
        // A balanced tree over 1024 leaves is at least 10 high; AVL bounds it
        // near 1.44 log2(n).
        assert!(tree.height() >= 10);
        assert!(tree.height() <= 15);
    }
}
