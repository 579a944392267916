//! Broad phase: buffers moved proxies and reports candidate pairs.

pub mod dynamic_tree;

use glam::Vec3;

use crate::collider::Aabb;

pub use dynamic_tree::{DynamicTree, NULL_NODE};

/// Pair culling over a [`DynamicTree`].
///
/// Proxies that were created or re-inserted since the last
/// [`update_pairs`](BroadPhase::update_pairs) are queried against the tree;
/// every overlapping pair is reported exactly once, in ascending proxy-id
/// order.
#[derive(Debug, Clone)]
pub struct BroadPhase<T> {
    tree: DynamicTree<T>,
    move_buffer: Vec<u32>,
    pair_buffer: Vec<(u32, u32)>,
}

impl<T: Copy> Default for BroadPhase<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> BroadPhase<T> {
    pub fn new() -> Self {
        Self::with_tree(DynamicTree::new())
    }

    pub fn with_tree(tree: DynamicTree<T>) -> Self {
        Self {
            tree,
            move_buffer: Vec::new(),
            pair_buffer: Vec::new(),
        }
    }

    pub fn create_proxy(&mut self, aabb: &Aabb, user_data: T) -> u32 {
        let id = self.tree.create_proxy(aabb, user_data);
        self.move_buffer.push(id);
        id
    }

    pub fn destroy_proxy(&mut self, proxy_id: u32) {
        self.unbuffer_move(proxy_id);
        self.tree.destroy_proxy(proxy_id);
    }

    /// Move a proxy; it is queued for pairing only if the tree re-inserted it.
    pub fn move_proxy(&mut self, proxy_id: u32, aabb: &Aabb, displacement: Vec3) {
        if self.tree.move_proxy(proxy_id, aabb, displacement) {
            self.move_buffer.push(proxy_id);
        }
    }

    /// Queue a proxy for pairing without moving it.
    pub fn touch_proxy(&mut self, proxy_id: u32) {
        self.move_buffer.push(proxy_id);
    }

    /// Whether the fat AABBs of two proxies overlap.
    pub fn test_overlap(&self, a: u32, b: u32) -> bool {
        match (self.tree.fat_aabb(a), self.tree.fat_aabb(b)) {
            (Some(a), Some(b)) => a.overlaps(&b),
            _ => false,
        }
    }

    #[inline]
    pub fn fat_aabb(&self, proxy_id: u32) -> Option<Aabb> {
        self.tree.fat_aabb(proxy_id)
    }

    #[inline]
    pub fn user_data(&self, proxy_id: u32) -> Option<T> {
        self.tree.user_data(proxy_id)
    }

    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.tree.proxy_count()
    }

    #[inline]
    pub fn tree(&self) -> &DynamicTree<T> {
        &self.tree
    }

    pub fn query<F: FnMut(u32) -> bool>(&self, aabb: &Aabb, callback: F) {
        self.tree.query(aabb, callback);
    }

    /// Report each new overlapping pair of user data to `callback` and clear
    /// the move buffer.
    pub fn update_pairs<F: FnMut(T, T)>(&mut self, mut callback: F) {
        let Self {
            tree,
            move_buffer,
            pair_buffer,
        } = self;
        pair_buffer.clear();

        for &query_id in move_buffer.iter() {
            let Some(fat) = tree.fat_aabb(query_id) else {
                continue;
            };
            tree.query(&fat, |proxy_id| {
                if proxy_id != query_id {
                    pair_buffer.push((query_id.min(proxy_id), query_id.max(proxy_id)));
                }
                true
            });
        }
        move_buffer.clear();

        pair_buffer.sort_unstable();
        pair_buffer.dedup();

        for &(a, b) in pair_buffer.iter() {
            if let (Some(ua), Some(ub)) = (tree.user_data(a), tree.user_data(b)) {
                callback(ua, ub);
            }
        }
    }

    fn unbuffer_move(&mut self, proxy_id: u32) {
        self.move_buffer.retain(|&id| id != proxy_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3) -> Aabb {
        Aabb::from_center_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn test_broadphase_overlapping() {
        let mut bp = BroadPhase::new();
        bp.create_proxy(&unit_box(Vec3::ZERO), 'a');
        bp.create_proxy(&unit_box(Vec3::new(0.8, 0.0, 0.0)), 'b');

        let mut pairs = Vec::new();
        bp.update_pairs(|a, b| pairs.push((a, b)));
        assert_eq!(pairs, vec![('a', 'b')]);
    }

    #[test]
    fn test_broadphase_no_overlap() {
        let mut bp = BroadPhase::new();
        bp.create_proxy(&unit_box(Vec3::ZERO), 0u32);
        bp.create_proxy(&unit_box(Vec3::new(10.0, 0.0, 0.0)), 1u32);

        let mut count = 0;
        bp.update_pairs(|_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unmoved_proxies_not_repaired() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(&unit_box(Vec3::ZERO), 0u32);
        bp.create_proxy(&unit_box(Vec3::new(0.5, 0.0, 0.0)), 1u32);
        bp.update_pairs(|_, _| {});

        // Small move stays inside the fat AABB: no new pairs.
        bp.move_proxy(a, &unit_box(Vec3::new(0.01, 0.0, 0.0)), Vec3::X * 0.01);
        let mut count = 0;
        bp.update_pairs(|_, _| count += 1);
        assert_eq!(count, 0);

        bp.touch_proxy(a);
        bp.update_pairs(|_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_destroyed_proxy_is_unbuffered() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(&unit_box(Vec3::ZERO), 0u32);
        bp.create_proxy(&unit_box(Vec3::ZERO), 1u32);
        bp.destroy_proxy(a);

        let mut count = 0;
        bp.update_pairs(|_, _| count += 1);
        assert_eq!(count, 0);
        assert!(!bp.test_overlap(a, 1));
    }
}
