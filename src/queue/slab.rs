use std::cell::UnsafeCell;

use crate::node::{Node, SideToMove, Trajectory};
use crate::sync::Arc;

/// A single-slot cell written by exactly one producer and later read/taken by
/// exactly one consumer. Safety relies entirely on the Node-Queue's
/// `reserved`/`committed` protocol handing out each index to one writer at a
/// time and never re-handing it out until the consumer has released it —
/// the same disjoint-ownership argument `dg_mcts` makes for its
/// `UnsafeCell<tree::Node>` root handle.
struct SlotCell<T>(UnsafeCell<Option<T>>);

unsafe impl<T: Send> Sync for SlotCell<T> {}

impl<T> SlotCell<T> {
    fn empty() -> Self {
        Self(UnsafeCell::new(None))
    }

    /// # Safety
    /// The caller must be the sole owner of this slot's index for the
    /// duration of the call (see the reserved/committed protocol).
    unsafe fn write(&self, value: T) {
        *self.0.get() = Some(value);
    }

    /// # Safety
    /// Same as [`Self::write`].
    unsafe fn take(&self) -> Option<T> {
        (*self.0.get()).take()
    }
}

/// The unit of batching: parallel arrays of length `B`, plus the flat
/// `[B, F]` input-plane region (`spec.md` §3).
pub(crate) struct Slab {
    nodes: Box<[SlotCell<Arc<Node>>]>,
    sides: Box<[SlotCell<SideToMove>]>,
    trajectories: Box<[SlotCell<Trajectory>]>,
    planes: UnsafeCell<Box<[f32]>>,
    batch_size: usize,
    feature_width: usize,
}

unsafe impl Sync for Slab {}

impl Slab {
    pub(crate) fn new(batch_size: usize, feature_width: usize) -> Self {
        Self {
            nodes: (0..batch_size).map(|_| SlotCell::empty()).collect(),
            sides: (0..batch_size).map(|_| SlotCell::empty()).collect(),
            trajectories: (0..batch_size).map(|_| SlotCell::empty()).collect(),
            planes: UnsafeCell::new(vec![0.0; batch_size * feature_width].into_boxed_slice()),
            batch_size,
            feature_width,
        }
    }

    /// # Safety
    /// `index` must be a slot this caller currently, exclusively owns (a
    /// freshly `reserve_slot`-returned index that nobody else has written
    /// to or read from yet), and `planes_src` must be exactly
    /// `feature_width` floats.
    pub(crate) unsafe fn write_slot(
        &self,
        index: usize,
        node: Arc<Node>,
        side: SideToMove,
        trajectory: Trajectory,
        planes_src: &[f32],
    ) {
        debug_assert_eq!(planes_src.len(), self.feature_width);
        self.nodes[index].write(node);
        self.sides[index].write(side);
        self.trajectories[index].write(trajectory);

        let planes = &mut *self.planes.get();
        let offset = index * self.feature_width;
        planes[offset..offset + self.feature_width].copy_from_slice(planes_src);
    }

    /// Takes ownership of the node/side/trajectory triples for slots
    /// `0..count`, leaving the slots empty. Used by the consumer to copy the
    /// batch into its own working vectors, decoupling downstream processing
    /// from the Node-Queue's buffers (`spec.md` §4.2 step 3).
    ///
    /// # Safety
    /// Must only be called by the single consumer, on a slab it currently
    /// holds as the shadow (i.e. between `consumer_take_batch` and
    /// `consumer_release_batch`), and no producer may be concurrently
    /// writing into this slab (guaranteed because it is not the active
    /// slab).
    pub(crate) unsafe fn take_entries(&self, count: usize) -> (Vec<Arc<Node>>, Vec<SideToMove>, Vec<Trajectory>) {
        let mut nodes = Vec::with_capacity(count);
        let mut sides = Vec::with_capacity(count);
        let mut trajectories = Vec::with_capacity(count);

        for i in 0..count {
            nodes.push(self.nodes[i].take().expect("committed slot must hold a node"));
            sides.push(self.sides[i].take().expect("committed slot must hold a side"));
            trajectories.push(self.trajectories[i].take().expect("committed slot must hold a trajectory"));
        }

        (nodes, sides, trajectories)
    }

    /// Clears the `enqueued_for_large_net` flag (and drops the stored
    /// reference) for slots `0..count`, without requiring ownership transfer.
    /// Used by `reset_for_new_search` to release pending nodes.
    ///
    /// # Safety
    /// Same exclusivity requirement as [`Self::take_entries`].
    pub(crate) unsafe fn discard_entries(&self, count: usize) {
        for i in 0..count {
            if let Some(node) = self.nodes[i].take() {
                node.clear_enqueued();
            }
            self.sides[i].take();
            self.trajectories[i].take();
        }
    }

    /// Returns the `count * feature_width` floats written so far. Valid
    /// until the slab is next reused as an active slab.
    ///
    /// # Safety
    /// Must only be called while no producer holds a write claim on any of
    /// the first `count` slots (true once the slab is the shadow: it only
    /// became shadow by being full, at which point no further writes to it
    /// occur until it is swapped back to active).
    pub(crate) unsafe fn planes_slice(&self, count: usize) -> &[f32] {
        let planes = &*self.planes.get();
        &planes[0..count * self.feature_width]
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_take_round_trips() {
        let slab = Slab::new(2, 3);
        let node = Arc::new(Node::leaf());
        unsafe {
            slab.write_slot(0, Arc::clone(&node), SideToMove::First, Trajectory::new(), &[1.0, 2.0, 3.0]);
            let (nodes, sides, _trajectories) = slab.take_entries(1);
            assert_eq!(nodes.len(), 1);
            assert_eq!(sides[0], SideToMove::First);
            assert_eq!(slab.planes_slice(1), &[1.0, 2.0, 3.0]);
        }
    }
}
