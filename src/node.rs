use std::sync::RwLock;

use crate::error::{MpvError, MpvResult};
use crate::sync::{Arc, AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};

/// Color-to-move at a leaf, needed to orient policy outputs (`spec.md` §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideToMove {
    First,
    Second,
}

impl SideToMove {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            SideToMove::First => SideToMove::Second,
            SideToMove::Second => SideToMove::First,
        }
    }
}

/// A tree node shared between the small-net search workers and the MPV core.
///
/// `spec.md` §3 describes `Node` as external, owned by the tree. This crate
/// still needs a concrete type to compile and test against, so `Node` is
/// defined here the way a small-net tree would embed it: behind an `Arc` so
/// both sides can hold a reference, with the statistics fields the backprop
/// engine touches kept atomic so updates never need a whole-node lock, and
/// the (rarely written, frequently read) policy priors behind an `RwLock`.
pub struct Node {
    /// Move priors, set once by large-net distribution (`spec.md` §4.2).
    priors: RwLock<Vec<f32>>,
    /// Running value numerator, stored fixed-point (value * `VALUE_SCALE`)
    /// so it can be updated with `fetch_add` instead of a CAS loop on a
    /// float, matching the "atomic increment" half of `spec.md` §4.3's
    /// "atomic CAS on the running value, atomic increment on visit counts."
    value_sum_fixed: AtomicI64,
    visit_count: AtomicUsize,
    virtual_loss: AtomicI32,
    terminal: AtomicBool,
    enqueued_for_large_net: AtomicBool,
    has_large_net_results: AtomicBool,
    /// Which side-to-move the stored priors were oriented for (`spec.md`
    /// §3: "needed to orient policy outputs"). Meaningless until
    /// `has_large_net_results` is set; `true` encodes `SideToMove::Second`.
    large_net_side_is_second: AtomicBool,
}

/// Fixed-point scale for `value_sum_fixed`. Values are in `[-1.0, 1.0]`;
/// this gives better than `1e-6` precision well within `i64` range for any
/// realistic visit count.
const VALUE_SCALE: f64 = 1 << 30;

impl Node {
    #[must_use]
    pub fn new(priors: Vec<f32>, terminal: bool) -> Self {
        Self {
            priors: RwLock::new(priors),
            value_sum_fixed: AtomicI64::new(0),
            visit_count: AtomicUsize::new(0),
            virtual_loss: AtomicI32::new(0),
            terminal: AtomicBool::new(terminal),
            enqueued_for_large_net: AtomicBool::new(false),
            has_large_net_results: AtomicBool::new(false),
            large_net_side_is_second: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn leaf() -> Self {
        Self::new(Vec::new(), false)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    pub fn visit_count(&self) -> usize {
        self.visit_count.load(Ordering::Acquire)
    }

    pub fn virtual_loss(&self) -> i32 {
        self.virtual_loss.load(Ordering::Acquire)
    }

    pub fn value_mean(&self) -> f64 {
        let visits = self.visit_count();
        if visits == 0 {
            0.0
        } else {
            self.value_sum() / visits as f64
        }
    }

    pub fn value_sum(&self) -> f64 {
        self.value_sum_fixed.load(Ordering::Acquire) as f64 / VALUE_SCALE
    }

    pub fn priors(&self) -> MpvResult<Vec<f32>> {
        match self.priors.read() {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => Err(MpvError::QueuePoisoned),
        }
    }

    /// Atomically tests-and-sets the `enqueued_for_large_net` flag, as
    /// required by the submission precondition in `spec.md` §6: "caller" is
    /// expected to do this test-and-set before calling `submit`.
    ///
    /// Returns `true` if the flag was flipped from `false` to `true` (i.e.
    /// the caller now owns the right to submit this node), `false` if it was
    /// already set (a duplicate submission attempt).
    #[must_use]
    pub fn try_mark_enqueued(&self) -> bool {
        self.enqueued_for_large_net
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_enqueued_for_large_net(&self) -> bool {
        self.enqueued_for_large_net.load(Ordering::Acquire)
    }

    /// Clears the enqueued flag. Called when a slot is dequeued, whether by
    /// normal consumption or by `reset_for_new_search` discarding it.
    pub fn clear_enqueued(&self) {
        self.enqueued_for_large_net.store(false, Ordering::Release);
    }

    pub fn has_large_net_results(&self) -> bool {
        self.has_large_net_results.load(Ordering::Acquire)
    }

    /// Stores large-net priors (oriented for `side`) and marks the node as
    /// evaluated. Must not be called for a terminal node (`spec.md` §4.2
    /// contracts). Orienting the raw policy output for `side` itself is a
    /// move-generation/policy-map concern (`spec.md` §1 "out of scope");
    /// this crate records which side the stored priors are valid for so the
    /// move-selection layer that does own that concern can tell.
    pub fn set_large_net_results(&self, priors: Vec<f32>, side: SideToMove) -> MpvResult<()> {
        debug_assert!(!self.is_terminal(), "terminal nodes must not be mutated by the large net");
        match self.priors.write() {
            Ok(mut guard) => *guard = priors,
            Err(_) => return Err(MpvError::QueuePoisoned),
        }
        self.large_net_side_is_second.store(side == SideToMove::Second, Ordering::Release);
        self.has_large_net_results.store(true, Ordering::Release);
        Ok(())
    }

    /// The side-to-move the current priors were oriented for, or `None` if
    /// the large net hasn't evaluated this node yet.
    pub fn large_net_side(&self) -> Option<SideToMove> {
        if !self.has_large_net_results() {
            return None;
        }
        Some(if self.large_net_side_is_second.load(Ordering::Acquire) {
            SideToMove::Second
        } else {
            SideToMove::First
        })
    }

    pub fn increment_virtual_loss(&self, amount: i32) {
        self.virtual_loss.fetch_add(amount, Ordering::AcqRel);
    }

    pub fn decrement_virtual_loss(&self, amount: i32) {
        self.virtual_loss.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Applies one backprop update: adds `value` to the running sum, removes
    /// `virtual_loss_removed` worth of virtual loss (0 if none should be
    /// removed at this ancestor — see `spec.md` §4.3 and §9 Open Questions),
    /// and increments the visit count. All three are independent atomic
    /// operations; see `spec.md` §4.3's "each individual update must be
    /// lost-write-free," not a globally-ordered one.
    pub fn apply_backprop(&self, value: f64, virtual_loss_removed: i32) {
        let delta = (value * VALUE_SCALE) as i64;
        self.value_sum_fixed.fetch_add(delta, Ordering::AcqRel);
        self.visit_count.fetch_add(1, Ordering::AcqRel);
        if virtual_loss_removed != 0 {
            self.decrement_virtual_loss(virtual_loss_removed);
        }
    }

    /// Overwrites the running mean with `value`, used when `reset_q_val` is
    /// set (`spec.md` §9 Open Questions: "whether `reset_q_val = true`
    /// should also zero visit counts" — resolved in `DESIGN.md`: it does
    /// not, it only replaces the accumulated sum so the existing visit count
    /// continues to weight future blends consistently).
    pub fn reset_value(&self, value: f64, visits: usize) {
        let scaled = (value * visits as f64 * VALUE_SCALE) as i64;
        self.value_sum_fixed.store(scaled, Ordering::Release);
    }
}

/// A single step of a trajectory: the parent visited, and which child index
/// was descended into.
pub struct TrajectoryStep {
    pub parent: Arc<Node>,
    pub child_index: usize,
}

/// An ordered root-to-leaf path, immutable after submission, used to replay
/// backpropagation (`spec.md` §3). The root entry is expected to already be
/// stripped by the producer: `spec.md` says "the root entry is excluded from
/// backprop replay (producer responsibility)" — `Trajectory::push_ancestor`
/// is how a producer builds this, and the type carries no special-case for
/// "skip the first entry" because there is no root entry to skip.
#[derive(Default)]
pub struct Trajectory {
    steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push_ancestor(&mut self, parent: Arc<Node>, child_index: usize) {
        self.steps.push(TrajectoryStep { parent, child_index });
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Iterates leaf-to-root: the order backprop walks in.
    pub fn iter_bottom_up(&self) -> impl Iterator<Item = &TrajectoryStep> {
        self.steps.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fresh_node_has_no_flags_set() {
        let node = Node::leaf();
        assert!(!node.is_enqueued_for_large_net());
        assert!(!node.has_large_net_results());
        assert_eq!(node.visit_count(), 0);
        assert_eq!(node.value_mean(), 0.0);
        assert_eq!(node.large_net_side(), None, "orientation is meaningless before the large net has evaluated this node");
    }

    #[test]
    fn large_net_results_record_the_orienting_side() {
        let node = Node::leaf();
        node.set_large_net_results(vec![0.5, 0.5], SideToMove::Second).unwrap();
        assert_eq!(node.large_net_side(), Some(SideToMove::Second));
        assert_eq!(node.priors().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn try_mark_enqueued_is_exactly_once() {
        let node = Node::leaf();
        assert!(node.try_mark_enqueued());
        assert!(!node.try_mark_enqueued(), "second attempt must observe already-enqueued");
        node.clear_enqueued();
        assert!(node.try_mark_enqueued(), "after clearing, re-enqueue succeeds");
    }

    #[test]
    fn backprop_accumulates_value_and_visits() {
        let node = Node::leaf();
        node.increment_virtual_loss(3);
        node.apply_backprop(0.5, 3);
        node.apply_backprop(-0.25, 0);

        assert_eq!(node.visit_count(), 2);
        assert!((node.value_sum() - 0.25).abs() < 1e-6);
        assert_eq!(node.virtual_loss(), 0);
    }

    #[test]
    fn trajectory_replays_bottom_up() {
        let root = Arc::new(Node::leaf());
        let mid = Arc::new(Node::leaf());
        let mut trajectory = Trajectory::new();
        trajectory.push_ancestor(Arc::clone(&root), 2);
        trajectory.push_ancestor(Arc::clone(&mid), 0);

        let order: Vec<usize> = trajectory.iter_bottom_up().map(|step| step.child_index).collect();
        assert_eq!(order, vec![0, 2]);
    }
}
