mod slab;

use crate::error::{MpvError, MpvResult};
use crate::node::{Node, SideToMove, Trajectory};
#[cfg(feature = "loom")]
use crate::sync::thread;
use crate::sync::{Arc, AtomicBool, AtomicU64, AtomicUsize, Mutex, Ordering};
use slab::Slab;

/// Backoff strategy for the spin loops in `reserve_slot`/`swap_slabs_locked`.
///
/// Under normal builds this is `crossbeam_utils::Backoff`: spin briefly,
/// then fall back to `thread::yield_now`. Under the `loom` feature it
/// always yields — `Backoff`'s internal spinning calls `std::hint::spin_loop`
/// directly rather than through `crate::sync`, which would never surface a
/// context switch to loom's cooperative scheduler and could make a model
/// run hang instead of exploring the next interleaving.
struct Spinner {
    #[cfg(not(feature = "loom"))]
    inner: crossbeam_utils::Backoff,
}

impl Spinner {
    fn new() -> Self {
        Self {
            #[cfg(not(feature = "loom"))]
            inner: crossbeam_utils::Backoff::new(),
        }
    }

    fn spin(&self) {
        #[cfg(feature = "loom")]
        {
            thread::yield_now();
        }
        #[cfg(not(feature = "loom"))]
        {
            self.inner.snooze();
        }
    }
}

/// A slot index reserved by [`NodeQueue::reserve_slot`], naming which slab
/// generation it belongs to so `write_slot` always targets the slab the
/// reservation was actually made against, even if a swap happens between
/// reserving and writing.
#[derive(Clone, Copy, Debug)]
pub struct ReservedSlot {
    slab_index: usize,
    slot_index: usize,
}

/// Thread-safe many-producer / single-consumer batching queue with
/// zero-copy double-buffered tensors (`spec.md` §4.1).
///
/// Exactly two slabs are allocated up front and never reallocated; "swap"
/// is implemented as flipping which of the two is currently `active`
/// (`spec.md` §9: "bounds memory to `2*B*(F+overhead)` and eliminates
/// reallocation on the hot path").
pub struct NodeQueue {
    slabs: [Slab; 2],
    active: AtomicUsize,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    batch_ready: AtomicBool,
    consumer_active: AtomicBool,
    swap_mutex: Mutex<()>,
    total_evals: AtomicU64,
    batch_size: usize,
}

impl NodeQueue {
    #[must_use]
    pub fn new(batch_size: usize, feature_width: usize) -> Self {
        Self {
            slabs: [Slab::new(batch_size, feature_width), Slab::new(batch_size, feature_width)],
            active: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            batch_ready: AtomicBool::new(false),
            consumer_active: AtomicBool::new(false),
            swap_mutex: Mutex::new(()),
            total_evals: AtomicU64::new(0),
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn total_evals(&self) -> u64 {
        self.total_evals.load(Ordering::Relaxed)
    }

    /// Returns `Err(MpvError::QueuePoisoned)` if deactivating required
    /// draining the swap mutex and a prior holder had panicked while
    /// holding it; activating (`active = true`) never touches the mutex
    /// and so never fails.
    pub fn set_consumer_active(&self, active: bool) -> MpvResult<()> {
        self.consumer_active.store(active, Ordering::Release);
        if !active {
            self.reset_for_new_search()?;
        }
        Ok(())
    }

    pub fn is_consumer_active(&self) -> bool {
        self.consumer_active.load(Ordering::Acquire)
    }

    /// Reserves a slot in the current active slab, participating in the
    /// swap protocol if the slab is already full (`spec.md` §4.1). Returns
    /// `None` if the consumer was stopped while this producer was waiting
    /// over capacity (the "abort path").
    pub fn reserve_slot(&self) -> Option<ReservedSlot> {
        loop {
            let slot = self.reserved.fetch_add(1, Ordering::AcqRel);
            if slot < self.batch_size {
                // `active` must be read only *after* a successful reservation:
                // a swap can't reset `reserved` out from under this slot,
                // because the swap gate requires `committed >= batch_size`,
                // which can't hold until this very slot is committed. Reading
                // `active` earlier (before the fetch_add) could observe the
                // pre-swap generation while the index itself already belongs
                // to the post-swap one.
                let slab_index = self.active.load(Ordering::Acquire);
                return Some(ReservedSlot { slab_index, slot_index: slot });
            }

            // Over capacity: spin while previous writers finish, short-circuiting
            // on stop.
            let spinner = Spinner::new();
            loop {
                if !self.consumer_active.load(Ordering::Acquire) {
                    return None;
                }
                let committed = self.committed.load(Ordering::Acquire);
                let reserved = self.reserved.load(Ordering::Acquire);
                if committed >= self.batch_size || reserved < self.batch_size {
                    break;
                }
                spinner.spin();
            }

            if let Ok(_guard) = self.swap_mutex.try_lock() {
                if self.reserved.load(Ordering::Acquire) >= self.batch_size && !self.swap_slabs_locked() {
                    return None;
                }
            }
            // Losers (lock not acquired, or someone else already swapped)
            // simply retry from the top.
        }
    }

    /// Copies the four fields into `slot`, then marks it committed.
    ///
    /// # Panics
    /// Panics (debug-only assertion) if `slot` was reserved against a slab
    /// generation that has since been swapped away without this slot ever
    /// having been written — that would mean the caller held a reservation
    /// across a swap it should have retried through, which the protocol in
    /// `reserve_slot` never allows.
    pub fn write_slot(&self, slot: ReservedSlot, node: Arc<Node>, side: SideToMove, trajectory: Trajectory, planes_src: &[f32]) {
        unsafe {
            self.slabs[slot.slab_index].write_slot(slot.slot_index, node, side, trajectory, planes_src);
        }
        self.committed.fetch_add(1, Ordering::Release);
    }

    /// `swap_mutex` must be held by the caller. Returns `false` if the
    /// consumer was stopped while waiting for the prior shadow to be
    /// consumed.
    fn swap_slabs_locked(&self) -> bool {
        let spinner = Spinner::new();
        while self.batch_ready.load(Ordering::Acquire) {
            if !self.consumer_active.load(Ordering::Acquire) {
                return false;
            }
            spinner.spin();
        }

        let old_active = self.active.load(Ordering::Acquire);
        let new_active = 1 - old_active;
        self.active.store(new_active, Ordering::Release);
        self.reserved.store(0, Ordering::Release);
        self.committed.store(0, Ordering::Release);
        self.batch_ready.store(true, Ordering::Release);
        true
    }

    /// Non-blocking: returns the shadow batch if one is ready.
    pub fn consumer_take_batch(&self) -> Option<BatchHandle<'_>> {
        if !self.batch_ready.load(Ordering::Acquire) {
            return None;
        }
        let shadow_index = 1 - self.active.load(Ordering::Acquire);
        Some(BatchHandle {
            queue: self,
            slab_index: shadow_index,
        })
    }

    /// Clears `batch_ready` and advances the total-evals counter. Must be
    /// called once the consumer has finished reading `handle`'s planes.
    pub fn consumer_release_batch(&self, handle: BatchHandle<'_>) {
        let count = handle.len();
        drop(handle);
        self.batch_ready.store(false, Ordering::Release);
        self.total_evals.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Clears `enqueued_for_large_net` on every node currently held in
    /// either slab, then resets counters. Used on stop and on tree reuse
    /// between moves (`spec.md` §4.1, §4.4).
    ///
    /// # Errors
    /// Returns `Err(MpvError::QueuePoisoned)` if the swap mutex was
    /// poisoned by a thread that panicked while holding it (`spec.md` §7:
    /// this is the one condition this crate treats as fatal rather than
    /// recording it as a counter and continuing).
    pub fn reset_for_new_search(&self) -> MpvResult<()> {
        let _guard = self.swap_mutex.lock().map_err(|_| MpvError::QueuePoisoned)?;

        let active = self.active.load(Ordering::Acquire);
        let committed = self.committed.load(Ordering::Acquire);
        unsafe {
            self.slabs[active].discard_entries(committed);
        }

        if self.batch_ready.load(Ordering::Acquire) {
            let shadow = 1 - active;
            unsafe {
                self.slabs[shadow].discard_entries(self.batch_size);
            }
        }

        self.reserved.store(0, Ordering::Release);
        self.committed.store(0, Ordering::Release);
        self.batch_ready.store(false, Ordering::Release);
        Ok(())
    }
}

/// A handle to a full, consumer-owned batch. Borrows the queue only long
/// enough to read it and hand it back via [`NodeQueue::consumer_release_batch`].
pub struct BatchHandle<'a> {
    queue: &'a NodeQueue,
    slab_index: usize,
}

impl<'a> BatchHandle<'a> {
    pub fn len(&self) -> usize {
        self.queue.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes ownership of the batch's nodes/sides/trajectories, decoupling
    /// them from the queue's buffers before inference runs
    /// (`spec.md` §4.2 step 3).
    pub fn take_entries(&self) -> (Vec<Arc<Node>>, Vec<SideToMove>, Vec<Trajectory>) {
        unsafe { self.queue.slabs[self.slab_index].take_entries(self.len()) }
    }

    /// The batch's input planes, `len() * feature_width` floats.
    pub fn planes(&self) -> &[f32] {
        unsafe { self.queue.slabs[self.slab_index].planes_slice(self.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn submit(queue: &NodeQueue, feature_width: usize) {
        let slot = queue.reserve_slot().expect("consumer is active");
        let node = Arc::new(Node::leaf());
        let planes = vec![1.0; feature_width];
        queue.write_slot(slot, node, SideToMove::First, Trajectory::new(), &planes);
    }

    #[test]
    fn single_producer_fill_and_swap() {
        // `spec.md` §8 scenario 1: a swap only happens when a producer
        // *overshoots* B, so the first 4 submissions alone don't make a
        // batch visible — it takes a 5th to drive the swap.
        let queue = NodeQueue::new(4, 2);
        queue.set_consumer_active(true).unwrap();

        for _ in 0..4 {
            submit(&queue, 2);
        }
        assert!(queue.consumer_take_batch().is_none(), "no producer has overshot B yet, so no swap has happened");

        submit(&queue, 2);
        let batch = queue.consumer_take_batch().expect("the 5th submission must have driven the swap");
        assert_eq!(batch.len(), 4);
        queue.consumer_release_batch(batch);
        assert_eq!(queue.total_evals(), 4);
    }

    #[test]
    fn two_producers_each_submit_three_at_batch_two() {
        // B=2, two producers submitting 3 items each = 6 items, more than
        // one swap generation (2*B=4) can hold unconsumed. A consumer must
        // be draining concurrently or the third swap would block forever
        // waiting for the first batch to be released (`spec.md` §8
        // scenario 2: "consumer receives three batches of 2").
        let queue = Arc::new(NodeQueue::new(2, 1));
        queue.set_consumer_active(true).unwrap();

        let mut producers = Vec::new();
        for _ in 0..2 {
            let queue = Arc::clone(&queue);
            producers.push(std::thread::spawn(move || {
                for _ in 0..3 {
                    submit(&queue, 1);
                }
            }));
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut delivered = 0;
                while delivered < 6 {
                    if let Some(batch) = queue.consumer_take_batch() {
                        delivered += batch.len();
                        queue.consumer_release_batch(batch);
                    } else {
                        std::thread::yield_now();
                    }
                }
                delivered
            })
        };

        for handle in producers {
            handle.join().unwrap();
        }
        let delivered = consumer.join().unwrap();
        assert_eq!(delivered, 6, "every submitted node must be observed by the consumer exactly once");
        assert_eq!(queue.total_evals(), 6);
    }

    #[test]
    fn stop_during_over_capacity_wait_does_not_deadlock() {
        let queue = Arc::new(NodeQueue::new(2, 1));
        queue.set_consumer_active(true).unwrap();

        submit(&queue, 1);
        submit(&queue, 1);
        // Queue is now full (reserved == committed == 2, no swap yet since
        // nobody has overshot). Stop the consumer before anyone does.
        queue.set_consumer_active(false).unwrap();

        assert!(queue.reserve_slot().is_none(), "producer must observe the stop instead of spinning forever");
    }

    #[test]
    fn reset_clears_enqueued_flag_on_discarded_slot() {
        let queue = NodeQueue::new(4, 1);
        queue.set_consumer_active(true).unwrap();

        let node = Arc::new(Node::leaf());
        assert!(node.try_mark_enqueued());
        let slot = queue.reserve_slot().unwrap();
        queue.write_slot(slot, Arc::clone(&node), SideToMove::First, Trajectory::new(), &[0.0]);

        queue.set_consumer_active(false).unwrap();
        assert!(!node.is_enqueued_for_large_net(), "reset must clear the flag on the abandoned slot");
    }

    #[test]
    fn over_capacity_swap_with_three_producers() {
        let queue = Arc::new(NodeQueue::new(2, 1));
        queue.set_consumer_active(true).unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || submit(&queue, 1)));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 3 submissions at B=2 forces exactly one swap; the third producer
        // either drove it or is sitting committed=1 in the new active slab.
        let batch = queue.consumer_take_batch().expect("one swap must have produced a ready batch");
        assert_eq!(batch.len(), 2);
        queue.consumer_release_batch(batch);
        assert_eq!(queue.total_evals(), 2);
    }
}
