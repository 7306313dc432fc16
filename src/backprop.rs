use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::node::Trajectory;
use crate::options::MpvOptions;
use crate::stats::Stats;

/// One leaf's backprop job: the value to propagate (from the leaf's own
/// side-to-move perspective) and the root-to-leaf path to replay.
pub struct BackpropJob {
    pub trajectory: Trajectory,
    pub leaf_value: f64,
}

impl BackpropJob {
    #[must_use]
    pub fn new(trajectory: Trajectory, leaf_value: f64) -> Self {
        Self { trajectory, leaf_value }
    }
}

/// Walks completed large-net evaluations back up their trajectories,
/// updating every ancestor's running value and visit count.
///
/// Grounded directly on the original engine's `backup_mpvnet_values`: a pool
/// of `K` worker threads share one atomic cursor over the job list and each
/// thread claims jobs via `fetch_add` until the list is exhausted, rather
/// than partitioning the list up front — this keeps threads busy even when
/// individual trajectories have very different lengths.
pub struct BackpropEngine {
    threads: usize,
    value_backprop: bool,
    reset_q_val: bool,
    threshold: f64,
}

impl BackpropEngine {
    #[must_use]
    pub fn new(options: &MpvOptions) -> Self {
        Self::from_parts(
            options.large_net_backprop_threads,
            options.large_net_value_backprop,
            options.reset_q_val,
            options.large_net_eval_threshold,
        )
    }

    /// Builds an engine from its tunables directly, for callers (like
    /// [`crate::agent::Agent`]) that only have a `Copy` snapshot of the
    /// options rather than a full `&MpvOptions` on hand inside a spawned
    /// thread.
    #[must_use]
    pub fn from_parts(threads: usize, value_backprop: bool, reset_q_val: bool, threshold: f32) -> Self {
        Self {
            threads: threads.max(1),
            value_backprop,
            reset_q_val,
            threshold: threshold as f64,
        }
    }

    /// Runs backprop for every job in `jobs`, returning once all ancestors
    /// have been updated. Virtual-loss removal is deliberately not performed
    /// here: per the suggested safe default for composing large-net backprop
    /// with the small net's own virtual-loss bookkeeping, removal stays the
    /// small-net path's responsibility and this engine only adds value
    /// (`spec.md` §9 Open Questions).
    ///
    /// `threshold` (`spec.md` §6 `large_net_eval_threshold`) is the mixing
    /// weight applied while `reset_q_val` is false: each ancestor's value
    /// sum receives `threshold * value` instead of the full value, so a
    /// single large-net backprop weighs in like a fraction of an ordinary
    /// visit at low threshold (a soft correction) and like a full visit as
    /// threshold approaches `1.0` (letting it dominate), composing with the
    /// existing small-net-driven visit count the same way every other
    /// backprop contribution does. When `reset_q_val` is true the value
    /// outright replaces the running mean instead of being blended in
    /// (`spec.md` §9 Open Questions, resolved in `DESIGN.md`: the visit
    /// count is left untouched by this replacement).
    pub fn run(&self, jobs: Vec<BackpropJob>, stats: &Stats) {
        if jobs.is_empty() {
            return;
        }

        let applied = if self.threads <= 1 {
            self.drain_sequential(&jobs)
        } else {
            self.drain_parallel(jobs.as_slice())
        };

        stats.record_backprop_updates(applied);
    }

    fn apply_job(&self, job: &BackpropJob) -> usize {
        let mut value = job.leaf_value;
        let mut applied = 0;
        for step in job.trajectory.iter_bottom_up() {
            value = -value;
            if !self.value_backprop {
                step.parent.apply_backprop(0.0, 0);
            } else if self.reset_q_val {
                step.parent.reset_value(value, step.parent.visit_count());
            } else {
                step.parent.apply_backprop(value * self.threshold, 0);
            }
            applied += 1;
        }
        applied
    }

    fn drain_sequential(&self, jobs: &[BackpropJob]) -> usize {
        jobs.iter().map(|job| self.apply_job(job)).sum()
    }

    fn drain_parallel(&self, jobs: &[BackpropJob]) -> usize {
        let next_index = AtomicUsize::new(0);
        let total_applied = AtomicUsize::new(0);
        let worker_count = self.threads.min(jobs.len());

        thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| loop {
                    let index = next_index.fetch_add(1, Ordering::Relaxed);
                    if index >= jobs.len() {
                        break;
                    }
                    let applied = self.apply_job(&jobs[index]);
                    total_applied.fetch_add(applied, Ordering::Relaxed);
                });
            }
        });

        total_applied.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::node::Node;
    use crate::sync::Arc;

    /// `large_net_eval_threshold` is pinned to `1.0` (full-weight blend) so
    /// the value-accumulation assertions below read as plain sums; threshold
    /// scaling itself is covered by `partial_threshold_scales_contribution`.
    fn options_with_threads(threads: usize) -> MpvOptions {
        MpvOptions {
            large_net_backprop_threads: threads,
            large_net_eval_threshold: 1.0,
            ..MpvOptions::default()
        }
    }

    #[test]
    fn sequential_backprop_flips_value_per_ply() {
        let root = Arc::new(Node::leaf());
        let mid = Arc::new(Node::leaf());
        let mut trajectory = Trajectory::new();
        trajectory.push_ancestor(Arc::clone(&root), 0);
        trajectory.push_ancestor(Arc::clone(&mid), 1);

        let engine = BackpropEngine::new(&options_with_threads(1));
        let stats = Stats::new();
        engine.run(vec![BackpropJob::new(trajectory, 1.0)], &stats);

        // iter_bottom_up visits mid then root; value flips sign each hop:
        // mid gets -1.0, root gets +1.0.
        assert!((mid.value_sum() - -1.0).abs() < 1e-6);
        assert!((root.value_sum() - 1.0).abs() < 1e-6);
        assert_eq!(stats.backprop_updates(), 2);
    }

    #[test]
    fn parallel_backprop_is_commutative_across_jobs() {
        let shared_ancestor = Arc::new(Node::leaf());
        let mut jobs = Vec::new();
        for i in 0..8 {
            let mut trajectory = Trajectory::new();
            trajectory.push_ancestor(Arc::clone(&shared_ancestor), i);
            jobs.push(BackpropJob::new(trajectory, 0.5));
        }

        let engine = BackpropEngine::new(&options_with_threads(4));
        let stats = Stats::new();
        engine.run(jobs, &stats);

        assert_eq!(shared_ancestor.visit_count(), 8);
        assert!((shared_ancestor.value_sum() - -4.0).abs() < 1e-6);
    }

    #[test]
    fn disabling_value_backprop_still_counts_visits() {
        let root = Arc::new(Node::leaf());
        let mut trajectory = Trajectory::new();
        trajectory.push_ancestor(Arc::clone(&root), 0);

        let mut options = options_with_threads(1);
        options.large_net_value_backprop = false;
        let engine = BackpropEngine::new(&options);
        let stats = Stats::new();
        engine.run(vec![BackpropJob::new(trajectory, 1.0)], &stats);

        assert_eq!(root.visit_count(), 1);
        assert!((root.value_sum() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let engine = BackpropEngine::new(&options_with_threads(2));
        let stats = Stats::new();
        engine.run(Vec::new(), &stats);
        assert_eq!(stats.backprop_updates(), 0);
    }

    #[test]
    fn partial_threshold_scales_contribution() {
        let root = Arc::new(Node::leaf());
        let mut trajectory = Trajectory::new();
        trajectory.push_ancestor(Arc::clone(&root), 0);

        let mut options = options_with_threads(1);
        options.large_net_eval_threshold = 0.25;
        let engine = BackpropEngine::new(&options);
        let stats = Stats::new();
        engine.run(vec![BackpropJob::new(trajectory, 1.0)], &stats);

        // Leaf-to-root is one hop, so value flips once: -1.0 * 0.25.
        assert_eq!(root.visit_count(), 1, "a threshold below 1.0 still counts as one visit");
        assert!((root.value_sum() - -0.25).abs() < 1e-6, "contribution must be scaled by the threshold, not dropped or full-weight");
    }

    #[test]
    fn reset_q_val_replaces_mean_without_touching_visit_count() {
        let root = Arc::new(Node::leaf());
        // Simulate prior small-net visits this node already accumulated.
        root.apply_backprop(-1.0, 0);
        root.apply_backprop(-1.0, 0);
        assert_eq!(root.visit_count(), 2);

        let mut trajectory = Trajectory::new();
        trajectory.push_ancestor(Arc::clone(&root), 0);

        let mut options = options_with_threads(1);
        options.reset_q_val = true;
        let engine = BackpropEngine::new(&options);
        let stats = Stats::new();
        engine.run(vec![BackpropJob::new(trajectory, 1.0)], &stats);

        // One hop flips the leaf value's sign to -1.0, which must now be
        // the exact mean, not blended with the two prior -1.0 updates.
        assert_eq!(root.visit_count(), 2, "reset_q_val must not change the visit count");
        assert!((root.value_mean() - -1.0).abs() < 1e-6);
    }
}
