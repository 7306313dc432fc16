use std::sync::Mutex as StdMutex;
use std::time::Instant;

use crate::backprop::{BackpropEngine, BackpropJob};
use crate::error::{MpvError, MpvResult};
use crate::logging::Logging;
use crate::node::{Node, SideToMove};
use crate::options::ThreadOptions;
use crate::predictor::{LargeNetPredictor, PredictResponse};
use crate::queue::NodeQueue;
use crate::stats::Stats;
use crate::sync::Arc;

/// The large-net consumer side of the MPV core: drains full batches from a
/// [`NodeQueue`], runs inference, distributes policy/value outputs, and
/// hands completed trajectories to a [`BackpropEngine`] (`spec.md` §4.2).
///
/// One instance exists per configured `mpv_threads` consumer; each owns its
/// own `NodeQueue` (`spec.md` §9: "the Agent owns both; each side holds only
/// non-owning handles").
pub struct SearchThread {
    queue: Arc<NodeQueue>,
    predictor: Arc<dyn LargeNetPredictor>,
    backprop: BackpropEngine,
    options: ThreadOptions,
    logging: Arc<StdMutex<Logging>>,
}

impl SearchThread {
    #[must_use]
    pub fn new(
        queue: Arc<NodeQueue>,
        predictor: Arc<dyn LargeNetPredictor>,
        backprop: BackpropEngine,
        options: ThreadOptions,
        logging: Arc<StdMutex<Logging>>,
    ) -> Self {
        Self { queue, predictor, backprop, options, logging }
    }

    /// Runs one iteration of the per-iteration protocol. Returns `Ok(false)`
    /// if no batch was ready (caller should yield and re-poll), `Ok(true)`
    /// if a batch was processed, and `Err` only for a fatal failure (queue
    /// synchronization poisoning) — an inference failure is reported through
    /// `stats` and returns `Ok(true)`, since the batch was still "processed"
    /// in the sense that the slot was reclaimed (`spec.md` §7).
    pub fn iteration(&self, stats: &Stats) -> Result<bool, MpvError> {
        let Some(batch) = self.queue.consumer_take_batch() else {
            return Ok(false);
        };

        let (nodes, sides, trajectories) = batch.take_entries();
        let planes = batch.planes().to_vec();
        let batch_len = nodes.len();

        self.queue.consumer_release_batch(batch);

        let started = Instant::now();
        match self.predictor.predict(&planes, batch_len, self.options.feature_width) {
            Ok(responses) => {
                let latency = started.elapsed();
                stats.record_batch(batch_len, latency);
                if let Ok(mut logging) = self.logging.lock() {
                    logging.log_verbose(format_args!("batch of {batch_len} evaluated in {latency:?}"));
                }

                let mut jobs = Vec::with_capacity(batch_len);
                for (((node, side), trajectory), response) in nodes.into_iter().zip(sides).zip(trajectories).zip(responses) {
                    let PredictResponse { value, policy } = response;
                    self.distribute(&node, side, policy, value as f64)?;
                    node.clear_enqueued();
                    jobs.push(BackpropJob::new(trajectory, value as f64));
                }
                self.backprop.run(jobs, stats);
                Ok(true)
            }
            Err(reason) => {
                stats.record_dropped_batch();
                for node in nodes {
                    node.clear_enqueued();
                }
                Err(MpvError::PredictionFailed { dropped: batch_len, reason })
            }
        }
    }

    /// Distributes one node's policy and value output: the policy is
    /// temperature-adjusted, then optionally sorted so higher-prior moves
    /// come first (`spec.md` §4.2 step 6, §6 `sort_policy_large_net`); the
    /// value is stored onto the node itself via [`Node::apply_backprop`],
    /// mirroring the original engine's two-step `node_assign_value` (the
    /// leaf's own value) ahead of the separate ancestor backprop pass this
    /// crate runs through [`BackpropEngine`]. No-op for terminal nodes,
    /// matching the contract that the large net must not mutate them.
    /// `side` is recorded onto the node alongside the priors (`spec.md` §3:
    /// "`SideToMove` ... needed to orient policy outputs") — the actual
    /// move-indexed reorientation is a policy-map concern owned by the
    /// move-generation layer this crate treats as external (`spec.md` §1).
    fn distribute(&self, node: &Node, side: SideToMove, policy: Vec<f32>, value: f64) -> MpvResult<()> {
        if node.is_terminal() {
            return Ok(());
        }
        let mut policy = apply_temperature(policy, self.options.policy_temperature);
        if self.options.sort_policy_large_net {
            policy.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        }
        node.set_large_net_results(policy, side)?;
        node.apply_backprop(value, 0);
        Ok(())
    }
}

/// Rescales a probability distribution by `1/temperature` and renormalizes.
/// `temperature = 1.0` is the identity; values below `1.0` sharpen the
/// distribution toward its largest entries, values above `1.0` flatten it.
fn apply_temperature(policy: Vec<f32>, temperature: f32) -> Vec<f32> {
    if (temperature - 1.0).abs() < f32::EPSILON || policy.is_empty() {
        return policy;
    }

    let exponent = 1.0 / temperature.max(f32::EPSILON);
    let mut scaled: Vec<f32> = policy.iter().map(|p| p.max(0.0).powf(exponent)).collect();
    let total: f32 = scaled.iter().sum();
    if total > 0.0 {
        for p in &mut scaled {
            *p /= total;
        }
    }
    scaled
}
