use std::sync::Mutex as StdMutex;
use std::time::Duration;

use crate::backprop::BackpropEngine;
use crate::error::{MpvError, MpvResult};
use crate::logging::Logging;
use crate::node::{Node, SideToMove, Trajectory};
use crate::options::{MpvOptions, ThreadOptions};
use crate::predictor::LargeNetPredictor;
use crate::queue::NodeQueue;
use crate::search_thread::SearchThread;
use crate::stats::Stats;
use crate::sync::{Arc, AtomicBool, Ordering};

/// Lifecycle state of an [`Agent`] (`spec.md` §4.4: `idle → running →
/// stopping → idle`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Stopping,
}

/// Owns the Node-Queue(s) and large-net consumer threads, and coordinates
/// their lifecycle. Small-net search workers are out of scope for this
/// crate (`spec.md` §1) — callers drive them externally and call
/// [`Agent::submit`] whenever one decides a leaf is worth large-net
/// evaluation.
///
/// One [`NodeQueue`] + [`SearchThread`] pair is spawned per configured
/// `mpv_threads`, matching `spec.md` §4.4 ("one Large-Net Search Thread per
/// configured `mpv_threads`"). Cyclic ownership between queue and consumer
/// is avoided by construction: the Agent is the sole owner of both, and
/// each `SearchThread` only holds a non-owning `Arc` handle to its queue
/// (`spec.md` §9).
pub struct Agent {
    queues: Vec<Arc<NodeQueue>>,
    predictor: Arc<dyn LargeNetPredictor>,
    thread_options: ThreadOptions,
    backprop_threads: usize,
    logging: Arc<StdMutex<Logging>>,
    stats: Arc<Stats>,
    state: AgentState,
    workers: Vec<std::thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Agent {
    #[must_use]
    pub fn new(predictor: Arc<dyn LargeNetPredictor>, mut options: MpvOptions) -> Self {
        let queues = (0..options.mpv_threads.max(1))
            .map(|_| Arc::new(NodeQueue::new(options.large_net_batch_size, options.feature_width)))
            .collect::<Vec<_>>();
        let thread_options = options.thread_options();
        let backprop_threads = options.large_net_backprop_threads;
        let logging = std::mem::replace(&mut options.logging, Logging::Disabled);

        Self {
            queues,
            predictor,
            thread_options,
            backprop_threads,
            logging: Arc::new(StdMutex::new(logging)),
            stats: Arc::new(Stats::new()),
            state: AgentState::Idle,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Tests-and-sets the node's enqueued flag and submits it to one of the
    /// Agent's queues (chosen by a cheap hash of the node's address, since
    /// `spec.md` §6 leaves queue selection among `mpv_threads` unspecified).
    /// Returns `Err(MpvError::DuplicateEnqueue)` if the node was already
    /// enqueued.
    pub fn submit(&self, node: Arc<Node>, side: SideToMove, trajectory: Trajectory, planes: &[f32]) -> MpvResult<()> {
        if !node.try_mark_enqueued() {
            return Err(MpvError::DuplicateEnqueue);
        }

        let address = std::ptr::addr_of!(*node) as usize;
        let queue_index = (address >> 4) % self.queues.len();
        let queue = &self.queues[queue_index];

        match queue.reserve_slot() {
            Some(slot) => {
                queue.write_slot(slot, node, side, trajectory, planes);
                Ok(())
            }
            None => {
                // Consumer was stopped mid-wait; the node was never queued,
                // so undo the mark (`spec.md` §7 "stop during over-capacity
                // wait").
                node.clear_enqueued();
                Ok(())
            }
        }
    }

    /// Starts the configured large-net consumer threads. Per `spec.md`
    /// §4.4: "set `consumer_active = true` on the queue, then spawn
    /// consumer(s)". Small-net workers are started by the caller afterward.
    pub fn start(&mut self) {
        if self.state != AgentState::Idle {
            return;
        }

        self.shutdown.store(false, Ordering::Release);
        for queue in &self.queues {
            // Activating never touches the swap mutex, so this can't fail.
            let _ = queue.set_consumer_active(true);
        }

        self.log(format_args!("agent starting {} consumer thread(s)", self.queues.len()));

        for queue in &self.queues {
            let queue = Arc::clone(queue);
            let predictor = Arc::clone(&self.predictor);
            let options = self.thread_options;
            let stats = Arc::clone(&self.stats);
            let shutdown = Arc::clone(&self.shutdown);
            let backprop_threads = self.backprop_threads;
            let value_backprop = options.large_net_value_backprop;
            let reset_q_val = options.reset_q_val;
            let threshold = options.large_net_eval_threshold;
            let logging = Arc::clone(&self.logging);

            let handle = std::thread::spawn(move || {
                let backprop = BackpropEngine::from_parts(backprop_threads, value_backprop, reset_q_val, threshold);
                let search_thread = SearchThread::new(queue, predictor, backprop, options, logging);
                while !shutdown.load(Ordering::Acquire) {
                    match search_thread.iteration(&stats) {
                        Ok(true) => {}
                        Ok(false) => std::thread::sleep(Duration::from_micros(50)),
                        Err(MpvError::QueuePoisoned) => break,
                        Err(_) => {}
                    }
                }
            });
            self.workers.push(handle);
        }

        self.state = AgentState::Running;
    }

    /// Signals all consumer threads to exit, joins them, then clears
    /// pending queue state so the tree can be reused without orphaned
    /// `enqueued` flags (`spec.md` §4.4 "stop").
    ///
    /// # Errors
    /// Returns `Err(MpvError::QueuePoisoned)` if any queue's swap mutex was
    /// poisoned while draining it (`SPEC_FULL.md` §7: this is the one
    /// condition propagated out of the agent rather than absorbed into a
    /// counter). Consumer threads are still signalled and joined even when
    /// this happens, so the agent never leaks a running thread.
    pub fn stop(&mut self) -> MpvResult<()> {
        if self.state != AgentState::Running {
            return Ok(());
        }
        self.state = AgentState::Stopping;
        self.log(format_args!("agent stopping"));

        self.shutdown.store(true, Ordering::Release);
        let mut result = Ok(());
        for queue in &self.queues {
            if let Err(err) = queue.set_consumer_active(false) {
                result = Err(err);
            }
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        self.state = AgentState::Idle;
        result
    }

    /// Resets queue state between searches without tearing down threads,
    /// for the tree-reuse path (`spec.md` §4.4 "reset").
    ///
    /// # Errors
    /// Returns `Err(MpvError::QueuePoisoned)` under the same condition as
    /// [`Agent::stop`].
    pub fn reset_for_new_search(&self) -> MpvResult<()> {
        for queue in &self.queues {
            queue.reset_for_new_search()?;
        }
        Ok(())
    }

    pub fn record_tablebase_hit(&self) {
        self.stats.record_tablebase_hit();
    }

    fn log(&self, message: std::fmt::Arguments) {
        if let Ok(mut logging) = self.logging.lock() {
            logging.log(message);
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // A drop can't propagate an error; a poisoned queue is already
        // fatal to the search that owned it, and there is no caller left
        // to hand `MpvError::QueuePoisoned` to.
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PredictResponse;

    struct StubPredictor;

    impl LargeNetPredictor for StubPredictor {
        fn predict(&self, _planes: &[f32], batch_size: usize, _feature_width: usize) -> Result<Vec<PredictResponse>, String> {
            Ok((0..batch_size).map(|_| PredictResponse::new(0.1, vec![1.0])).collect())
        }
    }

    fn agent_with_batch_size(batch_size: usize) -> Agent {
        let options = MpvOptions::new(batch_size, 1, 1);
        Agent::new(Arc::new(StubPredictor), options)
    }

    #[test]
    fn idle_agent_rejects_submissions_gracefully() {
        let agent = agent_with_batch_size(2);
        let node = Arc::new(Node::leaf());
        // consumer_active defaults to false until start(); reserve_slot
        // short-circuits immediately rather than spinning forever.
        let result = agent.submit(node, SideToMove::First, Trajectory::new(), &[0.0]);
        assert!(result.is_ok());
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let mut agent = agent_with_batch_size(4);
        agent.start();
        let node = Arc::new(Node::leaf());
        agent.submit(Arc::clone(&node), SideToMove::First, Trajectory::new(), &[0.0]).unwrap();

        let err = agent.submit(node, SideToMove::First, Trajectory::new(), &[0.0]).unwrap_err();
        assert!(matches!(err, MpvError::DuplicateEnqueue));
        agent.stop().unwrap();
    }

    #[test]
    fn start_stop_is_idempotent_and_quiescent() {
        let mut agent = agent_with_batch_size(2);
        agent.start();
        assert_eq!(agent.state(), AgentState::Running);
        agent.start(); // no-op while already running
        assert_eq!(agent.workers.len(), 1);

        agent.stop().unwrap();
        agent.stop().unwrap(); // no-op while already idle
        assert_eq!(agent.state(), AgentState::Idle);
        assert!(agent.workers.is_empty());
    }
}
