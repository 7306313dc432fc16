//! The Multi-Policy-Value (MPV) batching and backpropagation core of a
//! two-network Monte-Carlo Tree Search engine.
//!
//! This crate bridges a cheap small network (queried on every leaf
//! expansion, out of scope here) and an expensive large network (queried on
//! a filtered subset of promising leaves). It owns: a lock-free
//! double-buffered batching queue ([`queue::NodeQueue`]), the consumer
//! thread that drains it and runs inference ([`search_thread::SearchThread`]),
//! a multi-threaded backpropagation engine ([`backprop::BackpropEngine`]),
//! and the [`agent::Agent`] that wires them together and owns their
//! lifecycle.

pub mod agent;
pub mod backprop;
pub mod error;
pub mod logging;
pub mod node;
pub mod options;
pub mod predictor;
pub mod queue;
pub mod search_thread;
pub mod stats;
pub mod sync;

pub use agent::{Agent, AgentState};
pub use error::{MpvError, MpvResult};
pub use logging::Logging;
pub use node::{Node, SideToMove, Trajectory};
pub use options::MpvOptions;
pub use predictor::{LargeNetPredictor, PredictResponse};
pub use queue::NodeQueue;
pub use stats::Stats;
