use crate::logging::Logging;

/// Configuration surface for the MPV core (`spec.md` §6).
///
/// Loading these values from a file or CLI is out of scope for this crate —
/// callers construct an `MpvOptions` however suits their engine and hand it
/// to [`crate::agent::Agent::new`].
#[derive(Debug)]
pub struct MpvOptions {
    /// `B`: slab width, and the `predict` batch size.
    pub large_net_batch_size: usize,
    /// `F`: feature width per position.
    pub feature_width: usize,
    /// Number of large-net consumer threads, one Node-Queue each.
    pub mpv_threads: usize,
    /// `K`: parallel backprop workers spawned per drained batch.
    pub large_net_backprop_threads: usize,
    /// Mixing weight applied to large-net value contributions during
    /// backprop; see `spec.md` §4.3.
    pub large_net_eval_threshold: f32,
    /// If false, priors are updated but value backprop is skipped entirely.
    pub large_net_value_backprop: bool,
    /// If true, the large-net value replaces the running mean; if false it
    /// is blended in. See `spec.md` §9 Open Questions.
    pub reset_q_val: bool,
    /// Sort unexpanded moves by large-net policy priors after distribution.
    pub sort_policy_large_net: bool,
    /// Magnitude of the virtual-loss compensation applied/removed during
    /// backprop.
    pub virtual_loss: i32,
    /// Temperature applied to the large-net policy before it is stored onto
    /// a node's priors (`spec.md` §4.2 step 6, and `SPEC_FULL.md` §9).
    pub policy_temperature: f32,
    /// Where lifecycle and (optionally) per-batch events are logged.
    pub logging: Logging,
}

impl MpvOptions {
    #[must_use]
    pub fn new(large_net_batch_size: usize, feature_width: usize, mpv_threads: usize) -> Self {
        Self {
            large_net_batch_size,
            feature_width,
            mpv_threads,
            ..Self::default()
        }
    }

    /// The `Copy` subset of these options a search/backprop thread needs on
    /// every iteration. Split out from `MpvOptions` itself because `Logging`
    /// holds a boxed writer and is shared via its own handle instead
    /// (`spec.md` §4.4: threads are spawned by the Agent, which is the only
    /// owner of the full configuration).
    #[must_use]
    pub fn thread_options(&self) -> ThreadOptions {
        ThreadOptions {
            large_net_batch_size: self.large_net_batch_size,
            feature_width: self.feature_width,
            large_net_eval_threshold: self.large_net_eval_threshold,
            large_net_value_backprop: self.large_net_value_backprop,
            reset_q_val: self.reset_q_val,
            sort_policy_large_net: self.sort_policy_large_net,
            virtual_loss: self.virtual_loss,
            policy_temperature: self.policy_temperature,
        }
    }
}

/// `Copy` snapshot of the per-iteration tunables, handed to each large-net
/// search thread at spawn time.
#[derive(Clone, Copy, Debug)]
pub struct ThreadOptions {
    pub large_net_batch_size: usize,
    pub feature_width: usize,
    pub large_net_eval_threshold: f32,
    pub large_net_value_backprop: bool,
    pub reset_q_val: bool,
    pub sort_policy_large_net: bool,
    pub virtual_loss: i32,
    pub policy_temperature: f32,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            large_net_batch_size: 64,
            feature_width: 1,
            mpv_threads: 1,
            large_net_backprop_threads: 2,
            large_net_eval_threshold: 0.5,
            large_net_value_backprop: true,
            reset_q_val: false,
            sort_policy_large_net: false,
            virtual_loss: 3,
            policy_temperature: 1.0,
            logging: Logging::default(),
        }
    }
}
