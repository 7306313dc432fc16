use thiserror::Error;

/// Errors the MPV core can surface to its caller.
///
/// Most failures described in the design (an inference call failing, a
/// producer racing a stop) are handled locally and only observable through
/// [`crate::stats::Stats`] counters — they never reach this type. `MpvError`
/// is reserved for the conditions that are genuinely fatal to the search.
#[derive(Debug, Error)]
pub enum MpvError {
    /// `net.predict` returned an error. The batch of `dropped` requests was
    /// discarded and their nodes' `enqueued_for_large_net` flags were cleared
    /// so they can be resubmitted later.
    #[error("large-net prediction failed for a batch of {dropped} requests: {reason}")]
    PredictionFailed { dropped: usize, reason: String },

    /// A node was submitted while its `enqueued_for_large_net` flag was
    /// already set. In debug builds this is additionally a `debug_assert!`;
    /// in release builds the submission is skipped and this is only
    /// constructed for logging.
    #[error("node was already enqueued for large-net evaluation")]
    DuplicateEnqueue,

    /// The swap mutex or a per-node lock was poisoned by a panicking holder.
    /// Unlike the two variants above, this is treated as fatal: it is
    /// propagated out of [`crate::agent::Agent`] and terminates the search.
    #[error("node-queue synchronization state was poisoned by a panicking thread")]
    QueuePoisoned,
}

pub type MpvResult<T> = Result<T, MpvError>;
