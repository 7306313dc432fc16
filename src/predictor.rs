/// The neural-net runtime is an external collaborator (`spec.md` §1): this
/// trait is the opaque `predict(inputs, value_out, policy_out)` boundary the
/// Large-Net Search Thread calls through. A real engine backs this with
/// whatever GPU inference stack it uses; tests back it with a deterministic
/// mock.
pub trait LargeNetPredictor: Send + Sync {
    /// Runs inference over `batch_size` positions, each `feature_width`
    /// floats wide, packed contiguously in `planes` (slot `i` starts at
    /// `i * feature_width`). Returns one [`PredictResponse`] per slot, in
    /// slot order.
    ///
    /// # Errors
    ///
    /// Returns `Err` if inference fails; the caller drops the whole batch
    /// without partially writing any node (`spec.md` §4.2 "Failure").
    fn predict(&self, planes: &[f32], batch_size: usize, feature_width: usize) -> Result<Vec<PredictResponse>, String>;
}

/// One slot's worth of large-net output.
#[derive(Clone, Debug)]
pub struct PredictResponse {
    pub value: f32,
    pub policy: Vec<f32>,
}

impl PredictResponse {
    #[must_use]
    pub fn new(value: f32, policy: Vec<f32>) -> Self {
        Self { value, policy }
    }
}
