use crate::types::MetricKind;

/// Errors produced while decoding or validating metrics.
///
/// `UnknownKind` and `PayloadMismatch` are wire parse failures; the hash
/// variants are integrity failures. Both classes are caller errors and map
/// to 400 / invalid-argument at the transports.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The `type` field is neither `gauge` nor `counter`.
    #[error("unknown metric type '{0}'")]
    UnknownKind(String),

    /// The payload field does not match the declared kind, or both payload
    /// fields were supplied at once.
    #[error("metric '{id}': payload does not match kind {kind}")]
    PayloadMismatch { id: String, kind: MetricKind },

    /// The hash field is not valid hex.
    #[error("metric '{id}': hash is not valid hex")]
    BadHashEncoding { id: String },

    /// The hash field is absent or does not match the recomputed tag.
    #[error("metric '{id}': hash mismatch")]
    HashMismatch { id: String },
}
