//! HMAC-SHA256 integrity tags over the canonical metric string.
//!
//! The canonical form is `"<id>:gauge:<value>"` with the value printed to
//! six fractional digits, or `"<id>:counter:<delta>"` in plain decimal.
//! Agent and collector must agree byte-for-byte, so the formatting here is
//! the contract.

use crate::error::ModelError;
use crate::types::{Metric, MetricValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical string a metric's tag is computed over.
pub fn canonical_string(m: &Metric) -> String {
    match m.value {
        MetricValue::Gauge(v) => format!("{}:gauge:{:.6}", m.id, v),
        MetricValue::Counter(d) => format!("{}:counter:{}", m.id, d),
    }
}

fn mac(m: &Metric, key: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(canonical_string(m).as_bytes());
    mac
}

/// Hex-encoded HMAC-SHA256 tag for the metric under `key`.
pub fn compute(m: &Metric, key: &str) -> String {
    hex::encode(mac(m, key).finalize().into_bytes())
}

/// Copy of the metric with its tag filled in.
pub fn signed(m: &Metric, key: &str) -> Metric {
    let mut out = m.clone();
    out.hash = Some(compute(m, key));
    out
}

/// Recomputes the tag and compares it against the carried one in constant
/// time. A missing tag counts as a mismatch.
pub fn verify(m: &Metric, key: &str) -> Result<(), ModelError> {
    let carried = m.hash.as_deref().ok_or_else(|| ModelError::HashMismatch {
        id: m.id.clone(),
    })?;
    let carried = hex::decode(carried).map_err(|_| ModelError::BadHashEncoding {
        id: m.id.clone(),
    })?;
    mac(m, key)
        .verify_slice(&carried)
        .map_err(|_| ModelError::HashMismatch { id: m.id.clone() })
}
