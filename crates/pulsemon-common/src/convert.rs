//! Conversion between the domain [`Metric`] and its RPC wire form.
//!
//! The proto message always carries both numeric fields; the reader picks
//! the one matching `mtype`, so a round trip preserves the payload variant.

use crate::error::ModelError;
use crate::proto;
use crate::sign;
use crate::types::{Metric, MetricKind, MetricValue};

/// Builds the wire message for a metric, signing it when a key is set.
pub fn to_wire(m: &Metric, key: Option<&str>) -> proto::Metric {
    let hash = match key {
        Some(key) => sign::compute(m, key),
        None => m.hash.clone().unwrap_or_default(),
    };
    let (delta, value) = match m.value {
        MetricValue::Gauge(v) => (0, v),
        MetricValue::Counter(d) => (d, 0.0),
    };
    proto::Metric {
        id: m.id.clone(),
        mtype: m.kind().to_string(),
        delta,
        value,
        hash,
    }
}

/// Parses a wire message back into a metric. Fails on an unknown `mtype`.
pub fn from_wire(pm: &proto::Metric) -> Result<Metric, ModelError> {
    let kind: MetricKind = pm.mtype.parse()?;
    let value = match kind {
        MetricKind::Gauge => MetricValue::Gauge(pm.value),
        MetricKind::Counter => MetricValue::Counter(pm.delta),
    };
    let hash = if pm.hash.is_empty() {
        None
    } else {
        Some(pm.hash.clone())
    };
    Ok(Metric {
        id: pm.id.clone(),
        value,
        hash,
    })
}
