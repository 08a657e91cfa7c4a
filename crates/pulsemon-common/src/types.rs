use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a metric: a gauge is replaced on every write, a counter
/// accumulates deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(ModelError::UnknownKind(s.to_string())),
        }
    }
}

/// Payload of a metric. The variant always matches the metric kind; a
/// metric never carries both a delta and a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Numeric view used by the HTML listing, where counters are shown as
    /// plain numbers next to gauges.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Gauge(v) => *v,
            MetricValue::Counter(d) => *d as f64,
        }
    }
}

/// A named metric with an optional integrity tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetric", into = "RawMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
    pub hash: Option<String>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
            hash: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
            hash: None,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// Wire shape of a metric: `{id, type, delta?/value?, hash?}`. Kept private
/// so the kind/payload match is enforced the moment a metric enters the
/// process.
#[derive(Serialize, Deserialize)]
struct RawMetric {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl TryFrom<RawMetric> for Metric {
    type Error = ModelError;

    fn try_from(raw: RawMetric) -> Result<Self, Self::Error> {
        let kind: MetricKind = raw.kind.parse()?;
        let value = match (kind, raw.value, raw.delta) {
            (MetricKind::Gauge, Some(v), None) => MetricValue::Gauge(v),
            (MetricKind::Counter, None, Some(d)) => MetricValue::Counter(d),
            _ => {
                return Err(ModelError::PayloadMismatch { id: raw.id, kind });
            }
        };
        Ok(Metric {
            id: raw.id,
            value,
            hash: raw.hash,
        })
    }
}

impl From<Metric> for RawMetric {
    fn from(m: Metric) -> Self {
        let kind = m.kind().to_string();
        let (value, delta) = match m.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        RawMetric {
            id: m.id,
            kind,
            delta,
            value,
            hash: m.hash,
        }
    }
}

/// In-memory mapping from metric id to its last-known value.
///
/// Both the agent registry and the collector table use the same merge
/// rules: counters accumulate, gauges overwrite. Callers are expected to
/// guard the table with an exclusive lock; the table itself is plain data.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    metrics: HashMap<String, Metric>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a metric into the table. An incoming counter adds its delta
    /// to a stored counter of the same id (invalidating any stale tag);
    /// everything else replaces the slot.
    pub fn apply(&mut self, m: Metric) {
        if let MetricValue::Counter(delta) = m.value {
            if let Some(entry) = self.metrics.get_mut(&m.id) {
                if let MetricValue::Counter(stored) = entry.value {
                    entry.value = MetricValue::Counter(stored + delta);
                    entry.hash = None;
                    return;
                }
            }
        }
        self.metrics.insert(m.id.clone(), m);
    }

    /// Replaces the slot outright, bypassing counter accumulation. Used for
    /// the agent's PollCount reset.
    pub fn insert(&mut self, m: Metric) {
        self.metrics.insert(m.id.clone(), m);
    }

    pub fn get(&self, id: &str) -> Option<&Metric> {
        self.metrics.get(id)
    }

    /// Owned copy of the current table, in no particular order.
    pub fn snapshot(&self) -> Vec<Metric> {
        self.metrics.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_json_round_trip() {
        let m = Metric::gauge("Alloc", 1.5);
        let ser = serde_json::to_string(&m).unwrap();
        assert_eq!(ser, r#"{"id":"Alloc","type":"gauge","value":1.5}"#);
        let back: Metric = serde_json::from_str(&ser).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn counter_json_round_trip() {
        let m = Metric::counter("PollCount", 42);
        let ser = serde_json::to_string(&m).unwrap();
        assert_eq!(ser, r#"{"id":"PollCount","type":"counter","delta":42}"#);
        let back: Metric = serde_json::from_str(&ser).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = serde_json::from_str::<Metric>(r#"{"id":"x","type":"timer","value":1.0}"#);
        assert!(err.is_err());
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        // counter carrying a gauge payload
        assert!(serde_json::from_str::<Metric>(r#"{"id":"x","type":"counter","value":1.0}"#).is_err());
        // both payloads at once
        assert!(
            serde_json::from_str::<Metric>(r#"{"id":"x","type":"gauge","value":1.0,"delta":1}"#)
                .is_err()
        );
    }

    #[test]
    fn counters_accumulate() {
        let mut table = MetricTable::new();
        table.apply(Metric::counter("PollCount", 3));
        table.apply(Metric::counter("PollCount", 2));
        assert_eq!(
            table.get("PollCount").unwrap().value,
            MetricValue::Counter(5)
        );
    }

    #[test]
    fn zero_delta_is_identity() {
        let mut table = MetricTable::new();
        table.apply(Metric::counter("PollCount", 7));
        table.apply(Metric::counter("PollCount", 0));
        assert_eq!(
            table.get("PollCount").unwrap().value,
            MetricValue::Counter(7)
        );
    }

    #[test]
    fn gauges_overwrite() {
        let mut table = MetricTable::new();
        table.apply(Metric::gauge("Alloc", 1.0));
        table.apply(Metric::gauge("Alloc", 2.5));
        assert_eq!(table.get("Alloc").unwrap().value, MetricValue::Gauge(2.5));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn counter_accumulation_drops_stale_hash() {
        let mut table = MetricTable::new();
        let mut first = Metric::counter("PollCount", 1);
        first.hash = Some("deadbeef".to_string());
        table.apply(first);
        table.apply(Metric::counter("PollCount", 1));
        assert!(table.get("PollCount").unwrap().hash.is_none());
    }

    #[test]
    fn insert_replaces_counter() {
        let mut table = MetricTable::new();
        table.apply(Metric::counter("PollCount", 9));
        table.insert(Metric::counter("PollCount", 0));
        assert_eq!(
            table.get("PollCount").unwrap().value,
            MetricValue::Counter(0)
        );
    }
}
