//! Tolerant wire parsing shared by the HTTP and gRPC ingest paths.
//!
//! A batch entry with an unaddressable name, an unknown kind or a missing
//! numeric field is dropped; the rest of the batch still commits. Callers
//! that want strictness (the single-metric endpoints) check the drop count.

use serde::Deserialize;

use collector_core::{is_valid_name, Batch, Metric, MetricKind};

/// A metric as it arrives, before any validation.
#[derive(Debug, Deserialize)]
pub struct WireMetric {
    /// Claimed metric name.
    #[serde(rename = "id")]
    pub name: String,
    /// Claimed kind, not yet known to be `gauge` or `counter`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Counter increment, if any.
    #[serde(default)]
    pub delta: Option<i64>,
    /// Gauge reading, if any.
    #[serde(default)]
    pub value: Option<f64>,
}

impl WireMetric {
    /// Validate into a typed metric.
    pub fn validate(self) -> Option<Metric> {
        if !is_valid_name(&self.name) {
            return None;
        }
        let kind: MetricKind = self.kind.parse().ok()?;
        let metric = Metric {
            name: self.name,
            kind,
            delta: self.delta,
            value: self.value,
        };
        metric.is_valid().then_some(metric)
    }
}

/// The outcome of parsing a batch body.
pub struct ParsedBatch {
    /// Entries that passed validation, in arrival order.
    pub accepted: Batch,
    /// How many entries were dropped.
    pub dropped: usize,
}

/// Parse a JSON batch body, silently dropping invalid entries.
pub fn parse_batch(body: &[u8]) -> Result<ParsedBatch, serde_json::Error> {
    let raw: Vec<WireMetric> = serde_json::from_slice(body)?;
    let total = raw.len();
    let accepted: Batch = raw.into_iter().filter_map(WireMetric::validate).collect();
    Ok(ParsedBatch {
        dropped: total - accepted.len(),
        accepted,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_entries_are_dropped_and_valid_kept() {
        let body = br#"[
            {"id":"bad**name","type":"gauge","value":1},
            {"id":"Ok","type":"gauge","value":7},
            {"id":"Histo","type":"histogram","value":7},
            {"id":"NoField","type":"counter"}
        ]"#;
        let parsed = parse_batch(body).unwrap();
        assert_eq!(parsed.dropped, 3);
        assert_eq!(parsed.accepted.len(), 1);
        assert_eq!(parsed.accepted[0].name, "Ok");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_batch(b"not json").is_err());
    }

    #[test]
    fn order_is_preserved() {
        let body = br#"[
            {"id":"PollCount","type":"counter","delta":3},
            {"id":"PollCount","type":"counter","delta":5}
        ]"#;
        let parsed = parse_batch(body).unwrap();
        assert_eq!(parsed.accepted.len(), 2);
        assert_eq!(parsed.accepted[0].delta, Some(3));
        assert_eq!(parsed.accepted[1].delta, Some(5));
    }
}
