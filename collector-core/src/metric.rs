use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Names are limited to alphanumerics, `/` and space, at most 40 chars.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-zA-Z/ ]{1,40}$").expect("static regex"));

/// The two metric kinds. They share a transport namespace but live in
/// separate mappings in the store, so a gauge and a counter may carry the
/// same name without colliding.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Latest write wins.
    Gauge,
    /// Additive on ingest, replacing on snapshot restore.
    Counter,
}

/// A metric in wire form. `value` is present iff the kind is gauge, `delta`
/// iff the kind is counter; the absent numeric field is omitted from the
/// JSON encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    #[serde(rename = "id")]
    pub name: String,
    /// Metric kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    /// A gauge sample.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// A counter increment.
    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Whether the metric is well-formed: valid name and the numeric field
    /// matching its kind.
    pub fn is_valid(&self) -> bool {
        if !is_valid_name(&self.name) {
            return false;
        }
        match self.kind {
            MetricKind::Gauge => self.value.is_some(),
            MetricKind::Counter => self.delta.is_some(),
        }
    }

    /// The carried value rendered the way the text endpoints expect it:
    /// floats in shortest round-trip form, integers in decimal.
    pub fn display_value(&self) -> String {
        match self.kind {
            MetricKind::Gauge => format_gauge(self.value.unwrap_or_default()),
            MetricKind::Counter => self.delta.unwrap_or_default().to_string(),
        }
    }
}

/// An ordered sequence of transport metrics committed together.
pub type Batch = Vec<Metric>;

/// Whether `name` is addressable: `^[0-9a-zA-Z/ ]{1,40}$`.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Shortest round-trip rendering of a gauge reading.
pub fn format_gauge(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gauge_omits_delta_on_the_wire() {
        let json = serde_json::to_string(&Metric::gauge("Alloc", 1.5)).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":1.5}"#);
    }

    #[test]
    fn counter_omits_value_on_the_wire() {
        let json = serde_json::to_string(&Metric::counter("PollCount", 3)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":3}"#);
    }

    #[test]
    fn batch_round_trips_in_order() {
        let batch: Batch = vec![
            Metric::counter("PollCount", 8),
            Metric::gauge("Alloc", 2.25),
        ];
        let bytes = serde_json::to_vec(&batch).unwrap();
        let back: Batch = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_name("PollCount"));
        assert!(is_valid_name("cpu/0 usage"));
        assert!(!is_valid_name("bad**name"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"x".repeat(41)));
    }

    #[test]
    fn kind_parses_from_path_segments() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!(
            "counter".parse::<MetricKind>().unwrap(),
            MetricKind::Counter
        );
        assert!("histogram".parse::<MetricKind>().is_err());
    }

    #[test]
    fn display_values() {
        assert_eq!(Metric::gauge("A", 2.25).display_value(), "2.25");
        assert_eq!(Metric::gauge("A", 3.0).display_value(), "3");
        assert_eq!(Metric::counter("C", 8).display_value(), "8");
    }

    #[test]
    fn mismatched_numeric_field_is_invalid() {
        let m = Metric {
            name: "Ok".into(),
            kind: MetricKind::Gauge,
            delta: Some(1),
            value: None,
        };
        assert!(!m.is_valid());
    }
}
