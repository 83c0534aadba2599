use std::collections::BTreeMap;
use std::fmt;

/// Metric name to value for one feature.
pub type Metrics = BTreeMap<String, f64>;

/// Identifier of a classified feature: integer or string.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(untagged)]
pub enum FeatureId {
    /// Numeric id, as most feature tables use.
    Int(i64),
    /// Free-form id.
    Text(String),
}

impl FeatureId {
    /// Parse a table cell: integers become [`FeatureId::Int`], anything else is kept as text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        trimmed
            .parse::<i64>()
            .map(FeatureId::Int)
            .unwrap_or_else(|_| FeatureId::Text(trimmed.to_string()))
    }
}

impl From<i64> for FeatureId {
    fn from(id: i64) -> Self {
        FeatureId::Int(id)
    }
}

impl From<&str> for FeatureId {
    fn from(id: &str) -> Self {
        FeatureId::Text(id.to_string())
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Int(id) => write!(f, "{id}"),
            FeatureId::Text(id) => f.write_str(id),
        }
    }
}

/// One feature: its id, numeric metrics, and non-numeric attributes.
///
/// Attributes are carried for filtering and never read by split rules.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureRecord {
    /// Feature identifier. Not required to be unique across records.
    pub id: FeatureId,
    /// Numeric metrics by name.
    #[serde(default)]
    pub metrics: Metrics,
    /// Non-numeric attributes by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl FeatureRecord {
    /// Create a record with no metrics or attributes.
    pub fn new(id: impl Into<FeatureId>) -> Self {
        Self {
            id: id.into(),
            metrics: Metrics::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add or replace a metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Add or replace an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Return a metric value, treating NaN as absent.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        lookup(&self.metrics, name)
    }

    /// Return an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Read a metric, treating NaN as absent.
#[must_use]
pub fn lookup(metrics: &Metrics, name: &str) -> Option<f64> {
    metrics.get(name).copied().filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::{FeatureId, FeatureRecord};

    #[test]
    fn parse_integer_id() {
        assert_eq!(FeatureId::parse(" 42 "), FeatureId::Int(42));
        assert_eq!(FeatureId::parse("f-42"), FeatureId::Text("f-42".into()));
    }

    #[test]
    fn untagged_serde() {
        assert_eq!(serde_json::to_string(&FeatureId::Int(7)).unwrap(), "7");
        let id: FeatureId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, FeatureId::Text("abc".into()));
    }

    #[test]
    fn nan_metric_is_absent() {
        let record = FeatureRecord::new(1i64).with_metric("a", f64::NAN).with_metric("b", 0.5);
        assert_eq!(record.metric("a"), None);
        assert_eq!(record.metric("b"), Some(0.5));
        assert_eq!(record.metric("c"), None);
    }

    #[test]
    fn attributes_are_separate_from_metrics() {
        let record = FeatureRecord::new("x").with_attribute("llm_explainer", "gpt");
        assert_eq!(record.attribute("llm_explainer"), Some("gpt"));
        assert!(record.metrics.is_empty());
    }
}
