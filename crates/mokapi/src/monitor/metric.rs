//! Labelled counters and gauges.
//!
//! Values live in prometheus cells. A `CounterMap` wraps a `CounterVec` and
//! remembers the label tuples it handed out, in creation order, so they can be
//! enumerated and reset without being dropped.

use parking_lot::Mutex;
use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{CounterVec, GaugeVec, Opts};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use std::sync::Arc;

/// Errors raised by metric lookups
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("metric {name} expects {expected} label values, got {actual}")]
    LabelCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Name, namespace and label names of a metric.
#[derive(Debug, Clone)]
pub struct MetricInfo {
    pub namespace: String,
    pub name: String,
    pub labels: Vec<String>,
}

impl MetricInfo {
    pub fn new(namespace: &str, name: &str, labels: &[&str]) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn opts(&self) -> Opts {
        let name = self.fq_name();
        Opts::new(name.clone(), name)
    }

    /// `namespace_name`
    pub fn fq_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }
}

/// One labelled value as exposed by queries and JSON output.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub namespace: String,
    pub fq_name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    /// `fqname{label="value",...}`
    pub fn display_name(&self) -> String {
        if self.labels.is_empty() {
            return self.fq_name.clone();
        }
        let mut s = String::new();
        s.push_str(&self.fq_name);
        s.push('{');
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            let _ = write!(s, "{k}=\"{v}\"");
        }
        s.push('}');
        s
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Sample", 2)?;
        s.serialize_field("name", &self.display_name())?;
        s.serialize_field("value", &self.value)?;
        s.end()
    }
}

/// Anything the registry can enumerate.
pub trait Metric: Send + Sync {
    fn info(&self) -> &MetricInfo;
    fn samples(&self) -> Vec<Sample>;
    fn reset(&self);
}

fn sample(info: &MetricInfo, label_values: &[String], value: f64) -> Sample {
    Sample {
        namespace: info.namespace.clone(),
        fq_name: info.fq_name(),
        labels: info
            .labels
            .iter()
            .cloned()
            .zip(label_values.iter().cloned())
            .collect(),
        value,
    }
}

/// Monotonic counter.
pub struct Counter {
    info: MetricInfo,
    label_values: Vec<String>,
    cell: GenericCounter<AtomicF64>,
}

impl Counter {
    pub fn new(info: MetricInfo) -> Result<Self, MetricError> {
        let cell = GenericCounter::with_opts(info.opts())?;
        Ok(Self::with_cell(info, Vec::new(), cell))
    }

    fn with_cell(info: MetricInfo, label_values: Vec<String>, cell: GenericCounter<AtomicF64>) -> Self {
        Self {
            info,
            label_values,
            cell,
        }
    }

    pub fn inc(&self) {
        self.cell.inc();
    }

    /// Panics in debug builds when `v` is negative.
    pub fn add(&self, v: f64) {
        self.cell.inc_by(v);
    }

    pub fn value(&self) -> f64 {
        self.cell.get()
    }

    fn sample(&self) -> Sample {
        sample(&self.info, &self.label_values, self.value())
    }
}

impl Metric for Counter {
    fn info(&self) -> &MetricInfo {
        &self.info
    }

    fn samples(&self) -> Vec<Sample> {
        vec![self.sample()]
    }

    fn reset(&self) {
        self.cell.reset();
    }
}

/// Settable value.
pub struct Gauge {
    info: MetricInfo,
    label_values: Vec<String>,
    cell: GenericGauge<AtomicF64>,
}

impl Gauge {
    pub fn new(info: MetricInfo) -> Result<Self, MetricError> {
        let cell = GenericGauge::with_opts(info.opts())?;
        Ok(Self::with_cell(info, Vec::new(), cell))
    }

    fn with_cell(info: MetricInfo, label_values: Vec<String>, cell: GenericGauge<AtomicF64>) -> Self {
        Self {
            info,
            label_values,
            cell,
        }
    }

    pub fn set(&self, v: f64) {
        self.cell.set(v);
    }

    pub fn add(&self, v: f64) {
        self.cell.add(v);
    }

    pub fn value(&self) -> f64 {
        self.cell.get()
    }

    fn sample(&self) -> Sample {
        sample(&self.info, &self.label_values, self.value())
    }
}

impl Metric for Gauge {
    fn info(&self) -> &MetricInfo {
        &self.info
    }

    fn samples(&self) -> Vec<Sample> {
        vec![self.sample()]
    }

    fn reset(&self) {
        self.cell.set(0.0);
    }
}

macro_rules! metric_map {
    ($map:ident, $child:ident, $vec:ident) => {
        /// Children keyed by label values, created lazily.
        pub struct $map {
            info: MetricInfo,
            vec: $vec,
            children: Mutex<Vec<(Vec<String>, Arc<$child>)>>,
        }

        impl $map {
            pub fn new(info: MetricInfo) -> Result<Self, MetricError> {
                let labels: Vec<&str> = info.labels.iter().map(String::as_str).collect();
                let vec = $vec::new(info.opts(), &labels)?;
                Ok(Self {
                    info,
                    vec,
                    children: Mutex::new(Vec::new()),
                })
            }

            /// Child for the given label values.
            ///
            /// # Panics
            ///
            /// Panics when the number of values differs from the declared labels.
            pub fn with_label(&self, values: &[&str]) -> Arc<$child> {
                match self.get_with_label(values) {
                    Ok(child) => child,
                    Err(e) => panic!("{e}"),
                }
            }

            pub fn get_with_label(&self, values: &[&str]) -> Result<Arc<$child>, MetricError> {
                if values.len() != self.info.labels.len() {
                    return Err(MetricError::LabelCount {
                        name: self.info.fq_name(),
                        expected: self.info.labels.len(),
                        actual: values.len(),
                    });
                }
                let mut children = self.children.lock();
                if let Some((_, c)) = children
                    .iter()
                    .find(|(k, _)| k.iter().map(String::as_str).eq(values.iter().copied()))
                {
                    return Ok(Arc::clone(c));
                }
                let cell = self.vec.get_metric_with_label_values(values)?;
                let key: Vec<String> = values.iter().map(|s| s.to_string()).collect();
                let child = Arc::new($child::with_cell(self.info.clone(), key.clone(), cell));
                children.push((key, Arc::clone(&child)));
                Ok(child)
            }

            /// Sum over all label tuples.
            pub fn sum(&self) -> f64 {
                self.children.lock().iter().map(|(_, c)| c.value()).sum()
            }

            /// Sum over label tuples that carry `label = value`.
            pub fn sum_where(&self, label: &str, value: &str) -> f64 {
                let Some(pos) = self.info.labels.iter().position(|l| l == label) else {
                    return 0.0;
                };
                self.children
                    .lock()
                    .iter()
                    .filter(|(k, _)| k[pos] == value)
                    .map(|(_, c)| c.value())
                    .sum()
            }

            /// Value for a label tuple without creating it.
            pub fn value(&self, values: &[&str]) -> Option<f64> {
                self.children
                    .lock()
                    .iter()
                    .find(|(k, _)| k.iter().map(String::as_str).eq(values.iter().copied()))
                    .map(|(_, c)| c.value())
            }
        }

        impl Metric for $map {
            fn info(&self) -> &MetricInfo {
                &self.info
            }

            fn samples(&self) -> Vec<Sample> {
                self.children
                    .lock()
                    .iter()
                    .map(|(_, c)| c.sample())
                    .collect()
            }

            /// Zeroes every child. The prometheus vec keeps its children too, so
            /// a tuple handed out before the reset still reports.
            fn reset(&self) {
                for (_, c) in self.children.lock().iter() {
                    Metric::reset(c.as_ref());
                }
            }
        }

        impl Serialize for $map {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let samples = self.samples();
                let mut seq = serializer.serialize_seq(Some(samples.len()))?;
                for s in &samples {
                    seq.serialize_element(s)?;
                }
                seq.end()
            }
        }
    };
}

metric_map!(CounterMap, Counter, CounterVec);
metric_map!(GaugeMap, Gauge, GaugeVec);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_map_lazily_creates_children() {
        let m = CounterMap::new(MetricInfo::new("kafka", "messages_total", &["service", "topic"])).unwrap();
        m.with_label(&["foo", "t1"]).inc();
        m.with_label(&["foo", "t1"]).add(2.0);
        m.with_label(&["foo", "t2"]).inc();
        assert_eq!(m.value(&["foo", "t1"]), Some(3.0));
        assert_eq!(m.sum(), 4.0);
        assert_eq!(m.sum_where("topic", "t2"), 1.0);
    }

    #[test]
    fn test_label_count_mismatch_fails() {
        let m = CounterMap::new(MetricInfo::new("mail", "mails_total", &["service", "sender"])).unwrap();
        assert!(m.get_with_label(&["only-one"]).is_err());
    }

    #[test]
    #[should_panic(expected = "expects 2 label values")]
    fn test_with_label_panics_on_mismatch() {
        let m = CounterMap::new(MetricInfo::new("mail", "mails_total", &["service", "sender"])).unwrap();
        m.with_label(&["a", "b", "c"]);
    }

    #[test]
    fn test_reset_keeps_label_tuples() {
        let m = GaugeMap::new(MetricInfo::new("mail", "mail_timestamp", &["service"])).unwrap();
        m.with_label(&["smtp"]).set(42.0);
        m.reset();
        assert_eq!(m.value(&["smtp"]), Some(0.0));
        assert_eq!(m.samples().len(), 1);
    }

    #[test]
    fn test_shared_cell_with_prometheus_vec() {
        let m = CounterMap::new(MetricInfo::new("kafka", "messages_total", &["service", "topic"])).unwrap();
        m.with_label(&["foo", "t1"]).add(2.0);
        assert_eq!(m.vec.with_label_values(&["foo", "t1"]).get(), 2.0);
        m.reset();
        assert_eq!(m.vec.with_label_values(&["foo", "t1"]).get(), 0.0);
    }

    #[test]
    fn test_invalid_name_is_an_error() {
        assert!(Gauge::new(MetricInfo::new("app", "start-timestamp", &[])).is_err());
        let g = Gauge::new(MetricInfo::new("app", "start_timestamp", &[])).unwrap();
        g.set(3.0);
        g.add(-1.0);
        assert_eq!(g.value(), 2.0);
    }

    #[test]
    fn test_json_output() {
        let m = CounterMap::new(MetricInfo::new("ldap", "requests_total", &["service", "operation"])).unwrap();
        m.with_label(&["dir", "bind"]).inc();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "ldap_requests_total{service=\"dir\",operation=\"bind\"}", "value": 1.0}
            ])
        );
    }
}
